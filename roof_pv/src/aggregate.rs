/*
This file is part of the Rooftop PV Suitability Model
Copyright (C) 2023 Novel-T

The Rooftop PV Suitability Model is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/
//! Converts the per-pixel output of the solar physics engine into
//! per-panel yields, weighting each pixel by how much of it the panel
//! covers.
use geo::{BoundingRect, Intersects};
use log::info;
use rstar::{primitives::GeomWithData, primitives::Rectangle, RTree, AABB};

use pv_geom::vector::{intersection_area, square};

use crate::params::constants::SYSTEM_LOSS;
use crate::params::ModelParams;
use crate::types::{Panel, PanelYield, PixelRecord};

/// Days per month used to extrapolate the representative-day Wh figures
const DAYS_IN_MONTH: [f64; 12] = [
    31.0, 28.0, 31.0, 30.0, 31.0, 30.0, 31.0, 31.0, 30.0, 31.0, 30.0, 31.0,
];

/// The values of one pixel, split out of the flat layer list
struct PixelYieldData {
    kwh_year: f64,
    wh_month: [f64; 12],
    horizon: Vec<f64>,
}

fn split_layers(record: &PixelRecord, horizon_slices: usize) -> PixelYieldData {
    let mut wh_month = [0.0; 12];
    wh_month.copy_from_slice(&record.values[1..13]);
    PixelYieldData {
        kwh_year: record.values[0],
        wh_month,
        horizon: record.values[13..13 + horizon_slices].to_vec(),
    }
}

/// Integrate pixel kWh/Wh/horizon values into the panels of one building.
/// Returns the yields plus the ids of panels that intersected no pixels
/// (to be dropped: the physics engine had nothing to say about them).
pub fn aggregate_panel_yields(
    pixels: &[PixelRecord],
    panels: &[Panel],
    params: &ModelParams,
) -> (Vec<PanelYield>, Vec<i64>) {
    let resolution = params.resolution_metres;
    let half = resolution / 2.0;

    let rtree: RTree<GeomWithData<Rectangle<[f64; 2]>, usize>> = RTree::bulk_load(
        pixels
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                GeomWithData::new(
                    Rectangle::from_corners([p.x - half, p.y - half], [p.x + half, p.y + half]),
                    idx,
                )
            })
            .collect(),
    );

    let mut yields = vec![];
    let mut no_coverage = vec![];

    for panel in panels {
        let bounds = match panel.geom.bounding_rect() {
            Some(bounds) => bounds,
            None => {
                no_coverage.push(panel.panel_id);
                continue;
            }
        };
        let envelope = AABB::from_corners(
            [bounds.min().x, bounds.min().y],
            [bounds.max().x, bounds.max().y],
        );

        let mut kwh_year = 0.0;
        let mut kwh_month = [0.0; 12];
        let mut horizon = vec![0.0; params.horizon_slices];
        let mut contributing_pixels = 0u32;

        for hit in rtree.locate_in_envelope_intersecting(&envelope) {
            let pixel = &pixels[hit.data];
            let pixel_square = square(pixel.x - half, pixel.y - half, resolution);
            if !pixel_square.intersects(&panel.geom) {
                continue;
            }
            contributing_pixels += 1;

            let data = split_layers(pixel, params.horizon_slices);
            let overlap =
                intersection_area(&pixel_square, &panel.geom) / (resolution * resolution);

            // The physics engine produces kWh values per pixel as if the
            // pixel was a 1kWp panel, so the values are scaled by the peak
            // power of the covered area. System losses are also applied
            // here.
            let factor = overlap * params.peak_power_per_m2 * (1.0 - SYSTEM_LOSS);
            kwh_year += data.kwh_year * factor;

            for month in 0..12 {
                // convert a 1-day Wh to a kWh for the whole month
                kwh_month[month] += data.wh_month[month] * 0.001 * DAYS_IN_MONTH[month] * factor;
            }
            for (slice, value) in data.horizon.iter().enumerate() {
                horizon[slice] += value;
            }
        }

        if contributing_pixels > 0 {
            for slice in horizon.iter_mut() {
                *slice /= contributing_pixels as f64;
            }
            yields.push(PanelYield {
                panel_id: panel.panel_id,
                kwh_year,
                kwh_month,
                kwp: panel.area * params.peak_power_per_m2,
                horizon,
            });
        } else {
            info!(
                "panel {} of {} intersected no pixels, dropping",
                panel.panel_id, panel.toid
            );
            no_coverage.push(panel.panel_id);
        }
    }

    (yields, no_coverage)
}
