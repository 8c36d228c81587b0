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
//! Fits a rectangular panel packing onto a roof polygon.
use geo::{Centroid, Contains, Polygon, Rotate, Translate};

use pv_geom::vector::grid_cells;

use crate::params::constants::FLAT_ROOF_SUN_ALTITUDE_DEGREES;
use crate::params::ModelParams;

/// Pack panels onto a roof polygon. Works in the bird's-eye view: panel
/// heights shrink by cos(slope). Pitched roofs try portrait and landscape
/// grids; flat roofs are landscape only, with the rows spaced so the
/// forward row does not shadow the rear at the reference sun altitude.
pub fn place_panels_on_roof(
    roof: &Polygon<f64>,
    aspect: f64,
    slope: f64,
    is_flat: bool,
    params: &ModelParams,
) -> Vec<Polygon<f64>> {
    let centroid = match roof.centroid() {
        Some(centroid) => centroid,
        None => return vec![],
    };

    let slope_rads = slope.to_radians();
    let sun_angle = FLAT_ROOF_SUN_ALTITUDE_DEGREES.to_radians();

    let portrait_panel_w = params.panel_width_m;
    let portrait_panel_h = params.panel_height_m * slope_rads.cos();
    let landscape_panel_w = params.panel_height_m;
    let landscape_panel_h = params.panel_width_m * slope_rads.cos();

    let spacing_x = params.panel_spacing_m;
    // Panels on flat roofs need a space between each south-facing row so
    // that the row in front does not block the one behind. Panels on flat
    // roofs will always be mounted landscape (on their sides) as this
    // makes the frames and ballast required easier.
    let spacing_y = if is_flat {
        (slope_rads.sin() * landscape_panel_h) / sun_angle.tan()
    } else {
        params.panel_spacing_m
    };

    // rotate the roof area CCW by aspect, to be gridded easily
    let rotated_roof = roof.rotate_around_point(aspect, centroid);

    let portrait_grid = grid_cells(
        &rotated_roof,
        portrait_panel_w,
        portrait_panel_h,
        spacing_x,
        spacing_y,
    );
    let landscape_grid = grid_cells(
        &rotated_roof,
        landscape_panel_w,
        landscape_panel_h,
        spacing_x,
        spacing_y,
    );

    // some variations on panel grid positioning, to try and fit more
    // panels on each roof
    let variations = [
        (0.0, 0.0),
        (-portrait_panel_w * 0.5, 0.0),
        (0.0, -portrait_panel_h * 0.5),
        (-portrait_panel_w * 0.5, -portrait_panel_h * 0.5),
        (-portrait_panel_w * 0.33, 0.0),
        (0.0, -portrait_panel_h * 0.33),
        (-portrait_panel_w * 0.33, -portrait_panel_h * 0.33),
        (-portrait_panel_w * 0.66, 0.0),
        (0.0, -portrait_panel_h * 0.66),
        (-portrait_panel_w * 0.66, -portrait_panel_h * 0.66),
    ];

    let mut best: Vec<Polygon<f64>> = vec![];
    for &(xoff, yoff) in variations.iter() {
        if !is_flat {
            let variant = panels_on_roof(&rotated_roof, &portrait_grid, xoff, yoff);
            if variant.len() > best.len() {
                best = variant;
            }
        }
        let variant = panels_on_roof(&rotated_roof, &landscape_grid, xoff, yoff);
        if variant.len() > best.len() {
            best = variant;
        }
    }

    best.into_iter()
        .map(|panel| panel.rotate_around_point(-aspect, centroid))
        .collect()
}

fn panels_on_roof(
    rotated_roof: &Polygon<f64>,
    panel_grid: &[Polygon<f64>],
    xoff: f64,
    yoff: f64,
) -> Vec<Polygon<f64>> {
    panel_grid
        .iter()
        .map(|panel| panel.translate(xoff, yoff))
        .filter(|panel| rotated_roof.contains(panel))
        .collect()
}
