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
//! Outdated LiDAR detection. Walks the building perimeter and checks that
//! the ground actually rises where the polygon says a wall should be: at
//! each perimeter segment, the perpendicular bisector should see interior
//! pixels that are noticeably higher than the exterior ones. If most
//! bisectors see no rise, the LiDAR predates the building.
use geo::Polygon;
use rstar::{primitives::GeomWithData, RTree, AABB};

use crate::lidar_check::HeightAggregator;
use crate::types::{ExclusionReason, LidarPixel};

/// Length of the perimeter segments to walk, in metres
const SEGMENT_LENGTH_M: f64 = 2.0;
/// Length of the perpendicular bisector taken at each segment
const BISECTOR_LENGTH_M: f64 = 5.0;
/// A bisector is bad if the interior-exterior elevation difference along
/// it is below this
const GRADIENT_THRESHOLD_M: f64 = 0.5;
/// Fraction of bad bisectors above which the LiDAR is considered outdated
const BAD_BISECTOR_RATIO: f64 = 0.52;

pub fn check_perimeter_gradient(
    geom: &Polygon<f64>,
    pixels: &[LidarPixel],
    resolution_metres: f64,
) -> Option<ExclusionReason> {
    let rtree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
        pixels
            .iter()
            .enumerate()
            .map(|(idx, p)| GeomWithData::new([p.x, p.y], idx))
            .collect(),
    );

    let capture_radius = resolution_metres / 2.0;
    let mut total = 0u32;
    let mut bad = 0u32;

    for (p1, p2) in perimeter_segments(geom, SEGMENT_LENGTH_M) {
        let (b1, b2) = match perpendicular_bisector(p1, p2, BISECTOR_LENGTH_M) {
            Some(bisector) => bisector,
            None => continue,
        };

        // coarse envelope query, then exact distance to the bisector
        let envelope = AABB::from_corners(
            [
                b1.0.min(b2.0) - capture_radius,
                b1.1.min(b2.1) - capture_radius,
            ],
            [
                b1.0.max(b2.0) + capture_radius,
                b1.1.max(b2.1) + capture_radius,
            ],
        );
        let pixels_on_cross: Vec<LidarPixel> = rtree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|p| point_segment_distance((p.geom()[0], p.geom()[1]), b1, b2) <= capture_radius)
            .map(|p| pixels[p.data].clone())
            .collect();

        let agg = HeightAggregator::from_pixels(&pixels_on_cross);
        if let (Some(within), Some(without)) = agg.average_heights() {
            total += 1;
            if within - without < GRADIENT_THRESHOLD_M {
                bad += 1;
            }
        }
    }

    if total > 0 && bad as f64 / total as f64 > BAD_BISECTOR_RATIO {
        Some(ExclusionReason::OutdatedLidarCoverage)
    } else {
        None
    }
}

/// Straight-line segments every `segment_length` metres along the exterior
/// ring. Each segment runs from the interpolated walk position to the next
/// ring vertex, or to the interpolated segment end if that comes first.
fn perimeter_segments(geom: &Polygon<f64>, segment_length: f64) -> Vec<((f64, f64), (f64, f64))> {
    let coords: Vec<(f64, f64)> = geom.exterior().0.iter().map(|c| (c.x, c.y)).collect();
    if coords.len() < 2 {
        return vec![];
    }

    let mut cumulative = vec![0.0];
    for window in coords.windows(2) {
        let d = (window[1].0 - window[0].0).hypot(window[1].1 - window[0].1);
        cumulative.push(cumulative.last().unwrap() + d);
    }
    let total_length = *cumulative.last().unwrap();

    let mut segments = vec![];
    let mut start = 0.0;
    while start < total_length.floor() {
        let end = start + segment_length;

        // find the ring edge holding the walk position
        let mut edge = 0;
        while edge + 2 < cumulative.len() && cumulative[edge + 1] <= start {
            edge += 1;
        }

        let p1 = interpolate(coords[edge], coords[edge + 1], cumulative[edge], cumulative[edge + 1], start);
        let p2 = if cumulative[edge + 1] < end {
            coords[edge + 1]
        } else {
            interpolate(coords[edge], coords[edge + 1], cumulative[edge], cumulative[edge + 1], end)
        };

        if (p1.0 - p2.0).hypot(p1.1 - p2.1) > 1e-9 {
            segments.push((p1, p2));
        }
        start += segment_length;
    }
    segments
}

fn interpolate(
    a: (f64, f64),
    b: (f64, f64),
    dist_a: f64,
    dist_b: f64,
    at: f64,
) -> (f64, f64) {
    if dist_b - dist_a <= 0.0 {
        return a;
    }
    let t = ((at - dist_a) / (dist_b - dist_a)).clamp(0.0, 1.0);
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

/// The perpendicular bisector of the segment p1->p2, centred on its
/// midpoint, of the given length
fn perpendicular_bisector(
    p1: (f64, f64),
    p2: (f64, f64),
    length: f64,
) -> Option<((f64, f64), (f64, f64))> {
    let dx = p2.0 - p1.0;
    let dy = p2.1 - p1.1;
    let len = dx.hypot(dy);
    if len <= 1e-9 {
        return None;
    }
    let (nx, ny) = (-dy / len, dx / len);
    let mid = ((p1.0 + p2.0) / 2.0, (p1.1 + p2.1) / 2.0);
    let half = length / 2.0;
    Some((
        (mid.0 + nx * half, mid.1 + ny * half),
        (mid.0 - nx * half, mid.1 - ny * half),
    ))
}

fn point_segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let abx = b.0 - a.0;
    let aby = b.1 - a.1;
    let len_sq = abx * abx + aby * aby;
    if len_sq <= 0.0 {
        return (p.0 - a.0).hypot(p.1 - a.1);
    }
    let t = (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / len_sq).clamp(0.0, 1.0);
    let proj = (a.0 + abx * t, a.1 + aby * t);
    (p.0 - proj.0).hypot(p.1 - proj.1)
}
