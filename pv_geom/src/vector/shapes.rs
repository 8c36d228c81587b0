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
use geo::{Area, BooleanOps, LineString, MultiPolygon, Polygon};
use log::warn;

//Polygon parts below this area are noise from boolean ops, not real geometry
const DEGENERATE_AREA: f64 = 1e-9;

/// Axis aligned rectangle with lower-left corner at (x, y)
pub fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (x, y),
            (x, y + h),
            (x + w, y + h),
            (x + w, y),
            (x, y),
        ]),
        vec![],
    )
}

pub fn square(x: f64, y: f64, edge: f64) -> Polygon<f64> {
    rect(x, y, edge, edge)
}

/// The largest polygon of a multi-polygon by area, if any
pub fn largest_polygon(multi: &MultiPolygon<f64>) -> Option<Polygon<f64>> {
    multi
        .0
        .iter()
        .max_by(|a, b| {
            a.unsigned_area()
                .partial_cmp(&b.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

/// Union of all the polygons, merged pairwise to keep the intermediate
/// results small
pub fn union_all(polys: &[Polygon<f64>]) -> MultiPolygon<f64> {
    match polys.len() {
        0 => MultiPolygon::new(vec![]),
        1 => MultiPolygon::new(vec![polys[0].clone()]),
        n => {
            let (lhs, rhs) = polys.split_at(n / 2);
            union_all(lhs).union(&union_all(rhs))
        }
    }
}

pub fn intersection_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    a.intersection(b).unsigned_area()
}

/// Repair a geometry that boolean ops may have left degenerate: re-node by
/// unioning with itself and drop any parts with no real area. An empty
/// result means the caller should drop the polygon.
pub fn make_valid(poly: &Polygon<f64>) -> MultiPolygon<f64> {
    let mut repaired = poly.union(poly);
    repaired.0.retain(|p| p.unsigned_area() > DEGENERATE_AREA);
    if repaired.0.is_empty() {
        warn!("geometry degenerated to nothing during repair");
    }
    repaired
}
