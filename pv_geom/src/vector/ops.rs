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
use geo::{MultiPolygon, Polygon};

/// Offset a polygon by `dist` metres with mitred joins. Negative distances
/// shrink the polygon, which may split it into several parts or make it
/// vanish entirely.
pub fn offset_polygon(poly: &Polygon<f64>, dist: f64) -> MultiPolygon<f64> {
    geo_buffer::buffer_polygon(poly, dist)
}

/// Offset every part of a multi-polygon, see `offset_polygon`
pub fn offset_multi_polygon(multi: &MultiPolygon<f64>, dist: f64) -> MultiPolygon<f64> {
    geo_buffer::buffer_multi_polygon(multi, dist)
}
