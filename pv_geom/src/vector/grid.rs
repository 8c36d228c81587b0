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
use geo::{BoundingRect, Intersects, Polygon};

use crate::vector::rect;

/// The cells of a grid anchored at the lower-left corner of `poly`'s
/// bounding box that intersect `poly`. Cells are `cell_w` x `cell_h` and
/// separated by the given spacing.
pub fn grid_cells(
    poly: &Polygon<f64>,
    cell_w: f64,
    cell_h: f64,
    spacing_w: f64,
    spacing_h: f64,
) -> Vec<Polygon<f64>> {
    let bounds = match poly.bounding_rect() {
        Some(b) => b,
        None => return vec![],
    };
    let (xmin, ymin) = (bounds.min().x, bounds.min().y);
    let (xmax, ymax) = (bounds.max().x, bounds.max().y);

    let step_x = cell_w + spacing_w;
    let step_y = cell_h + spacing_h;

    let mut cells = vec![];
    let mut x = xmin;
    while x < xmax {
        let mut y = ymin;
        while y < ymax {
            let cell = rect(x, y, cell_w, cell_h);
            if cell.intersects(poly) {
                cells.push(cell);
            }
            y += step_y;
        }
        x += step_x;
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::square;

    #[test]
    fn test_grid_cells_cover_square() {
        let poly = square(0.0, 0.0, 10.0);
        let cells = grid_cells(&poly, 1.0, 1.0, 0.0, 0.0);
        assert_eq!(cells.len(), 100);
    }

    #[test]
    fn test_grid_cells_with_spacing() {
        let poly = square(0.0, 0.0, 10.0);
        // 1m cells on a 2m pitch: 5 columns x 5 rows
        let cells = grid_cells(&poly, 1.0, 1.0, 1.0, 1.0);
        assert_eq!(cells.len(), 25);
    }

    #[test]
    fn test_grid_cells_empty_for_degenerate_polygon() {
        let poly = Polygon::new(geo::LineString::from(vec![(0.0, 0.0)]), vec![]);
        assert!(grid_cells(&poly, 1.0, 1.0, 0.0, 0.0).is_empty());
    }
}
