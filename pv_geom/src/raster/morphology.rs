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
use std::collections::VecDeque;
use std::f64::consts::{PI, SQRT_2};

use bitvec::prelude::*;
use geo::{ConvexHull, Intersects, MultiPoint, Point};
use itertools::Itertools;
use ndarray::Array2;

/// Binary image built from a set of points snapped to a grid at the raster
/// resolution. Used to judge the shape of a candidate roof plane's inliers.
pub struct BinaryImage {
    img: Array2<u8>,
}

impl BinaryImage {
    /// Normalise the points to the grid origin and render them into a
    /// binary image, one cell per raster pixel. None if there are no
    /// points.
    pub fn from_points(points: &[(f64, f64)], resolution: f64) -> Option<BinaryImage> {
        let (min_x, max_x) = points.iter().map(|p| p.0).minmax().into_option()?;
        let (min_y, max_y) = points.iter().map(|p| p.1).minmax().into_option()?;

        let num_cols = ((max_x - min_x) / resolution).round() as usize + 1;
        let num_rows = ((max_y - min_y) / resolution).round() as usize + 1;

        let mut img = Array2::<u8>::zeros((num_cols, num_rows));
        for p in points {
            let x = ((p.0 - min_x) / resolution).round() as usize;
            let y = ((p.1 - min_y) / resolution).round() as usize;
            img[[x, y]] = 1;
        }
        Some(BinaryImage { img })
    }

    pub fn pixel_count(&self) -> usize {
        self.img.iter().filter(|&&v| v != 0).count()
    }

    /// Number of 4-connected components of set pixels
    pub fn component_count(&self) -> usize {
        let (num_cols, num_rows) = self.img.dim();
        let mut seen = BitVec::<u8, Msb0>::new();
        seen.resize(num_cols * num_rows, false);

        let mut components = 0;
        let mut deq = VecDeque::new();

        for start_x in 0..num_cols {
            for start_y in 0..num_rows {
                let start_idx = start_x + start_y * num_cols;
                if seen[start_idx] || self.img[[start_x, start_y]] == 0 {
                    continue;
                }
                components += 1;

                deq.push_back((start_x as isize, start_y as isize));
                while let Some((x, y)) = deq.pop_front() {
                    let idx = x as usize + y as usize * num_cols;
                    if seen[idx] {
                        continue;
                    }
                    seen.set(idx, true);

                    for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)].iter() {
                        let try_x = x + dx;
                        let try_y = y + dy;
                        if try_x < 0
                            || try_x >= num_cols as isize
                            || try_y < 0
                            || try_y >= num_rows as isize
                        {
                            continue;
                        }
                        if self.img[[try_x as usize, try_y as usize]] == 0 {
                            continue;
                        }
                        let try_idx = try_x as usize + try_y as usize * num_cols;
                        if !seen[try_idx] {
                            deq.push_back((try_x, try_y));
                        }
                    }
                }
            }
        }
        components
    }

    /// Ratio of the pixel area to the area of the pixelated convex hull of
    /// the set pixels. Low values mean the shape has large concavities, a
    /// sign of a plane that cuts through the roof at an angle.
    pub fn convex_hull_fill_ratio(&self) -> f64 {
        let (num_cols, num_rows) = self.img.dim();
        let centres: Vec<Point<f64>> = self
            .img
            .indexed_iter()
            .filter(|(_, &v)| v != 0)
            .map(|((x, y), _)| Point::new(x as f64, y as f64))
            .collect();
        if centres.is_empty() {
            return 0.0;
        }

        let hull = MultiPoint::new(centres).convex_hull();

        let mut hull_pixels = 0usize;
        for x in 0..num_cols {
            for y in 0..num_rows {
                if hull.intersects(&Point::new(x as f64, y as f64)) {
                    hull_pixels += 1;
                }
            }
        }
        if hull_pixels == 0 {
            return 0.0;
        }
        self.pixel_count() as f64 / hull_pixels as f64
    }

    /// Crofton perimeter estimate with 4 directions, the standard
    /// stereological approximation of the boundary length of the set
    /// pixels
    pub fn crofton_perimeter(&self) -> f64 {
        // Weight per 2x2 neighbourhood configuration, indexed by the 4-bit
        // code built below
        let coefs = [
            0.0,
            PI / 4.0 * (1.0 + 1.0 / SQRT_2),
            PI / (4.0 * SQRT_2),
            PI / (2.0 * SQRT_2),
            0.0,
            PI / 4.0 * (1.0 + 1.0 / SQRT_2),
            0.0,
            PI / (4.0 * SQRT_2),
            PI / 4.0,
            PI / 2.0,
            PI / (4.0 * SQRT_2),
            PI / (4.0 * SQRT_2),
            PI / 4.0,
            PI / 2.0,
            0.0,
            0.0,
        ];

        let (num_cols, num_rows) = self.img.dim();
        let at = |x: isize, y: isize| -> u32 {
            if x < 0 || y < 0 || x >= num_cols as isize || y >= num_rows as isize {
                0
            } else {
                self.img[[x as usize, y as usize]] as u32
            }
        };

        let mut perimeter = 0.0;
        for x in -1..num_cols as isize {
            for y in -1..num_rows as isize {
                let code = at(x + 1, y + 1) + 2 * at(x + 1, y) + 4 * at(x, y + 1) + 8 * at(x, y);
                perimeter += coefs[code as usize];
            }
        }
        perimeter
    }

    /// `4 * pi * area / perimeter^2`: 1 for a circle, near 0 for a sliver
    pub fn thinness_ratio(&self) -> f64 {
        let perimeter = self.crofton_perimeter();
        if perimeter <= 0.0 {
            return 0.0;
        }
        (4.0 * PI * self.pixel_count() as f64) / (perimeter * perimeter)
    }
}
