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
//! Screening of buildings whose LiDAR data is missing or predates the
//! building. LiDAR surveys are redone rarely, so newly built things show
//! up with the elevation of the ground (or of whatever stood there before)
//! and would otherwise be modelled as flat roofs at ground level.
use crate::perimeter_gradient::check_perimeter_gradient;
use crate::types::{Building, ExclusionReason, LidarPixel};

/// Accumulates interior and exterior elevations to derive a building
/// height from the LiDAR
#[derive(Default)]
pub struct HeightAggregator {
    pixels_within: u32,
    pixels_without: u32,
    within_elevation_sum: f64,
    without_elevation_sum: f64,
}

impl HeightAggregator {
    pub fn from_pixels(pixels: &[LidarPixel]) -> HeightAggregator {
        let mut agg = HeightAggregator::default();
        for pixel in pixels {
            agg.process_pixel(pixel);
        }
        agg
    }

    fn process_pixel(&mut self, pixel: &LidarPixel) {
        if pixel.within_building {
            self.pixels_within += 1;
            self.within_elevation_sum += pixel.elevation;
        } else if pixel.without_building {
            self.pixels_without += 1;
            self.without_elevation_sum += pixel.elevation;
        }
    }

    pub fn average_heights(&self) -> (Option<f64>, Option<f64>) {
        if self.pixels_within > 0 && self.pixels_without > 0 {
            (
                Some(self.within_elevation_sum / self.pixels_within as f64),
                Some(self.without_elevation_sum / self.pixels_without as f64),
            )
        } else {
            (None, None)
        }
    }

    /// Mean interior elevation minus mean exterior elevation, if both
    /// exist
    pub fn height(&self) -> Option<f64> {
        match self.average_heights() {
            (Some(within), Some(without)) => Some(within - without),
            _ => None,
        }
    }
}

fn check_coverage(pixels: &[LidarPixel]) -> Option<ExclusionReason> {
    if pixels.iter().any(|p| p.within_building) {
        None
    } else {
        Some(ExclusionReason::NoLidarCoverage)
    }
}

/// Run the coverage test then the perimeter-gradient test. Every building
/// gets a verdict; None means the LiDAR looks believable.
pub fn check_building(
    building: &Building,
    pixels: &[LidarPixel],
    resolution_metres: f64,
) -> Option<ExclusionReason> {
    check_coverage(pixels)
        .or_else(|| check_perimeter_gradient(&building.geom, pixels, resolution_metres))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn pixel(x: f64, y: f64, elevation: f64, within: bool) -> LidarPixel {
        LidarPixel {
            x,
            y,
            elevation,
            within_building: within,
            without_building: !within,
        }
    }

    #[test]
    fn test_height_aggregator() {
        let pixels = vec![
            pixel(0.5, 0.5, 10.0, true),
            pixel(1.5, 0.5, 12.0, true),
            pixel(-1.0, 0.5, 4.0, false),
            pixel(-2.0, 0.5, 6.0, false),
        ];
        let agg = HeightAggregator::from_pixels(&pixels);
        let (within, without) = agg.average_heights();
        assert!(approx_eq!(f64, within.unwrap(), 11.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, without.unwrap(), 5.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, agg.height().unwrap(), 6.0, epsilon = 1e-9));
    }

    #[test]
    fn test_height_needs_both_sides() {
        let agg = HeightAggregator::from_pixels(&[pixel(0.5, 0.5, 10.0, true)]);
        assert_eq!(agg.height(), None);
    }

    #[test]
    fn test_no_coverage() {
        let pixels = vec![pixel(-1.0, 0.5, 4.0, false)];
        assert_eq!(
            check_coverage(&pixels),
            Some(ExclusionReason::NoLidarCoverage)
        );
        assert_eq!(check_coverage(&[pixel(0.5, 0.5, 4.0, true)]), None);
    }
}
