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

/// Angle of the segment p1->p2, in degrees clockwise from north (the +y
/// axis), normalised to [0, 360)
pub fn azimuth(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let angle = (p2.0 - p1.0).atan2(p2.1 - p1.1);
    to_positive_angle(angle.to_degrees())
}

pub fn to_positive_angle(angle: f64) -> f64 {
    let angle = angle % 360.0;
    if angle < 0.0 {
        angle + 360.0
    } else {
        angle
    }
}

/// Smallest difference between two aspects, treating angles 180 degrees
/// apart as equal. Used when sampling pixels that may lie on the same
/// plane.
pub fn smallest_angle_between(x: f64, y: f64) -> f64 {
    let a = (x - y).rem_euclid(180.0);
    let b = (y - x).rem_euclid(180.0);
    a.min(b)
}

/// Circular mean of angles in degrees, in [0, 360)
pub fn circular_mean_deg(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let (sin_sum, cos_sum) = sin_cos_sums(angles);
    to_positive_angle(sin_sum.atan2(cos_sum).to_degrees())
}

/// Circular standard deviation of angles in degrees
pub fn circular_sd_deg(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let (sin_sum, cos_sum) = sin_cos_sums(angles);
    let r = (sin_sum.hypot(cos_sum) / angles.len() as f64).min(1.0);
    if r <= 0.0 {
        return f64::INFINITY;
    }
    (-2.0 * r.ln()).sqrt().to_degrees()
}

fn sin_cos_sums(angles: &[f64]) -> (f64, f64) {
    angles.iter().fold((0.0, 0.0), |(s, c), a| {
        let rads = a.to_radians();
        (s + rads.sin(), c + rads.cos())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_azimuth_cardinal_directions() {
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (0.0, 1.0)), 0.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (1.0, 0.0)), 90.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (0.0, -1.0)), 180.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (-1.0, 0.0)), 270.0, epsilon = 1e-9));
    }

    #[test]
    fn test_azimuth_diagonal() {
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (1.0, 1.0)), 45.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, azimuth((0.0, 0.0), (-1.0, 1.0)), 315.0, epsilon = 1e-9));
    }

    #[test]
    fn test_to_positive_angle() {
        assert!(approx_eq!(f64, to_positive_angle(-90.0), 270.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, to_positive_angle(370.0), 10.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, to_positive_angle(360.0), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn test_smallest_angle_between() {
        assert!(approx_eq!(f64, smallest_angle_between(10.0, 20.0), 10.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, smallest_angle_between(20.0, 10.0), 10.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, smallest_angle_between(179.0, 1.0), 2.0, epsilon = 1e-9));
        // opposite aspects count as similar:
        assert!(approx_eq!(f64, smallest_angle_between(270.0, 90.0), 0.0, epsilon = 1e-9));
    }

    #[test]
    fn test_circular_mean_wraps_north() {
        let mean = circular_mean_deg(&[350.0, 10.0]);
        assert!(mean < 1e-9 || mean > 360.0 - 1e-9);
    }

    #[test]
    fn test_circular_sd_ordering() {
        let tight = circular_sd_deg(&[179.0, 180.0, 181.0]);
        let spread = circular_sd_deg(&[150.0, 180.0, 210.0]);
        assert!(tight < spread);
        assert!(tight < 2.0);
    }
}
