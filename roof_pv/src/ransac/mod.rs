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
//! RANSAC adapted for roof plane detection from LiDAR (after
//! Tarsha-Kurdi, 2007).
//!
//! Changes against textbook RANSAC:
//!
//! * Trials are scored by the standard deviation of the inlier residuals,
//!   not the inlier count. Buildings usually hold several planes, so
//!   fitting as many points as possible just drags the plane between two
//!   roof faces.
//! * The 3-pixel seed sample is constrained to pixels whose detected
//!   aspect agrees, within a tolerance that relaxes as sampling struggles.
//! * Planes steeper than `max_slope` are rejected: walls, not roofs.
//! * Inliers must form a single 4-connected region whose shape looks like
//!   a roof face (convex hull fill and thinness checks), unless the
//!   building is so large that one plane legitimately spans several
//!   separate patches.
//!
//! One call extracts one plane; `ransac_building` re-runs it, removing the
//! inliers each time, until nothing more is found.
use std::collections::HashSet;

use rand::prelude::*;
use rand::rngs::StdRng;

use pv_geom::raster::BinaryImage;
use pv_geom::vector::{circular_mean_deg, circular_sd_deg, smallest_angle_between, to_positive_angle};

use crate::params::constants::{
    FLAT_ROOF_DEGREES_THRESHOLD, RANSAC_ABS_MAX_TRIALS, RANSAC_BASE_MAX_TRIALS,
    RANSAC_LARGE_BUILDING,
};
use crate::params::ModelParams;
use crate::types::DetectedPlane;

/// One LiDAR pixel inside a building, with the aspect detected for it
/// upstream
#[derive(Debug, Clone)]
pub struct RansacPixel {
    pub x: f64,
    pub y: f64,
    pub elevation: f64,
    pub aspect: f64,
}

/// How a single plane extraction behaves. The sampling and scoring knobs
/// live here rather than in `ModelParams` so per-building adjustments
/// (large buildings) stay local to the fitter.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub residual_threshold: f64,
    pub flat_roof_residual_threshold: f64,
    pub max_trials: u32,
    pub min_slope: f64,
    pub max_slope: f64,
    pub flat_roof_threshold_degrees: f64,
    pub min_points_per_plane: usize,
    pub min_convex_hull_ratio: f64,
    pub min_thinness_ratio: f64,
    pub stop_probability: f64,
    pub include_group_checks: bool,
    pub resolution_metres: f64,
}

impl RansacConfig {
    pub fn for_building(pixel_count: usize, params: &ModelParams) -> RansacConfig {
        let large = pixel_count as f64 > RANSAC_LARGE_BUILDING / params.resolution_metres;
        let max_trials = if large {
            (RANSAC_BASE_MAX_TRIALS as f64 + pixel_count as f64 / params.resolution_metres)
                .min(RANSAC_ABS_MAX_TRIALS as f64) as u32
        } else {
            RANSAC_BASE_MAX_TRIALS
        };
        RansacConfig {
            residual_threshold: 0.25,
            flat_roof_residual_threshold: 0.1,
            max_trials,
            min_slope: 0.0,
            max_slope: 75.0,
            flat_roof_threshold_degrees: FLAT_ROOF_DEGREES_THRESHOLD,
            min_points_per_plane: params.min_points_per_plane(),
            min_convex_hull_ratio: 0.6,
            min_thinness_ratio: 0.55,
            stop_probability: 0.99,
            // large buildings often have separate roof areas on the same
            // plane, so the single-region constraint would reject real
            // roofs. Only the largest region is polygonised each time
            // anyway, and the other regions get picked up by later rounds.
            include_group_checks: !large,
            resolution_metres: params.resolution_metres,
        }
    }
}

/// A plane extracted from the pixel cloud, with the indexes of its inliers
#[derive(Debug, Clone)]
pub struct PlaneFit {
    pub x_coef: f64,
    pub y_coef: f64,
    pub intercept: f64,
    pub slope: f64,
    pub aspect: f64,
    pub sd: f64,
    pub aspect_circ_mean: f64,
    pub aspect_circ_sd: f64,
    pub thinness_ratio: Option<f64>,
    pub cv_hull_ratio: Option<f64>,
    pub inlier_idxs: Vec<usize>,
}

/// Extract planes from a building's pixels until fewer than
/// `min_points_per_plane` remain unassigned or a round finds nothing
pub fn ransac_building(
    toid: &str,
    pixels: Vec<RansacPixel>,
    params: &ModelParams,
    rng: &mut StdRng,
) -> Vec<DetectedPlane> {
    let cfg = RansacConfig::for_building(pixels.len(), params);

    let mut remaining = pixels;
    let mut planes = vec![];
    while remaining.len() > cfg.min_points_per_plane {
        let fit = match fit_one_plane(&remaining, &cfg, rng) {
            Some(fit) => fit,
            None => break,
        };

        let inlier_set: HashSet<usize> = fit.inlier_idxs.iter().copied().collect();
        planes.push(DetectedPlane {
            toid: toid.to_string(),
            x_coef: fit.x_coef,
            y_coef: fit.y_coef,
            intercept: fit.intercept,
            slope: fit.slope,
            aspect: fit.aspect,
            sd: fit.sd,
            aspect_circ_mean: fit.aspect_circ_mean,
            aspect_circ_sd: fit.aspect_circ_sd,
            thinness_ratio: fit.thinness_ratio,
            cv_hull_ratio: fit.cv_hull_ratio,
            inliers_xy: fit
                .inlier_idxs
                .iter()
                .map(|&i| (remaining[i].x, remaining[i].y))
                .collect(),
        });

        remaining = remaining
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !inlier_set.contains(i))
            .map(|(_, p)| p)
            .collect();
    }
    planes
}

/// One run of the adapted RANSAC: find the best single plane in the pixel
/// cloud, or None if no trial ever passes all the predicates
pub fn fit_one_plane(
    pixels: &[RansacPixel],
    cfg: &RansacConfig,
    rng: &mut StdRng,
) -> Option<PlaneFit> {
    let n_samples = pixels.len();
    if n_samples < 3 || n_samples < cfg.min_points_per_plane {
        return None;
    }

    let mut sd_best = f64::INFINITY;
    let mut n_inliers_best = 1usize;
    let mut best: Option<(Vec<usize>, f64, Option<f64>, Option<f64>)> = None;
    let mut bad_samples: HashSet<[usize; 3]> = HashSet::new();

    let mut max_trials = cfg.max_trials;
    let mut n_trials = 0;
    while n_trials < max_trials {
        n_trials += 1;

        let sample = match sample_by_aspect(pixels, rng) {
            Some(sample) => sample,
            // sampling exhausted its attempts; the building is done
            None => return None,
        };
        if bad_samples.contains(&sample) {
            continue;
        }

        let sample_points: Vec<(f64, f64, f64)> = sample
            .iter()
            .map(|&i| (pixels[i].x, pixels[i].y, pixels[i].elevation))
            .collect();
        let (a, b, d) = match lstsq_plane(&sample_points) {
            Some(coefs) => coefs,
            None => {
                bad_samples.insert(sample);
                continue;
            }
        };

        let slope = slope_degrees(a, b);
        if cfg.max_slope > 0.0 && slope > cfg.max_slope {
            bad_samples.insert(sample);
            continue;
        }
        if cfg.min_slope > 0.0 && slope < cfg.min_slope {
            bad_samples.insert(sample);
            continue;
        }

        // flat planes get a tighter threshold: there is no slope for real
        // variation to hide in
        let residual_threshold = if slope < cfg.flat_roof_threshold_degrees {
            cfg.flat_roof_residual_threshold
        } else {
            cfg.residual_threshold
        };

        let mut inliers = vec![];
        let mut residuals = vec![];
        for (i, p) in pixels.iter().enumerate() {
            let residual = (p.elevation - (a * p.x + b * p.y + d)).abs();
            if residual < residual_threshold {
                inliers.push(i);
                residuals.push(residual);
            }
        }

        if inliers.len() < cfg.min_points_per_plane {
            bad_samples.insert(sample);
            continue;
        }

        let sd = std_dev(&residuals);
        if sd > sd_best || (sd == sd_best && inliers.len() <= n_inliers_best) {
            bad_samples.insert(sample);
            continue;
        }

        let mut thinness_ratio = None;
        let mut cv_hull_ratio = None;
        if cfg.include_group_checks {
            let points: Vec<(f64, f64)> = inliers.iter().map(|&i| (pixels[i].x, pixels[i].y)).collect();
            let image = match BinaryImage::from_points(&points, cfg.resolution_metres) {
                Some(image) => image,
                None => {
                    bad_samples.insert(sample);
                    continue;
                }
            };
            if image.component_count() > 1 {
                bad_samples.insert(sample);
                continue;
            }
            let cv = image.convex_hull_fill_ratio();
            if cv < cfg.min_convex_hull_ratio {
                bad_samples.insert(sample);
                continue;
            }
            let thinness = image.thinness_ratio();
            if thinness < cfg.min_thinness_ratio {
                bad_samples.insert(sample);
                continue;
            }
            thinness_ratio = Some(thinness);
            cv_hull_ratio = Some(cv);
        }

        sd_best = sd;
        n_inliers_best = inliers.len();
        best = Some((inliers, sd, thinness_ratio, cv_hull_ratio));

        max_trials = max_trials.min(dynamic_max_trials(
            n_inliers_best,
            n_samples,
            3,
            cfg.stop_probability,
        ));
    }

    let (inlier_idxs, sd, thinness_ratio, cv_hull_ratio) = best?;

    // refit against every inlier for the final coefficients
    let inlier_points: Vec<(f64, f64, f64)> = inlier_idxs
        .iter()
        .map(|&i| (pixels[i].x, pixels[i].y, pixels[i].elevation))
        .collect();
    let (a, b, d) = lstsq_plane(&inlier_points)?;

    let inlier_aspects: Vec<f64> = inlier_idxs.iter().map(|&i| pixels[i].aspect).collect();

    Some(PlaneFit {
        x_coef: a,
        y_coef: b,
        intercept: d,
        slope: slope_degrees(a, b),
        aspect: aspect_degrees(a, b),
        sd,
        aspect_circ_mean: circular_mean_deg(&inlier_aspects),
        aspect_circ_sd: circular_sd_deg(&inlier_aspects),
        thinness_ratio,
        cv_hull_ratio,
        inlier_idxs,
    })
}

/// Choose 3 pixels whose aspects agree within a tolerance that starts at 5
/// degrees and widens by 5 every 100 failed attempts. None after 1000
/// attempts.
fn sample_by_aspect(pixels: &[RansacPixel], rng: &mut StdRng) -> Option<[usize; 3]> {
    let n = pixels.len();
    let mut max_aspect_range = 5.0;

    for attempt in 0..1000u32 {
        let initial = rng.gen_range(0..n);
        let initial_aspect = pixels[initial].aspect;

        let candidates: Vec<usize> = (0..n)
            .filter(|&i| {
                i != initial
                    && smallest_angle_between(pixels[i].aspect, initial_aspect) < max_aspect_range
            })
            .collect();

        if candidates.len() >= 2 {
            let chosen: Vec<usize> = candidates.choose_multiple(rng, 2).copied().collect();
            return Some([initial, chosen[0], chosen[1]]);
        }

        if (attempt + 1) % 100 == 0 {
            max_aspect_range += 5.0;
        }
    }
    None
}

/// Least-squares fit of z = a*x + b*y + d. Coordinates are centred before
/// solving the normal equations. None for degenerate (collinear) inputs.
fn lstsq_plane(points: &[(f64, f64, f64)]) -> Option<(f64, f64, f64)> {
    let n = points.len() as f64;
    if points.len() < 3 {
        return None;
    }
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mz = points.iter().map(|p| p.2).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy, mut sxz, mut syz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let (x, y, z) = (p.0 - mx, p.1 - my, p.2 - mz);
        sxx += x * x;
        sxy += x * y;
        syy += y * y;
        sxz += x * z;
        syz += y * z;
    }

    let det = sxx * syy - sxy * sxy;
    if det.abs() < 1e-12 {
        return None;
    }
    let a = (sxz * syy - syz * sxy) / det;
    let b = (syz * sxx - sxz * sxy) / det;
    let d = mz - a * mx - b * my;
    Some((a, b, d))
}

/// Slope of the plane in degrees from flat
pub fn slope_degrees(a: f64, b: f64) -> f64 {
    a.hypot(b).atan().to_degrees().abs()
}

/// Aspect of the plane in degrees clockwise from north
pub fn aspect_degrees(a: f64, b: f64) -> f64 {
    to_positive_angle((b.atan2(-a) + std::f64::consts::FRAC_PI_2).to_degrees())
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Number of trials needed for `probability` confidence of having drawn at
/// least one outlier-free sample, given the best inlier count so far
fn dynamic_max_trials(
    n_inliers: usize,
    n_samples: usize,
    min_samples: u32,
    probability: f64,
) -> u32 {
    let inlier_ratio = n_inliers as f64 / n_samples as f64;
    let nom = (1.0 - probability).max(f64::EPSILON);
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(f64::EPSILON);
    if (nom - 1.0).abs() < f64::EPSILON {
        return 0;
    }
    if (denom - 1.0).abs() < f64::EPSILON {
        return u32::MAX;
    }
    let trials = (nom.ln() / denom.ln()).ceil().abs();
    if trials >= u32::MAX as f64 {
        u32::MAX
    } else {
        trials as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use rand::SeedableRng;
    use serde::Deserialize;
    use std::path::Path;

    #[derive(Deserialize)]
    struct PixelRow {
        #[allow(dead_code)]
        pixel_id: String,
        x: f64,
        y: f64,
        elevation: f64,
        aspect: f64,
    }

    fn load_test_pixels(name: &str) -> Vec<RansacPixel> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("test_data")
            .join(name);
        let mut reader = csv::Reader::from_path(&path)
            .unwrap_or_else(|e| panic!("cannot read {:?}: {}", path, e));
        reader
            .deserialize::<PixelRow>()
            .map(|row| {
                let row = row.unwrap();
                RansacPixel {
                    x: row.x,
                    y: row.y,
                    elevation: row.elevation,
                    aspect: row.aspect,
                }
            })
            .collect()
    }

    /// Pixels of a south-facing 30 degree pitched roof on a 1m grid
    fn south_pitched_pixels(w: usize, h: usize) -> Vec<RansacPixel> {
        let slope_tan = 30.0f64.to_radians().tan();
        let mut pixels = vec![];
        for x in 0..w {
            for y in 0..h {
                let (xc, yc) = (x as f64 + 0.5, y as f64 + 0.5);
                pixels.push(RansacPixel {
                    x: xc,
                    y: yc,
                    elevation: 5.0 + slope_tan * yc,
                    aspect: 180.0,
                });
            }
        }
        pixels
    }

    #[test]
    fn test_slope_and_aspect_from_coefficients() {
        let b = 30.0f64.to_radians().tan();
        assert!(approx_eq!(f64, slope_degrees(0.0, b), 30.0, epsilon = 1e-9));
        assert!(approx_eq!(
            f64,
            aspect_degrees(0.0, b),
            180.0,
            epsilon = 1e-9
        ));
        // roof surface rising towards +x faces west
        assert!(approx_eq!(
            f64,
            aspect_degrees(b, 0.0),
            270.0,
            epsilon = 1e-9
        ));
        // falling towards +x faces east
        assert!(approx_eq!(
            f64,
            aspect_degrees(-b, 0.0),
            90.0,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn test_lstsq_plane_recovers_exact_plane() {
        let points = vec![
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.5),
            (0.0, 1.0, 2.0),
            (1.0, 1.0, 2.5),
        ];
        let (a, b, d) = lstsq_plane(&points).unwrap();
        assert!(approx_eq!(f64, a, 0.5, epsilon = 1e-9));
        assert!(approx_eq!(f64, b, 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, d, 1.0, epsilon = 1e-9));
    }

    #[test]
    fn test_lstsq_plane_rejects_collinear_points() {
        let points = vec![(0.0, 0.0, 1.0), (1.0, 1.0, 2.0), (2.0, 2.0, 3.0)];
        assert!(lstsq_plane(&points).is_none());
    }

    #[test]
    fn test_dynamic_max_trials() {
        // everything an inlier: one trial is enough
        assert_eq!(dynamic_max_trials(100, 100, 3, 0.99), 1);
        // no inliers: never give up early
        assert_eq!(dynamic_max_trials(0, 100, 3, 0.99), u32::MAX);
        // fewer inliers need more trials
        let trials_many = dynamic_max_trials(80, 100, 3, 0.99);
        let trials_few = dynamic_max_trials(20, 100, 3, 0.99);
        assert!(trials_few > trials_many);
        assert!(trials_many >= 7 && trials_many <= 9);
    }

    #[test]
    fn test_single_plane_building() {
        let params = ModelParams::default();
        let mut rng = StdRng::seed_from_u64(1);
        let planes = ransac_building("toid_1", south_pitched_pixels(10, 6), &params, &mut rng);

        assert_eq!(planes.len(), 1);
        let plane = &planes[0];
        assert!(approx_eq!(f64, plane.slope, 30.0, epsilon = 0.01));
        assert!(approx_eq!(f64, plane.aspect, 180.0, epsilon = 0.01));
        assert_eq!(plane.inliers_xy.len(), 60);
        assert!(plane.sd < 1e-9);
        assert!(approx_eq!(f64, plane.aspect_circ_mean, 180.0, epsilon = 0.01));
        assert!(plane.thinness_ratio.unwrap() > 0.55);
        assert!(plane.cv_hull_ratio.unwrap() > 0.6);
    }

    #[test]
    fn test_gable_roof_has_two_planes() {
        let params = ModelParams::default();
        let mut rng = StdRng::seed_from_u64(7);
        let pixels = load_test_pixels("gable_roof.csv");
        assert_eq!(pixels.len(), 96);

        let mut planes = ransac_building("toid_gable", pixels, &params, &mut rng);
        assert_eq!(planes.len(), 2);

        planes.sort_by(|p1, p2| p1.aspect.partial_cmp(&p2.aspect).unwrap());
        assert!(approx_eq!(f64, planes[0].aspect, 90.0, epsilon = 0.1));
        assert!(approx_eq!(f64, planes[1].aspect, 270.0, epsilon = 0.1));
        for plane in &planes {
            assert!(approx_eq!(f64, plane.slope, 30.0, epsilon = 0.1));
            assert_eq!(plane.inliers_xy.len(), 48);
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let params = ModelParams::default();
        let pixels = load_test_pixels("gable_roof.csv");

        let mut rng1 = StdRng::seed_from_u64(99);
        let mut rng2 = StdRng::seed_from_u64(99);
        let planes1 = ransac_building("t", pixels.clone(), &params, &mut rng1);
        let planes2 = ransac_building("t", pixels, &params, &mut rng2);

        assert_eq!(planes1.len(), planes2.len());
        for (p1, p2) in planes1.iter().zip(planes2.iter()) {
            assert_eq!(p1.inliers_xy, p2.inliers_xy);
            assert!(approx_eq!(f64, p1.x_coef, p2.x_coef));
            assert!(approx_eq!(f64, p1.y_coef, p2.y_coef));
            assert!(approx_eq!(f64, p1.intercept, p2.intercept));
        }
    }

    #[test]
    fn test_too_few_pixels_yields_nothing() {
        let params = ModelParams::default();
        let mut rng = StdRng::seed_from_u64(1);
        let pixels: Vec<RansacPixel> = south_pitched_pixels(10, 6).into_iter().take(8).collect();
        assert!(ransac_building("t", pixels, &params, &mut rng).is_empty());
    }

    #[test]
    fn test_wall_slope_is_rejected() {
        // an 85 degree "roof" is a wall; no plane should be returned
        let slope_tan = 85.0f64.to_radians().tan();
        let mut pixels = vec![];
        for x in 0..10 {
            for y in 0..6 {
                let (xc, yc) = (x as f64 + 0.5, y as f64 + 0.5);
                pixels.push(RansacPixel {
                    x: xc,
                    y: yc,
                    elevation: slope_tan * yc,
                    aspect: 180.0,
                });
            }
        }
        let params = ModelParams::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(ransac_building("t", pixels, &params, &mut rng).is_empty());
    }
}
