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
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub mod constants {
    //! Fixed thresholds of the model. These are deliberately not part of
    //! `ModelParams`: they were tuned once against survey data and jobs
    //! should not vary them.

    /// A roof is considered to be flat if its slope is less than this. Not
    /// to be confused with the model parameter `flat_roof_degrees`, which is
    /// the slope at which panels are mounted on flat roofs.
    pub const FLAT_ROOF_DEGREES_THRESHOLD: f64 = 5.0;

    /// If a roof plane has an aspect which is closer than this value to the
    /// azimuth of one of the facings of a building, re-align the roof plane
    /// to that azimuth.
    pub const AZIMUTH_ALIGNMENT_THRESHOLD: f64 = 15.0;

    /// Same as above, but for flat roofs:
    pub const FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD: f64 = 45.0;

    /// Aspect assigned to flat roofs before azimuth alignment; rows of
    /// panels on flat mounts face south.
    pub const SOUTH_DEGREES: f64 = 180.0;

    /// PVGIS recommend this factor is applied to cover losses due to
    /// cabling, inverter, and degradation due to age.
    pub const SYSTEM_LOSS: f64 = 0.14;

    /// Sun altitude used to space out rows of panels on flat roofs so the
    /// forward row does not shadow the rear.
    pub const FLAT_ROOF_SUN_ALTITUDE_DEGREES: f64 = 15.0;

    /// Area in m2 of a building to consider large for RANSAC purposes
    /// (which has the effect of allowing planes that cover multiple
    /// discontinuous groups of pixels, as large buildings often have
    /// separate roof areas that are on the same plane):
    pub const RANSAC_LARGE_BUILDING: f64 = 1000.0;

    pub const RANSAC_BASE_MAX_TRIALS: u32 = 2000;
    /// Don't go over this number of trials, whatever size the building is:
    pub const RANSAC_ABS_MAX_TRIALS: u32 = 3000;

    /// Sentinel for missing raster values; pixels holding it never enter
    /// the model.
    pub const LIDAR_NODATA: f64 = -9999.0;
}

/// Per-job model parameters. Everything here can be overridden from a TOML
/// file; the defaults are the standard model run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Number of horizon directions produced by the physics engine
    pub horizon_slices: usize,
    /// Slope assigned to flat roofs, as panels are mounted at a tilt
    pub flat_roof_degrees: f64,
    /// Usability cap on slope
    pub max_roof_slope_degrees: f64,
    /// Usability floor on polygon area and packed-panel area
    pub min_roof_area_m: f64,
    /// Usability exclusion band around north
    pub min_roof_degrees_from_north: f64,
    /// Buildings at least this large use `min_dist_to_edge_large_m`
    pub large_building_threshold: f64,
    pub min_dist_to_edge_m: f64,
    pub min_dist_to_edge_large_m: f64,
    pub panel_width_m: f64,
    pub panel_height_m: f64,
    pub panel_spacing_m: f64,
    /// kWp per m2 of slanted panel area
    pub peak_power_per_m2: f64,
    /// Raster cell size in the job CRS
    pub resolution_metres: f64,
    /// Seed for the RANSAC RNG; detection is deterministic given the seed
    /// and the input pixels
    pub ransac_seed: u64,
}

impl Default for ModelParams {
    fn default() -> ModelParams {
        ModelParams {
            horizon_slices: 36,
            flat_roof_degrees: 10.0,
            max_roof_slope_degrees: 80.0,
            min_roof_area_m: 8.0,
            min_roof_degrees_from_north: 45.0,
            large_building_threshold: 200.0,
            min_dist_to_edge_m: 0.3,
            min_dist_to_edge_large_m: 1.0,
            panel_width_m: 0.99,
            panel_height_m: 1.64,
            panel_spacing_m: 0.01,
            peak_power_per_m2: 0.2,
            resolution_metres: 1.0,
            ransac_seed: 42,
        }
    }
}

impl ModelParams {
    /// Defaults, optionally overridden from a TOML file, validated
    pub fn load(path: Option<&Path>) -> Result<ModelParams> {
        let params = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading model params from {:?}", path))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing model params from {:?}", path))?
            }
            None => ModelParams::default(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon_slices < 8 || self.horizon_slices > 64 {
            bail!(
                "horizon slices must be between 8 and 64, was {}",
                self.horizon_slices
            );
        }
        // downstream consumers assume the slices divide the compass evenly
        if 360 % self.horizon_slices != 0 {
            bail!(
                "horizon_slices must divide 360 evenly, was {}",
                self.horizon_slices
            );
        }
        if self.max_roof_slope_degrees < 0.0 || self.max_roof_slope_degrees > 90.0 {
            bail!(
                "max_roof_slope_degrees must be between 0 and 90, was {}",
                self.max_roof_slope_degrees
            );
        }
        if self.min_roof_area_m < 0.0 {
            bail!(
                "min_roof_area_m must be greater than or equal to 0, was {}",
                self.min_roof_area_m
            );
        }
        if self.min_roof_degrees_from_north < 0.0 || self.min_roof_degrees_from_north > 180.0 {
            bail!(
                "min_roof_degrees_from_north must be between 0 and 180, was {}",
                self.min_roof_degrees_from_north
            );
        }
        if self.flat_roof_degrees < 0.0 || self.flat_roof_degrees > 90.0 {
            bail!(
                "flat_roof_degrees must be between 0 and 90, was {}",
                self.flat_roof_degrees
            );
        }
        if self.peak_power_per_m2 < 0.0 {
            bail!(
                "peak_power_per_m2 must be greater than or equal to 0, was {}",
                self.peak_power_per_m2
            );
        }
        if self.panel_width_m <= 0.0 || self.panel_height_m <= 0.0 {
            bail!("panel dimensions must be greater than 0");
        }
        if self.panel_spacing_m < 0.0 {
            bail!(
                "panel_spacing_m must be greater than or equal to 0, was {}",
                self.panel_spacing_m
            );
        }
        if self.min_dist_to_edge_m < 0.0 || self.min_dist_to_edge_large_m < 0.0 {
            bail!("min_dist_to_edge must be greater than or equal to 0");
        }
        if self.resolution_metres <= 0.0 {
            bail!(
                "resolution_metres must be greater than 0, was {}",
                self.resolution_metres
            );
        }
        Ok(())
    }

    /// Minimum inliers for a roof plane: 8 at 1m resolution, scaled with
    /// the pixel count of an equivalent area at other resolutions
    pub fn min_points_per_plane(&self) -> usize {
        (8.0 / self.resolution_metres).round() as usize
    }
}
