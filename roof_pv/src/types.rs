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
use geo::Polygon;

/// Why a building was excluded from the model entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    NoLidarCoverage,
    OutdatedLidarCoverage,
    NoRoofPlanesDetected,
    AllRoofPlanesUnusable,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::NoLidarCoverage => "NO_LIDAR_COVERAGE",
            ExclusionReason::OutdatedLidarCoverage => "OUTDATED_LIDAR_COVERAGE",
            ExclusionReason::NoRoofPlanesDetected => "NO_ROOF_PLANES_DETECTED",
            ExclusionReason::AllRoofPlanesUnusable => "ALL_ROOF_PLANES_UNUSABLE",
        }
    }

    pub fn parse(text: &str) -> Option<ExclusionReason> {
        match text {
            "NO_LIDAR_COVERAGE" => Some(ExclusionReason::NoLidarCoverage),
            "OUTDATED_LIDAR_COVERAGE" => Some(ExclusionReason::OutdatedLidarCoverage),
            "NO_ROOF_PLANES_DETECTED" => Some(ExclusionReason::NoRoofPlanesDetected),
            "ALL_ROOF_PLANES_UNUSABLE" => Some(ExclusionReason::AllRoofPlanesUnusable),
            _ => None,
        }
    }
}

/// Why a detected roof plane cannot take panels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotUsableReason {
    /// Slope above `max_roof_slope_degrees`
    Slope,
    /// Aspect within `min_roof_degrees_from_north` of north
    Aspect,
    /// Polygon smaller than `min_roof_area_m`
    Area,
    /// Panels packed onto the polygon cover less than `min_roof_area_m`
    PanelArea,
}

impl NotUsableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotUsableReason::Slope => "slope",
            NotUsableReason::Aspect => "aspect",
            NotUsableReason::Area => "area",
            NotUsableReason::PanelArea => "panel_area",
        }
    }

    pub fn parse(text: &str) -> Option<NotUsableReason> {
        match text {
            "slope" => Some(NotUsableReason::Slope),
            "aspect" => Some(NotUsableReason::Aspect),
            "area" => Some(NotUsableReason::Area),
            "panel_area" => Some(NotUsableReason::PanelArea),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Building {
    pub toid: String,
    pub geom: Polygon<f64>,
    pub exclusion_reason: Option<ExclusionReason>,
    pub height: Option<f64>,
}

/// One LiDAR elevation pixel around a building, used by the quality check.
/// Exactly one of the two flags is set.
#[derive(Debug, Clone)]
pub struct LidarPixel {
    pub x: f64,
    pub y: f64,
    pub elevation: f64,
    pub within_building: bool,
    pub without_building: bool,
}

/// A pixel centre with one value per requested raster layer, in request
/// order
#[derive(Debug, Clone)]
pub struct PixelRecord {
    pub x: f64,
    pub y: f64,
    pub values: Vec<f64>,
}

/// A plane fit to a building's pixels by RANSAC, before the roof polygon
/// has been built for it
#[derive(Debug, Clone)]
pub struct DetectedPlane {
    pub toid: String,
    /// z = x_coef * x + y_coef * y + intercept
    pub x_coef: f64,
    pub y_coef: f64,
    pub intercept: f64,
    /// Degrees from horizontal
    pub slope: f64,
    /// Degrees clockwise from north
    pub aspect: f64,
    /// Standard deviation of the inlier residuals
    pub sd: f64,
    pub aspect_circ_mean: f64,
    pub aspect_circ_sd: f64,
    /// Shape scores of the inlier footprint; None when the group checks
    /// were disabled for the building
    pub thinness_ratio: Option<f64>,
    pub cv_hull_ratio: Option<f64>,
    pub inliers_xy: Vec<(f64, f64)>,
}

/// A roof plane with its trimmed polygon, ready to be stored
#[derive(Debug, Clone)]
pub struct RoofPlane {
    /// Assigned by the store on write
    pub plane_id: i64,
    pub toid: String,
    pub roof_geom: Polygon<f64>,
    pub x_coef: f64,
    pub y_coef: f64,
    pub intercept: f64,
    pub slope: f64,
    pub aspect: f64,
    /// Aspect before flat-roof override and azimuth alignment
    pub aspect_raw: f64,
    pub sd: f64,
    pub is_flat: bool,
    pub usable: bool,
    pub not_usable_reason: Option<NotUsableReason>,
    pub easting: f64,
    pub northing: f64,
    /// Bird's-eye area of the roof polygon
    pub raw_footprint: f64,
    /// Slanted area: footprint / cos(slope)
    pub raw_area: f64,
    pub archetype: Option<String>,
    pub aspect_circ_mean: f64,
    pub aspect_circ_sd: f64,
    pub thinness_ratio: Option<f64>,
    pub cv_hull_ratio: Option<f64>,
    pub inliers_xy: Vec<(f64, f64)>,
}

/// One placed PV panel
#[derive(Debug, Clone)]
pub struct Panel {
    /// Assigned by the store on write
    pub panel_id: i64,
    pub plane_id: i64,
    pub toid: String,
    pub geom: Polygon<f64>,
    /// Bird's-eye area
    pub footprint: f64,
    /// Slanted area: footprint / cos(slope)
    pub area: f64,
}

/// Energy yield figures for one panel
#[derive(Debug, Clone)]
pub struct PanelYield {
    pub panel_id: i64,
    pub kwh_year: f64,
    pub kwh_month: [f64; 12],
    pub kwp: f64,
    /// Radians, one entry per horizon slice
    pub horizon: Vec<f64>,
}
