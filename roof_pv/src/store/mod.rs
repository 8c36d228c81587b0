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
use std::collections::HashMap;

use anyhow::Result;

use crate::types::{
    Building, ExclusionReason, LidarPixel, NotUsableReason, Panel, PanelYield, PixelRecord,
    RoofPlane,
};

#[cfg(test)]
pub mod mem;
pub mod pg;

/// Raster layer names, as produced by the upstream loader and physics
/// engine
pub const ELEVATION: &str = "elevation";
pub const ASPECT: &str = "aspect";
pub const KWH_YEAR: &str = "kwh_year";

/// Layer holding the Wh produced on a representative day of the 0-indexed
/// month
pub fn month_wh_layer(month: usize) -> String {
    format!("month_{:02}_wh", month + 1)
}

/// Layer holding the horizon elevation angle (radians) for the given slice
pub fn horizon_layer(slice: usize) -> String {
    format!("horizon_{:02}", slice)
}

/// The layers the yield aggregation reads, in the order the aggregator
/// expects them: annual kWh, 12 monthly Wh, N horizon slices
pub fn yield_layers(horizon_slices: usize) -> Vec<String> {
    let mut layers = vec![KWH_YEAR.to_string()];
    for month in 0..12 {
        layers.push(month_wh_layer(month));
    }
    for slice in 0..horizon_slices {
        layers.push(horizon_layer(slice));
    }
    layers
}

/// One connection to the external spatial store holding the job's
/// buildings, rasters and results. Building pages are windows over the
/// buildings ordered by toid.
pub trait JobStore: Send {
    /// Create the output tables if they do not exist yet
    fn prepare_outputs(&mut self) -> Result<()>;

    fn building_count(&mut self) -> Result<u64>;

    fn buildings_page(&mut self, page: u64, page_size: u64) -> Result<Vec<Building>>;

    /// Pixel centres and values for the named raster layers, for the
    /// buildings of a page (optionally narrowed to specific toids).
    /// Pixels with NODATA in any requested layer are dropped.
    fn pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
        layers: &[String],
        toids: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<PixelRecord>>>;

    /// Elevation pixels inside each building plus the exterior buffer
    /// ring, flagged accordingly
    fn lidar_pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<LidarPixel>>>;

    /// True if any building already has an exclusion reason recorded
    fn any_exclusions_recorded(&mut self) -> Result<bool>;

    /// Per-building LiDAR check verdicts: exclusion reason (or None) and
    /// measured height where the check passed
    fn write_lidar_check(
        &mut self,
        results: &[(String, Option<ExclusionReason>, Option<f64>)],
    ) -> Result<()>;

    fn roof_plane_count(&mut self) -> Result<u64>;

    fn write_roof_planes(&mut self, planes: &[RoofPlane]) -> Result<()>;

    /// Roof planes ordered by plane id, paged
    fn roof_planes_page(&mut self, page: u64, page_size: u64) -> Result<Vec<RoofPlane>>;

    /// Buildings with no detected planes and no exclusion reason get
    /// NO_ROOF_PLANES_DETECTED
    fn mark_buildings_without_planes(&mut self) -> Result<()>;

    fn update_plane_usability(
        &mut self,
        plane_id: i64,
        usable: bool,
        reason: Option<NotUsableReason>,
    ) -> Result<()>;

    /// Buildings with roof planes but no usable ones get
    /// ALL_ROOF_PLANES_UNUSABLE
    fn mark_buildings_all_planes_unusable(&mut self) -> Result<()>;

    fn panel_count(&mut self) -> Result<u64>;

    fn write_panels(&mut self, panels: &[Panel]) -> Result<()>;

    /// Panels on usable roof planes, grouped by toid, for the buildings of
    /// a page
    fn panels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<Panel>>>;

    /// Number of panels that already have yield figures
    fn panel_yield_count(&mut self) -> Result<u64>;

    fn write_panel_yields(&mut self, yields: &[PanelYield]) -> Result<()>;

    /// Remove panels that intersected no pixels
    fn delete_panels(&mut self, panel_ids: &[i64]) -> Result<()>;
}

/// Hands out store connections; every worker gets its own
pub trait StoreProvider: Sync {
    fn connect(&self) -> Result<Box<dyn JobStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_names() {
        assert_eq!(month_wh_layer(0), "month_01_wh");
        assert_eq!(month_wh_layer(11), "month_12_wh");
        assert_eq!(horizon_layer(0), "horizon_00");
        assert_eq!(horizon_layer(35), "horizon_35");
    }

    #[test]
    fn test_yield_layers_order() {
        let layers = yield_layers(4);
        assert_eq!(layers.len(), 17);
        assert_eq!(layers[0], "kwh_year");
        assert_eq!(layers[1], "month_01_wh");
        assert_eq!(layers[12], "month_12_wh");
        assert_eq!(layers[13], "horizon_00");
        assert_eq!(layers[16], "horizon_03");
    }
}
