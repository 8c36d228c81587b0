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
//! In-memory job store used by the tests. Buildings are kept ordered by
//! toid so paging behaves like the real store.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use geo::Polygon;

use crate::params::constants::LIDAR_NODATA;
use crate::store::{JobStore, StoreProvider};
use crate::types::{
    Building, ExclusionReason, LidarPixel, NotUsableReason, Panel, PanelYield, PixelRecord,
    RoofPlane,
};

#[derive(Default)]
struct MemInner {
    buildings: BTreeMap<String, Building>,
    lidar_pixels: HashMap<String, Vec<LidarPixel>>,
    pixels: HashMap<String, Vec<MemPixel>>,
    planes: Vec<RoofPlane>,
    panels: Vec<Panel>,
    yields: HashMap<i64, PanelYield>,
    next_plane_id: i64,
    next_panel_id: i64,
}

#[derive(Clone)]
pub struct MemPixel {
    pub x: f64,
    pub y: f64,
    pub values: HashMap<String, f64>,
}

impl MemInner {
    fn page_toids(&self, page: u64, page_size: u64) -> Vec<String> {
        self.buildings
            .keys()
            .skip((page * page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect()
    }
}

/// Shared fixture handle; `connect` clones hand out the same underlying
/// store
#[derive(Clone, Default)]
pub struct MemStoreProvider {
    inner: Arc<Mutex<MemInner>>,
}

impl MemStoreProvider {
    pub fn new() -> MemStoreProvider {
        MemStoreProvider::default()
    }

    pub fn add_building(&self, toid: &str, geom: Polygon<f64>) {
        let mut inner = self.inner.lock().unwrap();
        inner.buildings.insert(
            toid.to_string(),
            Building {
                toid: toid.to_string(),
                geom,
                exclusion_reason: None,
                height: None,
            },
        );
    }

    pub fn add_lidar_pixel(&self, toid: &str, x: f64, y: f64, elevation: f64, within: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .lidar_pixels
            .entry(toid.to_string())
            .or_default()
            .push(LidarPixel {
                x,
                y,
                elevation,
                within_building: within,
                without_building: !within,
            });
    }

    pub fn add_pixel(&self, toid: &str, x: f64, y: f64, values: &[(&str, f64)]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .pixels
            .entry(toid.to_string())
            .or_default()
            .push(MemPixel {
                x,
                y,
                values: values
                    .iter()
                    .map(|(layer, v)| (layer.to_string(), *v))
                    .collect(),
            });
    }

    pub fn building(&self, toid: &str) -> Option<Building> {
        self.inner.lock().unwrap().buildings.get(toid).cloned()
    }

    pub fn planes(&self) -> Vec<RoofPlane> {
        self.inner.lock().unwrap().planes.clone()
    }

    pub fn panels(&self) -> Vec<Panel> {
        self.inner.lock().unwrap().panels.clone()
    }

    pub fn yields(&self) -> Vec<PanelYield> {
        let inner = self.inner.lock().unwrap();
        let mut yields: Vec<PanelYield> = inner.yields.values().cloned().collect();
        yields.sort_by_key(|y| y.panel_id);
        yields
    }

    /// Insert a roof plane directly, for tests of the later stages
    pub fn seed_plane(&self, plane: RoofPlane) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_plane_id += 1;
        let mut plane = plane;
        plane.plane_id = inner.next_plane_id;
        inner.planes.push(plane);
    }
}

impl StoreProvider for MemStoreProvider {
    fn connect(&self) -> Result<Box<dyn JobStore>> {
        Ok(Box::new(MemStore {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemStore {
    inner: Arc<Mutex<MemInner>>,
}

impl JobStore for MemStore {
    fn prepare_outputs(&mut self) -> Result<()> {
        Ok(())
    }

    fn building_count(&mut self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().buildings.len() as u64)
    }

    fn buildings_page(&mut self, page: u64, page_size: u64) -> Result<Vec<Building>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .buildings
            .values()
            .skip((page * page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    fn pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
        layers: &[String],
        toids: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<PixelRecord>>> {
        let inner = self.inner.lock().unwrap();
        let mut by_toid = HashMap::new();
        for toid in inner.page_toids(page, page_size) {
            if let Some(filter) = toids {
                if !filter.contains(&toid) {
                    continue;
                }
            }
            let pixels = match inner.pixels.get(&toid) {
                Some(pixels) => pixels,
                None => continue,
            };
            let mut records = vec![];
            for pixel in pixels {
                let values: Vec<f64> = layers
                    .iter()
                    .filter_map(|layer| pixel.values.get(layer).copied())
                    .filter(|v| (v - LIDAR_NODATA).abs() > 1e-6)
                    .collect();
                if values.len() == layers.len() {
                    records.push(PixelRecord {
                        x: pixel.x,
                        y: pixel.y,
                        values,
                    });
                }
            }
            if !records.is_empty() {
                by_toid.insert(toid, records);
            }
        }
        Ok(by_toid)
    }

    fn lidar_pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<LidarPixel>>> {
        let inner = self.inner.lock().unwrap();
        let mut by_toid = HashMap::new();
        for toid in inner.page_toids(page, page_size) {
            if let Some(pixels) = inner.lidar_pixels.get(&toid) {
                by_toid.insert(toid, pixels.clone());
            }
        }
        Ok(by_toid)
    }

    fn any_exclusions_recorded(&mut self) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .buildings
            .values()
            .any(|b| b.exclusion_reason.is_some()))
    }

    fn write_lidar_check(
        &mut self,
        results: &[(String, Option<ExclusionReason>, Option<f64>)],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for (toid, reason, height) in results {
            if let Some(building) = inner.buildings.get_mut(toid) {
                building.exclusion_reason = *reason;
                building.height = *height;
            }
        }
        Ok(())
    }

    fn roof_plane_count(&mut self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().planes.len() as u64)
    }

    fn write_roof_planes(&mut self, planes: &[RoofPlane]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for plane in planes {
            inner.next_plane_id += 1;
            let mut plane = plane.clone();
            plane.plane_id = inner.next_plane_id;
            inner.planes.push(plane);
        }
        Ok(())
    }

    fn roof_planes_page(&mut self, page: u64, page_size: u64) -> Result<Vec<RoofPlane>> {
        let inner = self.inner.lock().unwrap();
        let mut planes = inner.planes.clone();
        planes.sort_by_key(|p| p.plane_id);
        Ok(planes
            .into_iter()
            .skip((page * page_size) as usize)
            .take(page_size as usize)
            .collect())
    }

    fn mark_buildings_without_planes(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let with_planes: Vec<String> = inner.planes.iter().map(|p| p.toid.clone()).collect();
        for building in inner.buildings.values_mut() {
            if building.exclusion_reason.is_none() && !with_planes.contains(&building.toid) {
                building.exclusion_reason = Some(ExclusionReason::NoRoofPlanesDetected);
            }
        }
        Ok(())
    }

    fn update_plane_usability(
        &mut self,
        plane_id: i64,
        usable: bool,
        reason: Option<NotUsableReason>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for plane in inner.planes.iter_mut() {
            if plane.plane_id == plane_id {
                plane.usable = usable;
                plane.not_usable_reason = reason;
            }
        }
        Ok(())
    }

    fn mark_buildings_all_planes_unusable(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut has_planes: HashMap<String, bool> = HashMap::new();
        for plane in &inner.planes {
            let usable_seen = has_planes.entry(plane.toid.clone()).or_insert(false);
            *usable_seen = *usable_seen || plane.usable;
        }
        for building in inner.buildings.values_mut() {
            if building.exclusion_reason.is_none() {
                if let Some(false) = has_planes.get(&building.toid) {
                    building.exclusion_reason = Some(ExclusionReason::AllRoofPlanesUnusable);
                }
            }
        }
        Ok(())
    }

    fn panel_count(&mut self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().panels.len() as u64)
    }

    fn write_panels(&mut self, panels: &[Panel]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for panel in panels {
            inner.next_panel_id += 1;
            let mut panel = panel.clone();
            panel.panel_id = inner.next_panel_id;
            inner.panels.push(panel);
        }
        Ok(())
    }

    fn panels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<Panel>>> {
        let inner = self.inner.lock().unwrap();
        let usable_planes: Vec<i64> = inner
            .planes
            .iter()
            .filter(|p| p.usable)
            .map(|p| p.plane_id)
            .collect();
        let mut by_toid: HashMap<String, Vec<Panel>> = HashMap::new();
        let toids = inner.page_toids(page, page_size);
        for panel in &inner.panels {
            if toids.contains(&panel.toid) && usable_planes.contains(&panel.plane_id) {
                by_toid
                    .entry(panel.toid.clone())
                    .or_default()
                    .push(panel.clone());
            }
        }
        Ok(by_toid)
    }

    fn panel_yield_count(&mut self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().yields.len() as u64)
    }

    fn write_panel_yields(&mut self, yields: &[PanelYield]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for y in yields {
            inner.yields.insert(y.panel_id, y.clone());
        }
        Ok(())
    }

    fn delete_panels(&mut self, panel_ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.panels.retain(|p| !panel_ids.contains(&p.panel_id));
        for id in panel_ids {
            inner.yields.remove(id);
        }
        Ok(())
    }
}
