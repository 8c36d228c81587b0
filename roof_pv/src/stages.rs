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
//! The four pipeline stages. Each shards the job into pages of buildings
//! (or roof planes), runs the pages on a worker pool with one store
//! connection per page, and is a no-op when its output already exists so
//! a failed job can be re-run from the top.
use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use geo::Area;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;

use pv_geom::util::format_duration;

use crate::aggregate::aggregate_panel_yields;
use crate::archetypes::ArchetypeLibrary;
use crate::lidar_check::{check_building, HeightAggregator};
use crate::panels::place_panels_on_roof;
use crate::params::ModelParams;
use crate::ransac::{ransac_building, RansacPixel};
use crate::roof_polygons::create_roof_polygons;
use crate::store::{yield_layers, StoreProvider, ASPECT, ELEVATION};
use crate::types::{Building, NotUsableReason, Panel};

pub const LIDAR_CHECK_PAGE_SIZE: u64 = 1000;
pub const RANSAC_PAGE_SIZE: u64 = 50;
pub const PANEL_PAGE_SIZE: u64 = 1000;
pub const AGGREGATE_PAGE_SIZE: u64 = 1000;

/// Cap on workers for the stages that mostly wait on the store
const IO_WORKER_CAP: usize = 100;

/// Use 3/4s of the available CPUs
pub fn worker_count(io_heavy: bool) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = (cpus * 3 / 4).max(1);
    if io_heavy {
        workers.min(IO_WORKER_CAP)
    } else {
        workers
    }
}

fn page_count(total: u64, page_size: u64) -> u64 {
    (total + page_size - 1) / page_size
}

/// Run the pages on a dedicated pool; the first failing page aborts the
/// stage
fn run_pages<F>(workers: usize, pages: u64, run_page: F) -> Result<()>
where
    F: Fn(u64) -> Result<()> + Send + Sync,
{
    if pages == 0 {
        return Ok(());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.min(pages as usize).max(1))
        .build()?;
    pool.install(|| (0..pages).into_par_iter().try_for_each(|page| run_page(page)))
}

/// Deterministic per-building RNG seed (FNV-1a over the toid, mixed with
/// the job seed) so results do not depend on page boundaries or worker
/// scheduling
fn building_seed(seed: u64, toid: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in toid.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash ^ seed
}

/// Stage 1: flag buildings whose LiDAR is missing or predates them, and
/// measure the height of the rest
pub fn check_lidar(provider: &dyn StoreProvider, params: &ModelParams) -> Result<()> {
    let mut store = provider.connect()?;
    if store.any_exclusions_recorded()? {
        info!("Already checked LiDAR coverage, skipping...");
        return Ok(());
    }

    let building_count = store.building_count()?;
    let pages = page_count(building_count, LIDAR_CHECK_PAGE_SIZE);
    info!(
        "{} pages of size {} buildings to check LiDAR coverage for",
        pages, LIDAR_CHECK_PAGE_SIZE
    );
    let start = Instant::now();

    run_pages(worker_count(true), pages, |page| {
        let mut store = provider.connect()?;
        let buildings = store.buildings_page(page, LIDAR_CHECK_PAGE_SIZE)?;
        let pixels_by_toid = store.lidar_pixels_for_buildings(page, LIDAR_CHECK_PAGE_SIZE)?;

        let mut results = vec![];
        for building in buildings {
            let pixels = pixels_by_toid
                .get(&building.toid)
                .map(|pixels| pixels.as_slice())
                .unwrap_or(&[]);
            let reason = check_building(&building, pixels, params.resolution_metres);
            let height = if reason.is_none() {
                HeightAggregator::from_pixels(pixels).height()
            } else {
                None
            };
            results.push((building.toid, reason, height));
        }
        store.write_lidar_check(&results)?;
        println!("Checked page {} of LiDAR", page);
        Ok(())
    })?;

    info!(
        "LiDAR coverage check for {} buildings took {}",
        building_count,
        format_duration(start.elapsed())
    );
    Ok(())
}

/// Stage 2: RANSAC plane detection plus roof polygon construction
pub fn detect_planes(provider: &dyn StoreProvider, params: &ModelParams) -> Result<()> {
    let mut store = provider.connect()?;
    store.prepare_outputs()?;
    if store.roof_plane_count()? > 0 {
        info!("Not detecting roof planes, already detected.");
        return Ok(());
    }

    // built once per process; read-only afterwards
    let archetypes = ArchetypeLibrary::build(params.panel_width_m, params.panel_height_m);

    let building_count = store.building_count()?;
    let pages = page_count(building_count, RANSAC_PAGE_SIZE);
    info!(
        "{} buildings, in {} batches to process",
        building_count, pages
    );
    let start = Instant::now();

    let layers = vec![ELEVATION.to_string(), ASPECT.to_string()];
    run_pages(worker_count(false), pages, |page| {
        let page_start = Instant::now();
        let mut store = provider.connect()?;
        let buildings = store.buildings_page(page, RANSAC_PAGE_SIZE)?;

        // buildings the LiDAR check threw out stay out
        let toids: Vec<String> = buildings
            .iter()
            .filter(|b| b.exclusion_reason.is_none())
            .map(|b| b.toid.clone())
            .collect();
        let pixels_by_toid =
            store.pixels_for_buildings(page, RANSAC_PAGE_SIZE, &layers, Some(&toids))?;

        let by_toid: HashMap<String, Building> = buildings
            .into_iter()
            .map(|b| (b.toid.clone(), b))
            .collect();

        let mut planes = vec![];
        for toid in &toids {
            let records = match pixels_by_toid.get(toid) {
                Some(records) => records,
                None => continue,
            };
            let pixels: Vec<RansacPixel> = records
                .iter()
                .map(|r| RansacPixel {
                    x: r.x,
                    y: r.y,
                    elevation: r.values[0],
                    aspect: r.values[1],
                })
                .collect();

            let mut rng = StdRng::seed_from_u64(building_seed(params.ransac_seed, toid));
            planes.extend(ransac_building(toid, pixels, params, &mut rng));
        }

        let roof_planes = create_roof_polygons(&by_toid, planes, params, &archetypes);
        store.write_roof_planes(&roof_planes)?;
        println!(
            "Page {} of {} buildings complete, took {}",
            page,
            RANSAC_PAGE_SIZE,
            format_duration(page_start.elapsed())
        );
        Ok(())
    })?;

    let mut store = provider.connect()?;
    store.mark_buildings_without_planes()?;
    info!(
        "RANSAC for {} roofs took {}",
        building_count,
        format_duration(start.elapsed())
    );
    Ok(())
}

/// Stage 3: pack panels onto the usable roof polygons
pub fn place_panels(provider: &dyn StoreProvider, params: &ModelParams) -> Result<()> {
    let mut store = provider.connect()?;
    store.prepare_outputs()?;
    if store.panel_count()? > 0 {
        info!("Not adding PV panels, panels already added");
        return Ok(());
    }

    let plane_count = store.roof_plane_count()?;
    let pages = page_count(plane_count, PANEL_PAGE_SIZE);
    info!(
        "{} roof polygons, in {} batches to process",
        plane_count, pages
    );
    let start = Instant::now();

    run_pages(worker_count(true), pages, |page| {
        let mut store = provider.connect()?;
        let planes = store.roof_planes_page(page, PANEL_PAGE_SIZE)?;

        let mut panels = vec![];
        let mut flipped_unusable = vec![];
        for plane in planes.iter().filter(|p| p.usable) {
            let rects = place_panels_on_roof(
                &plane.roof_geom,
                plane.aspect,
                plane.slope,
                plane.is_flat,
                params,
            );
            let footprint_total: f64 = rects.iter().map(|r| r.unsigned_area()).sum();
            if footprint_total < params.min_roof_area_m {
                flipped_unusable.push(plane.plane_id);
                continue;
            }
            let slope_cos = plane.slope.to_radians().cos();
            for geom in rects {
                let footprint = geom.unsigned_area();
                panels.push(Panel {
                    panel_id: 0,
                    plane_id: plane.plane_id,
                    toid: plane.toid.clone(),
                    geom,
                    footprint,
                    area: footprint / slope_cos,
                });
            }
        }

        store.write_panels(&panels)?;
        for plane_id in flipped_unusable {
            store.update_plane_usability(plane_id, false, Some(NotUsableReason::PanelArea))?;
        }
        println!("Finished panels page {}", page);
        Ok(())
    })?;

    let mut store = provider.connect()?;
    store.mark_buildings_all_planes_unusable()?;
    info!(
        "Panel placement for {} roof polygons took {}",
        plane_count,
        format_duration(start.elapsed())
    );
    Ok(())
}

/// Stage 4: convert the physics engine's per-pixel rasters into per-panel
/// yields
pub fn aggregate_yield(provider: &dyn StoreProvider, params: &ModelParams) -> Result<()> {
    let mut store = provider.connect()?;
    if store.panel_yield_count()? > 0 {
        info!("Not aggregating pixel results, already aggregated.");
        return Ok(());
    }

    let building_count = store.building_count()?;
    let pages = page_count(building_count, AGGREGATE_PAGE_SIZE);
    info!(
        "{} pages of size {} buildings to aggregate yields for",
        pages, AGGREGATE_PAGE_SIZE
    );
    let start = Instant::now();

    let layers = yield_layers(params.horizon_slices);
    run_pages(worker_count(true), pages, |page| {
        let page_start = Instant::now();
        let mut store = provider.connect()?;
        let panels_by_toid = store.panels_for_buildings(page, AGGREGATE_PAGE_SIZE)?;
        if panels_by_toid.is_empty() {
            return Ok(());
        }

        let toids: Vec<String> = panels_by_toid.keys().cloned().collect();
        let pixels_by_toid =
            store.pixels_for_buildings(page, AGGREGATE_PAGE_SIZE, &layers, Some(&toids))?;

        let mut yields = vec![];
        let mut dropped = vec![];
        for (toid, panels) in &panels_by_toid {
            let pixels = pixels_by_toid
                .get(toid)
                .map(|pixels| pixels.as_slice())
                .unwrap_or(&[]);
            let (panel_yields, no_coverage) = aggregate_panel_yields(pixels, panels, params);
            yields.extend(panel_yields);
            dropped.extend(no_coverage);
        }
        store.write_panel_yields(&yields)?;
        store.delete_panels(&dropped)?;
        println!(
            "Loaded page {} of yield results, took {}",
            page,
            format_duration(page_start.elapsed())
        );
        Ok(())
    })?;

    info!(
        "Yield aggregation took {}",
        format_duration(start.elapsed())
    );
    Ok(())
}

/// All four stages in order
pub fn run_model(provider: &dyn StoreProvider, params: &ModelParams) -> Result<()> {
    check_lidar(provider, params)?;
    detect_planes(provider, params)?;
    place_panels(provider, params)?;
    aggregate_yield(provider, params)?;
    Ok(())
}
