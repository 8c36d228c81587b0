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
//! Postgres-backed job store. One schema per job; geometries cross the
//! boundary as WKT text, inlier coordinate lists as bincode blobs.
use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use geo::Polygon;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use wkt::{ToWkt, TryFromWkt};

use crate::params::constants::LIDAR_NODATA;
use crate::store::{JobStore, StoreProvider};
use crate::types::{
    Building, ExclusionReason, LidarPixel, NotUsableReason, Panel, PanelYield, PixelRecord,
    RoofPlane,
};

pub struct PgStoreProvider {
    conn_str: String,
    job_id: i32,
}

impl PgStoreProvider {
    pub fn new(conn_str: &str, job_id: i32) -> PgStoreProvider {
        PgStoreProvider {
            conn_str: conn_str.to_string(),
            job_id,
        }
    }
}

impl StoreProvider for PgStoreProvider {
    fn connect(&self) -> Result<Box<dyn JobStore>> {
        let client = Client::connect(&self.conn_str, NoTls)
            .with_context(|| "connecting to the job store")?;
        Ok(Box::new(PgStore {
            client,
            schema: schema(self.job_id),
        }))
    }
}

/// The schema holding a job's tables
pub fn schema(job_id: i32) -> String {
    format!("solar_pv_job_{}", job_id)
}

pub struct PgStore {
    client: Client,
    schema: String,
}

impl PgStore {
    fn count(&mut self, sql: &str) -> Result<u64> {
        let row = self.client.query_one(sql, &[])?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    fn query(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        Ok(self.client.query(sql, params)?)
    }

    fn execute(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        Ok(self.client.execute(sql, params)?)
    }

    fn parse_polygon(text: &str) -> Result<Polygon<f64>> {
        Polygon::try_from_wkt_str(text).map_err(|e| anyhow!("bad polygon WKT: {}", e))
    }
}

impl JobStore for PgStore {
    fn prepare_outputs(&mut self) -> Result<()> {
        self.client.batch_execute(&format!(
            "
            CREATE TABLE IF NOT EXISTS {schema}.roof_polygons (
                roof_plane_id BIGSERIAL PRIMARY KEY,
                toid TEXT NOT NULL,
                roof_geom TEXT NOT NULL,
                x_coef DOUBLE PRECISION NOT NULL,
                y_coef DOUBLE PRECISION NOT NULL,
                intercept DOUBLE PRECISION NOT NULL,
                slope DOUBLE PRECISION NOT NULL,
                aspect DOUBLE PRECISION NOT NULL,
                aspect_raw DOUBLE PRECISION NOT NULL,
                sd DOUBLE PRECISION NOT NULL,
                is_flat BOOLEAN NOT NULL,
                usable BOOLEAN NOT NULL,
                not_usable_reason TEXT,
                easting DOUBLE PRECISION NOT NULL,
                northing DOUBLE PRECISION NOT NULL,
                raw_footprint DOUBLE PRECISION NOT NULL,
                raw_area DOUBLE PRECISION NOT NULL,
                archetype TEXT,
                aspect_circ_mean DOUBLE PRECISION NOT NULL,
                aspect_circ_sd DOUBLE PRECISION NOT NULL,
                thinness_ratio DOUBLE PRECISION,
                cv_hull_ratio DOUBLE PRECISION,
                inliers_xy BYTEA NOT NULL
            );
            CREATE INDEX IF NOT EXISTS roof_polygons_toid ON {schema}.roof_polygons (toid);

            CREATE TABLE IF NOT EXISTS {schema}.panels (
                panel_id BIGSERIAL PRIMARY KEY,
                roof_plane_id BIGINT NOT NULL,
                toid TEXT NOT NULL,
                panel_geom TEXT NOT NULL,
                footprint DOUBLE PRECISION NOT NULL,
                area DOUBLE PRECISION NOT NULL,
                kwh_m01 DOUBLE PRECISION, kwh_m02 DOUBLE PRECISION, kwh_m03 DOUBLE PRECISION,
                kwh_m04 DOUBLE PRECISION, kwh_m05 DOUBLE PRECISION, kwh_m06 DOUBLE PRECISION,
                kwh_m07 DOUBLE PRECISION, kwh_m08 DOUBLE PRECISION, kwh_m09 DOUBLE PRECISION,
                kwh_m10 DOUBLE PRECISION, kwh_m11 DOUBLE PRECISION, kwh_m12 DOUBLE PRECISION,
                kwh_year DOUBLE PRECISION,
                kwp DOUBLE PRECISION,
                horizon DOUBLE PRECISION[]
            );
            CREATE INDEX IF NOT EXISTS panels_toid ON {schema}.panels (toid);
            ",
            schema = self.schema
        ))?;
        Ok(())
    }

    fn building_count(&mut self) -> Result<u64> {
        self.count(&format!("SELECT COUNT(*) FROM {}.buildings", self.schema))
    }

    fn buildings_page(&mut self, page: u64, page_size: u64) -> Result<Vec<Building>> {
        let rows = self.query(
            &format!(
                "
                SELECT toid, geom, exclusion_reason, height
                FROM {}.buildings
                ORDER BY toid
                OFFSET $1 LIMIT $2
                ",
                self.schema
            ),
            &[&((page * page_size) as i64), &(page_size as i64)],
        )?;
        let mut buildings = vec![];
        for row in rows {
            let geom_text: String = row.get(1);
            let reason: Option<String> = row.get(2);
            buildings.push(Building {
                toid: row.get(0),
                geom: PgStore::parse_polygon(&geom_text)?,
                exclusion_reason: reason.as_deref().and_then(ExclusionReason::parse),
                height: row.get(3),
            });
        }
        Ok(buildings)
    }

    fn pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
        layers: &[String],
        toids: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<PixelRecord>>> {
        let toid_filter: Vec<String> = toids.map(|t| t.to_vec()).unwrap_or_default();

        // read each layer separately and merge on the pixel centre; a pixel
        // survives only if every requested layer has a value for it
        let mut merged: HashMap<(String, i64, i64), (f64, f64, Vec<Option<f64>>)> = HashMap::new();
        for (layer_idx, layer) in layers.iter().enumerate() {
            let rows = self.query(
                &format!(
                    "
                    WITH building_page AS (
                        SELECT toid FROM {schema}.buildings
                        ORDER BY toid
                        OFFSET $1 LIMIT $2
                    )
                    SELECT p.toid, p.x, p.y, p.val
                    FROM building_page b
                    JOIN {schema}.{layer} p ON p.toid = b.toid
                    WHERE cardinality($3::text[]) = 0 OR p.toid = ANY($3)
                    ",
                    schema = self.schema,
                    layer = layer
                ),
                &[&((page * page_size) as i64), &(page_size as i64), &toid_filter],
            )?;
            for row in rows {
                let toid: String = row.get(0);
                let x: f64 = row.get(1);
                let y: f64 = row.get(2);
                let val: f64 = row.get(3);
                if (val - LIDAR_NODATA).abs() < 1e-6 || !val.is_finite() {
                    continue;
                }
                let key = (toid, (x * 1000.0).round() as i64, (y * 1000.0).round() as i64);
                let entry = merged
                    .entry(key)
                    .or_insert_with(|| (x, y, vec![None; layers.len()]));
                entry.2[layer_idx] = Some(val);
            }
        }

        let mut by_toid: HashMap<String, Vec<PixelRecord>> = HashMap::new();
        for ((toid, _, _), (x, y, values)) in merged {
            if values.iter().all(|v| v.is_some()) {
                by_toid.entry(toid).or_default().push(PixelRecord {
                    x,
                    y,
                    values: values.into_iter().map(|v| v.unwrap()).collect(),
                });
            }
        }
        Ok(by_toid)
    }

    fn lidar_pixels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<LidarPixel>>> {
        let rows = self.query(
            &format!(
                "
                WITH building_page AS (
                    SELECT toid FROM {schema}.buildings
                    ORDER BY toid
                    OFFSET $1 LIMIT $2
                )
                SELECT p.toid, p.x, p.y, p.elevation, p.within_building, p.without_building
                FROM building_page b
                JOIN {schema}.lidar_pixels p ON p.toid = b.toid
                WHERE p.elevation != $3
                ",
                schema = self.schema
            ),
            &[&((page * page_size) as i64), &(page_size as i64), &LIDAR_NODATA],
        )?;
        let mut by_toid: HashMap<String, Vec<LidarPixel>> = HashMap::new();
        for row in rows {
            let toid: String = row.get(0);
            by_toid.entry(toid).or_default().push(LidarPixel {
                x: row.get(1),
                y: row.get(2),
                elevation: row.get(3),
                within_building: row.get(4),
                without_building: row.get(5),
            });
        }
        Ok(by_toid)
    }

    fn any_exclusions_recorded(&mut self) -> Result<bool> {
        let count = self.count(&format!(
            "SELECT COUNT(*) FROM {}.buildings WHERE exclusion_reason IS NOT NULL",
            self.schema
        ))?;
        Ok(count > 0)
    }

    fn write_lidar_check(
        &mut self,
        results: &[(String, Option<ExclusionReason>, Option<f64>)],
    ) -> Result<()> {
        let statement = format!(
            "UPDATE {}.buildings SET exclusion_reason = $2, height = $3 WHERE toid = $1",
            self.schema
        );
        for (toid, reason, height) in results {
            let reason_text = reason.map(|r| r.as_str());
            self.execute(&statement, &[toid, &reason_text, height])?;
        }
        Ok(())
    }

    fn roof_plane_count(&mut self) -> Result<u64> {
        self.count(&format!(
            "SELECT COUNT(*) FROM {}.roof_polygons",
            self.schema
        ))
    }

    fn write_roof_planes(&mut self, planes: &[RoofPlane]) -> Result<()> {
        let statement = format!(
            "
            INSERT INTO {}.roof_polygons (
                toid, roof_geom, x_coef, y_coef, intercept, slope, aspect, aspect_raw,
                sd, is_flat, usable, not_usable_reason, easting, northing,
                raw_footprint, raw_area, archetype, aspect_circ_mean, aspect_circ_sd,
                thinness_ratio, cv_hull_ratio, inliers_xy
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22)
            ",
            self.schema
        );
        for plane in planes {
            let geom_text = plane.roof_geom.wkt_string();
            let reason_text = plane.not_usable_reason.map(|r| r.as_str());
            let inliers = bincode::serialize(&plane.inliers_xy)?;
            self.execute(
                &statement,
                &[
                    &plane.toid,
                    &geom_text,
                    &plane.x_coef,
                    &plane.y_coef,
                    &plane.intercept,
                    &plane.slope,
                    &plane.aspect,
                    &plane.aspect_raw,
                    &plane.sd,
                    &plane.is_flat,
                    &plane.usable,
                    &reason_text,
                    &plane.easting,
                    &plane.northing,
                    &plane.raw_footprint,
                    &plane.raw_area,
                    &plane.archetype,
                    &plane.aspect_circ_mean,
                    &plane.aspect_circ_sd,
                    &plane.thinness_ratio,
                    &plane.cv_hull_ratio,
                    &inliers,
                ],
            )?;
        }
        Ok(())
    }

    fn roof_planes_page(&mut self, page: u64, page_size: u64) -> Result<Vec<RoofPlane>> {
        let rows = self.query(
            &format!(
                "
                SELECT roof_plane_id, toid, roof_geom, x_coef, y_coef, intercept,
                       slope, aspect, aspect_raw, sd, is_flat, usable, not_usable_reason,
                       easting, northing, raw_footprint, raw_area, archetype,
                       aspect_circ_mean, aspect_circ_sd, thinness_ratio, cv_hull_ratio,
                       inliers_xy
                FROM {}.roof_polygons
                ORDER BY roof_plane_id
                OFFSET $1 LIMIT $2
                ",
                self.schema
            ),
            &[&((page * page_size) as i64), &(page_size as i64)],
        )?;
        let mut planes = vec![];
        for row in rows {
            let geom_text: String = row.get(2);
            let reason: Option<String> = row.get(12);
            let inliers: Vec<u8> = row.get(22);
            planes.push(RoofPlane {
                plane_id: row.get(0),
                toid: row.get(1),
                roof_geom: PgStore::parse_polygon(&geom_text)?,
                x_coef: row.get(3),
                y_coef: row.get(4),
                intercept: row.get(5),
                slope: row.get(6),
                aspect: row.get(7),
                aspect_raw: row.get(8),
                sd: row.get(9),
                is_flat: row.get(10),
                usable: row.get(11),
                not_usable_reason: reason.as_deref().and_then(NotUsableReason::parse),
                easting: row.get(13),
                northing: row.get(14),
                raw_footprint: row.get(15),
                raw_area: row.get(16),
                archetype: row.get(17),
                aspect_circ_mean: row.get(18),
                aspect_circ_sd: row.get(19),
                thinness_ratio: row.get(20),
                cv_hull_ratio: row.get(21),
                inliers_xy: bincode::deserialize(&inliers)?,
            });
        }
        Ok(planes)
    }

    fn mark_buildings_without_planes(&mut self) -> Result<()> {
        self.execute(
            &format!(
                "
                UPDATE {schema}.buildings b
                SET exclusion_reason = 'NO_ROOF_PLANES_DETECTED'
                WHERE
                    NOT EXISTS (SELECT FROM {schema}.roof_polygons rp WHERE rp.toid = b.toid)
                    AND b.exclusion_reason IS NULL
                ",
                schema = self.schema
            ),
            &[],
        )?;
        Ok(())
    }

    fn update_plane_usability(
        &mut self,
        plane_id: i64,
        usable: bool,
        reason: Option<NotUsableReason>,
    ) -> Result<()> {
        let reason_text = reason.map(|r| r.as_str());
        self.execute(
            &format!(
                "UPDATE {}.roof_polygons SET usable = $2, not_usable_reason = $3 WHERE roof_plane_id = $1",
                self.schema
            ),
            &[&plane_id, &usable, &reason_text],
        )?;
        Ok(())
    }

    fn mark_buildings_all_planes_unusable(&mut self) -> Result<()> {
        self.execute(
            &format!(
                "
                UPDATE {schema}.buildings b
                SET exclusion_reason = 'ALL_ROOF_PLANES_UNUSABLE'
                WHERE
                    EXISTS (SELECT FROM {schema}.roof_polygons rp WHERE rp.toid = b.toid)
                    AND NOT EXISTS (
                        SELECT FROM {schema}.roof_polygons rp
                        WHERE rp.toid = b.toid AND rp.usable
                    )
                    AND b.exclusion_reason IS NULL
                ",
                schema = self.schema
            ),
            &[],
        )?;
        Ok(())
    }

    fn panel_count(&mut self) -> Result<u64> {
        self.count(&format!("SELECT COUNT(*) FROM {}.panels", self.schema))
    }

    fn write_panels(&mut self, panels: &[Panel]) -> Result<()> {
        let statement = format!(
            "
            INSERT INTO {}.panels (roof_plane_id, toid, panel_geom, footprint, area)
            VALUES ($1, $2, $3, $4, $5)
            ",
            self.schema
        );
        for panel in panels {
            let geom_text = panel.geom.wkt_string();
            self.execute(
                &statement,
                &[
                    &panel.plane_id,
                    &panel.toid,
                    &geom_text,
                    &panel.footprint,
                    &panel.area,
                ],
            )?;
        }
        Ok(())
    }

    fn panels_for_buildings(
        &mut self,
        page: u64,
        page_size: u64,
    ) -> Result<HashMap<String, Vec<Panel>>> {
        let rows = self.query(
            &format!(
                "
                WITH building_page AS (
                    SELECT toid FROM {schema}.buildings
                    ORDER BY toid
                    OFFSET $1 LIMIT $2
                )
                SELECT pp.panel_id, pp.roof_plane_id, pp.toid, pp.panel_geom,
                       pp.footprint, pp.area
                FROM building_page b
                JOIN {schema}.roof_polygons rp ON rp.toid = b.toid
                JOIN {schema}.panels pp ON pp.roof_plane_id = rp.roof_plane_id
                WHERE rp.usable
                ORDER BY pp.panel_id
                ",
                schema = self.schema
            ),
            &[&((page * page_size) as i64), &(page_size as i64)],
        )?;
        let mut by_toid: HashMap<String, Vec<Panel>> = HashMap::new();
        for row in rows {
            let toid: String = row.get(2);
            let geom_text: String = row.get(3);
            by_toid.entry(toid.clone()).or_default().push(Panel {
                panel_id: row.get(0),
                plane_id: row.get(1),
                toid,
                geom: PgStore::parse_polygon(&geom_text)?,
                footprint: row.get(4),
                area: row.get(5),
            });
        }
        Ok(by_toid)
    }

    fn panel_yield_count(&mut self) -> Result<u64> {
        self.count(&format!(
            "SELECT COUNT(*) FROM {}.panels WHERE kwh_year IS NOT NULL",
            self.schema
        ))
    }

    fn write_panel_yields(&mut self, yields: &[PanelYield]) -> Result<()> {
        let statement = format!(
            "
            UPDATE {}.panels SET
                kwh_m01 = $2, kwh_m02 = $3, kwh_m03 = $4, kwh_m04 = $5,
                kwh_m05 = $6, kwh_m06 = $7, kwh_m07 = $8, kwh_m08 = $9,
                kwh_m09 = $10, kwh_m10 = $11, kwh_m11 = $12, kwh_m12 = $13,
                kwh_year = $14, kwp = $15, horizon = $16
            WHERE panel_id = $1
            ",
            self.schema
        );
        for y in yields {
            self.execute(
                &statement,
                &[
                    &y.panel_id,
                    &y.kwh_month[0],
                    &y.kwh_month[1],
                    &y.kwh_month[2],
                    &y.kwh_month[3],
                    &y.kwh_month[4],
                    &y.kwh_month[5],
                    &y.kwh_month[6],
                    &y.kwh_month[7],
                    &y.kwh_month[8],
                    &y.kwh_month[9],
                    &y.kwh_month[10],
                    &y.kwh_month[11],
                    &y.kwh_year,
                    &y.kwp,
                    &y.horizon,
                ],
            )?;
        }
        Ok(())
    }

    fn delete_panels(&mut self, panel_ids: &[i64]) -> Result<()> {
        if panel_ids.is_empty() {
            return Ok(());
        }
        self.execute(
            &format!("DELETE FROM {}.panels WHERE panel_id = ANY($1)", self.schema),
            &[&panel_ids.to_vec()],
        )?;
        Ok(())
    }
}
