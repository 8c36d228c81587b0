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
//! Turns the planes RANSAC found into trimmed, non-overlapping roof
//! polygons constrained to the building footprint.
use std::collections::HashMap;

use geo::{Area, BooleanOps, Centroid, Intersects, MultiPolygon, Polygon, Rotate};
use log::warn;

use pv_geom::vector::{
    azimuth, largest_polygon, make_valid, offset_multi_polygon, offset_polygon, square, union_all,
};

use crate::archetypes::ArchetypeLibrary;
use crate::params::constants::{
    AZIMUTH_ALIGNMENT_THRESHOLD, FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD,
    FLAT_ROOF_DEGREES_THRESHOLD, SOUTH_DEGREES,
};
use crate::params::ModelParams;
use crate::types::{Building, DetectedPlane, NotUsableReason, RoofPlane};

/// The four cardinal orientations of a building: the azimuth along which
/// most of the exterior ring's length runs, plus its three 90 degree
/// rotations
pub fn building_orientations(geom: &Polygon<f64>) -> [f64; 4] {
    let coords: Vec<(f64, f64)> = geom.exterior().0.iter().map(|c| (c.x, c.y)).collect();

    let mut lengths: HashMap<i32, f64> = HashMap::new();
    for window in coords.windows(2) {
        let (p1, p2) = (window[0], window[1]);
        let length = (p2.0 - p1.0).hypot(p2.1 - p1.1);
        if length <= 1e-12 {
            continue;
        }
        let az = azimuth(p1, p2).round() as i32 % 360;
        *lengths.entry(az).or_insert(0.0) += length;
    }

    let top = lengths
        .iter()
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                // deterministic tie-break
                .then(b.0.cmp(a.0))
        })
        .map(|(az, _)| *az)
        .unwrap_or(0);

    [
        top as f64,
        ((top + 90) % 360) as f64,
        ((top + 180) % 360) as f64,
        ((top + 270) % 360) as f64,
    ]
}

/// Build roof polygons for a batch of planes. Planes are processed in
/// order; within a building each accepted polygon claims its area and
/// later planes are trimmed against it.
pub fn create_roof_polygons(
    buildings: &HashMap<String, Building>,
    planes: Vec<DetectedPlane>,
    params: &ModelParams,
    archetypes: &ArchetypeLibrary,
) -> Vec<RoofPlane> {
    let mut accepted_by_toid: HashMap<String, Vec<Polygon<f64>>> = HashMap::new();
    let mut out = vec![];

    for plane in planes {
        let building = match buildings.get(&plane.toid) {
            Some(building) => building,
            None => {
                warn!("plane for unknown building {}, dropping", plane.toid);
                continue;
            }
        };

        let is_flat = plane.slope <= FLAT_ROOF_DEGREES_THRESHOLD;
        let slope = if is_flat {
            params.flat_roof_degrees
        } else {
            plane.slope
        };
        let aspect_raw = plane.aspect;
        // rows of panels on a flat roof face south no matter which way the
        // residual tilt points
        let mut aspect = if is_flat { SOUTH_DEGREES } else { plane.aspect };

        let orientations = building_orientations(&building.geom);
        let threshold = if is_flat {
            FLAT_ROOF_AZIMUTH_ALIGNMENT_THRESHOLD
        } else {
            AZIMUTH_ALIGNMENT_THRESHOLD
        };
        for &orientation in orientations.iter() {
            if (orientation - aspect).abs() < threshold {
                aspect = orientation;
                break;
            }
        }

        let interior = building_interior(&building.geom, params);
        let accepted = accepted_by_toid.entry(plane.toid.clone()).or_default();

        let roof_poly = match rasterise_inliers(&plane.inliers_xy, aspect, params)
            .and_then(|poly| clamp_to_building(&poly, &interior, accepted))
        {
            Some(poly) => poly,
            None => {
                warn!("no roof polygon left for a plane of {}, dropping", plane.toid);
                continue;
            }
        };

        let mut usable = true;
        let mut not_usable_reason = None;
        if slope > params.max_roof_slope_degrees {
            usable = false;
            not_usable_reason = Some(NotUsableReason::Slope);
        } else if aspect < params.min_roof_degrees_from_north
            || aspect > 360.0 - params.min_roof_degrees_from_north
        {
            usable = false;
            not_usable_reason = Some(NotUsableReason::Aspect);
        } else if roof_poly.unsigned_area() < params.min_roof_area_m {
            usable = false;
            not_usable_reason = Some(NotUsableReason::Area);
        }

        // snap usable polygons to a standard panel layout where one fits
        // well; the replacement is clamped again so the containment and
        // non-overlap rules keep holding
        let mut archetype = None;
        let mut final_poly = roof_poly.clone();
        if usable {
            if let Some((key, arch_poly)) = archetypes.best_match(&roof_poly, aspect) {
                if let Some(clamped) = clamp_to_building(&arch_poly, &interior, accepted) {
                    archetype = Some(key);
                    final_poly = clamped;
                }
            }
        }

        let centroid = match final_poly.centroid() {
            Some(centroid) => centroid,
            None => {
                warn!("degenerate roof polygon for {}, dropping", plane.toid);
                continue;
            }
        };

        accepted.push(final_poly.clone());

        let raw_footprint = final_poly.unsigned_area();
        let raw_area = raw_footprint / slope.to_radians().cos();

        out.push(RoofPlane {
            plane_id: 0,
            toid: plane.toid.clone(),
            roof_geom: final_poly,
            x_coef: plane.x_coef,
            y_coef: plane.y_coef,
            intercept: plane.intercept,
            slope,
            aspect,
            aspect_raw,
            sd: plane.sd,
            is_flat,
            usable,
            not_usable_reason,
            easting: centroid.x(),
            northing: centroid.y(),
            raw_footprint,
            raw_area,
            archetype,
            aspect_circ_mean: plane.aspect_circ_mean,
            aspect_circ_sd: plane.aspect_circ_sd,
            thinness_ratio: plane.thinness_ratio,
            cv_hull_ratio: plane.cv_hull_ratio,
            inliers_xy: plane.inliers_xy,
        });
    }
    out
}

/// The building polygon shrunk by the minimum panel distance to the roof
/// edge
fn building_interior(geom: &Polygon<f64>, params: &ModelParams) -> MultiPolygon<f64> {
    let offset = if geom.unsigned_area() < params.large_building_threshold {
        -params.min_dist_to_edge_m
    } else {
        -params.min_dist_to_edge_large_m
    };
    offset_polygon(geom, offset)
}

/// Union of a square per inlier pixel, rotated to the plane aspect, then
/// shrunk so the sawtooth edges left by the rotated squares disappear
fn rasterise_inliers(
    inliers_xy: &[(f64, f64)],
    aspect: f64,
    params: &ModelParams,
) -> Option<Polygon<f64>> {
    let resolution = params.resolution_metres;
    let edge_half = (resolution * resolution * 2.0).sqrt() / 2.0;

    let pixel_squares: Vec<Polygon<f64>> = inliers_xy
        .iter()
        .map(|&(x, y)| {
            square(x - edge_half, y - edge_half, edge_half * 2.0)
                .rotate_around_point(-aspect, geo::Point::new(x, y))
        })
        .collect();

    let neg_buffer = -(((resolution * resolution * 2.0).sqrt() - resolution) / 2.0);
    let unioned = union_all(&pixel_squares);
    largest_polygon(&offset_multi_polygon(&unioned, neg_buffer))
}

/// Constrain a roof polygon to the building interior and the area not yet
/// claimed by previously accepted polygons of the same building
fn clamp_to_building(
    poly: &Polygon<f64>,
    interior: &MultiPolygon<f64>,
    accepted: &[Polygon<f64>],
) -> Option<Polygon<f64>> {
    let clipped = MultiPolygon::new(vec![poly.clone()]).intersection(interior);
    let mut roof_poly = largest_polygon(&clipped)?;

    let overlapping: Vec<Polygon<f64>> = accepted
        .iter()
        .filter(|p| p.intersects(&roof_poly))
        .cloned()
        .collect();
    if !overlapping.is_empty() {
        let others = union_all(&overlapping);
        roof_poly = largest_polygon(&MultiPolygon::new(vec![roof_poly]).difference(&others))?;
    }

    let repaired = make_valid(&roof_poly);
    largest_polygon(&repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use pv_geom::vector::{intersection_area, rect};
    use wkt::TryFromWkt;

    fn detected_plane(toid: &str, slope: f64, aspect: f64, inliers: Vec<(f64, f64)>) -> DetectedPlane {
        DetectedPlane {
            toid: toid.to_string(),
            x_coef: 0.0,
            y_coef: slope.to_radians().tan(),
            intercept: 5.0,
            slope,
            aspect,
            sd: 0.01,
            aspect_circ_mean: aspect,
            aspect_circ_sd: 1.0,
            thinness_ratio: Some(0.8),
            cv_hull_ratio: Some(0.9),
            inliers_xy: inliers,
        }
    }

    fn grid(x0: usize, x1: usize, y0: usize, y1: usize) -> Vec<(f64, f64)> {
        let mut points = vec![];
        for x in x0..x1 {
            for y in y0..y1 {
                points.push((x as f64 + 0.5, y as f64 + 0.5));
            }
        }
        points
    }

    fn simple_building(toid: &str, w: f64, h: f64) -> HashMap<String, Building> {
        let mut buildings = HashMap::new();
        buildings.insert(
            toid.to_string(),
            Building {
                toid: toid.to_string(),
                geom: rect(0.0, 0.0, w, h),
                exclusion_reason: None,
                height: None,
            },
        );
        buildings
    }

    fn params() -> ModelParams {
        ModelParams::default()
    }

    fn archetypes() -> ArchetypeLibrary {
        // empty library: geometry is kept as built
        ArchetypeLibrary::empty()
    }

    #[test]
    fn test_building_orientations_axis_aligned() {
        let geom = rect(0.0, 0.0, 10.0, 6.0);
        let mut orientations = building_orientations(&geom).to_vec();
        orientations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(orientations, vec![0.0, 90.0, 180.0, 270.0]);
    }

    #[test]
    fn test_building_orientations_rotated_building() {
        // small residential building from OS MasterMap
        let geom: Polygon<f64> = Polygon::try_from_wkt_str(
            "POLYGON((359550.9 171704.15,359549.65 171706.15,359548.55 171705.45,\
             359547.1 171707.8,359541.15 171704.05,359543.9 171699.7,359550.9 171704.15))",
        )
        .unwrap();
        let mut orientations = building_orientations(&geom).to_vec();
        orientations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(orientations, vec![58.0, 148.0, 238.0, 328.0]);
    }

    #[test]
    fn test_south_pitched_roof_polygon() {
        let buildings = simple_building("t", 10.0, 6.0);
        let plane = detected_plane("t", 30.0, 180.0, grid(0, 10, 0, 6));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());

        assert_eq!(roofs.len(), 1);
        let roof = &roofs[0];
        assert!(!roof.is_flat);
        assert!(roof.usable);
        assert!(approx_eq!(f64, roof.slope, 30.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, roof.aspect, 180.0, epsilon = 1e-9));
        // a 10x6 building shrunk by 0.3m on each side
        assert!(roof.raw_footprint > 44.0 && roof.raw_footprint < 52.0);
        assert!(approx_eq!(
            f64,
            roof.raw_area,
            roof.raw_footprint / 30.0f64.to_radians().cos(),
            epsilon = 1e-9
        ));
        // stays inside the offset building
        let interior = offset_polygon(&buildings["t"].geom, -0.3);
        let outside = MultiPolygon::new(vec![roof.roof_geom.clone()])
            .difference(&interior)
            .unsigned_area();
        assert!(outside < 1e-9);
    }

    #[test]
    fn test_flat_roof_points_south() {
        let buildings = simple_building("t", 8.0, 8.0);
        // raw slope 2 degrees, raw aspect nowhere near south
        let plane = detected_plane("t", 2.0, 75.0, grid(0, 8, 0, 8));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());

        assert_eq!(roofs.len(), 1);
        let roof = &roofs[0];
        assert!(roof.is_flat);
        assert!(approx_eq!(f64, roof.slope, 10.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, roof.aspect, 180.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, roof.aspect_raw, 75.0, epsilon = 1e-9));
        assert!(roof.usable);
    }

    #[test]
    fn test_aspect_snaps_to_building_orientation() {
        let buildings = simple_building("t", 10.0, 6.0);
        // 12 degrees off the southern facing of the building
        let plane = detected_plane("t", 30.0, 192.0, grid(0, 10, 0, 6));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());
        assert!(approx_eq!(f64, roofs[0].aspect, 180.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, roofs[0].aspect_raw, 192.0, epsilon = 1e-9));
    }

    #[test]
    fn test_far_aspect_does_not_snap() {
        let buildings = simple_building("t", 10.0, 6.0);
        let plane = detected_plane("t", 30.0, 160.0, grid(0, 10, 0, 6));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());
        assert!(approx_eq!(f64, roofs[0].aspect, 160.0, epsilon = 1e-9));
    }

    #[test]
    fn test_overlapping_planes_do_not_share_area() {
        let buildings = simple_building("t", 20.0, 10.0);
        // two planes overlapping by a 2m-wide strip along the ridge
        let plane1 = detected_plane("t", 30.0, 180.0, grid(0, 20, 0, 6));
        let plane2 = detected_plane("t", 30.0, 180.0, grid(0, 20, 4, 10));
        let roofs = create_roof_polygons(&buildings, vec![plane1, plane2], &params(), &archetypes());

        assert_eq!(roofs.len(), 2);
        let crossover = intersection_area(&roofs[0].roof_geom, &roofs[1].roof_geom);
        assert!(crossover < 1e-9, "roof polygons overlap by {} m2", crossover);
        // the first-accepted polygon keeps the contested strip
        assert!(roofs[0].raw_footprint > roofs[1].raw_footprint);
    }

    #[test]
    fn test_unusable_when_aspect_near_north() {
        let buildings = simple_building("t", 10.0, 6.0);
        // 20 degrees east of north; snap cannot save it as 20 < 45
        let plane = detected_plane("t", 30.0, 20.0, grid(0, 10, 0, 6));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());
        assert!(!roofs[0].usable);
        assert_eq!(roofs[0].not_usable_reason, Some(NotUsableReason::Aspect));
    }

    #[test]
    fn test_unusable_when_too_steep() {
        let buildings = simple_building("t", 10.0, 6.0);
        let plane = detected_plane("t", 81.0, 180.0, grid(0, 10, 0, 6));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());
        assert!(!roofs[0].usable);
        assert_eq!(roofs[0].not_usable_reason, Some(NotUsableReason::Slope));
    }

    #[test]
    fn test_unusable_when_too_small() {
        let buildings = simple_building("t", 10.0, 6.0);
        let plane = detected_plane("t", 30.0, 180.0, grid(0, 3, 0, 3));
        let roofs = create_roof_polygons(&buildings, vec![plane], &params(), &archetypes());
        assert!(!roofs[0].usable);
        assert_eq!(roofs[0].not_usable_reason, Some(NotUsableReason::Area));
    }
}
