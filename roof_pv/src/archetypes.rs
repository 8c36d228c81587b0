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
//! Pre-made roof shapes. RANSAC-derived polygons are ragged around the
//! edges; where a standard panel layout is close enough in shape, its
//! clean outline replaces the polygon so the panel packing comes out
//! regular.
use geo::{Area, BooleanOps, Centroid, MultiPolygon, Polygon, Rotate, Translate};

use pv_geom::vector::{largest_polygon, rect, union_all};

// Various magic numbers reached via trial and error:

/// Don't use an archetype that is this much bigger or smaller than the
/// roof polygon:
const MAX_ABS_AREA_DIFF: f64 = 4.0;
/// Don't use an archetype whose weighted symmetric % difference from the
/// roof polygon is >= this:
const MIN_PCT_AREA_DIFF: f64 = 0.68;
/// weight for parts of the roof polygon that do not intersect the
/// archetype (not such a problem - bits of roof are sticking out the
/// sides of the archetype):
const PCT_SYM_DIFF_WEIGHT_ROOF: f64 = 0.75;
/// weight for the parts of the archetype that do not intersect the roof
/// polygon (this is worse - the archetype is sticking out the sides of
/// the roof - so make it count more):
const PCT_SYM_DIFF_WEIGHT_ARCHETYPE: f64 = 1.8;

type Pattern = Vec<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct Archetype {
    pub key: String,
    pub polygon: Polygon<f64>,
}

/// Immutable process-wide archetype library, ordered by area descending
pub struct ArchetypeLibrary {
    archetypes: Vec<Archetype>,
}

impl ArchetypeLibrary {
    pub fn build(panel_w: f64, panel_h: f64) -> ArchetypeLibrary {
        let mut archetypes = vec![];
        for (idx, pattern) in archetype_patterns().iter().enumerate() {
            archetypes.push(construct_archetype(pattern, panel_w, panel_h, true, idx));
            archetypes.push(construct_archetype(pattern, panel_w, panel_h, false, idx));
        }
        archetypes.sort_by(|a, b| {
            b.polygon
                .unsigned_area()
                .partial_cmp(&a.polygon.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ArchetypeLibrary { archetypes }
    }

    /// A library that never matches; used where archetype snapping is not
    /// wanted
    pub fn empty() -> ArchetypeLibrary {
        ArchetypeLibrary { archetypes: vec![] }
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// The best-scoring archetype for a roof polygon with the given
    /// aspect, already moved onto the polygon's centroid and rotated to
    /// the aspect. None if nothing fits well enough.
    pub fn best_match(&self, roof_poly: &Polygon<f64>, aspect: f64) -> Option<(String, Polygon<f64>)> {
        let roof_area = roof_poly.unsigned_area();
        let centroid = roof_poly.centroid()?;

        // skip any that are way too big or too small, then move and
        // rotate the rest into place
        let prepared: Vec<(&Archetype, Polygon<f64>)> = self
            .archetypes
            .iter()
            .filter(|a| (a.polygon.unsigned_area() - roof_area).abs() < MAX_ABS_AREA_DIFF)
            .map(|a| {
                let placed = a
                    .polygon
                    .translate(centroid.x(), centroid.y())
                    .rotate_around_point(-aspect, centroid);
                (a, placed)
            })
            .collect();

        let mut min_diff = MIN_PCT_AREA_DIFF;
        let mut best: Option<&(&Archetype, Polygon<f64>)> = None;

        for candidate in &prepared {
            let (_, arch_poly) = candidate;
            let overhang = polygon_difference_area(arch_poly, roof_poly);
            if overhang > MAX_ABS_AREA_DIFF {
                continue;
            }
            let pct_diff = weighted_pct_sym_difference(roof_poly, arch_poly);
            if pct_diff < min_diff {
                min_diff = pct_diff;
                best = Some(candidate);
            } else if let Some(current) = best {
                // tie-break towards the larger archetype
                if round2(pct_diff) == round2(min_diff)
                    && arch_poly.unsigned_area() > current.1.unsigned_area()
                {
                    min_diff = pct_diff;
                    best = Some(candidate);
                }
            }
        }

        if best.is_none() {
            // Nothing matched on shape; fall back to scoring only how much
            // of the archetype pokes out of the roof plane. Relies on the
            // library being ordered by area descending, as otherwise the
            // smallest one might be checked first and always win.
            for candidate in &prepared {
                let (_, arch_poly) = candidate;
                let pct_diff = polygon_difference_area(arch_poly, roof_poly) / roof_area;
                if pct_diff < min_diff {
                    min_diff = pct_diff;
                    best = Some(candidate);
                } else if let Some(current) = best {
                    if round2(pct_diff) == round2(min_diff)
                        && arch_poly.unsigned_area() > current.1.unsigned_area()
                    {
                        min_diff = pct_diff;
                        best = Some(candidate);
                    }
                }
            }
        }

        best.map(|(archetype, placed)| (archetype.key.clone(), placed.clone()))
    }
}

fn round2(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn polygon_difference_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    a.difference(b).unsigned_area()
}

/// % difference in area between the roof polygon and the archetype, with
/// the parts of each that do not intersect the other weighted separately
fn weighted_pct_sym_difference(roof_poly: &Polygon<f64>, arch_poly: &Polygon<f64>) -> f64 {
    let roof_only = polygon_difference_area(roof_poly, arch_poly) * PCT_SYM_DIFF_WEIGHT_ROOF;
    let arch_only = polygon_difference_area(arch_poly, roof_poly) * PCT_SYM_DIFF_WEIGHT_ARCHETYPE;
    (roof_only + arch_only) / roof_poly.unsigned_area()
}

/// Build the polygon for a pattern: one cell per set entry, scaled by the
/// panel dimensions, centred on the origin
fn construct_archetype(
    pattern: &Pattern,
    panel_w: f64,
    panel_h: f64,
    portrait: bool,
    idx: usize,
) -> Archetype {
    let mut cells = vec![];
    for (y, row) in pattern.iter().enumerate() {
        for (x, &cell) in row.iter().enumerate() {
            if cell == 1 {
                if portrait {
                    cells.push(rect(x as f64 * panel_w, y as f64 * panel_h, panel_w, panel_h));
                } else {
                    cells.push(rect(x as f64 * panel_h, y as f64 * panel_w, panel_h, panel_w));
                }
            }
        }
    }

    let unioned = union_all(&cells);
    let polygon = largest_polygon(&unioned).unwrap_or_else(|| rect(0.0, 0.0, 0.0, 0.0));
    let centred = match polygon.centroid() {
        Some(centroid) => polygon.translate(-centroid.x(), -centroid.y()),
        None => polygon,
    };
    Archetype {
        key: format!("a{:03}{}", idx, if portrait { "p" } else { "l" }),
        polygon: centred,
    }
}

fn deep_copy(pattern: &Pattern) -> Pattern {
    pattern.clone()
}

/// Generate some variations on a pattern (cutting each corner off;
/// cutting combinations of corners off; cutting larger corners off)
fn pattern_variations(pattern: &Pattern) -> Vec<Pattern> {
    let last_col = pattern[0].len() - 1;
    let last_row = pattern.len() - 1;

    let mut t = deep_copy(pattern);
    t[0][0] = 0;
    t[0][last_col] = 0;

    let mut tl = deep_copy(pattern);
    tl[0][0] = 0;

    let mut tr = deep_copy(pattern);
    tr[0][last_col] = 0;

    let mut b = deep_copy(pattern);
    b[last_row][0] = 0;
    b[last_row][last_col] = 0;

    let mut bl = deep_copy(pattern);
    bl[last_row][0] = 0;

    let mut br = deep_copy(pattern);
    br[last_row][last_col] = 0;

    if pattern.len() < 3 || pattern[0].len() < 3 {
        return vec![deep_copy(pattern), t, tl, tr, b, bl, br];
    }

    let mut ttl = deep_copy(pattern);
    ttl[0][0] = 0;
    ttl[1][0] = 0;
    ttl[0][1] = 0;

    let mut ttr = deep_copy(pattern);
    ttr[0][last_col] = 0;
    ttr[1][last_col] = 0;
    ttr[0][last_col - 1] = 0;

    let mut bbl = deep_copy(pattern);
    bbl[last_row][0] = 0;
    bbl[last_row - 1][0] = 0;
    bbl[last_row][1] = 0;

    let mut bbr = deep_copy(pattern);
    bbr[last_row][last_col] = 0;
    bbr[last_row - 1][last_col] = 0;
    bbr[last_row][last_col - 1] = 0;

    vec![
        deep_copy(pattern),
        t,
        tl,
        tr,
        b,
        bl,
        br,
        ttl,
        ttr,
        bbl,
        bbr,
    ]
}

/// Each pattern represents a standard panel layout to test against a roof
/// polygon to see if it is a similar-enough shape
fn archetype_patterns() -> Vec<Pattern> {
    let mut patterns: Vec<Pattern> = vec![
        vec![vec![1, 1, 1]],
        vec![vec![1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1, 1, 1]],
        vec![vec![1, 1], vec![1, 1]],
        vec![vec![1, 1, 1], vec![1, 1, 1]],
        vec![vec![1, 1, 1], vec![0, 1, 1]],
        vec![vec![1, 1, 1], vec![1, 1, 0]],
        vec![vec![0, 1, 0], vec![1, 1, 1]],
        vec![vec![1, 1], vec![1, 1], vec![1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1], vec![1, 1, 0, 0, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1], vec![1, 1, 0, 0, 0, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1, 1], vec![1, 1, 0, 0, 0, 0, 1, 1]],
        vec![
            vec![1, 1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1, 1],
            vec![1, 1, 0, 0, 1, 1],
        ],
        vec![
            vec![1, 1, 1, 1, 1, 1],
            vec![1, 1, 0, 0, 1, 1],
            vec![1, 0, 0, 0, 0, 1],
        ],
        vec![
            vec![0, 1, 1, 1, 0],
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 0, 1, 1],
            vec![1, 0, 0, 0, 1],
        ],
        vec![
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 0, 1, 1],
            vec![1, 0, 0, 0, 1],
        ],
    ];

    let varied: Vec<Pattern> = vec![
        vec![vec![1, 1, 1, 1], vec![1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1], vec![1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1], vec![1, 1, 1, 1, 1, 1]],
        vec![vec![1, 1, 1, 1, 1, 1, 1], vec![1, 1, 1, 1, 1, 1, 1]],
        vec![
            vec![1, 1, 1, 1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1, 1, 1, 1],
        ],
        vec![vec![1, 1, 1], vec![1, 1, 1], vec![1, 1, 1]],
        vec![vec![1, 1, 1, 1], vec![1, 1, 1, 1], vec![1, 1, 1, 1]],
        vec![
            vec![1, 1, 1, 1],
            vec![1, 1, 1, 1],
            vec![1, 1, 1, 1],
            vec![1, 1, 1, 1],
        ],
        vec![
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
        ],
        vec![
            vec![1, 1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1, 1],
        ],
        vec![
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 1, 1, 1],
        ],
    ];
    for pattern in &varied {
        patterns.extend(pattern_variations(pattern));
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use geo::Translate;

    fn library() -> ArchetypeLibrary {
        ArchetypeLibrary::build(0.99, 1.64)
    }

    #[test]
    fn test_library_is_ordered_by_area_descending() {
        let lib = library();
        assert!(lib.len() > 100);
        for pair in lib.archetypes.windows(2) {
            assert!(pair[0].polygon.unsigned_area() >= pair[1].polygon.unsigned_area() - 1e-9);
        }
    }

    #[test]
    fn test_archetypes_are_centred() {
        let lib = library();
        for archetype in &lib.archetypes {
            let centroid = archetype.polygon.centroid().unwrap();
            assert!(centroid.x().abs() < 1e-6);
            assert!(centroid.y().abs() < 1e-6);
        }
    }

    #[test]
    fn test_pattern_variations_count() {
        let small = vec![vec![1, 1], vec![1, 1]];
        assert_eq!(pattern_variations(&small).len(), 7);
        let big = vec![vec![1, 1, 1], vec![1, 1, 1], vec![1, 1, 1]];
        assert_eq!(pattern_variations(&big).len(), 11);
    }

    #[test]
    fn test_perfect_fit_is_matched() {
        let lib = library();
        // exactly the 2x3-portrait-panel rectangle, somewhere off-origin
        let roof = rect(0.0, 0.0, 2.97, 3.28).translate(120.0, 45.0);
        let matched = lib.best_match(&roof, 0.0);
        assert!(matched.is_some());
        let (_, polygon) = matched.unwrap();
        assert!(approx_eq!(
            f64,
            polygon.unsigned_area(),
            roof.unsigned_area(),
            epsilon = 1e-6
        ));
        // placed onto the roof centroid
        let sym_diff = polygon_difference_area(&polygon, &roof)
            + polygon_difference_area(&roof, &polygon);
        assert!(sym_diff < 1e-6);
    }

    #[test]
    fn test_rotated_fit_is_matched() {
        let lib = library();
        let aspect = 30.0;
        let roof = rect(0.0, 0.0, 2.97, 3.28).translate(120.0, 45.0);
        let rotated_roof = roof.rotate_around_point(-aspect, roof.centroid().unwrap());
        let matched = lib.best_match(&rotated_roof, aspect);
        assert!(matched.is_some());
        let (_, polygon) = matched.unwrap();
        let sym_diff = polygon_difference_area(&polygon, &rotated_roof)
            + polygon_difference_area(&rotated_roof, &polygon);
        assert!(sym_diff < 1e-6);
    }

    #[test]
    fn test_empty_library_matches_nothing() {
        let lib = ArchetypeLibrary::empty();
        let roof = rect(0.0, 0.0, 3.0, 3.0);
        assert!(lib.best_match(&roof, 0.0).is_none());
    }

    #[test]
    fn test_tiny_roof_matches_nothing() {
        let lib = library();
        // smaller than every archetype by more than the absolute area cap
        let roof = rect(0.0, 0.0, 1.0, 0.5);
        assert!(lib.best_match(&roof, 0.0).is_none());
    }

    #[test]
    fn test_thin_roof_falls_back_to_contained_archetype() {
        let lib = library();
        // nothing resembles a 40m strip, but the fallback pass accepts an
        // archetype that mostly pokes out as long as the overhang stays
        // under the score cap
        let roof = rect(0.0, 0.0, 40.0, 0.2);
        let matched = lib.best_match(&roof, 0.0);
        assert!(matched.is_some());
    }
}
