//! Shared-arc topology of a set of polygons.
//!
//! Every ring is cut at its junctions (the points where the neighbouring rings diverge) into
//! arcs, and identical arcs are stored once. Simplifying the stored arcs, rather than each
//! polygon, keeps the borders of adjacent polygons coincident.

use std::collections::{HashMap, HashSet};

use geo::{Coord, LineString, MultiPolygon, Polygon, Simplify, SimplifyVw};
use log::debug;

use crate::config::SimplifyAlgorithm;

pub(crate) type PointKey = (u64, u64);

/// Exact identity of a coordinate.
pub(crate) fn point_key(coord: Coord<f64>) -> PointKey {
    // -0.0 and 0.0 are the same point
    let normalise = |v: f64| if v == 0.0 { 0.0f64 } else { v };
    (normalise(coord.x).to_bits(), normalise(coord.y).to_bits())
}

/// Reference from a ring to a stored arc, walked backwards when `reversed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcRef {
    pub index: usize,
    pub reversed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopoPolygon {
    pub exterior: Vec<ArcRef>,
    pub interiors: Vec<Vec<ArcRef>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    arcs: Vec<LineString<f64>>,
    /// One entry per input geometry, in input order.
    objects: Vec<Vec<TopoPolygon>>,
}

/// Open coordinate sequence of a ring, without repeated points or the closing coordinate.
fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords = ring.0.clone();
    coords.dedup_by(|a, b| point_key(*a) == point_key(*b));
    if coords.len() > 1 && point_key(coords[0]) == point_key(coords[coords.len() - 1]) {
        coords.pop();
    }
    coords
}

fn find_junctions<'a>(rings: impl Iterator<Item = &'a Vec<Coord<f64>>>) -> HashSet<PointKey> {
    let mut neighbours: HashMap<PointKey, (PointKey, PointKey)> = HashMap::new();
    let mut junctions = HashSet::new();
    for ring in rings {
        let n = ring.len();
        for i in 0..n {
            let point = point_key(ring[i]);
            let previous = point_key(ring[(i + n - 1) % n]);
            let next = point_key(ring[(i + 1) % n]);
            let pair = if previous <= next {
                (previous, next)
            } else {
                (next, previous)
            };
            match neighbours.get(&point) {
                None => {
                    neighbours.insert(point, pair);
                }
                Some(seen) if *seen != pair => {
                    junctions.insert(point);
                }
                Some(_) => {}
            }
        }
    }
    junctions
}

/// Cut an open ring into arcs running from junction to junction. A ring without junctions
/// becomes a single closed arc starting at its smallest point.
fn cut_ring(ring: &[Coord<f64>], junctions: &HashSet<PointKey>) -> Vec<Vec<Coord<f64>>> {
    let n = ring.len();
    let starts: Vec<usize> = (0..n)
        .filter(|&i| junctions.contains(&point_key(ring[i])))
        .collect();
    if starts.is_empty() {
        let first = (0..n).min_by_key(|&i| point_key(ring[i])).unwrap_or(0);
        return vec![(0..=n).map(|offset| ring[(first + offset) % n]).collect()];
    }
    starts
        .iter()
        .enumerate()
        .map(|(k, &start)| {
            let end = starts[(k + 1) % starts.len()];
            let len = if end > start { end - start } else { end + n - start };
            (0..=len).map(|offset| ring[(start + offset) % n]).collect()
        })
        .collect()
}

fn simplify_line(
    line: &LineString<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> LineString<f64> {
    match algorithm {
        SimplifyAlgorithm::VisvalingamWhyatt => line.simplify_vw(&tolerance),
        SimplifyAlgorithm::DouglasPeucker => line.simplify(&tolerance),
    }
}

/// Closed arcs are simplified as rings so they keep enough points to enclose an area.
fn simplify_closed(
    arc: &LineString<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> LineString<f64> {
    let ring = Polygon::new(arc.clone(), vec![]);
    let simplified = match algorithm {
        SimplifyAlgorithm::VisvalingamWhyatt => ring.simplify_vw(&tolerance),
        SimplifyAlgorithm::DouglasPeucker => ring.simplify(&tolerance),
    };
    let (exterior, _) = simplified.into_inner();
    if exterior.0.len() < 4 {
        arc.clone()
    } else {
        exterior
    }
}

impl Topology {
    pub fn build(geometries: &[MultiPolygon<f64>]) -> Self {
        let rings: Vec<Vec<(Vec<Coord<f64>>, Vec<Vec<Coord<f64>>>)>> = geometries
            .iter()
            .map(|geometry| {
                geometry
                    .iter()
                    .map(|polygon| {
                        let interiors = polygon
                            .interiors()
                            .iter()
                            .map(open_ring)
                            .filter(|ring| ring.len() >= 3)
                            .collect();
                        (open_ring(polygon.exterior()), interiors)
                    })
                    .filter(|(exterior, _)| exterior.len() >= 3)
                    .collect()
            })
            .collect();

        let junctions = find_junctions(rings.iter().flatten().flat_map(|(exterior, interiors)| {
            std::iter::once(exterior).chain(interiors.iter())
        }));

        let mut topology = Topology::default();
        let mut index: HashMap<Vec<PointKey>, usize> = HashMap::new();
        for polygons in &rings {
            let object = polygons
                .iter()
                .map(|(exterior, interiors)| TopoPolygon {
                    exterior: topology.add_ring(exterior, &junctions, &mut index),
                    interiors: interiors
                        .iter()
                        .map(|ring| topology.add_ring(ring, &junctions, &mut index))
                        .collect(),
                })
                .collect();
            topology.objects.push(object);
        }
        debug!(
            "Topology: {} arc(s), {} junction(s), {} shared",
            topology.arcs.len(),
            junctions.len(),
            topology.shared_arc_count()
        );
        topology
    }

    fn add_ring(
        &mut self,
        ring: &[Coord<f64>],
        junctions: &HashSet<PointKey>,
        index: &mut HashMap<Vec<PointKey>, usize>,
    ) -> Vec<ArcRef> {
        cut_ring(ring, junctions)
            .into_iter()
            .map(|arc| self.intern(arc, index))
            .collect()
    }

    /// Store an arc once, in whichever direction has the smaller key sequence.
    fn intern(
        &mut self,
        mut arc: Vec<Coord<f64>>,
        index: &mut HashMap<Vec<PointKey>, usize>,
    ) -> ArcRef {
        let forward: Vec<PointKey> = arc.iter().map(|c| point_key(*c)).collect();
        let backward: Vec<PointKey> = forward.iter().rev().copied().collect();
        let reversed = backward < forward;
        let canonical = if reversed { backward } else { forward };
        if let Some(&existing) = index.get(&canonical) {
            return ArcRef {
                index: existing,
                reversed,
            };
        }
        if reversed {
            arc.reverse();
        }
        self.arcs.push(LineString::new(arc));
        index.insert(canonical, self.arcs.len() - 1);
        ArcRef {
            index: self.arcs.len() - 1,
            reversed,
        }
    }

    pub fn arcs(&self) -> &[LineString<f64>] {
        &self.arcs
    }

    pub fn objects(&self) -> &[Vec<TopoPolygon>] {
        &self.objects
    }

    /// Number of arcs referenced by more than one ring.
    pub fn shared_arc_count(&self) -> usize {
        let mut uses = vec![0usize; self.arcs.len()];
        for polygon in self.objects.iter().flatten() {
            for arc in polygon
                .interiors
                .iter()
                .flatten()
                .chain(polygon.exterior.iter())
            {
                uses[arc.index] += 1;
            }
        }
        uses.into_iter().filter(|&n| n > 1).count()
    }

    pub fn vertex_count(&self) -> usize {
        self.arcs.iter().map(|arc| arc.0.len()).sum()
    }

    /// Simplify every arc in place. Arc endpoints never move, so rings stay connected.
    pub fn simplify(&mut self, tolerance: f64, algorithm: SimplifyAlgorithm) {
        if tolerance <= 0.0 {
            return;
        }
        let before = self.vertex_count();
        for arc in self.arcs.iter_mut() {
            *arc = if arc.is_closed() {
                simplify_closed(arc, tolerance, algorithm)
            } else {
                simplify_line(arc, tolerance, algorithm)
            };
        }
        debug!(
            "Simplified arcs with {algorithm} at {tolerance}: {before} -> {} vertices",
            self.vertex_count()
        );
    }

    fn ring(&self, refs: &[ArcRef]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = vec![];
        for arc_ref in refs {
            let arc = &self.arcs[arc_ref.index].0;
            let walk: Vec<Coord<f64>> = if arc_ref.reversed {
                arc.iter().rev().copied().collect()
            } else {
                arc.clone()
            };
            let skip = usize::from(!coords.is_empty());
            coords.extend(walk.into_iter().skip(skip));
        }
        LineString::new(coords)
    }

    /// Rebuild one geometry per input geometry, in input order.
    pub fn to_multi_polygons(&self) -> Vec<MultiPolygon<f64>> {
        self.objects
            .iter()
            .map(|polygons| {
                MultiPolygon::new(
                    polygons
                        .iter()
                        .map(|polygon| {
                            Polygon::new(
                                self.ring(&polygon.exterior),
                                polygon.interiors.iter().map(|r| self.ring(r)).collect(),
                            )
                        })
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Area, Coord};

    use super::*;

    /// Two unit-width squares sharing the edge x = 1, with extra vertices along every edge.
    fn neighbours() -> Vec<MultiPolygon<f64>> {
        let left = polygon![
            (x: 0.0, y: 0.0), (x: 0.5, y: 0.01), (x: 1.0, y: 0.0), (x: 1.01, y: 0.5),
            (x: 1.0, y: 1.0), (x: 0.5, y: 0.99), (x: 0.0, y: 1.0), (x: 0.01, y: 0.5),
            (x: 0.0, y: 0.0),
        ];
        let right = polygon![
            (x: 1.0, y: 0.0), (x: 1.5, y: 0.01), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0),
            (x: 1.5, y: 0.99), (x: 1.0, y: 1.0), (x: 1.01, y: 0.5), (x: 1.0, y: 0.0),
        ];
        vec![MultiPolygon::new(vec![left]), MultiPolygon::new(vec![right])]
    }

    fn shared_points(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Vec<Coord<f64>> {
        let b_points: HashSet<PointKey> = b
            .iter()
            .flat_map(|p| p.exterior().0.iter().map(|c| point_key(*c)))
            .collect();
        let mut shared: Vec<Coord<f64>> = a
            .iter()
            .flat_map(|p| p.exterior().0.iter().copied())
            .filter(|c| b_points.contains(&point_key(*c)))
            .collect();
        shared.sort_by(|p, q| p.y.total_cmp(&q.y));
        shared.dedup();
        shared
    }

    #[test]
    fn test_shared_border_is_one_arc() {
        let topology = Topology::build(&neighbours());
        assert_eq!(topology.objects().len(), 2);
        assert_eq!(topology.shared_arc_count(), 1);
        let shared: Vec<&ArcRef> = topology
            .objects()
            .iter()
            .flat_map(|o| o[0].exterior.iter())
            .filter(|r| topology.arcs()[r.index].0.len() == 3)
            .collect();
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].index, shared[1].index);
        assert_ne!(
            shared[0].reversed, shared[1].reversed,
            "Neighbours walk their shared border in opposite directions"
        );
    }

    #[test]
    fn test_round_trip_without_simplification() {
        let input = neighbours();
        let output = Topology::build(&input).to_multi_polygons();
        assert_eq!(output.len(), input.len());
        for (before, after) in input.iter().zip(&output) {
            assert!((before.unsigned_area() - after.unsigned_area()).abs() < 1e-12);
            assert_eq!(after.0[0].exterior().0.len(), before.0[0].exterior().0.len());
        }
    }

    #[test]
    fn test_simplified_borders_stay_coincident() {
        for algorithm in [SimplifyAlgorithm::VisvalingamWhyatt, SimplifyAlgorithm::DouglasPeucker] {
            let mut topology = Topology::build(&neighbours());
            topology.simplify(0.1, algorithm);
            let output = topology.to_multi_polygons();
            let shared = shared_points(&output[0], &output[1]);
            assert_eq!(
                shared,
                vec![Coord { x: 1.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }],
                "{algorithm}: the bulge of the shared edge is removed on both sides"
            );
            let total: f64 = output.iter().map(|g| g.unsigned_area()).sum();
            assert!((total - 2.0).abs() < 1e-9, "{algorithm}: no gap or overlap");
        }
    }

    #[test]
    fn test_isolated_ring_keeps_an_area() {
        let island = polygon![
            (x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.5, y: 6.01),
            (x: 5.0, y: 6.0), (x: 5.0, y: 5.0),
        ];
        let mut topology = Topology::build(&[MultiPolygon::new(vec![island])]);
        assert_eq!(topology.arcs().len(), 1);
        assert!(topology.arcs()[0].is_closed());
        topology.simplify(10.0, SimplifyAlgorithm::VisvalingamWhyatt);
        let output = topology.to_multi_polygons();
        let ring = output[0].0[0].exterior();
        assert!(ring.0.len() >= 4);
        assert!(output[0].unsigned_area() > 0.0);
    }

    #[test]
    fn test_identical_rings_share_an_arc() {
        let square = polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0),
        ];
        let mut reversed = square.clone();
        reversed.exterior_mut(|ring| ring.0.reverse());
        let topology = Topology::build(&[
            MultiPolygon::new(vec![square]),
            MultiPolygon::new(vec![reversed]),
        ]);
        assert_eq!(topology.arcs().len(), 1);
        assert_eq!(topology.shared_arc_count(), 1);
    }
}
