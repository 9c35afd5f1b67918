//! Route geometry builder.
//!
//! Chains shortest paths between consecutive waypoints over the road
//! graph for the requested travel mode, falling back to a straight
//! geodesic edge whenever the graph cannot answer. Fallback segments
//! never abort the build; they are flagged so downstream consumers
//! can tell network-snapped geometry from geodesic stand-ins.

use crate::errors::{EngineError, EngineResult};
use crate::models::Waypoint;
use crate::road_graph::GraphSet;
use crate::store::wkt_codec;
use crate::{Deadline, TravelMode};

/// Result of a geometry build. The linestring is already normalized
/// to `lng lat` WKT order by the codec.
#[derive(Clone, Debug)]
pub struct BuiltRoute {
    pub linestring: postgis_diesel::types::LineString<postgis_diesel::types::Point>,
    pub wkt: String,
    pub total_distance_km: f64,
    pub has_fallback_segments: bool,
}

impl BuiltRoute {
    /// The built polyline as lat-lng waypoints. Downstream consumers
    /// (the elevation resampler in particular) walk the snapped
    /// geometry, not the input anchors.
    pub fn polyline_waypoints(&self) -> Vec<Waypoint> {
        self.linestring
            .points
            .iter()
            .map(|p| Waypoint::new(p.y, p.x))
            .collect()
    }
}

const JUNCTION_EPSILON_DEG: f64 = 1e-9;

/// Build a continuous polyline through `waypoints` for `mode`.
///
/// The first and last emitted points are the literal first and last
/// waypoints, so the stored geometry always honours the endpoint
/// invariant even when snapping moved the interior onto the network.
/// `deadline` is the cooperative cancellation point, checked between
/// waypoint segments.
pub fn build_route(
    graphs: &GraphSet,
    waypoints: &[Waypoint],
    mode: TravelMode,
    circular: bool,
    deadline: Option<Deadline>,
) -> EngineResult<BuiltRoute> {
    if waypoints.len() < 2 {
        return Err(EngineError::InvalidInput(format!(
            "insufficient waypoints: need at least 2, got {}",
            waypoints.len()
        )));
    }
    for w in waypoints {
        if !w.is_valid() {
            return Err(EngineError::InvalidInput(format!(
                "coordinate out of range: lat {} lng {}",
                w.lat, w.lng
            )));
        }
    }

    let mut anchors: Vec<Waypoint> = waypoints.to_vec();
    let first = anchors[0];
    let last = anchors[anchors.len() - 1];
    let closes_already =
        crate::haversine_m(first.lat, first.lng, last.lat, last.lng) < 1.0;
    if circular && !closes_already {
        anchors.push(first);
    }

    let graph = graphs.for_mode(mode);

    let mut coords: Vec<Waypoint> = vec![anchors[0]];
    let mut total_distance_m = 0.0;
    let mut has_fallback_segments = false;

    for i in 0..anchors.len() - 1 {
        if let Some(deadline) = deadline {
            if deadline.expired() {
                return Err(EngineError::Timeout(deadline.budget_secs()));
            }
        }

        let from = anchors[i];
        let to = anchors[i + 1];

        match snap_segment(graph, from, to) {
            SegmentResult::Snapped { path_coords, length_m } => {
                total_distance_m += length_m;
                append_dedup(&mut coords, path_coords);
            }
            SegmentResult::Collapsed => {
                // both waypoints snapped to the same node; nothing to add
            }
            SegmentResult::Fallback => {
                has_fallback_segments = true;
                total_distance_m += crate::haversine_m(from.lat, from.lng, to.lat, to.lng);
                append_dedup(&mut coords, vec![to]);
            }
        }
    }

    // The literal last anchor closes the polyline; snapping never
    // moves the endpoints.
    let last_anchor = anchors[anchors.len() - 1];
    append_dedup(&mut coords, vec![last_anchor]);

    if coords.len() < 2 {
        // every segment collapsed onto one node
        coords.push(last_anchor);
    }

    let linestring = wkt_codec::linestring_from_waypoints(&coords)?;
    let wkt = wkt_codec::linestring_to_wkt(&linestring);

    Ok(BuiltRoute {
        linestring,
        wkt,
        total_distance_km: total_distance_m / 1000.0,
        has_fallback_segments,
    })
}

enum SegmentResult {
    Snapped {
        path_coords: Vec<Waypoint>,
        length_m: f64,
    },
    Collapsed,
    Fallback,
}

fn snap_segment(
    graph: Option<&crate::road_graph::RoadGraph>,
    from: Waypoint,
    to: Waypoint,
) -> SegmentResult {
    let graph = match graph {
        Some(g) if !g.is_empty() => g,
        _ => return SegmentResult::Fallback,
    };

    let from_node = match graph.nearest_node(from.lat, from.lng) {
        Ok(n) => n,
        Err(_) => return SegmentResult::Fallback,
    };
    let to_node = match graph.nearest_node(to.lat, to.lng) {
        Ok(n) => n,
        Err(_) => return SegmentResult::Fallback,
    };

    if from_node == to_node {
        return SegmentResult::Collapsed;
    }

    match graph.shortest_path(from_node, to_node) {
        Ok(path) => {
            let mut length_m = graph.path_length_m(&path);
            let path_coords: Vec<Waypoint> = graph
                .coords_of_path(&path)
                .into_iter()
                .map(|(lat, lng)| Waypoint::new(lat, lng))
                .collect();
            // connector stubs from the literal waypoints to their
            // snapped nodes count toward the total
            if let Some(first) = path_coords.first() {
                length_m += crate::haversine_m(from.lat, from.lng, first.lat, first.lng);
            }
            if let Some(last) = path_coords.last() {
                length_m += crate::haversine_m(to.lat, to.lng, last.lat, last.lng);
            }
            SegmentResult::Snapped {
                path_coords,
                length_m,
            }
        }
        Err(EngineError::Unreachable { .. }) => SegmentResult::Fallback,
        Err(_) => SegmentResult::Fallback,
    }
}

/// Append coordinates, dropping a leading point that duplicates the
/// junction with the previous segment.
fn append_dedup(coords: &mut Vec<Waypoint>, segment: Vec<Waypoint>) {
    for point in segment {
        let duplicate = coords.last().map(|prev| {
            (prev.lat - point.lat).abs() < JUNCTION_EPSILON_DEG
                && (prev.lng - point.lng).abs() < JUNCTION_EPSILON_DEG
        });
        if duplicate != Some(true) {
            coords.push(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_graph::{GraphKind, RoadGraph, RoadSnapshot, SnapshotEdge, SnapshotNode};

    fn corridor_graph() -> GraphSet {
        // Three nodes in a line along a street in Ürgüp, ~110 m apart.
        let layout: Vec<(i64, f64, f64, Vec<(i64, u32)>)> = vec![
            (100, 38.6430, 34.8210, vec![(200, 110)]),
            (200, 38.6440, 34.8220, vec![(100, 110), (300, 110)]),
            (300, 38.6450, 34.8230, vec![(200, 110)]),
        ];
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let idx_of =
            |id: i64| layout.iter().position(|(sid, ..)| *sid == id).unwrap() as u32;
        for (osm_id, lat, lng, out) in &layout {
            nodes.push(SnapshotNode {
                osm_id: *osm_id,
                lat: *lat,
                lng: *lng,
                first_edge_idx: edges.len() as u32,
            });
            for (target, length_m) in out {
                edges.push(SnapshotEdge {
                    target_node: idx_of(*target),
                    length_mm: length_m * 1000,
                });
            }
        }
        GraphSet {
            walking: Some(RoadGraph::from_snapshot(
                GraphKind::Walking,
                RoadSnapshot { nodes, edges },
            )),
            driving: None,
        }
    }

    fn three_waypoints() -> Vec<Waypoint> {
        vec![
            Waypoint::new(38.6431, 34.8213),
            Waypoint::new(38.6441, 34.8223),
            Waypoint::new(38.6451, 34.8233),
        ]
    }

    #[test]
    fn graph_absent_falls_back_to_straight_segments() {
        let built = build_route(
            &GraphSet::empty(),
            &three_waypoints(),
            TravelMode::Walking,
            false,
            None,
        )
        .unwrap();

        assert!(built.has_fallback_segments);
        assert_eq!(built.linestring.points.len(), 3);
        // two ~141 m diagonals
        assert!(
            built.total_distance_km > 0.26 && built.total_distance_km < 0.31,
            "got {}",
            built.total_distance_km
        );
        assert!(built.wkt.starts_with("LINESTRING(34.8213 38.6431"));
    }

    #[test]
    fn snapped_build_keeps_literal_endpoints() {
        let built = build_route(
            &corridor_graph(),
            &three_waypoints(),
            TravelMode::Walking,
            false,
            None,
        )
        .unwrap();

        assert!(!built.has_fallback_segments);
        let first = &built.linestring.points[0];
        let last = &built.linestring.points[built.linestring.points.len() - 1];
        // endpoint invariant: literal waypoints, within 1 m
        assert!(crate::haversine_m(first.y, first.x, 38.6431, 34.8213) < 1.0);
        assert!(crate::haversine_m(last.y, last.x, 38.6451, 34.8233) < 1.0);
    }

    #[test]
    fn circular_route_closes_on_itself() {
        let waypoints = vec![
            Waypoint::new(38.6431, 34.8213),
            Waypoint::new(38.6441, 34.8223),
            Waypoint::new(38.6451, 34.8233),
        ];
        let built = build_route(
            &GraphSet::empty(),
            &waypoints,
            TravelMode::Hiking,
            true,
            None,
        )
        .unwrap();

        let first = &built.linestring.points[0];
        let last = &built.linestring.points[built.linestring.points.len() - 1];
        assert!(crate::haversine_m(first.y, first.x, last.y, last.x) < 1.0);
    }

    #[test]
    fn insufficient_waypoints_rejected() {
        for wps in [vec![], vec![Waypoint::new(38.6, 34.9)]] {
            match build_route(&GraphSet::empty(), &wps, TravelMode::Walking, false, None) {
                Err(EngineError::InvalidInput(msg)) => {
                    assert!(msg.contains("insufficient waypoints"), "{}", msg)
                }
                other => panic!("expected InvalidInput, got {:?}", other.map(|b| b.wkt)),
            }
        }
    }

    #[test]
    fn identical_nearest_nodes_collapse_silently() {
        // Two waypoints a couple of metres apart snap to the same
        // graph node; the build still emits a valid two-point line.
        let waypoints = vec![
            Waypoint::new(38.64305, 34.82103),
            Waypoint::new(38.64306, 34.82104),
        ];
        let built = build_route(
            &corridor_graph(),
            &waypoints,
            TravelMode::Walking,
            false,
            None,
        )
        .unwrap();
        assert_eq!(built.linestring.points.len(), 2);
        assert!(!built.has_fallback_segments);
    }

    #[test]
    fn expired_deadline_times_out_with_the_configured_budget() {
        let budget = std::time::Duration::from_secs(7);
        let deadline = Deadline::expiring_at(
            std::time::Instant::now() - std::time::Duration::from_secs(1),
            budget,
        );
        match build_route(
            &GraphSet::empty(),
            &three_waypoints(),
            TravelMode::Walking,
            false,
            Some(deadline),
        ) {
            Err(EngineError::Timeout(secs)) => assert_eq!(secs, 7),
            other => panic!("expected Timeout, got {:?}", other.map(|b| b.wkt)),
        }
    }

    #[test]
    fn polyline_waypoints_follow_the_snapped_geometry() {
        let built = build_route(
            &corridor_graph(),
            &three_waypoints(),
            TravelMode::Walking,
            false,
            None,
        )
        .unwrap();

        let polyline = built.polyline_waypoints();
        assert_eq!(polyline.len(), built.linestring.points.len());
        for (w, p) in polyline.iter().zip(built.linestring.points.iter()) {
            assert!((w.lat - p.y).abs() < 1e-12);
            assert!((w.lng - p.x).abs() < 1e-12);
        }

        // Arc length of the emitted polyline tracks the reported
        // total, so an elevation profile resampled over it covers the
        // whole route.
        let arc_m: f64 = polyline
            .windows(2)
            .map(|w| crate::haversine_m(w[0].lat, w[0].lng, w[1].lat, w[1].lng))
            .sum();
        assert!(
            (arc_m - built.total_distance_km * 1000.0).abs() < 30.0,
            "arc {} vs total {}",
            arc_m,
            built.total_distance_km * 1000.0
        );
    }

    #[test]
    fn cycling_without_driving_graph_falls_back() {
        // corridor_graph has only a walking graph; cycling routes on
        // the driving graph and must therefore fall back.
        let built = build_route(
            &corridor_graph(),
            &three_waypoints(),
            TravelMode::Cycling,
            false,
            None,
        )
        .unwrap();
        assert!(built.has_fallback_segments);
    }
}
