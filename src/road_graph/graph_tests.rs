use super::*;
use crate::errors::EngineError;

/// Small diamond network around Ürgüp used by the routing tests.
///
/// ```text
///      (2)
///     /   \
///  (1)     (4) --- (5)
///     \   /
///      (3)
/// ```
/// The 1-3-4 side is shorter than 1-2-4. Node 6 is isolated.
fn diamond() -> RoadGraph {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    // (osm_id, lat, lng, out edges as (target osm_id, length_m))
    let layout: Vec<(i64, f64, f64, Vec<(i64, u32)>)> = vec![
        (1, 38.6300, 34.9000, vec![(2, 500), (3, 300)]),
        (2, 38.6350, 34.9050, vec![(1, 500), (4, 500)]),
        (3, 38.6250, 34.9050, vec![(1, 300), (4, 300)]),
        (4, 38.6300, 34.9100, vec![(2, 500), (3, 300), (5, 200)]),
        (5, 38.6300, 34.9150, vec![(4, 200)]),
        (6, 38.7000, 34.9900, vec![]),
    ];

    let idx_of = |id: i64| layout.iter().position(|(sid, ..)| *sid == id).unwrap() as u32;

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

    RoadGraph::from_snapshot(GraphKind::Walking, RoadSnapshot { nodes, edges })
}

#[test]
fn snapshot_round_trip_through_disk() {
    let graph = diamond();
    let dir = std::env::temp_dir().join("kapadokya_graph_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(GraphKind::Walking.snapshot_filename());

    save_snapshot(&graph.snapshot, &path).unwrap();
    let loaded = load_snapshot(&path).unwrap();
    assert_eq!(loaded.nodes.len(), 6);
    assert_eq!(loaded, graph.snapshot);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn dijkstra_prefers_the_shorter_side() {
    let graph = diamond();
    let path = graph.shortest_path(1, 4).unwrap();
    assert_eq!(path, vec![1, 3, 4]);
    assert!((graph.path_length_m(&path) - 600.0).abs() < 1e-6);
}

#[test]
fn dijkstra_trivial_and_chained() {
    let graph = diamond();
    assert_eq!(graph.shortest_path(2, 2).unwrap(), vec![2]);
    assert_eq!(graph.shortest_path(1, 5).unwrap(), vec![1, 3, 4, 5]);
}

#[test]
fn unreachable_is_reported_not_panicked() {
    let graph = diamond();
    match graph.shortest_path(1, 6) {
        Err(EngineError::Unreachable {
            source_node,
            target_node,
        }) => {
            assert_eq!(source_node, 1);
            assert_eq!(target_node, 6);
        }
        other => panic!("expected Unreachable, got {:?}", other.map(|p| p.len())),
    }
}

#[test]
fn unknown_node_is_not_found() {
    let graph = diamond();
    assert!(matches!(
        graph.shortest_path(1, 999),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn nearest_node_snaps_and_breaks_ties_by_id() {
    let graph = diamond();
    // Right on node 5.
    assert_eq!(graph.nearest_node(38.6300, 34.9150).unwrap(), 5);
    // Slightly north of node 1, still closest to it.
    assert_eq!(graph.nearest_node(38.6305, 34.9001).unwrap(), 1);
    // The diamond centre is equidistant from nodes 1, 2, 3 and 4:
    // the smallest id must win.
    assert_eq!(graph.nearest_node(38.6300, 34.9050).unwrap(), 1);
}

#[test]
fn coords_of_path_orders_lat_lng() {
    let graph = diamond();
    let coords = graph.coords_of_path(&[1, 3, 4]);
    assert_eq!(coords.len(), 3);
    assert!((coords[0].0 - 38.6300).abs() < 1e-9); // lat first
    assert!((coords[0].1 - 34.9000).abs() < 1e-9);
}
