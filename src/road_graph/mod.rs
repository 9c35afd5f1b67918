//! Road network graphs for the Ürgüp region.
//!
//! One graph per concrete travel mode (walking, driving; cycling is
//! served by the driving graph). Topology is stored as an adjacency
//! array (CSR): nodes sorted by id carry `first_edge_idx` into a flat
//! edge array, which keeps the Dijkstra hot path cache friendly. The
//! on-disk form is a Protocol Buffers snapshot so rebuilds from OSM
//! are only needed when the region changes.

pub mod builder;

#[cfg(test)]
mod graph_tests;

use crate::errors::{EngineError, EngineResult};
use prost::Message;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphKind {
    Walking,
    Driving,
}

impl GraphKind {
    pub fn snapshot_filename(&self) -> &'static str {
        match self {
            GraphKind::Walking => "walking.graph.pbf",
            GraphKind::Driving => "driving.graph.pbf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Walking => "walking",
            GraphKind::Driving => "driving",
        }
    }
}

/// On-disk snapshot of one mode's road network.
#[derive(Clone, PartialEq, Message)]
pub struct RoadSnapshot {
    /// All nodes, sorted by OSM id. `first_edge_idx` points into
    /// `edges`; a node's out-edges end where the next node's begin.
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<SnapshotNode>,

    /// Flat array of directed edges.
    #[prost(message, repeated, tag = "2")]
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SnapshotNode {
    #[prost(int64, tag = "1")]
    pub osm_id: i64,

    #[prost(double, tag = "2")]
    pub lat: f64,

    #[prost(double, tag = "3")]
    pub lng: f64,

    /// Index of this node's first out-edge in the flat edge array.
    #[prost(uint32, tag = "4")]
    pub first_edge_idx: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SnapshotEdge {
    /// Index (not OSM id) of the destination node.
    #[prost(uint32, tag = "1")]
    pub target_node: u32,

    /// Length in millimetres; u32 allows segments up to ~4,294 km.
    #[prost(uint32, tag = "2")]
    pub length_mm: u32,
}

/// Save a snapshot to disk. Buffered; the payload is encoded fully
/// before the first byte is written.
pub fn save_snapshot(snapshot: &RoadSnapshot, path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let payload = snapshot.encode_to_vec();
    writer.write_all(&payload)?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> std::io::Result<RoadSnapshot> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    RoadSnapshot::decode(&buffer[..]).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("road snapshot decode error: {}", e),
        )
    })
}

/// In-memory routing structure for one mode. Immutable once built;
/// readers share it behind an `Arc` without locking.
pub struct RoadGraph {
    pub kind: GraphKind,
    snapshot: RoadSnapshot,
    id_to_idx: HashMap<i64, u32>,
    spatial: RTree<GeomWithData<[f64; 2], u32>>,
}

#[derive(Copy, Clone, PartialEq)]
struct HeapState {
    cost: u64,
    node_idx: u32,
}

impl Eq for HeapState {}

impl Ord for HeapState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| self.node_idx.cmp(&other.node_idx))
    }
}

impl PartialOrd for HeapState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl RoadGraph {
    pub fn from_snapshot(kind: GraphKind, snapshot: RoadSnapshot) -> RoadGraph {
        let mut id_to_idx = HashMap::with_capacity(snapshot.nodes.len());
        let mut spatial_entries = Vec::with_capacity(snapshot.nodes.len());
        for (idx, node) in snapshot.nodes.iter().enumerate() {
            id_to_idx.insert(node.osm_id, idx as u32);
            spatial_entries.push(GeomWithData::new([node.lng, node.lat], idx as u32));
        }
        let spatial = RTree::bulk_load(spatial_entries);
        RoadGraph {
            kind,
            snapshot,
            id_to_idx,
            spatial,
        }
    }

    pub fn load(kind: GraphKind, snapshot_dir: &Path) -> std::io::Result<RoadGraph> {
        let snapshot = load_snapshot(&snapshot_dir.join(kind.snapshot_filename()))?;
        Ok(RoadGraph::from_snapshot(kind, snapshot))
    }

    pub fn node_count(&self) -> usize {
        self.snapshot.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.snapshot.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.nodes.is_empty()
    }

    pub fn coords_of_node(&self, osm_id: i64) -> Option<(f64, f64)> {
        let idx = *self.id_to_idx.get(&osm_id)?;
        let node = &self.snapshot.nodes[idx as usize];
        Some((node.lat, node.lng))
    }

    /// Nearest graph node to a coordinate. Equidistant candidates
    /// resolve to the smallest OSM id so snapping is deterministic.
    pub fn nearest_node(&self, lat: f64, lng: f64) -> EngineResult<i64> {
        let query = [lng, lat];
        let first = self
            .spatial
            .nearest_neighbor(&query)
            .ok_or_else(|| EngineError::InvalidInput("road graph is empty".to_string()))?;

        let best_planar = planar_dist2(first.geom(), &query);
        let mut best_id = self.snapshot.nodes[first.data as usize].osm_id;

        // Equidistant in degrees rarely means bit-identical squared
        // distances, so the tie window scales with the best distance.
        let tie_window = best_planar * 1e-9 + 1e-15;
        for candidate in self.spatial.nearest_neighbor_iter(&query) {
            if planar_dist2(candidate.geom(), &query) > best_planar + tie_window {
                break;
            }
            let osm_id = self.snapshot.nodes[candidate.data as usize].osm_id;
            if osm_id < best_id {
                best_id = osm_id;
            }
        }

        Ok(best_id)
    }

    fn out_edges(&self, node_idx: u32) -> &[SnapshotEdge] {
        let start = self.snapshot.nodes[node_idx as usize].first_edge_idx as usize;
        let end = if (node_idx as usize) + 1 < self.snapshot.nodes.len() {
            self.snapshot.nodes[node_idx as usize + 1].first_edge_idx as usize
        } else {
            self.snapshot.edges.len()
        };
        &self.snapshot.edges[start..end]
    }

    /// Shortest path by summed edge length between two OSM node ids.
    /// Plain binary-heap Dijkstra; edge weights are non-negative by
    /// construction.
    pub fn shortest_path(&self, source: i64, target: i64) -> EngineResult<Vec<i64>> {
        let source_idx = *self
            .id_to_idx
            .get(&source)
            .ok_or_else(|| EngineError::NotFound(format!("graph node {}", source)))?;
        let target_idx = *self
            .id_to_idx
            .get(&target)
            .ok_or_else(|| EngineError::NotFound(format!("graph node {}", target)))?;

        if source_idx == target_idx {
            return Ok(vec![source]);
        }

        let mut dist: HashMap<u32, u64> = HashMap::new();
        let mut predecessors: HashMap<u32, u32> = HashMap::new();
        let mut heap = std::collections::BinaryHeap::new();

        dist.insert(source_idx, 0);
        heap.push(HeapState {
            cost: 0,
            node_idx: source_idx,
        });

        while let Some(HeapState { cost, node_idx }) = heap.pop() {
            if cost > *dist.get(&node_idx).unwrap_or(&u64::MAX) {
                continue;
            }
            if node_idx == target_idx {
                return Ok(self.reconstruct(source_idx, target_idx, &predecessors));
            }

            for edge in self.out_edges(node_idx) {
                let next_cost = cost + edge.length_mm as u64;
                if next_cost < *dist.get(&edge.target_node).unwrap_or(&u64::MAX) {
                    dist.insert(edge.target_node, next_cost);
                    predecessors.insert(edge.target_node, node_idx);
                    heap.push(HeapState {
                        cost: next_cost,
                        node_idx: edge.target_node,
                    });
                }
            }
        }

        Err(EngineError::Unreachable {
            source_node: source,
            target_node: target,
        })
    }

    /// Summed length in metres of a path previously returned by
    /// `shortest_path`.
    pub fn path_length_m(&self, path: &[i64]) -> f64 {
        let mut total_mm: u64 = 0;
        for pair in path.windows(2) {
            let from_idx = match self.id_to_idx.get(&pair[0]) {
                Some(idx) => *idx,
                None => continue,
            };
            let to_idx = match self.id_to_idx.get(&pair[1]) {
                Some(idx) => *idx,
                None => continue,
            };
            if let Some(edge) = self
                .out_edges(from_idx)
                .iter()
                .find(|e| e.target_node == to_idx)
            {
                total_mm += edge.length_mm as u64;
            }
        }
        total_mm as f64 / 1000.0
    }

    /// Ordered `(lat, lng)` coordinates for a node id path.
    pub fn coords_of_path(&self, path: &[i64]) -> Vec<(f64, f64)> {
        path.iter()
            .filter_map(|osm_id| self.coords_of_node(*osm_id))
            .collect()
    }

    fn reconstruct(
        &self,
        source_idx: u32,
        target_idx: u32,
        predecessors: &HashMap<u32, u32>,
    ) -> Vec<i64> {
        let mut indices = vec![target_idx];
        let mut current = target_idx;
        while current != source_idx {
            match predecessors.get(&current) {
                Some(prev) => {
                    indices.push(*prev);
                    current = *prev;
                }
                None => break,
            }
        }
        indices.reverse();
        indices
            .into_iter()
            .map(|idx| self.snapshot.nodes[idx as usize].osm_id)
            .collect()
    }
}

fn planar_dist2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// The pair of concrete graphs the engine routes against. Loaded once
/// at startup and shared read-only.
pub struct GraphSet {
    pub walking: Option<RoadGraph>,
    pub driving: Option<RoadGraph>,
}

impl GraphSet {
    /// Load whatever snapshots exist under `snapshot_dir`. A missing
    /// snapshot is not an error here; the route builder falls back to
    /// geodesic segments when the graph for a mode is absent.
    pub fn load_available(snapshot_dir: &Path) -> GraphSet {
        let walking = match RoadGraph::load(GraphKind::Walking, snapshot_dir) {
            Ok(g) => {
                log::info!(
                    "loaded walking graph: {} nodes, {} edges",
                    g.node_count(),
                    g.edge_count()
                );
                Some(g)
            }
            Err(e) => {
                log::warn!("walking graph snapshot unavailable: {}", e);
                None
            }
        };
        let driving = match RoadGraph::load(GraphKind::Driving, snapshot_dir) {
            Ok(g) => {
                log::info!(
                    "loaded driving graph: {} nodes, {} edges",
                    g.node_count(),
                    g.edge_count()
                );
                Some(g)
            }
            Err(e) => {
                log::warn!("driving graph snapshot unavailable: {}", e);
                None
            }
        };
        GraphSet { walking, driving }
    }

    pub fn empty() -> GraphSet {
        GraphSet {
            walking: None,
            driving: None,
        }
    }

    pub fn for_mode(&self, mode: crate::TravelMode) -> Option<&RoadGraph> {
        match mode.graph_kind() {
            GraphKind::Walking => self.walking.as_ref(),
            GraphKind::Driving => self.driving.as_ref(),
        }
    }
}
