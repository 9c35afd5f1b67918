//! Builds per-mode road graph snapshots from an OSM extract.
//!
//! The extract is filtered down to highway ways usable by each mode,
//! clipped to the region bounding box, and flattened into the CSR
//! snapshot layout. Run offline by the `graph_fetch` bin; the engine
//! itself only ever loads finished snapshots.

use super::{GraphKind, RoadSnapshot, SnapshotEdge, SnapshotNode};
use crate::errors::{EngineError, EngineResult};
use osmpbfreader::{OsmObj, OsmPbfReader};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};
use std::path::Path;

/// Region bounding box, degrees.
#[derive(Copy, Clone, Debug)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Ürgüp and surroundings (Göreme, Ortahisar, Mustafapaşa).
pub const URGUP_REGION: BoundingBox = BoundingBox {
    min_lat: 38.50,
    min_lng: 34.75,
    max_lat: 38.75,
    max_lng: 35.05,
};

fn walkable(highway: &str) -> bool {
    matches!(
        highway,
        "footway"
            | "path"
            | "pedestrian"
            | "steps"
            | "track"
            | "living_street"
            | "residential"
            | "service"
            | "unclassified"
            | "tertiary"
            | "secondary"
            | "primary"
    )
}

fn drivable(highway: &str) -> bool {
    matches!(
        highway,
        "motorway"
            | "motorway_link"
            | "trunk"
            | "trunk_link"
            | "primary"
            | "primary_link"
            | "secondary"
            | "secondary_link"
            | "tertiary"
            | "tertiary_link"
            | "residential"
            | "living_street"
            | "service"
            | "unclassified"
            | "track"
    )
}

fn way_matches(kind: GraphKind, highway: &str) -> bool {
    match kind {
        GraphKind::Walking => walkable(highway),
        GraphKind::Driving => drivable(highway),
    }
}

struct FilteredWay {
    node_ids: Vec<i64>,
    oneway: bool,
}

/// Build one mode's snapshot from an OSM pbf stream. Two passes over
/// the file: ways first, then coordinates for the nodes those ways
/// reference. Nodes outside the bounding box are dropped along with
/// the edges that touch them.
pub fn build_snapshot<R: Read + Seek>(
    reader: &mut OsmPbfReader<R>,
    kind: GraphKind,
    bbox: &BoundingBox,
) -> EngineResult<RoadSnapshot> {
    let mut ways: Vec<FilteredWay> = Vec::new();
    let mut wanted_nodes: HashSet<i64> = HashSet::new();

    for obj in reader.iter() {
        let obj = obj.map_err(|e| EngineError::InvalidInput(format!("osm read: {:?}", e)))?;
        if let OsmObj::Way(way) = obj {
            let highway = match way.tags.get("highway") {
                Some(h) => h.as_str(),
                None => continue,
            };
            if !way_matches(kind, highway) {
                continue;
            }
            if way.nodes.len() < 2 {
                continue;
            }
            // Oneway restrictions only matter to vehicles.
            let oneway = kind == GraphKind::Driving
                && way
                    .tags
                    .get("oneway")
                    .map(|v| matches!(v.as_str(), "yes" | "1" | "true"))
                    .unwrap_or(false);
            let node_ids: Vec<i64> = way.nodes.iter().map(|n| n.0).collect();
            wanted_nodes.extend(node_ids.iter().copied());
            ways.push(FilteredWay { node_ids, oneway });
        }
    }

    reader
        .rewind()
        .map_err(|e| EngineError::InvalidInput(format!("osm rewind: {:?}", e)))?;

    let mut coords: HashMap<i64, (f64, f64)> = HashMap::with_capacity(wanted_nodes.len());
    for obj in reader.iter() {
        let obj = obj.map_err(|e| EngineError::InvalidInput(format!("osm read: {:?}", e)))?;
        if let OsmObj::Node(node) = obj {
            if wanted_nodes.contains(&node.id.0) && bbox.contains(node.lat(), node.lon()) {
                coords.insert(node.id.0, (node.lat(), node.lon()));
            }
        }
    }

    log::info!(
        "{} graph: {} candidate ways, {} in-region nodes",
        kind.as_str(),
        ways.len(),
        coords.len()
    );

    Ok(assemble_csr(&ways, &coords))
}

/// Flatten filtered ways into the sorted-node CSR layout.
fn assemble_csr(ways: &[FilteredWay], coords: &HashMap<i64, (f64, f64)>) -> RoadSnapshot {
    let mut adjacency: HashMap<i64, Vec<(i64, u32)>> = HashMap::new();

    for way in ways {
        for pair in way.node_ids.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let (from_coord, to_coord) = match (coords.get(&from), coords.get(&to)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue, // clipped at the bbox edge
            };
            let length_m =
                crate::haversine_m(from_coord.0, from_coord.1, to_coord.0, to_coord.1);
            let length_mm = (length_m * 1000.0).round().min(u32::MAX as f64) as u32;

            adjacency.entry(from).or_default().push((to, length_mm));
            if !way.oneway {
                adjacency.entry(to).or_default().push((from, length_mm));
            } else {
                // target still has to exist as a node even without
                // out-edges of its own
                adjacency.entry(to).or_default();
            }
        }
    }

    let mut node_ids: Vec<i64> = adjacency.keys().copied().collect();
    node_ids.sort_unstable();

    let idx_of: HashMap<i64, u32> = node_ids
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx as u32))
        .collect();

    let mut nodes = Vec::with_capacity(node_ids.len());
    let mut edges = Vec::new();
    for id in &node_ids {
        let (lat, lng) = coords[id];
        nodes.push(SnapshotNode {
            osm_id: *id,
            lat,
            lng,
            first_edge_idx: edges.len() as u32,
        });
        let mut out = adjacency[id].clone();
        out.sort_unstable_by_key(|(target, _)| *target);
        out.dedup();
        for (target, length_mm) in out {
            edges.push(SnapshotEdge {
                target_node: idx_of[&target],
                length_mm,
            });
        }
    }

    RoadSnapshot { nodes, edges }
}

/// Build and persist both mode snapshots from one extract file.
pub fn build_all_from_file(
    extract_path: &Path,
    snapshot_dir: &Path,
    bbox: &BoundingBox,
) -> EngineResult<()> {
    std::fs::create_dir_all(snapshot_dir)
        .map_err(|e| EngineError::InvalidInput(format!("snapshot dir: {}", e)))?;

    for kind in [GraphKind::Walking, GraphKind::Driving] {
        let file = std::fs::File::open(extract_path)
            .map_err(|e| EngineError::InvalidInput(format!("open {:?}: {}", extract_path, e)))?;
        let mut reader = OsmPbfReader::new(std::io::BufReader::new(file));
        let snapshot = build_snapshot(&mut reader, kind, bbox)?;
        let out_path = snapshot_dir.join(kind.snapshot_filename());
        super::save_snapshot(&snapshot, &out_path)
            .map_err(|e| EngineError::InvalidInput(format!("write {:?}: {}", out_path, e)))?;
        log::info!(
            "wrote {} snapshot: {} nodes, {} edges",
            kind.as_str(),
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
    }
    Ok(())
}

/// Download a Geofabrik-style extract to disk.
pub async fn download_extract(url: &str, dest: &Path) -> EngineResult<()> {
    log::info!("downloading OSM extract {}", url);
    let response = reqwest::get(url)
        .await
        .map_err(|e| EngineError::ExternalProvider(format!("osm download: {}", e)))?;
    if !response.status().is_success() {
        return Err(EngineError::ExternalProvider(format!(
            "osm download: HTTP {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| EngineError::ExternalProvider(format!("osm download body: {}", e)))?;
    std::fs::write(dest, &bytes)
        .map_err(|e| EngineError::InvalidInput(format!("write {:?}: {}", dest, e)))?;
    log::info!("wrote {} bytes to {:?}", bytes.len(), dest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highway_filters_split_by_mode() {
        assert!(way_matches(GraphKind::Walking, "footway"));
        assert!(!way_matches(GraphKind::Driving, "footway"));
        assert!(way_matches(GraphKind::Driving, "motorway"));
        assert!(!way_matches(GraphKind::Walking, "motorway"));
        // shared residential fabric
        assert!(way_matches(GraphKind::Walking, "residential"));
        assert!(way_matches(GraphKind::Driving, "residential"));
    }

    #[test]
    fn bbox_membership() {
        assert!(URGUP_REGION.contains(38.6312, 34.9119));
        assert!(!URGUP_REGION.contains(39.0, 34.9119));
    }

    #[test]
    fn csr_assembly_bidirectional() {
        let mut coords = HashMap::new();
        coords.insert(10, (38.6431, 34.8213));
        coords.insert(20, (38.6441, 34.8223));
        coords.insert(30, (38.6451, 34.8233));
        let ways = vec![FilteredWay {
            node_ids: vec![10, 20, 30],
            oneway: false,
        }];

        let snapshot = assemble_csr(&ways, &coords);
        assert_eq!(snapshot.nodes.len(), 3);
        // each of the two segments contributes both directions
        assert_eq!(snapshot.edges.len(), 4);
        // nodes sorted by id, CSR offsets monotonic
        assert!(snapshot.nodes.windows(2).all(|w| w[0].osm_id < w[1].osm_id));
        assert!(
            snapshot
                .nodes
                .windows(2)
                .all(|w| w[0].first_edge_idx <= w[1].first_edge_idx)
        );
    }

    #[test]
    fn csr_assembly_oneway_keeps_target_node() {
        let mut coords = HashMap::new();
        coords.insert(1, (38.60, 34.90));
        coords.insert(2, (38.61, 34.91));
        let ways = vec![FilteredWay {
            node_ids: vec![1, 2],
            oneway: true,
        }];

        let snapshot = assemble_csr(&ways, &coords);
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[test]
    fn clipped_nodes_drop_their_edges() {
        let mut coords = HashMap::new();
        coords.insert(1, (38.60, 34.90));
        // node 2 missing: outside the bbox
        let ways = vec![FilteredWay {
            node_ids: vec![1, 2],
            oneway: false,
        }];

        let snapshot = assemble_csr(&ways, &coords);
        assert!(snapshot.edges.is_empty());
    }
}
