// Ürgüp / Cappadocia points-of-interest and tourist-route backend.
// Core engine: route geometry generation against an OSM road network,
// elevation profiles, and POI association maintenance over PostGIS.

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

#[macro_use]
extern crate serde;

pub mod associations;
pub mod config;
pub mod elevation;
pub mod errors;
pub mod import;
pub mod migrations;
pub mod models;
pub mod postgres_tools;
pub mod road_graph;
pub mod route_builder;
pub mod schema;
pub mod store;

pub const WGS_84_SRID: u32 = 4326;

/// Travel modes supported by the route engine.
///
/// Cycling routes over the driving network; there is no separate
/// cycling snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walking,
    Hiking,
    Cycling,
    Driving,
}

impl TravelMode {
    pub fn parse(s: &str) -> Option<TravelMode> {
        match s {
            "walking" => Some(TravelMode::Walking),
            "hiking" => Some(TravelMode::Hiking),
            "cycling" => Some(TravelMode::Cycling),
            "driving" => Some(TravelMode::Driving),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Hiking => "hiking",
            TravelMode::Cycling => "cycling",
            TravelMode::Driving => "driving",
        }
    }

    /// Which concrete graph serves this mode.
    pub fn graph_kind(&self) -> road_graph::GraphKind {
        match self {
            TravelMode::Walking | TravelMode::Hiking => road_graph::GraphKind::Walking,
            TravelMode::Cycling | TravelMode::Driving => road_graph::GraphKind::Driving,
        }
    }
}

/// POI categories, closed set.
pub const POI_CATEGORIES: [&str; 5] = [
    "gastronomic",
    "cultural",
    "artisanal",
    "outdoor",
    "lodging",
];

pub fn valid_poi_category(category: &str) -> bool {
    POI_CATEGORIES.contains(&category)
}

/// Great-circle distance in metres between two WGS84 coordinates.
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    use geo::prelude::*;
    let a = geo::Point::new(lng1, lat1);
    let b = geo::Point::new(lng2, lat2);
    a.haversine_distance(&b)
}

pub fn duration_to_ms(duration: std::time::Duration) -> i32 {
    duration.as_millis().min(i32::MAX as u128) as i32
}

/// Cooperative deadline for long operations. Carries the configured
/// budget so expiry reports the timeout that was actually in force.
#[derive(Copy, Clone, Debug)]
pub struct Deadline {
    at: std::time::Instant,
    budget_secs: u64,
}

impl Deadline {
    pub fn after(budget: std::time::Duration) -> Deadline {
        Deadline::expiring_at(std::time::Instant::now() + budget, budget)
    }

    pub fn expiring_at(at: std::time::Instant, budget: std::time::Duration) -> Deadline {
        Deadline {
            at,
            budget_secs: budget.as_secs(),
        }
    }

    pub fn expired(&self) -> bool {
        std::time::Instant::now() >= self.at
    }

    pub fn budget_secs(&self) -> u64 {
        self.budget_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trip() {
        for s in ["walking", "hiking", "cycling", "driving"] {
            assert_eq!(TravelMode::parse(s).unwrap().as_str(), s);
        }
        assert!(TravelMode::parse("teleport").is_none());
    }

    #[test]
    fn cycling_shares_the_driving_graph() {
        assert_eq!(
            TravelMode::Cycling.graph_kind(),
            TravelMode::Driving.graph_kind()
        );
        assert_ne!(
            TravelMode::Walking.graph_kind(),
            TravelMode::Driving.graph_kind()
        );
    }

    #[test]
    fn haversine_sanity_urgup() {
        // Ürgüp centre to Temenni Hill, roughly 300 m.
        let d = haversine_m(38.6312, 34.9119, 38.6331, 34.9140);
        assert!(d > 200.0 && d < 400.0, "got {}", d);
    }
}
