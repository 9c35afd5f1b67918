use diesel::prelude::*;
use serde_json::Value;

/// A user-supplied anchor coordinate, as opposed to an intermediate
/// graph node. Stored on the route as a JSON array.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lng: f64) -> Waypoint {
        Waypoint { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lng >= -180.0 && self.lng <= 180.0 && self.lat >= -90.0 && self.lat <= 90.0
    }
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::pois)]
pub struct Poi {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub location: postgis_diesel::types::Point,
    pub altitude: Option<f64>,
    pub description: Option<String>,
    pub attributes: Option<Value>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::pois)]
pub struct NewPoi {
    pub name: String,
    pub category: String,
    pub location: postgis_diesel::types::Point,
    pub altitude: Option<f64>,
    pub description: Option<String>,
    pub attributes: Option<Value>,
    pub is_active: bool,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::routes)]
pub struct Route {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub route_type: String,
    pub difficulty_level: i32,
    pub estimated_duration: Option<i32>,
    pub total_distance: Option<f64>,
    pub elevation_gain: Option<i32>,
    pub route_geometry: Option<postgis_diesel::types::LineString<postgis_diesel::types::Point>>,
    pub waypoints: Option<Value>,
    pub start_poi_id: Option<i64>,
    pub end_poi_id: Option<i64>,
    pub is_circular: bool,
    pub season_availability: Option<Value>,
    pub tags: Option<Vec<Option<String>>>,
    pub elevation_profile: Option<Value>,
    pub elevation_resolution: i32,
    pub import_source: Option<String>,
    pub original_filename: Option<String>,
    pub import_metadata: Option<Value>,
    pub imported_by: Option<String>,
    pub import_date: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub is_active: bool,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::routes)]
pub struct NewRoute {
    pub name: String,
    pub description: Option<String>,
    pub route_type: String,
    pub difficulty_level: i32,
    pub estimated_duration: Option<i32>,
    pub total_distance: Option<f64>,
    pub elevation_gain: Option<i32>,
    pub route_geometry: Option<postgis_diesel::types::LineString<postgis_diesel::types::Point>>,
    pub waypoints: Option<Value>,
    pub start_poi_id: Option<i64>,
    pub end_poi_id: Option<i64>,
    pub is_circular: bool,
    pub season_availability: Option<Value>,
    pub tags: Option<Vec<Option<String>>>,
    pub elevation_profile: Option<Value>,
    pub elevation_resolution: i32,
    pub import_source: Option<String>,
    pub original_filename: Option<String>,
    pub import_metadata: Option<Value>,
    pub imported_by: Option<String>,
    pub import_date: Option<chrono::DateTime<chrono::Utc>>,
    pub is_active: bool,
}

/// Mandatory ordered stop on a route. Distinct from the derived
/// proximity index in `route_poi_associations`.
#[derive(Queryable, Selectable, Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_pois)]
pub struct RoutePoiStop {
    pub id: i64,
    pub route_id: i64,
    pub poi_id: i64,
    pub order_in_route: i32,
    pub is_mandatory: bool,
    pub estimated_time_at_poi: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_poi_associations)]
pub struct RoutePoiAssociation {
    pub id: i64,
    pub route_id: i64,
    pub poi_id: i64,
    pub sequence_order: Option<i32>,
    pub distance_from_route: f64,
    pub is_waypoint: bool,
    pub association_type: String,
    pub association_score: f64,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_poi_associations)]
pub struct NewRoutePoiAssociation {
    pub route_id: i64,
    pub poi_id: i64,
    pub sequence_order: Option<i32>,
    pub distance_from_route: f64,
    pub is_waypoint: bool,
    pub association_type: String,
    pub association_score: f64,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_ratings)]
pub struct RouteRating {
    pub route_id: i64,
    pub category: String,
    pub rating: i32,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_imports)]
pub struct RouteImport {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub import_metadata: Option<Value>,
    pub import_status: String,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Insertable, Clone, Debug)]
#[diesel(table_name = crate::schema::route_imports)]
pub struct NewRouteImport {
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub import_metadata: Option<Value>,
    pub import_status: String,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_by: Option<String>,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = crate::schema::schema_migrations)]
pub struct SchemaMigrationRow {
    pub id: i64,
    pub migration_name: String,
    pub migration_version: String,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub execution_time_ms: i32,
    pub success: bool,
    pub error_detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waypoint_bounds() {
        assert!(Waypoint::new(38.6431, 34.8213).is_valid());
        assert!(!Waypoint::new(91.0, 0.0).is_valid());
        assert!(!Waypoint::new(0.0, -180.5).is_valid());
    }
}
