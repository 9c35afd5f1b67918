// Diesel table definitions for the Ürgüp POI / route store.
// DDL lives in `migrations.rs`; keep the two in sync.

diesel::table! {
    use postgis_diesel::sql_types::*;
    use diesel::sql_types::*;

    pois (id) {
        id -> Int8,
        name -> Text,
        category -> Text,
        location -> Geography,
        altitude -> Nullable<Float8>,
        description -> Nullable<Text>,
        attributes -> Nullable<Jsonb>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use postgis_diesel::sql_types::*;
    use diesel::sql_types::*;

    routes (id) {
        id -> Int8,
        name -> Text,
        description -> Nullable<Text>,
        route_type -> Text,
        difficulty_level -> Int4,
        estimated_duration -> Nullable<Int4>,
        total_distance -> Nullable<Float8>,
        elevation_gain -> Nullable<Int4>,
        route_geometry -> Nullable<Geography>,
        waypoints -> Nullable<Jsonb>,
        start_poi_id -> Nullable<Int8>,
        end_poi_id -> Nullable<Int8>,
        is_circular -> Bool,
        season_availability -> Nullable<Jsonb>,
        tags -> Nullable<Array<Nullable<Text>>>,
        elevation_profile -> Nullable<Jsonb>,
        elevation_resolution -> Int4,
        import_source -> Nullable<Text>,
        original_filename -> Nullable<Text>,
        import_metadata -> Nullable<Jsonb>,
        imported_by -> Nullable<Text>,
        import_date -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        is_active -> Bool,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    route_pois (id) {
        id -> Int8,
        route_id -> Int8,
        poi_id -> Int8,
        order_in_route -> Int4,
        is_mandatory -> Bool,
        estimated_time_at_poi -> Nullable<Int4>,
        notes -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    route_poi_associations (id) {
        id -> Int8,
        route_id -> Int8,
        poi_id -> Int8,
        sequence_order -> Nullable<Int4>,
        distance_from_route -> Float8,
        is_waypoint -> Bool,
        association_type -> Text,
        association_score -> Float8,
        notes -> Nullable<Text>,
        created_by -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    route_ratings (route_id, category) {
        route_id -> Int8,
        category -> Text,
        rating -> Int4,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    route_imports (id) {
        id -> Int8,
        filename -> Text,
        original_filename -> Text,
        file_type -> Text,
        file_size -> Int8,
        file_hash -> Text,
        import_metadata -> Nullable<Jsonb>,
        import_status -> Text,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
        created_by -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    schema_migrations (id) {
        id -> Int8,
        migration_name -> Text,
        migration_version -> Text,
        executed_at -> Timestamptz,
        execution_time_ms -> Int4,
        success -> Bool,
        error_detail -> Nullable<Text>,
    }
}

diesel::joinable!(route_pois -> routes (route_id));
diesel::joinable!(route_pois -> pois (poi_id));
diesel::joinable!(route_poi_associations -> routes (route_id));
diesel::joinable!(route_poi_associations -> pois (poi_id));
diesel::joinable!(route_ratings -> routes (route_id));

diesel::allow_tables_to_appear_in_same_query!(
    pois,
    routes,
    route_pois,
    route_poi_associations,
    route_ratings,
    route_imports,
    schema_migrations,
);
