//! Schema migrations.
//!
//! An ordered registry of named migrations, each applied at most once
//! and recorded in `schema_migrations`. Every DDL statement is
//! idempotent on its own (`IF NOT EXISTS`, or an information_schema
//! probe for column adds), so a partially recorded history can always
//! be re-run. A failed migration is recorded with `success = false`
//! and stops the run without crashing the process.

use crate::errors::{EngineError, EngineResult};
use diesel::prelude::*;
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use diesel_async::SimpleAsyncConnection;
use diesel_async::scoped_futures::ScopedFutureExt;
use std::time::Instant;

pub struct Migration {
    pub name: &'static str,
    pub version: &'static str,
    pub sql: &'static str,
}

const BASELINE_SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS pois (
    id bigserial PRIMARY KEY,
    name text NOT NULL,
    category text NOT NULL,
    location geography(POINT, 4326) NOT NULL,
    altitude double precision,
    description text,
    attributes jsonb,
    is_active boolean NOT NULL DEFAULT TRUE,
    created_at timestamptz NOT NULL DEFAULT now(),
    updated_at timestamptz NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS pois_location_gist ON pois USING GIST (location);
CREATE INDEX IF NOT EXISTS pois_attributes_gin ON pois USING GIN (attributes);
CREATE INDEX IF NOT EXISTS pois_category_idx ON pois (category);
CREATE INDEX IF NOT EXISTS pois_is_active_idx ON pois (is_active);

CREATE TABLE IF NOT EXISTS routes (
    id bigserial PRIMARY KEY,
    name text NOT NULL,
    description text,
    route_type text NOT NULL
        CHECK (route_type IN ('walking', 'hiking', 'cycling', 'driving')),
    difficulty_level integer NOT NULL DEFAULT 1
        CHECK (difficulty_level BETWEEN 1 AND 5),
    estimated_duration integer,
    total_distance double precision,
    elevation_gain integer,
    route_geometry geography(LINESTRING, 4326),
    waypoints jsonb,
    start_poi_id bigint REFERENCES pois(id),
    end_poi_id bigint REFERENCES pois(id),
    is_circular boolean NOT NULL DEFAULT FALSE,
    season_availability jsonb,
    tags text[],
    created_at timestamptz NOT NULL DEFAULT now(),
    updated_at timestamptz NOT NULL DEFAULT now(),
    is_active boolean NOT NULL DEFAULT TRUE
);

CREATE INDEX IF NOT EXISTS routes_geometry_gist ON routes USING GIST (route_geometry);
CREATE INDEX IF NOT EXISTS routes_route_type_idx ON routes (route_type);
CREATE INDEX IF NOT EXISTS routes_is_active_idx ON routes (is_active);

CREATE TABLE IF NOT EXISTS route_pois (
    id bigserial PRIMARY KEY,
    route_id bigint NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
    poi_id bigint NOT NULL REFERENCES pois(id) ON DELETE CASCADE,
    order_in_route integer NOT NULL,
    is_mandatory boolean NOT NULL DEFAULT FALSE,
    estimated_time_at_poi integer,
    notes text,
    UNIQUE (route_id, poi_id)
);

CREATE TABLE IF NOT EXISTS route_poi_associations (
    id bigserial PRIMARY KEY,
    route_id bigint NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
    poi_id bigint NOT NULL REFERENCES pois(id) ON DELETE CASCADE,
    sequence_order integer,
    distance_from_route double precision NOT NULL,
    is_waypoint boolean NOT NULL DEFAULT FALSE,
    association_type text NOT NULL DEFAULT 'auto'
        CHECK (association_type IN ('manual', 'auto')),
    association_score double precision NOT NULL DEFAULT 0
        CHECK (association_score BETWEEN 0 AND 100),
    notes text,
    created_by text,
    created_at timestamptz NOT NULL DEFAULT now(),
    UNIQUE (route_id, poi_id)
);

CREATE INDEX IF NOT EXISTS route_poi_associations_route_idx
    ON route_poi_associations (route_id);

CREATE TABLE IF NOT EXISTS route_ratings (
    route_id bigint NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
    category text NOT NULL,
    rating integer NOT NULL CHECK (rating BETWEEN 0 AND 100),
    PRIMARY KEY (route_id, category)
);

CREATE TABLE IF NOT EXISTS route_imports (
    id bigserial PRIMARY KEY,
    filename text NOT NULL,
    original_filename text NOT NULL,
    file_type text NOT NULL,
    file_size bigint NOT NULL DEFAULT 0,
    file_hash text NOT NULL DEFAULT '',
    import_metadata jsonb,
    import_status text NOT NULL DEFAULT 'pending'
        CHECK (import_status IN ('pending', 'parsed', 'completed', 'failed')),
    started_at timestamptz,
    completed_at timestamptz,
    error_message text,
    created_by text
);
"#;

const ELEVATION_PROFILE_COLUMNS: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM information_schema.columns
        WHERE table_name = 'routes' AND column_name = 'elevation_profile'
    ) THEN
        ALTER TABLE routes ADD COLUMN elevation_profile jsonb;
    END IF;

    IF NOT EXISTS (
        SELECT 1 FROM information_schema.columns
        WHERE table_name = 'routes' AND column_name = 'elevation_resolution'
    ) THEN
        ALTER TABLE routes ADD COLUMN elevation_resolution integer NOT NULL DEFAULT 100;
    END IF;
END $$;
"#;

const IMPORT_PROVENANCE_COLUMNS: &str = r#"
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM information_schema.columns
        WHERE table_name = 'routes' AND column_name = 'import_source'
    ) THEN
        ALTER TABLE routes ADD COLUMN import_source text;
        ALTER TABLE routes ADD COLUMN original_filename text;
        ALTER TABLE routes ADD COLUMN import_metadata jsonb;
        ALTER TABLE routes ADD COLUMN imported_by text;
        ALTER TABLE routes ADD COLUMN import_date timestamptz;
    END IF;
END $$;
"#;

/// The full migration history, oldest first. Names are unique across
/// history and never reused.
pub fn registry() -> Vec<Migration> {
    vec![
        Migration {
            name: "baseline_schema_v1",
            version: "1.0.0",
            sql: BASELINE_SCHEMA,
        },
        Migration {
            name: "elevation_profile_columns_v1",
            version: "1.1.0",
            sql: ELEVATION_PROFILE_COLUMNS,
        },
        Migration {
            name: "admin_panel_ui_improvement_v1",
            version: "1.2.0",
            sql: IMPORT_PROVENANCE_COLUMNS,
        },
    ]
}

#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Option<(String, String)>,
}

impl MigrationSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

/// The bookkeeping table itself cannot be a registry entry.
async fn ensure_migrations_table(conn: &mut AsyncPgConnection) -> EngineResult<()> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id bigserial PRIMARY KEY,
            migration_name text NOT NULL UNIQUE,
            migration_version text NOT NULL,
            executed_at timestamptz NOT NULL DEFAULT now(),
            execution_time_ms integer NOT NULL DEFAULT 0,
            success boolean NOT NULL DEFAULT TRUE,
            error_detail text
        )",
    )
    .await?;
    Ok(())
}

async fn already_applied(conn: &mut AsyncPgConnection, migration_name_str: &str) -> EngineResult<bool> {
    use crate::schema::schema_migrations::dsl::*;

    let count: i64 = schema_migrations
        .filter(migration_name.eq(migration_name_str))
        .filter(success.eq(true))
        .count()
        .get_result(conn)
        .await?;
    Ok(count > 0)
}

async fn record_outcome(
    conn: &mut AsyncPgConnection,
    migration: &Migration,
    elapsed_ms: i32,
    outcome: Result<(), &str>,
) -> EngineResult<()> {
    use crate::schema::schema_migrations::dsl::*;

    diesel::insert_into(schema_migrations)
        .values((
            migration_name.eq(migration.name),
            migration_version.eq(migration.version),
            execution_time_ms.eq(elapsed_ms),
            success.eq(outcome.is_ok()),
            error_detail.eq(outcome.err().map(|e| e.to_string())),
        ))
        .on_conflict(migration_name)
        .do_update()
        .set((
            execution_time_ms.eq(elapsed_ms),
            success.eq(outcome.is_ok()),
            error_detail.eq(outcome.err().map(|e| e.to_string())),
            executed_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Run every migration not yet recorded as successful. Already
/// applied migrations are skipped without touching their rows, so a
/// second run leaves history unchanged.
pub async fn run_pending(conn: &mut AsyncPgConnection) -> EngineResult<MigrationSummary> {
    ensure_migrations_table(conn).await?;

    let mut summary = MigrationSummary::default();

    for migration in registry() {
        if already_applied(conn, migration.name).await? {
            log::debug!("migration {} already applied, skipping", migration.name);
            summary.skipped.push(migration.name.to_string());
            continue;
        }

        log::info!("applying migration {} ({})", migration.name, migration.version);
        let started = Instant::now();
        let result = conn
            .transaction::<(), EngineError, _>(|conn| {
                async move {
                    conn.batch_execute(migration.sql).await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await;
        let elapsed_ms = crate::duration_to_ms(started.elapsed());

        match result {
            Ok(()) => {
                record_outcome(conn, &migration, elapsed_ms, Ok(())).await?;
                summary.applied.push(migration.name.to_string());
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("migration {} failed: {}", migration.name, message);
                record_outcome(conn, &migration, elapsed_ms, Err(&message)).await?;
                summary.failed = Some((migration.name.to_string(), message));
                break;
            }
        }
    }

    Ok(summary)
}

/// Idempotent sample data for local development: a handful of Ürgüp
/// POIs and one demo route, keyed by name.
pub async fn seed_sample_data(conn: &mut AsyncPgConnection) -> EngineResult<usize> {
    use crate::models::NewPoi;
    use crate::store::wkt_codec::point_from_lat_lng;

    let samples = [
        ("Temenni Hill", "outdoor", 38.6331, 34.9070, Some(1120.0)),
        ("Ürgüp Museum", "cultural", 38.6323, 34.9116, Some(1060.0)),
        ("Kapadokya Ebru Art House", "artisanal", 38.6329, 34.9125, None),
        ("Ziggy Cafe", "gastronomic", 38.6340, 34.9099, None),
        ("Esbelli Evi", "lodging", 38.6357, 34.9063, Some(1080.0)),
        ("Three Beauties Viewpoint", "outdoor", 38.6407, 34.8961, Some(1150.0)),
    ];

    let mut inserted = 0usize;
    for (poi_name, poi_category, lat, lng, altitude_m) in samples {
        use crate::schema::pois::dsl::*;

        let exists: i64 = pois
            .filter(name.eq(poi_name))
            .count()
            .get_result(conn)
            .await?;
        if exists > 0 {
            continue;
        }

        crate::store::upsert_poi(
            conn,
            None,
            NewPoi {
                name: poi_name.to_string(),
                category: poi_category.to_string(),
                location: point_from_lat_lng(lat, lng),
                altitude: altitude_m,
                description: None,
                attributes: None,
                is_active: true,
            },
        )
        .await?;
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_names_are_unique_and_ordered() {
        let migrations = registry();
        let names: HashSet<&str> = migrations.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), migrations.len());
        assert_eq!(migrations[0].name, "baseline_schema_v1");
        // contract scenario migration is part of history
        assert!(names.contains("admin_panel_ui_improvement_v1"));
    }

    #[test]
    fn every_ddl_statement_is_idempotent() {
        for migration in registry() {
            let sql = migration.sql.to_uppercase();
            for create in sql.split("CREATE TABLE").skip(1) {
                assert!(
                    create.trim_start().starts_with("IF NOT EXISTS"),
                    "{} has a non-idempotent CREATE TABLE",
                    migration.name
                );
            }
            for create in sql.split("CREATE INDEX").skip(1) {
                assert!(
                    create.trim_start().starts_with("IF NOT EXISTS"),
                    "{} has a non-idempotent CREATE INDEX",
                    migration.name
                );
            }
            // column adds go through an information_schema probe
            if sql.contains("ALTER TABLE") {
                assert!(
                    sql.contains("INFORMATION_SCHEMA.COLUMNS"),
                    "{} adds columns without a probe",
                    migration.name
                );
            }
        }
    }

    #[test]
    fn baseline_covers_the_data_model() {
        let baseline = registry()
            .into_iter()
            .find(|m| m.name == "baseline_schema_v1")
            .unwrap();
        for table in [
            "pois",
            "routes",
            "route_pois",
            "route_poi_associations",
            "route_ratings",
            "route_imports",
        ] {
            assert!(
                baseline.sql.contains(table),
                "baseline missing table {}",
                table
            );
        }
        assert!(baseline.sql.contains("geography(POINT, 4326)"));
        assert!(baseline.sql.contains("geography(LINESTRING, 4326)"));
        assert!(baseline.sql.contains("USING GIST"));
        assert!(baseline.sql.contains("USING GIN"));
    }
}
