use clap::Parser;
use diesel_async::AsyncPgConnection;
use kapadokya::{Deadline, TravelMode};
use kapadokya::associations::{self, AssociationParams};
use kapadokya::config::Config;
use kapadokya::elevation::{self, HttpElevationProvider};
use kapadokya::errors::{EngineError, EngineResult};
use kapadokya::import::{self, ImportFormat};
use kapadokya::models::{NewRoute, NewRouteImport};
use kapadokya::road_graph::GraphSet;
use kapadokya::route_builder;
use kapadokya::store;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Import a GPX/KML/KMZ track as a route: geometry, elevation, POI associations"
)]
struct Args {
    /// Track file to import
    file: PathBuf,

    /// Route name; falls back to the name in the file, then the filename
    #[arg(long)]
    name: Option<String>,

    /// walking, hiking, cycling or driving
    #[arg(long, default_value = "hiking")]
    route_type: String,

    /// Difficulty 1..5
    #[arg(long, default_value_t = 2)]
    difficulty: i32,

    /// Close the loop back to the first waypoint
    #[arg(long)]
    circular: bool,

    /// Update this existing route instead of inserting
    #[arg(long)]
    route_id: Option<i64>,

    /// Elevation API base URL; skipped when absent
    #[arg(long, env = "ELEVATION_API_URL")]
    elevation_url: Option<String>,

    /// POI association radius override, metres
    #[arg(long)]
    radius: Option<f64>,

    #[arg(long, default_value = "route-import")]
    created_by: String,
}

async fn fail_import(conn: &mut AsyncPgConnection, import_id: i64, err: &EngineError) {
    let message = err.to_string();
    if let Err(update_err) =
        store::set_import_status(conn, import_id, "failed", Some(&message)).await
    {
        log::error!("could not record import failure: {}", update_err);
    }
}

fn route_name(args: &Args, parsed_name: Option<&str>, path: &Path) -> String {
    if let Some(name) = &args.name {
        return name.clone();
    }
    if let Some(name) = parsed_name {
        return name.to_string();
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("imported route")
        .to_string()
}

async fn run(args: Args) -> EngineResult<()> {
    let config = Config::from_env()?;
    let mode = TravelMode::parse(&args.route_type).ok_or_else(|| {
        EngineError::InvalidInput(format!("unknown route type `{}`", args.route_type))
    })?;

    let bytes = std::fs::read(&args.file)
        .map_err(|e| EngineError::InvalidInput(format!("read {:?}: {}", args.file, e)))?;
    let format = ImportFormat::from_path(&args.file)?;
    let original = args
        .file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .to_string();

    let pool = kapadokya::postgres_tools::make_async_pool(&config.database_url)
        .await
        .map_err(|e| EngineError::Database(format!("pool init: {}", e)))?;
    let mut conn = pool.get().await?;

    let import_record = store::create_route_import(
        &mut conn,
        NewRouteImport {
            filename: args.file.to_string_lossy().to_string(),
            original_filename: original.clone(),
            file_type: format.as_str().to_string(),
            file_size: bytes.len() as i64,
            file_hash: import::content_hash(&bytes),
            import_metadata: None,
            import_status: "pending".to_string(),
            started_at: Some(chrono::Utc::now()),
            created_by: Some(args.created_by.clone()),
        },
    )
    .await?;

    let parsed = match import::parse_bytes(format, &bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            fail_import(&mut conn, import_record.id, &e).await;
            return Err(e);
        }
    };
    store::set_import_status(&mut conn, import_record.id, "parsed", None).await?;
    log::info!(
        "parsed {} points, {} markers from {}",
        parsed.waypoints.len(),
        parsed.markers.len(),
        original
    );

    let deadline = Deadline::after(config.operation_timeout);
    let graphs = GraphSet::load_available(Path::new(&config.graph_snapshot_dir));

    let built = match route_builder::build_route(
        &graphs,
        &parsed.waypoints,
        mode,
        args.circular,
        Some(deadline),
    ) {
        Ok(built) => built,
        Err(e) => {
            fail_import(&mut conn, import_record.id, &e).await;
            return Err(e);
        }
    };
    if built.has_fallback_segments {
        log::warn!("route contains geodesic fallback segments");
    }

    // Elevation is best-effort: a dead provider leaves the profile
    // null instead of failing the whole import.
    let mut elevation_profile = None;
    let mut elevation_gain = None;
    if let Some(url) = &args.elevation_url {
        let provider = HttpElevationProvider::new(url);
        // profile over the snapped geometry, not the input anchors
        match elevation::build_profile(
            &provider,
            &built.polyline_waypoints(),
            config.elevation_resolution_m,
            Some(deadline),
        )
        .await
        {
            Ok(profile) => {
                elevation_gain = Some(profile.stats.total_gain.round() as i32);
                elevation_profile = Some(serde_json::to_value(&profile).map_err(|e| {
                    EngineError::InvalidInput(format!("profile serialization: {}", e))
                })?);
            }
            Err(e) => log::warn!("elevation profile skipped: {}", e),
        }
    }

    let new_route = NewRoute {
        name: route_name(&args, parsed.name.as_deref(), &args.file),
        description: parsed.description.clone(),
        route_type: mode.as_str().to_string(),
        difficulty_level: args.difficulty,
        estimated_duration: None,
        total_distance: Some(built.total_distance_km),
        elevation_gain,
        route_geometry: Some(built.linestring.clone()),
        waypoints: Some(serde_json::to_value(&parsed.waypoints).map_err(|e| {
            EngineError::InvalidInput(format!("waypoint serialization: {}", e))
        })?),
        start_poi_id: None,
        end_poi_id: None,
        is_circular: args.circular,
        season_availability: None,
        tags: None,
        elevation_profile,
        elevation_resolution: config.elevation_resolution_m as i32,
        import_source: Some(format.as_str().to_string()),
        original_filename: Some(original),
        import_metadata: Some(serde_json::json!({
            "file_hash": import_record.file_hash,
            "marker_count": parsed.markers.len(),
            "has_fallback_segments": built.has_fallback_segments,
        })),
        imported_by: Some(args.created_by.clone()),
        import_date: Some(chrono::Utc::now()),
        is_active: true,
    };

    let route = match store::upsert_route(&mut conn, args.route_id, new_route).await {
        Ok(route) => route,
        Err(e) => {
            fail_import(&mut conn, import_record.id, &e).await;
            return Err(e);
        }
    };

    let params = AssociationParams {
        radius_m: args.radius.unwrap_or(config.association_radius_m),
        ..Default::default()
    };
    let report = match associations::rebuild_associations(&mut conn, route.id, params).await {
        Ok(report) => report,
        Err(e) => {
            fail_import(&mut conn, import_record.id, &e).await;
            return Err(e);
        }
    };

    store::set_import_status(&mut conn, import_record.id, "completed", None).await?;
    println!(
        "route {} `{}`: {:.2} km, {} POIs associated ({} candidates)",
        route.id, route.name, built.total_distance_km, report.upserted, report.candidates
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{}: {}", e.category(), e);
        std::process::exit(e.exit_code());
    }
}
