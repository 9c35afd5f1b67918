//! Spatial store: POIs, routes, ratings and import records on
//! Postgres + PostGIS.
//!
//! All geography columns are WGS84 (`GEOGRAPHY`, SRID 4326) so
//! distances from PostGIS arrive in metres on the spheroid. Spatial
//! predicates go through `ST_DWithin` so the GIST indexes are used;
//! full scans are not acceptable at production sizes.

pub mod wkt_codec;

use crate::errors::{EngineError, EngineResult};
use crate::models::*;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Double, Float8, Text};
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;

/// Candidate POI returned by `find_pois_near_line`, with its distance
/// to the line and its fractional arc position along it.
#[derive(QueryableByName, Debug, Clone)]
pub struct PoiNearLine {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Text)]
    pub category: String,
    #[diesel(sql_type = Float8)]
    pub lng: f64,
    #[diesel(sql_type = Float8)]
    pub lat: f64,
    #[diesel(sql_type = Float8)]
    pub distance_m: f64,
    #[diesel(sql_type = Float8)]
    pub line_fraction: f64,
}

#[derive(QueryableByName)]
struct MetersRow {
    #[diesel(sql_type = Float8)]
    meters: f64,
}

#[derive(Default, Clone, Debug)]
pub struct RouteFilter {
    pub route_type: Option<String>,
    pub min_difficulty: Option<i32>,
    pub max_difficulty: Option<i32>,
    pub tag_substring: Option<String>,
    pub active: Option<bool>,
}

fn validate_new_poi(poi: &NewPoi) -> EngineResult<()> {
    if !crate::valid_poi_category(&poi.category) {
        return Err(EngineError::InvalidInput(format!(
            "unknown POI category `{}`",
            poi.category
        )));
    }
    wkt_codec::check_lng_lat(poi.location.x, poi.location.y)
}

fn validate_new_route(route: &NewRoute) -> EngineResult<()> {
    if crate::TravelMode::parse(&route.route_type).is_none() {
        return Err(EngineError::InvalidInput(format!(
            "unknown route type `{}`",
            route.route_type
        )));
    }
    if !(1..=5).contains(&route.difficulty_level) {
        return Err(EngineError::InvalidInput(format!(
            "difficulty_level must be 1..5, got {}",
            route.difficulty_level
        )));
    }
    if let Some(d) = route.estimated_duration {
        if d < 0 {
            return Err(EngineError::InvalidInput(
                "estimated_duration must be non-negative".to_string(),
            ));
        }
    }
    if let Some(d) = route.total_distance {
        if d < 0.0 {
            return Err(EngineError::InvalidInput(
                "total_distance must be non-negative".to_string(),
            ));
        }
    }
    if let Some(geom) = &route.route_geometry {
        if geom.points.len() < 2 {
            return Err(EngineError::InvalidGeometry(
                "route geometry needs at least 2 points".to_string(),
            ));
        }
        for p in &geom.points {
            wkt_codec::check_lng_lat(p.x, p.y)?;
        }
    }
    Ok(())
}

pub async fn upsert_poi(
    conn: &mut AsyncPgConnection,
    poi_id: Option<i64>,
    new_poi: NewPoi,
) -> EngineResult<Poi> {
    use crate::schema::pois::dsl::*;

    validate_new_poi(&new_poi)?;

    let row = match poi_id {
        None => {
            diesel::insert_into(pois)
                .values(&new_poi)
                .returning(Poi::as_returning())
                .get_result(conn)
                .await?
        }
        Some(existing_id) => {
            diesel::update(pois.filter(id.eq(existing_id)))
                .set((
                    name.eq(new_poi.name),
                    category.eq(new_poi.category),
                    location.eq(new_poi.location),
                    altitude.eq(new_poi.altitude),
                    description.eq(new_poi.description),
                    attributes.eq(new_poi.attributes),
                    is_active.eq(new_poi.is_active),
                    updated_at.eq(diesel::dsl::now),
                ))
                .returning(Poi::as_returning())
                .get_result(conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        EngineError::NotFound(format!("poi {}", existing_id))
                    }
                    other => other.into(),
                })?
        }
    };

    Ok(row)
}

/// Soft delete. POIs referenced by active associations are never
/// removed from the table.
pub async fn deactivate_poi(conn: &mut AsyncPgConnection, poi_id: i64) -> EngineResult<()> {
    use crate::schema::pois::dsl::*;

    let updated = diesel::update(pois.filter(id.eq(poi_id)))
        .set((is_active.eq(false), updated_at.eq(diesel::dsl::now)))
        .execute(conn)
        .await?;
    if updated == 0 {
        return Err(EngineError::NotFound(format!("poi {}", poi_id)));
    }
    Ok(())
}

pub async fn get_poi_by_id(conn: &mut AsyncPgConnection, poi_id: i64) -> EngineResult<Poi> {
    use crate::schema::pois::dsl::*;

    pois.filter(id.eq(poi_id))
        .select(Poi::as_select())
        .first(conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::NotFound => EngineError::NotFound(format!("poi {}", poi_id)),
            other => other.into(),
        })
}

pub async fn list_pois_in_bbox(
    conn: &mut AsyncPgConnection,
    min_lat: f64,
    min_lng: f64,
    max_lat: f64,
    max_lng: f64,
    category_filter: Option<&str>,
) -> EngineResult<Vec<Poi>> {
    use crate::schema::pois::dsl::*;

    wkt_codec::check_lng_lat(min_lng, min_lat)?;
    wkt_codec::check_lng_lat(max_lng, max_lat)?;

    let envelope_clause = format!(
        "ST_Intersects(location, ST_MakeEnvelope({}, {}, {}, {}, 4326)::geography)",
        min_lng, min_lat, max_lng, max_lat
    );

    let mut query = pois.filter(sql::<Bool>(&envelope_clause)).into_boxed();
    if let Some(cat) = category_filter {
        query = query.filter(category.eq(cat.to_string()));
    }

    let rows = query
        .order(id.asc())
        .select(Poi::as_select())
        .load::<Poi>(conn)
        .await?;
    Ok(rows)
}

/// Active POIs within `radius_m` of the linestring, nearest first,
/// with the fractional arc position precomputed for sequencing.
pub async fn find_pois_near_line(
    conn: &mut AsyncPgConnection,
    line_wkt: &str,
    radius_m: f64,
    limit: i64,
) -> EngineResult<Vec<PoiNearLine>> {
    // Parse locally first so a malformed geometry surfaces as
    // InvalidGeometry instead of a database error.
    wkt_codec::parse_linestring_wkt(line_wkt)?;

    let rows = diesel::sql_query(
        "SELECT p.id, p.name, p.category, \
                ST_X(p.location::geometry) AS lng, \
                ST_Y(p.location::geometry) AS lat, \
                ST_Distance(p.location, ST_GeogFromText($1)) AS distance_m, \
                ST_LineLocatePoint(ST_GeomFromText($1, 4326), p.location::geometry) AS line_fraction \
         FROM pois p \
         WHERE p.is_active = TRUE \
           AND ST_DWithin(p.location, ST_GeogFromText($1), $2) \
         ORDER BY distance_m ASC, p.id ASC \
         LIMIT $3",
    )
    .bind::<Text, _>(line_wkt)
    .bind::<Double, _>(radius_m)
    .bind::<BigInt, _>(limit)
    .load::<PoiNearLine>(conn)
    .await?;

    Ok(rows)
}

/// Perpendicular (great-circle) distance from a point to a
/// linestring, metres.
pub async fn perpendicular_distance(
    conn: &mut AsyncPgConnection,
    lat: f64,
    lng: f64,
    line_wkt: &str,
) -> EngineResult<f64> {
    wkt_codec::check_lng_lat(lng, lat)?;
    wkt_codec::parse_linestring_wkt(line_wkt)?;

    let row: MetersRow = diesel::sql_query(
        "SELECT ST_Distance(ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, \
                            ST_GeogFromText($3)) AS meters",
    )
    .bind::<Double, _>(lng)
    .bind::<Double, _>(lat)
    .bind::<Text, _>(line_wkt)
    .get_result(conn)
    .await?;

    Ok(row.meters)
}

/// Insert or update a route inside one transaction. Geometry, when
/// provided as WKT, is parsed through the codec before it reaches
/// the database.
pub async fn upsert_route(
    conn: &mut AsyncPgConnection,
    route_id: Option<i64>,
    new_route: NewRoute,
) -> EngineResult<Route> {
    validate_new_route(&new_route)?;

    conn.transaction::<Route, EngineError, _>(|conn| {
        async move {
            use crate::schema::routes::dsl::*;

            let row = match route_id {
                None => {
                    diesel::insert_into(routes)
                        .values(&new_route)
                        .returning(Route::as_returning())
                        .get_result(conn)
                        .await?
                }
                Some(existing_id) => {
                    diesel::update(routes.filter(id.eq(existing_id)))
                        .set((
                            name.eq(new_route.name),
                            description.eq(new_route.description),
                            route_type.eq(new_route.route_type),
                            difficulty_level.eq(new_route.difficulty_level),
                            estimated_duration.eq(new_route.estimated_duration),
                            total_distance.eq(new_route.total_distance),
                            elevation_gain.eq(new_route.elevation_gain),
                            route_geometry.eq(new_route.route_geometry),
                            waypoints.eq(new_route.waypoints),
                            is_circular.eq(new_route.is_circular),
                            season_availability.eq(new_route.season_availability),
                            tags.eq(new_route.tags),
                            elevation_profile.eq(new_route.elevation_profile),
                            elevation_resolution.eq(new_route.elevation_resolution),
                            import_source.eq(new_route.import_source),
                            original_filename.eq(new_route.original_filename),
                            import_metadata.eq(new_route.import_metadata),
                            imported_by.eq(new_route.imported_by),
                            import_date.eq(new_route.import_date),
                            is_active.eq(new_route.is_active),
                            updated_at.eq(diesel::dsl::now),
                        ))
                        .returning(Route::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(|e| match e {
                            diesel::result::Error::NotFound => {
                                EngineError::NotFound(format!("route {}", existing_id))
                            }
                            other => other.into(),
                        })?
                }
            };

            Ok(row)
        }
        .scope_boxed()
    })
    .await
}

pub async fn get_route_by_id(conn: &mut AsyncPgConnection, route_id: i64) -> EngineResult<Route> {
    use crate::schema::routes::dsl::*;

    routes
        .filter(id.eq(route_id))
        .select(Route::as_select())
        .first(conn)
        .await
        .map_err(|e| match e {
            diesel::result::Error::NotFound => EngineError::NotFound(format!("route {}", route_id)),
            other => other.into(),
        })
}

pub async fn list_routes(
    conn: &mut AsyncPgConnection,
    filter: &RouteFilter,
) -> EngineResult<Vec<Route>> {
    use crate::schema::routes::dsl::*;

    let mut query = routes.into_boxed();

    if let Some(mode) = &filter.route_type {
        query = query.filter(route_type.eq(mode.clone()));
    }
    if let Some(min) = filter.min_difficulty {
        query = query.filter(difficulty_level.ge(min));
    }
    if let Some(max) = filter.max_difficulty {
        query = query.filter(difficulty_level.le(max));
    }
    if let Some(substr) = &filter.tag_substring {
        let escaped = substr.replace('\'', "''");
        query = query.filter(sql::<Bool>(&format!(
            "EXISTS (SELECT 1 FROM unnest(tags) AS t WHERE t ILIKE '%{}%')",
            escaped
        )));
    }
    if let Some(active) = filter.active {
        query = query.filter(is_active.eq(active));
    }

    let rows = query
        .order(id.asc())
        .select(Route::as_select())
        .load::<Route>(conn)
        .await?;
    Ok(rows)
}

/// Per-category rating, 0..100, one row per (route, category).
pub async fn upsert_rating(
    conn: &mut AsyncPgConnection,
    rating_row: RouteRating,
) -> EngineResult<()> {
    use crate::schema::route_ratings::dsl::*;

    if !(0..=100).contains(&rating_row.rating) {
        return Err(EngineError::InvalidInput(format!(
            "rating must be 0..100, got {}",
            rating_row.rating
        )));
    }

    diesel::insert_into(route_ratings)
        .values(&rating_row)
        .on_conflict((route_id, category))
        .do_update()
        .set(rating.eq(rating_row.rating))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn create_route_import(
    conn: &mut AsyncPgConnection,
    record: NewRouteImport,
) -> EngineResult<RouteImport> {
    use crate::schema::route_imports::dsl::*;

    let row = diesel::insert_into(route_imports)
        .values(&record)
        .returning(RouteImport::as_returning())
        .get_result(conn)
        .await?;
    Ok(row)
}

pub async fn set_import_status(
    conn: &mut AsyncPgConnection,
    import_id: i64,
    status: &str,
    error: Option<&str>,
) -> EngineResult<()> {
    use crate::schema::route_imports::dsl::*;

    let finished = status == "completed" || status == "failed";
    let updated = if finished {
        diesel::update(route_imports.filter(id.eq(import_id)))
            .set((
                import_status.eq(status.to_string()),
                completed_at.eq(Some(chrono::Utc::now())),
                error_message.eq(error.map(|e| e.to_string())),
            ))
            .execute(conn)
            .await?
    } else {
        diesel::update(route_imports.filter(id.eq(import_id)))
            .set((
                import_status.eq(status.to_string()),
                error_message.eq(error.map(|e| e.to_string())),
            ))
            .execute(conn)
            .await?
    };

    if updated == 0 {
        return Err(EngineError::NotFound(format!("route_import {}", import_id)));
    }
    Ok(())
}
