//! POI association engine.
//!
//! For one route, finds the POIs within the search radius of its
//! geometry, scores them by proximity, and reconciles the
//! `route_poi_associations` table: auto rows are upserted and pruned,
//! manual rows are left untouched. The whole rebuild for a route runs
//! in a single transaction serialized by a row-keyed advisory lock,
//! so a reader never sees a half-applied rebuild.

use crate::errors::{EngineError, EngineResult};
use crate::store::{self, PoiNearLine};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Double, Integer, Nullable, Text};
use diesel_async::AsyncConnection;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;

#[derive(Copy, Clone, Debug)]
pub struct AssociationParams {
    pub radius_m: f64,
    pub limit: i64,
    pub waypoint_tolerance_m: f64,
}

impl Default for AssociationParams {
    fn default() -> AssociationParams {
        AssociationParams {
            radius_m: crate::config::DEFAULT_ASSOCIATION_RADIUS_M,
            limit: 50,
            waypoint_tolerance_m: 50.0,
        }
    }
}

/// One association the engine intends to write.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedAssociation {
    pub poi_id: i64,
    pub sequence_order: i32,
    pub distance_from_route: f64,
    pub is_waypoint: bool,
    pub score: f64,
}

#[derive(Clone, Debug, Default)]
pub struct AssociationReport {
    pub route_id: i64,
    pub candidates: usize,
    pub upserted: usize,
    pub pruned: usize,
}

/// Compatibility score in [0, 100]: linear falloff from the route.
pub fn association_score(distance_m: f64, radius_m: f64) -> f64 {
    if radius_m <= 0.0 {
        return 0.0;
    }
    (100.0 * (1.0 - distance_m / radius_m)).round().clamp(0.0, 100.0)
}

/// Turn raw candidates into the association set: scored, waypoint
/// flagged, and sequenced by fractional arc position along the route
/// (ties broken by poi id so reruns are deterministic).
pub fn plan_associations(
    candidates: &[PoiNearLine],
    params: &AssociationParams,
) -> Vec<PlannedAssociation> {
    let mut ordered: Vec<&PoiNearLine> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        a.line_fraction
            .partial_cmp(&b.line_fraction)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    ordered
        .iter()
        .enumerate()
        .map(|(rank, poi)| PlannedAssociation {
            poi_id: poi.id,
            sequence_order: rank as i32 + 1,
            distance_from_route: poi.distance_m,
            is_waypoint: poi.distance_m <= params.waypoint_tolerance_m,
            score: association_score(poi.distance_m, params.radius_m),
        })
        .collect()
}

/// Rebuild all auto associations for one route.
pub async fn rebuild_associations(
    conn: &mut AsyncPgConnection,
    rid: i64,
    params: AssociationParams,
) -> EngineResult<AssociationReport> {
    let params_copy = params;

    conn.transaction::<AssociationReport, EngineError, _>(|conn| {
        async move {
            // serialize rebuilds per route; held to transaction end
            diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                .bind::<BigInt, _>(rid)
                .execute(conn)
                .await?;

            let route = store::get_route_by_id(conn, rid).await?;
            let geometry = route.route_geometry.as_ref().ok_or_else(|| {
                EngineError::InvalidGeometry(format!("route {} has no geometry", rid))
            })?;
            let wkt = store::wkt_codec::linestring_to_wkt(geometry);

            let candidates =
                store::find_pois_near_line(conn, &wkt, params_copy.radius_m, params_copy.limit)
                    .await?;
            let planned = plan_associations(&candidates, &params_copy);

            let mut upserted = 0usize;
            for assoc in &planned {
                let rows = diesel::sql_query(
                    "INSERT INTO route_poi_associations \
                       (route_id, poi_id, sequence_order, distance_from_route, \
                        is_waypoint, association_type, association_score, created_by) \
                     VALUES ($1, $2, $3, $4, $5, 'auto', $6, $7) \
                     ON CONFLICT (route_id, poi_id) DO UPDATE SET \
                       sequence_order = EXCLUDED.sequence_order, \
                       distance_from_route = EXCLUDED.distance_from_route, \
                       is_waypoint = EXCLUDED.is_waypoint, \
                       association_score = EXCLUDED.association_score \
                     WHERE route_poi_associations.association_type = 'auto'",
                )
                .bind::<BigInt, _>(rid)
                .bind::<BigInt, _>(assoc.poi_id)
                .bind::<Nullable<Integer>, _>(Some(assoc.sequence_order))
                .bind::<Double, _>(assoc.distance_from_route)
                .bind::<Bool, _>(assoc.is_waypoint)
                .bind::<Double, _>(assoc.score)
                .bind::<Nullable<Text>, _>(Some("association-engine"))
                .execute(conn)
                .await?;
                upserted += rows;
            }

            // prune auto rows that fell out of the radius; manual
            // rows are never deleted here
            let keep_ids: Vec<i64> = planned.iter().map(|a| a.poi_id).collect();
            let pruned = {
                use crate::schema::route_poi_associations::dsl::*;
                diesel::delete(
                    route_poi_associations
                        .filter(route_id.eq(rid))
                        .filter(association_type.eq("auto"))
                        .filter(poi_id.ne_all(keep_ids)),
                )
                .execute(conn)
                .await?
            };

            Ok(AssociationReport {
                route_id: rid,
                candidates: candidates.len(),
                upserted,
                pruned,
            })
        }
        .scope_boxed()
    })
    .await
}

/// Manual association created by an operator. Takes precedence over
/// the engine: an existing row of either type is upgraded to manual
/// and later auto rebuilds will not touch it.
pub async fn create_manual_association(
    conn: &mut AsyncPgConnection,
    rid: i64,
    poi: i64,
    notes_text: Option<&str>,
    creator: &str,
) -> EngineResult<()> {
    let distance = {
        let route = store::get_route_by_id(conn, rid).await?;
        let geometry = route.route_geometry.as_ref().ok_or_else(|| {
            EngineError::InvalidGeometry(format!("route {} has no geometry", rid))
        })?;
        let wkt = store::wkt_codec::linestring_to_wkt(geometry);
        let poi_row = store::get_poi_by_id(conn, poi).await?;
        store::perpendicular_distance(conn, poi_row.location.y, poi_row.location.x, &wkt).await?
    };

    diesel::sql_query(
        "INSERT INTO route_poi_associations \
           (route_id, poi_id, distance_from_route, is_waypoint, \
            association_type, association_score, notes, created_by) \
         VALUES ($1, $2, $3, FALSE, 'manual', 100.0, $4, $5) \
         ON CONFLICT (route_id, poi_id) DO UPDATE SET \
           association_type = 'manual', \
           notes = EXCLUDED.notes, \
           created_by = EXCLUDED.created_by",
    )
    .bind::<BigInt, _>(rid)
    .bind::<BigInt, _>(poi)
    .bind::<Double, _>(distance)
    .bind::<Nullable<Text>, _>(notes_text)
    .bind::<Text, _>(creator)
    .execute(conn)
    .await?;
    Ok(())
}
