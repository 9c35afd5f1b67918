//! WKT LINESTRING encode/decode.
//!
//! This is the single normalization point for coordinate order in the
//! whole engine. WKT and GeoJSON are `lng lat`; the UI and most
//! waypoint inputs are `lat lng`. Everything that crosses the store
//! boundary goes through here, so nothing else in the crate is
//! allowed to format or parse WKT.

use crate::WGS_84_SRID;
use crate::errors::{EngineError, EngineResult};
use crate::models::Waypoint;
use itertools::Itertools;
use postgis_diesel::types::{LineString, Point};

pub fn point_from_lat_lng(lat: f64, lng: f64) -> Point {
    Point {
        x: lng,
        y: lat,
        srid: Some(WGS_84_SRID),
    }
}

/// Serialize a linestring as `LINESTRING(lng lat, lng lat, …)`.
pub fn linestring_to_wkt(line: &LineString<Point>) -> String {
    let coords = line
        .points
        .iter()
        .map(|p| format!("{} {}", p.x, p.y))
        .join(", ");
    format!("LINESTRING({})", coords)
}

/// Parse `LINESTRING(lng lat, lng lat, …)`, validating coordinate
/// ranges and the two-point minimum.
pub fn parse_linestring_wkt(wkt: &str) -> EngineResult<LineString<Point>> {
    let trimmed = wkt.trim();
    let upper = trimmed.to_uppercase();
    if !upper.starts_with("LINESTRING") {
        return Err(EngineError::InvalidGeometry(format!(
            "expected LINESTRING, got {}",
            truncate_for_message(trimmed)
        )));
    }
    let open = trimmed.find('(').ok_or_else(|| {
        EngineError::InvalidGeometry("LINESTRING without coordinate list".to_string())
    })?;
    let close = trimmed.rfind(')').ok_or_else(|| {
        EngineError::InvalidGeometry("unterminated LINESTRING".to_string())
    })?;
    if close <= open {
        return Err(EngineError::InvalidGeometry(
            "unterminated LINESTRING".to_string(),
        ));
    }

    let body = &trimmed[open + 1..close];
    let mut points = Vec::new();
    for pair in body.split(',') {
        let mut parts = pair.split_whitespace();
        let lng = parse_coord(parts.next(), pair)?;
        let lat = parse_coord(parts.next(), pair)?;
        if parts.next().is_some() {
            return Err(EngineError::InvalidGeometry(format!(
                "expected `lng lat` pair, got `{}`",
                pair.trim()
            )));
        }
        check_lng_lat(lng, lat)?;
        points.push(Point {
            x: lng,
            y: lat,
            srid: Some(WGS_84_SRID),
        });
    }

    if points.len() < 2 {
        return Err(EngineError::InvalidGeometry(format!(
            "degenerate LINESTRING with {} point(s)",
            points.len()
        )));
    }

    Ok(LineString {
        points,
        srid: Some(WGS_84_SRID),
    })
}

pub fn check_lng_lat(lng: f64, lat: f64) -> EngineResult<()> {
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return Err(EngineError::InvalidInput(format!(
            "coordinate out of range: lng {} lat {}",
            lng, lat
        )));
    }
    Ok(())
}

/// Linestring built from `lat lng` waypoints; conversion to `lng lat`
/// happens here and nowhere else.
pub fn linestring_from_waypoints(waypoints: &[Waypoint]) -> EngineResult<LineString<Point>> {
    if waypoints.len() < 2 {
        return Err(EngineError::InvalidInput(format!(
            "insufficient waypoints: need at least 2, got {}",
            waypoints.len()
        )));
    }
    for w in waypoints {
        check_lng_lat(w.lng, w.lat)?;
    }
    Ok(LineString {
        points: waypoints
            .iter()
            .map(|w| point_from_lat_lng(w.lat, w.lng))
            .collect(),
        srid: Some(WGS_84_SRID),
    })
}

/// Total great-circle length of a linestring, metres.
pub fn linestring_length_m(line: &LineString<Point>) -> f64 {
    line.points
        .windows(2)
        .map(|w| crate::haversine_m(w[0].y, w[0].x, w[1].y, w[1].x))
        .sum()
}

fn parse_coord(raw: Option<&str>, pair: &str) -> EngineResult<f64> {
    raw.ok_or_else(|| {
        EngineError::InvalidGeometry(format!("incomplete coordinate pair `{}`", pair.trim()))
    })?
    .parse::<f64>()
    .map_err(|_| {
        EngineError::InvalidGeometry(format!("non-numeric coordinate in `{}`", pair.trim()))
    })
}

fn truncate_for_message(s: &str) -> String {
    // char boundary, not byte boundary
    match s.char_indices().nth(40) {
        Some((byte_idx, _)) => format!("{}…", &s[..byte_idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wkt_is_lng_lat_not_lat_lng() {
        // The single most error-prone contract in the system.
        let line = linestring_from_waypoints(&[
            Waypoint::new(38.6, 34.9),
            Waypoint::new(38.7, 35.0),
        ])
        .unwrap();
        let wkt = linestring_to_wkt(&line);
        assert_eq!(wkt, "LINESTRING(34.9 38.6, 35 38.7)");
        assert!(wkt.starts_with("LINESTRING(34.9 38.6"));
    }

    #[test]
    fn parse_round_trip() {
        let wkt = "LINESTRING(34.9070 38.6331, 34.9080 38.6341)";
        let line = parse_linestring_wkt(wkt).unwrap();
        assert_eq!(line.points.len(), 2);
        assert!((line.points[0].x - 34.9070).abs() < 1e-9);
        assert!((line.points[0].y - 38.6331).abs() < 1e-9);
        let reparsed = parse_linestring_wkt(&linestring_to_wkt(&line)).unwrap();
        for (a, b) in line.points.iter().zip(reparsed.points.iter()) {
            assert!((a.x - b.x).abs() < 1e-6);
            assert!((a.y - b.y).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_degenerate_and_malformed() {
        assert!(matches!(
            parse_linestring_wkt("LINESTRING(34.9 38.6)"),
            Err(EngineError::InvalidGeometry(_))
        ));
        assert!(matches!(
            parse_linestring_wkt("POINT(34.9 38.6)"),
            Err(EngineError::InvalidGeometry(_))
        ));
        assert!(matches!(
            parse_linestring_wkt("LINESTRING(34.9 abc, 35.0 38.7)"),
            Err(EngineError::InvalidGeometry(_))
        ));
        assert!(matches!(
            parse_linestring_wkt("LINESTRING(34.9 38.6, 200.0 38.7)"),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_wkt_with_multibyte_text_stays_an_error() {
        // 39 ASCII bytes, then a two-byte character straddling the
        // 40-byte truncation point of the error message.
        let garbage = format!("{}Ürgüp is not a geometry type", "x".repeat(39));
        match parse_linestring_wkt(&garbage) {
            Err(EngineError::InvalidGeometry(msg)) => {
                assert!(msg.contains("expected LINESTRING"), "{}", msg)
            }
            other => panic!("expected InvalidGeometry, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn length_of_short_segment() {
        let line = parse_linestring_wkt("LINESTRING(34.8213 38.6431, 34.8223 38.6441)").unwrap();
        let len = linestring_length_m(&line);
        // ~140 m for 0.001 degree diagonal at this latitude.
        assert!(len > 100.0 && len < 200.0, "got {}", len);
    }

    #[test]
    fn insufficient_waypoints() {
        assert!(matches!(
            linestring_from_waypoints(&[Waypoint::new(38.6, 34.9)]),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            linestring_from_waypoints(&[]),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
