//! GPX / KML / KMZ file import.
//!
//! Turns an uploaded track file into an ordered waypoint list plus
//! whatever name, description and point markers the file carries.
//! Unknown tags are ignored rather than rejected. Persistence of the
//! import record lives in `store`; this module is pure parsing.

use crate::errors::{EngineError, EngineResult};
use crate::models::Waypoint;
use std::io::{Cursor, Read};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportFormat {
    Gpx,
    Kml,
    Kmz,
}

impl ImportFormat {
    pub fn from_path(path: &Path) -> EngineResult<ImportFormat> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gpx" => Ok(ImportFormat::Gpx),
            "kml" => Ok(ImportFormat::Kml),
            "kmz" => Ok(ImportFormat::Kmz),
            other => Err(EngineError::InvalidInput(format!(
                "unsupported import extension '{}', expected gpx, kml or kmz",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Gpx => "gpx",
            ImportFormat::Kml => "kml",
            ImportFormat::Kmz => "kmz",
        }
    }
}

/// A named point carried alongside the track (GPX `<wpt>`, KML Point
/// placemark). Not part of the route polyline.
#[derive(Clone, Debug)]
pub struct ParsedMarker {
    pub name: Option<String>,
    pub description: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ParsedRoute {
    pub name: Option<String>,
    pub description: Option<String>,
    pub waypoints: Vec<Waypoint>,
    pub markers: Vec<ParsedMarker>,
}

/// Stable content hash, stored on the import record so re-uploads of
/// the same file can be spotted.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", seahash::hash(bytes))
}

pub fn parse_bytes(format: ImportFormat, bytes: &[u8]) -> EngineResult<ParsedRoute> {
    let parsed = match format {
        ImportFormat::Gpx => parse_gpx(bytes)?,
        ImportFormat::Kml => parse_kml_str(text_from(bytes)?)?,
        ImportFormat::Kmz => parse_kmz(bytes)?,
    };
    if parsed.waypoints.len() < 2 {
        return Err(EngineError::InvalidGeometry(format!(
            "{} file contains no usable track ({} points)",
            format.as_str(),
            parsed.waypoints.len()
        )));
    }
    for w in &parsed.waypoints {
        if !w.is_valid() {
            return Err(EngineError::InvalidGeometry(format!(
                "track point out of range: lat {} lng {}",
                w.lat, w.lng
            )));
        }
    }
    Ok(parsed)
}

fn text_from(bytes: &[u8]) -> EngineResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| EngineError::InvalidInput(format!("file is not valid UTF-8: {}", e)))
}

fn parse_gpx(bytes: &[u8]) -> EngineResult<ParsedRoute> {
    let gpx = gpx::read(Cursor::new(bytes))
        .map_err(|e| EngineError::InvalidInput(format!("gpx parse failed: {}", e)))?;

    let mut out = ParsedRoute {
        name: gpx.metadata.as_ref().and_then(|m| m.name.clone()),
        description: gpx.metadata.as_ref().and_then(|m| m.description.clone()),
        ..Default::default()
    };

    // Tracks win over <rte> route points when a file has both.
    if let Some(track) = gpx.tracks.first() {
        if out.name.is_none() {
            out.name = track.name.clone();
        }
        if out.description.is_none() {
            out.description = track.description.clone();
        }
        for segment in &track.segments {
            for point in &segment.points {
                let p = point.point();
                out.waypoints.push(Waypoint {
                    lat: p.y(),
                    lng: p.x(),
                });
            }
        }
    }
    if out.waypoints.is_empty() {
        if let Some(route) = gpx.routes.first() {
            if out.name.is_none() {
                out.name = route.name.clone();
            }
            for point in &route.points {
                let p = point.point();
                out.waypoints.push(Waypoint {
                    lat: p.y(),
                    lng: p.x(),
                });
            }
        }
    }

    for wpt in &gpx.waypoints {
        let p = wpt.point();
        out.markers.push(ParsedMarker {
            name: wpt.name.clone(),
            description: wpt.description.clone(),
            lat: p.y(),
            lng: p.x(),
        });
    }

    Ok(out)
}

fn parse_kml_str(text: &str) -> EngineResult<ParsedRoute> {
    let doc: kml::Kml<f64> = text
        .parse()
        .map_err(|e: kml::Error| EngineError::InvalidInput(format!("kml parse failed: {}", e)))?;

    let mut out = ParsedRoute::default();
    walk_kml(&doc, &mut out);
    Ok(out)
}

/// Depth-first over Documents and Folders. The first LineString seen
/// becomes the track; Point placemarks become markers; everything
/// else is ignored.
fn walk_kml(node: &kml::Kml<f64>, out: &mut ParsedRoute) {
    use kml::Kml;

    match node {
        Kml::KmlDocument(doc) => {
            for child in &doc.elements {
                walk_kml(child, out);
            }
        }
        Kml::Document { elements, .. } | Kml::Folder { elements, .. } => {
            for child in elements {
                walk_kml(child, out);
            }
        }
        Kml::Placemark(placemark) => {
            if let Some(geometry) = &placemark.geometry {
                collect_geometry(
                    geometry,
                    placemark.name.as_deref(),
                    placemark.description.as_deref(),
                    out,
                );
            }
        }
        Kml::LineString(line) => collect_line(line, None, None, out),
        _ => {}
    }
}

fn collect_geometry(
    geometry: &kml::types::Geometry<f64>,
    name: Option<&str>,
    description: Option<&str>,
    out: &mut ParsedRoute,
) {
    use kml::types::Geometry;

    match geometry {
        Geometry::LineString(line) => collect_line(line, name, description, out),
        Geometry::Point(point) => out.markers.push(ParsedMarker {
            name: name.map(|s| s.to_string()),
            description: description.map(|s| s.to_string()),
            lat: point.coord.y,
            lng: point.coord.x,
        }),
        Geometry::MultiGeometry(multi) => {
            for child in &multi.geometries {
                collect_geometry(child, name, description, out);
            }
        }
        _ => {}
    }
}

fn collect_line(
    line: &kml::types::LineString<f64>,
    name: Option<&str>,
    description: Option<&str>,
    out: &mut ParsedRoute,
) {
    if !out.waypoints.is_empty() {
        return;
    }
    for coord in &line.coords {
        out.waypoints.push(Waypoint {
            lat: coord.y,
            lng: coord.x,
        });
    }
    if out.name.is_none() {
        out.name = name.map(|s| s.to_string());
    }
    if out.description.is_none() {
        out.description = description.map(|s| s.to_string());
    }
}

/// KMZ is a zip wrapper; the track is the first `.kml` entry.
fn parse_kmz(bytes: &[u8]) -> EngineResult<ParsedRoute> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| EngineError::InvalidInput(format!("kmz archive unreadable: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| EngineError::InvalidInput(format!("kmz entry unreadable: {}", e)))?;
        if !entry.name().to_ascii_lowercase().ends_with(".kml") {
            continue;
        }
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| EngineError::InvalidInput(format!("kmz entry unreadable: {}", e)))?;
        return parse_kml_str(&text);
    }

    Err(EngineError::InvalidInput(
        "kmz archive contains no .kml entry".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata><name>Ürgüp vineyard loop</name></metadata>
  <wpt lat="38.6331" lon="34.9070"><name>Temenni Hill</name></wpt>
  <trk>
    <name>Ürgüp vineyard loop</name>
    <trkseg>
      <trkpt lat="38.6431" lon="34.8213"><ele>1100.0</ele></trkpt>
      <trkpt lat="38.6440" lon="34.8300"><ele>1120.0</ele></trkpt>
      <trkpt lat="38.6452" lon="34.8391"><ele>1090.0</ele></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    const SAMPLE_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>Gomeda valley walk</name>
      <description>Down the valley floor</description>
      <LineString>
        <coordinates>
          34.8213,38.6431,1100 34.8300,38.6440,1120 34.8391,38.6452,1090
        </coordinates>
      </LineString>
    </Placemark>
    <Placemark>
      <name>Church ruin</name>
      <Point><coordinates>34.8301,38.6441,0</coordinates></Point>
    </Placemark>
  </Document>
</kml>"#;

    #[test]
    fn format_detection_by_extension() {
        assert_eq!(
            ImportFormat::from_path(Path::new("walk.GPX")).unwrap(),
            ImportFormat::Gpx
        );
        assert_eq!(
            ImportFormat::from_path(Path::new("/tmp/valley.kmz")).unwrap(),
            ImportFormat::Kmz
        );
        let err = ImportFormat::from_path(Path::new("walk.geojson")).unwrap_err();
        assert_eq!(err.category(), "InvalidInput");
    }

    #[test]
    fn gpx_track_points_and_markers() {
        let parsed = parse_bytes(ImportFormat::Gpx, SAMPLE_GPX.as_bytes()).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Ürgüp vineyard loop"));
        assert_eq!(parsed.waypoints.len(), 3);
        assert!((parsed.waypoints[0].lat - 38.6431).abs() < 1e-9);
        assert!((parsed.waypoints[0].lng - 34.8213).abs() < 1e-9);
        assert_eq!(parsed.markers.len(), 1);
        assert_eq!(parsed.markers[0].name.as_deref(), Some("Temenni Hill"));
    }

    #[test]
    fn kml_linestring_is_lng_lat_in_file_lat_lng_out() {
        let parsed = parse_bytes(ImportFormat::Kml, SAMPLE_KML.as_bytes()).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Gomeda valley walk"));
        assert_eq!(parsed.description.as_deref(), Some("Down the valley floor"));
        assert_eq!(parsed.waypoints.len(), 3);
        // KML coordinates are lng,lat; ParsedRoute keeps lat first
        assert!((parsed.waypoints[0].lat - 38.6431).abs() < 1e-9);
        assert!((parsed.waypoints[0].lng - 34.8213).abs() < 1e-9);
        assert_eq!(parsed.markers.len(), 1);
    }

    #[test]
    fn kmz_unwraps_first_kml_entry() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("doc.kml", options).unwrap();
            std::io::Write::write_all(&mut writer, SAMPLE_KML.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        let parsed = parse_bytes(ImportFormat::Kmz, buf.get_ref()).unwrap();
        assert_eq!(parsed.waypoints.len(), 3);
    }

    #[test]
    fn single_point_track_is_rejected() {
        let gpx = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="t" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg><trkpt lat="38.6" lon="34.9"/></trkseg></trk>
</gpx>"#;
        let err = parse_bytes(ImportFormat::Gpx, gpx.as_bytes()).unwrap_err();
        assert_eq!(err.category(), "InvalidGeometry");
    }

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        let c = content_hash(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
