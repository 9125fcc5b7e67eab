//! Output documents for a list of matches: GeoJSON points or GPX waypoints.

use std::fmt::Display;

use gpx::{Gpx, GpxVersion, Waypoint};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use crate::matcher::Match;
use crate::TsError;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Geojson,
    Gpx,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PointGeometry,
    pub properties: FeatureProperties,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude, elevation]`; elevation is `null` when unknown.
    pub coordinates: (f64, f64, Option<f64>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeatureProperties {
    pub content: String,
}

fn label<P: Display>(prefix: &str, payload: &P) -> String {
    format!("{}{}", prefix, payload)
}

pub fn to_feature_collection<P: Display>(matches: &[Match<P>], prefix: &str) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection".to_string(),
        features: matches
            .iter()
            .map(|m| Feature {
                kind: "Feature".to_string(),
                geometry: PointGeometry {
                    kind: "Point".to_string(),
                    coordinates: (m.sample.longitude, m.sample.latitude, m.sample.elevation),
                },
                properties: FeatureProperties {
                    content: label(prefix, &m.payload),
                },
            })
            .collect(),
    }
}

/// Pretty-printed GeoJSON `FeatureCollection`, 4-space indented.
pub fn to_geojson<P: Display>(matches: &[Match<P>], prefix: &str) -> Result<String, TsError> {
    let collection = to_feature_collection(matches, prefix);
    let mut out = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    collection
        .serialize(&mut ser)
        .map_err(|e| TsError::Export(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TsError::Export(e.to_string()))
}

pub fn from_geojson(text: &str) -> Result<FeatureCollection, TsError> {
    serde_json::from_str(text).map_err(|e| TsError::Export(e.to_string()))
}

/// GPX 1.1 document with one named waypoint per match.
pub fn to_gpx<P: Display>(matches: &[Match<P>], prefix: &str) -> Result<String, TsError> {
    let mut doc = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(concat!("trackstamp ", env!("CARGO_PKG_VERSION")).to_string()),
        ..Default::default()
    };
    for m in matches {
        let mut waypoint = Waypoint::new(geo_types::Point::new(
            m.sample.longitude,
            m.sample.latitude,
        ));
        waypoint.elevation = m.sample.elevation;
        waypoint.name = Some(label(prefix, &m.payload));
        doc.waypoints.push(waypoint);
    }
    let mut out = Vec::new();
    gpx::write(&doc, &mut out).map_err(|e| TsError::Export(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TsError::Export(e.to_string()))
}

pub fn render<P: Display>(
    format: OutputFormat,
    matches: &[Match<P>],
    prefix: &str,
) -> Result<String, TsError> {
    match format {
        OutputFormat::Geojson => to_geojson(matches, prefix),
        OutputFormat::Gpx => to_gpx(matches, prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::at;
    use crate::{parse_track_dataset, TrackSample};

    fn matches() -> Vec<Match<String>> {
        let mut high = TrackSample::new(at(2012, 8, 25, 20, 59, 20), 46.787799, -121.733713);
        high.elevation = Some(1650.5);
        let low = TrackSample::new(at(2012, 8, 25, 21, 0, 20), 46.7881, -121.7331);
        vec![
            Match {
                payload: "DSC_9506.jpg".to_string(),
                sample: high,
            },
            Match {
                payload: "DSC_9507.jpg".to_string(),
                sample: low,
            },
        ]
    }

    #[test]
    fn geojson_round_trips_coordinates_and_labels() {
        let text = to_geojson(&matches(), "photos/").unwrap();
        let parsed = from_geojson(&text).unwrap();
        assert_eq!(parsed.kind, "FeatureCollection");
        assert_eq!(parsed, to_feature_collection(&matches(), "photos/"));

        let first = &parsed.features[0];
        assert_eq!(first.geometry.kind, "Point");
        assert_eq!(first.geometry.coordinates, (-121.733713, 46.787799, Some(1650.5)));
        assert_eq!(first.properties.content, "photos/DSC_9506.jpg");
        assert_eq!(parsed.features[1].geometry.coordinates.2, None);
    }

    #[test]
    fn geojson_layout_matches_convention() {
        let text = to_geojson(&matches(), "").unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["features"][0]["geometry"]["coordinates"][0], -121.733713);
        assert_eq!(value["features"][0]["geometry"]["coordinates"][1], 46.787799);
        assert!(value["features"][1]["geometry"]["coordinates"][2].is_null());
        assert!(text.contains("\n    \"features\""));
    }

    #[test]
    fn empty_match_list_is_valid_geojson() {
        let empty: Vec<Match<String>> = Vec::new();
        let parsed = from_geojson(&to_geojson(&empty, "").unwrap()).unwrap();
        assert!(parsed.features.is_empty());
    }

    #[test]
    fn gpx_export_reparses_as_waypoints() {
        let text = to_gpx(&matches(), "img-").unwrap();
        let waypoints = read_waypoints(&text);
        assert_eq!(waypoints.len(), 2);
        assert_eq!(waypoints[0].0, 46.787799);
        assert_eq!(waypoints[0].1, -121.733713);
        assert_eq!(waypoints[0].2, Some(1650.5));
        assert_eq!(waypoints[0].3.as_deref(), Some("img-DSC_9506.jpg"));
        assert_eq!(waypoints[1].3.as_deref(), Some("img-DSC_9507.jpg"));
    }

    // Exported waypoints carry no time, so read them with the gpx crate directly.
    fn read_waypoints(text: &str) -> Vec<(f64, f64, Option<f64>, Option<String>)> {
        let doc = gpx::read(text.as_bytes()).unwrap();
        assert!(doc.tracks.is_empty());
        doc.waypoints
            .iter()
            .map(|w| (w.point().y(), w.point().x(), w.elevation, w.name.clone()))
            .collect()
    }

    #[test]
    fn untimed_gpx_export_yields_no_matchable_samples() {
        let text = to_gpx(&matches(), "").unwrap();
        let dataset = parse_track_dataset(text.as_bytes()).unwrap();
        assert!(dataset.is_empty());
    }

    #[test]
    fn render_dispatches_on_format() {
        let geo = render(OutputFormat::Geojson, &matches(), "").unwrap();
        assert!(geo.trim_start().starts_with('{'));
        let doc = render(OutputFormat::Gpx, &matches(), "").unwrap();
        assert!(doc.contains("<gpx"));
    }
}
