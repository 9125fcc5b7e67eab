//! Correlates photograph capture times with GPX track logs.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub mod config;
pub mod export;
pub mod matcher;
pub mod metadata;

pub use config::{
    localize, parse_duration, resolve_timezone, validate_directory, validate_readable_path,
    validate_timezone, validate_writable_path, ConfigErrors, ConfigIssue, LinkConfig, LinkOptions,
};
pub use export::{from_geojson, render, to_geojson, to_gpx, OutputFormat};
pub use matcher::{batch_match, find_best_match, Match, MatchInput, MatchParams};
pub use metadata::{list_images, ExifReader, TimestampReader};

#[derive(Error, Debug)]
pub enum TsError {
    #[error("failed to parse track file: {0}")]
    UnparsableTrackFile(String),
    #[error("no capture timestamp in {0}")]
    MissingMetadata(String),
    #[error("unreadable image {0}")]
    UnreadableImage(String),
    #[error("invalid duration format: {0:?}")]
    InvalidDurationFormat(String),
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("failed to export matches: {0}")]
    Export(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single timestamped position. `time` carries no zone; it is interpreted
/// in the track timezone at comparison time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackSample {
    pub time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub name: Option<String>,
}

impl TrackSample {
    pub fn new(time: NaiveDateTime, latitude: f64, longitude: f64) -> Self {
        Self {
            time,
            latitude,
            longitude,
            elevation: None,
            name: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub samples: Vec<TrackSample>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub name: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackDataset {
    pub tracks: Vec<Track>,
    pub waypoints: Vec<TrackSample>,
}

impl TrackDataset {
    /// Every sample in matching order: track points first, then waypoints.
    pub fn samples(&self) -> impl Iterator<Item = &TrackSample> + '_ {
        self.tracks
            .iter()
            .flat_map(|track| track.segments.iter())
            .flat_map(|segment| segment.samples.iter())
            .chain(self.waypoints.iter())
    }

    pub fn len(&self) -> usize {
        self.samples().count()
    }

    pub fn is_empty(&self) -> bool {
        self.samples().next().is_none()
    }
}

/// Parse a GPX document into a dataset, keeping track, segment and waypoint order.
pub fn parse_track_dataset<R: Read>(input: R) -> Result<TrackDataset, TsError> {
    let gpx = gpx::read(input).map_err(|e| TsError::UnparsableTrackFile(e.to_string()))?;
    let mut dropped = 0usize;

    let mut tracks = Vec::with_capacity(gpx.tracks.len());
    for track in &gpx.tracks {
        let mut segments = Vec::with_capacity(track.segments.len());
        for segment in &track.segments {
            let mut samples = Vec::with_capacity(segment.points.len());
            for point in &segment.points {
                match sample_from_waypoint(point)? {
                    Some(sample) => samples.push(sample),
                    None => dropped += 1,
                }
            }
            segments.push(Segment { samples });
        }
        tracks.push(Track {
            name: track.name.clone(),
            segments,
        });
    }

    let mut waypoints = Vec::with_capacity(gpx.waypoints.len());
    for point in &gpx.waypoints {
        match sample_from_waypoint(point)? {
            Some(sample) => waypoints.push(sample),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("dropped {} GPX points without a timestamp", dropped);
    }
    Ok(TrackDataset { tracks, waypoints })
}

/// Open and parse a GPX file. Each call returns a fresh dataset.
pub fn load_track_dataset(path: &Path) -> Result<TrackDataset, TsError> {
    let file = File::open(path)?;
    let dataset = parse_track_dataset(BufReader::new(file)).map_err(|err| match err {
        TsError::UnparsableTrackFile(msg) => {
            TsError::UnparsableTrackFile(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;
    info!(
        "Loaded {}: {} tracks, {} waypoints",
        path.display(),
        dataset.tracks.len(),
        dataset.waypoints.len()
    );
    Ok(dataset)
}

fn sample_from_waypoint(point: &gpx::Waypoint) -> Result<Option<TrackSample>, TsError> {
    let Some(time) = point.time.as_ref() else {
        return Ok(None);
    };
    let iso = time
        .format()
        .map_err(|e| TsError::UnparsableTrackFile(e.to_string()))?;
    // Wall-clock reading as written in the file; the zone comes from configuration.
    let naive = DateTime::parse_from_rfc3339(&iso)
        .map_err(|e| TsError::UnparsableTrackFile(e.to_string()))?
        .naive_local();
    let geo = point.point();
    Ok(Some(TrackSample {
        time: naive,
        latitude: geo.y(),
        longitude: geo.x(),
        elevation: point.elevation,
        name: point.name.clone(),
    }))
}
