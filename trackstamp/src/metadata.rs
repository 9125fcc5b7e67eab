//! Capture timestamps from image metadata, and image discovery.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag, Value};
use tracing::debug;

use crate::TsError;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// Source of naive capture timestamps for image files.
pub trait TimestampReader {
    fn read_capture_timestamp(&self, path: &Path) -> Result<NaiveDateTime, TsError>;
}

/// Reads `DateTimeOriginal`, falling back to `DateTime`, from EXIF.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExifReader;

impl TimestampReader for ExifReader {
    fn read_capture_timestamp(&self, path: &Path) -> Result<NaiveDateTime, TsError> {
        let file = File::open(path)
            .map_err(|e| TsError::UnreadableImage(format!("{}: {}", path.display(), e)))?;
        read_exif_timestamp(&mut BufReader::new(file), &path.display().to_string())
    }
}

/// Extract the capture timestamp from any EXIF container (JPEG, TIFF, ...).
pub fn read_exif_timestamp<R: BufRead + Seek>(
    reader: &mut R,
    name: &str,
) -> Result<NaiveDateTime, TsError> {
    let exif = Reader::new()
        .read_from_container(reader)
        .map_err(|err| match err {
            exif::Error::NotFound(_) => TsError::MissingMetadata(name.to_string()),
            other => TsError::UnreadableImage(format!("{}: {}", name, other)),
        })?;

    [Tag::DateTimeOriginal, Tag::DateTime]
        .iter()
        .filter_map(|tag| exif.get_field(*tag, In::PRIMARY))
        .find_map(|field| match &field.value {
            Value::Ascii(parts) => parts.first().and_then(|bytes| parse_exif_datetime(bytes)),
            _ => None,
        })
        .ok_or_else(|| TsError::MissingMetadata(name.to_string()))
}

fn parse_exif_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(bytes).ok()?;
    NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
        .and_hms_opt(
            u32::from(dt.hour),
            u32::from(dt.minute),
            u32::from(dt.second),
        )
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Supported image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, TsError> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            images.push(path);
        } else {
            debug!("Ignoring {}", path.display());
        }
    }
    images.sort();
    Ok(images)
}
