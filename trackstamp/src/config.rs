//! User-facing parameters: duration strings, timezone names and paths, and
//! their validation into a typed [`LinkConfig`].

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::export::OutputFormat;
use crate::matcher::MatchParams;
use crate::TsError;

const UNITS: [(char, i64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];
/// 100 years. Anything larger cannot be added to a calendar date safely.
const MAX_DURATION_SECS: i64 = 36_500 * 86_400;

/// Parse a compact duration like `2h20m`, `4d3h12s` or `-5m`.
///
/// Components are `<digits><unit>` with units `d`, `h`, `m`, `s` (any case),
/// each at most once and in that order. A leading `+` or `-` sets the sign.
/// Magnitudes above 36500 days are rejected.
pub fn parse_duration(text: &str) -> Result<Duration, TsError> {
    let invalid = || TsError::InvalidDurationFormat(text.to_string());
    let trimmed = text.trim();
    let (negative, mut rest) = if let Some(body) = trimmed.strip_prefix('-') {
        (true, body)
    } else if let Some(body) = trimmed.strip_prefix('+') {
        (false, body)
    } else {
        (false, trimmed)
    };
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    let mut next_rank = 0usize;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if split == 0 {
            return Err(invalid());
        }
        let value: i64 = rest[..split].parse().map_err(|_| invalid())?;
        let unit = rest[split..].chars().next().ok_or_else(invalid)?;
        let rank = UNITS
            .iter()
            .position(|(u, _)| *u == unit.to_ascii_lowercase())
            .ok_or_else(invalid)?;
        if rank < next_rank {
            return Err(invalid());
        }
        next_rank = rank + 1;
        total = value
            .checked_mul(UNITS[rank].1)
            .and_then(|secs| total.checked_add(secs))
            .filter(|secs| *secs <= MAX_DURATION_SECS)
            .ok_or_else(invalid)?;
        rest = &rest[split + unit.len_utf8()..];
    }

    let seconds = if negative { -total } else { total };
    Ok(Duration::seconds(seconds))
}

pub fn validate_timezone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

pub fn resolve_timezone(name: &str) -> Result<Tz, TsError> {
    name.parse::<Tz>()
        .map_err(|_| TsError::UnknownTimezone(name.to_string()))
}

/// Interpret a naive wall-clock reading in `tz` and return the UTC instant.
///
/// Ambiguous readings (clocks turned back) take the later, standard-time
/// instant. Readings inside a spring-forward gap are shifted by the offset
/// the zone has at that reading taken as a UTC instant.
pub fn localize(naive: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => local.with_timezone(&Utc),
        LocalResult::Ambiguous(_, later) => later.with_timezone(&Utc),
        LocalResult::None => {
            let offset = tz.offset_from_utc_datetime(&naive).fix();
            let utc = naive - Duration::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}

pub fn validate_readable_path(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// True when `path` is an existing writable file, or does not exist yet but
/// its parent directory is writable. Never creates or truncates anything.
pub fn validate_writable_path(path: &Path) -> bool {
    if path.exists() {
        return path.is_file() && OpenOptions::new().append(true).open(path).is_ok();
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::metadata(parent)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}

pub fn validate_directory(path: &Path) -> bool {
    path.is_dir()
}

/// A single configuration problem, tagged with the parameter it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigIssue {
    UnreadableFile { param: &'static str, path: PathBuf },
    UnwritableFile { param: &'static str, path: PathBuf },
    NotADirectory { param: &'static str, path: PathBuf },
    UnknownTimezone { param: &'static str, name: String },
    InvalidDuration { param: &'static str, value: String },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::UnreadableFile { param, path } => write!(
                f,
                "{}: file path {} does not exist or is not readable.",
                param,
                path.display()
            ),
            ConfigIssue::UnwritableFile { param, path } => write!(
                f,
                "{}: file path {} is not writable.",
                param,
                path.display()
            ),
            ConfigIssue::NotADirectory { param, path } => write!(
                f,
                "{}: path {} does not exist or is not a directory.",
                param,
                path.display()
            ),
            ConfigIssue::UnknownTimezone { param, name } => {
                write!(f, "{}: bad timezone: {}", param, name)
            }
            ConfigIssue::InvalidDuration { param, value } => write!(
                f,
                "{}: invalid duration {:?} (expected e.g. 1m, 2h20m, -30s)",
                param, value
            ),
        }
    }
}

/// Every problem found while validating a [`LinkOptions`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

impl ConfigErrors {
    pub fn issues(&self) -> &[ConfigIssue] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.0.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

/// Raw, unvalidated options as a user would type them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkOptions {
    pub track_paths: Vec<PathBuf>,
    pub image_folder: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub accuracy: String,
    pub offset_gpx: String,
    pub offset_images: String,
    pub tz_images: String,
    pub tz_gpx: String,
    pub image_prefix: String,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            track_paths: Vec::new(),
            image_folder: None,
            output_path: None,
            output_format: OutputFormat::Geojson,
            accuracy: "1m".to_string(),
            offset_gpx: "0s".to_string(),
            offset_images: "0s".to_string(),
            tz_images: "UTC".to_string(),
            tz_gpx: "UTC".to_string(),
            image_prefix: String::new(),
        }
    }
}

/// Validated configuration ready for a matching session.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub track_paths: Vec<PathBuf>,
    pub image_folder: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub params: MatchParams,
    pub image_tz: Tz,
    pub image_prefix: String,
}

impl LinkOptions {
    /// Check every option, collecting all problems rather than stopping at the first.
    pub fn validate(&self) -> Result<LinkConfig, ConfigErrors> {
        let mut issues = Vec::new();

        for path in &self.track_paths {
            if !validate_readable_path(path) {
                issues.push(ConfigIssue::UnreadableFile {
                    param: "track_path",
                    path: path.clone(),
                });
            }
        }
        if let Some(dir) = self.image_folder.as_ref() {
            if !validate_directory(dir) {
                issues.push(ConfigIssue::NotADirectory {
                    param: "image_folder",
                    path: dir.clone(),
                });
            }
        }
        let image_tz = timezone_param("--tz-images", &self.tz_images, &mut issues);
        let track_tz = timezone_param("--tz-gpx", &self.tz_gpx, &mut issues);
        if let Some(out) = self.output_path.as_ref() {
            if !validate_writable_path(out) {
                issues.push(ConfigIssue::UnwritableFile {
                    param: "--output-path",
                    path: out.clone(),
                });
            }
        }
        let tolerance = duration_param("--accuracy", &self.accuracy, &mut issues);
        let track_offset = duration_param("--offset-gpx", &self.offset_gpx, &mut issues);
        let target_offset = duration_param("--offset-images", &self.offset_images, &mut issues);

        match (image_tz, track_tz, tolerance, track_offset, target_offset) {
            (
                Some(image_tz),
                Some(track_tz),
                Some(tolerance),
                Some(track_offset),
                Some(target_offset),
            ) if issues.is_empty() => {
                Ok(LinkConfig {
                    track_paths: self
                        .track_paths
                        .iter()
                        .map(PathBuf::as_path)
                        .map(absolute)
                        .collect(),
                    image_folder: self.image_folder.as_deref().map(absolute),
                    output_path: self.output_path.as_deref().map(absolute),
                    output_format: self.output_format,
                    params: MatchParams {
                        tolerance,
                        track_offset,
                        target_offset,
                        track_tz,
                    },
                    image_tz,
                    image_prefix: self.image_prefix.clone(),
                })
            }
            _ => Err(ConfigErrors(issues)),
        }
    }
}

fn timezone_param(param: &'static str, name: &str, issues: &mut Vec<ConfigIssue>) -> Option<Tz> {
    match resolve_timezone(name) {
        Ok(tz) => Some(tz),
        Err(_) => {
            issues.push(ConfigIssue::UnknownTimezone {
                param,
                name: name.to_string(),
            });
            None
        }
    }
}

fn duration_param(
    param: &'static str,
    value: &str,
    issues: &mut Vec<ConfigIssue>,
) -> Option<Duration> {
    match parse_duration(value) {
        Ok(d) => Some(d),
        Err(_) => {
            issues.push(ConfigIssue::InvalidDuration {
                param,
                value: value.to_string(),
            });
            None
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
