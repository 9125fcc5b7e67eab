//! Timestamp-to-track matching.

use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::config::localize;
use crate::metadata::TimestampReader;
use crate::{TrackDataset, TrackSample};

/// Tolerance, clock offsets and track timezone for one matching session.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchParams {
    pub tolerance: Duration,
    /// Added to every track sample before comparison.
    pub track_offset: Duration,
    /// Added to the target timestamp before comparison.
    pub target_offset: Duration,
    pub track_tz: Tz,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            tolerance: Duration::minutes(1),
            track_offset: Duration::zero(),
            target_offset: Duration::zero(),
            track_tz: Tz::UTC,
        }
    }
}

impl MatchParams {
    /// `None` when the offset pushes the sample outside the representable range.
    fn effective_time(&self, sample: &TrackSample) -> Option<DateTime<Utc>> {
        localize(sample.time, &self.track_tz).checked_add_signed(self.track_offset)
    }
}

/// Find the sample closest in time to `target`, strictly within tolerance.
///
/// Samples are visited dataset by dataset: track points (track, segment,
/// point order) and then the dataset's waypoints. On equal distance the
/// sample visited first is kept. Offsets that leave the representable date
/// range drop the affected sample, or the whole query for the target.
pub fn find_best_match<'a>(
    target: DateTime<Utc>,
    datasets: &'a [TrackDataset],
    params: &MatchParams,
) -> Option<&'a TrackSample> {
    let Some(target) = target.checked_add_signed(params.target_offset) else {
        debug!("target {} out of range after offset", target);
        return None;
    };
    datasets
        .iter()
        .flat_map(TrackDataset::samples)
        .filter_map(|sample| {
            let effective = params.effective_time(sample)?;
            let delta = abs_duration(effective - target);
            trace!(
                "sample {} -> {} (delta {}s)",
                sample.time,
                effective,
                delta.num_seconds()
            );
            (delta < params.tolerance).then_some((sample, delta))
        })
        .fold(None::<(&TrackSample, Duration)>, |best, candidate| match best {
            Some((_, best_delta)) if best_delta <= candidate.1 => best,
            _ => Some(candidate),
        })
        .map(|(sample, _)| sample)
}

fn abs_duration(d: Duration) -> Duration {
    if d < Duration::zero() {
        -d
    } else {
        d
    }
}

/// One item to be matched. Images are read through a [`TimestampReader`];
/// records carry their own naive timestamp, which may be absent.
#[derive(Clone, Debug)]
pub enum MatchInput<P> {
    Image { path: PathBuf, payload: P },
    Record {
        payload: P,
        timestamp: Option<NaiveDateTime>,
    },
}

impl<P> MatchInput<P> {
    pub fn payload(&self) -> &P {
        match self {
            MatchInput::Image { payload, .. } | MatchInput::Record { payload, .. } => payload,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Match<P> {
    pub payload: P,
    pub sample: TrackSample,
}

/// Match every input independently against the same datasets.
///
/// Target timestamps are localized with `image_tz`. Inputs without a usable
/// timestamp, and inputs with no sample in tolerance, are left out. Output
/// order follows input order.
pub fn batch_match<P, R>(
    inputs: Vec<MatchInput<P>>,
    datasets: &[TrackDataset],
    params: &MatchParams,
    image_tz: &Tz,
    reader: &R,
) -> Vec<Match<P>>
where
    P: Send,
    R: TimestampReader + Sync + ?Sized,
{
    inputs
        .into_par_iter()
        .filter_map(|input| {
            let (payload, naive) = match input {
                MatchInput::Image { path, payload } => match reader.read_capture_timestamp(&path) {
                    Ok(ts) => (payload, ts),
                    Err(err) => {
                        warn!("Skipping {}: {}", path.display(), err);
                        return None;
                    }
                },
                MatchInput::Record {
                    payload,
                    timestamp: Some(ts),
                } => (payload, ts),
                MatchInput::Record {
                    timestamp: None, ..
                } => {
                    debug!("Skipping record without timestamp");
                    return None;
                }
            };
            let target = localize(naive, image_tz);
            let found = find_best_match(target, datasets, params);
            debug!(
                "target {} -> {}",
                target,
                found.map_or_else(|| "no match".to_string(), |s| s.time.to_string())
            );
            found.map(|sample| Match {
                payload,
                sample: sample.clone(),
            })
        })
        .collect()
}
