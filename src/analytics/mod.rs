// ============================================================================
// ANALYTICS: percentages, speeds, ETA and recent activity
// ============================================================================

pub mod colors;
pub mod format;
pub mod ranking;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::canvas::{CanvasSnapshot, VirginRule};
use crate::error::{Result, TrackerError};
use crate::store::{ProgressRecord, ProgressStore, quantize};
use crate::template::Template;

/// `correct / total * 100`, `None` when nothing is placeable.
pub fn percentage(correct: u32, total_placeable: u32) -> Option<f64> {
    if total_placeable == 0 {
        return None;
    }
    Some(correct as f64 / total_placeable as f64 * 100.0)
}

/// Current correctness of one template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStats {
    pub correct: u32,
    pub total_placeable: u32,
    pub togo: u32,
    pub percentage: f64,
    pub virgin_abuse: u32,
    pub virgin_abuse_percentage: f64,
}

impl ProgressStats {
    pub fn from_counts(correct: u32, total_placeable: u32, virgin_abuse: u32) -> Result<Self> {
        let pct = percentage(correct, total_placeable).ok_or(TrackerError::OutsideCanvas)?;
        Ok(Self {
            correct,
            total_placeable,
            togo: total_placeable.saturating_sub(correct),
            percentage: pct,
            virgin_abuse,
            virgin_abuse_percentage: virgin_abuse as f64 / total_placeable as f64 * 100.0,
        })
    }

    /// Recompute `template` against `canvas`.
    pub fn measure(template: &mut Template, canvas: &CanvasSnapshot, rule: VirginRule) -> Result<Self> {
        if template.total_placeable() == 0 {
            return Err(TrackerError::OutsideCanvas);
        }
        let correct = template.update_progress(canvas);
        let virgin = if correct != 0 {
            template.get_virgin_abuse(canvas, rule)
        } else {
            0
        };
        Self::from_counts(correct, template.total_placeable(), virgin)
    }
}

// ----------------------------------------------------------------------------
// Speed
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub delta_progress: i64,
    pub delta_time: Duration,
    pub px_per_hour: f64,
    pub px_per_day: f64,
}

impl Speed {
    /// Speed from `start` to `end`.  Fails when no time passed between them.
    pub fn between(start: &ProgressRecord, end: &ProgressRecord) -> Result<Self> {
        let delta_time = end.datetime - start.datetime;
        if delta_time <= Duration::zero() {
            return Err(TrackerError::TimeFrameTooShort);
        }
        let delta_progress = end.progress as i64 - start.progress as i64;
        let hours = delta_time.num_seconds() as f64 / 3600.0;
        Ok(Self {
            from: start.datetime,
            to: end.datetime,
            delta_progress,
            delta_time,
            px_per_hour: delta_progress as f64 / hours,
            px_per_day: delta_progress as f64 / (hours / 24.0),
        })
    }

    /// First to last record of a series.
    pub fn over(records: &[ProgressRecord]) -> Result<Self> {
        match (records.first(), records.last()) {
            (Some(first), Some(last)) => Self::between(first, last),
            _ => Err(TrackerError::NoData),
        }
    }
}

/// Speed between the records nearest at or before `from` and `to`.
pub fn speed_between(
    store: &ProgressStore,
    template: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Speed> {
    let start = store.progress_at(template, from).ok_or(TrackerError::NoData)?;
    let end = store.progress_at(template, to).ok_or(TrackerError::NoData)?;
    Speed::between(&start, &end)
}

// ----------------------------------------------------------------------------
// Grouped speed
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    FiveMinutes,
    Hour,
    Day,
}

impl GroupBy {
    pub fn label(self) -> &'static str {
        match self {
            GroupBy::FiveMinutes => "5min",
            GroupBy::Hour => "hour",
            GroupBy::Day => "day",
        }
    }

    fn bucket_start(self, dt: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
        let local = dt.with_timezone(&offset);
        let naive = match self {
            GroupBy::FiveMinutes => {
                let secs = local.naive_local().and_utc().timestamp();
                DateTime::from_timestamp(secs - secs.rem_euclid(300), 0).map(|d| d.naive_utc())
            }
            GroupBy::Hour => local.date_naive().and_hms_opt(local.hour(), 0, 0),
            GroupBy::Day => local.date_naive().and_hms_opt(0, 0, 0),
        };
        naive
            .and_then(|n| offset.from_local_datetime(&n).single())
            .unwrap_or(local)
    }
}

impl FromStr for GroupBy {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "5min" => Ok(GroupBy::FiveMinutes),
            "hour" => Ok(GroupBy::Hour),
            "day" => Ok(GroupBy::Day),
            other => Err(TrackerError::InvalidFormat(format!("invalid groupby option `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: DateTime<FixedOffset>,
    pub progress: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSpeed {
    pub group_by: GroupBy,
    pub buckets: Vec<Bucket>,
    pub total: i64,
    pub average: f64,
    pub min: i64,
    pub max: i64,
}

/// Sum the record-to-record differences per bucket.
///
/// A difference belongs to the bucket of the later record.  The first bucket
/// holds the series start, whose difference is undefined, so it is dropped.
pub fn grouped_speed(
    records: &[ProgressRecord],
    group_by: GroupBy,
    offset: FixedOffset,
) -> Result<GroupedSpeed> {
    let mut sums: BTreeMap<DateTime<FixedOffset>, i64> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        let diff = if i == 0 {
            0
        } else {
            rec.progress as i64 - records[i - 1].progress as i64
        };
        *sums.entry(group_by.bucket_start(rec.datetime, offset)).or_insert(0) += diff;
    }

    let buckets: Vec<Bucket> = sums
        .into_iter()
        .skip(1)
        .map(|(start, progress)| Bucket { start, progress })
        .collect();
    if buckets.is_empty() {
        return Err(TrackerError::TimeFrameTooShort);
    }

    let total: i64 = buckets.iter().map(|b| b.progress).sum();
    let min = buckets.iter().map(|b| b.progress).min().unwrap_or(0);
    let max = buckets.iter().map(|b| b.progress).max().unwrap_or(0);
    Ok(GroupedSpeed {
        group_by,
        average: total as f64 / buckets.len() as f64,
        buckets,
        total,
        min,
        max,
    })
}

// ----------------------------------------------------------------------------
// ETA
// ----------------------------------------------------------------------------

/// Extrapolated time to completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    Done,
    /// The trend is flat or negative.
    Never,
    NoData,
    Remaining(Duration),
}

impl Eta {
    pub fn from_speed(togo: Option<i64>, px_per_hour: Option<f64>) -> Self {
        match (togo, px_per_hour) {
            (None, _) => Eta::NoData,
            (Some(t), _) if t <= 0 => Eta::Done,
            (Some(_), None) => Eta::NoData,
            (Some(_), Some(s)) if !(s > 0.0) => Eta::Never,
            (Some(t), Some(s)) => {
                let secs = (t as f64 / s * 3600.0).round();
                match Duration::try_seconds(secs as i64) {
                    Some(d) if secs.is_finite() => Eta::Remaining(d),
                    _ => Eta::Never,
                }
            }
        }
    }

    /// Hours to go; `Never` is infinite.
    pub fn hours(&self) -> Option<f64> {
        match self {
            Eta::Done => Some(0.0),
            Eta::Never => Some(f64::INFINITY),
            Eta::NoData => None,
            Eta::Remaining(d) => Some(d.num_seconds() as f64 / 3600.0),
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Done => write!(f, "-Done-"),
            Eta::Never => write!(f, "Never."),
            Eta::NoData => write!(f, "N/A"),
            Eta::Remaining(d) => write!(f, "{}", format::td_format(*d, true)),
        }
    }
}

/// ETA of `template` from its last computed progress (or latest record) and
/// the speed over the trailing `window_days`.
pub fn template_eta(
    template: &Template,
    store: &ProgressStore,
    now: DateTime<Utc>,
    window_days: i64,
) -> Eta {
    let total = template.total_placeable() as i64;
    let correct = template
        .correct_pixels()
        .map(|c| c as i64)
        .or_else(|| store.progress_at(template.id, now).map(|r| r.progress as i64));
    let togo = correct.map(|c| total - c);
    let speed = speed_between(store, template.id, now - Duration::days(window_days), now)
        .ok()
        .map(|s| s.px_per_hour);
    Eta::from_speed(togo, speed)
}

// ----------------------------------------------------------------------------
// Recent activity
// ----------------------------------------------------------------------------

pub const ACTIVITY_WINDOWS: [(&str, i64); 5] = [
    ("5 minutes", 5),
    ("hour", 60),
    ("6 hours", 6 * 60),
    ("day", 24 * 60),
    ("week", 7 * 24 * 60),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    /// Pixels gained in each of [`ACTIVITY_WINDOWS`].
    pub deltas: Vec<(&'static str, Option<i64>)>,
    /// Average since tracking started.
    pub average: Option<Speed>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub fn recent_activity(store: &ProgressStore, template: Uuid, now: DateTime<Utc>) -> Activity {
    let now = quantize(now);
    let last = store.progress_at(template, now);
    let deltas = ACTIVITY_WINDOWS
        .iter()
        .map(|&(label, minutes)| {
            let past = store.progress_at(template, now - Duration::minutes(minutes));
            let delta = match (last, past) {
                (Some(l), Some(p)) => Some(l.progress as i64 - p.progress as i64),
                _ => None,
            };
            (label, delta)
        })
        .collect();
    let average = match (store.oldest(template), last) {
        (Some(first), Some(l)) => Speed::between(&first, &l).ok(),
        _ => None,
    };
    Activity {
        deltas,
        average,
        last_updated: last.map(|l| l.datetime),
    }
}
