// ============================================================================
// PROGRESS STORE: append-only time series of correct-pixel counts
// ============================================================================
//
// On disk: a bincode header followed by one bincode frame per record.  The
// whole log is replayed into an in-memory index on open; a truncated trailing
// frame (crash mid-write) is cut off with a warning.  A failed append is
// truncated back out of the file so later frames stay aligned.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::{log_err, log_info, log_warn};

/// Width of the timestamp grid, in seconds.
pub const GRID_SECS: i64 = 5 * 60;

const LOG_MAGIC: &str = "PXP1";

/// Round `dt` down to the 5-minute grid.
pub fn quantize(dt: DateTime<Utc>) -> DateTime<Utc> {
    let secs = dt.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(GRID_SECS), 0).unwrap_or(dt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub template: Uuid,
    pub datetime: DateTime<Utc>,
    pub progress: u32,
}

#[derive(Serialize, Deserialize)]
struct LogHeader {
    magic: String,
}

#[derive(Serialize, Deserialize)]
struct LogFrame {
    template: Uuid,
    timestamp: i64,
    progress: u32,
}

type Series = BTreeMap<i64, u32>;

/// Where encoded frames go.
trait LogSink: Send {
    fn len(&mut self) -> io::Result<u64>;
    /// Write and flush one whole frame.
    fn append(&mut self, frame: &[u8]) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame)?;
        self.flush()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

enum LogState {
    Memory,
    Open(Box<dyn LogSink>),
    /// A failed append could not be rolled back; the file tail is unknown.
    Failed,
}

impl LogState {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let LogState::Open(sink) = self else {
            return match self {
                LogState::Failed => Err(TrackerError::Io(io::Error::other(
                    "progress log is read-only after a failed rollback",
                ))),
                _ => Ok(()),
            };
        };
        let before = sink.len()?;
        let Err(e) = sink.append(frame) else {
            return Ok(());
        };
        match sink.truncate(before) {
            Ok(()) => log_warn!("progress log: append failed, rolled back to {} bytes: {}", before, e),
            Err(t) => {
                log_err!("progress log: append failed ({}) and rollback failed ({}), refusing writes", e, t);
                *self = LogState::Failed;
            }
        }
        Err(e.into())
    }
}

/// Result of decoding a log image.
struct Replay {
    series: HashMap<Uuid, Series>,
    last_update: Option<i64>,
    count: usize,
    /// Length of the decodable prefix.
    good_len: u64,
}

fn header_bytes() -> Result<Vec<u8>> {
    Ok(bincode::serialize(&LogHeader {
        magic: LOG_MAGIC.to_string(),
    })?)
}

fn replay(raw: &[u8]) -> Result<Replay> {
    let mut out = Replay {
        series: HashMap::new(),
        last_update: None,
        count: 0,
        good_len: 0,
    };
    if raw.is_empty() {
        return Ok(out);
    }
    let mut cursor = Cursor::new(raw);
    let header: LogHeader = bincode::deserialize_from(&mut cursor)
        .map_err(|_| TrackerError::InvalidFormat("progress log header is unreadable".into()))?;
    if header.magic != LOG_MAGIC {
        return Err(TrackerError::InvalidFormat(format!(
            "unknown progress log magic '{}'",
            header.magic
        )));
    }
    out.good_len = cursor.position();
    while (cursor.position() as usize) < raw.len() {
        let Ok(frame) = bincode::deserialize_from::<_, LogFrame>(&mut cursor) else {
            break;
        };
        out.series
            .entry(frame.template)
            .or_default()
            .insert(frame.timestamp, frame.progress);
        out.last_update = out.last_update.max(Some(frame.timestamp));
        out.good_len = cursor.position();
        out.count += 1;
    }
    Ok(out)
}

/// Progress history for every template.
///
/// Writers are serialized by the log mutex; the index lock is only taken
/// for the final insert, so readers never wait on disk I/O.
pub struct ProgressStore {
    series: RwLock<HashMap<Uuid, Series>>,
    last_update: RwLock<Option<i64>>,
    log: Mutex<LogState>,
}

impl ProgressStore {
    /// A store that lives in memory only.
    pub fn in_memory() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            last_update: RwLock::new(None),
            log: Mutex::new(LogState::Memory),
        }
    }

    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let replayed = replay(&raw)?;

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if raw.is_empty() {
            file.append(&header_bytes()?)?;
        } else if replayed.good_len < raw.len() as u64 {
            log_warn!(
                "progress log {}: dropping {} trailing bytes",
                path.display(),
                raw.len() as u64 - replayed.good_len
            );
            file.set_len(replayed.good_len)?;
        }
        log_info!("progress log {}: {} records loaded", path.display(), replayed.count);

        Ok(Self::from_replay(replayed, LogState::Open(Box::new(file))))
    }

    fn from_replay(replayed: Replay, log: LogState) -> Self {
        Self {
            series: RwLock::new(replayed.series),
            last_update: RwLock::new(replayed.last_update),
            log: Mutex::new(log),
        }
    }

    /// Append one record.  `at` is quantized; it must be later than the
    /// template's latest record.
    pub fn append(&self, template: Uuid, at: DateTime<Utc>, progress: u32) -> Result<ProgressRecord> {
        let at = quantize(at);
        let ts = at.timestamp();
        let mut log = self.log.lock();

        let latest = self
            .series
            .read()
            .get(&template)
            .and_then(|s| s.keys().next_back().copied());
        if latest.is_some_and(|l| l >= ts) {
            return Err(TrackerError::OutOfOrder {
                name: template.to_string(),
            });
        }

        let frame = bincode::serialize(&LogFrame {
            template,
            timestamp: ts,
            progress,
        })?;
        log.write_frame(&frame)?;

        self.series.write().entry(template).or_default().insert(ts, progress);
        let mut last = self.last_update.write();
        *last = (*last).max(Some(ts));

        Ok(ProgressRecord {
            template,
            datetime: at,
            progress,
        })
    }

    /// Nearest record at or before `at` (quantized).
    pub fn progress_at(&self, template: Uuid, at: DateTime<Utc>) -> Option<ProgressRecord> {
        let ts = quantize(at).timestamp();
        let series = self.series.read();
        let (&t, &p) = series.get(&template)?.range(..=ts).next_back()?;
        record(template, t, p)
    }

    /// Records with `from <= datetime <= to`, oldest first.  `None` bounds
    /// are open.
    pub fn range(
        &self,
        template: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<ProgressRecord> {
        let lo = from.map_or(i64::MIN, |d| d.timestamp());
        let hi = to.map_or(i64::MAX, |d| d.timestamp());
        if lo > hi {
            return Vec::new();
        }
        let series = self.series.read();
        let Some(s) = series.get(&template) else {
            return Vec::new();
        };
        s.range(lo..=hi)
            .filter_map(|(&t, &p)| record(template, t, p))
            .collect()
    }

    pub fn oldest(&self, template: Uuid) -> Option<ProgressRecord> {
        let series = self.series.read();
        let (&t, &p) = series.get(&template)?.iter().next()?;
        record(template, t, p)
    }

    pub fn latest(&self, template: Uuid) -> Option<ProgressRecord> {
        let series = self.series.read();
        let (&t, &p) = series.get(&template)?.iter().next_back()?;
        record(template, t, p)
    }

    /// Most recent write across all templates.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        let last = *self.last_update.read();
        last.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn record_count(&self, template: Uuid) -> usize {
        self.series.read().get(&template).map_or(0, |s| s.len())
    }
}

fn record(template: Uuid, ts: i64, progress: u32) -> Option<ProgressRecord> {
    Some(ProgressRecord {
        template,
        datetime: DateTime::from_timestamp(ts, 0)?,
        progress,
    })
}
