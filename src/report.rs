//! Plain-text reports produced by [`crate::tracker::Tracker`].

use std::fmt;

use chrono::{DateTime, Utc};

use crate::analytics::format::{format_float, format_number, progress_bar, td_format};
use crate::analytics::ranking::{RankingRow, SortColumn};
use crate::analytics::{Activity, Eta, GroupedSpeed, ProgressStats, Speed};
use crate::template::Template;

const BAR_WIDTH: usize = 20;

fn date(dt: Option<DateTime<Utc>>) -> String {
    dt.map_or_else(|| "N/A".to_string(), |d| d.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn owner(t: &Template) -> String {
    t.owner_id.map_or_else(|| "N/A".to_string(), |id| id.to_string())
}

fn signed(n: i64) -> String {
    if n > 0 {
        format!("+{}", format_number(n))
    } else {
        format_number(n)
    }
}

/// Current state of one template.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub template: Template,
    /// Whether the template is in the registry (or is the combo).
    pub registered: bool,
    pub stats: ProgressStats,
    pub tracking_since: Option<DateTime<Utc>>,
    /// Link centred on the first pixel left to place.
    pub url: String,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.template;
        let s = &self.stats;
        if let Some(title) = &t.title {
            writeln!(f, "Title: {}", title)?;
        }
        match (&t.name, self.registered) {
            (Some(name), true) => writeln!(f, "Name: {}", name)?,
            _ => writeln!(f, "Name: (not tracked)")?,
        }
        writeln!(
            f,
            "Correct pixels: {}/{}",
            format_number(s.correct as i64),
            format_number(s.total_placeable as i64)
        )?;
        writeln!(f, "Pixels to place: {}", format_number(s.togo as i64))?;
        writeln!(
            f,
            "Virgin abuse: {} ({}%)",
            format_number(s.virgin_abuse as i64),
            format_float(s.virgin_abuse_percentage)
        )?;
        writeln!(
            f,
            "Progress: {}% {}",
            format_float(s.percentage),
            progress_bar(s.percentage, BAR_WIDTH)
        )?;
        if self.registered {
            writeln!(f, "Tracking since: {}", date(self.tracking_since))?;
            writeln!(f, "Owner: {}", owner(t))?;
        }
        write!(f, "Open template: {}", self.url)
    }
}

/// Check report plus history.
#[derive(Debug, Clone)]
pub struct InfoReport {
    pub check: CheckReport,
    pub activity: Activity,
    pub eta: Eta,
}

impl fmt::Display for InfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.check)?;
        writeln!(f, "Recent activity:")?;
        for (label, delta) in &self.activity.deltas {
            let value = delta.map_or_else(|| "N/A".to_string(), |d| format!("{} px", signed(d)));
            writeln!(f, "  last {}: {}", label, value)?;
        }
        match &self.activity.average {
            Some(avg) => writeln!(
                f,
                "Average speed: {} px/day ({} px/h)",
                format_float(avg.px_per_day),
                format_float(avg.px_per_hour)
            )?,
            None => writeln!(f, "Average speed: N/A")?,
        }
        writeln!(f, "Last updated: {}", date(self.activity.last_updated))?;
        write!(f, "ETA: {}", self.eta)
    }
}

/// Before/after comparison of an update.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub old: Template,
    pub new: Template,
    pub old_stats: Option<ProgressStats>,
    pub new_stats: Option<ProgressStats>,
    /// Animated correctness diff, absent when rendering failed.
    pub gif: Option<Vec<u8>>,
    pub note: Option<String>,
}

fn field(f: &mut fmt::Formatter<'_>, label: &str, old: String, new: String) -> fmt::Result {
    if old == new {
        writeln!(f, "{}: {}", label, new)
    } else {
        writeln!(f, "{}: {} -> {}", label, old, new)
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (o, n) = (&self.old, &self.new);
        let name = |t: &Template| t.name.clone().unwrap_or_default();
        let title = |t: &Template| t.title.clone().unwrap_or_else(|| "N/A".to_string());
        field(f, "Name", name(o), name(n))?;
        field(f, "Owner", owner(o), owner(n))?;
        field(f, "Title", title(o), title(n))?;
        field(f, "URL", o.url.clone(), n.url.clone())?;
        field(
            f,
            "Coordinates",
            format!("({}, {})", o.ox, o.oy),
            format!("({}, {})", n.ox, n.oy),
        )?;
        field(
            f,
            "Dimensions",
            format!("{}x{}", o.width, o.height),
            format!("{}x{}", n.width, n.height),
        )?;
        field(
            f,
            "Size",
            format_number(o.total_placeable() as i64),
            format_number(n.total_placeable() as i64),
        )?;
        let stat = |s: &Option<ProgressStats>, pick: fn(&ProgressStats) -> String| {
            s.as_ref().map_or_else(|| "N/A".to_string(), pick)
        };
        field(
            f,
            "Correct pixels",
            stat(&self.old_stats, |s| format_number(s.correct as i64)),
            stat(&self.new_stats, |s| format_number(s.correct as i64)),
        )?;
        field(
            f,
            "Pixels to place",
            stat(&self.old_stats, |s| format_number(s.togo as i64)),
            stat(&self.new_stats, |s| format_number(s.togo as i64)),
        )?;
        field(
            f,
            "Progress",
            stat(&self.old_stats, |s| format!("{}%", format_float(s.percentage))),
            stat(&self.new_stats, |s| format!("{}%", format_float(s.percentage))),
        )?;
        if let Some(note) = &self.note {
            writeln!(f, "[{}]", note)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum SpeedReport {
    Window { name: String, speed: Speed },
    Grouped { name: String, grouped: GroupedSpeed },
}

impl fmt::Display for SpeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedReport::Window { name, speed } => {
                writeln!(f, "Speed of {}", name)?;
                writeln!(f, "  from: {}", date(Some(speed.from)))?;
                writeln!(f, "  to: {}", date(Some(speed.to)))?;
                writeln!(f, "  duration: {}", td_format(speed.delta_time, false))?;
                writeln!(f, "  progress: {} px", signed(speed.delta_progress))?;
                write!(
                    f,
                    "  speed: {} px/h ({} px/day)",
                    format_float(speed.px_per_hour),
                    format_float(speed.px_per_day)
                )
            }
            SpeedReport::Grouped { name, grouped } => {
                writeln!(f, "Speed of {} per {}", name, grouped.group_by.label())?;
                for b in &grouped.buckets {
                    writeln!(f, "  {}  {}", b.start.format("%Y-%m-%d %H:%M"), signed(b.progress))?;
                }
                writeln!(f, "  total: {} px", signed(grouped.total))?;
                writeln!(f, "  count: {}", grouped.buckets.len())?;
                writeln!(
                    f,
                    "  average: {} px/{}",
                    format_float(grouped.average),
                    grouped.group_by.label()
                )?;
                write!(f, "  min: {}  max: {}", signed(grouped.min), signed(grouped.max))
            }
        }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &[String], widths: &[usize]) -> fmt::Result {
    let parts: Vec<String> = row
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (c, w))| {
            if i == 0 {
                format!("{:<w$}", c, w = *w)
            } else {
                format!("{:>w$}", c, w = *w)
            }
        })
        .collect();
    writeln!(f, "{}", parts.join(" | ").trim_end())
}

/// Ranking table rendered with aligned columns.
#[derive(Debug, Clone)]
pub struct RankingTable {
    pub rows: Vec<RankingRow>,
    pub sort: SortColumn,
    pub last_update: Option<DateTime<Utc>>,
}

impl fmt::Display for RankingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header: Vec<String> = SortColumn::ALL
            .iter()
            .map(|c| {
                if *c == self.sort {
                    format!("{} *", c.title())
                } else {
                    c.title().to_string()
                }
            })
            .collect();
        let cells: Vec<Vec<String>> = self.rows.iter().map(RankingRow::cells).collect();
        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (w, c) in widths.iter_mut().zip(row) {
                *w = (*w).max(c.chars().count());
            }
        }

        write_row(f, &header, &widths)?;
        writeln!(
            f,
            "{}",
            widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
        )?;
        for row in &cells {
            write_row(f, row, &widths)?;
        }
        write!(f, "Last updated: {}", date(self.last_update))
    }
}
