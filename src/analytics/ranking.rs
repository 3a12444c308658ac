//! Multi-template ranking table.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;

use super::colors::{ColorScale, Rgb};
use super::format::{format_float, format_number, format_opt};
use super::{Eta, percentage, speed_between};
use crate::error::{Result, TrackerError};
use crate::store::{ProgressStore, quantize};
use crate::template::Template;

/// Speed windows of the table, in hours: 1h, 6h, 1d, 7d.
pub const SPEED_WINDOWS: [i64; 4] = [1, 6, 24, 7 * 24];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    Name,
    Size,
    Correct,
    Togo,
    Percentage,
    #[default]
    Speed1h,
    Speed6h,
    Speed1d,
    Speed7d,
    Eta,
}

impl SortColumn {
    pub const ALL: [SortColumn; 10] = [
        SortColumn::Name,
        SortColumn::Size,
        SortColumn::Correct,
        SortColumn::Togo,
        SortColumn::Percentage,
        SortColumn::Speed1h,
        SortColumn::Speed6h,
        SortColumn::Speed1d,
        SortColumn::Speed7d,
        SortColumn::Eta,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SortColumn::Name => "Name",
            SortColumn::Size => "Size",
            SortColumn::Correct => "Correct",
            SortColumn::Togo => "To Go",
            SortColumn::Percentage => "%",
            SortColumn::Speed1h => "px/h (1h)",
            SortColumn::Speed6h => "px/h (6h)",
            SortColumn::Speed1d => "px/h (1d)",
            SortColumn::Speed7d => "px/h (7d)",
            SortColumn::Eta => "ETA",
        }
    }

    pub fn ascending(self) -> bool {
        matches!(self, SortColumn::Name | SortColumn::Eta)
    }
}

impl FromStr for SortColumn {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "name" => SortColumn::Name,
            "size" => SortColumn::Size,
            "correct" => SortColumn::Correct,
            "togo" | "to_go" => SortColumn::Togo,
            "%" | "percentage" => SortColumn::Percentage,
            "1h" | "speed1h" => SortColumn::Speed1h,
            "6h" | "speed6h" => SortColumn::Speed6h,
            "1d" | "speed1d" => SortColumn::Speed1d,
            "7d" | "speed7d" => SortColumn::Speed7d,
            "eta" => SortColumn::Eta,
            other => {
                return Err(TrackerError::InvalidFormat(format!("unknown column `{}`", other)));
            }
        })
    }
}

/// Cell colours, `None` where the cell is uncoloured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowColors {
    pub percentage: Option<Rgb>,
    pub speeds: [Option<Rgb>; 4],
    pub eta: Option<Rgb>,
}

/// One table row.  `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRow {
    pub name: String,
    pub size: u32,
    pub correct: Option<u32>,
    pub togo: Option<i64>,
    pub percentage: Option<f64>,
    /// px/h over each of [`SPEED_WINDOWS`].
    pub speeds: [Option<f64>; 4],
    pub eta: Eta,
    pub colors: RowColors,
}

impl RankingRow {
    /// The ETA extrapolates over the trailing `eta_window_days`, the same
    /// window [`Template::get_eta`] uses.
    pub fn build(
        template: &Template,
        store: &ProgressStore,
        now: DateTime<Utc>,
        scale: &ColorScale,
        eta_window_days: i64,
    ) -> Self {
        let now = quantize(now);
        let size = template.total_placeable();
        let last = store.progress_at(template.id, now);
        let correct = last.map(|r| r.progress);
        let togo = correct.map(|c| size as i64 - c as i64);

        let mut speeds = [None; 4];
        for (slot, hours) in speeds.iter_mut().zip(SPEED_WINDOWS) {
            let Some(end) = last else { break };
            let Some(start) = store.progress_at(template.id, now - Duration::hours(hours)) else {
                continue;
            };
            let dt = (end.datetime - start.datetime).num_seconds();
            if dt > 0 {
                *slot = Some((end.progress as f64 - start.progress as f64) / (dt as f64 / 3600.0));
            }
        }

        let pct = correct.and_then(|c| percentage(c, size));
        let eta_speed = speed_between(store, template.id, now - Duration::days(eta_window_days), now)
            .ok()
            .map(|s| s.px_per_hour);
        let eta = Eta::from_speed(togo, eta_speed);
        let colors = RowColors {
            percentage: pct.map(|p| scale.percentage_color(p)),
            speeds: speeds.map(|s| s.map(|v| scale.speed_color(v))),
            eta: scale.eta_color(&eta),
        };

        Self {
            name: template.name.clone().unwrap_or_default(),
            size,
            correct,
            togo,
            percentage: pct,
            speeds,
            eta,
            colors,
        }
    }

    /// Numeric value of `column`; `None` for the name column and for
    /// missing data.
    pub fn value(&self, column: SortColumn) -> Option<f64> {
        match column {
            SortColumn::Name => None,
            SortColumn::Size => Some(self.size as f64),
            SortColumn::Correct => self.correct.map(f64::from),
            SortColumn::Togo => self.togo.map(|t| t as f64),
            SortColumn::Percentage => self.percentage,
            SortColumn::Speed1h => self.speeds[0],
            SortColumn::Speed6h => self.speeds[1],
            SortColumn::Speed1d => self.speeds[2],
            SortColumn::Speed7d => self.speeds[3],
            SortColumn::Eta => self.eta.hours(),
        }
    }

    /// Display strings in [`SortColumn::ALL`] order.
    pub fn cells(&self) -> Vec<String> {
        let int = |v: Option<i64>| v.map_or_else(|| "N/A".to_string(), format_number);
        let mut out = vec![
            self.name.clone(),
            format_number(self.size as i64),
            int(self.correct.map(i64::from)),
            int(self.togo),
            self.percentage
                .map_or_else(|| "N/A".to_string(), |p| format!("{}%", format_float(p))),
        ];
        out.extend(self.speeds.iter().map(|s| format_opt(*s)));
        out.push(self.eta.to_string());
        out
    }
}

pub fn build_ranking(
    templates: &[Template],
    store: &ProgressStore,
    now: DateTime<Utc>,
    scale: &ColorScale,
    eta_window_days: i64,
) -> Vec<RankingRow> {
    templates
        .par_iter()
        .map(|t| RankingRow::build(t, store, now, scale, eta_window_days))
        .collect()
}

/// Stable sort on `column`.  Missing values always go last.
pub fn sort_rows(rows: &mut [RankingRow], column: SortColumn) {
    if column == SortColumn::Name {
        rows.sort_by_cached_key(|r| r.name.to_lowercase());
        return;
    }
    let ascending = column.ascending();
    rows.sort_by(|a, b| match (a.value(column), b.value(column)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if ascending { ord } else { ord.reverse() }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, speed: Option<f64>, eta: Eta) -> RankingRow {
        RankingRow {
            name: name.to_string(),
            size: 100,
            correct: None,
            togo: None,
            percentage: None,
            speeds: [speed, None, None, None],
            eta,
            colors: RowColors::default(),
        }
    }

    fn names(rows: &[RankingRow]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn missing_values_sort_last_descending() {
        let mut rows = vec![
            row("a", Some(10.0), Eta::NoData),
            row("b", None, Eta::NoData),
            row("c", Some(5.0), Eta::NoData),
        ];
        sort_rows(&mut rows, SortColumn::Speed1h);
        assert_eq!(names(&rows), vec!["a", "c", "b"]);
    }

    /// Row whose `column` holds `value`; every other cell is missing.
    fn row_with(name: &str, column: SortColumn, value: Option<f64>) -> RankingRow {
        let mut r = row(name, None, Eta::NoData);
        match column {
            SortColumn::Size => r.size = value.map_or(0, |v| v as u32),
            SortColumn::Correct => r.correct = value.map(|v| v as u32),
            SortColumn::Togo => r.togo = value.map(|v| v as i64),
            SortColumn::Percentage => r.percentage = value,
            SortColumn::Speed1h => r.speeds[0] = value,
            SortColumn::Speed6h => r.speeds[1] = value,
            SortColumn::Speed1d => r.speeds[2] = value,
            SortColumn::Speed7d => r.speeds[3] = value,
            SortColumn::Name | SortColumn::Eta => unreachable!(),
        }
        r
    }

    #[test]
    fn every_numeric_column_puts_missing_last() {
        let numeric = [
            SortColumn::Correct,
            SortColumn::Togo,
            SortColumn::Percentage,
            SortColumn::Speed1h,
            SortColumn::Speed6h,
            SortColumn::Speed1d,
            SortColumn::Speed7d,
        ];
        for column in numeric {
            let mut rows = vec![
                row_with("a", column, Some(10.0)),
                row_with("b", column, None),
                row_with("c", column, Some(5.0)),
            ];
            sort_rows(&mut rows, column);
            assert_eq!(names(&rows), vec!["a", "c", "b"], "{:?}", column);
        }
    }

    #[test]
    fn size_sorts_descending() {
        // size is never missing
        let mut rows = vec![
            row_with("a", SortColumn::Size, Some(10.0)),
            row_with("b", SortColumn::Size, Some(0.0)),
            row_with("c", SortColumn::Size, Some(5.0)),
        ];
        sort_rows(&mut rows, SortColumn::Size);
        assert_eq!(names(&rows), vec!["a", "c", "b"]);
    }

    #[test]
    fn speed_cells_show_missing_values() {
        let cells = row("a", Some(12.5), Eta::Never).cells();
        assert_eq!(cells.len(), SortColumn::ALL.len());
        assert_eq!(cells[5], "12.5");
        assert_eq!(cells[6], "N/A");
        assert_eq!(cells[9], "Never.");
    }

    #[test]
    fn missing_values_sort_last_ascending() {
        let mut rows = vec![
            row("a", None, Eta::Remaining(Duration::hours(10))),
            row("b", None, Eta::NoData),
            row("c", None, Eta::Remaining(Duration::hours(5))),
            row("d", None, Eta::Never),
            row("e", None, Eta::Done),
        ];
        sort_rows(&mut rows, SortColumn::Eta);
        assert_eq!(names(&rows), vec!["e", "c", "a", "d", "b"]);
    }

    #[test]
    fn names_ignore_case() {
        let mut rows = vec![
            row("beta", None, Eta::NoData),
            row("Alpha", None, Eta::NoData),
            row("gamma", None, Eta::NoData),
        ];
        sort_rows(&mut rows, SortColumn::Name);
        assert_eq!(names(&rows), vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn columns_parse() {
        for col in SortColumn::ALL {
            let _ = col.title();
        }
        assert_eq!("7d".parse::<SortColumn>().unwrap(), SortColumn::Speed7d);
        assert_eq!("ETA".parse::<SortColumn>().unwrap(), SortColumn::Eta);
        assert!("nope".parse::<SortColumn>().is_err());
        assert_eq!(SortColumn::default(), SortColumn::Speed1h);
    }
}
