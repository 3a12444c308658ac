//! Human-readable numbers, durations and progress bars for reports.

use chrono::Duration;

/// `1234567` -> `"1 234 567"`.
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Two decimals at most, trailing zeros dropped: `12.5`, `60`, `-0.33`.
pub fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return "N/A".to_string();
    }
    let rounded = (v * 100.0).round() / 100.0;
    let int = rounded.trunc() as i64;
    let frac = ((rounded - rounded.trunc()).abs() * 100.0).round() as u32;
    let sign = if rounded < 0.0 && int == 0 { "-" } else { "" };
    match frac {
        0 => format!("{}{}", sign, format_number(int)),
        f if f % 10 == 0 => format!("{}{}.{}", sign, format_number(int), f / 10),
        f => format!("{}{}.{:02}", sign, format_number(int), f),
    }
}

/// `Some(v)` formatted, `None` as `N/A`.
pub fn format_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "N/A".to_string(), format_float)
}

/// `"2d 3h 4m"` when `short`, `"2 days, 3 hours, 4 minutes"` otherwise.
/// Seconds are only shown for durations under a minute.
pub fn td_format(d: Duration, short: bool) -> String {
    const UNITS: [(&str, &str, i64); 6] = [
        ("y", "year", 365 * 86_400),
        ("mo", "month", 30 * 86_400),
        ("d", "day", 86_400),
        ("h", "hour", 3_600),
        ("m", "minute", 60),
        ("s", "second", 1),
    ];
    let total = d.num_seconds();
    let negative = total < 0;
    let mut secs = total.abs();
    if secs >= 60 {
        secs -= secs % 60;
    }
    let mut parts = Vec::new();
    for (abbr, name, size) in UNITS {
        let n = secs / size;
        if n == 0 {
            continue;
        }
        secs %= size;
        if short {
            parts.push(format!("{}{}", n, abbr));
        } else {
            parts.push(format!("{} {}{}", n, name, if n == 1 { "" } else { "s" }));
        }
    }
    if parts.is_empty() {
        return if short { "0s".to_string() } else { "0 seconds".to_string() };
    }
    let body = parts.join(if short { " " } else { ", " });
    if negative { format!("-{}", body) } else { body }
}

/// Parse `?y?mo?w?d?h?m?s`, e.g. `1d12h` or `2w`.  Units must appear in that
/// order and at most once.
pub fn parse_duration(input: &str) -> Option<Duration> {
    const UNITS: [(&str, i64); 7] = [
        ("y", 365 * 86_400),
        ("mo", 30 * 86_400),
        ("w", 7 * 86_400),
        ("d", 86_400),
        ("h", 3_600),
        ("m", 60),
        ("s", 1),
    ];
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }
    let mut rest = s.as_str();
    let mut next_unit = 0;
    let mut total: i64 = 0;
    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        let n: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let (idx, (unit, size)) = UNITS
            .iter()
            .enumerate()
            .skip(next_unit)
            // "mo" before "m"
            .find(|(_, (u, _))| rest.starts_with(u) && !(*u == "m" && rest.starts_with("mo")))?;
        rest = &rest[unit.len()..];
        next_unit = idx + 1;
        total = total.checked_add(n.checked_mul(*size)?)?;
    }
    Duration::try_seconds(total)
}

/// Fixed-width bar such as `[██████░░░░░░░░░░░░░░]`.
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let ratio = (percentage / 100.0).clamp(0.0, 1.0);
    let ratio = if ratio.is_nan() { 0.0 } else { ratio };
    let filled = (ratio * width as f64).round() as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_get_thin_groups() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1 000");
        assert_eq!(format_number(-1_234_567), "-1 234 567");
        assert_eq!(format_float(60.0), "60");
        assert_eq!(format_float(12.5), "12.5");
        assert_eq!(format_float(-0.333), "-0.33");
        assert_eq!(format_float(1234.567), "1 234.57");
    }

    #[test]
    fn durations_read_naturally() {
        let d = Duration::days(2) + Duration::hours(3) + Duration::minutes(4) + Duration::seconds(5);
        assert_eq!(td_format(d, true), "2d 3h 4m");
        assert_eq!(td_format(d, false), "2 days, 3 hours, 4 minutes");
        assert_eq!(td_format(Duration::seconds(42), true), "42s");
        assert_eq!(td_format(Duration::minutes(1), false), "1 minute");
    }

    #[test]
    fn duration_strings() {
        assert_eq!(parse_duration("1d12h"), Some(Duration::hours(36)));
        assert_eq!(parse_duration("2w"), Some(Duration::days(14)));
        assert_eq!(parse_duration("1mo5m"), Some(Duration::days(30) + Duration::minutes(5)));
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("5h1d"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn bar_is_fixed_width() {
        assert_eq!(progress_bar(25.0, 20).chars().filter(|c| *c == '█').count(), 5);
        assert_eq!(progress_bar(150.0, 20), format!("[{}]", "█".repeat(20)));
        assert_eq!(progress_bar(0.0, 4), "[░░░░]");
    }
}
