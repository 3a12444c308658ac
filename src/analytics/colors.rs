//! Gradient colours for speed, percentage and ETA cells.

use super::Eta;
use crate::canvas::parse_hex_color;
use crate::settings::TrackerSettings;

pub type Rgb = [u8; 3];

/// Entries in every generated gradient.
pub const GRADIENT_STEPS: usize = 101;

/// Colour of ETAs that are unreachable or beyond the horizon.
pub const NEVER_COLOR: Rgb = [0xb1, 0x12, 0x06];

const POSITIVE_SPEED: [&str; 3] = ["#ffffff", "#70dd13", "#31a117"];
const NEGATIVE_SPEED: [&str; 3] = ["#ff6474", "#ff0000", "#991107"];
const PERCENTAGE: [&str; 5] = ["#e21000", "#fca80e", "#fff491", "#beff40", "#31a117"];

/// `n` colours linearly interpolated through `stops`.
pub fn gradient_palette(stops: &[Rgb], n: usize) -> Vec<Rgb> {
    match (stops.len(), n) {
        (0, _) | (_, 0) => return Vec::new(),
        (1, _) => return vec![stops[0]; n],
        _ => {}
    }
    let segments = (stops.len() - 1) as f64;
    (0..n)
        .map(|i| {
            let t = if n == 1 { 0.0 } else { i as f64 / (n - 1) as f64 };
            let pos = t * segments;
            let seg = (pos.floor() as usize).min(stops.len() - 2);
            let frac = pos - seg as f64;
            let (a, b) = (stops[seg], stops[seg + 1]);
            let mut c = [0u8; 3];
            for k in 0..3 {
                c[k] = (a[k] as f64 + (b[k] as f64 - a[k] as f64) * frac).round() as u8;
            }
            c
        })
        .collect()
}

fn stops(hex: &[&str]) -> Vec<Rgb> {
    hex.iter().filter_map(|h| parse_hex_color(h)).collect()
}

fn pick(palette: &[Rgb], ratio: f64) -> Rgb {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let idx = (ratio * (palette.len() - 1) as f64) as usize;
    palette[idx]
}

/// Maps values onto the report gradients.
#[derive(Debug, Clone)]
pub struct ColorScale {
    positive: Vec<Rgb>,
    negative: Vec<Rgb>,
    percentage: Vec<Rgb>,
    /// Speed (px/h) that saturates the positive gradient.
    pub max_speed: f64,
    /// Speed (px/h, negative) that saturates the negative gradient.
    pub min_speed: f64,
    /// ETAs at or past this many days use [`NEVER_COLOR`].
    pub eta_max_days: f64,
}

impl ColorScale {
    pub fn new(max_speed: f64, min_speed: f64, eta_max_days: f64) -> Self {
        Self {
            positive: gradient_palette(&stops(&POSITIVE_SPEED), GRADIENT_STEPS),
            negative: gradient_palette(&stops(&NEGATIVE_SPEED), GRADIENT_STEPS),
            percentage: gradient_palette(&stops(&PERCENTAGE), GRADIENT_STEPS),
            max_speed,
            min_speed,
            eta_max_days,
        }
    }

    pub fn from_settings(s: &TrackerSettings) -> Self {
        Self::new(s.speed_color_max, s.speed_color_min, s.eta_color_max_days)
    }

    pub fn speed_color(&self, px_per_hour: f64) -> Rgb {
        if px_per_hour >= 0.0 || px_per_hour.is_nan() {
            let max = if self.max_speed > 0.0 { self.max_speed } else { 1.0 };
            pick(&self.positive, px_per_hour / max)
        } else {
            let min = if self.min_speed < 0.0 { self.min_speed } else { -1.0 };
            pick(&self.negative, px_per_hour / min)
        }
    }

    pub fn percentage_color(&self, percentage: f64) -> Rgb {
        pick(&self.percentage, percentage / 100.0)
    }

    /// `None` when there is nothing to colour.
    pub fn eta_color(&self, eta: &Eta) -> Option<Rgb> {
        let hours = eta.hours()?;
        let days = hours / 24.0;
        if !days.is_finite() || days >= self.eta_max_days {
            return Some(NEVER_COLOR);
        }
        Some(pick(&self.percentage, 1.0 - days / self.eta_max_days))
    }
}

impl Default for ColorScale {
    fn default() -> Self {
        Self::new(600.0, -400.0, 40.0)
    }
}

pub fn to_hex(c: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn gradient_hits_every_stop() {
        let p = gradient_palette(&[[0, 0, 0], [100, 200, 0], [200, 0, 50]], 5);
        assert_eq!(p.len(), 5);
        assert_eq!(p[0], [0, 0, 0]);
        assert_eq!(p[1], [50, 100, 0]);
        assert_eq!(p[2], [100, 200, 0]);
        assert_eq!(p[4], [200, 0, 50]);
        assert!(gradient_palette(&[], 5).is_empty());
    }

    #[test]
    fn speed_saturates_at_the_bounds() {
        let s = ColorScale::default();
        assert_eq!(to_hex(s.speed_color(0.0)), "#ffffff");
        assert_eq!(to_hex(s.speed_color(600.0)), "#31a117");
        assert_eq!(to_hex(s.speed_color(10_000.0)), "#31a117");
        assert_eq!(to_hex(s.speed_color(-1.0)), "#ff6474");
        assert_eq!(to_hex(s.speed_color(-400.0)), "#991107");
    }

    #[test]
    fn percentage_runs_red_to_green() {
        let s = ColorScale::default();
        assert_eq!(to_hex(s.percentage_color(0.0)), "#e21000");
        assert_eq!(to_hex(s.percentage_color(50.0)), "#fff491");
        assert_eq!(to_hex(s.percentage_color(100.0)), "#31a117");
    }

    #[test]
    fn eta_colours() {
        let s = ColorScale::default();
        assert_eq!(s.eta_color(&Eta::Never), Some(NEVER_COLOR));
        assert_eq!(s.eta_color(&Eta::Remaining(Duration::days(40))), Some(NEVER_COLOR));
        assert_eq!(s.eta_color(&Eta::NoData), None);
        assert_eq!(s.eta_color(&Eta::Done).map(to_hex).as_deref(), Some("#31a117"));
    }
}
