use std::path::{Path, PathBuf};

use crate::canvas::{Palette, VirginRule};
use crate::error::Result;
use crate::logger::Level;
use crate::registry::NameMatching;

/// Tracker configuration, persisted as a `key=value` file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Directory holding `registry.bin` and `progress.log`.
    pub data_dir: PathBuf,
    /// Canvas palette, index order matters.
    pub palette: Palette,
    pub name_matching: NameMatching,
    /// Source pixels with a lower alpha are transparent.
    pub alpha_threshold: u8,
    pub virgin_rule: VirginRule,
    /// Threads in the render pool (0 = one per core).
    pub worker_threads: usize,
    /// Trailing window used for ETA extrapolation.
    pub eta_window_days: i64,
    /// px/h where the positive speed ramp saturates.
    pub speed_color_max: f64,
    /// px/h where the negative speed ramp saturates (negative).
    pub speed_color_min: f64,
    /// ETA horizon; anything at or past it is shown as "never".
    pub eta_color_max_days: f64,
    pub default_scale: f64,
    /// Zoom used by links that open on the first pixel to place.
    pub togo_scale: f64,
    pub site_url: String,
    /// Largest accepted template side, after stylized reduction.
    pub max_template_dim: u32,
    /// Session log lines below this level are dropped.
    pub log_level: Level,
    /// Timeout for fetching remote template images.
    pub fetch_timeout_secs: u64,
    /// Largest remote template image accepted, in bytes.
    pub max_image_bytes: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            data_dir: crate::logger::data_dir().join("pxtrack"),
            palette: Palette::default(),
            name_matching: NameMatching::CaseInsensitive,
            alpha_threshold: 128,
            virgin_rule: VirginRule::VirginMap,
            worker_threads: 2,
            eta_window_days: 7,
            speed_color_max: 600.0,
            speed_color_min: -400.0,
            eta_color_max_days: 40.0,
            default_scale: 4.0,
            togo_scale: 20.0,
            site_url: "https://pxls.space/".to_string(),
            max_template_dim: 4096,
            log_level: Level::Info,
            fetch_timeout_secs: 15,
            max_image_bytes: 16 * 1024 * 1024,
        }
    }
}

impl TrackerSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/pxtrack/pxtrack_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\pxtrack\pxtrack_settings.cfg
    /// On macOS:   ~/Library/Application Support/pxtrack/pxtrack_settings.cfg
    pub fn settings_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("pxtrack")
                .join("pxtrack_settings.cfg")
        }
        #[cfg(not(target_os = "linux"))]
        {
            crate::logger::data_dir()
                .join("pxtrack")
                .join("pxtrack_settings.cfg")
        }
    }

    /// Load settings from the default path.  On first run the defaults are
    /// written there so there is a file to edit.
    pub fn load() -> Self {
        let path = Self::settings_path();
        if path.exists() {
            return Self::load_from(&path);
        }
        let s = Self::default();
        match s.save_to(&path) {
            Ok(()) => crate::log_info!("settings: wrote defaults to {}", path.display()),
            Err(e) => crate::log_warn!("settings: could not write {}: {}", path.display(), e),
        }
        s
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key=value` lines.  Unknown keys and bad values keep the default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "data_dir" => {
                    if !val.is_empty() {
                        s.data_dir = PathBuf::from(val);
                    }
                }
                "palette" => {
                    if let Some(p) = Palette::from_hex_list(val) {
                        s.palette = p;
                    } else {
                        crate::log_warn!("settings: ignoring malformed palette '{}'", val);
                    }
                }
                "name_matching" => {
                    s.name_matching = val.parse().unwrap_or(s.name_matching);
                }
                "alpha_threshold" => {
                    s.alpha_threshold = val.parse().unwrap_or(s.alpha_threshold);
                }
                "virgin_rule" => {
                    s.virgin_rule = match val {
                        "disabled" => VirginRule::Disabled,
                        _ => VirginRule::VirginMap,
                    };
                }
                "worker_threads" => {
                    s.worker_threads = val.parse().unwrap_or(s.worker_threads);
                }
                "eta_window_days" => {
                    s.eta_window_days = val
                        .parse()
                        .ok()
                        .filter(|d: &i64| *d > 0)
                        .unwrap_or(s.eta_window_days);
                }
                "speed_color_max" => {
                    s.speed_color_max = val
                        .parse()
                        .ok()
                        .filter(|v: &f64| *v > 0.0)
                        .unwrap_or(s.speed_color_max);
                }
                "speed_color_min" => {
                    s.speed_color_min = val
                        .parse()
                        .ok()
                        .filter(|v: &f64| *v < 0.0)
                        .unwrap_or(s.speed_color_min);
                }
                "eta_color_max_days" => {
                    s.eta_color_max_days = val
                        .parse()
                        .ok()
                        .filter(|v: &f64| *v > 0.0)
                        .unwrap_or(s.eta_color_max_days);
                }
                "default_scale" => {
                    s.default_scale = val.parse().unwrap_or(s.default_scale);
                }
                "togo_scale" => {
                    s.togo_scale = val.parse().unwrap_or(s.togo_scale);
                }
                "site_url" => {
                    if !val.is_empty() {
                        s.site_url = val.to_string();
                    }
                }
                "max_template_dim" => {
                    s.max_template_dim = val.parse().unwrap_or(s.max_template_dim);
                }
                "log_level" => {
                    s.log_level = val.parse().unwrap_or(s.log_level);
                }
                "fetch_timeout_secs" => {
                    s.fetch_timeout_secs = val
                        .parse()
                        .ok()
                        .filter(|t: &u64| *t > 0)
                        .unwrap_or(s.fetch_timeout_secs);
                }
                "max_image_bytes" => {
                    s.max_image_bytes = val
                        .parse()
                        .ok()
                        .filter(|b: &u64| *b > 0)
                        .unwrap_or(s.max_image_bytes);
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let matching = self.name_matching.config_value();
        let virgin = match self.virgin_rule {
            VirginRule::VirginMap => "virgin_map",
            VirginRule::Disabled => "disabled",
        };
        format!(
            "data_dir={}\n\
             palette={}\n\
             name_matching={matching}\n\
             alpha_threshold={}\n\
             virgin_rule={virgin}\n\
             worker_threads={}\n\
             eta_window_days={}\n\
             speed_color_max={}\n\
             speed_color_min={}\n\
             eta_color_max_days={}\n\
             default_scale={}\n\
             togo_scale={}\n\
             site_url={}\n\
             max_template_dim={}\n\
             log_level={}\n\
             fetch_timeout_secs={}\n\
             max_image_bytes={}\n",
            self.data_dir.display(),
            self.palette.to_hex_list(),
            self.alpha_threshold,
            self.worker_threads,
            self.eta_window_days,
            self.speed_color_max,
            self.speed_color_min,
            self.eta_color_max_days,
            self.default_scale,
            self.togo_scale,
            self.site_url,
            self.max_template_dim,
            self.log_level,
            self.fetch_timeout_secs,
            self.max_image_bytes,
        )
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.bin")
    }

    pub fn progress_log_path(&self) -> PathBuf {
        self.data_dir.join("progress.log")
    }
}
