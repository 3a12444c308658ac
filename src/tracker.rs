// ============================================================================
// TRACKER: the request-facing facade over registry, store and renderer
// ============================================================================
//
// Every CPU-heavy step (image reduction, correctness counting, GIF encoding)
// is submitted to the render pool; the calling thread only waits on the job.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::analytics::colors::ColorScale;
use crate::analytics::format::parse_duration;
use crate::analytics::ranking::{SortColumn, build_ranking, sort_rows};
use crate::analytics::{self, GroupBy, ProgressStats, Speed};
use crate::canvas::{PixelGrid, VirginRule};
use crate::error::{Result, TrackerError};
use crate::pool::RenderPool;
use crate::recorder::{RecordSummary, record_progress};
use crate::registry::{SaveOutcome, TemplateRegistry};
use crate::render;
use crate::report::{CheckReport, InfoReport, RankingTable, SpeedReport, UpdateReport};
use crate::settings::TrackerSettings;
use crate::store::{ProgressStore, quantize};
use crate::template::source::{ImageSource, TemplateLoader};
use crate::template::url::TemplateUrl;
use crate::template::{Template, UrlOptions, Visibility};
use crate::{log_info, log_warn};

pub struct Tracker {
    settings: TrackerSettings,
    registry: Arc<TemplateRegistry>,
    store: Arc<ProgressStore>,
    pool: RenderPool,
    colors: ColorScale,
}

impl Tracker {
    /// Open the registry and progress log under `settings.data_dir`.
    pub fn open(settings: TrackerSettings, source: Arc<dyn ImageSource>, grid: Arc<dyn PixelGrid>) -> Result<Self> {
        let loader = loader(&settings, source);
        let registry = TemplateRegistry::open(&settings.registry_path(), grid, loader, settings.name_matching)?;
        let store = ProgressStore::open(&settings.progress_log_path())?;
        Self::assemble(settings, registry, store)
    }

    /// A tracker that keeps everything in memory.
    pub fn in_memory(
        settings: TrackerSettings,
        source: Arc<dyn ImageSource>,
        grid: Arc<dyn PixelGrid>,
    ) -> Result<Self> {
        let loader = loader(&settings, source);
        let registry = TemplateRegistry::in_memory(grid, loader, settings.name_matching)?;
        Self::assemble(settings, registry, ProgressStore::in_memory())
    }

    fn assemble(settings: TrackerSettings, registry: TemplateRegistry, store: ProgressStore) -> Result<Self> {
        let threads = match settings.worker_threads {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        Ok(Self {
            pool: RenderPool::new(threads)?,
            colors: ColorScale::from_settings(&settings),
            registry: Arc::new(registry),
            store: Arc::new(store),
            settings,
        })
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    fn url_options(&self, open_on_togo: bool) -> UrlOptions {
        UrlOptions {
            site: self.settings.site_url.clone(),
            image: None,
            open_on_togo,
            default_scale: self.settings.default_scale,
            togo_scale: self.settings.togo_scale,
        }
    }

    /// Load `url` on the pool.
    fn load(&self, url: &str) -> Result<Template> {
        let registry = self.registry.clone();
        let url = url.to_string();
        self.pool.spawn(move || registry.load_template(&url)).wait()
    }

    /// Turn user input into a template: a link is loaded (and swapped for its
    /// tracked twin if there is one), anything else is a registered name.
    ///
    /// Returns the template and whether it is registered.
    pub fn resolve(&self, input: &str) -> Result<(Template, bool)> {
        let input = input.trim();
        if TemplateUrl::looks_like_template_url(input) {
            let loaded = self.load(input)?;
            return Ok(match self.registry.check_duplicate_template(&loaded) {
                Some(tracked) => (tracked, true),
                None => (loaded, false),
            });
        }
        self.registry
            .get_template(input, false)
            .map(|t| (t, true))
            .ok_or_else(|| TrackerError::NotFound(input.to_string()))
    }

    fn registered(&self, name: &str) -> Result<Template> {
        self.registry
            .get_template(name, false)
            .ok_or_else(|| TrackerError::NotFound(name.to_string()))
    }

    /// Count correct pixels on the pool; returns the updated template too.
    fn measure(&self, template: Template) -> Result<(Template, ProgressStats)> {
        let canvas = self.registry.grid().snapshot();
        let rule = self.settings.virgin_rule;
        self.pool
            .spawn(move || {
                let mut t = template;
                let stats = ProgressStats::measure(&mut t, &canvas, rule)?;
                Ok((t, stats))
            })
            .wait()
    }

    fn check_report(&self, template: Template, registered: bool) -> Result<CheckReport> {
        let (template, stats) = self.measure(template)?;
        let canvas = self.registry.grid().snapshot();
        let url = template.generate_url(&self.url_options(true), Some(canvas.as_ref()));
        let tracking_since = if registered {
            self.store.oldest(template.id).map(|r| r.datetime)
        } else {
            None
        };
        Ok(CheckReport {
            template,
            registered,
            stats,
            tracking_since,
            url,
        })
    }

    /// Current progress of a link or registered name.
    pub fn check(&self, input: &str) -> Result<CheckReport> {
        let (template, registered) = self.resolve(input)?;
        self.check_report(template, registered)
    }

    /// Progress and history of a registered template.
    pub fn info(&self, name: &str, now: DateTime<Utc>) -> Result<InfoReport> {
        let template = self.registered(name)?;
        let check = self.check_report(template, true)?;
        let activity = analytics::recent_activity(&self.store, check.template.id, now);
        let eta = check.template.get_eta(&self.store, now, self.settings.eta_window_days);
        Ok(InfoReport { check, activity, eta })
    }

    /// Start tracking `url` as `name`.
    pub fn add(&self, name: &str, url: &str, owner_id: u64, visibility: Visibility) -> Result<SaveOutcome> {
        let mut template = self.load(url)?;
        template.visibility = visibility;
        self.registry.save(template, name, owner_id)
    }

    /// Ranking of the public templates and the combo.
    pub fn list(&self, sort: SortColumn, now: DateTime<Utc>) -> RankingTable {
        let mut templates = self.registry.get_all_public_templates();
        templates.push(self.registry.combo());
        let mut rows = build_ranking(&templates, &self.store, now, &self.colors, self.settings.eta_window_days);
        sort_rows(&mut rows, sort);
        RankingTable {
            rows,
            sort,
            last_update: self.store.last_update_time(),
        }
    }

    /// Change a template and compare it before and after.  A failed diff
    /// render is reported as a note, not an error.
    pub fn update(
        &self,
        name: &str,
        requester_id: u64,
        new_url: Option<&str>,
        new_name: Option<&str>,
        new_owner_id: Option<u64>,
    ) -> Result<UpdateReport> {
        let registry = self.registry.clone();
        let (name_owned, url_owned, new_name_owned) = (
            name.to_string(),
            new_url.map(str::to_string),
            new_name.map(str::to_string),
        );
        let (old, new) = self
            .pool
            .spawn(move || {
                registry.update_template(
                    &name_owned,
                    requester_id,
                    url_owned.as_deref(),
                    new_name_owned.as_deref(),
                    new_owner_id,
                )
            })
            .wait()?;

        let old_stats = self.measure(old.clone()).ok().map(|(_, s)| s);
        let new_stats = self.measure(new.clone()).ok().map(|(_, s)| s);

        let (gif, note) = if new_url.is_some() {
            match self.diff_gif(&old, &new) {
                Ok(bytes) => (Some(bytes), None),
                Err(e) => {
                    log_warn!("update of '{}': diff render failed: {}", name, e);
                    (None, Some("An error occurred while generating the diff GIF image.".to_string()))
                }
            }
        } else {
            (None, None)
        };

        Ok(UpdateReport {
            old,
            new,
            old_stats,
            new_stats,
            gif,
            note,
        })
    }

    /// Before/after GIF of two templates against the current canvas.
    pub fn diff_gif(&self, old: &Template, new: &Template) -> Result<Vec<u8>> {
        let canvas = self.registry.grid().snapshot();
        let rule = self.settings.virgin_rule;
        let (old, new) = (old.clone(), new.clone());
        self.pool
            .spawn(move || render::make_before_after_gif(&old, &new, &canvas, rule))
            .wait()
    }

    /// PNG correctness overlay of a link or registered name.
    pub fn progress_png(&self, input: &str) -> Result<Vec<u8>> {
        let (template, _) = self.resolve(input)?;
        let canvas = self.registry.grid().snapshot();
        let rule: VirginRule = self.settings.virgin_rule;
        self.pool
            .spawn(move || render::encode_png(&template.get_progress_image(&canvas, rule)))
            .wait()
    }

    pub fn delete(&self, name: &str, requester_id: u64, force: bool) -> Result<Template> {
        self.registry.delete_template(name, requester_id, force)
    }

    /// Speed of a registered template over the trailing `last` window
    /// (`?y?mo?w?d?h?m?s`), or over its whole history, optionally grouped.
    ///
    /// The window start is snapped down to the record grid so the record
    /// opening the window is included.
    pub fn speed(
        &self,
        name: &str,
        last: Option<&str>,
        group_by: Option<GroupBy>,
        offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<SpeedReport> {
        let template = self.registered(name)?;
        let from = match last {
            None => None,
            Some(last) => {
                let window = parse_duration(last)
                    .filter(|d| *d > Duration::zero())
                    .ok_or_else(|| TrackerError::InvalidFormat(format!("invalid `last` parameter `{}`", last)))?;
                Some(quantize(now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)))
            }
        };
        let records = self.store.range(template.id, from, Some(now));
        if records.is_empty() {
            return Err(TrackerError::NoData);
        }
        let name = template.name.clone().unwrap_or_default();

        match group_by {
            Some(g) => {
                let grouped = analytics::grouped_speed(&records, g, offset)?;
                Ok(SpeedReport::Grouped { name, grouped })
            }
            None => {
                let speed = Speed::over(&records)?;
                Ok(SpeedReport::Window { name, speed })
            }
        }
    }

    /// Append the current progress of every template.
    pub fn record(&self, now: DateTime<Utc>) -> Result<RecordSummary> {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let summary = self
            .pool
            .spawn(move || Ok(record_progress(&registry, &store, now)))
            .wait()?;
        log_info!("tracker: progress recorded ({} templates)", summary.recorded);
        Ok(summary)
    }
}

fn loader(settings: &TrackerSettings, source: Arc<dyn ImageSource>) -> TemplateLoader {
    TemplateLoader::new(source, settings.alpha_threshold, settings.max_template_dim)
}
