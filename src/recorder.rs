//! Periodic progress recording: one snapshot, every template, one timestamp.

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::error::TrackerError;
use crate::registry::TemplateRegistry;
use crate::store::{ProgressStore, quantize};
use crate::template::Template;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordSummary {
    pub recorded: usize,
    /// Already recorded for this 5-minute slot.
    pub skipped: usize,
    pub failed: usize,
}

/// Measure every registered template and the combo against the current
/// canvas and append the counts at `now` (quantized).
pub fn record_progress(registry: &TemplateRegistry, store: &ProgressStore, now: DateTime<Utc>) -> RecordSummary {
    let canvas = registry.grid().snapshot();
    let mut templates: Vec<Template> = registry.get_all_templates();
    templates.push(registry.combo());

    let counts: Vec<(Template, u32)> = templates
        .into_par_iter()
        .map(|mut t| {
            let n = t.update_progress(&canvas);
            (t, n)
        })
        .collect();

    let at = quantize(now);
    let mut summary = RecordSummary::default();
    for (template, correct) in counts {
        match store.append(template.id, at, correct) {
            Ok(_) => summary.recorded += 1,
            Err(TrackerError::OutOfOrder { .. }) => summary.skipped += 1,
            Err(e) => {
                log_warn!(
                    "recorder: couldn't store progress of '{}': {}",
                    template.name.as_deref().unwrap_or("?"),
                    e
                );
                summary.failed += 1;
            }
        }
    }
    log_info!(
        "recorder: {} recorded, {} skipped, {} failed at {}",
        summary.recorded,
        summary.skipped,
        summary.failed,
        at
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasSnapshot, Palette, PixelGrid, SharedGrid};
    use crate::registry::NameMatching;
    use crate::template::source::{LocalImageSource, TemplateLoader};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn records_each_template_and_the_combo_once_per_slot() {
        let palette = Arc::new(Palette::new(vec![[255, 255, 255], [0, 0, 0]]));
        let canvas = CanvasSnapshot::new(4, 4, vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], palette).unwrap();
        let grid: Arc<dyn PixelGrid> = Arc::new(SharedGrid::new(canvas));
        let loader = TemplateLoader::new(Arc::new(LocalImageSource::new()), 128, 4096);
        let reg = TemplateRegistry::in_memory(grid.clone(), loader, NameMatching::CaseInsensitive).unwrap();
        let t = Template::from_indexed(vec![1; 4], 2, 2, 0, 0, &grid.snapshot()).unwrap();
        let id = reg.save(t, "corner", 1).unwrap().template().id;

        let store = ProgressStore::in_memory();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let s = record_progress(&reg, &store, t0);
        assert_eq!(s, RecordSummary { recorded: 2, skipped: 0, failed: 0 });
        assert_eq!(store.latest(id).unwrap().progress, 1);
        assert_eq!(store.latest(Uuid::nil()).unwrap().progress, 1);

        let again = record_progress(&reg, &store, t0 + Duration::minutes(2));
        assert_eq!(again.skipped, 2);
    }
}
