use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use image::{Rgba, RgbaImage};
use uuid::Uuid;

use pxtrack::analytics::ranking::SortColumn;
use pxtrack::analytics::{Eta, GroupBy};
use pxtrack::canvas::{CanvasSnapshot, Palette, PixelGrid, SharedGrid};
use pxtrack::registry::SaveOutcome;
use pxtrack::render::encode_png;
use pxtrack::report::SpeedReport;
use pxtrack::settings::TrackerSettings;
use pxtrack::store::ProgressStore;
use pxtrack::template::Visibility;
use pxtrack::template::source::{LocalImageSource, png_data_uri};
use pxtrack::template::url::TemplateUrl;
use pxtrack::tracker::Tracker;
use pxtrack::TrackerError;

const OWNER: u64 = 1;
const STRANGER: u64 = 2;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("pxtrack-test-{}", Uuid::new_v4()))
}

fn settings(dir: PathBuf) -> TrackerSettings {
    TrackerSettings {
        data_dir: dir,
        worker_threads: 2,
        ..TrackerSettings::default()
    }
}

/// 16x16 white canvas with the top row of the 4x4 square at (2, 2) painted black.
fn grid() -> Arc<SharedGrid> {
    let palette = Arc::new(Palette::new(vec![[255, 255, 255], [0, 0, 0], [255, 0, 0]]));
    let mut canvas = CanvasSnapshot::new(16, 16, vec![0; 256], palette).unwrap();
    for x in 2..6 {
        canvas.set_pixel(x, 2, 1);
    }
    Arc::new(SharedGrid::new(canvas))
}

fn square(size: u32, color: [u8; 3]) -> RgbaImage {
    RgbaImage::from_pixel(size, size, Rgba([color[0], color[1], color[2], 255]))
}

fn link(img: &RgbaImage, ox: i32, oy: i32) -> String {
    TemplateUrl {
        site: "https://pxls.space/".into(),
        image: png_data_uri(&encode_png(img).unwrap()),
        ox,
        oy,
        tw: None,
        title: Some("Test template".into()),
        x: None,
        y: None,
        scale: None,
    }
    .to_url()
}

fn tracker() -> Tracker {
    let grid: Arc<dyn PixelGrid> = grid();
    Tracker::in_memory(settings(temp_dir()), Arc::new(LocalImageSource::new()), grid).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn add_then_check() {
    let tracker = tracker();
    let url = link(&square(4, [0, 0, 0]), 2, 2);
    let added = tracker.add("logo", &url, OWNER, Visibility::Public).unwrap();
    assert!(matches!(added, SaveOutcome::Added(_)));

    let report = tracker.check("logo").unwrap();
    assert!(report.registered);
    assert_eq!(report.stats.correct, 4);
    assert_eq!(report.stats.total_placeable, 16);
    assert_eq!(report.stats.togo, 12);
    assert_eq!(report.stats.percentage, 25.0);
    assert_eq!(report.template.title.as_deref(), Some("Test template"));

    // the open-template link points at the first pixel left to place
    let open = TemplateUrl::parse(&report.url).unwrap();
    assert_eq!((open.x, open.y), (Some(2), Some(3)));
}

#[test]
fn checking_a_link_finds_its_tracked_twin() {
    let tracker = tracker();
    let url = link(&square(4, [0, 0, 0]), 2, 2);
    tracker.add("logo", &url, OWNER, Visibility::Public).unwrap();

    let (t, registered) = tracker.resolve(&url).unwrap();
    assert!(registered);
    assert_eq!(t.name.as_deref(), Some("logo"));

    let (other, registered) = tracker.resolve(&link(&square(4, [0, 0, 0]), 3, 2)).unwrap();
    assert!(!registered);
    assert!(other.name.is_none());

    assert!(matches!(tracker.resolve("missing"), Err(TrackerError::NotFound(_))));
}

#[test]
fn second_save_of_a_name_conflicts() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let err = tracker
        .add("logo", &link(&square(2, [255, 0, 0]), 8, 8), STRANGER, Visibility::Public)
        .unwrap_err();
    assert!(matches!(err, TrackerError::NameConflict(_)));

    let kept = tracker.registry().get_template("logo", false).unwrap();
    assert_eq!((kept.ox, kept.oy, kept.width, kept.height), (2, 2, 4, 4));
    assert_eq!(kept.owner_id, Some(OWNER));
}

#[test]
fn identical_image_reuses_the_entry() {
    let tracker = tracker();
    let url = link(&square(4, [0, 0, 0]), 2, 2);
    tracker.add("logo", &url, OWNER, Visibility::Public).unwrap();
    match tracker.add("copy", &url, STRANGER, Visibility::Public).unwrap() {
        SaveOutcome::AlreadyTracked(t) => assert_eq!(t.name.as_deref(), Some("logo")),
        SaveOutcome::Added(_) => panic!("duplicate registered"),
    }
    assert_eq!(tracker.registry().len(), 1);
}

#[test]
fn template_outside_the_canvas_is_rejected() {
    let tracker = tracker();
    let err = tracker
        .add("far", &link(&square(4, [0, 0, 0]), 100, 100), OWNER, Visibility::Public)
        .unwrap_err();
    assert!(matches!(err, TrackerError::OutsideCanvas));
    assert!(tracker.registry().is_empty());
}

#[test]
fn registry_survives_a_restart() {
    let dir = temp_dir();
    let url = link(&square(4, [0, 0, 0]), 2, 2);
    let id = {
        let grid: Arc<dyn PixelGrid> = grid();
        let tracker = Tracker::open(settings(dir.clone()), Arc::new(LocalImageSource::new()), grid).unwrap();
        tracker.add("logo", &url, OWNER, Visibility::Private).unwrap().template().id
    };

    let grid: Arc<dyn PixelGrid> = grid();
    let tracker = Tracker::open(settings(dir.clone()), Arc::new(LocalImageSource::new()), grid).unwrap();
    let t = tracker.registry().get_template("logo", false).unwrap();
    assert_eq!(t.id, id);
    assert_eq!(t.owner_id, Some(OWNER));
    assert_eq!((t.ox, t.oy, t.width, t.height), (2, 2, 4, 4));
    assert_eq!(t.visibility, Visibility::Private);
    assert_eq!(t.url, url);
    assert!(tracker.registry().get_template("logo", true).is_none());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn non_owner_update_leaves_the_registry_unchanged() {
    let dir = temp_dir();
    let grid: Arc<dyn PixelGrid> = grid();
    let s = settings(dir.clone());
    let registry_file = s.registry_path();
    let tracker = Tracker::open(s, Arc::new(LocalImageSource::new()), grid).unwrap();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();

    let before = std::fs::read(&registry_file).unwrap();
    let err = tracker
        .update("logo", STRANGER, None, Some("stolen"), Some(STRANGER))
        .unwrap_err();
    assert!(matches!(err, TrackerError::NotOwner { .. }));
    let err = tracker.delete("logo", STRANGER, false).unwrap_err();
    assert!(matches!(err, TrackerError::NotOwner { .. }));
    assert_eq!(std::fs::read(&registry_file).unwrap(), before);
    assert_eq!(
        tracker.registry().get_template("logo", false).unwrap().owner_id,
        Some(OWNER)
    );

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn url_update_reports_both_states_and_renders_a_diff() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let id = tracker.registry().get_template("logo", false).unwrap().id;

    let new_url = link(&square(2, [0, 0, 0]), 2, 2);
    let report = tracker
        .update("logo", OWNER, Some(&new_url), Some("badge"), None)
        .unwrap();
    assert_eq!(report.old.total_placeable(), 16);
    assert_eq!(report.new.total_placeable(), 4);
    assert_eq!(report.new.id, id);
    assert_eq!(report.new_stats.unwrap().correct, 2);
    assert!(report.note.is_none());
    assert_eq!(&report.gif.as_deref().unwrap()[..6], b"GIF89a");

    let text = report.to_string();
    assert!(text.contains("Name: logo -> badge"));
    assert!(text.contains("Dimensions: 4x4 -> 2x2"));
    assert!(tracker.registry().get_template("badge", false).is_some());
}

#[test]
fn windowed_speed_and_eta() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let id = tracker.registry().get_template("logo", false).unwrap().id;
    let store = tracker.store();
    store.append(id, t0() - Duration::days(1), 0).unwrap();
    store.append(id, t0(), 1).unwrap();
    store.append(id, t0() + Duration::hours(1), 4).unwrap();
    let now = t0() + Duration::hours(1);

    let report = tracker.speed("logo", Some("1h"), None, FixedOffset::east_opt(0).unwrap(), now);
    match report.unwrap() {
        SpeedReport::Window { speed, .. } => {
            assert_eq!(speed.delta_progress, 3);
            assert_eq!(speed.px_per_hour, 3.0);
        }
        other => panic!("unexpected {:?}", other),
    }

    let info = tracker.info("logo", now).unwrap();
    assert_eq!(info.check.stats.togo, 12);
    assert_eq!(info.activity.deltas[1], ("hour", Some(3)));
    // no record a week back
    assert_eq!(info.eta, Eta::NoData);

    // 4 px in 25 h, 12 to go
    let eta = info.check.template.get_eta(store, now, 1);
    assert_eq!(eta, Eta::Remaining(Duration::hours(75)));

    store.append(id, t0() + Duration::days(8), 4).unwrap();
    let flat = info.check.template.get_eta(store, t0() + Duration::days(8), 7);
    assert_eq!(flat, Eta::Never);
}

#[test]
fn ranking_eta_uses_the_configured_window() {
    let grid: Arc<dyn PixelGrid> = grid();
    let settings = TrackerSettings {
        eta_window_days: 1,
        ..settings(temp_dir())
    };
    let tracker = Tracker::in_memory(settings, Arc::new(LocalImageSource::new()), grid).unwrap();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let template = tracker.registry().get_template("logo", false).unwrap();
    let store = tracker.store();
    store.append(template.id, t0() - Duration::days(1), 0).unwrap();
    store.append(template.id, t0(), 1).unwrap();
    store.append(template.id, t0() + Duration::hours(1), 4).unwrap();
    let now = t0() + Duration::hours(1);

    let table = tracker.list(SortColumn::Name, now);
    let row = table.rows.iter().find(|r| r.name == "logo").unwrap();
    assert_eq!(row.eta, Eta::Remaining(Duration::hours(75)));
    assert_eq!(row.eta, template.get_eta(store, now, 1));
    assert_eq!(tracker.info("logo", now).unwrap().eta, row.eta);
}

#[test]
fn grouped_speed_per_hour() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let id = tracker.registry().get_template("logo", false).unwrap().id;
    for (i, p) in [100, 120, 115, 130].into_iter().enumerate() {
        tracker.store().append(id, t0() + Duration::hours(i as i64), p).unwrap();
    }
    let report = tracker
        .speed(
            "logo",
            Some("1d"),
            Some(GroupBy::Hour),
            FixedOffset::east_opt(0).unwrap(),
            t0() + Duration::hours(3),
        )
        .unwrap();
    match report {
        SpeedReport::Grouped { grouped, .. } => {
            assert_eq!(grouped.average, 10.0);
            assert_eq!(grouped.min, -5);
            assert_eq!(grouped.max, 20);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(matches!(
        tracker.speed("logo", Some("soon"), None, FixedOffset::east_opt(0).unwrap(), t0()),
        Err(TrackerError::InvalidFormat(_))
    ));
}

#[test]
fn speed_windows_snap_to_the_record_grid() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    let id = tracker.registry().get_template("logo", false).unwrap().id;
    tracker.store().append(id, t0(), 100).unwrap();
    tracker.store().append(id, t0() + Duration::minutes(30), 110).unwrap();
    tracker.store().append(id, t0() + Duration::hours(1), 160).unwrap();
    let utc = FixedOffset::east_opt(0).unwrap();

    // 13:03 looks back to 12:03, which snaps to the 12:00 record
    let off_grid = t0() + Duration::hours(1) + Duration::minutes(3);
    match tracker.speed("logo", Some("1h"), None, utc, off_grid).unwrap() {
        SpeedReport::Window { speed, .. } => {
            assert_eq!(speed.from, t0());
            assert_eq!(speed.delta_progress, 60);
            assert_eq!(speed.px_per_hour, 60.0);
        }
        other => panic!("unexpected {:?}", other),
    }

    // no window: the whole history, however old
    let later = t0() + Duration::days(3);
    match tracker.speed("logo", None, None, utc, later).unwrap() {
        SpeedReport::Window { speed, .. } => assert_eq!(speed.delta_progress, 60),
        other => panic!("unexpected {:?}", other),
    }
    match tracker.speed("logo", None, Some(GroupBy::Hour), utc, later).unwrap() {
        SpeedReport::Grouped { grouped, .. } => {
            // the 12:00 bucket holds the series start and is dropped
            assert_eq!(grouped.buckets.iter().map(|b| b.progress).collect::<Vec<_>>(), vec![50]);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(matches!(
        tracker.speed("logo", Some("1h"), None, utc, later),
        Err(TrackerError::NoData)
    ));
}

#[test]
fn record_then_rank() {
    let tracker = tracker();
    tracker
        .add("logo", &link(&square(4, [0, 0, 0]), 2, 2), OWNER, Visibility::Public)
        .unwrap();
    tracker
        .add("dot", &link(&square(1, [255, 0, 0]), 10, 10), OWNER, Visibility::Public)
        .unwrap();
    tracker
        .add("hidden", &link(&square(2, [255, 0, 0]), 12, 12), OWNER, Visibility::Private)
        .unwrap();

    let summary = tracker.record(t0()).unwrap();
    // three templates and the combo
    assert_eq!(summary.recorded, 4);
    let logo = tracker.registry().get_template("logo", false).unwrap();
    assert_eq!(tracker.store().latest(logo.id).unwrap().progress, 4);

    let table = tracker.list(SortColumn::Percentage, t0());
    let names: Vec<&str> = table.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["logo", "@combo", "dot"]);
    let combo = &table.rows[1];
    assert_eq!(combo.size, 17);
    assert_eq!(combo.correct, Some(4));
    assert!(table.rows.iter().all(|r| r.speeds.iter().all(Option::is_none)));
}

#[test]
fn progress_log_survives_a_torn_write() {
    let dir = temp_dir();
    let path = dir.join("progress.log");
    let id = Uuid::new_v4();
    {
        let store = ProgressStore::open(&path).unwrap();
        store.append(id, t0(), 10).unwrap();
        store.append(id, t0() + Duration::minutes(5), 12).unwrap();
    }
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xde, 0xad]).unwrap();
    }
    let store = ProgressStore::open(&path).unwrap();
    assert_eq!(store.record_count(id), 2);
    store.append(id, t0() + Duration::minutes(10), 13).unwrap();
    drop(store);

    let store = ProgressStore::open(&path).unwrap();
    assert_eq!(store.latest(id).unwrap().progress, 13);
    assert_eq!(store.oldest(id).unwrap().progress, 10);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn concurrent_saves_of_one_name() {
    let tracker = tracker();
    let registry = tracker.registry().clone();
    let canvas = registry.grid().snapshot();
    let added = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let canvas = canvas.clone();
                scope.spawn(move || {
                    let t = pxtrack::template::Template::from_indexed(vec![1], 1, 1, i, 0, &canvas).unwrap();
                    matches!(registry.save(t, "race", i as u64), Ok(SaveOutcome::Added(_)))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|added| *added)
            .count()
    });
    assert_eq!(added, 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn correctness_bounds_hold() {
    let tracker = tracker();
    let canvas = tracker.registry().grid().snapshot();
    for (ox, oy) in [(-3, -3), (0, 0), (14, 14), (2, 2), (20, 0)] {
        let t = tracker.registry().load_template(&link(&square(4, [0, 0, 0]), ox, oy)).unwrap();
        let mut t2 = t.clone();
        let first = t2.update_progress(&canvas);
        let second = t2.update_progress(&canvas);
        assert_eq!(first, second);
        assert!(first <= t.total_placeable());
        assert!(t.total_placeable() <= t.total_size());
    }
}
