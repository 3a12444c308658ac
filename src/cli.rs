// ============================================================================
// pxtrack CLI: template tracking from the command line
// ============================================================================
//
// Usage examples:
//   pxtrack --board canvas.png check "https://pxls.space/#template=logo.png&ox=10&oy=20"
//   pxtrack --board canvas.png --user 42 add logo "https://pxls.space/#template=logo.png&ox=10&oy=20"
//   pxtrack --board canvas.png list --sort 7d
//   pxtrack --board canvas.png speed logo --last 2d --groupby hour --utc-offset 2
//   pxtrack --board canvas.png --placemap placemap.png --virginmap virgin.png record
//
// The canvas is read from a board image in palette colours; the registry and
// progress log live in the configured data directory.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use clap::{Parser, Subcommand};

use pxtrack::analytics::GroupBy;
use pxtrack::analytics::ranking::SortColumn;
use pxtrack::canvas::{CanvasSnapshot, PixelGrid, SharedGrid};
use pxtrack::error::{Result, TrackerError};
use pxtrack::registry::SaveOutcome;
use pxtrack::settings::TrackerSettings;
use pxtrack::template::Visibility;
use pxtrack::template::source::{HttpImageSource, LocalImageSource};
use pxtrack::tracker::Tracker;
use pxtrack::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Pixel-art template progress tracker.
#[derive(Parser, Debug)]
#[command(
    name = "pxtrack",
    version,
    about = "Track how closely a collaborative canvas matches pixel-art templates",
    long_about = "Measure template progress against a canvas snapshot, keep a 5-minute\n\
                  progress history, and report speeds, ETAs and rankings.\n\n\
                  Example:\n  \
                  pxtrack --board canvas.png check \"https://pxls.space/#template=logo.png&ox=10&oy=20\"\n  \
                  pxtrack --board canvas.png list --sort eta"
)]
pub struct CliArgs {
    /// Canvas board image. Fully transparent pixels are unplaceable.
    #[arg(short, long, value_name = "BOARD.png")]
    pub board: PathBuf,

    /// Placeability mask (non-zero = placeable), same size as the board.
    #[arg(long, value_name = "PLACEMAP.png")]
    pub placemap: Option<PathBuf>,

    /// Virgin map (non-zero = never painted), same size as the board.
    #[arg(long, value_name = "VIRGINMAP.png")]
    pub virginmap: Option<PathBuf>,

    /// Settings file. Defaults to the platform config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the registry and progress log.
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Id of the acting user, checked against template owners.
    #[arg(short, long, default_value_t = 0)]
    pub user: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Progress of a template link or tracked name.
    Check {
        template: String,
        /// Also write the correctness overlay as a PNG.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Progress, recent activity and ETA of a tracked template.
    Info { name: String },
    /// Start tracking a template link under a name.
    Add {
        name: String,
        url: String,
        /// Keep the template out of the list and the combo.
        #[arg(long)]
        private: bool,
    },
    /// Ranking of all public templates.
    List {
        /// name, size, correct, togo, %, 1h, 6h, 1d, 7d, eta
        #[arg(short, long, default_value = "1h")]
        sort: String,
    },
    /// Change the link, name or owner of a template you own.
    Update {
        name: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        owner: Option<u64>,
        /// Where to write the before/after GIF when the link changes.
        #[arg(long, value_name = "FILE")]
        gif: Option<PathBuf>,
    },
    /// Stop tracking a template you own.
    Delete {
        name: String,
        /// Delete regardless of the owner.
        #[arg(long)]
        force: bool,
    },
    /// Speed over a trailing window.
    Speed {
        name: String,
        /// Window as ?y?mo?w?d?h?m?s (default: the whole history).
        #[arg(long)]
        last: Option<String>,
        /// Group by 5min, hour or day.
        #[arg(long)]
        groupby: Option<String>,
        /// Offset from UTC in hours used for grouping.
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        utc_offset: f64,
    },
    /// Record the current progress of every template.
    Record,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("cli: {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(args: CliArgs) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => TrackerSettings::load_from(path),
        None => TrackerSettings::load(),
    };
    if let Some(dir) = &args.data_dir {
        settings.data_dir = dir.clone();
    }
    pxtrack::logger::set_min_level(settings.log_level);

    let canvas = load_canvas(&args, &settings)?;
    log_info!(
        "cli: canvas {}x{} from {}",
        canvas.width(),
        canvas.height(),
        args.board.display()
    );
    let grid: Arc<dyn PixelGrid> = Arc::new(SharedGrid::new(canvas));
    let remote = HttpImageSource::new(
        Duration::from_secs(settings.fetch_timeout_secs),
        settings.max_image_bytes,
    )?;
    let source = LocalImageSource::with_remote(Arc::new(remote));
    let tracker = Tracker::open(settings, Arc::new(source), grid)?;
    let now = Utc::now();

    match args.command {
        Command::Check { template, image } => {
            let report = tracker.check(&template)?;
            println!("{}", report);
            if let Some(path) = image {
                std::fs::write(&path, tracker.progress_png(&template)?)?;
                println!("Progress image written to {}", path.display());
            }
        }
        Command::Info { name } => {
            println!("{}", tracker.info(&name, now)?);
        }
        Command::Add { name, url, private } => {
            let visibility = if private {
                Visibility::Private
            } else {
                Visibility::Public
            };
            match tracker.add(&name, &url, args.user, visibility)? {
                SaveOutcome::Added(t) => {
                    println!("Template '{}' added to the tracker.", t.name.unwrap_or_default());
                }
                SaveOutcome::AlreadyTracked(t) => {
                    println!(
                        "This template is already tracked as '{}'.",
                        t.name.unwrap_or_default()
                    );
                }
            }
        }
        Command::List { sort } => {
            let column: SortColumn = sort.parse()?;
            println!("{}", tracker.list(column, now));
        }
        Command::Update {
            name,
            url,
            new_name,
            owner,
            gif,
        } => {
            if url.is_none() && new_name.is_none() && owner.is_none() {
                return Err(TrackerError::InvalidFormat(
                    "nothing to update, pass --url, --new-name or --owner".into(),
                ));
            }
            let report = tracker.update(&name, args.user, url.as_deref(), new_name.as_deref(), owner)?;
            print!("{}", report);
            if let (Some(path), Some(bytes)) = (gif, &report.gif) {
                std::fs::write(&path, bytes)?;
                println!("Diff written to {}", path.display());
            }
        }
        Command::Delete { name, force } => {
            let t = tracker.delete(&name, args.user, force)?;
            println!("Template '{}' deleted.", t.name.unwrap_or_default());
        }
        Command::Speed {
            name,
            last,
            groupby,
            utc_offset,
        } => {
            let group_by = groupby.as_deref().map(str::parse::<GroupBy>).transpose()?;
            let offset = FixedOffset::east_opt((utc_offset * 3600.0).round() as i32)
                .ok_or_else(|| TrackerError::InvalidFormat(format!("invalid UTC offset {}", utc_offset)))?;
            println!("{}", tracker.speed(&name, last.as_deref(), group_by, offset, now)?);
        }
        Command::Record => {
            let s = tracker.record(now)?;
            println!(
                "Recorded {} templates ({} already up to date, {} failed).",
                s.recorded, s.skipped, s.failed
            );
        }
    }
    Ok(())
}

fn load_canvas(args: &CliArgs, settings: &TrackerSettings) -> Result<CanvasSnapshot> {
    let board = image::open(&args.board)?.into_rgba8();
    let placemap = match &args.placemap {
        Some(p) => Some(image::open(p)?.into_luma8()),
        None => None,
    };
    let virgin = match &args.virginmap {
        Some(p) => Some(image::open(p)?.into_luma8()),
        None => None,
    };
    CanvasSnapshot::from_images(
        &board,
        Arc::new(settings.palette.clone()),
        placemap.as_ref(),
        virgin.as_ref(),
    )
}
