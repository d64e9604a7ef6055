use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zonemark_core::persistence::{layout_path, load_layout, save_layout};
use zonemark_core::{
    lopdf_engines, CommandDetector, DetectorHandle, DocumentTextIndex, ReplayDetector, SessionNotice,
    SkippedPage, StoreError, Zone, ZoneSession, ZoneStore, ZonemarkConfig,
};
use zonemark_engine::{default_engine, OpenSource, PdfEngine};
use zonemark_scheduler::ConcurrencyPolicy;

#[derive(Debug, Parser)]
#[command(name = "zonemark")]
#[command(about = "Extract and edit layout zones of PDF documents")]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config location).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Detect zones and save them as a layout.
    Extract(ExtractArgs),
    /// Print the zones of a saved layout as JSON.
    Zones {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
        /// Only this page (1-based).
        #[arg(long)]
        page: Option<u32>,
    },
    /// Merge zones on one page into a single zone.
    Merge {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
        #[arg(value_name = "ID", num_args = 1..)]
        ids: Vec<String>,
    },
    /// Exchange the sequence numbers of two zones.
    Swap {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
        #[arg(value_name = "ID", num_args = 1..)]
        ids: Vec<String>,
    },
    /// Change the type of a zone.
    Retype {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
        #[arg(value_name = "ID")]
        id: String,
        #[arg(value_name = "TYPE")]
        zone_type: String,
    },
    /// Delete zones.
    Delete {
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
        #[arg(value_name = "ID", num_args = 1..)]
        ids: Vec<String>,
        /// Confirm deleting more than one zone.
        #[arg(long)]
        yes: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Detections exported by a layout model.
    #[arg(long, value_name = "JSON", required_unless_present = "detector_cmd")]
    detections: Option<PathBuf>,
    /// Layout model executable, run once per batch with page PNGs as arguments.
    #[arg(long, value_name = "PROGRAM", conflicts_with = "detections")]
    detector_cmd: Option<PathBuf>,
    /// Extra argument passed to the detector before the page images.
    #[arg(long = "detector-arg", value_name = "ARG", allow_hyphen_values = true)]
    detector_args: Vec<String>,
    #[arg(long)]
    dpi: Option<u32>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    iou_threshold: Option<f64>,
    #[arg(long)]
    pages_per_job: Option<u32>,
    #[arg(long)]
    policy: Option<ConcurrencyPolicy>,
    /// Layout output path (defaults to `<FILE>.zones.json`).
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    page_sizes_pt: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct ExtractOutput {
    pages: Vec<u32>,
    zones: usize,
    skipped_pages: Vec<SkippedPage>,
    output: String,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Extract(args) => run_extract(args, config),
        Commands::Zones { layout, page } => run_zones(&layout, page),
        Commands::Merge { layout, ids } => edit_layout(&layout, config, |store| {
            let merged = store.merge(&as_refs(&ids))?;
            println!("{merged}");
            Ok(())
        }),
        Commands::Swap { layout, ids } => edit_layout(&layout, config, |store| {
            store.swap_sequence(&as_refs(&ids))
        }),
        Commands::Retype { layout, id, zone_type } => {
            edit_layout(&layout, config, |store| store.retype(&id, &zone_type))
        }
        Commands::Delete { layout, ids, yes } => edit_layout(&layout, config, |store| {
            let deleted = store.delete(&as_refs(&ids), yes)?;
            println!("deleted {deleted}");
            Ok(())
        }),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr, honoring `RUST_LOG` when set
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "zonemark_cli={level},zonemark_core={level},zonemark_scheduler={level},zonemark_engine={level}"
        ))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let page_sizes_pt = (0..page_count)
        .map(|page| {
            engine
                .page_size(handle, page)
                .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let payload = InfoOutput { path: file.display().to_string(), page_count, page_sizes_pt };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    engine.close(handle)?;

    Ok(())
}

fn run_extract(args: ExtractArgs, config_path: Option<&Path>) -> Result<()> {
    ensure_pdf_exists(&args.file)?;

    let mut config = ZonemarkConfig::load(config_path).context("failed to load configuration")?;
    let settings = &mut config.extraction;
    if let Some(dpi) = args.dpi {
        settings.dpi = dpi;
    }
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(threshold) = args.iou_threshold {
        settings.overlap_iou_threshold = threshold;
    }
    if let Some(pages) = args.pages_per_job {
        settings.pages_per_job = pages;
    }
    if let Some(policy) = args.policy {
        settings.concurrency_policy = policy;
    }
    config.validate().context("invalid extraction settings")?;

    let detector = match (&args.detections, &args.detector_cmd) {
        (Some(path), _) => DetectorHandle::new(
            ReplayDetector::from_file(path)
                .with_context(|| format!("failed to read detections from {}", path.display()))?,
        ),
        (None, Some(program)) => {
            DetectorHandle::new(CommandDetector::new(program).with_args(&args.detector_args))
        }
        (None, None) => anyhow::bail!("either --detections or --detector-cmd is required"),
    };

    let mut session = ZoneSession::new(config, detector, lopdf_engines())?;
    session.open_for_extraction(&args.file).context("failed to open PDF")?;
    let notices = session
        .wait_for_jobs(Duration::from_secs(args.timeout_secs))
        .context("extraction did not finish")?;

    let mut pages = Vec::new();
    let mut skipped_pages = Vec::new();
    for notice in notices {
        match notice {
            SessionNotice::JobCompleted { report, .. } => {
                pages.extend(report.pages);
                skipped_pages.extend(report.skipped);
            }
            SessionNotice::JobFailed { message, .. } => anyhow::bail!("extraction failed: {message}"),
            SessionNotice::JobCancelled { job_id } => anyhow::bail!("extraction job {job_id} was cancelled"),
            _ => {}
        }
    }
    pages.sort_unstable();
    skipped_pages.sort_by_key(|skipped| skipped.page);

    let output = args.output.unwrap_or_else(|| layout_path(&args.file));
    session
        .save_as(&output)
        .with_context(|| format!("failed to write layout to {}", output.display()))?;

    let summary = ExtractOutput {
        pages,
        zones: session.store().zone_count(),
        skipped_pages,
        output: output.display().to_string(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn run_zones(layout: &Path, page: Option<u32>) -> Result<()> {
    let zones = load_layout(layout)?;
    let zones: Vec<&Zone> = match page {
        Some(0) => anyhow::bail!("--page is 1-based and must be >= 1"),
        Some(page) => zones.iter().filter(|zone| zone.page() == page - 1).collect(),
        None => zones.iter().collect(),
    };

    println!("{}", serde_json::to_string_pretty(&zones)?);
    Ok(())
}

/// Load a layout into a store, apply `edit`, and write the layout back
fn edit_layout<F>(layout: &Path, config_path: Option<&Path>, edit: F) -> Result<()>
where
    F: FnOnce(&mut ZoneStore) -> Result<(), StoreError>,
{
    let config = ZonemarkConfig::load(config_path).context("failed to load configuration")?;
    let mut store = ZoneStore::new(Arc::new(config.registry()), config.reading_order);
    store
        .load(load_layout(layout)?)
        .with_context(|| format!("invalid layout {}", layout.display()))?;

    if let Some(pdf) = pdf_for_layout(layout) {
        let mut engine = default_engine();
        match engine.open(OpenSource::from(pdf.as_path())) {
            Ok(handle) => store.set_text_source(Box::new(DocumentTextIndex::new(
                Box::new(engine),
                handle,
                config.extraction.overlap_iou_threshold,
            ))),
            Err(err) => tracing::warn!(pdf = %pdf.display(), error = %err, "text unavailable"),
        }
    }

    edit(&mut store)?;
    save_layout(layout, store.zones())?;
    Ok(())
}

/// The PDF a `<file>.zones.json` layout belongs to, when it exists
fn pdf_for_layout(layout: &Path) -> Option<PathBuf> {
    let pdf = PathBuf::from(layout.to_str()?.strip_suffix(".zones.json")?);
    pdf.is_file().then_some(pdf)
}

fn as_refs(ids: &[String]) -> Vec<&str> {
    ids.iter().map(String::as_str).collect()
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
