//! crimefinderd - detection reporting daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by CRIMEFINDER_CONFIG, then env overrides)
//! 2. Spawns the detector, or replays a recorded output file
//! 3. Debounces violence / weapon / fire detections per category
//! 4. Stores snapshots locally and reports them to Firebase
//! 5. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crimefinder::config::{CrimefinderConfig, FirebaseTarget};
use crimefinder::detect::JsonLinesSource;
use crimefinder::remote::{OfflineObjectStore, OfflineRealtimeDb};
use crimefinder::{CategoryStates, FilesystemSnapshotStore, Pipeline, Reporter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CRIMEFINDER_CONFIG")]
    config: Option<PathBuf>,
    /// Camera stream passed to the detector.
    #[arg(long)]
    source: Option<String>,
    /// Replay a recorded detector output file instead of spawning the detector.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Skip Firebase even if configured; uploads are dropped.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CrimefinderConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.detector.source = source;
    }
    if let Some(replay) = args.replay {
        cfg.detector.replay_path = Some(replay);
    }
    cfg.validate()?;

    let snapshots = FilesystemSnapshotStore::open(&cfg.snapshot_dir)
        .with_context(|| format!("open snapshot dir {}", cfg.snapshot_dir.display()))?;
    log::info!("snapshots stored under {}", cfg.snapshot_dir.display());

    let reporter = build_reporter(&cfg, snapshots, args.dry_run)?;
    let states = CategoryStates::new(|category| cfg.policy_for(category));
    for (category, state) in states.iter() {
        log::info!(
            "{}: class ids {:?}, cooldown {:?}, min confidence {}",
            category,
            cfg.class_map.class_ids(category),
            state.cooldown(),
            state.min_confidence()
        );
    }

    let source_config = cfg.detector.source_config();
    log::info!("detector input: {:?}", source_config.input);
    let source = JsonLinesSource::new(source_config);
    let mut pipeline = Pipeline::new(source, reporter, states)
        .with_class_map(cfg.class_map.clone())
        .with_excluded_ids(cfg.excluded_class_ids.iter().copied())
        .with_max_source_errors(cfg.max_source_errors);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    pipeline.start()?;
    log::info!("crimefinderd running (Ctrl-C to stop)");
    let stats = pipeline.run(&stop)?;
    log::info!(
        "stopped: frames={} detections={} reported={} suppressed_cooldown={} suppressed_low_confidence={} failed={}",
        stats.frames,
        stats.detections,
        stats.reported,
        stats.suppressed_cooldown,
        stats.suppressed_low_confidence,
        stats.failed
    );
    Ok(())
}

fn build_reporter(
    cfg: &CrimefinderConfig,
    snapshots: FilesystemSnapshotStore,
    dry_run: bool,
) -> Result<Reporter> {
    let reporter = match (&cfg.firebase, dry_run) {
        (Some(target), false) => remote_reporter(target, snapshots)?,
        (_, true) => {
            log::info!("dry run: uploads dropped, recent events kept in memory");
            offline_reporter(snapshots)
        }
        (None, false) => {
            log::warn!("no firebase configuration; snapshots stay local only");
            offline_reporter(snapshots)
        }
    };
    let reporter = reporter
        .with_retry(cfg.retry)
        .with_name_offset(cfg.name_offset);
    attach_notifier(cfg, reporter, dry_run)
}

fn offline_reporter(snapshots: FilesystemSnapshotStore) -> Reporter {
    Reporter::new(snapshots, OfflineObjectStore::new(), OfflineRealtimeDb::new())
}

#[cfg(feature = "firebase")]
fn remote_reporter(target: &FirebaseTarget, snapshots: FilesystemSnapshotStore) -> Result<Reporter> {
    use crimefinder::remote::{FirebaseDatabase, FirebaseStorage};

    let settings = target.settings();
    if settings.auth_token.is_none() {
        log::warn!("CRIMEFINDER_FIREBASE_TOKEN not set; requests are unauthenticated");
    }
    let storage = FirebaseStorage::new(&settings)?;
    let database = FirebaseDatabase::new(&settings)?;
    log::info!(
        "reporting to {} (bucket {})",
        target.database_url,
        target.storage_bucket
    );
    Ok(Reporter::new(snapshots, storage, database))
}

#[cfg(not(feature = "firebase"))]
fn remote_reporter(_target: &FirebaseTarget, snapshots: FilesystemSnapshotStore) -> Result<Reporter> {
    log::warn!("built without the firebase feature; snapshots stay local only");
    Ok(offline_reporter(snapshots))
}

#[cfg(feature = "firebase")]
fn attach_notifier(cfg: &CrimefinderConfig, reporter: Reporter, dry_run: bool) -> Result<Reporter> {
    use crimefinder::notify::FcmNotifier;

    match &cfg.notify {
        Some(target) if !dry_run => {
            let notifier = FcmNotifier::new(&target.settings()?)?;
            log::info!("push notifications enabled for project {}", target.project_id);
            Ok(reporter.with_notifier(notifier))
        }
        _ => Ok(reporter),
    }
}

#[cfg(not(feature = "firebase"))]
fn attach_notifier(cfg: &CrimefinderConfig, reporter: Reporter, _dry_run: bool) -> Result<Reporter> {
    if cfg.notify.is_some() {
        log::warn!("built without the firebase feature; notifications disabled");
    }
    Ok(reporter)
}
