//! demo - scripted end-to-end run against in-memory remotes
//!
//! Snapshots are written to `--out`; uploads, event logs and counters stay in
//! memory and are printed at the end.

use anyhow::{anyhow, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;

use crimefinder::detect::{Detection, StubSource};
use crimefinder::notify::RecordingNotifier;
use crimefinder::remote::{InMemoryObjectStore, InMemoryRealtimeDb};
use crimefinder::{
    Category, CategoryPolicy, CategoryStates, FilesystemSnapshotStore, Pipeline, RemoteError,
    ReportOutcome, Reporter, RetryPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output directory for snapshots.
    #[arg(long, default_value = "demo_out")]
    out: PathBuf,
    /// Cooldown in seconds applied to every category.
    #[arg(long, default_value_t = 10)]
    cooldown_secs: u64,
    /// Make the first upload fail with HTTP 403 to show a failed report.
    #[arg(long)]
    fail_upload: bool,
}

fn det(class_id: u32, confidence: f32) -> Detection {
    Detection {
        class_id,
        confidence,
        bbox: Default::default(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    stage("script detector frames");
    let t0 = Utc
        .with_ymd_and_hms(2026, 10, 19, 8, 0, 0)
        .single()
        .ok_or_else(|| anyhow!("invalid demo start time"))?;
    let at = |secs: i64| t0 + Duration::seconds(secs);
    let mut source = StubSource::new();
    source
        .push_frame(at(0), vec![det(7, 0.60)])?
        .push_frame(at(1), vec![det(5, 0.40)])?
        .push_frame(at(2), vec![det(0, 0.90), det(1, 0.99)])?
        .push_frame(at(5), vec![det(4, 0.90)])?
        .push_frame(at(6), vec![det(2, 0.80), det(6, 0.75)])?
        .push_frame(at(8), vec![det(8, 0.71)])?
        .push_frame(at(12), vec![det(7, 0.80)])?
        .push_frame(at(13), vec![det(7, 0.95)])?;

    stage("open stores");
    let snapshots = FilesystemSnapshotStore::open(&args.out)?;
    let objects = InMemoryObjectStore::new();
    let db = InMemoryRealtimeDb::new();
    let notifier = RecordingNotifier::new();
    if args.fail_upload {
        objects.fail_next(RemoteError::Status {
            code: 403,
            body: "permission denied".to_string(),
        });
    }
    let reporter = Reporter::new(snapshots, objects.clone(), db.clone())
        .with_retry(RetryPolicy::none())
        .with_notifier(notifier.clone());
    let cooldown = std::time::Duration::from_secs(args.cooldown_secs);
    let states = CategoryStates::new(|category| CategoryPolicy {
        cooldown,
        ..CategoryPolicy::default_for(category)
    });

    stage("run pipeline");
    let mut pipeline = Pipeline::new(source, reporter, states);
    pipeline.start()?;
    while let Some(frame) = pipeline.step()? {
        if frame.outcomes.is_empty() {
            println!("frame {}: nothing in scope", frame.index);
        }
        for (category, outcome) in &frame.outcomes {
            println!("frame {}: {} -> {}", frame.index, category, describe(outcome));
        }
    }

    stage("remote state");
    for category in Category::ALL {
        let counter = db.value(&category.counter_key()).unwrap_or_default();
        let events = db.list(&category.image_key());
        println!(
            "{} = {} ({} logged, local count {})",
            category.counter_key(),
            counter,
            events.len(),
            pipeline.states().get(category).count()
        );
        for event in events {
            println!("  {}", event.file_name);
        }
    }
    println!("uploaded objects: {}", objects.objects().len());
    for alert in notifier.alerts() {
        println!("alert: {} ({})", alert.title, alert.file_name);
    }

    let stats = pipeline.stats();
    println!(
        "frames={} detections={} excluded={} reported={} cooldown={} low_confidence={} failed={}",
        stats.frames,
        stats.detections,
        stats.excluded,
        stats.reported,
        stats.suppressed_cooldown,
        stats.suppressed_low_confidence,
        stats.failed
    );
    println!("snapshots in {}", args.out.display());
    Ok(())
}

fn describe(outcome: &ReportOutcome) -> String {
    match outcome {
        ReportOutcome::Reported { count, file_name } => {
            format!("reported #{} as {}", count, file_name)
        }
        ReportOutcome::Suppressed(reason) => format!("suppressed ({:?})", reason),
        ReportOutcome::Failed {
            count,
            file_name,
            error,
        } => format!("failed #{} {} at {}: {}", count, file_name, error.stage(), error),
    }
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
