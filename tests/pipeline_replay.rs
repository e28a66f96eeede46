use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use crimefinder::detect::sources::synthetic_jpeg;
use crimefinder::detect::{Detection, JsonLinesConfig, JsonLinesInput, JsonLinesSource, StubSource};
use crimefinder::remote::{
    InMemoryObjectStore, InMemoryRealtimeDb, OfflineObjectStore, OfflineRealtimeDb,
};
use crimefinder::{
    Category, CategoryStates, FilesystemSnapshotStore, InMemorySnapshotStore, Pipeline,
    RemoteError, ReportOutcome, Reporter, RetryPolicy,
};

fn det(class_id: u32, confidence: f32) -> Detection {
    Detection {
        class_id,
        confidence,
        bbox: Default::default(),
    }
}

fn write_frames(dir: &Path, count: u8) {
    for i in 0..count {
        let bytes = synthetic_jpeg(16, 16, i).expect("encode frame");
        fs::write(dir.join(format!("{}.jpg", i)), bytes).expect("write frame");
    }
}

#[test]
fn replayed_detector_output_reports_to_disk_and_remotes() {
    let work = TempDir::new().expect("tempdir");
    let frames = work.path().join("frames");
    fs::create_dir_all(&frames).unwrap();
    write_frames(&frames, 4);

    let replay = work.path().join("detections.jsonl");
    let lines = [
        r#"{"frame": 0, "timestamp": "2026-10-19T08:00:00Z", "image_path": "0.jpg", "detections": [{"class_id": 7, "confidence": 0.62, "bbox": [1, 2, 10, 12]}]}"#,
        "",
        r#"{"frame": 1, "timestamp": "2026-10-19T08:00:01Z", "image_path": "1.jpg", "detections": [{"class_id": 2, "confidence": 0.99}, {"class_id": 6, "confidence": 0.98}]}"#,
        r#"{"frame": 2, "timestamp": "2026-10-19T08:00:03Z", "image_path": "2.jpg", "detections": [{"class_id": 7, "confidence": 0.91}, {"class_id": 4, "confidence": 0.77}]}"#,
        r#"{"frame": 3, "timestamp": "2026-10-19T08:00:11Z", "image_path": "3.jpg", "detections": [{"class_id": 7, "confidence": 0.58}]}"#,
    ];
    fs::write(&replay, lines.join("\n")).unwrap();

    let snapshot_dir = work.path().join("runs/detect");
    let objects = InMemoryObjectStore::new();
    let db = InMemoryRealtimeDb::new();
    let reporter = Reporter::new(
        FilesystemSnapshotStore::open(&snapshot_dir).unwrap(),
        objects.clone(),
        db.clone(),
    )
    .with_retry(RetryPolicy::none());
    let source = JsonLinesSource::new(JsonLinesConfig {
        input: JsonLinesInput::File(replay),
        frame_root: Some(frames),
    });
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();

    // counters are published as zero before the first frame
    assert_eq!(db.value("fire_count").as_deref(), Some("0"));

    let stop = AtomicBool::new(false);
    let stats = pipeline.run(&stop).unwrap();

    assert_eq!(stats.frames, 4);
    assert_eq!(stats.detections, 6);
    assert_eq!(stats.excluded, 2);
    // violence at :00 and :11, fire at :03; violence at :03 is inside the cooldown
    assert_eq!(stats.reported, 3);
    assert_eq!(stats.suppressed_cooldown, 1);
    assert_eq!(stats.failed, 0);

    assert_eq!(db.value("violence_count").as_deref(), Some("2"));
    assert_eq!(db.value("fire_count").as_deref(), Some("1"));
    assert_eq!(db.value("weapon_count").as_deref(), Some("0"));
    assert_eq!(objects.objects().len(), 3);

    let violence: Vec<String> = db
        .list("violence_img")
        .into_iter()
        .map(|r| r.file_name)
        .collect();
    assert_eq!(
        violence,
        vec![
            "violence_20261019_080000_1.jpg".to_string(),
            "violence_20261019_080011_2.jpg".to_string(),
        ]
    );
    for name in &violence {
        let path = snapshot_dir.join("violence_img").join(name);
        let bytes = fs::read(&path).expect("snapshot on disk");
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }
    assert!(snapshot_dir
        .join("fire_img/fire_20261019_080003_1.jpg")
        .exists());
}

#[test]
fn excluded_ids_never_reach_the_reporter() {
    let t0 = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
    let mut source = StubSource::new();
    source
        .push_sequence(
            t0,
            Duration::seconds(20),
            3,
            &[det(1, 0.99), det(2, 0.99), det(6, 0.99)],
        )
        .unwrap();

    let objects = InMemoryObjectStore::new();
    let db = InMemoryRealtimeDb::new();
    let reporter = Reporter::new(InMemorySnapshotStore::new(), objects.clone(), db.clone());
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();
    while let Some(frame) = pipeline.step().unwrap() {
        assert!(frame.outcomes.is_empty());
    }

    assert_eq!(pipeline.stats().excluded, 9);
    assert_eq!(objects.attempts(), 0);
    assert_eq!(db.push_attempts(), 0);
    for category in Category::ALL {
        assert_eq!(pipeline.states().get(category).count(), 0);
    }
}

#[test]
fn report_failures_do_not_stop_the_loop() {
    let t0 = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
    let mut source = StubSource::new();
    source
        .push_sequence(t0, Duration::seconds(15), 3, &[det(5, 0.9)])
        .unwrap();

    let objects = InMemoryObjectStore::new();
    objects.fail_next(RemoteError::Status {
        code: 400,
        body: "bad request".into(),
    });
    let db = InMemoryRealtimeDb::new();
    let reporter = Reporter::new(InMemorySnapshotStore::new(), objects.clone(), db.clone())
        .with_retry(RetryPolicy::none());
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();

    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.reported, 2);
    // the failed report still consumed count 1
    assert_eq!(db.value("weapon_count").as_deref(), Some("3"));
    assert_eq!(db.list("weapon_img").len(), 2);
}

#[test]
fn malformed_lines_are_tolerated_up_to_the_limit() {
    let work = TempDir::new().expect("tempdir");
    write_frames(work.path(), 1);
    let replay = work.path().join("detections.jsonl");
    let lines = [
        "not json",
        r#"{"image_path": "missing.jpg"}"#,
        r#"{"image_path": "0.jpg", "detections": [{"class_id": 0, "confidence": 0.8}]}"#,
    ];
    fs::write(&replay, lines.join("\n")).unwrap();

    let build = |max_errors: u32| {
        let reporter = Reporter::new(
            InMemorySnapshotStore::new(),
            InMemoryObjectStore::new(),
            InMemoryRealtimeDb::new(),
        );
        let source = JsonLinesSource::new(JsonLinesConfig {
            input: JsonLinesInput::File(replay.clone()),
            frame_root: Some(work.path().to_path_buf()),
        });
        Pipeline::new(source, reporter, CategoryStates::default())
            .with_max_source_errors(max_errors)
    };

    let mut tolerant = build(3);
    tolerant.start().unwrap();
    let stats = tolerant.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(stats.source_errors, 2);
    assert_eq!(stats.reported, 1);

    let mut strict = build(2);
    strict.start().unwrap();
    let err = strict.run(&AtomicBool::new(false)).unwrap_err();
    assert!(err.to_string().contains("consecutive source errors"), "{}", err);
}

#[test]
fn stop_flag_ends_the_run_before_the_first_frame() {
    let mut source = StubSource::new();
    source
        .push_frame(Utc::now(), vec![det(7, 0.9)])
        .unwrap();
    let reporter = Reporter::new(
        InMemorySnapshotStore::new(),
        InMemoryObjectStore::new(),
        InMemoryRealtimeDb::new(),
    );
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();
    let stats = pipeline.run(&AtomicBool::new(true)).unwrap();
    assert_eq!(stats.frames, 0);
    assert_eq!(pipeline.source().remaining(), 1);
}

#[test]
fn outcomes_follow_detector_order_within_a_frame() {
    let t0 = Utc.with_ymd_and_hms(2026, 10, 19, 11, 0, 0).unwrap();
    let mut source = StubSource::new();
    source
        .push_frame(t0, vec![det(0, 0.3), det(4, 0.8), det(7, 0.9)])
        .unwrap();
    let reporter = Reporter::new(
        InMemorySnapshotStore::new(),
        InMemoryObjectStore::new(),
        InMemoryRealtimeDb::new(),
    );
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();
    let frame = pipeline.step().unwrap().expect("one frame");
    let summary: Vec<(Category, bool)> = frame
        .outcomes
        .iter()
        .map(|(category, outcome)| (*category, matches!(outcome, ReportOutcome::Reported { .. })))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Category::Fire, false),
            (Category::Fire, true),
            (Category::Violence, true),
        ]
    );
}

#[test]
fn offline_backends_do_not_grow_with_reports() {
    let t0 = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
    let mut source = StubSource::new();
    source
        .push_sequence(t0, Duration::seconds(10), 100, &[det(7, 0.9)])
        .unwrap();

    let objects = OfflineObjectStore::new();
    let db = OfflineRealtimeDb::with_capacity(8);
    let reporter = Reporter::new(InMemorySnapshotStore::new(), objects.clone(), db.clone());
    let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
    pipeline.start().unwrap();
    let stats = pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(stats.reported, 100);
    assert_eq!(objects.uploads(), 100);
    assert!(objects.bytes_seen() > 0);
    assert_eq!(db.pushes(), 100);
    let recent = db.recent();
    assert_eq!(recent.len(), 8);
    assert!(recent[7].1.file_name.ends_with("_100.jpg"));
    assert_eq!(db.value("violence_count").as_deref(), Some("100"));
}
