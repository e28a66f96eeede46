//! Event debounce and reporting.
//!
//! `Reporter::evaluate` turns one classified detection into at most one
//! report. A report is four ordered steps:
//!
//! 1. write the frame to local snapshot storage
//! 2. upload the same bytes to `{category}_img/{file_name}`
//! 3. append `{file_name}` to the `{category}_img` event log
//! 4. push `{category}_count` to the realtime database root
//!
//! A failed step skips the ones after it. The category state is committed
//! before step 1 and is not rolled back.

mod retry;

pub use retry::{RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_INITIAL_BACKOFF};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::BTreeMap;

use crate::category::Category;
use crate::detect::ClassifiedDetection;
use crate::error::{RemoteError, ReportError};
use crate::notify::{Alert, Notifier};
use crate::remote::{EventRecord, ObjectStore, RealtimeDb, JPEG_CONTENT_TYPE};
use crate::state::{CategoryState, CategoryStates, SuppressReason};
use crate::storage::SnapshotStore;

/// Result of evaluating one detection.
#[derive(Debug)]
pub enum ReportOutcome {
    Reported { count: u64, file_name: String },
    Suppressed(SuppressReason),
    /// The gate passed and the state was committed, but a step failed.
    Failed {
        count: u64,
        file_name: String,
        error: ReportError,
    },
}

impl ReportOutcome {
    pub fn is_reported(&self) -> bool {
        matches!(self, ReportOutcome::Reported { .. })
    }
}

/// `{category}_{YYYYMMDD_HHMMSS}_{count}.jpg`
pub fn snapshot_file_name(category: Category, at: DateTime<FixedOffset>, count: u64) -> String {
    format!("{}_{}_{}.jpg", category, at.format("%Y%m%d_%H%M%S"), count)
}

pub struct Reporter {
    snapshots: Box<dyn SnapshotStore>,
    objects: Box<dyn ObjectStore>,
    db: Box<dyn RealtimeDb>,
    notifier: Option<Box<dyn Notifier>>,
    retry: RetryPolicy,
    name_offset: FixedOffset,
}

impl Reporter {
    pub fn new(
        snapshots: impl SnapshotStore + 'static,
        objects: impl ObjectStore + 'static,
        db: impl RealtimeDb + 'static,
    ) -> Self {
        Self {
            snapshots: Box::new(snapshots),
            objects: Box::new(objects),
            db: Box::new(db),
            notifier: None,
            retry: RetryPolicy::default(),
            name_offset: Utc.fix(),
        }
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Offset used for the timestamp in snapshot file names.
    pub fn with_name_offset(mut self, offset: FixedOffset) -> Self {
        self.name_offset = offset;
        self
    }

    /// Gate `detection` against `state` and, if it passes, report it.
    ///
    /// Suppressed detections never touch `state` or any store. This never
    /// returns an error: failures come back as `ReportOutcome::Failed` so the
    /// frame loop keeps running.
    pub fn evaluate(
        &mut self,
        detection: &ClassifiedDetection,
        state: &mut CategoryState,
        now: DateTime<Utc>,
        frame: &[u8],
    ) -> ReportOutcome {
        let category = detection.category();
        if let Err(reason) = state.gate(detection.confidence(), now) {
            log::debug!(
                "{} suppressed ({:?}) conf={:.2}",
                category,
                reason,
                detection.confidence()
            );
            return ReportOutcome::Suppressed(reason);
        }

        let count = state.commit(now);
        let file_name =
            snapshot_file_name(category, now.with_timezone(&self.name_offset), count);
        log::info!(
            "{} detected: report #{} conf={:.2} file={}",
            category,
            count,
            detection.confidence(),
            file_name
        );

        match self.deliver(category, count, &file_name, frame) {
            Ok(()) => {
                self.notify(category, count, &file_name);
                ReportOutcome::Reported { count, file_name }
            }
            Err(error) => {
                log::error!(
                    "{} report #{} at {} failed during {}: {}",
                    category,
                    count,
                    now.to_rfc3339(),
                    error.stage(),
                    error
                );
                ReportOutcome::Failed {
                    count,
                    file_name,
                    error,
                }
            }
        }
    }

    fn deliver(
        &mut self,
        category: Category,
        count: u64,
        file_name: &str,
        frame: &[u8],
    ) -> Result<(), ReportError> {
        let path = self
            .snapshots
            .write(category, file_name, frame)
            .map_err(|source| ReportError::SnapshotWrite {
                category,
                path: self.snapshots.path_for(category, file_name),
                source,
            })?;
        log::debug!("snapshot written to {}", path.display());

        let folder = category.image_key();
        let objects = &mut self.objects;
        self.retry
            .run("snapshot upload", || {
                objects.upload(&folder, file_name, frame, JPEG_CONTENT_TYPE)
            })
            .map_err(|source| ReportError::Upload {
                category,
                object: format!("{}/{}", folder, file_name),
                source,
            })?;
        log::info!("snapshot uploaded: {}/{}", folder, file_name);

        let record = EventRecord {
            file_name: file_name.to_string(),
        };
        let db = &mut self.db;
        let id = self
            .retry
            .run("event log append", || db.push(&folder, &record))
            .map_err(|source| ReportError::EventLog {
                category,
                key: folder.clone(),
                source,
            })?;
        log::debug!("event log {} appended as {}", folder, id);

        let counter_key = category.counter_key();
        let mut fields = BTreeMap::new();
        fields.insert(counter_key.clone(), count.to_string());
        let db = &mut self.db;
        self.retry
            .run("counter push", || db.update(&fields))
            .map_err(|source| ReportError::CounterPush {
                category,
                key: counter_key,
                source,
            })?;
        Ok(())
    }

    fn notify(&mut self, category: Category, count: u64, file_name: &str) {
        let Some(notifier) = self.notifier.as_mut() else {
            return;
        };
        let alert = Alert::new(category, count, file_name);
        if let Err(e) = self.retry.run("notification", || notifier.notify(&alert)) {
            log::warn!("{} notification for report #{} failed: {}", category, count, e);
        }
    }

    /// Push every category's current count in one update.
    ///
    /// Called once at startup so the remote counters reflect this process.
    pub fn publish_counts(&mut self, states: &CategoryStates) -> Result<(), RemoteError> {
        let fields: BTreeMap<String, String> = states
            .iter()
            .map(|(category, state)| (category.counter_key(), state.count().to_string()))
            .collect();
        let db = &mut self.db;
        self.retry.run("counter publish", || db.update(&fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryPolicy;
    use crate::notify::RecordingNotifier;
    use crate::remote::{InMemoryObjectStore, InMemoryRealtimeDb};
    use crate::storage::InMemorySnapshotStore;
    use chrono::TimeZone;

    struct Harness {
        snapshots: InMemorySnapshotStore,
        objects: InMemoryObjectStore,
        db: InMemoryRealtimeDb,
        reporter: Reporter,
    }

    fn harness() -> Harness {
        let snapshots = InMemorySnapshotStore::new();
        let objects = InMemoryObjectStore::new();
        let db = InMemoryRealtimeDb::new();
        let reporter = Reporter::new(snapshots.clone(), objects.clone(), db.clone())
            .with_retry(RetryPolicy::new(3, std::time::Duration::ZERO));
        Harness {
            snapshots,
            objects,
            db,
            reporter,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap()
    }

    fn det(category: Category, confidence: f32) -> ClassifiedDetection {
        ClassifiedDetection::new(category, confidence).unwrap()
    }

    #[test]
    fn file_name_format() {
        let t = at(8, 5, 9).fixed_offset();
        assert_eq!(
            snapshot_file_name(Category::Violence, t, 12),
            "violence_20261019_080509_12.jpg"
        );
    }

    #[test]
    fn name_offset_shifts_timestamp() {
        let mut h = harness();
        h.reporter = h
            .reporter
            .with_name_offset(FixedOffset::east_opt(9 * 3600).unwrap());
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Fire));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Fire, 0.9), &mut state, at(20, 0, 0), b"jpg");
        match outcome {
            ReportOutcome::Reported { file_name, .. } => {
                assert_eq!(file_name, "fire_20261020_050000_1.jpg")
            }
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[test]
    fn report_performs_all_steps_in_order() {
        let mut h = harness();
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Weapon));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Weapon, 0.7), &mut state, at(8, 0, 0), b"frame");

        let ReportOutcome::Reported { count, file_name } = outcome else {
            panic!("expected report");
        };
        assert_eq!(count, 1);
        assert_eq!(file_name, "weapon_20261019_080000_1.jpg");
        assert_eq!(state.count(), 1);
        assert_eq!(state.last_report_time(), at(8, 0, 0));

        assert_eq!(
            h.snapshots.files(),
            vec![std::path::PathBuf::from("weapon_img/weapon_20261019_080000_1.jpg")]
        );
        let objects = h.objects.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].path, "weapon_img/weapon_20261019_080000_1.jpg");
        assert_eq!(objects[0].bytes, b"frame");
        assert_eq!(objects[0].content_type, "image/jpeg");
        assert_eq!(
            h.db.list("weapon_img"),
            vec![EventRecord {
                file_name: "weapon_20261019_080000_1.jpg".into()
            }]
        );
        assert_eq!(h.db.value("weapon_count").as_deref(), Some("1"));
    }

    #[test]
    fn local_write_failure_stops_before_remote() {
        let mut h = harness();
        h.snapshots.fail_writes(true);
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Fire));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Fire, 0.9), &mut state, at(8, 0, 0), b"frame");

        match outcome {
            ReportOutcome::Failed { count, error, .. } => {
                assert_eq!(count, 1);
                assert_eq!(error.stage(), crate::error::ReportStage::SnapshotWrite);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.objects.attempts(), 0);
        assert_eq!(h.db.push_attempts(), 0);
        assert_eq!(h.db.update_attempts(), 0);
        // committed, not rolled back
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn upload_failure_skips_log_and_counter() {
        let mut h = harness();
        h.objects.fail_next(RemoteError::Status {
            code: 403,
            body: "forbidden".into(),
        });
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Violence));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Violence, 0.8), &mut state, at(8, 0, 0), b"f");

        let ReportOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.stage(), crate::error::ReportStage::Upload);
        assert_eq!(h.snapshots.files().len(), 1);
        assert_eq!(h.objects.attempts(), 1);
        assert_eq!(h.db.push_attempts(), 0);
        assert_eq!(h.db.update_attempts(), 0);
    }

    #[test]
    fn log_failure_skips_counter() {
        let mut h = harness();
        h.db.fail_next_push(RemoteError::Decode("bad".into()));
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Fire));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Fire, 0.8), &mut state, at(8, 0, 0), b"f");
        let ReportOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.stage(), crate::error::ReportStage::EventLog);
        assert_eq!(h.objects.objects().len(), 1);
        assert_eq!(h.db.update_attempts(), 0);
        assert_eq!(h.db.value("fire_count"), None);
    }

    #[test]
    fn transient_remote_errors_are_retried() {
        let mut h = harness();
        h.objects.fail_next(RemoteError::Transport("reset".into()));
        h.db.fail_next_update(RemoteError::Status {
            code: 503,
            body: String::new(),
        });
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Fire));
        let outcome = h
            .reporter
            .evaluate(&det(Category::Fire, 0.8), &mut state, at(8, 0, 0), b"f");
        assert!(outcome.is_reported());
        assert_eq!(h.objects.attempts(), 2);
        assert_eq!(h.db.update_attempts(), 2);
        assert_eq!(h.db.value("fire_count").as_deref(), Some("1"));
    }

    #[test]
    fn notifier_runs_only_after_full_report() {
        let notes = RecordingNotifier::new();
        let mut h = harness();
        h.reporter = h.reporter.with_notifier(notes.clone());
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Fire));

        h.db.fail_next_update(RemoteError::Status {
            code: 400,
            body: String::new(),
        });
        let first = h
            .reporter
            .evaluate(&det(Category::Fire, 0.8), &mut state, at(8, 0, 0), b"f");
        assert!(matches!(first, ReportOutcome::Failed { .. }));
        assert!(notes.alerts().is_empty());

        let second = h
            .reporter
            .evaluate(&det(Category::Fire, 0.8), &mut state, at(8, 0, 10), b"f");
        assert!(second.is_reported());
        let alerts = notes.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 2);
    }

    #[test]
    fn notification_failure_keeps_the_report() {
        let notes = RecordingNotifier::new();
        let mut h = harness();
        h.reporter = h.reporter.with_notifier(notes.clone());
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Violence));

        notes.fail_next(RemoteError::Status {
            code: 403,
            body: "sender id mismatch".into(),
        });
        let outcome = h
            .reporter
            .evaluate(&det(Category::Violence, 0.9), &mut state, at(8, 0, 0), b"v");
        assert!(outcome.is_reported());
        assert_eq!(h.db.value("violence_count").as_deref(), Some("1"));
        assert_eq!(notes.attempts(), 1);
        assert!(notes.alerts().is_empty());
    }

    #[test]
    fn transient_notification_errors_are_retried() {
        let notes = RecordingNotifier::new();
        let mut h = harness();
        h.reporter = h.reporter.with_notifier(notes.clone());
        let mut state = CategoryState::new(CategoryPolicy::default_for(Category::Weapon));

        notes.fail_next(RemoteError::Transport("connection reset".into()));
        notes.fail_next(RemoteError::Status {
            code: 503,
            body: String::new(),
        });
        let outcome = h
            .reporter
            .evaluate(&det(Category::Weapon, 0.9), &mut state, at(8, 0, 0), b"w");
        assert!(outcome.is_reported());
        assert_eq!(notes.attempts(), 3);
        let alerts = notes.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Weapon detected");
    }

    #[test]
    fn publish_counts_writes_all_three() {
        let mut h = harness();
        let states = CategoryStates::default();
        h.reporter.publish_counts(&states).unwrap();
        for category in Category::ALL {
            assert_eq!(h.db.value(&category.counter_key()).as_deref(), Some("0"));
        }
    }
}
