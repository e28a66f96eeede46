//! Frame loop.
//!
//! Pulls frames from a `DetectionSource` one at a time, drops excluded class
//! ids, maps the rest to categories and hands each in-scope detection to the
//! reporter. Everything is sequential: a report blocks the next frame.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::category::{Category, ClassMap, ANNOTATION_EXCLUDED_CLASS_IDS};
use crate::detect::{ClassifiedDetection, DetectedFrame, DetectionSource};
use crate::report::{ReportOutcome, Reporter};
use crate::state::{CategoryStates, SuppressReason};

pub const DEFAULT_MAX_SOURCE_ERRORS: u32 = 10;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Running totals for one pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub detections: u64,
    pub excluded: u64,
    pub reported: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_low_confidence: u64,
    pub failed: u64,
    pub source_errors: u64,
}

impl PipelineStats {
    fn record(&mut self, outcome: &ReportOutcome) {
        match outcome {
            ReportOutcome::Reported { .. } => self.reported += 1,
            ReportOutcome::Suppressed(SuppressReason::Cooldown) => self.suppressed_cooldown += 1,
            ReportOutcome::Suppressed(SuppressReason::LowConfidence) => {
                self.suppressed_low_confidence += 1
            }
            ReportOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// What happened to one frame.
#[derive(Debug)]
pub struct FrameReport {
    pub index: u64,
    pub outcomes: Vec<(Category, ReportOutcome)>,
}

pub struct Pipeline<S: DetectionSource> {
    source: S,
    reporter: Reporter,
    states: CategoryStates,
    class_map: ClassMap,
    excluded: BTreeSet<u32>,
    max_source_errors: u32,
    consecutive_errors: u32,
    stats: PipelineStats,
}

impl<S: DetectionSource> Pipeline<S> {
    pub fn new(source: S, reporter: Reporter, states: CategoryStates) -> Self {
        Self {
            source,
            reporter,
            states,
            class_map: ClassMap::default(),
            excluded: ANNOTATION_EXCLUDED_CLASS_IDS.into_iter().collect(),
            max_source_errors: DEFAULT_MAX_SOURCE_ERRORS,
            consecutive_errors: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_class_map(mut self, class_map: ClassMap) -> Self {
        self.class_map = class_map;
        self
    }

    pub fn with_excluded_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.excluded = ids.into_iter().collect();
        self
    }

    /// Consecutive source errors tolerated before `run` gives up.
    pub fn with_max_source_errors(mut self, max: u32) -> Self {
        self.max_source_errors = max.max(1);
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn states(&self) -> &CategoryStates {
        &self.states
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Connect the source and publish the starting counters.
    ///
    /// A failed counter publish is logged; the detector still starts.
    pub fn start(&mut self) -> Result<()> {
        self.source.connect()?;
        if let Err(e) = self.reporter.publish_counts(&self.states) {
            log::warn!("initial counter publish failed: {}", e);
        }
        log::info!(
            "pipeline started: source={} excluded_ids={:?}",
            self.source.name(),
            self.excluded
        );
        Ok(())
    }

    /// Process the next frame. `Ok(None)` once the source has ended.
    pub fn step(&mut self) -> Result<Option<FrameReport>> {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.source_errors += 1;
                return Err(e);
            }
        };
        Ok(Some(self.process(frame)))
    }

    fn process(&mut self, frame: DetectedFrame) -> FrameReport {
        self.stats.frames += 1;
        let mut per_class: BTreeMap<u32, usize> = BTreeMap::new();
        let mut outcomes = Vec::new();

        for det in &frame.detections {
            self.stats.detections += 1;
            if self.excluded.contains(&det.class_id) {
                self.stats.excluded += 1;
                continue;
            }
            *per_class.entry(det.class_id).or_default() += 1;

            let Some(category) = self.class_map.category_for(det.class_id) else {
                continue;
            };
            let Some(classified) = ClassifiedDetection::new(category, det.confidence) else {
                log::warn!(
                    "frame {}: class {} has invalid confidence {}; skipped",
                    frame.index,
                    det.class_id,
                    det.confidence
                );
                continue;
            };
            let outcome = self.reporter.evaluate(
                &classified,
                self.states.get_mut(category),
                frame.captured_at,
                &frame.image,
            );
            self.stats.record(&outcome);
            outcomes.push((category, outcome));
        }

        if !per_class.is_empty() {
            let summary: Vec<String> = per_class
                .iter()
                .map(|(class_id, n)| format!("{} x class {}", n, class_id))
                .collect();
            log::debug!("frame {}: {}", frame.index, summary.join(", "));
        }

        FrameReport {
            index: frame.index,
            outcomes,
        }
    }

    /// Run until the source ends or `stop` is set.
    ///
    /// Report failures never end the loop. Source errors do only after
    /// `max_source_errors` in a row.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<PipelineStats> {
        let mut last_health_log = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            match self.step() {
                Ok(Some(_)) => self.consecutive_errors = 0,
                Ok(None) => {
                    log::info!("detector stream ended");
                    break;
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    log::warn!(
                        "frame read failed ({}/{}): {:#}",
                        self.consecutive_errors,
                        self.max_source_errors,
                        e
                    );
                    if self.consecutive_errors >= self.max_source_errors {
                        return Err(anyhow!(
                            "giving up after {} consecutive source errors: {}",
                            self.consecutive_errors,
                            e
                        ));
                    }
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source = self.source.stats();
                log::info!(
                    "health={} frames={} reported={} failed={} source={}",
                    self.source.is_healthy(),
                    source.frames_read,
                    self.stats.reported,
                    self.stats.failed,
                    source.source
                );
                last_health_log = Instant::now();
            }
        }

        for (category, state) in self.states.iter() {
            log::info!("{} total reports: {}", category, state.count());
        }
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, StubSource};
    use crate::remote::{InMemoryObjectStore, InMemoryRealtimeDb};
    use crate::report::RetryPolicy;
    use crate::storage::InMemorySnapshotStore;
    use chrono::{TimeZone, Utc};

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: Default::default(),
        }
    }

    #[test]
    fn same_frame_duplicates_report_once() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let mut source = StubSource::new();
        // 5 and 8 are both weapons; 1 is excluded; 3 is unmapped
        source
            .push_frame(at, vec![det(5, 0.9), det(8, 0.8), det(1, 0.99), det(3, 0.7)])
            .unwrap();
        let reporter = Reporter::new(
            InMemorySnapshotStore::new(),
            InMemoryObjectStore::new(),
            InMemoryRealtimeDb::new(),
        )
        .with_retry(RetryPolicy::none());
        let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
        pipeline.start().unwrap();

        let report = pipeline.step().unwrap().unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes[0].1.is_reported());
        assert!(matches!(
            report.outcomes[1].1,
            ReportOutcome::Suppressed(SuppressReason::Cooldown)
        ));
        assert!(pipeline.step().unwrap().is_none());

        let stats = pipeline.stats();
        assert_eq!(stats.detections, 4);
        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.reported, 1);
        assert_eq!(stats.suppressed_cooldown, 1);
        assert_eq!(pipeline.states().get(Category::Weapon).count(), 1);
    }

    #[test]
    fn invalid_confidence_is_skipped() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let mut source = StubSource::new();
        source.push_frame(at, vec![det(7, 1.7)]).unwrap();
        let reporter = Reporter::new(
            InMemorySnapshotStore::new(),
            InMemoryObjectStore::new(),
            InMemoryRealtimeDb::new(),
        );
        let mut pipeline = Pipeline::new(source, reporter, CategoryStates::default());
        pipeline.start().unwrap();
        let report = pipeline.step().unwrap().unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(pipeline.states().get(Category::Violence).count(), 0);
    }
}
