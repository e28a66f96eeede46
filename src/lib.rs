//! crimefinder
//!
//! Event debounce and reporting around an external object detector that
//! flags violence, weapons and fire in a camera stream.
//!
//! # Architecture
//!
//! The detector (model, NMS, video decoding) runs outside this crate. This
//! crate:
//!
//! 1. **Drives the detector**: spawns it, or replays its recorded output, and
//!    pulls one frame of detections at a time.
//! 2. **Debounces**: each category has its own gate (cooldown, then minimum
//!    confidence). At most one report per category per cooldown window.
//! 3. **Reports**: local snapshot, object upload, event log append, counter
//!    push. Strictly in that order; a failed step skips the rest.
//!
//! # Module Structure
//!
//! - `category`: categories, class-id table, per-category policy
//! - `state`: per-category counters and gates
//! - `detect`: frame types and detection sources (JSON lines, stub)
//! - `storage`: local snapshot persistence
//! - `remote`: object store and realtime database backends
//! - `report`: the reporter and its retry policy
//! - `notify`: push notification after a report
//! - `pipeline`: the frame loop
//! - `config`: file and environment configuration

pub mod category;
pub mod config;
pub mod detect;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod remote;
pub mod report;
pub mod state;
pub mod storage;

pub use category::{Category, CategoryPolicy, ClassMap};
pub use config::CrimefinderConfig;
pub use detect::{ClassifiedDetection, DetectedFrame, Detection, DetectionSource};
pub use error::{ConfigurationError, RemoteError, ReportError, ReportStage};
pub use pipeline::{FrameReport, Pipeline, PipelineStats};
pub use report::{snapshot_file_name, ReportOutcome, Reporter, RetryPolicy};
pub use state::{CategoryState, CategoryStates, SuppressReason};
pub use storage::{FilesystemSnapshotStore, InMemorySnapshotStore, SnapshotStore};
