use anyhow::Result;

use crate::detect::result::DetectedFrame;

/// Frame statistics reported by a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_read: u64,
    pub detections_read: u64,
    pub source: String,
}

/// Pull-based detector output.
///
/// The detector itself (model, NMS, video decoding) lives outside this crate;
/// a source only turns its output into `DetectedFrame`s one at a time.
pub trait DetectionSource {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Start the detector or open its output. Called once before `next_frame`.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<DetectedFrame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: DetectionSource + ?Sized> DetectionSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<DetectedFrame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}
