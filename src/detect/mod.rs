mod result;
mod source;
pub mod sources;

pub use result::{BoundingBox, ClassifiedDetection, DetectedFrame, Detection};
pub use source::{DetectionSource, SourceStats};
pub use sources::{JsonLinesConfig, JsonLinesInput, JsonLinesSource, StubSource};
