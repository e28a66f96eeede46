pub mod jsonl;
pub mod stub;

pub use jsonl::{JsonLinesConfig, JsonLinesInput, JsonLinesSource};
pub use stub::{synthetic_jpeg, StubSource};
