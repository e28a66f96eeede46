//! JSON-lines detector output.
//!
//! The external detector writes one JSON object per processed frame:
//!
//! ```text
//! {"frame": 12, "timestamp": "2026-10-19T08:00:00Z", "image_path": "frames/12.jpg",
//!  "detections": [{"class_id": 7, "confidence": 0.62, "bbox": [10, 20, 200, 240]}]}
//! ```
//!
//! `frame` and `timestamp` are optional. The source either spawns the
//! detector and reads its stdout, or replays a recorded file.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::detect::result::{DetectedFrame, Detection};
use crate::detect::source::{DetectionSource, SourceStats};

/// Where the JSON lines come from.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonLinesInput {
    /// Spawn the detector and read its stdout.
    Process { program: String, args: Vec<String> },
    /// Replay a recorded output file.
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct JsonLinesConfig {
    pub input: JsonLinesInput,
    /// Base directory for relative `image_path` values.
    pub frame_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct FrameLine {
    #[serde(default)]
    frame: Option<u64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    image_path: PathBuf,
    #[serde(default)]
    detections: Vec<Detection>,
}

pub struct JsonLinesSource {
    config: JsonLinesConfig,
    reader: Option<Box<dyn BufRead + Send>>,
    child: Option<Child>,
    line_no: u64,
    frame_count: u64,
    detection_count: u64,
    ended: bool,
    last_error: Option<String>,
}

impl JsonLinesSource {
    pub fn new(config: JsonLinesConfig) -> Self {
        Self {
            config,
            reader: None,
            child: None,
            line_no: 0,
            frame_count: 0,
            detection_count: 0,
            ended: false,
            last_error: None,
        }
    }

    fn describe(&self) -> String {
        match &self.config.input {
            JsonLinesInput::Process { program, args } => {
                format!("{} {}", program, args.join(" "))
            }
            JsonLinesInput::File(path) => path.display().to_string(),
        }
    }

    fn resolve_image_path(&self, path: &Path) -> PathBuf {
        match &self.config.frame_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn finish(&mut self) {
        self.ended = true;
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) if status.success() => log::info!("detector exited cleanly"),
                Ok(status) => log::warn!("detector exited with {}", status),
                Err(e) => log::warn!("failed to reap detector process: {}", e),
            }
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<DetectedFrame> {
        let parsed: FrameLine = serde_json::from_str(line)
            .map_err(|e| anyhow!("detector line {}: invalid frame record: {}", self.line_no, e))?;
        let image_path = self.resolve_image_path(&parsed.image_path);
        let image = std::fs::read(&image_path)
            .with_context(|| format!("read frame image {}", image_path.display()))?;
        match image::guess_format(&image) {
            Ok(image::ImageFormat::Jpeg) => {}
            Ok(other) => {
                return Err(anyhow!(
                    "frame image {} is {:?}, expected JPEG",
                    image_path.display(),
                    other
                ))
            }
            Err(e) => {
                return Err(anyhow!(
                    "frame image {} is not a recognised image: {}",
                    image_path.display(),
                    e
                ))
            }
        }

        let index = parsed.frame.unwrap_or(self.frame_count);
        self.frame_count += 1;
        self.detection_count += parsed.detections.len() as u64;
        Ok(DetectedFrame {
            index,
            captured_at: parsed.timestamp.unwrap_or_else(Utc::now),
            detections: parsed.detections,
            image,
        })
    }
}

impl DetectionSource for JsonLinesSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn connect(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let reader: Box<dyn BufRead + Send> = match &self.config.input {
            JsonLinesInput::Process { program, args } => {
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .spawn()
                    .with_context(|| format!("spawn detector '{}'", program))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("detector stdout not captured"))?;
                log::info!("detector started (pid {}): {}", child.id(), self.describe());
                self.child = Some(child);
                Box::new(BufReader::new(stdout))
            }
            JsonLinesInput::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("open detector replay {}", path.display()))?;
                Box::new(BufReader::new(file))
            }
        };
        self.reader = Some(reader);
        self.ended = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DetectedFrame>> {
        if self.ended {
            return Ok(None);
        }
        let mut line = String::new();
        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| anyhow!("jsonl source not connected; call connect() first"))?;
            line.clear();
            let read = reader.read_line(&mut line).context("read detector output")?;
            if read == 0 {
                self.finish();
                return Ok(None);
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            break;
        }

        match self.parse_line(line.trim()) {
            Ok(frame) => {
                self.last_error = None;
                Ok(Some(frame))
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.reader.is_some() && !self.ended && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            detections_read: self.detection_count,
            source: self.describe(),
        }
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
