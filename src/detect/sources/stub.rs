use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;

use crate::detect::result::{DetectedFrame, Detection};
use crate::detect::source::{DetectionSource, SourceStats};

/// Encode a small synthetic JPEG. `seed` shifts the gradient so frames differ.
pub fn synthetic_jpeg(width: u32, height: u32, seed: u8) -> Result<Vec<u8>> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x as u8).wrapping_mul(7).wrapping_add(seed);
        let g = (y as u8).wrapping_mul(5).wrapping_add(seed);
        image::Rgb([r, g, seed])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("encode synthetic jpeg")?;
    Ok(buf.into_inner())
}

/// Scripted source for tests and the demo binary.
///
/// Frames are queued up front and handed out in order; each gets a synthetic
/// JPEG so downstream storage sees real image bytes.
pub struct StubSource {
    frames: VecDeque<DetectedFrame>,
    frame_count: u64,
    detection_count: u64,
    connected: bool,
}

impl StubSource {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            frame_count: 0,
            detection_count: 0,
            connected: false,
        }
    }

    /// Queue a frame captured at `captured_at`.
    pub fn push_frame(
        &mut self,
        captured_at: DateTime<Utc>,
        detections: Vec<Detection>,
    ) -> Result<&mut Self> {
        let index = self.frames.len() as u64 + self.frame_count;
        let image = synthetic_jpeg(32, 24, index as u8)?;
        self.frames.push_back(DetectedFrame {
            index,
            captured_at,
            detections,
            image,
        });
        Ok(self)
    }

    /// Queue `count` frames `interval` apart starting at `start`, each with
    /// the same detections.
    pub fn push_sequence(
        &mut self,
        start: DateTime<Utc>,
        interval: Duration,
        count: usize,
        detections: &[Detection],
    ) -> Result<&mut Self> {
        let mut at = start;
        for _ in 0..count {
            self.push_frame(at, detections.to_vec())?;
            at += interval;
        }
        Ok(self)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl Default for StubSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionSource for StubSource {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<DetectedFrame>> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        self.frame_count += 1;
        self.detection_count += frame.detections.len() as u64;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            detections_read: self.detection_count,
            source: "stub://scripted".to_string(),
        }
    }
}
