//! Frames and the detections a detector produces for them.

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::embedding::Embedding;
use crate::tracker::rect::Rect;

/// One timestamped frame from a video file or live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// Opaque reference to the decoded image (path, URI, `file#index`...).
    pub image_ref: String,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, image_ref: impl Into<String>) -> Self {
        Self {
            sequence,
            captured_at,
            image_ref: image_ref.into(),
        }
    }
}

/// Object category. Tracking logic is shared; only cost weights differ.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    #[default]
    Person,
    Vehicle,
    Other,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Vehicle => "vehicle",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector output for one object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Sequence number of the frame this detection belongs to
    pub frame_sequence: u64,
    /// Bounding box in TLWH format
    pub bbox: Rect,
    pub class: ObjectClass,
    /// Detection confidence in `[0, 1]`
    pub confidence: f32,
    /// Appearance embedding, when the detector provides one
    pub embedding: Option<Embedding>,
    /// Licence plate read on this object, already normalised
    #[serde(default)]
    pub plate: Option<String>,
}

/// Length of a plausible plate reading after normalisation.
const PLATE_LEN: RangeInclusive<usize> = 8..=10;

/// Upper-case alphanumerics of an OCR reading, or `None` when the result
/// is too short or too long to be a plate.
pub fn normalize_plate(text: &str) -> Option<String> {
    let plate: String = text
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    PLATE_LEN.contains(&plate.len()).then_some(plate)
}

impl Detection {
    pub fn new(frame_sequence: u64, bbox: Rect, class: ObjectClass, confidence: f32) -> Self {
        Self {
            frame_sequence,
            bbox,
            class,
            confidence,
            embedding: None,
            plate: None,
        }
    }

    pub fn with_embedding(mut self, embedding: impl Into<Embedding>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }

    /// Attach an OCR plate reading. Readings that do not look like a plate
    /// are dropped.
    pub fn with_plate(mut self, text: &str) -> Self {
        self.plate = normalize_plate(text);
        self
    }

    /// Check the detection against the frame it was delivered with.
    pub fn validate(&self, frame: &Frame) -> Result<(), String> {
        if self.frame_sequence != frame.sequence {
            return Err(format!(
                "belongs to frame {} but was delivered with frame {}",
                self.frame_sequence, frame.sequence
            ));
        }
        if !self.bbox.is_valid() {
            return Err(format!("degenerate bounding box {:?}", self.bbox.to_tlwh()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() || !embedding.is_finite() {
                return Err("embedding is empty or not finite".to_string());
            }
        }
        Ok(())
    }
}
