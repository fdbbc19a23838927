//! The seam between detection models and the tracker.

use crate::tracker::{Detection, Frame};

/// Turns a frame into detections with boxes, classes and embeddings.
///
/// A failure affects that frame only: the pipeline skips it and keeps running.
///
/// # Example
///
/// ```ignore
/// use corinthian::{DetectorAdapter, Detection, Frame};
///
/// struct FaceAndBodyModel;
///
/// impl DetectorAdapter for FaceAndBodyModel {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
///         // decode frame.image_ref, run both heads, attach embeddings
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectorAdapter {
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}

/// Conversion from a model's native output, stamped with the frame it came from.
pub trait IntoDetections {
    fn into_detections(self, frame_sequence: u64) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self, frame_sequence: u64) -> Vec<Detection> {
        self.into_iter()
            .map(|mut det| {
                det.frame_sequence = frame_sequence;
                det
            })
            .collect()
    }
}

/// Detector replaying precomputed detections keyed by frame sequence.
///
/// Frames without an entry yield no detections.
#[derive(Debug, Clone, Default)]
pub struct RecordedDetections {
    frames: std::collections::BTreeMap<u64, Vec<Detection>>,
}

impl RecordedDetections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame_sequence: u64, detections: impl IntoDetections) {
        self.frames
            .insert(frame_sequence, detections.into_detections(frame_sequence));
    }
}

impl DetectorAdapter for RecordedDetections {
    type Error = std::convert::Infallible;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        Ok(self.frames.remove(&frame.sequence).unwrap_or_default())
    }
}
