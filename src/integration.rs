//! Integration of detection backends with the tracker, resolver and ledger.
//!
//! This module provides the detector trait, a builder for detections from
//! raw model output and the per-stream pipeline.

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectorAdapter, IntoDetections, RecordedDetections};
pub use pipeline::{CancelFlag, FrameReport, StreamPipeline, StreamSummary, run_streams};
