//! Media integrity: content digest, metadata extraction, tamper heuristics
//! and the resulting verdict.

mod asset;
mod heuristics;
mod metadata;
mod verifier;

pub use asset::{FrameSample, MediaAsset};
pub use heuristics::{
    Anomaly, CAMERA_OBSTRUCTION, DUPLICATE_FRAMES, EDIT_HISTORY, HeuristicOutcome,
    IntegrityConfig, MISSING_METADATA, MODIFICATION_BEFORE_CREATION, ObstructionEvent,
    READ_FAILURE, REENCODE_SIGNATURE, SPLICE_DISCONTINUITY, Severity, TIMESTAMP_MISMATCH,
    detect_obstruction,
};
pub use metadata::{ExtractedMetadata, MediaFormat, detect_format, extract};
pub use verifier::{
    IntegrityReport, IntegrityVerdict, IntegrityVerifier, Verdict, is_recorded,
};
