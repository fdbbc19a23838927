//! Evidence core for CCTV analysis: multi-object tracking, offender identity
//! resolution, media integrity verification and a hash-chained custody ledger.

pub mod appearance;
pub mod config;
pub mod custody;
pub mod deadline;
pub mod digest;
pub mod error;
pub mod identity;
pub mod integration;
pub mod integrity;
pub mod ledger;
pub mod tracker;

pub use appearance::{Appearance, AppearanceEntry, AppearanceFilter, AppearanceLog, AppearanceQuery};
pub use config::{Config, PipelineConfig};
pub use custody::{CertifiedReport, CustodyAppendix, ReportManifest, certify_report};
pub use deadline::Deadline;
pub use digest::ContentDigest;
pub use error::{Error, Result};
pub use identity::{
    IdentityRecord, IdentityResolver, MatchEvent, MatchOutcome, OffenderIndex, OffenderIndexHandle,
    ResolutionPolicy, ResolverConfig, UnknownReason,
};
pub use integration::{
    CancelFlag, DetectionBuilder, DetectorAdapter, FrameReport, IntoDetections, RecordedDetections,
    StreamPipeline, StreamSummary, run_streams,
};
pub use integrity::{IntegrityConfig, IntegrityVerdict, IntegrityVerifier, MediaAsset, Verdict, is_recorded};
pub use ledger::{AuditLedger, ChainVerification, LedgerEntry, LedgerEvent, StreamEnd, verify_entries};
pub use tracker::{
    Detection, Embedding, Frame, ObjectClass, PlateSighting, Rect, Track, TrackId, TrackManager,
    TrackState, TrackUpdate, TrackerConfig, UpdateKind, normalize_plate,
};
