//! Crate-wide error type.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::ledger::BreakKind;
use crate::tracker::TrackId;

/// Errors raised by the tracking, identity, integrity and custody layers.
///
/// Some variants are reportable rather than fatal: `ResolutionAmbiguous`,
/// the per-stage timeouts and `InvalidDetection` are collected into frame
/// reports while the pipeline keeps running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "frame {sequence} captured at {captured_at} is not after frame {last_sequence} captured at {last_captured_at}"
    )]
    OutOfOrderFrame {
        sequence: u64,
        captured_at: DateTime<Utc>,
        last_sequence: u64,
        last_captured_at: DateTime<Utc>,
    },

    #[error("association for frame {sequence} exceeded its deadline during {stage}")]
    AssociationTimeout { sequence: u64, stage: &'static str },

    #[error("identity resolution for track {track} exceeded its deadline")]
    ResolutionTimeout { track: TrackId },

    #[error("verification of `{asset}` exceeded its deadline during {stage}")]
    VerificationTimeout { asset: String, stage: &'static str },

    #[error(
        "track {track} is ambiguous between `{best}` ({best_distance:.4}) and `{runner_up}` ({runner_up_distance:.4})"
    )]
    ResolutionAmbiguous {
        track: TrackId,
        best: String,
        best_distance: f32,
        runner_up: String,
        runner_up_distance: f32,
    },

    #[error("cannot read media asset {path}: {source}")]
    IntegrityReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger chain broken at entry {sequence}: {kind}")]
    LedgerChainBroken { sequence: u64, kind: BreakKind },

    #[error("failed to persist ledger entry {sequence}: {source}")]
    LedgerWrite {
        sequence: u64,
        #[source]
        source: std::io::Error,
    },

    /// A write failed part way, so the sink may hold a partial line; the
    /// store takes no more entries until it is reopened.
    #[error("ledger store halted after entry {failed_at} failed to persist")]
    LedgerHalted { failed_at: u64 },

    #[error("ledger store {path} is unreadable at line {line}: {reason}")]
    LedgerCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("offender index failed to load: {reason}")]
    IndexLoadFailure { reason: String },

    #[error("track id namespace of stream {stream} is exhausted")]
    TrackIdsExhausted { stream: u32 },

    #[error("stream {stream} is assigned to more than one pipeline")]
    DuplicateStream { stream: u32 },

    #[error("detection {index} of frame {sequence} rejected: {reason}")]
    InvalidDetection {
        sequence: u64,
        index: usize,
        reason: String,
    },

    #[error("detector failed on frame {sequence}: {source}")]
    Detector {
        sequence: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
