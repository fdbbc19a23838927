//! Material operations recorded in the custody ledger.

use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::identity::MatchEvent;
use crate::integrity::Verdict;
use crate::tracker::TrackUpdate;

/// Why a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    EndOfStream,
    Cancelled,
    /// Stopped by an unrecoverable error
    Failed,
}

/// One ledger payload. Serialised with `serde_json` into the canonical bytes
/// that the payload digest covers, so field order is part of the format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A detection spawned a track or was committed to one.
    DetectionCommitted {
        stream: u32,
        update: TrackUpdate,
    },
    /// A state change without a detection: a miss or an end-of-stream flush.
    TrackTransition {
        stream: u32,
        update: TrackUpdate,
    },
    MatchDecided {
        stream: u32,
        decision: MatchEvent,
    },
    IntegrityVerified {
        asset: String,
        /// Camera the asset came from, when known
        source: Option<String>,
        digest: ContentDigest,
        verdict: Verdict,
        anomalies: Vec<String>,
    },
    ReportGenerated {
        report_id: String,
        case_id: String,
        investigator: String,
        evidence: Vec<ContentDigest>,
        /// Digest of the last entry the report was certified against
        chain_head: ContentDigest,
        chain_entries: usize,
    },
    FrameRejected {
        stream: u32,
        sequence: u64,
        reason: String,
    },
    StreamClosed {
        stream: u32,
        reason: StreamEnd,
        frames: u64,
    },
    /// Amends the entry at `supersedes`; the original stays in the chain.
    Correction {
        supersedes: u64,
        reason: String,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DetectionCommitted { .. } => "detection_committed",
            Self::TrackTransition { .. } => "track_transition",
            Self::MatchDecided { .. } => "match_decided",
            Self::IntegrityVerified { .. } => "integrity_verified",
            Self::ReportGenerated { .. } => "report_generated",
            Self::FrameRejected { .. } => "frame_rejected",
            Self::StreamClosed { .. } => "stream_closed",
            Self::Correction { .. } => "correction",
        }
    }
}
