//! Hash-chained ledger entries and chain verification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::{ContentDigest, hex_bytes};
use crate::error::{Error, Result};
use crate::ledger::event::LedgerEvent;

const DOMAIN_TAG: &[u8] = b"corinthian/ledger-entry/v1\0";

/// `previous_digest` of entry 0.
pub const GENESIS: ContentDigest = ContentDigest::ZERO;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    /// Canonical JSON of the event
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub payload_digest: ContentDigest,
    pub previous_digest: ContentDigest,
}

impl LedgerEntry {
    pub(crate) fn seal(
        sequence: u64,
        recorded_at: DateTime<Utc>,
        event: &LedgerEvent,
        previous_digest: ContentDigest,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(event)?;
        Ok(Self {
            sequence,
            recorded_at,
            payload_digest: ContentDigest::of(&payload),
            payload,
            previous_digest,
        })
    }

    /// Tag ‖ sequence ‖ seconds ‖ nanos ‖ payload digest ‖ previous digest,
    /// integers big-endian.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(DOMAIN_TAG.len() + 8 + 8 + 4 + 32 + 32);
        bytes.extend_from_slice(DOMAIN_TAG);
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        bytes.extend_from_slice(&self.recorded_at.timestamp().to_be_bytes());
        bytes.extend_from_slice(&self.recorded_at.timestamp_subsec_nanos().to_be_bytes());
        bytes.extend_from_slice(self.payload_digest.as_bytes());
        bytes.extend_from_slice(self.previous_digest.as_bytes());
        bytes
    }

    pub fn digest(&self) -> ContentDigest {
        ContentDigest::of(&self.canonical_bytes())
    }

    pub fn event(&self) -> Result<LedgerEvent> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// First inconsistency found while walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Entry sequence does not match its position
    SequenceMismatch,
    /// Payload bytes do not hash to the recorded payload digest
    PayloadDigestMismatch,
    /// Entry does not point at its predecessor's digest
    PreviousDigestMismatch,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SequenceMismatch => "sequence does not match position",
            Self::PayloadDigestMismatch => "payload digest mismatch",
            Self::PreviousDigestMismatch => "previous digest mismatch",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainVerification {
    Intact { entries: usize },
    Broken { sequence: u64, kind: BreakKind },
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }

    pub fn into_result(self) -> Result<usize> {
        match self {
            Self::Intact { entries } => Ok(entries),
            Self::Broken { sequence, kind } => Err(Error::LedgerChainBroken { sequence, kind }),
        }
    }
}

/// Recompute the chain from genesis.
pub fn verify_entries(entries: &[LedgerEntry]) -> ChainVerification {
    let mut previous = GENESIS;
    for (position, entry) in entries.iter().enumerate() {
        let position = position as u64;
        let kind = if entry.sequence != position {
            Some(BreakKind::SequenceMismatch)
        } else if ContentDigest::of(&entry.payload) != entry.payload_digest {
            Some(BreakKind::PayloadDigestMismatch)
        } else if entry.previous_digest != previous {
            Some(BreakKind::PreviousDigestMismatch)
        } else {
            None
        };
        if let Some(kind) = kind {
            return ChainVerification::Broken {
                sequence: position,
                kind,
            };
        }
        previous = entry.digest();
    }
    ChainVerification::Intact {
        entries: entries.len(),
    }
}
