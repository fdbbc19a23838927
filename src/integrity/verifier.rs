//! Integrity verdicts and the verifier running hashing, extraction and heuristics.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::deadline::Deadline;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::integrity::asset::MediaAsset;
use crate::integrity::heuristics::{
    self, Anomaly, HeuristicOutcome, IntegrityConfig, ObstructionEvent, Severity,
};
use crate::integrity::metadata::{self, ExtractedMetadata, MediaFormat};
use crate::ledger::{AuditLedger, LedgerEntry, LedgerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Suspect,
    Tampered,
}

/// Result of verifying one asset. Determined by the bytes and frame samples
/// alone; the asset's name, source and file-system times play no part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityVerdict {
    pub digest: ContentDigest,
    pub format: MediaFormat,
    pub metadata: BTreeMap<String, String>,
    /// Flagged heuristics by name
    pub anomalies: BTreeMap<String, Anomaly>,
    pub obstruction_events: Vec<ObstructionEvent>,
    pub verdict: Verdict,
}

impl IntegrityVerdict {
    pub fn is_flagged(&self, anomaly: &str) -> bool {
        self.anomalies.contains_key(anomaly)
    }
}

/// Every step's output for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub asset: String,
    pub source: Option<String>,
    /// File-system times as found at ingest, for the record only
    pub file_created: Option<DateTime<Utc>>,
    pub file_modified: Option<DateTime<Utc>>,
    pub digest: ContentDigest,
    pub metadata: ExtractedMetadata,
    pub heuristics: Vec<HeuristicOutcome>,
    pub verdict: IntegrityVerdict,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityVerifier {
    config: IntegrityConfig,
}

const HASH_CHUNK: usize = 1 << 20;

impl IntegrityVerifier {
    pub fn new(config: IntegrityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    pub fn verify(&self, asset: &MediaAsset) -> IntegrityVerdict {
        self.report(asset).verdict
    }

    pub fn report(&self, asset: &MediaAsset) -> IntegrityReport {
        self.assemble(asset, asset.digest(), metadata::extract(&asset.bytes))
    }

    pub fn verify_within(&self, asset: &MediaAsset, deadline: Deadline) -> Result<IntegrityVerdict> {
        self.report_within(asset, deadline).map(|report| report.verdict)
    }

    /// Verify assets in parallel; results keep the input order.
    pub fn verify_batch(&self, assets: &[MediaAsset]) -> Vec<IntegrityVerdict> {
        assets.par_iter().map(|asset| self.verify(asset)).collect()
    }

    /// Parallel verification giving each asset its own time budget.
    pub fn verify_batch_within(
        &self,
        assets: &[MediaAsset],
        per_asset: Duration,
    ) -> Vec<Result<IntegrityVerdict>> {
        assets
            .par_iter()
            .map(|asset| self.verify_within(asset, Deadline::after(per_asset)))
            .collect()
    }

    /// Read `path` and verify it. A path that cannot be read in full is
    /// Tampered with a `read_failure` naming the I/O error, and its digest
    /// covers the bytes read before the failure.
    pub fn verify_path(&self, path: impl AsRef<Path>) -> IntegrityVerdict {
        match MediaAsset::read_partial(path) {
            (asset, None) => self.verify(&asset),
            (asset, Some(err)) => {
                error!(asset = %asset.name, error = %err, "asset unreadable");
                let mut metadata = metadata::extract(&asset.bytes);
                metadata.structure_error = Some(err.to_string());
                self.assemble(&asset, asset.digest(), metadata).verdict
            }
        }
    }

    /// Verify and log the verdict into the custody ledger.
    pub fn verify_and_record(
        &self,
        asset: &MediaAsset,
        ledger: &AuditLedger,
    ) -> Result<(IntegrityVerdict, LedgerEntry)> {
        let verdict = self.verify(asset);
        let entry = ledger.append(LedgerEvent::IntegrityVerified {
            asset: asset.name.clone(),
            source: asset.source.clone(),
            digest: verdict.digest,
            verdict: verdict.verdict,
            anomalies: verdict.anomalies.keys().cloned().collect(),
        })?;
        Ok((verdict, entry))
    }

    pub fn report_within(&self, asset: &MediaAsset, deadline: Deadline) -> Result<IntegrityReport> {
        let timeout = |stage| Error::VerificationTimeout {
            asset: asset.name.clone(),
            stage,
        };

        let chunks = asset.bytes.chunks(HASH_CHUNK);
        let digest = ContentDigest::of_parts(chunks.take_while(|_| !deadline.expired()));
        if deadline.expired() {
            return Err(timeout("hashing"));
        }
        let metadata = metadata::extract(&asset.bytes);
        if deadline.expired() {
            return Err(timeout("metadata extraction"));
        }
        let report = self.assemble(asset, digest, metadata);
        if deadline.expired() {
            return Err(timeout("heuristics"));
        }
        Ok(report)
    }

    /// Heuristics and verdict over an already hashed and parsed asset.
    fn assemble(
        &self,
        asset: &MediaAsset,
        digest: ContentDigest,
        metadata: ExtractedMetadata,
    ) -> IntegrityReport {
        let obstruction_events = heuristics::detect_obstruction(&asset.frame_samples, &self.config);
        let outcomes = heuristics::evaluate(asset, &metadata, &obstruction_events, &self.config);

        let anomalies: BTreeMap<String, Anomaly> = outcomes
            .iter()
            .filter_map(|o| {
                o.flagged.as_ref().map(|rationale| {
                    (
                        o.name.to_string(),
                        Anomaly {
                            severity: o.severity,
                            rationale: rationale.clone(),
                        },
                    )
                })
            })
            .collect();
        let verdict = match anomalies.values().map(|a| a.severity).max() {
            Some(Severity::High) => Verdict::Tampered,
            Some(Severity::Low) => Verdict::Suspect,
            None => Verdict::Clean,
        };

        if let Some(reason) = &metadata.structure_error {
            warn!(asset = %asset.name, %digest, %reason, "asset structure unreadable");
        }
        info!(
            asset = %asset.name,
            %digest,
            format = metadata.format.as_str(),
            ?verdict,
            anomalies = anomalies.len(),
            "asset verified"
        );

        IntegrityReport {
            asset: asset.name.clone(),
            source: asset.source.clone(),
            file_created: asset.created_at,
            file_modified: asset.modified_at,
            digest,
            verdict: IntegrityVerdict {
                digest,
                format: metadata.format,
                metadata: metadata.fields.clone(),
                anomalies,
                obstruction_events,
                verdict,
            },
            metadata,
            heuristics: outcomes,
        }
    }
}

/// Whether the ledger holds an integrity verification of content `digest`.
pub fn is_recorded(ledger: &AuditLedger, digest: &ContentDigest) -> bool {
    ledger.entries().iter().any(|entry| {
        matches!(
            entry.event(),
            Ok(LedgerEvent::IntegrityVerified { digest: recorded, .. }) if recorded == *digest
        )
    })
}
