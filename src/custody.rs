//! Report certification against the custody ledger.
//!
//! Rendering reports is left to callers; this module checks the chain,
//! logs the report into it and hands back the entries an auditor needs.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::digest::ContentDigest;
use crate::error::Result;
use crate::integrity::is_recorded;
use crate::ledger::{AuditLedger, ChainVerification, LedgerEntry, LedgerEvent, verify_entries};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportManifest {
    pub report_id: String,
    pub case_id: String,
    pub investigator: String,
    /// Content digests of the evidence the report cites
    pub evidence: Vec<ContentDigest>,
}

/// Ordered ledger entries with their verification, attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyAppendix {
    pub verification: ChainVerification,
    pub entries: Vec<LedgerEntry>,
}

impl CustodyAppendix {
    pub fn from_ledger(ledger: &AuditLedger) -> Self {
        let entries = ledger.entries();
        Self {
            verification: verify_entries(&entries),
            entries,
        }
    }

    /// Recompute the chain over the attached entries.
    pub fn verify(&self) -> ChainVerification {
        verify_entries(&self.entries)
    }

    pub fn is_intact(&self) -> bool {
        self.verification.is_intact()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedReport {
    pub manifest: ReportManifest,
    /// The `ReportGenerated` entry
    pub certificate: LedgerEntry,
    pub appendix: CustodyAppendix,
}

/// Certify a report: refuse on a broken chain, otherwise log the report
/// generation and return the certificate with the full appendix.
pub fn certify_report(ledger: &AuditLedger, manifest: ReportManifest) -> Result<CertifiedReport> {
    let verified = ledger.audit_chain().inspect_err(|err| {
        error!(report = %manifest.report_id, error = %err, "report certification refused");
    })?;

    for digest in &manifest.evidence {
        if !is_recorded(ledger, digest) {
            warn!(report = %manifest.report_id, %digest, "cited evidence has no integrity record");
        }
    }

    let certificate = ledger.append(LedgerEvent::ReportGenerated {
        report_id: manifest.report_id.clone(),
        case_id: manifest.case_id.clone(),
        investigator: manifest.investigator.clone(),
        evidence: manifest.evidence.clone(),
        chain_head: ledger.head_digest(),
        chain_entries: verified,
    })?;
    info!(
        report = %manifest.report_id,
        case = %manifest.case_id,
        sequence = certificate.sequence,
        "report certified"
    );

    Ok(CertifiedReport {
        manifest,
        certificate,
        appendix: CustodyAppendix::from_ledger(ledger),
    })
}
