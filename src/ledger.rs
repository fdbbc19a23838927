//! Tamper-evident custody ledger.

mod entry;
mod event;
mod store;

pub use entry::{BreakKind, ChainVerification, GENESIS, LedgerEntry, verify_entries};
pub use event::{LedgerEvent, StreamEnd};
pub use store::AuditLedger;
