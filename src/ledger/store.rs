//! The append-only ledger and its JSON-lines persistence.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::digest::ContentDigest;
use crate::error::{Error, Result};
use crate::ledger::entry::{ChainVerification, GENESIS, LedgerEntry, verify_entries};
use crate::ledger::event::LedgerEvent;

type Sink = Box<dyn Write + Send>;

/// The persistence side of the ledger, guarded by the writer lock.
#[derive(Default)]
struct Writer {
    sink: Option<Sink>,
    /// Sequence of the entry whose write failed
    failed_at: Option<u64>,
}

impl Writer {
    fn new(sink: Sink) -> Self {
        Self {
            sink: Some(sink),
            failed_at: None,
        }
    }
}

/// Append-only, hash-chained record of every material operation.
///
/// Appends are serialised through the writer lock; readers take snapshots
/// of the entry arena concurrently. An entry becomes visible only after it
/// has been written to the sink. After a failed write the sink and memory
/// may disagree, so every later append fails with `LedgerHalted`.
pub struct AuditLedger {
    writer: Mutex<Writer>,
    entries: RwLock<Vec<LedgerEntry>>,
    path: Option<PathBuf>,
}

impl AuditLedger {
    /// Ledger kept only in memory.
    pub fn in_memory() -> Self {
        Self {
            writer: Mutex::new(Writer::default()),
            entries: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Ledger mirroring every entry as one JSON line to `writer`.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Writer::new(Box::new(writer))),
            entries: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open or create a persistent JSON-lines store, restoring its entries.
    ///
    /// The chain is not required to be intact here; `verify_chain` and
    /// `audit_chain` report tampering of the stored file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => parse_lines(&path, &text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::LedgerCorrupt {
                    path,
                    line: 0,
                    reason: e.to_string(),
                });
            }
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::LedgerWrite {
                sequence: entries.len() as u64,
                source,
            })?;

        info!(path = %path.display(), entries = entries.len(), "audit ledger opened");
        Ok(Self {
            writer: Mutex::new(Writer::new(Box::new(BufWriter::new(file)))),
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Seal `event` onto the head of the chain.
    pub fn append(&self, event: LedgerEvent) -> Result<LedgerEntry> {
        let mut writer = self.writer.lock();
        if let Some(failed_at) = writer.failed_at {
            return Err(Error::LedgerHalted { failed_at });
        }

        let (sequence, previous) = {
            let entries = self.entries.read();
            let previous = entries.last().map_or(GENESIS, LedgerEntry::digest);
            (entries.len() as u64, previous)
        };
        let entry = LedgerEntry::seal(sequence, Utc::now(), &event, previous)?;

        let Writer { sink, failed_at } = &mut *writer;
        if let Some(sink) = sink {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            if let Err(source) = sink.write_all(&line).and_then(|()| sink.flush()) {
                error!(sequence, error = %source, "ledger write failed, store halted");
                *failed_at = Some(sequence);
                return Err(Error::LedgerWrite { sequence, source });
            }
        }

        self.entries.write().push(entry.clone());
        debug!(sequence, event = event.kind(), "ledger entry appended");
        Ok(entry)
    }

    /// Append a correction amending an earlier entry.
    pub fn correct(&self, supersedes: u64, reason: impl Into<String>) -> Result<LedgerEntry> {
        if supersedes >= self.len() as u64 {
            return Err(Error::Config(format!(
                "correction references entry {supersedes} beyond the ledger head"
            )));
        }
        self.append(LedgerEvent::Correction {
            supersedes,
            reason: reason.into(),
        })
    }

    pub fn verify(&self) -> ChainVerification {
        let verification = verify_entries(&self.entries.read());
        if let ChainVerification::Broken { sequence, kind } = verification {
            error!(sequence, %kind, "audit ledger chain broken");
        }
        verification
    }

    pub fn verify_chain(&self) -> bool {
        self.verify().is_intact()
    }

    /// Number of verified entries, or the first break.
    pub fn audit_chain(&self) -> Result<usize> {
        self.verify().into_result()
    }

    /// Snapshot of all entries in sequence order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().clone()
    }

    pub fn entry(&self, sequence: u64) -> Option<LedgerEntry> {
        let index = usize::try_from(sequence).ok()?;
        self.entries.read().get(index).cloned()
    }

    /// Digest the next entry will chain to.
    pub fn head_digest(&self) -> ContentDigest {
        self.entries.read().last().map_or(GENESIS, LedgerEntry::digest)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn parse_lines(path: &Path, text: &str) -> Result<Vec<LedgerEntry>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| Error::LedgerCorrupt {
                path: path.to_path_buf(),
                line: index + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::event::StreamEnd;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn closed(stream: u32) -> LedgerEvent {
        LedgerEvent::StreamClosed {
            stream,
            reason: StreamEnd::EndOfStream,
            frames: 10,
        }
    }

    #[test]
    fn test_append_links_entries() {
        let ledger = AuditLedger::in_memory();
        let first = ledger.append(closed(0)).unwrap();
        let second = ledger.append(closed(1)).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_digest, GENESIS);
        assert_eq!(second.previous_digest, first.digest());
        assert_eq!(ledger.head_digest(), second.digest());
        assert_eq!(ledger.audit_chain().unwrap(), 2);
    }

    #[test]
    fn test_failed_write_is_not_recorded() {
        let ledger = AuditLedger::with_writer(FailingWriter);
        let err = ledger.append(closed(0)).unwrap_err();
        assert!(matches!(err, Error::LedgerWrite { sequence: 0, .. }));
        assert!(ledger.is_empty());
        assert_eq!(ledger.head_digest(), GENESIS);
    }

    /// Accepts writes into a shared buffer; the first flush fails.
    struct FlakyFlush {
        written: Arc<Mutex<Vec<u8>>>,
        flushes: u32,
    }

    impl Write for FlakyFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            if self.flushes == 1 {
                Err(io::Error::other("device busy"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failed_flush_halts_the_store() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let ledger = AuditLedger::with_writer(FlakyFlush {
            written: written.clone(),
            flushes: 0,
        });
        assert!(matches!(
            ledger.append(closed(0)),
            Err(Error::LedgerWrite { sequence: 0, .. })
        ));
        assert!(matches!(
            ledger.append(closed(1)),
            Err(Error::LedgerHalted { failed_at: 0 })
        ));
        assert!(ledger.is_empty());

        // The sink never holds two entries claiming the same sequence.
        let text = String::from_utf8(written.lock().clone()).unwrap();
        let stored: Vec<LedgerEntry> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(stored.len(), 1);
        assert!(verify_entries(&stored).is_intact());
    }

    #[test]
    fn test_correction_must_reference_existing_entry() {
        let ledger = AuditLedger::in_memory();
        assert!(ledger.correct(0, "typo").is_err());
        ledger.append(closed(0)).unwrap();
        let correction = ledger.correct(0, "wrong stream").unwrap();
        assert_eq!(correction.sequence, 1);
        assert_eq!(
            ledger.entry(1).unwrap().event().unwrap(),
            LedgerEvent::Correction {
                supersedes: 0,
                reason: "wrong stream".to_string()
            }
        );
    }
}
