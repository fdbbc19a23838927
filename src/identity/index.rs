//! Offender reference data and the atomically swappable index handle.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::tracker::Embedding;

/// One known offender with their reference embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Stable external identifier (the record file's stem when loaded from disk)
    pub offender_id: String,
    pub name: String,
    pub age: Option<u32>,
    pub embeddings: Vec<Embedding>,
}

/// On-disk layout of one offender file; the ID comes from the file name.
#[derive(Debug, Deserialize)]
struct OffenderFile {
    name: String,
    #[serde(default)]
    age: Option<u32>,
    embeddings: Vec<Vec<f32>>,
}

/// Validated, read-only set of identity records sorted by offender ID.
#[derive(Debug, Clone)]
pub struct OffenderIndex {
    records: Vec<IdentityRecord>,
    dim: usize,
}

impl OffenderIndex {
    pub fn from_records(mut records: Vec<IdentityRecord>) -> Result<Self> {
        records.sort_by(|a, b| a.offender_id.cmp(&b.offender_id));

        let mut seen = BTreeSet::new();
        let mut dim = None;
        for record in &records {
            let fail = |reason: String| Error::IndexLoadFailure {
                reason: format!("record `{}`: {reason}", record.offender_id),
            };
            if record.offender_id.trim().is_empty() {
                return Err(Error::IndexLoadFailure {
                    reason: "record with empty offender id".to_string(),
                });
            }
            if !seen.insert(record.offender_id.as_str()) {
                return Err(fail("duplicate offender id".to_string()));
            }
            if record.embeddings.is_empty() {
                return Err(fail("no reference embeddings".to_string()));
            }
            for embedding in &record.embeddings {
                let expected = *dim.get_or_insert(embedding.dim());
                if embedding.dim() != expected || expected == 0 {
                    return Err(fail(format!(
                        "embedding dimension {} does not match {expected}",
                        embedding.dim()
                    )));
                }
                if !embedding.is_finite() || embedding.normalized().is_none() {
                    return Err(fail("embedding is not finite or has zero length".to_string()));
                }
            }
        }

        Ok(Self {
            records,
            dim: dim.unwrap_or(0),
        })
    }

    /// Load every `*.json` file of `dir` as one record keyed by its file stem.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let io_fail = |e: std::io::Error| Error::IndexLoadFailure {
            reason: format!("{}: {e}", dir.display()),
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_fail)? {
            let path = entry.map_err(io_fail)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let offender_id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| Error::IndexLoadFailure {
                    reason: format!("{}: file name is not valid UTF-8", path.display()),
                })?
                .to_string();
            let text = fs::read_to_string(&path).map_err(io_fail)?;
            let file: OffenderFile =
                serde_json::from_str(&text).map_err(|e| Error::IndexLoadFailure {
                    reason: format!("{}: {e}", path.display()),
                })?;
            records.push(IdentityRecord {
                offender_id,
                name: file.name,
                age: file.age,
                embeddings: file.embeddings.into_iter().map(Embedding::new).collect(),
            });
        }

        Self::from_records(records)
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn get(&self, offender_id: &str) -> Option<&IdentityRecord> {
        self.records
            .binary_search_by(|r| r.offender_id.as_str().cmp(offender_id))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding dimension shared by every record (0 for an empty index).
    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// What resolvers see when they take a snapshot of the handle.
#[derive(Debug, Clone)]
pub enum IndexSnapshot {
    Ready {
        index: Arc<OffenderIndex>,
        generation: u64,
    },
    /// The database could not be loaded; no match is possible.
    Unavailable { reason: Arc<str>, generation: u64 },
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Ready { generation, .. } | Self::Unavailable { generation, .. } => *generation,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Shared, reloadable offender index.
///
/// Readers clone an `Arc` under a short read lock, so a resolution in flight
/// keeps the index it started with while a reload swaps in a new one.
#[derive(Debug)]
pub struct OffenderIndexHandle {
    current: RwLock<IndexSnapshot>,
}

impl OffenderIndexHandle {
    pub fn new(index: OffenderIndex) -> Self {
        Self {
            current: RwLock::new(IndexSnapshot::Ready {
                index: Arc::new(index),
                generation: 1,
            }),
        }
    }

    /// Handle over a database that failed to load.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            current: RwLock::new(IndexSnapshot::Unavailable {
                reason: Arc::from(reason),
                generation: 0,
            }),
        }
    }

    /// Load from a directory; a failed load yields a flagged, unavailable handle.
    pub fn load_dir(dir: impl AsRef<Path>) -> (Self, Result<()>) {
        let handle = Self::unavailable("not loaded");
        let result = handle.reload_dir(dir);
        (handle, result)
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation()
    }

    /// Atomically replace the index.
    pub fn install(&self, index: OffenderIndex) -> u64 {
        let records = index.len();
        let mut current = self.current.write();
        let generation = current.generation() + 1;
        *current = IndexSnapshot::Ready {
            index: Arc::new(index),
            generation,
        };
        info!(generation, records, "offender index installed");
        generation
    }

    /// Reload from a directory. On failure the handle switches to the
    /// unavailable state rather than keep matching against stale data.
    pub fn reload_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        match OffenderIndex::load_dir(dir) {
            Ok(index) => {
                self.install(index);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "offender index unavailable, identity matching disabled");
                let mut current = self.current.write();
                let generation = current.generation() + 1;
                *current = IndexSnapshot::Unavailable {
                    reason: Arc::from(err.to_string()),
                    generation,
                };
                Err(err)
            }
        }
    }
}
