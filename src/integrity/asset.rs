//! Media assets submitted for verification.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::error::{Error, Result};

/// Per-frame measurements supplied by the frame source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// Digest of the decoded frame content
    pub digest: ContentDigest,
    /// Presentation timestamp
    pub timestamp_secs: f64,
    /// Variance of the Laplacian of the grey frame
    pub sharpness: f64,
    /// Mean grey level
    pub brightness: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub name: String,
    /// Camera or other origin the asset was ingested from
    pub source: Option<String>,
    pub bytes: Vec<u8>,
    /// File-system creation time. Reported alongside the verdict, never
    /// used to reach it.
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub frame_samples: Vec<FrameSample>,
}

impl MediaAsset {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: None,
            bytes,
            created_at: None,
            modified_at: None,
            frame_samples: Vec::new(),
        }
    }

    pub fn with_file_times(
        mut self,
        created_at: Option<DateTime<Utc>>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.modified_at = modified_at;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_frame_samples(mut self, samples: Vec<FrameSample>) -> Self {
        self.frame_samples = samples;
        self
    }

    /// Read an asset and its file-system times from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        match Self::read_partial(path) {
            (asset, None) => Ok(asset),
            (_, Some(err)) => Err(err),
        }
    }

    /// Read as much of `path` as possible. On failure the asset holds the
    /// bytes read before the error.
    pub fn read_partial(path: impl AsRef<Path>) -> (Self, Option<Error>) {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let mut bytes = Vec::new();
        let read = File::open(path)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .and_then(|_| fs::metadata(path));
        match read {
            Ok(stat) => {
                let asset = Self::new(name, bytes).with_file_times(
                    stat.created().ok().map(DateTime::<Utc>::from),
                    stat.modified().ok().map(DateTime::<Utc>::from),
                );
                (asset, None)
            }
            Err(source) => {
                let err = Error::IntegrityReadFailure {
                    path: path.to_path_buf(),
                    source,
                };
                (Self::new(name, bytes), Some(err))
            }
        }
    }

    pub fn digest(&self) -> ContentDigest {
        ContentDigest::of(&self.bytes)
    }
}
