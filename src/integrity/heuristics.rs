//! Named tamper heuristics. Each one looks at the extracted metadata or the
//! frame samples and either flags the asset with a rationale or stays quiet.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::integrity::asset::{FrameSample, MediaAsset};
use crate::integrity::metadata::{ExtractedMetadata, MediaFormat};

pub const READ_FAILURE: &str = "read_failure";
pub const TIMESTAMP_MISMATCH: &str = "timestamp_mismatch";
pub const MODIFICATION_BEFORE_CREATION: &str = "modification_before_creation";
pub const REENCODE_SIGNATURE: &str = "reencode_signature";
pub const EDIT_HISTORY: &str = "edit_history";
pub const MISSING_METADATA: &str = "missing_metadata";
pub const DUPLICATE_FRAMES: &str = "duplicate_frames";
pub const SPLICE_DISCONTINUITY: &str = "splice_discontinuity";
pub const CAMERA_OBSTRUCTION: &str = "camera_obstruction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub severity: Severity,
    pub rationale: String,
}

/// Output of one heuristic, flagged or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeuristicOutcome {
    pub name: &'static str,
    pub severity: Severity,
    pub flagged: Option<String>,
}

/// An interval during which the camera looked covered or blinded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstructionEvent {
    pub start_secs: f64,
    /// `None` when the obstruction lasts until the last sample
    pub end_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Allowed lag of container creation behind the embedded capture time
    pub timestamp_tolerance_secs: i64,
    /// Lower-case substrings of editing or transcoding tool signatures
    pub editing_tools: Vec<String>,
    /// Longest tolerated run of identical consecutive frames
    pub max_duplicate_run: usize,
    /// Gaps larger than this multiple of the median frame interval are splices
    pub splice_gap_factor: f64,
    pub min_sharpness: f64,
    /// Brightness ratio to the first sample below which the view is blinded
    pub brightness_drop: f64,
    pub obstruction_persistence_secs: f64,
    pub obstruction_sample_fps: f64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: 2,
            editing_tools: [
                "ffmpeg",
                "lavf",
                "lavc",
                "handbrake",
                "photoshop",
                "lightroom",
                "gimp",
                "premiere",
                "after effects",
                "final cut",
                "davinci resolve",
                "imovie",
                "vegas",
            ]
            .map(String::from)
            .to_vec(),
            max_duplicate_run: 5,
            splice_gap_factor: 3.0,
            min_sharpness: 5.0,
            brightness_drop: 0.05,
            obstruction_persistence_secs: 0.6,
            obstruction_sample_fps: 4.0,
        }
    }
}

impl IntegrityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timestamp_tolerance_secs < 0 {
            return Err(Error::Config(
                "integrity.timestamp_tolerance_secs must not be negative".to_string(),
            ));
        }
        if self.splice_gap_factor <= 1.0 || !self.splice_gap_factor.is_finite() {
            return Err(Error::Config(format!(
                "integrity.splice_gap_factor must exceed 1, got {}",
                self.splice_gap_factor
            )));
        }
        if !(self.obstruction_sample_fps > 0.0 && self.obstruction_persistence_secs >= 0.0) {
            return Err(Error::Config(
                "integrity obstruction sampling must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.brightness_drop) || self.min_sharpness < 0.0 {
            return Err(Error::Config(
                "integrity.brightness_drop must be in [0, 1] and min_sharpness non-negative"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Run every heuristic in a fixed order.
pub fn evaluate(
    asset: &MediaAsset,
    meta: &ExtractedMetadata,
    obstruction: &[ObstructionEvent],
    config: &IntegrityConfig,
) -> Vec<HeuristicOutcome> {
    vec![
        outcome(READ_FAILURE, Severity::High, meta.structure_error.clone()),
        outcome(TIMESTAMP_MISMATCH, Severity::Low, timestamp_mismatch(meta, config)),
        outcome(
            MODIFICATION_BEFORE_CREATION,
            Severity::High,
            modification_before_creation(meta),
        ),
        outcome(REENCODE_SIGNATURE, Severity::Low, reencode_signature(meta, config)),
        outcome(EDIT_HISTORY, Severity::High, edit_history(meta)),
        outcome(MISSING_METADATA, Severity::Low, missing_metadata(meta)),
        outcome(
            DUPLICATE_FRAMES,
            Severity::High,
            duplicate_frames(&asset.frame_samples, config),
        ),
        outcome(
            SPLICE_DISCONTINUITY,
            Severity::High,
            splice_discontinuity(&asset.frame_samples, config),
        ),
        outcome(CAMERA_OBSTRUCTION, Severity::High, camera_obstruction(obstruction)),
    ]
}

fn outcome(name: &'static str, severity: Severity, flagged: Option<String>) -> HeuristicOutcome {
    HeuristicOutcome {
        name,
        severity,
        flagged,
    }
}

/// Only times carried in the bytes count; file-system times change on copy.
fn timestamp_mismatch(meta: &ExtractedMetadata, config: &IntegrityConfig) -> Option<String> {
    let captured = meta.capture_time?;
    let created = meta.container_created?;
    let lag = (created - captured).num_seconds();
    (lag > config.timestamp_tolerance_secs).then(|| {
        format!(
            "embedded capture time {} precedes container creation time {} by {lag}s",
            captured.to_rfc3339(),
            created.to_rfc3339()
        )
    })
}

fn modification_before_creation(meta: &ExtractedMetadata) -> Option<String> {
    match (meta.container_created, meta.container_modified) {
        (Some(created), Some(modified)) if modified < created => Some(format!(
            "container modified at {} before its creation at {}",
            modified.to_rfc3339(),
            created.to_rfc3339()
        )),
        _ => None,
    }
}

fn reencode_signature(meta: &ExtractedMetadata, config: &IntegrityConfig) -> Option<String> {
    meta.software.iter().find_map(|software| {
        let lower = software.to_lowercase();
        config
            .editing_tools
            .iter()
            .find(|tool| lower.contains(tool.as_str()))
            .map(|tool| format!("software tag `{software}` matches editing tool `{tool}`"))
    })
}

fn edit_history(meta: &ExtractedMetadata) -> Option<String> {
    (!meta.edit_actions.is_empty())
        .then(|| format!("xmp history records edits: {}", meta.edit_actions.join(", ")))
}

fn missing_metadata(meta: &ExtractedMetadata) -> Option<String> {
    if meta.has_primary_block || meta.structure_error.is_some() {
        return None;
    }
    match meta.format {
        MediaFormat::Jpeg => Some("jpeg carries no exif block".to_string()),
        MediaFormat::IsoBmff => Some("container carries no movie header (mvhd)".to_string()),
        MediaFormat::Png | MediaFormat::Unknown => None,
    }
}

fn duplicate_frames(samples: &[FrameSample], config: &IntegrityConfig) -> Option<String> {
    let mut longest = (0, 0);
    let mut start = 0;
    for i in 1..=samples.len() {
        if i == samples.len() || samples[i].digest != samples[start].digest {
            if i - start > longest.1 {
                longest = (start, i - start);
            }
            start = i;
        }
    }
    let (start, run) = longest;
    (run > config.max_duplicate_run).then(|| {
        format!(
            "{run} identical consecutive frames starting at {:.3}s",
            samples[start].timestamp_secs
        )
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn splice_discontinuity(samples: &[FrameSample], config: &IntegrityConfig) -> Option<String> {
    if let Some(w) = samples
        .windows(2)
        .find(|w| w[1].timestamp_secs < w[0].timestamp_secs)
    {
        return Some(format!(
            "frame timestamp goes backwards from {:.3}s to {:.3}s",
            w[0].timestamp_secs, w[1].timestamp_secs
        ));
    }
    if samples.len() < 3 {
        return None;
    }
    let mut intervals: Vec<f64> = samples
        .windows(2)
        .map(|w| w[1].timestamp_secs - w[0].timestamp_secs)
        .filter(|d| *d > 0.0)
        .collect();
    let typical = median(&mut intervals)?;
    samples
        .windows(2)
        .find(|w| w[1].timestamp_secs - w[0].timestamp_secs > config.splice_gap_factor * typical)
        .map(|w| {
            format!(
                "gap of {:.3}s after {:.3}s exceeds {}x the median interval {typical:.3}s",
                w[1].timestamp_secs - w[0].timestamp_secs,
                w[0].timestamp_secs,
                config.splice_gap_factor
            )
        })
}

fn camera_obstruction(events: &[ObstructionEvent]) -> Option<String> {
    let first = events.first()?;
    Some(format!(
        "camera covered or blinded {} time(s), first at {:.2}s",
        events.len(),
        first.start_secs
    ))
}

/// Covered-camera intervals.
///
/// Frames are sampled at `obstruction_sample_fps`; a sample is covered when
/// its sharpness is below `min_sharpness` or its brightness falls below
/// `brightness_drop` times the first sample's. An event starts once enough
/// consecutive covered samples span `obstruction_persistence_secs` and ends
/// at the first clear sample.
pub fn detect_obstruction(samples: &[FrameSample], config: &IntegrityConfig) -> Vec<ObstructionEvent> {
    let persistence =
        ((config.obstruction_persistence_secs * config.obstruction_sample_fps).floor() as usize).max(1);
    let step = 1.0 / config.obstruction_sample_fps;

    let mut events = Vec::new();
    let mut baseline = None;
    let mut next_sample = f64::NEG_INFINITY;
    let mut covered = 0;
    let mut active: Option<f64> = None;

    for sample in samples {
        if sample.timestamp_secs < next_sample {
            continue;
        }
        next_sample = sample.timestamp_secs + step - 1e-9;

        let baseline = *baseline.get_or_insert(sample.brightness);
        let ratio = sample.brightness / (baseline + 1e-6);
        if sample.sharpness < config.min_sharpness || ratio < config.brightness_drop {
            covered += 1;
        } else {
            covered = 0;
        }

        match active {
            None if covered >= persistence => active = Some(sample.timestamp_secs),
            Some(start_secs) if covered == 0 => {
                events.push(ObstructionEvent {
                    start_secs,
                    end_secs: Some(sample.timestamp_secs),
                });
                active = None;
            }
            _ => {}
        }
    }
    if let Some(start_secs) = active {
        events.push(ObstructionEvent {
            start_secs,
            end_secs: None,
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::ContentDigest;

    fn sample(t: f64, content: &[u8], sharpness: f64, brightness: f64) -> FrameSample {
        FrameSample {
            digest: ContentDigest::of(content),
            timestamp_secs: t,
            sharpness,
            brightness,
        }
    }

    fn clip(n: usize, fps: f64) -> Vec<FrameSample> {
        (0..n)
            .map(|i| sample(i as f64 / fps, &i.to_be_bytes(), 50.0, 120.0))
            .collect()
    }

    #[test]
    fn test_duplicate_run_threshold() {
        let config = IntegrityConfig::default();
        let mut frames = clip(20, 25.0);
        assert!(duplicate_frames(&frames, &config).is_none());
        for f in &mut frames[4..10] {
            f.digest = ContentDigest::of(b"frozen");
        }
        let rationale = duplicate_frames(&frames, &config).unwrap();
        assert!(rationale.starts_with("6 identical"));
    }

    #[test]
    fn test_splice_gap_and_reversal() {
        let config = IntegrityConfig::default();
        let mut frames = clip(10, 25.0);
        assert!(splice_discontinuity(&frames, &config).is_none());
        for f in &mut frames[5..] {
            f.timestamp_secs += 2.0;
        }
        assert!(splice_discontinuity(&frames, &config).is_some());

        let mut frames = clip(10, 25.0);
        frames.swap(3, 4);
        assert!(splice_discontinuity(&frames, &config)
            .unwrap()
            .contains("backwards"));
    }

    #[test]
    fn test_obstruction_start_and_end() {
        let config = IntegrityConfig::default();
        // 32 fps for 5 s; the lens is covered between 2 s and 3.5 s.
        let frames: Vec<_> = (0..160usize)
            .map(|i| {
                let t = i as f64 / 32.0;
                let covered = (2.0..3.5).contains(&t);
                sample(t, &i.to_be_bytes(), if covered { 1.0 } else { 80.0 }, 120.0)
            })
            .collect();
        let events = detect_obstruction(&frames, &config);
        assert_eq!(events.len(), 1);
        // Second covered sample at 4 fps confirms the event.
        assert!((events[0].start_secs - 2.25).abs() < 1e-9, "{events:?}");
        assert!((events[0].end_secs.unwrap() - 3.5).abs() < 1e-9, "{events:?}");
    }

    #[test]
    fn test_short_flicker_is_not_obstruction() {
        let config = IntegrityConfig::default();
        let frames: Vec<_> = (0..40usize)
            .map(|i| {
                let t = i as f64 / 4.0;
                sample(t, &i.to_be_bytes(), if i == 10 { 1.0 } else { 80.0 }, 120.0)
            })
            .collect();
        assert!(detect_obstruction(&frames, &config).is_empty());
    }

    #[test]
    fn test_timestamp_mismatch_needs_container_time() {
        let config = IntegrityConfig::default();
        let at = |s| chrono::DateTime::from_timestamp(s, 0).unwrap();
        let mut meta = crate::integrity::metadata::extract(b"");
        meta.capture_time = Some(at(1_000));
        assert!(timestamp_mismatch(&meta, &config).is_none());

        meta.container_created = Some(at(1_001));
        assert!(timestamp_mismatch(&meta, &config).is_none());
        meta.container_created = Some(at(1_100));
        assert!(timestamp_mismatch(&meta, &config)
            .unwrap()
            .contains("container creation time"));
    }
}
