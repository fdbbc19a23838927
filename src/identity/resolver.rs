//! Matching track embeddings against the offender index.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::index::{IdentityRecord, IndexSnapshot, OffenderIndexHandle};
use crate::tracker::{Embedding, Track, TrackId, TrackState};

/// Acceptance and re-resolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Best cosine distance must be strictly below this to match
    pub accept_threshold: f32,
    /// Runner-up must be farther than the best by more than this
    pub min_separation: f32,
    /// Re-resolve after this many new detections on a track
    pub resolve_every: u32,
    /// Re-resolve when the representative embedding moved this far
    pub drift_threshold: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.4,
            min_separation: 0.05,
            resolve_every: 5,
            drift_threshold: 0.15,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.accept_threshold > 0.0 && self.accept_threshold <= 2.0) {
            return Err(Error::Config(format!(
                "resolver.accept_threshold must be in (0, 2], got {}",
                self.accept_threshold
            )));
        }
        if !(0.0..2.0).contains(&self.min_separation) || !(0.0..=2.0).contains(&self.drift_threshold) {
            return Err(Error::Config(
                "resolver.min_separation and resolver.drift_threshold must be within [0, 2)"
                    .to_string(),
            ));
        }
        if self.resolve_every == 0 {
            return Err(Error::Config("resolver.resolve_every must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Why a resolution did not produce a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NoEmbedding,
    NoCandidates,
    AboveThreshold,
    Ambiguous,
    DimensionMismatch,
    IndexUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { offender_id: String, name: String },
    Unknown { reason: UnknownReason },
}

/// Result of one resolution. Later events for a track supersede earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub track: TrackId,
    pub outcome: MatchOutcome,
    /// Closest candidate, whether or not it was accepted
    pub best_candidate: Option<String>,
    pub distance: Option<f32>,
    /// `1 - distance`
    pub similarity: Option<f32>,
    pub runner_up: Option<String>,
    pub runner_up_distance: Option<f32>,
    pub decided_at: DateTime<Utc>,
    pub index_generation: u64,
}

impl MatchEvent {
    pub fn offender_id(&self) -> Option<&str> {
        match &self.outcome {
            MatchOutcome::Matched { offender_id, .. } => Some(offender_id),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.offender_id().is_some()
    }

    /// The reportable error for an ambiguous resolution.
    pub fn ambiguity(&self) -> Option<Error> {
        match (&self.outcome, &self.best_candidate, &self.runner_up) {
            (
                MatchOutcome::Unknown {
                    reason: UnknownReason::Ambiguous,
                },
                Some(best),
                Some(runner_up),
            ) => Some(Error::ResolutionAmbiguous {
                track: self.track,
                best: best.clone(),
                best_distance: self.distance.unwrap_or(f32::NAN),
                runner_up: runner_up.clone(),
                runner_up_distance: self.runner_up_distance.unwrap_or(f32::NAN),
            }),
            _ => None,
        }
    }
}

struct Ranking<'a> {
    best: Option<(&'a IdentityRecord, f32)>,
    runner_up: Option<(&'a IdentityRecord, f32)>,
}

/// Resolves tracks against a shared offender index.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    config: ResolverConfig,
    index: Arc<OffenderIndexHandle>,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig, index: Arc<OffenderIndexHandle>) -> Self {
        Self { config, index }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<OffenderIndexHandle> {
        &self.index
    }

    pub fn resolve(&self, track: &Track) -> MatchEvent {
        let snapshot = self.index.snapshot();
        match self.decide(track, &snapshot, Deadline::none()) {
            Some(event) => event,
            None => unknown(track, &snapshot, UnknownReason::NoCandidates),
        }
    }

    pub fn resolve_within(&self, track: &Track, deadline: Deadline) -> Result<MatchEvent> {
        let snapshot = self.index.snapshot();
        self.decide(track, &snapshot, deadline)
            .ok_or(Error::ResolutionTimeout { track: track.id() })
    }

    /// `None` only when `deadline` expires mid-scan.
    fn decide(&self, track: &Track, snapshot: &IndexSnapshot, deadline: Deadline) -> Option<MatchEvent> {
        let index = match snapshot {
            IndexSnapshot::Ready { index, .. } => index,
            IndexSnapshot::Unavailable { .. } => {
                return Some(unknown(track, snapshot, UnknownReason::IndexUnavailable));
            }
        };
        let Some(query) = track.representative_embedding() else {
            return Some(unknown(track, snapshot, UnknownReason::NoEmbedding));
        };
        if index.is_empty() {
            return Some(unknown(track, snapshot, UnknownReason::NoCandidates));
        }
        if query.dim() != index.dim() {
            warn!(
                track = %track.id(),
                query = query.dim(),
                index = index.dim(),
                "embedding dimension does not match offender index"
            );
            return Some(unknown(track, snapshot, UnknownReason::DimensionMismatch));
        }

        let ranking = rank(&query, index.records(), deadline)?;
        let Some((best, best_distance)) = ranking.best else {
            return Some(unknown(track, snapshot, UnknownReason::NoCandidates));
        };

        let separated = ranking
            .runner_up
            .is_none_or(|(_, d)| d - best_distance > self.config.min_separation);
        let outcome = if best_distance >= self.config.accept_threshold {
            MatchOutcome::Unknown {
                reason: UnknownReason::AboveThreshold,
            }
        } else if !separated {
            MatchOutcome::Unknown {
                reason: UnknownReason::Ambiguous,
            }
        } else {
            MatchOutcome::Matched {
                offender_id: best.offender_id.clone(),
                name: best.name.clone(),
            }
        };

        let event = MatchEvent {
            track: track.id(),
            outcome,
            best_candidate: Some(best.offender_id.clone()),
            distance: Some(best_distance),
            similarity: Some(1.0 - best_distance),
            runner_up: ranking.runner_up.map(|(r, _)| r.offender_id.clone()),
            runner_up_distance: ranking.runner_up.map(|(_, d)| d),
            decided_at: track.last_seen(),
            index_generation: snapshot.generation(),
        };
        if let Some(ambiguity) = event.ambiguity() {
            warn!(error = %ambiguity, "identity resolution ambiguous");
        }
        debug!(track = %track.id(), outcome = ?event.outcome, distance = best_distance, "track resolved");
        Some(event)
    }
}

fn unknown(track: &Track, snapshot: &IndexSnapshot, reason: UnknownReason) -> MatchEvent {
    MatchEvent {
        track: track.id(),
        outcome: MatchOutcome::Unknown { reason },
        best_candidate: None,
        distance: None,
        similarity: None,
        runner_up: None,
        runner_up_distance: None,
        decided_at: track.last_seen(),
        index_generation: snapshot.generation(),
    }
}

const DEADLINE_STRIDE: usize = 256;

/// Two closest records; a record's distance is the minimum over its references.
fn rank<'a>(query: &Embedding, records: &'a [IdentityRecord], deadline: Deadline) -> Option<Ranking<'a>> {
    let mut ranking = Ranking {
        best: None,
        runner_up: None,
    };
    for (i, record) in records.iter().enumerate() {
        if i % DEADLINE_STRIDE == 0 && deadline.expired() {
            return None;
        }
        let Some(distance) = record
            .embeddings
            .iter()
            .filter_map(|reference| query.cosine_distance(reference))
            .min_by(f32::total_cmp)
        else {
            continue;
        };
        match ranking.best {
            Some((_, best)) if distance >= best => {
                if ranking.runner_up.is_none_or(|(_, second)| distance < second) {
                    ranking.runner_up = Some((record, distance));
                }
            }
            _ => {
                ranking.runner_up = ranking.best;
                ranking.best = Some((record, distance));
            }
        }
    }
    Some(ranking)
}

/// Decides when a track's identity should be (re-)resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPolicy {
    config: ResolverConfig,
    resolved: HashMap<TrackId, (usize, Option<Embedding>)>,
}

impl ResolutionPolicy {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            resolved: HashMap::new(),
        }
    }

    /// Confirmed tracks are resolved once, then again after `resolve_every`
    /// new detections or when their representative embedding drifts.
    pub fn should_resolve(&self, track: &Track) -> bool {
        if track.state() != TrackState::Confirmed {
            return false;
        }
        let Some((observations, embedding)) = self.resolved.get(&track.id()) else {
            return true;
        };
        if track.observations().len() >= observations + self.config.resolve_every as usize {
            return true;
        }
        match (embedding, track.representative_embedding()) {
            (Some(then), Some(now)) => then
                .cosine_distance(&now)
                .is_some_and(|drift| drift > self.config.drift_threshold),
            (None, Some(_)) => true,
            _ => false,
        }
    }

    pub fn mark_resolved(&mut self, track: &Track) {
        self.resolved.insert(
            track.id(),
            (track.observations().len(), track.representative_embedding()),
        );
    }

    pub fn forget(&mut self, track: TrackId) {
        self.resolved.remove(&track);
    }
}
