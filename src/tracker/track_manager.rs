//! Per-stream track registry and frame-over-frame association.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::tracker::frame::{Detection, Frame, ObjectClass};
use crate::tracker::kalman_filter::{KalmanFilter, MotionState};
use crate::tracker::matching::{self, AssignmentResult, Candidate, ClassWeights};
use crate::tracker::track::{Track, TrackId, TrackIdAllocator};
use crate::tracker::track_state::TrackState;

/// Configuration for the TrackManager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Pairs costing more than this are never associated
    pub match_threshold: f32,
    /// Consecutive hits (spawn included) before a track is Confirmed
    pub confirm_hits: u32,
    /// Missed frames after which a Confirmed track becomes Lost
    pub lost_after: u32,
    /// Missed frames after which a Lost track is Retired
    pub retire_after: u32,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    pub person_weights: ClassWeights,
    pub vehicle_weights: ClassWeights,
    pub other_weights: ClassWeights,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            confirm_hits: 3,
            lost_after: 1,
            retire_after: 30,
            min_confidence: 0.1,
            person_weights: ClassWeights::new(0.5, 0.5),
            vehicle_weights: ClassWeights::new(0.7, 0.3),
            other_weights: ClassWeights::new(0.8, 0.2),
        }
    }
}

impl TrackerConfig {
    pub fn weights(&self, class: ObjectClass) -> ClassWeights {
        match class {
            ObjectClass::Person => self.person_weights,
            ObjectClass::Vehicle => self.vehicle_weights,
            ObjectClass::Other => self.other_weights,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "tracker.match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.confirm_hits == 0 || self.lost_after == 0 {
            return Err(Error::Config(
                "tracker.confirm_hits and tracker.lost_after must be at least 1".to_string(),
            ));
        }
        if self.retire_after <= self.lost_after {
            return Err(Error::Config(format!(
                "tracker.retire_after ({}) must exceed tracker.lost_after ({})",
                self.retire_after, self.lost_after
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(format!(
                "tracker.min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        for w in [self.person_weights, self.vehicle_weights, self.other_weights] {
            if w.spatial < 0.0 || w.appearance < 0.0 || w.spatial + w.appearance <= 0.0 {
                return Err(Error::Config(format!("invalid class weights {w:?}")));
            }
        }
        Ok(())
    }
}

/// Why a track shows up in a frame's update list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// New track from an unmatched detection
    Spawned,
    /// A detection was committed to the track
    Associated,
    /// The track changed state without a detection
    Missed,
    /// Retired at end of stream or cancellation
    Flushed,
}

/// One change to one track, produced by association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub track: TrackId,
    pub class: ObjectClass,
    pub kind: UpdateKind,
    /// `None` for freshly spawned tracks
    pub from: Option<TrackState>,
    pub to: TrackState,
    pub frame_sequence: u64,
    pub at: DateTime<Utc>,
    /// Index of the committed detection in the caller's list
    pub detection: Option<usize>,
    /// Licence plate this track showed for the first time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

impl TrackUpdate {
    pub fn is_transition(&self) -> bool {
        self.from != Some(self.to)
    }
}

/// Owns the tracks of one stream.
pub struct TrackManager {
    stream: u32,
    config: TrackerConfig,
    ids: TrackIdAllocator,
    active: BTreeMap<TrackId, Track>,
    retired: Vec<Track>,
    last_frame: Option<(u64, DateTime<Utc>)>,
    kalman_filter: KalmanFilter,
}

impl TrackManager {
    pub fn new(stream: u32, config: TrackerConfig) -> Self {
        Self {
            stream,
            config,
            ids: TrackIdAllocator::new(stream),
            active: BTreeMap::new(),
            retired: Vec::new(),
            last_frame: None,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn stream(&self) -> u32 {
        self.stream
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Sequence and timestamp of the last committed frame.
    pub fn last_frame(&self) -> Option<(u64, DateTime<Utc>)> {
        self.last_frame
    }

    /// Non-retired tracks in ascending ID order.
    pub fn active_tracks(&self) -> impl Iterator<Item = &Track> {
        self.active.values()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.active.get(&id)
    }

    /// Hand over tracks retired since the last call.
    pub fn drain_retired(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.retired)
    }

    pub fn associate(&mut self, frame: &Frame, detections: &[Detection]) -> Result<Vec<TrackUpdate>> {
        self.associate_within(frame, detections, Deadline::none())
    }

    /// Commit a frame whose detections could not be obtained. Absence counters
    /// still tick so occlusion handling stays consistent.
    pub fn skip_frame(&mut self, frame: &Frame) -> Result<Vec<TrackUpdate>> {
        self.associate_within(frame, &[], Deadline::none())
    }

    /// Associate one frame's detections with the active tracks.
    ///
    /// Nothing is mutated until the frame has passed ordering checks, the cost
    /// matrix has been built and the assignment solved within `deadline`.
    pub fn associate_within(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        deadline: Deadline,
    ) -> Result<Vec<TrackUpdate>> {
        self.check_order(frame)?;

        // Step 1: Screen and canonicalise detections
        let accepted: Vec<usize> = detections
            .iter()
            .enumerate()
            .filter(|(index, det)| match det.validate(frame) {
                Err(reason) => {
                    warn!(stream = self.stream, frame = frame.sequence, index, %reason, "detection rejected");
                    false
                }
                Ok(()) => det.confidence >= self.config.min_confidence,
            })
            .map(|(index, _)| index)
            .collect();
        let order = matching::canonical_order(detections, &accepted);

        // Step 2: Predict motion and build the cost matrix
        let track_ids: Vec<TrackId> = self.active.keys().copied().collect();
        let predictions: Vec<Option<MotionState>> = self
            .active
            .values()
            .map(|t| t.predict(&self.kalman_filter))
            .collect();
        let embeddings: Vec<_> = self
            .active
            .values()
            .map(|t| t.representative_embedding())
            .collect();
        let track_candidates: Vec<Candidate<'_>> = self
            .active
            .values()
            .zip(&predictions)
            .zip(&embeddings)
            .map(|((track, prediction), embedding)| Candidate {
                class: track.class(),
                bbox: prediction.as_ref().map_or_else(|| track.rect(), |p| p.rect()),
                embedding: embedding.as_ref(),
            })
            .collect();
        let det_candidates: Vec<Candidate<'_>> =
            order.iter().map(|&i| Candidate::from(&detections[i])).collect();

        let config = &self.config;
        let dists = matching::cost_matrix(&track_candidates, &det_candidates, |class| {
            config.weights(class)
        });
        if deadline.expired() {
            return Err(Error::AssociationTimeout {
                sequence: frame.sequence,
                stage: "cost matrix",
            });
        }

        // Step 3: Global assignment
        let AssignmentResult {
            matches,
            unmatched_tracks,
            mut unmatched_detections,
        } = matching::linear_assignment(&dists, self.config.match_threshold);
        if deadline.expired() {
            return Err(Error::AssociationTimeout {
                sequence: frame.sequence,
                stage: "assignment",
            });
        }
        if self.ids.remaining() < unmatched_detections.len() as u64 {
            return Err(Error::TrackIdsExhausted {
                stream: self.stream,
            });
        }

        // Step 4: Commit
        self.last_frame = Some((frame.sequence, frame.captured_at));
        for (id, prediction) in track_ids.iter().zip(predictions) {
            if let (Some(track), Some(motion)) = (self.active.get_mut(id), prediction) {
                track.apply_prediction(motion);
            }
        }

        let mut updates = Vec::with_capacity(track_ids.len() + unmatched_detections.len());

        for (row, col) in matches {
            let det_index = order[col];
            let Some(track) = self.active.get_mut(&track_ids[row]) else {
                continue;
            };
            let from = track.state();
            let plate = track.observe(&detections[det_index], frame, &self.kalman_filter);
            let to = state_after_hit(from, track.hits(), &self.config);
            track.set_state(to);
            let mut associated = update(track, UpdateKind::Associated, Some(from), frame, Some(det_index));
            associated.plate = plate;
            updates.push(associated);
        }

        for row in unmatched_tracks {
            let id = track_ids[row];
            let Some(track) = self.active.get_mut(&id) else {
                continue;
            };
            let from = track.state();
            track.miss();
            let to = state_after_miss(from, track.absence(), &self.config);
            if to == from {
                continue;
            }
            track.set_state(to);
            updates.push(update(track, UpdateKind::Missed, Some(from), frame, None));
            if to == TrackState::Retired {
                if let Some(track) = self.active.remove(&id) {
                    self.retired.push(track);
                }
            }
        }

        // Step 5: Spawn new tracks in canonical detection order
        unmatched_detections.sort_unstable();
        for col in unmatched_detections {
            let det_index = order[col];
            let id = self.ids.allocate()?;
            let (mut track, plate) = Track::spawn(id, &detections[det_index], frame, &self.kalman_filter);
            if track.hits() >= self.config.confirm_hits {
                track.set_state(TrackState::Confirmed);
            }
            let mut spawned = update(&track, UpdateKind::Spawned, None, frame, Some(det_index));
            spawned.plate = plate;
            updates.push(spawned);
            self.active.insert(id, track);
        }

        updates.sort_by_key(|u| u.track);
        debug!(
            stream = self.stream,
            frame = frame.sequence,
            detections = accepted.len(),
            active = self.active.len(),
            updates = updates.len(),
            "frame associated"
        );
        Ok(updates)
    }

    /// Retire every active track, e.g. at end of stream or on cancellation.
    pub fn finish(&mut self, at: DateTime<Utc>) -> Vec<TrackUpdate> {
        let frame_sequence = self.last_frame.map_or(0, |(sequence, _)| sequence);
        let mut updates = Vec::with_capacity(self.active.len());
        for (_, mut track) in std::mem::take(&mut self.active) {
            let from = track.state();
            track.set_state(TrackState::Retired);
            updates.push(TrackUpdate {
                track: track.id(),
                class: track.class(),
                kind: UpdateKind::Flushed,
                from: Some(from),
                to: TrackState::Retired,
                frame_sequence,
                at,
                detection: None,
                plate: None,
            });
            self.retired.push(track);
        }
        updates
    }

    /// Whether `frame` may follow the last committed frame.
    pub fn check_order(&self, frame: &Frame) -> Result<()> {
        match self.last_frame {
            Some((last_sequence, last_captured_at))
                if frame.sequence <= last_sequence || frame.captured_at <= last_captured_at =>
            {
                Err(Error::OutOfOrderFrame {
                    sequence: frame.sequence,
                    captured_at: frame.captured_at,
                    last_sequence,
                    last_captured_at,
                })
            }
            _ => Ok(()),
        }
    }
}

fn state_after_hit(from: TrackState, hits: u32, config: &TrackerConfig) -> TrackState {
    match from {
        TrackState::Tentative if hits < config.confirm_hits => TrackState::Tentative,
        _ => TrackState::Confirmed,
    }
}

fn state_after_miss(from: TrackState, absence: u32, config: &TrackerConfig) -> TrackState {
    match from {
        TrackState::Tentative => TrackState::Retired,
        TrackState::Confirmed if absence >= config.lost_after => TrackState::Lost,
        TrackState::Lost if absence >= config.retire_after => TrackState::Retired,
        state => state,
    }
}

fn update(
    track: &Track,
    kind: UpdateKind,
    from: Option<TrackState>,
    frame: &Frame,
    detection: Option<usize>,
) -> TrackUpdate {
    TrackUpdate {
        track: track.id(),
        class: track.class(),
        kind,
        from,
        to: track.state(),
        frame_sequence: frame.sequence,
        at: frame.captured_at,
        detection,
        plate: None,
    }
}
