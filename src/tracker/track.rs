//! Single object track and the per-stream track ID allocator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tracker::embedding::{Centroid, Embedding};
use crate::tracker::frame::{Detection, Frame, ObjectClass};
use crate::tracker::kalman_filter::{KalmanFilter, MotionState};
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Persistent track identifier.
///
/// The high 32 bits carry the stream index, the low 32 bits a per-stream
/// counter starting at 1, so streams never collide and IDs grow monotonically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl TrackId {
    pub fn stream(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn local(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream(), self.local())
    }
}

/// Hands out the IDs of one stream's namespace slice. IDs are never recycled.
#[derive(Debug, Clone)]
pub struct TrackIdAllocator {
    stream: u32,
    next_local: u64,
}

impl TrackIdAllocator {
    pub fn new(stream: u32) -> Self {
        Self {
            stream,
            next_local: 1,
        }
    }

    pub fn remaining(&self) -> u64 {
        (u32::MAX as u64 + 1).saturating_sub(self.next_local)
    }

    pub fn allocate(&mut self) -> Result<TrackId> {
        if self.remaining() == 0 {
            return Err(Error::TrackIdsExhausted {
                stream: self.stream,
            });
        }
        let id = TrackId(((self.stream as u64) << 32) | self.next_local);
        self.next_local += 1;
        Ok(id)
    }
}

/// One committed detection, kept as the track's frame reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub frame_sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub bbox: Rect,
    pub confidence: f32,
}

/// First reading of one licence plate on a vehicle track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateSighting {
    pub plate: String,
    pub frame_sequence: u64,
    pub captured_at: DateTime<Utc>,
}

/// Single object track. Only the track manager mutates it.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    class: ObjectClass,
    state: TrackState,
    observations: Vec<Observation>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    appearance: Centroid,
    /// Consecutive successful associations
    hits: u32,
    /// Consecutive frames without an association
    absence: u32,
    motion: MotionState,
    /// Distinct plates in order of first sighting
    plates: Vec<PlateSighting>,
}

impl Track {
    pub(crate) fn spawn(
        id: TrackId,
        detection: &Detection,
        frame: &Frame,
        kalman_filter: &KalmanFilter,
    ) -> (Self, Option<String>) {
        let mut appearance = Centroid::default();
        if let Some(embedding) = &detection.embedding {
            appearance.push(embedding);
        }
        let mut track = Self {
            id,
            class: detection.class,
            state: TrackState::Tentative,
            observations: vec![observation(detection, frame)],
            first_seen: frame.captured_at,
            last_seen: frame.captured_at,
            appearance,
            hits: 1,
            absence: 0,
            motion: kalman_filter.initiate(detection.bbox.to_xyah_f64()),
            plates: Vec::new(),
        };
        let plate = track.sight_plate(detection, frame);
        (track, plate)
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Frame sequence numbers of every committed detection, in order.
    pub fn frame_refs(&self) -> impl Iterator<Item = u64> + '_ {
        self.observations.iter().map(|o| o.frame_sequence)
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Running centroid of the detection embeddings.
    pub fn representative_embedding(&self) -> Option<Embedding> {
        self.appearance.embedding()
    }

    /// Number of embeddings folded into the representative embedding.
    pub fn embedding_samples(&self) -> u32 {
        self.appearance.count()
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn absence(&self) -> u32 {
        self.absence
    }

    pub fn plates(&self) -> &[PlateSighting] {
        &self.plates
    }

    /// Current motion estimate of the box.
    pub fn rect(&self) -> Rect {
        self.motion.rect()
    }

    /// Box of the last committed detection.
    pub fn last_box(&self) -> Rect {
        self.observations
            .last()
            .map(|o| o.bbox)
            .unwrap_or_else(|| self.rect())
    }

    /// One-frame motion prediction. Lost tracks coast and are not predicted.
    pub(crate) fn predict(&self, kalman_filter: &KalmanFilter) -> Option<MotionState> {
        match self.state {
            TrackState::Tentative | TrackState::Confirmed => {
                Some(kalman_filter.predict(&self.motion, self.absence > 0))
            }
            TrackState::Lost | TrackState::Retired => None,
        }
    }

    pub(crate) fn apply_prediction(&mut self, motion: MotionState) {
        self.motion = motion;
    }

    pub(crate) fn observe(
        &mut self,
        detection: &Detection,
        frame: &Frame,
        kalman_filter: &KalmanFilter,
    ) -> Option<String> {
        let measurement = detection.bbox.to_xyah_f64();
        self.motion = kalman_filter
            .update(&self.motion, measurement)
            .unwrap_or_else(|| kalman_filter.initiate(measurement));
        if let Some(embedding) = &detection.embedding {
            self.appearance.push(embedding);
        }
        self.observations.push(observation(detection, frame));
        self.last_seen = frame.captured_at;
        self.hits += 1;
        self.absence = 0;
        self.sight_plate(detection, frame)
    }

    /// Keep the detection's plate if this vehicle has not shown it before.
    /// Returns the plate when it is new.
    fn sight_plate(&mut self, detection: &Detection, frame: &Frame) -> Option<String> {
        let plate = detection.plate.as_ref()?;
        if self.class != ObjectClass::Vehicle || self.plates.iter().any(|p| &p.plate == plate) {
            return None;
        }
        self.plates.push(PlateSighting {
            plate: plate.clone(),
            frame_sequence: frame.sequence,
            captured_at: frame.captured_at,
        });
        Some(plate.clone())
    }

    pub(crate) fn miss(&mut self) {
        self.hits = 0;
        self.absence += 1;
    }

    pub(crate) fn set_state(&mut self, state: TrackState) {
        debug_assert!(self.state.can_become(state), "{} -> {}", self.state, state);
        self.state = state;
    }
}

fn observation(detection: &Detection, frame: &Frame) -> Observation {
    Observation {
        frame_sequence: frame.sequence,
        captured_at: frame.captured_at,
        bbox: detection.bbox,
        confidence: detection.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_namespaced_and_monotonic() {
        let mut a = TrackIdAllocator::new(0);
        let mut b = TrackIdAllocator::new(7);
        let a1 = a.allocate().unwrap();
        let a2 = a.allocate().unwrap();
        let b1 = b.allocate().unwrap();
        assert!(a2 > a1);
        assert_eq!(a1.local(), 1);
        assert_eq!(b1.stream(), 7);
        assert_eq!(b1.local(), 1);
        assert_ne!(a1, b1);
        assert_eq!(b1.to_string(), "7:1");
    }

    #[test]
    fn test_allocator_exhaustion_is_an_error() {
        let mut ids = TrackIdAllocator::new(u32::MAX);
        ids.next_local = u32::MAX as u64;
        let last = ids.allocate().unwrap();
        assert_eq!(last.0, u64::MAX);
        assert_eq!(ids.remaining(), 0);
        assert!(matches!(
            ids.allocate(),
            Err(Error::TrackIdsExhausted { stream: u32::MAX })
        ));
    }

    #[test]
    fn test_observe_resets_absence() {
        let kf = KalmanFilter::new();
        let t0 = DateTime::from_timestamp(100, 0).unwrap();
        let frame = Frame::new(1, t0, "cam#1");
        let det = Detection::new(1, Rect::new(0.0, 0.0, 10.0, 20.0), ObjectClass::Person, 0.9)
            .with_embedding(vec![1.0, 0.0]);
        let (mut track, _) = Track::spawn(TrackId(1), &det, &frame, &kf);
        track.miss();
        assert_eq!((track.hits(), track.absence()), (0, 1));

        let frame2 = Frame::new(2, t0 + chrono::Duration::seconds(1), "cam#2");
        let mut det2 = det.clone();
        det2.frame_sequence = 2;
        track.observe(&det2, &frame2, &kf);
        assert_eq!((track.hits(), track.absence()), (1, 0));
        assert_eq!(track.frame_refs().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(track.embedding_samples(), 2);
        assert_eq!(track.last_seen(), frame2.captured_at);
    }

    #[test]
    fn test_vehicle_plates_are_kept_once() {
        let kf = KalmanFilter::new();
        let t0 = DateTime::from_timestamp(100, 0).unwrap();
        let frames: Vec<_> = (1..=3)
            .map(|seq| Frame::new(seq, t0 + chrono::Duration::seconds(seq as i64), format!("cam#{seq}")))
            .collect();
        let car = |seq: u64, plate: &str| {
            Detection::new(seq, Rect::new(0.0, 0.0, 40.0, 20.0), ObjectClass::Vehicle, 0.9).with_plate(plate)
        };

        let (mut track, first) = Track::spawn(TrackId(1), &car(1, "MH12AB1234"), &frames[0], &kf);
        assert_eq!(first.as_deref(), Some("MH12AB1234"));
        assert_eq!(track.observe(&car(2, "mh12 ab 1234"), &frames[1], &kf), None);
        assert_eq!(
            track.observe(&car(3, "MH12AB9999"), &frames[2], &kf).as_deref(),
            Some("MH12AB9999")
        );
        let plates: Vec<_> = track.plates().iter().map(|p| (p.plate.as_str(), p.frame_sequence)).collect();
        assert_eq!(plates, vec![("MH12AB1234", 1), ("MH12AB9999", 3)]);

        // Only vehicles carry plates.
        let mut person = car(1, "MH12AB1234");
        person.class = ObjectClass::Person;
        let (track, plate) = Track::spawn(TrackId(2), &person, &frames[0], &kf);
        assert_eq!(plate, None);
        assert!(track.plates().is_empty());
    }
}
