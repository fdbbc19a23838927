//! Time-ordered log of who appeared when, built from tracks and their
//! identity decisions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::MatchEvent;
use crate::tracker::{ObjectClass, Track, TrackId};

/// One appearance record. Entries are never mutated; a track's later
/// entries supersede its earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceEntry {
    pub track: TrackId,
    /// Position among this track's entries
    pub seq: u32,
    pub class: ObjectClass,
    pub entered_at: DateTime<Utc>,
    pub identity: MatchEvent,
    /// Frame sequences supporting the entry
    pub frames: Vec<u64>,
    /// Plates read on the track so far, vehicles only
    pub plates: Vec<String>,
}

/// An entry with the exit time of its track, if the track has been retired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Appearance<'a> {
    pub entry: &'a AppearanceEntry,
    pub exited_at: Option<DateTime<Utc>>,
}

impl Appearance<'_> {
    pub fn is_ongoing(&self) -> bool {
        self.exited_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityFilter {
    Offender(String),
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppearanceFilter {
    /// Entries overlapping `[from, to]`; ongoing entries extend forever
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub identity: Option<IdentityFilter>,
    pub track: Option<TrackId>,
    /// Tracks that showed this plate at any time
    pub plate: Option<String>,
    /// Only the authoritative (latest) entry of each track
    pub latest_only: bool,
}

impl AppearanceFilter {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn offender(mut self, offender_id: impl Into<String>) -> Self {
        self.identity = Some(IdentityFilter::Offender(offender_id.into()));
        self
    }

    pub fn unknown(mut self) -> Self {
        self.identity = Some(IdentityFilter::Unknown);
        self
    }

    pub fn track(mut self, track: TrackId) -> Self {
        self.track = Some(track);
        self
    }

    pub fn plate(mut self, plate: impl Into<String>) -> Self {
        self.plate = Some(plate.into());
        self
    }

    pub fn latest_only(mut self) -> Self {
        self.latest_only = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct AppearanceLog {
    entries: Vec<AppearanceEntry>,
    /// Index of every track's newest entry
    latest: HashMap<TrackId, usize>,
    closed: HashMap<TrackId, DateTime<Utc>>,
    /// Every plate with the tracks it was read on
    plates: BTreeMap<String, BTreeSet<TrackId>>,
}

impl AppearanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the track's current identity decision.
    pub fn record(&mut self, track: &Track, identity: &MatchEvent) -> &AppearanceEntry {
        let index = self.entries.len();
        let seq = match self.latest.insert(track.id(), index) {
            Some(previous) => self.entries[previous].seq + 1,
            None => 0,
        };
        self.entries.push(AppearanceEntry {
            track: track.id(),
            seq,
            class: track.class(),
            entered_at: track.first_seen(),
            identity: identity.clone(),
            frames: track.frame_refs().collect(),
            plates: track.plates().iter().map(|p| p.plate.clone()).collect(),
        });
        &self.entries[index]
    }

    /// Note a plate read on `track`. Returns false when it was already known
    /// for that track.
    pub fn record_plate(&mut self, track: TrackId, plate: &str) -> bool {
        self.plates.entry(plate.to_string()).or_default().insert(track)
    }

    /// Unique plates in order, each with the tracks that showed it.
    pub fn plates(&self) -> impl Iterator<Item = (&str, &BTreeSet<TrackId>)> {
        self.plates.iter().map(|(plate, tracks)| (plate.as_str(), tracks))
    }

    /// Record that `track` left the scene. The first closing time wins.
    pub fn close(&mut self, track: TrackId, at: DateTime<Utc>) {
        if self.latest.contains_key(&track) {
            self.closed.entry(track).or_insert(at);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Authoritative entry of `track`.
    pub fn latest(&self, track: TrackId) -> Option<&AppearanceEntry> {
        self.latest.get(&track).map(|&i| &self.entries[i])
    }

    pub fn exited_at(&self, track: TrackId) -> Option<DateTime<Utc>> {
        self.closed.get(&track).copied()
    }

    pub fn query(&self, filter: AppearanceFilter) -> AppearanceQuery<'_> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| {
            let e = &self.entries[i];
            (e.entered_at, e.track, e.seq)
        });
        AppearanceQuery {
            log: self,
            filter,
            order,
            cursor: 0,
        }
    }
}

/// Cursor over matching entries ordered by (entered, track, seq).
#[derive(Debug, Clone)]
pub struct AppearanceQuery<'a> {
    log: &'a AppearanceLog,
    filter: AppearanceFilter,
    order: Vec<usize>,
    cursor: usize,
}

impl AppearanceQuery<'_> {
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    fn matches(&self, index: usize) -> bool {
        let entry = &self.log.entries[index];
        let filter = &self.filter;
        if filter.track.is_some_and(|t| t != entry.track) {
            return false;
        }
        if filter.latest_only && self.log.latest.get(&entry.track) != Some(&index) {
            return false;
        }
        if let Some(plate) = &filter.plate {
            let shown = self.log.plates.get(plate).is_some_and(|tracks| tracks.contains(&entry.track));
            if !shown {
                return false;
            }
        }
        match &filter.identity {
            Some(IdentityFilter::Offender(id)) if entry.identity.offender_id() != Some(id.as_str()) => {
                return false;
            }
            Some(IdentityFilter::Unknown) if entry.identity.is_match() => return false,
            _ => {}
        }
        let exited = self.log.exited_at(entry.track);
        let starts_in_time = filter.to.is_none_or(|to| entry.entered_at <= to);
        let ends_in_time = match (filter.from, exited) {
            (Some(from), Some(exited)) => exited >= from,
            _ => true,
        };
        starts_in_time && ends_in_time
    }
}

impl<'a> Iterator for AppearanceQuery<'a> {
    type Item = Appearance<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let log = self.log;
        while let Some(&index) = self.order.get(self.cursor) {
            self.cursor += 1;
            if self.matches(index) {
                let entry = &log.entries[index];
                return Some(Appearance {
                    entry,
                    exited_at: log.exited_at(entry.track),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MatchOutcome, UnknownReason};
    use crate::tracker::{Detection, Frame, Rect, TrackManager, TrackerConfig};
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn decision(track: TrackId, offender: Option<&str>, secs: i64) -> MatchEvent {
        MatchEvent {
            track,
            outcome: match offender {
                Some(id) => MatchOutcome::Matched {
                    offender_id: id.to_string(),
                    name: id.to_uppercase(),
                },
                None => MatchOutcome::Unknown {
                    reason: UnknownReason::AboveThreshold,
                },
            },
            best_candidate: offender.map(String::from),
            distance: Some(0.1),
            similarity: Some(0.9),
            runner_up: None,
            runner_up_distance: None,
            decided_at: at(secs),
            index_generation: 1,
        }
    }

    /// Two tracks: one entering at t=0, one at t=10.
    fn tracks() -> Vec<Track> {
        let config = TrackerConfig {
            confirm_hits: 1,
            ..TrackerConfig::default()
        };
        let mut manager = TrackManager::new(0, config);
        let det = |seq, x| Detection::new(seq, Rect::new(x, 0.0, 10.0, 10.0), ObjectClass::Person, 0.9);
        manager.associate(&Frame::new(1, at(0), "f1"), &[det(1, 0.0)]).unwrap();
        manager
            .associate(&Frame::new(2, at(10), "f2"), &[det(2, 0.0), det(2, 500.0)])
            .unwrap();
        manager.active_tracks().cloned().collect()
    }

    #[test]
    fn test_latest_entry_is_authoritative() {
        let tracks = tracks();
        let mut log = AppearanceLog::new();
        log.record(&tracks[0], &decision(tracks[0].id(), None, 0));
        let second = log.record(&tracks[0], &decision(tracks[0].id(), Some("a"), 10));
        assert_eq!(second.seq, 1);
        assert_eq!(second.frames, vec![1, 2]);

        let all: Vec<_> = log.query(AppearanceFilter::default()).collect();
        assert_eq!(all.len(), 2);
        let latest: Vec<_> = log.query(AppearanceFilter::default().latest_only()).collect();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].entry.identity.offender_id(), Some("a"));
    }

    #[test]
    fn test_identity_and_time_filters() {
        let tracks = tracks();
        let mut log = AppearanceLog::new();
        log.record(&tracks[0], &decision(tracks[0].id(), Some("a"), 0));
        log.record(&tracks[1], &decision(tracks[1].id(), None, 10));
        log.close(tracks[0].id(), at(5));

        let offender: Vec<_> = log.query(AppearanceFilter::default().offender("a")).collect();
        assert_eq!(offender.len(), 1);
        assert_eq!(offender[0].exited_at, Some(at(5)));

        let unknown: Vec<_> = log.query(AppearanceFilter::default().unknown()).collect();
        assert_eq!(unknown.len(), 1);
        assert!(unknown[0].is_ongoing());

        // Track 0 left at 5 s, track 1 is still in view.
        let late: Vec<_> = log.query(AppearanceFilter::between(at(6), at(60))).collect();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].entry.track, tracks[1].id());
        assert_eq!(log.query(AppearanceFilter::between(at(-10), at(-1))).count(), 0);
    }

    #[test]
    fn test_query_is_ordered_and_restartable() {
        let tracks = tracks();
        let mut log = AppearanceLog::new();
        log.record(&tracks[1], &decision(tracks[1].id(), None, 10));
        log.record(&tracks[0], &decision(tracks[0].id(), None, 0));

        let mut query = log.query(AppearanceFilter::default());
        let fork = query.clone();
        let first: Vec<_> = query.by_ref().map(|a| a.entry.track).collect();
        assert_eq!(first, vec![tracks[0].id(), tracks[1].id()]);
        assert!(query.next().is_none());
        query.restart();
        assert_eq!(query.count(), 2);
        assert_eq!(fork.count(), 2);
        assert_eq!(tracks[1].first_seen() - tracks[0].first_seen(), Duration::seconds(10));
    }

    #[test]
    fn test_plate_register_and_filter() {
        let tracks = tracks();
        let mut log = AppearanceLog::new();
        log.record(&tracks[0], &decision(tracks[0].id(), None, 0));
        log.record(&tracks[1], &decision(tracks[1].id(), None, 10));
        assert!(log.record_plate(tracks[1].id(), "MH12AB1234"));
        assert!(!log.record_plate(tracks[1].id(), "MH12AB1234"));
        assert!(log.record_plate(tracks[0].id(), "MH12AB1234"));
        assert!(log.record_plate(tracks[1].id(), "DL3CAB123"));

        let plates: Vec<_> = log.plates().map(|(plate, tracks)| (plate, tracks.len())).collect();
        assert_eq!(plates, vec![("DL3CAB123", 1), ("MH12AB1234", 2)]);

        let seen: Vec<_> = log
            .query(AppearanceFilter::default().plate("DL3CAB123"))
            .map(|a| a.entry.track)
            .collect();
        assert_eq!(seen, vec![tracks[1].id()]);
        assert_eq!(log.query(AppearanceFilter::default().plate("UNSEEN0000")).count(), 0);
    }
}
