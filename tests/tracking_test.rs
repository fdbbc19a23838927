use chrono::{DateTime, Duration, Utc};
use corinthian::{Detection, Frame, ObjectClass, Rect, TrackId, TrackManager, TrackState, TrackerConfig};
use proptest::prelude::*;

fn frame(sequence: u64) -> Frame {
    let t0: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    Frame::new(sequence, t0 + Duration::milliseconds(40 * sequence as i64), format!("cam0.mp4#{sequence}"))
}

fn person(sequence: u64, x: f32, y: f32) -> Detection {
    Detection::new(sequence, Rect::new(x, y, 50.0, 120.0), ObjectClass::Person, 0.9)
}

#[test]
fn test_basic_tracking() {
    let mut tracker = TrackManager::new(0, TrackerConfig::default());

    // Frame 1: One detection spawns a tentative track
    let updates = tracker.associate(&frame(1), &[person(1, 100.0, 100.0)]).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].to, TrackState::Tentative);
    let id = updates[0].track;

    // Frames 2 and 3: Same object moved slightly
    tracker.associate(&frame(2), &[person(2, 103.0, 101.0)]).unwrap();
    let updates = tracker.associate(&frame(3), &[person(3, 106.0, 102.0)]).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].track, id);
    assert_eq!(updates[0].from, Some(TrackState::Tentative));
    assert_eq!(updates[0].to, TrackState::Confirmed);

    let tracks: Vec<_> = tracker.active_tracks().collect();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].frame_refs().collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_reacquired_after_occlusion_keeps_id() {
    let mut tracker = TrackManager::new(0, TrackerConfig::default());
    for seq in 1..=9 {
        tracker
            .associate(&frame(seq), &[person(seq, 100.0 + seq as f32, 100.0)])
            .unwrap();
    }
    let id = tracker.active_tracks().next().unwrap().id();

    // Object occluded for frames 10 to 15
    for seq in 10..=15 {
        tracker.associate(&frame(seq), &[]).unwrap();
    }
    assert_eq!(tracker.track(id).map(|t| t.state()), Some(TrackState::Lost));

    // Frame 16: Object reappears near where it disappeared
    let updates = tracker.associate(&frame(16), &[person(16, 110.0, 100.0)]).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].track, id);
    assert_eq!(updates[0].from, Some(TrackState::Lost));
    assert_eq!(updates[0].to, TrackState::Confirmed);
}

#[test]
fn test_ids_never_reused_after_retirement() {
    let config = TrackerConfig {
        retire_after: 2,
        ..TrackerConfig::default()
    };
    let mut tracker = TrackManager::new(0, config);
    let mut seen: Vec<TrackId> = Vec::new();
    let mut seq = 0;
    for round in 0..4 {
        let x = 1000.0 * round as f32;
        for _ in 0..3 {
            seq += 1;
            for update in tracker.associate(&frame(seq), &[person(seq, x, 0.0)]).unwrap() {
                if !seen.contains(&update.track) {
                    seen.push(update.track);
                }
            }
        }
        // Disappear until retired
        for _ in 0..3 {
            seq += 1;
            tracker.associate(&frame(seq), &[]).unwrap();
        }
        assert_eq!(tracker.active_tracks().count(), 0);
    }
    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(tracker.drain_retired().len(), 4);
}

#[test]
fn test_streams_have_disjoint_ids() {
    let mut a = TrackManager::new(0, TrackerConfig::default());
    let mut b = TrackManager::new(1, TrackerConfig::default());
    let ua = a.associate(&frame(1), &[person(1, 0.0, 0.0)]).unwrap();
    let ub = b.associate(&frame(1), &[person(1, 0.0, 0.0)]).unwrap();
    assert_ne!(ua[0].track, ub[0].track);
    assert_eq!(ub[0].track.stream(), 1);
}

/// Three well-separated people walking right, with distinct embeddings.
fn crowd(sequence: u64) -> Vec<Detection> {
    (0..3)
        .map(|i| {
            let mut embedding = vec![0.0; 3];
            embedding[i] = 1.0;
            person(sequence, 200.0 * i as f32 + 2.0 * sequence as f32, 50.0).with_embedding(embedding)
        })
        .collect()
}

fn run(order: &[usize]) -> Vec<Vec<(TrackId, usize)>> {
    let mut tracker = TrackManager::new(0, TrackerConfig::default());
    (1..=4)
        .map(|seq| {
            let dets = crowd(seq);
            let permuted: Vec<Detection> = order.iter().map(|&i| dets[i].clone()).collect();
            tracker
                .associate(&frame(seq), &permuted)
                .unwrap()
                .into_iter()
                // Map back to the unpermuted detection index
                .map(|u| (u.track, order[u.detection.unwrap()]))
                .collect()
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_association_ignores_detection_order(order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
        prop_assert_eq!(run(&order), run(&[0, 1, 2]));
    }

    #[test]
    fn prop_ids_strictly_increase(spawns in prop::collection::vec(1usize..4, 1..8)) {
        let mut tracker = TrackManager::new(2, TrackerConfig::default());
        let mut last: Option<TrackId> = None;
        for (seq, count) in spawns.into_iter().enumerate() {
            let seq = seq as u64 + 1;
            // Far apart from every earlier box so each detection spawns a track
            let dets: Vec<_> = (0..count)
                .map(|i| person(seq, 10_000.0 * seq as f32 + 300.0 * i as f32, 0.0))
                .collect();
            for update in tracker.associate(&frame(seq), &dets).unwrap() {
                if update.from.is_none() {
                    prop_assert!(last.is_none_or(|l| update.track > l));
                    last = Some(update.track);
                }
            }
        }
    }
}
