use chrono::DateTime;
use corinthian::integrity::{
    EDIT_HISTORY, FrameSample, MISSING_METADATA, MODIFICATION_BEFORE_CREATION, READ_FAILURE,
    REENCODE_SIGNATURE, TIMESTAMP_MISMATCH,
};
use corinthian::{
    AuditLedger, ContentDigest, Error, IntegrityVerifier, LedgerEvent, MediaAsset, Verdict,
    is_recorded,
};

const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

fn bmff_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn mvhd(created: &str, modified: &str) -> Vec<u8> {
    let mac = |s: &str| {
        let unix = DateTime::parse_from_rfc3339(s).unwrap().timestamp();
        ((unix + MAC_EPOCH_OFFSET) as u32).to_be_bytes()
    };
    let mut payload = vec![0, 0, 0, 0];
    payload.extend_from_slice(&mac(created));
    payload.extend_from_slice(&mac(modified));
    payload.extend_from_slice(&1000u32.to_be_bytes());
    payload.extend_from_slice(&60_000u32.to_be_bytes());
    payload.extend_from_slice(&[0; 80]);
    bmff_box(b"mvhd", &payload)
}

fn udta_text(kind: &[u8; 4], value: &str) -> Vec<u8> {
    let mut payload = (value.len() as u16).to_be_bytes().to_vec();
    payload.extend_from_slice(&0x55c4u16.to_be_bytes());
    payload.extend_from_slice(value.as_bytes());
    bmff_box(kind, &payload)
}

/// A minimal MP4: ftyp, moov (mvhd + udta) and mdat.
fn mp4(created: &str, modified: &str, udta: &[Vec<u8>]) -> Vec<u8> {
    let mut moov = mvhd(created, modified);
    moov.extend(bmff_box(b"udta", &udta.concat()));
    let mut out = bmff_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
    out.extend(bmff_box(b"moov", &moov));
    out.extend(bmff_box(b"mdat", &[0x42; 64]));
    out
}

#[test]
fn test_capture_before_container_creation_is_suspect() {
    let bytes = mp4(
        "2024-01-02T10:00:00Z",
        "2024-01-02T10:05:00Z",
        &[udta_text(b"\xA9day", "2024-01-01T09:00:00Z")],
    );
    let verdict = IntegrityVerifier::default().verify(&MediaAsset::new("cam3.mp4", bytes));
    assert!(verdict.is_flagged(TIMESTAMP_MISMATCH), "{verdict:?}");
    assert!(verdict.verdict >= Verdict::Suspect);
    assert_eq!(
        verdict.metadata.get("container.created").map(String::as_str),
        Some("2024-01-02T10:00:00+00:00")
    );
    assert_eq!(verdict.metadata.get("duration_secs").map(String::as_str), Some("60.000"));
}

#[test]
fn test_consistent_recording_is_clean() {
    let bytes = mp4(
        "2024-01-02T10:00:00Z",
        "2024-01-02T10:05:00Z",
        &[udta_text(b"\xA9day", "2024-01-02T10:00:00Z")],
    );
    let verdict = IntegrityVerifier::default().verify(&MediaAsset::new("cam3.mp4", bytes));
    assert_eq!(verdict.verdict, Verdict::Clean, "{verdict:?}");
    assert!(verdict.anomalies.is_empty());
}

#[test]
fn test_container_anomalies() {
    let bytes = mp4(
        "2024-01-02T10:00:00Z",
        "2024-01-01T10:00:00Z",
        &[udta_text(b"\xA9too", "Lavf58.76.100")],
    );
    let verdict = IntegrityVerifier::default().verify(&MediaAsset::new("cam3.mp4", bytes));
    assert!(verdict.is_flagged(MODIFICATION_BEFORE_CREATION));
    assert!(verdict.is_flagged(REENCODE_SIGNATURE));
    assert!(!verdict.is_flagged(EDIT_HISTORY));
    assert_eq!(verdict.verdict, Verdict::Tampered);
}

#[test]
fn test_container_without_movie_header() {
    let mut bytes = bmff_box(b"ftyp", b"isom\0\0\x02\0");
    bytes.extend(bmff_box(b"mdat", &[0; 16]));
    let verdict = IntegrityVerifier::default().verify(&MediaAsset::new("raw.mp4", bytes));
    assert!(verdict.is_flagged(MISSING_METADATA));
    assert_eq!(verdict.verdict, Verdict::Suspect);
}

#[test]
fn test_verification_is_idempotent() {
    let bytes = mp4(
        "2024-01-02T10:00:00Z",
        "2024-01-01T10:00:00Z",
        &[udta_text(b"\xA9day", "2023-12-31T00:00:00Z")],
    );
    let samples: Vec<FrameSample> = (0..40)
        .map(|i| FrameSample {
            digest: ContentDigest::of(&[(i / 10) as u8]),
            timestamp_secs: i as f64 / 25.0,
            sharpness: 40.0,
            brightness: 100.0,
        })
        .collect();
    let asset = MediaAsset::new("cam3.mp4", bytes).with_frame_samples(samples);
    let verifier = IntegrityVerifier::default();
    let first = verifier.verify(&asset);
    let second = verifier.verify(&asset);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    let back: corinthian::IntegrityVerdict =
        serde_json::from_str(&serde_json::to_string(&first).unwrap()).unwrap();
    assert_eq!(back, first);
}

#[test]
fn test_corrupt_box_forces_tampered() {
    let mut bytes = mp4("2024-01-02T10:00:00Z", "2024-01-02T10:00:00Z", &[]);
    let len = bytes.len();
    bytes.truncate(len - 10);
    let verdict = IntegrityVerifier::default().verify(&MediaAsset::new("cut.mp4", bytes));
    assert!(verdict.is_flagged(READ_FAILURE));
    assert_eq!(verdict.verdict, Verdict::Tampered);
}

#[test]
fn test_paths_and_ledger_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    let bytes = mp4("2024-01-02T10:00:00Z", "2024-01-02T10:00:00Z", &[]);
    std::fs::write(&path, &bytes).unwrap();

    let verifier = IntegrityVerifier::default();
    let verdict = verifier.verify_path(&path);
    assert_eq!(verdict.digest, ContentDigest::of(&bytes));
    assert_eq!(verdict.verdict, Verdict::Clean);

    // A directory opens but cannot be read as a file.
    let unreadable = verifier.verify_path(dir.path());
    assert!(unreadable.is_flagged(READ_FAILURE));
    assert_eq!(unreadable.verdict, Verdict::Tampered);
    let missing = verifier.verify_path(dir.path().join("gone.mp4"));
    assert!(missing.is_flagged(READ_FAILURE));
    assert_eq!(missing.digest, ContentDigest::of(b""));
    assert!(matches!(
        MediaAsset::from_path(dir.path().join("gone.mp4")),
        Err(Error::IntegrityReadFailure { .. })
    ));

    let ledger = AuditLedger::in_memory();
    let asset = MediaAsset::from_path(&path).unwrap().with_source("CCTV-1");
    assert!(!is_recorded(&ledger, &verdict.digest));
    let (_, entry) = verifier.verify_and_record(&asset, &ledger).unwrap();
    assert!(is_recorded(&ledger, &verdict.digest));
    match entry.event().unwrap() {
        LedgerEvent::IntegrityVerified { asset, source, .. } => {
            assert_eq!(asset, "clip.mp4");
            assert_eq!(source.as_deref(), Some("CCTV-1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_oversized_box_is_tampered_not_a_crash() {
    let mut bytes = bmff_box(b"ftyp", b"isom\0\0\x02\0");
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(b"mdat");
    bytes.extend_from_slice(&u64::MAX.to_be_bytes());
    bytes.extend_from_slice(&[0; 32]);
    let assets = vec![MediaAsset::new("huge.mp4", bytes); 4];
    for verdict in IntegrityVerifier::default().verify_batch(&assets) {
        assert!(verdict.is_flagged(READ_FAILURE));
        assert_eq!(verdict.verdict, Verdict::Tampered);
    }
}

#[test]
fn test_verdict_ignores_file_times() {
    let bytes = mp4("2024-01-02T10:00:00Z", "2024-01-02T10:05:00Z", &[]);
    let at = |s: &str| Some(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&chrono::Utc));
    let copied_early = MediaAsset::new("cam3.mp4", bytes.clone())
        .with_file_times(at("2024-01-02T10:00:00Z"), at("2024-01-02T10:05:00Z"));
    let copied_late = MediaAsset::new("cam3.mp4", bytes)
        .with_file_times(at("2025-06-01T00:00:00Z"), at("2025-06-01T00:00:00Z"));
    let verifier = IntegrityVerifier::default();
    assert_eq!(verifier.verify(&copied_early), verifier.verify(&copied_late));
}

#[test]
fn test_batch_preserves_order() {
    let assets: Vec<MediaAsset> = (0..16)
        .map(|i| MediaAsset::new(format!("a{i}.bin"), vec![i as u8; 32]))
        .collect();
    let verifier = IntegrityVerifier::default();
    let verdicts = verifier.verify_batch(&assets);
    assert_eq!(verdicts.len(), 16);
    for (asset, verdict) in assets.iter().zip(&verdicts) {
        assert_eq!(verdict.digest, asset.digest());
    }
    let timed = verifier.verify_batch_within(&assets, std::time::Duration::from_secs(60));
    assert!(timed.iter().all(|r| r.is_ok()));
}
