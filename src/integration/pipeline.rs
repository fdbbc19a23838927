//! StreamPipeline for combining detection, tracking, identity resolution
//! and custody logging of one camera stream.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::appearance::AppearanceLog;
use crate::config::{Config, PipelineConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::identity::{IdentityResolver, MatchEvent, OffenderIndexHandle, ResolutionPolicy};
use crate::ledger::{AuditLedger, LedgerEvent, StreamEnd};
use crate::tracker::{Frame, TrackManager, TrackState, TrackUpdate, UpdateKind};

use super::DetectorAdapter;

/// Cooperative cancellation shared between a controller and its streams.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened while processing one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub sequence: u64,
    pub updates: Vec<TrackUpdate>,
    pub matches: Vec<MatchEvent>,
    /// Non-fatal problems: rejected detections, timeouts, ambiguity
    pub warnings: Vec<Error>,
    /// The frame was committed without detections, or rejected outright
    pub skipped: bool,
}

#[derive(Debug)]
pub struct StreamSummary {
    pub stream: u32,
    /// Frames committed to the tracker
    pub frames: u64,
    pub end: StreamEnd,
    pub reports: Vec<FrameReport>,
    /// Tracks retired by the shutdown
    pub flushed: Vec<TrackUpdate>,
}

/// One stream's detector, tracker, resolver and appearance log, logging
/// every material operation into a shared ledger.
pub struct StreamPipeline<D: DetectorAdapter> {
    detector: D,
    tracker: TrackManager,
    resolver: IdentityResolver,
    policy: ResolutionPolicy,
    appearances: AppearanceLog,
    ledger: Arc<AuditLedger>,
    config: PipelineConfig,
    frames: u64,
    closed: bool,
}

impl<D: DetectorAdapter> StreamPipeline<D> {
    pub fn new(
        stream: u32,
        detector: D,
        config: &Config,
        index: Arc<OffenderIndexHandle>,
        ledger: Arc<AuditLedger>,
    ) -> Self {
        Self {
            detector,
            tracker: TrackManager::new(stream, config.tracker.clone()),
            resolver: IdentityResolver::new(config.resolver.clone(), index),
            policy: ResolutionPolicy::new(config.resolver.clone()),
            appearances: AppearanceLog::new(),
            ledger,
            config: config.pipeline.clone(),
            frames: 0,
            closed: false,
        }
    }

    pub fn stream(&self) -> u32 {
        self.tracker.stream()
    }

    /// Process one frame.
    ///
    /// Detector failures, association timeouts and out-of-order frames are
    /// reported in the frame report; only ledger and ID allocation failures
    /// are returned as errors.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let stream = self.stream();
        let mut report = FrameReport {
            sequence: frame.sequence,
            ..FrameReport::default()
        };

        if let Err(err) = self.tracker.check_order(frame) {
            warn!(stream, frame = frame.sequence, error = %err, "frame rejected");
            self.ledger.append(LedgerEvent::FrameRejected {
                stream,
                sequence: frame.sequence,
                reason: err.to_string(),
            })?;
            report.warnings.push(err);
            report.skipped = true;
            return Ok(report);
        }

        let detections = match self.detector.detect(frame) {
            Ok(detections) => Some(detections),
            Err(source) => {
                let err = Error::Detector {
                    sequence: frame.sequence,
                    source: Box::new(source),
                };
                warn!(stream, frame = frame.sequence, error = %err, "frame skipped");
                report.warnings.push(err);
                None
            }
        };

        report.updates = match detections {
            Some(detections) => {
                for (index, det) in detections.iter().enumerate() {
                    if let Err(reason) = det.validate(frame) {
                        report.warnings.push(Error::InvalidDetection {
                            sequence: frame.sequence,
                            index,
                            reason,
                        });
                    }
                }
                let deadline = Deadline::from_timeout(self.config.association_timeout());
                match self.tracker.associate_within(frame, &detections, deadline) {
                    Ok(updates) => updates,
                    Err(err @ Error::AssociationTimeout { .. }) => {
                        warn!(stream, frame = frame.sequence, error = %err, "frame skipped");
                        report.warnings.push(err);
                        report.skipped = true;
                        self.tracker.skip_frame(frame)?
                    }
                    Err(err) => return Err(err),
                }
            }
            None => {
                report.skipped = true;
                self.tracker.skip_frame(frame)?
            }
        };
        self.frames += 1;

        self.log_updates(&report.updates)?;
        self.tracker.drain_retired();
        self.resolve(&mut report)?;

        debug!(
            stream,
            frame = frame.sequence,
            updates = report.updates.len(),
            matches = report.matches.len(),
            warnings = report.warnings.len(),
            "frame processed"
        );
        Ok(report)
    }

    /// Process frames until exhausted or cancelled, then shut the stream down.
    ///
    /// A frame failing with an error still shuts the stream down, as
    /// `StreamEnd::Failed`, before the error is returned.
    pub fn run(
        &mut self,
        frames: impl IntoIterator<Item = Frame>,
        cancel: &CancelFlag,
    ) -> Result<StreamSummary> {
        let stream = self.stream();
        info!(stream, "stream started");
        let mut reports = Vec::new();
        let mut end = StreamEnd::EndOfStream;
        for frame in frames {
            if cancel.is_cancelled() {
                end = StreamEnd::Cancelled;
                break;
            }
            match self.process_frame(&frame) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(stream, frame = frame.sequence, error = %err, "stream failed");
                    if let Err(close) = self.shutdown(StreamEnd::Failed) {
                        warn!(stream, error = %close, "failed stream not closed in the ledger");
                    }
                    return Err(err);
                }
            }
        }
        let flushed = self.shutdown(end)?;
        Ok(StreamSummary {
            stream: self.stream(),
            frames: self.frames,
            end,
            reports,
            flushed,
        })
    }

    /// Retire every active track and close the stream in the ledger.
    /// Later calls do nothing. Tracks are retired even when logging fails.
    pub fn shutdown(&mut self, end: StreamEnd) -> Result<Vec<TrackUpdate>> {
        if self.closed {
            return Ok(Vec::new());
        }
        let at = self
            .tracker
            .last_frame()
            .map_or_else(DateTime::<Utc>::default, |(_, at)| at);
        let flushed = self.tracker.finish(at);
        let logged = self.log_updates(&flushed);
        self.tracker.drain_retired();
        logged?;
        self.ledger.append(LedgerEvent::StreamClosed {
            stream: self.stream(),
            reason: end,
            frames: self.frames,
        })?;
        self.closed = true;
        info!(stream = self.stream(), ?end, frames = self.frames, retired = flushed.len(), "stream closed");
        Ok(flushed)
    }

    /// Book every update into the appearance log, then seal each onto the
    /// ledger. Bookkeeping is complete even if an append fails.
    fn log_updates(&mut self, updates: &[TrackUpdate]) -> Result<()> {
        let stream = self.stream();
        for update in updates {
            if update.is_transition() {
                debug!(stream, track = %update.track, from = ?update.from, to = ?update.to, "track state changed");
            }
            if let Some(plate) = &update.plate {
                if self.appearances.record_plate(update.track, plate) {
                    info!(stream, track = %update.track, %plate, "licence plate sighted");
                }
            }
            if update.to == TrackState::Retired {
                self.appearances.close(update.track, update.at);
                self.policy.forget(update.track);
            }
        }
        for update in updates {
            let event = match update.kind {
                UpdateKind::Spawned | UpdateKind::Associated => LedgerEvent::DetectionCommitted {
                    stream,
                    update: update.clone(),
                },
                UpdateKind::Missed | UpdateKind::Flushed => LedgerEvent::TrackTransition {
                    stream,
                    update: update.clone(),
                },
            };
            self.ledger.append(event)?;
        }
        Ok(())
    }

    fn resolve(&mut self, report: &mut FrameReport) -> Result<()> {
        let stream = self.tracker.stream();
        let deadline = || Deadline::from_timeout(self.config.resolution_timeout());
        for track in self.tracker.active_tracks() {
            if !self.policy.should_resolve(track) {
                continue;
            }
            match self.resolver.resolve_within(track, deadline()) {
                Ok(event) => {
                    self.policy.mark_resolved(track);
                    self.appearances.record(track, &event);
                    self.ledger.append(LedgerEvent::MatchDecided {
                        stream,
                        decision: event.clone(),
                    })?;
                    if let Some(ambiguity) = event.ambiguity() {
                        report.warnings.push(ambiguity);
                    }
                    report.matches.push(event);
                }
                Err(err) => {
                    warn!(stream, track = %track.id(), error = %err, "identity resolution deferred");
                    report.warnings.push(err);
                }
            }
        }
        Ok(())
    }

    pub fn tracker(&self) -> &TrackManager {
        &self.tracker
    }

    pub fn appearances(&self) -> &AppearanceLog {
        &self.appearances
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Get a reference to the underlying detector.
    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Get a mutable reference to the underlying detector.
    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Run each pipeline over its frame source on its own thread.
///
/// Pipelines and sources are paired by position. Results come back in
/// pipeline order; a panicking stream propagates its panic. Nothing runs
/// unless every pipeline has a source and a stream ID of its own.
pub fn run_streams<D, I>(
    pipelines: &mut [StreamPipeline<D>],
    sources: Vec<I>,
    cancel: &CancelFlag,
) -> Result<Vec<Result<StreamSummary>>>
where
    D: DetectorAdapter + Send,
    I: IntoIterator<Item = Frame> + Send,
{
    if pipelines.len() != sources.len() {
        return Err(Error::Config(format!(
            "{} pipelines but {} frame sources",
            pipelines.len(),
            sources.len()
        )));
    }
    let mut streams = BTreeSet::new();
    for pipeline in pipelines.iter() {
        if !streams.insert(pipeline.stream()) {
            return Err(Error::DuplicateStream {
                stream: pipeline.stream(),
            });
        }
    }

    Ok(thread::scope(|scope| {
        let handles: Vec<_> = pipelines
            .iter_mut()
            .zip(sources)
            .map(|(pipeline, frames)| scope.spawn(move || pipeline.run(frames, cancel)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    }))
}
