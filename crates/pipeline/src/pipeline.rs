//! Invocation orchestrator.
//!
//! One call to [`TransferPipeline::invoke`] handles one lot of fragments for
//! one session: open or resume the session, stream the lot to both targets,
//! then either checkpoint and return, or finalize and wait for processing.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use meetrec_protocol::{
    InvocationRequest, InvocationResult, RemoteFile, ResumptionDescriptor, SessionPhase,
    TransferStats, UploadSession,
};
use meetrec_remote::{FileStatusSource, PrimaryTarget, SecondaryTarget};
use meetrec_transfer::{
    BufferAccumulator, Packet, TargetKind, decode_fragment, unpadded_decoded_len,
    validate_session_id,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::save_session;
use crate::continuation::{Clock, ContinuationController, SystemClock, descriptor};
use crate::error::PipelineError;
use crate::logbook::InvocationLog;
use crate::session::{SessionInitiator, SessionRequest, check_lot};
use crate::store::{CheckpointStore, FragmentStore, Lease};
use crate::types::{PipelineConfig, TransferEvent};
use crate::uploader::{Delivery, PacketUploader};
use crate::waiter::ProcessingWaiter;

/// Remote collaborators.
#[derive(Clone)]
pub struct Targets {
    pub primary: Arc<dyn PrimaryTarget>,
    pub status: Arc<dyn FileStatusSource>,
    pub secondary: Option<Arc<dyn SecondaryTarget>>,
}

/// Storage collaborators.
#[derive(Clone)]
pub struct Stores {
    pub fragments: Arc<dyn FragmentStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// How an invocation that did not fail ended.
enum Outcome {
    Suspended(ResumptionDescriptor),
    Completed {
        resumption: ResumptionDescriptor,
        file: RemoteFile,
    },
}

/// Bookkeeping carried through one invocation, reported even on failure.
struct RunState {
    log: InvocationLog,
    stats: TransferStats,
    phase: Option<SessionPhase>,
}

impl RunState {
    fn observe(&mut self, session: &UploadSession) {
        self.phase = Some(session.phase);
        self.stats.primary_bytes_sent = session.primary.bytes_sent;
        self.stats.secondary_bytes_sent = session.secondary.bytes_sent;
        self.stats.secondary_enabled = session.secondary.enabled;
    }
}

/// Runs invocations against a fixed set of targets and stores.
pub struct TransferPipeline {
    config: PipelineConfig,
    targets: Targets,
    stores: Stores,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
}

impl TransferPipeline {
    pub fn new(config: PipelineConfig, targets: Targets, stores: Stores) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            targets,
            stores,
            clock: Arc::new(SystemClock),
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the wall clock, e.g. with a simulated one.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped when nobody drains the channel.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Token that stops the current lot at the next fragment boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one invocation. Never fails: errors are reported in the result.
    pub async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        let started = self.clock.now();
        let mut state = RunState {
            log: InvocationLog::new(request.session_id.as_str()),
            stats: TransferStats::default(),
            phase: None,
        };

        let outcome = match self.acquire(&request.session_id, started).await {
            Ok(lease) => {
                let outcome = self.run(request, started, &mut state).await;
                if let Err(e) = self.stores.checkpoints.release_lease(&lease).await {
                    state.log.warn(format!("failed to release lease: {e}"));
                }
                outcome
            }
            Err(e) => Err(e),
        };

        state.stats.elapsed_ms = (self.clock.now() - started)
            .to_std()
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.finish(request, outcome, state)
    }

    async fn acquire(&self, session_id: &str, now: DateTime<Utc>) -> Result<Lease, PipelineError> {
        validate_session_id(session_id)?;
        let expires_at = TimeDelta::from_std(self.config.lease_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let lease = self
            .stores
            .checkpoints
            .acquire_lease(session_id, &self.config.worker_id, now, expires_at)
            .await?;
        Ok(lease)
    }

    fn finish(
        &self,
        request: &InvocationRequest,
        outcome: Result<Outcome, PipelineError>,
        mut state: RunState,
    ) -> InvocationResult {
        let mut result = InvocationResult {
            success: false,
            session_id: request.session_id.clone(),
            phase: None,
            resumption: None,
            file: None,
            error: None,
            error_kind: None,
            stats: TransferStats::default(),
            logs: Vec::new(),
        };

        match outcome {
            Ok(Outcome::Suspended(resumption)) => {
                result.success = true;
                result.resumption = Some(resumption);
            }
            Ok(Outcome::Completed { resumption, file }) => {
                result.success = true;
                result.resumption = Some(resumption);
                result.file = Some(file);
            }
            Err(e) => {
                state.log.error(e.to_string());
                result.error_kind = Some(e.kind());
                result.error = Some(e.to_string());
            }
        }

        result.phase = state.phase;
        result.stats = state.stats;
        result.logs = state.log.into_entries();
        result
    }

    async fn run(
        &self,
        request: &InvocationRequest,
        started: DateTime<Utc>,
        state: &mut RunState,
    ) -> Result<Outcome, PipelineError> {
        let session_id = request.session_id.as_str();
        let checkpoints = self.stores.checkpoints.as_ref();

        let (mut session, mut buffer) =
            match ContinuationController::resume(checkpoints, session_id).await? {
                Some((session, buffer)) => {
                    state.log.info(format!(
                        "resuming {:?} session at fragment {} ({} left) with {} buffered bytes",
                        session.phase,
                        session.fragment_cursor,
                        session.fragments_remaining(),
                        buffer.len()
                    ));
                    (session, buffer)
                }
                None => (self.open(request, started, state).await?, BufferAccumulator::new()),
            };
        state.observe(&session);

        match session.phase {
            SessionPhase::Processing => return self.await_processing(&mut session, state).await,
            phase if phase.is_terminal() => {
                let name = session
                    .remote_file
                    .as_ref()
                    .map_or(session.id.as_str(), |f| f.name.as_str())
                    .to_string();
                return Err(match phase {
                    SessionPhase::Failed => PipelineError::ProcessingFailed(name),
                    _ => PipelineError::InvalidRequest(format!("{name} already completed")),
                });
            }
            phase if phase.is_resumable() => {}
            phase => {
                return Err(PipelineError::InvalidRequest(format!(
                    "saved session is in phase {phase:?}"
                )));
            }
        }
        check_lot(
            request.range,
            request.is_final_lot,
            session.fragment_cursor,
            session.fragment_count,
        )?;

        let controller = ContinuationController::new(
            self.clock.as_ref(),
            started,
            self.config.time_budget,
            self.cancel.clone(),
        );
        let uploader = PacketUploader::new(
            self.targets.primary.as_ref(),
            self.targets.secondary.as_deref(),
            self.config.granularity,
        );

        session.advance(SessionPhase::Transferring)?;
        state.observe(&session);

        let mut consumed = Vec::with_capacity(request.range.len() as usize);
        let mut stopped = None;
        for index in request.range.indices() {
            // At least one fragment per invocation, so every lot makes progress.
            if index > request.range.start {
                if let Some(reason) = controller.should_stop(request.is_final_lot) {
                    stopped = Some(reason);
                    break;
                }
            }

            let encoded = self
                .stores
                .fragments
                .get(session_id, index)
                .await?
                .ok_or_else(|| PipelineError::MissingFragment {
                    session: session_id.to_string(),
                    index,
                })?;
            let decoded = decode_fragment(index, &encoded)?;
            // The declared size assumed every non-last fragment is unpadded.
            if index + 1 < session.fragment_count {
                let expected = unpadded_decoded_len(encoded.len() as u64);
                if decoded.len() as u64 != expected {
                    return Err(PipelineError::FragmentLength {
                        index,
                        expected,
                        actual: decoded.len() as u64,
                    });
                }
            }
            buffer.push(decoded);
            session.fragment_cursor = index + 1;
            consumed.push(index);
            state.stats.fragments_consumed += 1;

            while buffer.len() > self.config.granularity {
                let data = buffer.take_exact(self.config.granularity)?;
                let packet = Packet::new(session.primary.bytes_sent, data, false);
                self.deliver(&uploader, &mut session, &packet, state).await?;
            }
            state.stats.buffered_bytes = buffer.len() as u64;
        }

        if let Some(reason) = stopped {
            state.stats.interrupted = true;
            state.log.warn(format!(
                "{reason} after {:.1}s, stopping before fragment {}",
                controller.elapsed().as_secs_f64(),
                session.fragment_cursor
            ));
        }

        let finishing =
            request.is_final_lot && stopped.is_none() && session.all_fragments_consumed();
        if !finishing {
            state.stats.buffered_bytes = buffer.len() as u64;
            let resumption = controller.checkpoint(checkpoints, &mut session, &buffer).await?;
            state.observe(&session);
            state.log.info(format!(
                "checkpointed at fragment {} ({} bytes sent, {} buffered)",
                resumption.next_fragment_index,
                resumption.bytes_sent.primary,
                buffer.len()
            ));
            self.emit(TransferEvent::Checkpointed {
                session_id: session.id.clone(),
                next_fragment_index: resumption.next_fragment_index,
            });
            self.delete_fragments(session_id, &consumed, state).await;
            return Ok(Outcome::Suspended(resumption));
        }

        session.advance(SessionPhase::Finalizing)?;
        state.observe(&session);
        let actual = session.primary.bytes_sent + buffer.len() as u64;
        if actual != session.total_bytes {
            return Err(PipelineError::SizeMismatch {
                declared: session.total_bytes,
                actual,
            });
        }

        let packet = Packet::new(session.primary.bytes_sent, buffer.take_all(), true);
        state.stats.buffered_bytes = 0;
        let file = self
            .deliver(&uploader, &mut session, &packet, state)
            .await?
            .ok_or_else(|| {
                PipelineError::InvalidRequest("final packet produced no remote file".into())
            })?;
        state.log.success(format!(
            "upload finalized: {} bytes as {}",
            session.primary.bytes_sent, file.name
        ));
        self.emit(TransferEvent::Finalized {
            session_id: session.id.clone(),
            file: file.clone(),
        });

        session.remote_file = Some(file);
        session.advance(SessionPhase::Processing)?;
        save_session(checkpoints, &mut session).await?;
        state.observe(&session);
        self.delete_fragments(session_id, &consumed, state).await;

        self.await_processing(&mut session, state).await
    }

    /// Sizes the recording and opens both targets for a new session.
    async fn open(
        &self,
        request: &InvocationRequest,
        started: DateTime<Utc>,
        state: &mut RunState,
    ) -> Result<UploadSession, PipelineError> {
        if request.range.start != 0 {
            return Err(PipelineError::InvalidRequest(format!(
                "no saved session; the first lot must start at fragment 0, not {}",
                request.range.start
            )));
        }

        let initiator = SessionInitiator::new(
            self.targets.primary.as_ref(),
            self.targets.secondary.as_deref(),
            self.config.secondary_parent_id.as_deref(),
        );
        let open = SessionRequest {
            session_id: &request.session_id,
            mime_type: request
                .mime_type
                .as_deref()
                .unwrap_or(&self.config.default_mime_type),
            title: request.title.as_deref(),
            now: started,
            range: request.range,
            is_final_lot: request.is_final_lot,
        };
        let mut session = initiator
            .open(self.stores.fragments.as_ref(), &open, &mut state.log)
            .await?;

        save_session(self.stores.checkpoints.as_ref(), &mut session).await?;
        info!(
            session = %session.id,
            total_bytes = session.total_bytes,
            fragments = session.fragment_count,
            secondary = session.secondary.enabled,
            "session opened"
        );
        self.emit(TransferEvent::SessionOpened {
            session_id: session.id.clone(),
            total_bytes: session.total_bytes,
            secondary_enabled: session.secondary.enabled,
        });
        Ok(session)
    }

    /// Sends one packet to the primary target, then to the secondary.
    ///
    /// Returns the remote file when the packet finalized the upload.
    async fn deliver(
        &self,
        uploader: &PacketUploader<'_>,
        session: &mut UploadSession,
        packet: &Packet,
        state: &mut RunState,
    ) -> Result<Option<RemoteFile>, PipelineError> {
        let primary = uploader
            .send_packet(TargetKind::Primary, session, packet)
            .await?;
        state.stats.primary_packets += 1;
        self.emit_accepted(&session.id, TargetKind::Primary, packet);

        match uploader
            .send_packet(TargetKind::Secondary, session, packet)
            .await?
        {
            Delivery::Accepted => {
                state.stats.secondary_packets += 1;
                self.emit_accepted(&session.id, TargetKind::Secondary, packet);
            }
            Delivery::SecondaryDisabled(reason) => {
                state
                    .log
                    .warn(format!("secondary disabled at offset {}: {reason}", packet.offset));
                self.emit(TransferEvent::SecondaryDisabled {
                    session_id: session.id.clone(),
                    reason,
                });
            }
            Delivery::Skipped | Delivery::Finalized(_) => {}
        }
        state.observe(session);

        Ok(match primary {
            Delivery::Finalized(file) => Some(file),
            _ => None,
        })
    }

    /// Polls until the finalized file is active, then destroys the session.
    async fn await_processing(
        &self,
        session: &mut UploadSession,
        state: &mut RunState,
    ) -> Result<Outcome, PipelineError> {
        let file = session.remote_file.clone().ok_or_else(|| {
            PipelineError::InvalidRequest("processing session has no remote file".into())
        })?;
        state.log.info(format!("waiting for {} to finish processing", file.name));

        let waiter =
            ProcessingWaiter::new(self.targets.status.as_ref(), self.clock.as_ref(), self.config.wait);
        let session_id = session.id.clone();
        let waited = waiter
            .wait(&file, |attempt, file_state| {
                self.emit(TransferEvent::ProcessingState {
                    session_id: session_id.clone(),
                    state: file_state,
                    attempt,
                });
            })
            .await;

        match waited {
            Ok(active) => {
                session.advance(SessionPhase::Active)?;
                session.remote_file = Some(active.clone());
                state.observe(session);
                state.log.success(format!("{} is active", active.name));
                self.cleanup(session, state).await;
                Ok(Outcome::Completed {
                    resumption: descriptor(session, true),
                    file: active,
                })
            }
            Err(e @ PipelineError::ProcessingFailed(_)) => {
                session.advance(SessionPhase::Failed)?;
                state.observe(session);
                if let Err(store_err) =
                    save_session(self.stores.checkpoints.as_ref(), session).await
                {
                    state
                        .log
                        .warn(format!("failed to persist FAILED state: {store_err}"));
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes the checkpoint and whatever fragments are left.
    async fn cleanup(&self, session: &UploadSession, state: &mut RunState) {
        if let Err(e) = self.stores.checkpoints.delete(&session.id).await {
            state.log.warn(format!("failed to delete checkpoint: {e}"));
        }
        let all: Vec<u32> = (0..session.fragment_count).collect();
        self.delete_fragments(&session.id, &all, state).await;
    }

    async fn delete_fragments(&self, session_id: &str, indices: &[u32], state: &mut RunState) {
        let mut failed = 0usize;
        for &index in indices {
            if let Err(e) = self.stores.fragments.delete(session_id, index).await {
                warn!(session = %session_id, index, error = %e, "fragment delete failed");
                failed += 1;
            }
        }
        if failed > 0 {
            state
                .log
                .warn(format!("{failed} of {} fragments could not be deleted", indices.len()));
        }
    }

    fn emit_accepted(&self, session_id: &str, target: TargetKind, packet: &Packet) {
        self.emit(TransferEvent::PacketAccepted {
            session_id: session_id.to_string(),
            target,
            offset: packet.offset,
            len: packet.len(),
            is_final: packet.is_final,
        });
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use meetrec_protocol::{ErrorKind, FileState, FragmentRange, LogLevel};
    use meetrec_remote::UploadCommand;

    use super::*;
    use crate::checkpoint::load_session;
    use crate::testing::{
        Harness, MIB, MockPrimary, MockSecondary, MockStatus, encode_all, pattern,
        ten_fragment_recording,
    };

    const SID: &str = "rec-1";

    fn lot(start: u32, end: u32, is_final_lot: bool) -> InvocationRequest {
        InvocationRequest {
            session_id: SID.into(),
            range: FragmentRange::new(start, end),
            is_final_lot,
            mime_type: Some("audio/webm".into()),
            title: Some("Sprint Review".into()),
        }
    }

    /// Five 6-byte fragments and a 4-byte last one: 34 bytes.
    fn small_blocks() -> Vec<Vec<u8>> {
        let mut blocks: Vec<Vec<u8>> = (0..5).map(|i| pattern(6, i)).collect();
        blocks.push(pattern(4, 5));
        blocks
    }

    fn small_harness() -> Harness {
        Harness::new(SID, encode_all(&small_blocks()))
    }

    #[tokio::test]
    async fn ten_fragments_make_five_packets() {
        let blocks = ten_fragment_recording(4 * MIB + 9);
        let expected = blocks.concat();
        assert_eq!(expected.len(), 40 * MIB);
        let h = Harness::new(SID, encode_all(&blocks));

        let result = h.pipeline(Harness::config(8 * MIB)).invoke(&lot(0, 10, true)).await;
        assert!(result.success, "{:?}", result.error);

        let mib = MIB as u64;
        assert_eq!(
            h.primary.offsets(),
            vec![0, 8 * mib, 16 * mib, 24 * mib, 32 * mib]
        );
        {
            let log = h.primary.log.lock().unwrap();
            assert_eq!(log.starts[0].content_length, 40 * mib);
            assert!(
                log.packets[..4]
                    .iter()
                    .all(|&(cmd, _, len)| cmd == UploadCommand::Continue && len == 8 * MIB)
            );
            assert_eq!(log.packets[4].0, UploadCommand::Finalize);
            assert!(log.stream == expected);
        }
        assert!(h.secondary.log.lock().unwrap().stream == expected);

        assert_eq!(result.phase, Some(SessionPhase::Active));
        assert_eq!(result.stats.primary_packets, 5);
        assert_eq!(result.stats.secondary_packets, 5);
        let resumption = result.resumption.unwrap();
        assert!(resumption.finalized);
        assert_eq!(resumption.next_fragment_index, 10);
        assert_eq!(result.file.unwrap().state, FileState::Active);

        assert!(!h.checkpoints.contains(SID));
        assert!(!h.checkpoints.is_leased(SID));
        assert_eq!(h.fragments.count(SID), 0);
    }

    #[tokio::test]
    async fn forced_checkpoint_resumes_into_identical_stream() {
        let blocks = ten_fragment_recording(4 * MIB + 9);
        let config = Harness::config(8 * MIB);

        let reference = Harness::new(SID, encode_all(&blocks));
        let uninterrupted = reference.pipeline(config.clone()).invoke(&lot(0, 10, true)).await;
        assert!(uninterrupted.success, "{:?}", uninterrupted.error);

        // The budget runs out while fragment 5 (the sixth) is read.
        let mut h = Harness::new(SID, encode_all(&blocks));
        h.advance_at = Some((5, Duration::from_secs(241)));
        let pipeline = h.pipeline(config);

        let first = pipeline.invoke(&lot(0, 10, false)).await;
        assert!(first.success, "{:?}", first.error);
        assert!(first.stats.interrupted);
        assert_eq!(first.phase, Some(SessionPhase::Checkpointed));
        let resumption = first.resumption.unwrap();
        assert_eq!(resumption.next_fragment_index, 6);
        assert!(!resumption.finalized);
        assert_eq!(resumption.bytes_sent.primary, 16 * MIB as u64);
        assert_eq!(first.stats.buffered_bytes, 8 * MIB as u64 - 6);

        // Consumed fragments are gone once the checkpoint is written.
        assert!(!h.fragments.contains(SID, 5));
        assert!(h.fragments.contains(SID, 6));
        assert!(
            first
                .logs
                .iter()
                .any(|e| e.level == LogLevel::Warn && e.message.contains("budget"))
        );

        let second = pipeline.invoke(&lot(6, 10, true)).await;
        assert!(second.success, "{:?}", second.error);

        assert_eq!(h.primary.offsets(), reference.primary.offsets());
        assert!(h.primary.log.lock().unwrap().stream == reference.primary.log.lock().unwrap().stream);
        assert!(
            h.secondary.log.lock().unwrap().stream == reference.secondary.log.lock().unwrap().stream
        );
        let file = second.file.unwrap();
        let reference_file = uninterrupted.file.unwrap();
        assert_eq!(file.name, reference_file.name);
        assert_eq!(file.state, reference_file.state);
        assert_eq!(h.primary.log.lock().unwrap().starts.len(), 1);
    }

    #[tokio::test]
    async fn secondary_open_failure_leaves_primary_only() {
        let mut h = small_harness();
        h.secondary = Arc::new(MockSecondary::failing_start());

        let result = h.pipeline(Harness::config(8)).invoke(&lot(0, 6, true)).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.phase, Some(SessionPhase::Active));
        assert!(!result.stats.secondary_enabled);
        assert_eq!(result.stats.secondary_bytes_sent, 0);
        assert_eq!(result.stats.secondary_packets, 0);
        assert!(h.secondary.log.lock().unwrap().ranges.is_empty());
        assert_eq!(h.primary.log.lock().unwrap().stream, small_blocks().concat());
        assert!(
            result
                .logs
                .iter()
                .any(|e| e.level == LogLevel::Warn && e.message.contains("secondary"))
        );
    }

    #[tokio::test]
    async fn secondary_failure_mid_stream_keeps_primary_going() {
        let mut h = small_harness();
        h.secondary = Arc::new(MockSecondary::failing_packet(1));
        let mut pipeline = h.pipeline(Harness::config(8));
        let mut events = pipeline.take_events().unwrap();

        let result = pipeline.invoke(&lot(0, 6, true)).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(h.primary.offsets(), vec![0, 8, 16, 24, 32]);
        assert_eq!(h.secondary.log.lock().unwrap().stream, small_blocks().concat()[..8]);
        assert_eq!(result.stats.secondary_bytes_sent, 8);
        assert!(!result.stats.secondary_enabled);

        let mut disabled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::SecondaryDisabled { .. }) {
                disabled += 1;
            }
        }
        assert_eq!(disabled, 1);
    }

    #[tokio::test]
    async fn primary_open_failure_sends_nothing() {
        let mut h = small_harness();
        h.primary = Arc::new(MockPrimary::failing_start());

        let result = h.pipeline(Harness::config(8)).invoke(&lot(0, 6, true)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::FatalProtocol));
        assert_eq!(h.secondary.log.lock().unwrap().calls, 0);
        assert!(!h.checkpoints.contains(SID));
        assert!(!h.checkpoints.is_leased(SID));
        assert_eq!(h.fragments.count(SID), 6);
        assert_eq!(result.logs.last().unwrap().level, LogLevel::Error);
    }

    #[tokio::test]
    async fn primary_packet_failure_keeps_last_checkpoint() {
        let mut h = small_harness();
        h.primary = Arc::new(MockPrimary::failing_packet(1));
        let pipeline = h.pipeline(Harness::config(8));

        let first = pipeline.invoke(&lot(0, 2, false)).await;
        assert!(first.success, "{:?}", first.error);

        let second = pipeline.invoke(&lot(2, 6, true)).await;
        assert!(!second.success);
        assert_eq!(second.error_kind, Some(ErrorKind::FatalProtocol));
        assert_eq!(second.stats.primary_bytes_sent, 8);

        let saved = load_session(h.checkpoints.as_ref(), SID).await.unwrap().unwrap();
        assert_eq!(saved.phase, SessionPhase::Checkpointed);
        assert_eq!(saved.fragment_cursor, 2);
        assert!(h.fragments.contains(SID, 2));
    }

    #[tokio::test]
    async fn missing_fragment_is_fatal() {
        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));
        assert!(pipeline.invoke(&lot(0, 2, false)).await.success);

        h.fragments.delete(SID, 3).await.unwrap();
        let result = pipeline.invoke(&lot(2, 6, true)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Store));
        assert!(result.error.unwrap().contains("fragment 3"));
    }

    #[tokio::test]
    async fn changed_fragment_is_a_size_mismatch() {
        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));
        assert!(pipeline.invoke(&lot(0, 2, false)).await.success);

        h.fragments
            .insert(SID, 5, meetrec_transfer::encode_fragment(&pattern(7, 5)));
        let result = pipeline.invoke(&lot(2, 6, true)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::FatalProtocol));
        assert!(result.error.unwrap().contains("size mismatch"));
        let log = h.primary.log.lock().unwrap();
        assert!(log.packets.iter().all(|p| p.0 == UploadCommand::Continue));
    }

    #[tokio::test]
    async fn padded_middle_fragment_fails_before_any_packet() {
        let h = small_harness();
        // Decodes to one byte where its four characters promise three.
        h.fragments.insert(SID, 1, b"QQ==".to_vec());

        let result = h.pipeline(Harness::config(8)).invoke(&lot(0, 6, true)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::FatalProtocol));
        assert!(result.error.unwrap().contains("fragment 1"));
        assert!(h.primary.log.lock().unwrap().packets.is_empty());
        assert!(h.secondary.log.lock().unwrap().ranges.is_empty());
        assert_eq!(result.stats.primary_bytes_sent, 0);
    }

    #[tokio::test]
    async fn first_lot_is_checked_before_opening() {
        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));

        let past_end = pipeline.invoke(&lot(0, 99, true)).await;
        let short_final = pipeline.invoke(&lot(0, 4, true)).await;

        for result in [past_end, short_final] {
            assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
        }
        assert!(h.primary.log.lock().unwrap().starts.is_empty());
        assert!(h.secondary.log.lock().unwrap().starts.is_empty());
        assert!(!h.checkpoints.contains(SID));
        assert!(!h.checkpoints.is_leased(SID));
    }

    #[tokio::test]
    async fn lots_must_continue_at_cursor() {
        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));

        let stray = pipeline.invoke(&lot(2, 4, false)).await;
        assert_eq!(stray.error_kind, Some(ErrorKind::InvalidRequest));
        assert_eq!(h.primary.calls(), 0);

        assert!(pipeline.invoke(&lot(0, 2, false)).await.success);
        let skipped = pipeline.invoke(&lot(3, 6, true)).await;
        assert_eq!(skipped.error_kind, Some(ErrorKind::InvalidRequest));

        let short_final = pipeline.invoke(&lot(2, 5, true)).await;
        assert_eq!(short_final.error_kind, Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn held_lease_blocks_invocation() {
        let h = small_harness();
        let now = Utc::now();
        h.checkpoints
            .acquire_lease(SID, "other-worker", now, now + TimeDelta::hours(1))
            .await
            .unwrap();

        let result = h.pipeline(Harness::config(8)).invoke(&lot(0, 6, true)).await;

        assert_eq!(result.error_kind, Some(ErrorKind::LeaseHeld));
        assert!(result.error.unwrap().contains("other-worker"));
        assert_eq!(h.primary.calls(), 0);
        assert!(h.checkpoints.is_leased(SID));
    }

    #[tokio::test]
    async fn unsafe_session_id_is_rejected() {
        let h = small_harness();
        let mut request = lot(0, 6, true);
        request.session_id = "../etc".into();

        let result = h.pipeline(Harness::config(8)).invoke(&request).await;

        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
        assert!(result.phase.is_none());
    }

    #[tokio::test]
    async fn processing_failure_is_persisted() {
        let mut h = small_harness();
        h.status = Arc::new(MockStatus::new(Vec::new(), FileState::Failed));
        let pipeline = h.pipeline(Harness::config(8));

        let result = pipeline.invoke(&lot(0, 6, true)).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ProcessingFailed));
        assert_eq!(result.phase, Some(SessionPhase::Failed));

        let saved = load_session(h.checkpoints.as_ref(), SID).await.unwrap().unwrap();
        assert_eq!(saved.phase, SessionPhase::Failed);

        let again = pipeline.invoke(&lot(6, 6, true)).await;
        assert_eq!(again.error_kind, Some(ErrorKind::ProcessingFailed));
        assert_eq!(h.primary.offsets().len(), 5);
    }

    #[tokio::test]
    async fn timed_out_wait_resumes_on_next_invocation() {
        let mut h = small_harness();
        let status = Arc::new(MockStatus::new(Vec::new(), FileState::Processing));
        h.status = status.clone();
        let mut config = Harness::config(8);
        config.wait.max_attempts = 3;
        let pipeline = h.pipeline(config);

        let result = pipeline.invoke(&lot(0, 6, true)).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.phase, Some(SessionPhase::Processing));
        assert_eq!(status.calls(), 3);
        assert_eq!(h.clock.sleeps().len(), 2);

        let saved = load_session(h.checkpoints.as_ref(), SID).await.unwrap().unwrap();
        assert_eq!(saved.phase, SessionPhase::Processing);
        assert_eq!(saved.remote_file.unwrap().name, "files/upload-1");
        assert_eq!(h.fragments.count(SID), 0);

        status.set_fallback(FileState::Active);
        let resumed = pipeline.invoke(&lot(6, 6, true)).await;
        assert!(resumed.success, "{:?}", resumed.error);
        assert_eq!(resumed.file.unwrap().state, FileState::Active);
        assert_eq!(h.primary.offsets().len(), 5);
        assert!(!h.checkpoints.contains(SID));
    }

    #[tokio::test]
    async fn cancellation_checkpoints_at_next_fragment() {
        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));
        pipeline.cancel_token().cancel();

        let result = pipeline.invoke(&lot(0, 6, true)).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.stats.interrupted);
        assert_eq!(result.stats.fragments_consumed, 1);
        assert_eq!(result.resumption.unwrap().next_fragment_index, 1);
        assert_eq!(result.phase, Some(SessionPhase::Checkpointed));
    }

    #[tokio::test]
    async fn split_lots_match_single_lot() {
        let reference = small_harness();
        assert!(
            reference
                .pipeline(Harness::config(8))
                .invoke(&lot(0, 6, true))
                .await
                .success
        );

        let h = small_harness();
        let pipeline = h.pipeline(Harness::config(8));
        for (start, end) in [(0, 3), (3, 6)] {
            let result = pipeline.invoke(&lot(start, end, false)).await;
            assert!(result.success, "{:?}", result.error);
        }
        let last = pipeline.invoke(&lot(6, 6, true)).await;
        assert!(last.success, "{:?}", last.error);

        assert_eq!(h.primary.offsets(), reference.primary.offsets());
        assert_eq!(
            h.primary.log.lock().unwrap().stream,
            reference.primary.log.lock().unwrap().stream
        );
    }

    #[tokio::test]
    async fn empty_recording_finalizes_with_empty_packet() {
        let h = Harness::new(SID, vec![Vec::new()]);

        let result = h.pipeline(Harness::config(8)).invoke(&lot(0, 1, true)).await;

        assert!(result.success, "{:?}", result.error);
        let log = h.primary.log.lock().unwrap();
        assert_eq!(log.starts[0].content_length, 0);
        assert_eq!(log.packets, vec![(UploadCommand::Finalize, 0, 0)]);
        assert_eq!(
            h.secondary.log.lock().unwrap().ranges[0].content_range(),
            "bytes */0"
        );
    }

    #[tokio::test]
    async fn events_follow_the_upload() {
        let h = small_harness();
        let mut pipeline = h.pipeline(Harness::config(8));
        let mut events = pipeline.take_events().unwrap();
        assert!(pipeline.take_events().is_none());

        assert!(pipeline.invoke(&lot(0, 6, true)).await.success);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(
            seen.first(),
            Some(TransferEvent::SessionOpened {
                total_bytes: 34,
                secondary_enabled: true,
                ..
            })
        ));
        let primary_packets = seen
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    TransferEvent::PacketAccepted {
                        target: TargetKind::Primary,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(primary_packets, 5);
        assert!(
            seen.iter()
                .any(|e| matches!(e, TransferEvent::Finalized { .. }))
        );
        assert!(matches!(
            seen.last(),
            Some(TransferEvent::ProcessingState {
                state: FileState::Active,
                attempt: 2,
                ..
            })
        ));
    }
}
