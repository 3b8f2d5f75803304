//! Invocation time budget and checkpoint-and-return.

use std::time::Duration;

use chrono::{DateTime, Utc};
use meetrec_protocol::{BytesSent, ResumptionDescriptor, SessionPhase, UploadSession};
use meetrec_remote::BoxFuture;
use meetrec_transfer::BufferAccumulator;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::{load_session, save_session};
use crate::error::PipelineError;
use crate::store::CheckpointStore;

/// Time source for budgets, leases and polling pauses.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// Wall clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Why a lot stopped before its last fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetExhausted,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::BudgetExhausted => f.write_str("time budget exhausted"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Decides when an invocation must stop and persists what it has.
pub struct ContinuationController<'a> {
    clock: &'a dyn Clock,
    started: DateTime<Utc>,
    budget: Duration,
    cancel: CancellationToken,
}

impl<'a> ContinuationController<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        started: DateTime<Utc>,
        budget: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clock,
            started,
            budget,
            cancel,
        }
    }

    /// Time since the invocation started.
    pub fn elapsed(&self) -> Duration {
        (self.clock.now() - self.started)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns a reason to stop, or `None` to keep going.
    ///
    /// The final lot ignores the budget; cancellation stops any lot.
    pub fn should_stop(&self, is_final_lot: bool) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if !is_final_lot && self.elapsed() > self.budget {
            return Some(StopReason::BudgetExhausted);
        }
        None
    }

    /// Persists the session with the buffered bytes as its residual.
    pub async fn checkpoint(
        &self,
        store: &dyn CheckpointStore,
        session: &mut UploadSession,
        buffer: &BufferAccumulator,
    ) -> Result<ResumptionDescriptor, PipelineError> {
        session.advance(SessionPhase::Checkpointed)?;
        session.buffer_residual = buffer.to_residual();
        save_session(store, session).await?;
        debug!(
            session = %session.id,
            next = session.fragment_cursor,
            residual = buffer.len(),
            elapsed_ms = self.elapsed().as_millis() as u64,
            "checkpointed"
        );
        Ok(descriptor(session, false))
    }

    /// Loads a saved session and rebuilds its buffer from the residual.
    pub async fn resume(
        store: &dyn CheckpointStore,
        session_id: &str,
    ) -> Result<Option<(UploadSession, BufferAccumulator)>, PipelineError> {
        let Some(mut session) = load_session(store, session_id).await? else {
            return Ok(None);
        };
        let buffer = BufferAccumulator::from_residual(std::mem::take(&mut session.buffer_residual));
        session.residual_checksum.clear();
        Ok(Some((session, buffer)))
    }
}

/// Resumption descriptor for the session's current progress.
pub fn descriptor(session: &UploadSession, finalized: bool) -> ResumptionDescriptor {
    ResumptionDescriptor {
        session_id: session.id.clone(),
        next_fragment_index: session.fragment_cursor,
        bytes_sent: BytesSent {
            primary: session.primary.bytes_sent,
            secondary: session.secondary.bytes_sent,
        },
        finalized,
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
