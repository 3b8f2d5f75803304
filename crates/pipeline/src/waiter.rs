//! Post-finalize processing wait.

use meetrec_protocol::{FileState, RemoteFile};
use meetrec_remote::FileStatusSource;
use tracing::{debug, warn};

use crate::continuation::Clock;
use crate::error::PipelineError;
use crate::types::WaitPolicy;

/// Polls the primary target until a finalized file leaves processing.
pub struct ProcessingWaiter<'a> {
    status: &'a dyn FileStatusSource,
    clock: &'a dyn Clock,
    policy: WaitPolicy,
}

impl<'a> ProcessingWaiter<'a> {
    pub fn new(status: &'a dyn FileStatusSource, clock: &'a dyn Clock, policy: WaitPolicy) -> Self {
        Self {
            status,
            clock,
            policy,
        }
    }

    /// Waits for `ACTIVE`.
    ///
    /// `FAILED` is fatal. Transient status errors count as an attempt and are
    /// retried; other status errors are fatal. `on_poll` sees every state read.
    pub async fn wait(
        &self,
        file: &RemoteFile,
        mut on_poll: impl FnMut(u32, FileState),
    ) -> Result<RemoteFile, PipelineError> {
        match file.state {
            FileState::Active => return Ok(file.clone()),
            FileState::Failed => return Err(PipelineError::ProcessingFailed(file.name.clone())),
            _ => {}
        }

        for attempt in 1..=self.policy.max_attempts {
            match self.status.status(&file.name).await {
                Ok(current) => {
                    on_poll(attempt, current.state);
                    match current.state {
                        FileState::Active => return Ok(merge(file, current)),
                        FileState::Failed => {
                            return Err(PipelineError::ProcessingFailed(file.name.clone()));
                        }
                        state => debug!(file = %file.name, ?state, attempt, "still processing"),
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(file = %file.name, attempt, error = %e, "status check failed, retrying");
                }
                Err(e) => return Err(PipelineError::Status(e)),
            }

            if attempt < self.policy.max_attempts {
                self.clock.sleep(self.policy.interval).await;
            }
        }

        Err(PipelineError::Timeout {
            file: file.name.clone(),
            attempts: self.policy.max_attempts,
        })
    }
}

/// Status responses may omit fields the finalize response carried.
fn merge(finalized: &RemoteFile, current: RemoteFile) -> RemoteFile {
    RemoteFile {
        name: finalized.name.clone(),
        uri: if current.uri.is_empty() {
            finalized.uri.clone()
        } else {
            current.uri
        },
        mime_type: if current.mime_type.is_empty() {
            finalized.mime_type.clone()
        } else {
            current.mime_type
        },
        state: current.state,
    }
}
