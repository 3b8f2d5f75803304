//! Sends one packet to one target.

use meetrec_protocol::{PrimaryProgress, RemoteFile, SecondaryProgress, UploadSession};
use meetrec_remote::{
    ByteRange, PrimaryTarget, RemoteError, SecondaryAck, SecondaryTarget, UploadCommand,
};
use meetrec_transfer::{Packet, TargetKind};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// What happened to a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The target accepted the bytes.
    Accepted,
    /// The primary target accepted the final packet.
    Finalized(RemoteFile),
    /// The secondary is disabled; nothing was sent.
    Skipped,
    /// The secondary failed and is now disabled.
    SecondaryDisabled(String),
}

/// Enforces packet rules and issues the transfer calls.
pub struct PacketUploader<'a> {
    primary: &'a dyn PrimaryTarget,
    secondary: Option<&'a dyn SecondaryTarget>,
    granularity: usize,
}

impl<'a> PacketUploader<'a> {
    pub fn new(
        primary: &'a dyn PrimaryTarget,
        secondary: Option<&'a dyn SecondaryTarget>,
        granularity: usize,
    ) -> Self {
        Self {
            primary,
            secondary,
            granularity,
        }
    }

    /// Sends `packet` to `target` and advances that target's progress.
    ///
    /// Primary failures are returned as errors. Secondary failures disable the
    /// secondary and are reported as [`Delivery::SecondaryDisabled`].
    pub async fn send_packet(
        &self,
        target: TargetKind,
        session: &mut UploadSession,
        packet: &Packet,
    ) -> Result<Delivery, PipelineError> {
        match target {
            TargetKind::Primary => self.send_primary(&mut session.primary, packet).await,
            TargetKind::Secondary => {
                let total = session.total_bytes;
                Ok(self.send_secondary(&mut session.secondary, packet, total).await)
            }
        }
    }

    async fn send_primary(
        &self,
        progress: &mut PrimaryProgress,
        packet: &Packet,
    ) -> Result<Delivery, PipelineError> {
        if !packet.is_final && packet.len() != self.granularity {
            return Err(PipelineError::GranularityViolation {
                len: packet.len(),
                granularity: self.granularity,
            });
        }
        if packet.offset != progress.bytes_sent {
            return Err(PipelineError::OffsetMismatch {
                target: TargetKind::Primary,
                offset: packet.offset,
                expected: progress.bytes_sent,
            });
        }

        let command = if packet.is_final {
            UploadCommand::Finalize
        } else {
            UploadCommand::Continue
        };
        let file = self
            .primary
            .transmit(&progress.upload_url, command, packet.offset, &packet.data)
            .await
            .map_err(PipelineError::Primary)?;

        progress.bytes_sent = packet.end();
        progress.packets_sent += 1;
        debug!(
            dest = "primary",
            offset = packet.offset,
            len = packet.len(),
            is_final = packet.is_final,
            "packet accepted"
        );

        if !packet.is_final {
            return Ok(Delivery::Accepted);
        }
        file.map(Delivery::Finalized).ok_or_else(|| {
            PipelineError::Primary(RemoteError::InvalidResponse(
                "finalize returned no file".into(),
            ))
        })
    }

    async fn send_secondary(
        &self,
        progress: &mut SecondaryProgress,
        packet: &Packet,
        total: u64,
    ) -> Delivery {
        let Some(target) = self.secondary.filter(|_| progress.enabled) else {
            return Delivery::Skipped;
        };

        if packet.offset != progress.bytes_sent {
            let reason = PipelineError::OffsetMismatch {
                target: TargetKind::Secondary,
                offset: packet.offset,
                expected: progress.bytes_sent,
            }
            .to_string();
            return disable(progress, reason);
        }

        let range = ByteRange::new(packet.offset, packet.len() as u64, total);
        match target.transmit(&progress.upload_url, range, &packet.data).await {
            Ok(ack) => {
                progress.bytes_sent = packet.end();
                progress.packets_sent += 1;
                debug!(
                    dest = "secondary",
                    offset = packet.offset,
                    len = packet.len(),
                    ?ack,
                    "packet accepted"
                );
                if packet.is_final && ack == SecondaryAck::Incomplete {
                    return disable(
                        progress,
                        format!("still incomplete after final byte {}", packet.end()),
                    );
                }
                Delivery::Accepted
            }
            Err(e) => disable(progress, PipelineError::Secondary(e).to_string()),
        }
    }
}

fn disable(progress: &mut SecondaryProgress, reason: String) -> Delivery {
    warn!(bytes_sent = progress.bytes_sent, reason = %reason, "disabling secondary target");
    progress.disable(reason.clone());
    Delivery::SecondaryDisabled(reason)
}
