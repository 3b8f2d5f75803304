//! Wires the HTTP targets and filesystem stores into a pipeline and runs one
//! invocation.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use meetrec_pipeline::{
    FsCheckpointStore, FsFragmentStore, Stores, Targets, TransferEvent, TransferPipeline,
};
use meetrec_protocol::{InvocationRequest, InvocationResult};
use meetrec_remote::{IngestClient, SecondaryTarget, StorageClient};

use crate::config::Config;

/// Builds the pipeline described by `config`.
pub fn build_pipeline(config: &Config) -> anyhow::Result<TransferPipeline> {
    let http = reqwest::Client::builder().build()?;
    let ingest = Arc::new(IngestClient::new(
        http,
        &config.primary_base_url,
        &config.primary_api_key,
    ));

    let secondary: Option<Arc<dyn SecondaryTarget>> = match &config.secondary_token {
        Some(token) if config.secondary_configured() => {
            let storage = StorageClient::new(
                StorageClient::http_client()?,
                &config.secondary_base_url,
                token,
            );
            Some(Arc::new(storage))
        }
        _ => {
            tracing::info!("secondary target not configured");
            None
        }
    };

    let targets = Targets {
        primary: ingest.clone(),
        status: ingest,
        secondary,
    };
    let stores = Stores {
        fragments: Arc::new(FsFragmentStore::new(&config.fragment_root)),
        checkpoints: Arc::new(FsCheckpointStore::new(&config.checkpoint_root)),
    };

    Ok(TransferPipeline::new(
        config.to_pipeline_config(),
        targets,
        stores,
    ))
}

/// Reads the invocation request from `path`, or from stdin when `None` or `-`.
pub fn read_request(path: Option<&Path>) -> anyhow::Result<InvocationRequest> {
    let raw = match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Runs one invocation. Ctrl-C stops the lot at the next fragment boundary.
pub async fn run(config: Config, request: InvocationRequest) -> anyhow::Result<InvocationResult> {
    let mut pipeline = build_pipeline(&config)?;
    let cancel = pipeline.cancel_token();

    if let Some(mut events) = pipeline.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(&event);
            }
        });
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, checkpointing at next fragment");
                signal_cancel.cancel();
            }
        }
    });

    tracing::info!(
        session = %request.session_id,
        start = request.range.start,
        end = request.range.end,
        is_final = request.is_final_lot,
        "running invocation"
    );
    let result = pipeline.invoke(&request).await;
    cancel.cancel();
    Ok(result)
}

fn log_event(event: &TransferEvent) {
    match event {
        TransferEvent::SessionOpened {
            session_id,
            total_bytes,
            secondary_enabled,
        } => tracing::debug!(session = %session_id, total_bytes, secondary_enabled, "session opened"),
        TransferEvent::PacketAccepted {
            session_id,
            target,
            offset,
            len,
            is_final,
        } => tracing::debug!(session = %session_id, dest = %target, offset, len, is_final, "packet accepted"),
        TransferEvent::SecondaryDisabled { session_id, reason } => {
            tracing::debug!(session = %session_id, %reason, "secondary disabled")
        }
        TransferEvent::Checkpointed {
            session_id,
            next_fragment_index,
        } => tracing::debug!(session = %session_id, next_fragment_index, "checkpointed"),
        TransferEvent::Finalized { session_id, file } => {
            tracing::debug!(session = %session_id, file = %file.name, "finalized")
        }
        TransferEvent::ProcessingState {
            session_id,
            state,
            attempt,
        } => tracing::debug!(session = %session_id, ?state, attempt, "processing state"),
    }
}
