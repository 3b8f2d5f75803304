//! Resumable, dual-target upload of a recording split into base64 fragments.
//!
//! The external scheduler calls [`TransferPipeline::invoke`] once per lot of
//! fragments. Each invocation runs under a time budget and either leaves a
//! checkpoint for the next lot or finalizes the upload and waits for the
//! primary target to finish processing.
//!
//! # Pipeline
//!
//! 1. **Size**: exact decoded size from the fragment listing
//! 2. **Open**: resumable sessions on the primary and secondary targets
//! 3. **Stream**: decode fragments, cut fixed-size packets, send to both targets
//! 4. **Checkpoint**: persist cursor and residual bytes when the budget runs out
//! 5. **Finalize**: send the remainder as the last packet
//! 6. **Wait**: poll processing state until `ACTIVE` or `FAILED`

pub mod checkpoint;
pub mod continuation;
pub mod error;
pub mod fs_store;
pub mod logbook;
pub mod naming;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod types;
pub mod uploader;
pub mod waiter;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use continuation::{Clock, ContinuationController, StopReason, SystemClock};
pub use error::{PipelineError, StoreError};
pub use fs_store::{FsCheckpointStore, FsFragmentStore};
pub use logbook::InvocationLog;
pub use naming::{display_name, extension_for_mime, sanitize_title, secondary_file_name};
pub use pipeline::{Stores, Targets, TransferPipeline};
pub use session::{SessionInitiator, SessionRequest};
pub use store::{CheckpointStore, FragmentStore, Lease, MemoryCheckpointStore, MemoryFragmentStore};
pub use types::{PipelineConfig, TransferEvent, WaitPolicy};
pub use uploader::{Delivery, PacketUploader};
pub use waiter::ProcessingWaiter;
