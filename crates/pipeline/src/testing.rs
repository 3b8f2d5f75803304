//! In-crate test doubles for the remote targets and fragment store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meetrec_protocol::{FileState, RemoteFile};
use meetrec_remote::{
    BoxFuture, ByteRange, FileStatusSource, PrimaryStart, PrimaryTarget, RemoteError,
    SecondaryAck, SecondaryStart, SecondaryTarget, UploadCommand,
};
use meetrec_transfer::{FragmentInfo, encode_fragment};

use crate::continuation::ManualClock;
use crate::error::StoreError;
use crate::pipeline::{Stores, Targets, TransferPipeline};
use crate::store::{FragmentStore, MemoryCheckpointStore, MemoryFragmentStore};
use crate::types::PipelineConfig;

pub(crate) const MIB: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct PrimaryLog {
    pub starts: Vec<PrimaryStart>,
    /// (command, offset, len) per accepted call.
    pub packets: Vec<(UploadCommand, u64, usize)>,
    pub stream: Vec<u8>,
    pub calls: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MockPrimary {
    pub log: Mutex<PrimaryLog>,
    pub fail_start: bool,
    /// Zero-based transmit call that answers HTTP 500.
    pub fail_packet: Option<usize>,
    uploads: Mutex<u32>,
}

impl MockPrimary {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn failing_packet(n: usize) -> Self {
        Self {
            fail_packet: Some(n),
            ..Self::default()
        }
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.log.lock().unwrap().packets.iter().map(|p| p.1).collect()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().calls
    }
}

impl PrimaryTarget for MockPrimary {
    fn start<'a>(&'a self, request: &'a PrimaryStart) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let mut log = self.log.lock().unwrap();
            log.calls += 1;
            if self.fail_start {
                return Err(RemoteError::status(403, "key rejected"));
            }
            log.starts.push(request.clone());
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            Ok(format!("https://ingest.test/upload/{}", *uploads))
        })
    }

    fn transmit<'a>(
        &'a self,
        upload_url: &'a str,
        command: UploadCommand,
        offset: u64,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<Option<RemoteFile>, RemoteError>> {
        Box::pin(async move {
            let mut log = self.log.lock().unwrap();
            let call = log.packets.len();
            log.calls += 1;
            if self.fail_packet == Some(call) {
                return Err(RemoteError::status(500, "backend error"));
            }
            log.packets.push((command, offset, body.len()));
            log.stream.extend_from_slice(body);

            if command == UploadCommand::Continue {
                return Ok(None);
            }
            let id = upload_url.rsplit('/').next().unwrap_or_default();
            Ok(Some(RemoteFile {
                name: format!("files/upload-{id}"),
                uri: format!("https://ingest.test/v1beta/files/upload-{id}"),
                mime_type: log
                    .starts
                    .last()
                    .map(|s| s.mime_type.clone())
                    .unwrap_or_default(),
                state: FileState::Processing,
            }))
        })
    }
}

// ---------------------------------------------------------------------------
// Secondary
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct SecondaryLog {
    pub starts: Vec<SecondaryStart>,
    pub ranges: Vec<ByteRange>,
    pub stream: Vec<u8>,
    pub calls: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MockSecondary {
    pub log: Mutex<SecondaryLog>,
    pub fail_start: bool,
    /// Zero-based transmit call that answers HTTP 403.
    pub fail_packet: Option<usize>,
}

impl MockSecondary {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn failing_packet(n: usize) -> Self {
        Self {
            fail_packet: Some(n),
            ..Self::default()
        }
    }
}

impl SecondaryTarget for MockSecondary {
    fn start<'a>(
        &'a self,
        request: &'a SecondaryStart,
    ) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let mut log = self.log.lock().unwrap();
            log.calls += 1;
            if self.fail_start {
                return Err(RemoteError::status(404, "folder not found"));
            }
            log.starts.push(request.clone());
            Ok("https://storage.test/session/1".into())
        })
    }

    fn transmit<'a>(
        &'a self,
        _location: &'a str,
        range: ByteRange,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<SecondaryAck, RemoteError>> {
        Box::pin(async move {
            let mut log = self.log.lock().unwrap();
            let call = log.calls;
            log.calls += 1;
            if self.fail_packet == Some(call) {
                return Err(RemoteError::status(403, "quota exceeded"));
            }
            log.ranges.push(range);
            log.stream.extend_from_slice(body);
            Ok(if range.reaches_end() {
                SecondaryAck::Complete
            } else {
                SecondaryAck::Incomplete
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Answers scripted responses in order, then `fallback` forever.
#[derive(Debug)]
pub(crate) struct MockStatus {
    script: Mutex<VecDeque<Result<FileState, RemoteError>>>,
    fallback: Mutex<FileState>,
    pub calls: Mutex<usize>,
}

impl MockStatus {
    pub fn new(script: Vec<Result<FileState, RemoteError>>, fallback: FileState) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(0),
        }
    }

    /// Becomes `ACTIVE` on the second check.
    pub fn active_after_one() -> Self {
        Self::new(vec![Ok(FileState::Processing)], FileState::Active)
    }

    pub fn set_fallback(&self, state: FileState) {
        *self.fallback.lock().unwrap() = state;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl FileStatusSource for MockStatus {
    fn status<'a>(&'a self, file_name: &'a str) -> BoxFuture<'a, Result<RemoteFile, RemoteError>> {
        Box::pin(async move {
            *self.calls.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(*self.fallback.lock().unwrap()));
            next.map(|state| RemoteFile {
                name: file_name.to_string(),
                uri: String::new(),
                mime_type: String::new(),
                state,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// Memory fragments that move the clock forward when a given index is read.
pub(crate) struct ClockedFragments {
    pub inner: Arc<MemoryFragmentStore>,
    pub clock: Arc<ManualClock>,
    pub advance_at: Option<(u32, Duration)>,
}

impl FragmentStore for ClockedFragments {
    fn list<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<FragmentInfo>, StoreError>> {
        self.inner.list(session_id)
    }

    fn get<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        if let Some((at, by)) = self.advance_at {
            if at == index {
                self.clock.advance(by);
            }
        }
        self.inner.get(session_id, index)
    }

    fn delete<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.delete(session_id, index)
    }
}

/// Deterministic recording bytes.
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Encodes each raw block as one stored fragment.
pub(crate) fn encode_all(blocks: &[Vec<u8>]) -> Vec<Vec<u8>> {
    blocks.iter().map(|b| encode_fragment(b)).collect()
}

/// Ten fragments: nine of `4 MiB - 1` bytes and a last one of `last_len`.
pub(crate) fn ten_fragment_recording(last_len: usize) -> Vec<Vec<u8>> {
    let mut blocks: Vec<Vec<u8>> = (0..9).map(|i| pattern(4 * MIB - 1, i as u8)).collect();
    blocks.push(pattern(last_len, 9));
    blocks
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub primary: Arc<MockPrimary>,
    pub secondary: Arc<MockSecondary>,
    pub status: Arc<MockStatus>,
    pub fragments: Arc<MemoryFragmentStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub clock: Arc<ManualClock>,
    /// Fragment read that pushes the clock forward.
    pub advance_at: Option<(u32, Duration)>,
}

impl Harness {
    pub fn new(session_id: &str, encoded: Vec<Vec<u8>>) -> Self {
        let fragments = Arc::new(MemoryFragmentStore::new());
        for (i, f) in encoded.into_iter().enumerate() {
            fragments.insert(session_id, i as u32, f);
        }
        Self {
            primary: Arc::new(MockPrimary::default()),
            secondary: Arc::new(MockSecondary::default()),
            status: Arc::new(MockStatus::active_after_one()),
            fragments,
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            clock: Arc::new(ManualClock::new()),
            advance_at: None,
        }
    }

    pub fn config(granularity: usize) -> PipelineConfig {
        PipelineConfig {
            granularity,
            worker_id: "test-worker".into(),
            secondary_parent_id: Some("folder-1".into()),
            ..PipelineConfig::default()
        }
    }

    pub fn pipeline(&self, config: PipelineConfig) -> TransferPipeline {
        let targets = Targets {
            primary: self.primary.clone(),
            status: self.status.clone(),
            secondary: Some(self.secondary.clone()),
        };
        let stores = Stores {
            fragments: Arc::new(ClockedFragments {
                inner: self.fragments.clone(),
                clock: self.clock.clone(),
                advance_at: self.advance_at,
            }),
            checkpoints: self.checkpoints.clone(),
        };
        TransferPipeline::new(config, targets, stores).with_clock(self.clock.clone())
    }
}
