//! Filesystem-backed stores.
//!
//! Layout under the fragment root: `<session>/chunk_<index>`, one base64 text
//! file per fragment. Under the checkpoint root: `<session>.json` for the
//! session and `<session>.lease` for the lease. Checkpoints and replaced
//! leases are written to a temporary file and renamed into place; new leases
//! are hard-linked into place so an existing lease is never overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use meetrec_remote::BoxFuture;
use meetrec_transfer::{FragmentInfo, validate_session_id};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{CheckpointStore, FragmentStore, Lease};

const FRAGMENT_PREFIX: &str = "chunk_";

fn checked(session_id: &str) -> Result<(), StoreError> {
    validate_session_id(session_id).map_err(|e| StoreError::InvalidKey(e.to_string()))
}

/// Writes `bytes` to `path` through a sibling temporary file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await?;
    f.write_all(bytes).await?;
    f.flush().await?;
    f.sync_all().await?;
    drop(f);
    tokio::fs::rename(&tmp, path).await.inspect_err(|e| {
        warn!(from = %tmp.display(), to = %path.display(), error = %e, "rename failed");
    })?;
    Ok(())
}

/// Publishes `bytes` at `path` only if nothing is there yet.
///
/// The content is written and synced under `tmp_name` first and then
/// hard-linked into place, so readers never see a partially written file.
/// Returns `false` when `path` already exists.
async fn write_new(path: &Path, tmp_name: &str, bytes: &[u8]) -> Result<bool, StoreError> {
    let tmp = path.with_file_name(tmp_name);
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await?;
    f.write_all(bytes).await?;
    f.flush().await?;
    f.sync_all().await?;
    drop(f);

    let linked = tokio::fs::hard_link(&tmp, path).await;
    if let Err(e) = tokio::fs::remove_file(&tmp).await {
        warn!(path = %tmp.display(), error = %e, "failed to remove temporary file");
    }
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Fragments stored as files, one directory per session.
#[derive(Debug, Clone)]
pub struct FsFragmentStore {
    root: PathBuf,
}

impl FsFragmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn fragment_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{FRAGMENT_PREFIX}{index}"))
    }

    async fn list_dir(&self, session_id: &str) -> Result<Vec<FragmentInfo>, StoreError> {
        checked(session_id)?;
        let mut entries = match tokio::fs::read_dir(self.session_dir(session_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(FRAGMENT_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let meta = entry.metadata().await?;
            if meta.is_file() {
                listed.push(FragmentInfo {
                    index,
                    encoded_size: meta.len(),
                });
            }
        }
        listed.sort_by_key(|f| f.index);
        Ok(listed)
    }

    async fn read_fragment(
        &self,
        session_id: &str,
        index: u32,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        checked(session_id)?;
        match tokio::fs::read(self.fragment_path(session_id, index)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_fragment(&self, session_id: &str, index: u32) -> Result<(), StoreError> {
        checked(session_id)?;
        match tokio::fs::remove_file(self.fragment_path(session_id, index)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Drop the session directory once it is empty; failure just means
        // fragments remain.
        let _ = tokio::fs::remove_dir(self.session_dir(session_id)).await;
        Ok(())
    }
}

impl FragmentStore for FsFragmentStore {
    fn list<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<FragmentInfo>, StoreError>> {
        Box::pin(self.list_dir(session_id))
    }

    fn get<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(self.read_fragment(session_id, index))
    }

    fn delete<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.remove_fragment(session_id, index))
    }
}

/// Checkpoints and leases stored as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    fn lease_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.lease"))
    }

    async fn write_state(&self, session_id: &str, state: &[u8]) -> Result<(), StoreError> {
        checked(session_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.state_path(session_id);
        write_atomic(&path, state).await?;
        debug!(path = %path.display(), size = state.len(), "wrote checkpoint");
        Ok(())
    }

    async fn read_state(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        checked(session_id)?;
        match tokio::fs::read(self.state_path(session_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_state(&self, session_id: &str) -> Result<(), StoreError> {
        checked(session_id)?;
        match tokio::fs::remove_file(self.state_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_lease(&self, session_id: &str) -> Result<Option<Lease>, StoreError> {
        match tokio::fs::read(self.lease_path(session_id)).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(lease) => Ok(Some(lease)),
                Err(e) => {
                    warn!(session = %session_id, error = %e, "unreadable lease file, treating as expired");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn take_lease(
        &self,
        session_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Lease, StoreError> {
        checked(session_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let lease = Lease::new(session_id, holder, expires_at);
        let bytes = serde_json::to_vec(&lease)?;
        let path = self.lease_path(session_id);

        let tmp_name = format!("{session_id}.lease.{}.tmp", lease.token);
        if write_new(&path, &tmp_name, &bytes).await? {
            return Ok(lease);
        }

        if let Some(current) = self.read_lease(session_id).await? {
            if !current.is_expired(now) {
                return Err(StoreError::LeaseHeld {
                    session: current.session_id,
                    holder: current.holder,
                    expires_at: current.expires_at,
                });
            }
            debug!(session = %session_id, stale = %current.holder, "replacing expired lease");
        }
        write_atomic(&path, &bytes).await?;
        Ok(lease)
    }

    async fn drop_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        checked(&lease.session_id)?;
        let Some(current) = self.read_lease(&lease.session_id).await? else {
            return Ok(());
        };
        if current.token != lease.token {
            debug!(session = %lease.session_id, holder = %current.holder, "lease taken over, not releasing");
            return Ok(());
        }
        match tokio::fs::remove_file(self.lease_path(&lease.session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn put<'a>(
        &'a self,
        session_id: &'a str,
        state: &'a [u8],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_state(session_id, state))
    }

    fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(self.read_state(session_id))
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.remove_state(session_id))
    }

    fn acquire_lease<'a>(
        &'a self,
        session_id: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Lease, StoreError>> {
        Box::pin(self.take_lease(session_id, holder, now, expires_at))
    }

    fn release_lease<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.drop_lease(lease))
    }
}
