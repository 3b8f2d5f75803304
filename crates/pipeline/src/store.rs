//! Fragment and checkpoint store abstractions.
//!
//! The pipeline never touches storage directly. [`FragmentStore`] serves the
//! pre-uploaded base64 fragments, [`CheckpointStore`] keeps the serialized
//! session between invocations and hands out the session lease. In-memory
//! implementations live here; filesystem ones in [`crate::fs_store`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use meetrec_remote::BoxFuture;
use meetrec_transfer::FragmentInfo;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Source of the fragments of a recording.
pub trait FragmentStore: Send + Sync {
    /// Lists every stored fragment of a session.
    fn list<'a>(&'a self, session_id: &'a str)
    -> BoxFuture<'a, Result<Vec<FragmentInfo>, StoreError>>;

    /// Reads one fragment. `None` if it does not exist.
    fn get<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    /// Deletes one fragment. Deleting a missing fragment succeeds.
    fn delete<'a>(&'a self, session_id: &'a str, index: u32)
    -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Exclusive right to run an invocation for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub session_id: String,
    pub holder: String,
    /// Random token; only the matching token releases the lease.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(session_id: &str, holder: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            holder: holder.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn held_error(&self) -> StoreError {
        StoreError::LeaseHeld {
            session: self.session_id.clone(),
            holder: self.holder.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Persistence for serialized sessions and their leases.
pub trait CheckpointStore: Send + Sync {
    fn put<'a>(&'a self, session_id: &'a str, state: &'a [u8])
    -> BoxFuture<'a, Result<(), StoreError>>;

    fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    /// Removes the checkpoint. Removing a missing checkpoint succeeds.
    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Takes the lease for `session_id` unless a live lease exists.
    ///
    /// An expired lease is replaced.
    fn acquire_lease<'a>(
        &'a self,
        session_id: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Lease, StoreError>>;

    /// Releases a lease if it is still the current one.
    fn release_lease<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<(), StoreError>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Fragments held in memory, keyed by session and index.
#[derive(Debug, Default)]
pub struct MemoryFragmentStore {
    fragments: Mutex<BTreeMap<(String, u32), Vec<u8>>>,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: &str, index: u32, encoded: Vec<u8>) {
        let mut fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
        fragments.insert((session_id.to_string(), index), encoded);
    }

    pub fn contains(&self, session_id: &str, index: u32) -> bool {
        let fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
        fragments.contains_key(&(session_id.to_string(), index))
    }

    /// Number of fragments still stored for a session.
    pub fn count(&self, session_id: &str) -> usize {
        let fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
        fragments.keys().filter(|(s, _)| s == session_id).count()
    }
}

impl FragmentStore for MemoryFragmentStore {
    fn list<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<FragmentInfo>, StoreError>> {
        Box::pin(async move {
            let fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
            Ok(fragments
                .iter()
                .filter(|((s, _), _)| s == session_id)
                .map(|((_, index), data)| FragmentInfo {
                    index: *index,
                    encoded_size: data.len() as u64,
                })
                .collect())
        })
    }

    fn get<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
            Ok(fragments.get(&(session_id.to_string(), index)).cloned())
        })
    }

    fn delete<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut fragments = self.fragments.lock().unwrap_or_else(|e| e.into_inner());
            fragments.remove(&(session_id.to_string(), index));
            Ok(())
        })
    }
}

/// Checkpoints and leases held in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, Vec<u8>>>,
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.contains_key(session_id)
    }

    pub fn is_leased(&self, session_id: &str) -> bool {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.contains_key(session_id)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put<'a>(
        &'a self,
        session_id: &'a str,
        state: &'a [u8],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.insert(session_id.to_string(), state.to_vec());
            Ok(())
        })
    }

    fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            Ok(states.get(session_id).cloned())
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.remove(session_id);
            Ok(())
        })
    }

    fn acquire_lease<'a>(
        &'a self,
        session_id: &'a str,
        holder: &'a str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Lease, StoreError>> {
        Box::pin(async move {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(current) = leases.get(session_id) {
                if !current.is_expired(now) {
                    return Err(current.held_error());
                }
            }
            let lease = Lease::new(session_id, holder, expires_at);
            leases.insert(session_id.to_string(), lease.clone());
            Ok(lease)
        })
    }

    fn release_lease<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            if leases
                .get(&lease.session_id)
                .is_some_and(|current| current.token == lease.token)
            {
                leases.remove(&lease.session_id);
            }
            Ok(())
        })
    }
}
