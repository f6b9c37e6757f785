// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Registry of live client sessions.
//!
//! The registry exists so that `stop()` can reach every session. Entries are
//! added on accept and removed by a drop guard owned by the session task, so an
//! entry disappears on every exit path: normal end, error, cancellation, or the
//! task being aborted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Identifier of a client session, unique per registry.
pub type SessionId = usize;

/// Public view of a registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Peer address of the client.
    pub address: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: Instant,
}

struct SessionEntry {
    info: SessionInfo,
    cancel: CancellationToken,
}

/// Mutex-guarded map of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicUsize,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session and returns the guard that removes it again.
    pub(crate) fn register(
        self: &Arc<Self>,
        address: SocketAddr,
        cancel: CancellationToken,
    ) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo {
            id,
            address,
            connected_at: Instant::now(),
        };
        self.lock().insert(id, SessionEntry { info, cancel });
        SessionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all live sessions, ordered by id.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.lock().values().map(|entry| entry.info.clone()).collect();
        sessions.sort_by_key(|info| info.id);
        sessions
    }

    /// Signals every registered session to close. Returns how many were signalled.
    pub(crate) fn cancel_all(&self) -> usize {
        let sessions = self.lock();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        sessions.len()
    }

    /// Drops any remaining entries. Returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let mut sessions = self.lock();
        let count = sessions.len();
        sessions.clear();
        count
    }

    fn remove(&self, id: SessionId) {
        self.lock().remove(&id);
    }
}

/// Removes its session from the registry when dropped.
pub(crate) struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
