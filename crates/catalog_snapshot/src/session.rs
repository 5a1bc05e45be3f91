//! Snapshot session bookkeeping.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// State of one snapshot session on the server.
///
/// Transitions are one-directional:
/// `Idle -> AwaitingRequest -> Serving -> Done | Error`, and any
/// non-terminal state may fail into `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request received, listeners not bound yet.
    Idle,
    /// Offer sent, waiting for the client to open its streams.
    AwaitingRequest,
    /// At least one stream is transferring.
    Serving,
    /// Every artifact was transferred.
    Done,
    /// The session failed.
    Error,
}

impl SessionState {
    /// Returns true once the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Error)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Idle, AwaitingRequest)
                | (AwaitingRequest, Serving)
                | (Serving, Serving)
                | (Serving, Done)
                | (Idle | AwaitingRequest | Serving, Error)
        )
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingRequest => "awaiting_request",
            SessionState::Serving => "serving",
            SessionState::Done => "done",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id.
    pub id: Uuid,
    /// Node that requested the snapshot.
    pub requester: Uuid,
    /// Current state.
    pub state: SessionState,
    /// Time since the request arrived.
    pub age: Duration,
}

#[derive(Debug)]
struct Entry {
    requester: Uuid,
    state: SessionState,
    started: Instant,
}

/// Live sessions of one server. Sessions share nothing but this table.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

impl SessionTable {
    pub(crate) fn open(&self, id: Uuid, requester: Uuid) {
        self.sessions.write().insert(
            id,
            Entry {
                requester,
                state: SessionState::Idle,
                started: Instant::now(),
            },
        );
    }

    /// Moves a session forward. Illegal transitions are ignored and reported
    /// as `false`.
    pub(crate) fn advance(&self, id: Uuid, next: SessionState) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&id) {
            Some(entry) if entry.state.can_transition_to(next) => {
                entry.state = next;
                true
            }
            _ => false,
        }
    }

    /// Removes a finished session.
    pub(crate) fn close(&self, id: Uuid) {
        self.sessions.write().remove(&id);
    }

    pub(crate) fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                requester: entry.requester,
                state: entry.state,
                age: entry.started.elapsed(),
            })
            .collect();
        sessions.sort_by(|a, b| b.age.cmp(&a.age));
        sessions
    }
}
