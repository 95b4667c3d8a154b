//! Session-level error taxonomy.

use thiserror::Error;

use crate::store::StorageError;

/// Errors surfaced by the session manager.
///
/// User-input problems (non-prescription images, non-affirmative replies) are
/// not errors: they are recovered locally by re-prompting and never appear
/// here. What remains is transient infrastructure failure — where the event
/// is NOT consumed and the caller must redeliver — and per-session
/// corruption.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session store failure. The triggering event was not consumed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A session record violated a lifecycle invariant. Fatal to that
    /// session only; the record has been archived as-is and force-closed.
    #[error("session {session_id} violates a lifecycle invariant: {detail}")]
    Corrupt { session_id: String, detail: String },
}

impl SessionError {
    /// Whether redelivering the event can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Storage(_))
    }
}
