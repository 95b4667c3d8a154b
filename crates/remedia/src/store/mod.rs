//! Session persistence.
//!
//! The session manager's durability dependency, behind a narrow contract:
//! open-session lookup, atomic creation, record updates, and the hand-off of
//! closed sessions to the patient table.

pub mod error;
pub mod file;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use remedia_channel_protocol::Channel;

use crate::extraction::PatientData;
use crate::session::{SessionRecord, TranscriptEntry};

// ============================================================================
// Store Contract
// ============================================================================

/// Storage interface for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Find the open (non-Closed) session for a (channel, user) pair.
    ///
    /// At most one open session exists per pair at any time.
    async fn find_open(
        &self,
        channel: Channel,
        user_external_id: &str,
    ) -> StorageResult<Option<SessionRecord>>;

    /// Create a session for a pair, insert-if-absent.
    ///
    /// Atomic against concurrent creation: if an open session for the pair
    /// already exists — including one racing in right now — that session is
    /// returned instead of a duplicate.
    async fn create(
        &self,
        channel: Channel,
        user_external_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<SessionRecord>;

    /// Load a session by id.
    async fn load(&self, session_id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Persist the current state of a session record.
    ///
    /// A record that transitioned to Closed is evicted from the open-pair
    /// index so the pair can transact again.
    async fn update(&self, record: &SessionRecord) -> StorageResult<()>;

    /// Hand a session's accumulated data to durable patient-record storage.
    ///
    /// Must be durable before returning; closure is only persisted after the
    /// archive succeeded.
    async fn archive_to_patient_table(&self, record: &SessionRecord) -> StorageResult<()>;
}

// ============================================================================
// Archived Patient Record
// ============================================================================

/// What lands in the patient table when a session closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedPatientRecord {
    pub session_id: String,
    pub channel: Channel,
    pub user_external_id: String,
    pub consent_given: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_data: Option<PatientData>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedPatientRecord {
    pub fn from_record(record: &SessionRecord, archived_at: DateTime<Utc>) -> Self {
        Self {
            session_id: record.session_id.clone(),
            channel: record.channel,
            user_external_id: record.user_external_id.clone(),
            consent_given: record.consent_given,
            patient_data: record.patient_data.clone(),
            transcript: record.transcript.clone(),
            created_at: record.created_at,
            closed_at: record.closed_at,
            archived_at,
        }
    }
}
