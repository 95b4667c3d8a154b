//! The session entity and its lifecycle fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use remedia_channel_protocol::Channel;

use crate::extraction::PatientData;

// ============================================================================
// Session State
// ============================================================================

/// Position in the session lifecycle.
///
/// `New → ConsentPending → Active → Closed`. Linking patient data is a side
/// effect applied within `Active`, not a separate state, because multiple
/// extractions may occur in one active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    New,
    ConsentPending,
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::ConsentPending => "consent_pending",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSender {
    User,
    System,
}

/// One accepted event or system annotation in the session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    pub sender: TranscriptSender,
    pub body: String,
}

// ============================================================================
// Session Record
// ============================================================================

/// Build the open-session index key for a (channel, user) pair.
pub fn pair_key(channel: Channel, user_external_id: &str) -> String {
    format!("{}\0{}", channel, user_external_id)
}

/// The unit of conversational state for one (channel, user) pair, from first
/// contact to explicit closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque unique identifier, generated at creation, immutable.
    pub session_id: String,

    /// Which channel adapter the session belongs to. Immutable.
    pub channel: Channel,

    /// Channel-specific identity of the human counterpart.
    pub user_external_id: String,

    pub state: SessionState,

    /// Set exactly once, never reverted.
    pub consent_given: bool,

    /// Populated once an extraction succeeds; replaced only by a new
    /// successful extraction event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_data: Option<PatientData>,

    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,

    pub created_at: DateTime<Utc>,

    /// Updated on every accepted event.
    pub last_activity_at: DateTime<Utc>,

    /// Set once, on transition to Closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Create a fresh session in `New` state with a generated id.
    pub fn new(channel: Channel, user_external_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: ulid::Ulid::new().to_string(),
            channel,
            user_external_id: user_external_id.into(),
            state: SessionState::New,
            consent_given: false,
            patient_data: None,
            transcript: Vec::new(),
            created_at: now,
            last_activity_at: now,
            closed_at: None,
        }
    }

    pub fn pair_key(&self) -> String {
        pair_key(self.channel, &self.user_external_id)
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Record an accepted event, advancing `last_activity_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn note_user(&mut self, body: impl Into<String>, at: DateTime<Utc>) {
        self.transcript.push(TranscriptEntry {
            at,
            sender: TranscriptSender::User,
            body: body.into(),
        });
    }

    pub fn note_system(&mut self, body: impl Into<String>, at: DateTime<Utc>) {
        self.transcript.push(TranscriptEntry {
            at,
            sender: TranscriptSender::System,
            body: body.into(),
        });
    }

    /// Mark consent as granted and activate the session.
    pub fn grant_consent(&mut self, at: DateTime<Utc>) {
        self.consent_given = true;
        self.state = SessionState::Active;
        self.note_system("consent granted", at);
    }

    /// Transition to Closed, stamping `closed_at` once.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.state = SessionState::Closed;
        if self.closed_at.is_none() {
            self.closed_at = Some(at);
        }
        self.last_activity_at = at;
    }

    /// Check lifecycle invariants, returning a description of the first
    /// violation found. A violating record is corrupt: fatal to this session
    /// only, to be archived as-is.
    pub fn integrity_error(&self) -> Option<&'static str> {
        if self.state == SessionState::Closed && self.closed_at.is_none() {
            return Some("closed session without closed_at");
        }
        if self.state != SessionState::Closed && self.closed_at.is_some() {
            return Some("closed_at set on an open session");
        }
        if self.state == SessionState::Active && !self.consent_given {
            return Some("active session without consent");
        }
        if self.last_activity_at < self.created_at {
            return Some("activity predates creation");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord::new(Channel::Whatsapp, "573001234567", Utc::now())
    }

    #[test]
    fn new_record_starts_clean() {
        let r = record();
        assert_eq!(r.state, SessionState::New);
        assert!(!r.consent_given);
        assert!(r.patient_data.is_none());
        assert!(r.closed_at.is_none());
        assert!(r.is_open());
        assert!(r.integrity_error().is_none());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(record().session_id, record().session_id);
    }

    #[test]
    fn pair_key_separates_channels() {
        let wa = pair_key(Channel::Whatsapp, "573001234567");
        let tl = pair_key(Channel::Telegram, "573001234567");
        assert_ne!(wa, tl);
    }

    #[test]
    fn grant_consent_activates() {
        let mut r = record();
        r.grant_consent(Utc::now());
        assert!(r.consent_given);
        assert_eq!(r.state, SessionState::Active);
    }

    #[test]
    fn close_stamps_closed_at_once() {
        let mut r = record();
        r.grant_consent(Utc::now());
        let first = Utc::now();
        r.close(first);
        let stamped = r.closed_at;
        r.close(Utc::now());
        assert_eq!(r.closed_at, stamped);
        assert!(!r.is_open());
    }

    #[test]
    fn integrity_catches_active_without_consent() {
        let mut r = record();
        r.state = SessionState::Active;
        assert_eq!(r.integrity_error(), Some("active session without consent"));
    }

    #[test]
    fn integrity_catches_closed_without_timestamp() {
        let mut r = record();
        r.state = SessionState::Closed;
        assert_eq!(
            r.integrity_error(),
            Some("closed session without closed_at")
        );
    }

    #[test]
    fn record_survives_serde_roundtrip() {
        let mut r = record();
        r.note_user("hola", Utc::now());
        r.grant_consent(Utc::now());

        let json = serde_json::to_string(&r).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, r.session_id);
        assert_eq!(back.state, SessionState::Active);
        assert_eq!(back.transcript.len(), 2);
    }
}
