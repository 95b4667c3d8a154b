//! The Session Manager.
//!
//! Owns session identity and routing: resolves inbound events to sessions,
//! decides transitions through the pure machine, performs the side effects
//! (extraction, persistence, archival), and answers with the outbound
//! directive for the channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use remedia_channel_protocol::{Channel, InboundEvent, OutboundDirective, RetryReason};

use crate::extraction::{ExtractionBridge, ExtractionError};
use crate::store::SessionStore;
use crate::sync::KeyedLocks;

use super::consent;
use super::error::SessionError;
use super::intent::IntentClassifier;
use super::machine::{self, Transition};
use super::record::{SessionRecord, SessionState, pair_key};

/// Sweep interval and max idle age for the per-pair lock map.
const LOCK_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const LOCK_MAX_IDLE_AGE: Duration = Duration::from_secs(7200);

/// Creates, tracks, transitions, and terminates sessions.
///
/// Events for different (channel, user) pairs are handled fully in parallel;
/// events for the same pair are serialized through a per-pair lock held
/// across resolution, transition, and persistence — including the extraction
/// call, which is the single in-flight operation a subsequent event for the
/// same pair waits on.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    bridge: ExtractionBridge,
    classifier: IntentClassifier,
    locks: KeyedLocks,
    /// pair key → `received_at` of the event that closed the last session.
    /// Distinguishes a redelivered pre-closure event from genuinely new
    /// traffic that should start a fresh session.
    recent_closures: DashMap<String, DateTime<Utc>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        bridge: ExtractionBridge,
        classifier: IntentClassifier,
    ) -> Self {
        Self {
            store,
            bridge,
            classifier,
            locks: KeyedLocks::new(),
            recent_closures: DashMap::new(),
        }
    }

    /// Spawn background sweeping of idle per-pair locks.
    pub fn spawn_maintenance(&self) {
        self.locks
            .clone()
            .spawn_cleanup_task(LOCK_CLEANUP_INTERVAL, LOCK_MAX_IDLE_AGE);
    }

    /// Look up the open session for a pair, creating one if absent.
    ///
    /// At most one session is ever created per pair under concurrent
    /// first messages: the per-pair lock serializes callers and the store's
    /// `create` is itself insert-if-absent.
    pub async fn resolve_or_create(
        &self,
        channel: Channel,
        user_external_id: &str,
    ) -> Result<SessionRecord, SessionError> {
        let lock = self.locks.get(&pair_key(channel, user_external_id));
        let _guard = lock.lock().await;

        match self.store.find_open(channel, user_external_id).await? {
            Some(record) => Ok(record),
            None => Ok(self
                .store
                .create(channel, user_external_id, Utc::now())
                .await?),
        }
    }

    /// Apply one inbound event and answer the directive for the channel.
    ///
    /// On `Err`, the event was NOT consumed if the error is transient; the
    /// caller should arrange redelivery. Application is idempotent, so a
    /// redelivered event cannot double-apply a transition.
    pub async fn handle_event(
        &self,
        event: &InboundEvent,
    ) -> Result<OutboundDirective, SessionError> {
        let key = pair_key(event.channel, &event.user_external_id);
        let lock = self.locks.get(&key);
        let _guard = lock.lock().await;

        let mut record = match self.store.find_open(event.channel, &event.user_external_id).await? {
            Some(record) => record,
            None => {
                // No open session. A redelivery of an event that already
                // closed one is rejected; anything newer starts fresh.
                if let Some(mark) = self.recent_closures.get(&key)
                    && event.received_at <= *mark.value()
                {
                    debug!(
                        channel = %event.channel,
                        user = %event.user_external_id,
                        "replayed delivery against a closed session"
                    );
                    return Ok(OutboundDirective::SessionClosed);
                }
                self.recent_closures.remove(&key);

                let record = self
                    .store
                    .create(event.channel, &event.user_external_id, event.received_at)
                    .await?;
                info!(
                    session_id = %record.session_id,
                    channel = %record.channel,
                    "session created"
                );
                record
            }
        };

        if let Some(detail) = record.integrity_error() {
            return self.quarantine(record, detail).await;
        }

        let class = self.classifier.classify(&event.content);
        let transition = machine::step(record.state, class);
        self.apply(&mut record, event, transition).await
    }

    // ========================================================================
    // Transition Application
    // ========================================================================

    async fn apply(
        &self,
        record: &mut SessionRecord,
        event: &InboundEvent,
        transition: Transition,
    ) -> Result<OutboundDirective, SessionError> {
        let now = event.received_at;

        match transition {
            Transition::BeginConsent => {
                self.note_inbound(record, event);
                record.state = SessionState::ConsentPending;
                record.note_system("consent requested", now);
                record.touch(now);
                self.store.update(record).await?;
                Ok(OutboundDirective::RequestConsent)
            }

            Transition::RepeatConsent => {
                self.note_inbound(record, event);
                record.touch(now);
                self.store.update(record).await?;
                Ok(OutboundDirective::RequestConsent)
            }

            Transition::GrantConsent => {
                self.note_inbound(record, event);
                // Consent is set exactly once; a redelivered affirmative
                // cannot re-stamp it.
                if consent::requires_consent(record) {
                    record.grant_consent(now);
                }
                record.touch(now);
                self.store.update(record).await?;
                info!(session_id = %record.session_id, "consent granted");
                Ok(OutboundDirective::Reprompt)
            }

            Transition::Extract { image_ref } => self.run_extraction(record, &image_ref, now).await,

            Transition::Close => {
                self.note_inbound(record, event);
                record.close(now);
                // Archive before persisting closure: a failed update after a
                // successful archive re-archives on redelivery, which the
                // session-keyed patient table absorbs; the reverse order
                // could lose the patient record.
                self.store.archive_to_patient_table(record).await?;
                self.store.update(record).await?;
                self.recent_closures.insert(record.pair_key(), now);
                info!(session_id = %record.session_id, "session closed and archived");
                Ok(OutboundDirective::SessionClosed)
            }

            // Closed records are never mutated, not even last_activity_at.
            Transition::RejectClosed => Ok(OutboundDirective::SessionClosed),

            Transition::Reprompt => {
                self.note_inbound(record, event);
                record.touch(now);
                self.store.update(record).await?;
                Ok(OutboundDirective::Reprompt)
            }
        }
    }

    async fn run_extraction(
        &self,
        record: &mut SessionRecord,
        image_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboundDirective, SessionError> {
        record.note_user(format!("[image] {}", image_ref), now);
        record.touch(now);

        match self.bridge.extract(image_ref).await {
            Ok(data) if data.is_empty() => {
                warn!(
                    session_id = %record.session_id,
                    image_ref = %image_ref,
                    "extraction returned an empty patient record"
                );
                record.note_system("extraction returned an empty record", now);
                self.store.update(record).await?;
                Ok(OutboundDirective::RequestRetryUpload {
                    reason: RetryReason::Unreadable,
                })
            }

            Ok(data) => {
                let patient_summary = data.summary();
                record.patient_data = Some(data);
                record.note_system("patient data linked", now);
                self.store.update(record).await?;
                info!(session_id = %record.session_id, "patient data linked");
                Ok(OutboundDirective::Acknowledge { patient_summary })
            }

            Err(ExtractionError::NotAPrescription) => {
                record.note_system("image rejected: not a prescription", now);
                self.store.update(record).await?;
                Ok(OutboundDirective::RequestRetryUpload {
                    reason: RetryReason::NotAPrescription,
                })
            }

            Err(ExtractionError::Unreadable) => {
                record.note_system("image rejected: unreadable", now);
                self.store.update(record).await?;
                Ok(OutboundDirective::RequestRetryUpload {
                    reason: RetryReason::Unreadable,
                })
            }

            Err(ExtractionError::UpstreamUnavailable(message)) => {
                warn!(
                    session_id = %record.session_id,
                    error = %message,
                    "extraction service unavailable"
                );
                self.store.update(record).await?;
                Ok(OutboundDirective::TransientError)
            }
        }
    }

    fn note_inbound(&self, record: &mut SessionRecord, event: &InboundEvent) {
        if let Some(text) = event.content.text.as_deref() {
            record.note_user(text, event.received_at);
        }
    }

    // ========================================================================
    // Corruption Handling
    // ========================================================================

    /// A record violating a lifecycle invariant is archived as-is and
    /// force-closed so the pair can transact again. Fatal to this session
    /// only; unrelated sessions are untouched.
    async fn quarantine(
        &self,
        mut record: SessionRecord,
        detail: &'static str,
    ) -> Result<OutboundDirective, SessionError> {
        error!(
            session_id = %record.session_id,
            detail,
            "corrupt session record, archiving as-is"
        );

        if let Err(e) = self.store.archive_to_patient_table(&record).await {
            warn!(
                session_id = %record.session_id,
                error = %e,
                "failed to archive corrupt session"
            );
        }

        let now = Utc::now();
        record.state = SessionState::Closed;
        if record.closed_at.is_none() {
            record.closed_at = Some(now);
        }
        if let Err(e) = self.store.update(&record).await {
            warn!(
                session_id = %record.session_id,
                error = %e,
                "failed to persist quarantined session"
            );
        }

        Err(SessionError::Corrupt {
            session_id: record.session_id,
            detail: detail.to_string(),
        })
    }
}
