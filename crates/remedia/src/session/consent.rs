//! The consent gate.
//!
//! Consent is a one-time, non-revocable acknowledgment required before active
//! processing proceeds. Whether a reply *counts* as consent is the intent
//! classifier's job; this gate only decides whether a session still needs
//! the welcome/consent step.

use super::record::SessionRecord;

/// True iff the session still requires the consent step.
pub fn requires_consent(record: &SessionRecord) -> bool {
    !record.consent_given
}
