//! The pure session transition function.
//!
//! Keeping the state walk total and side-effect-free makes every intermediate
//! state observable: the manager performs I/O, this module only decides.

use super::record::SessionState;

// ============================================================================
// Event Classification
// ============================================================================

/// What an inbound event is, after classification.
///
/// Exactly one class per event; an image takes precedence over any text that
/// accompanies it, since extraction is the dominant action while active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    Image { image_ref: String },
    Termination,
    ConsentAffirmative,
    Other,
}

// ============================================================================
// Transitions
// ============================================================================

/// The decided outcome for one event against one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// First event of a fresh session: move to ConsentPending and ask.
    BeginConsent,
    /// Non-affirmative reply while waiting: ask again, no state change.
    RepeatConsent,
    /// Affirmative reply: set consent and activate.
    GrantConsent,
    /// Run the extraction pipeline; session stays Active either way.
    Extract { image_ref: String },
    /// Termination phrase: archive and close.
    Close,
    /// Event against a closed session: reject without mutation.
    RejectClosed,
    /// Anything else while active: nudge, no state change.
    Reprompt,
}

/// Decide the transition for `class` arriving at a session in `state`.
///
/// Total over every state × class combination; unrecognized input maps to a
/// re-prompt outcome rather than failing.
pub fn step(state: SessionState, class: EventClass) -> Transition {
    match (state, class) {
        // A brand-new session always starts with the consent flow, whatever
        // the first message contains.
        (SessionState::New, _) => Transition::BeginConsent,

        (SessionState::ConsentPending, EventClass::ConsentAffirmative) => Transition::GrantConsent,
        (SessionState::ConsentPending, _) => Transition::RepeatConsent,

        (SessionState::Active, EventClass::Image { image_ref }) => Transition::Extract { image_ref },
        (SessionState::Active, EventClass::Termination) => Transition::Close,
        (SessionState::Active, _) => Transition::Reprompt,

        (SessionState::Closed, _) => Transition::RejectClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_classes() -> Vec<EventClass> {
        vec![
            EventClass::Image {
                image_ref: "uploads/x".to_string(),
            },
            EventClass::Termination,
            EventClass::ConsentAffirmative,
            EventClass::Other,
        ]
    }

    #[test]
    fn new_sessions_always_begin_consent() {
        for class in all_classes() {
            assert_eq!(step(SessionState::New, class), Transition::BeginConsent);
        }
    }

    #[test]
    fn consent_pending_only_advances_on_affirmative() {
        assert_eq!(
            step(SessionState::ConsentPending, EventClass::ConsentAffirmative),
            Transition::GrantConsent
        );
        for class in [
            EventClass::Image {
                image_ref: "uploads/x".to_string(),
            },
            EventClass::Termination,
            EventClass::Other,
        ] {
            assert_eq!(
                step(SessionState::ConsentPending, class),
                Transition::RepeatConsent
            );
        }
    }

    #[test]
    fn active_routes_images_to_extraction() {
        assert_eq!(
            step(
                SessionState::Active,
                EventClass::Image {
                    image_ref: "uploads/rx1".to_string()
                }
            ),
            Transition::Extract {
                image_ref: "uploads/rx1".to_string()
            }
        );
    }

    #[test]
    fn active_closes_on_termination() {
        assert_eq!(
            step(SessionState::Active, EventClass::Termination),
            Transition::Close
        );
    }

    #[test]
    fn active_reprompts_on_everything_else() {
        assert_eq!(
            step(SessionState::Active, EventClass::ConsentAffirmative),
            Transition::Reprompt
        );
        assert_eq!(
            step(SessionState::Active, EventClass::Other),
            Transition::Reprompt
        );
    }

    #[test]
    fn closed_rejects_everything() {
        for class in all_classes() {
            assert_eq!(step(SessionState::Closed, class), Transition::RejectClosed);
        }
    }

    #[test]
    fn step_is_total() {
        // Every state × class combination decides something; none panic.
        for state in [
            SessionState::New,
            SessionState::ConsentPending,
            SessionState::Active,
            SessionState::Closed,
        ] {
            for class in all_classes() {
                let _ = step(state, class);
            }
        }
    }
}
