//! Session lifecycle and routing.
//!
//! # Architecture
//!
//! ```text
//!  inbound event ──▶ SessionManager ──▶ IntentClassifier   (what is this?)
//!                        │
//!                        ├──▶ machine::step                (pure decision)
//!                        │
//!                        ├──▶ ExtractionBridge             (images only)
//!                        │
//!                        └──▶ SessionStore                 (persist / archive)
//! ```
//!
//! - **`record`** — the session entity: identity, lifecycle timestamps,
//!   transcript, invariants.
//! - **`machine`** — the pure, total transition function; no I/O.
//! - **`intent`** — deterministic classification of inbound content.
//! - **`consent`** — the consent gate predicate.
//! - **`manager`** — composition: per-pair serialization, persistence,
//!   extraction, closure and archival.

pub mod consent;
mod error;
mod intent;
pub mod machine;
mod manager;
mod record;

pub use error::SessionError;
pub use intent::IntentClassifier;
pub use machine::{EventClass, Transition};
pub use manager::SessionManager;
pub use record::{SessionRecord, SessionState, TranscriptEntry, TranscriptSender, pair_key};
