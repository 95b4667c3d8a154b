//! Channel protocol types for communication between Remedia and channel adapters.
//!
//! A channel adapter (WhatsApp webhook bridge, Telegram bot, ...) normalizes
//! platform traffic into [`InboundEvent`]s and renders [`OutboundDirective`]s
//! back into platform-specific replies. The core never sees platform payloads;
//! adapters never see session state.
//!
//! The protocol is bidirectional over a pair of in-process channels:
//!
//! - **Commands** (Remedia → adapter): directives to deliver to a user
//! - **Events** (adapter → Remedia): normalized inbound traffic and lifecycle
//!   notifications

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Channels
// ============================================================================

/// A messaging transport an adapter speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Telegram,
}

impl Channel {
    /// Canonical lowercase name, as used in adapter registration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Inbound Events
// ============================================================================

/// A normalized inbound message from a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Which transport delivered the message.
    pub channel: Channel,

    /// The channel-specific identity of the sender (phone number, chat id).
    pub user_external_id: String,

    /// Message content. At least one of text/image is expected, but an
    /// empty content is still a structurally valid event.
    pub content: InboundContent,

    /// When the adapter received the message from the platform.
    pub received_at: DateTime<Utc>,
}

/// Content of an inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Opaque reference to an uploaded image (adapter-managed storage key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl InboundContent {
    /// Text-only content.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_ref: None,
        }
    }

    /// Image content with an optional caption.
    pub fn image(image_ref: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            text: caption,
            image_ref: Some(image_ref.into()),
        }
    }

    pub fn has_image(&self) -> bool {
        self.image_ref.is_some()
    }
}

// ============================================================================
// Outbound Directives
// ============================================================================

/// Why an upload needs to be re-submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// The upstream classifier rejected the image as not being a prescription.
    NotAPrescription,
    /// The image was a prescription but could not be read reliably.
    Unreadable,
}

/// Instruction to the channel adapter about what to reply.
///
/// Adapters own the rendering: the same directive becomes interactive buttons
/// on Telegram and plain text on WhatsApp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundDirective {
    /// Greet the user and ask for data-processing consent.
    RequestConsent,

    /// Nudge the user towards the next step; no state changed.
    Reprompt,

    /// Ask the user to upload the prescription again.
    RequestRetryUpload { reason: RetryReason },

    /// Confirm that patient data was extracted and linked.
    Acknowledge { patient_summary: String },

    /// Tell the user the session has ended.
    SessionClosed,

    /// A transient infrastructure failure; invite the user to retry shortly.
    TransientError,
}

// ============================================================================
// Commands (Remedia → adapter)
// ============================================================================

/// Commands sent from Remedia to a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelCommand {
    /// Deliver a directive to a user.
    DeliverDirective {
        request_id: String,
        user_external_id: String,
        directive: OutboundDirective,
    },

    /// Request graceful shutdown.
    Shutdown,
}

// ============================================================================
// Events (adapter → Remedia)
// ============================================================================

/// Events sent from a channel adapter to Remedia.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Adapter is connected and ready to receive commands.
    Ready { channel: Channel, version: String },

    /// Normalized inbound message from a user.
    EventReceived(Box<InboundEvent>),

    /// Adapter-level error.
    Error {
        code: String,
        message: String,
        /// Whether the adapter will shut down because of this error.
        #[serde(default)]
        fatal: bool,
    },

    /// Adapter is shutting down.
    Shutdown { reason: String },
}
