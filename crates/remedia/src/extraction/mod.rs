//! Prescription-image extraction.
//!
//! The Extraction Service turns an uploaded image into structured patient
//! data. It is an external collaborator: this module defines the narrow
//! contract ([`ExtractionService`]), the production HTTP client, and the
//! [`ExtractionBridge`] that adds bounded retry on transient upstream
//! failure.

mod bridge;
mod service;

pub use bridge::ExtractionBridge;
pub use service::{ExtractionService, HttpExtractionService};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Patient Data
// ============================================================================

/// Structured prescription data as produced by the Extraction Service.
///
/// The internal shape is owned by the upstream service; the session manager
/// stores it verbatim and only checks non-emptiness before linking. Fields
/// the service adds later land in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_numbers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regimen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medications: Vec<String>,

    /// Upstream fields this service does not interpret, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PatientData {
    /// A record is usable when it identifies the patient: either a document
    /// (type and number) or at least a full name.
    pub fn is_empty(&self) -> bool {
        let has_document = matches!(
            (&self.document_type, &self.document_number),
            (Some(t), Some(n)) if !t.is_empty() && !n.is_empty()
        );
        let has_name = self.full_name.as_deref().is_some_and(|n| !n.is_empty());
        !has_document && !has_name
    }

    /// Short human-oriented summary for acknowledgment directives.
    pub fn summary(&self) -> String {
        let who = self.full_name.as_deref().unwrap_or("paciente");
        let document = match (&self.document_type, &self.document_number) {
            (Some(t), Some(n)) => format!("{} {}", t, n),
            _ => "documento pendiente".to_string(),
        };
        format!(
            "{} ({}), {} medicamento(s)",
            who,
            document,
            self.medications.len()
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Extraction failure kinds.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The upstream classifier rejected the image: it is not a prescription.
    /// Surfaced to the user as a re-submission request, never retried.
    #[error("the submitted image is not a prescription")]
    NotAPrescription,

    /// Partial or garbled result. Surfaced as a re-submission request.
    #[error("the prescription could not be read")]
    Unreadable,

    /// The upstream service is unreachable or failing. Retried by the
    /// bridge with bounded backoff.
    #[error("extraction service unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl ExtractionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::UpstreamUnavailable(_))
    }
}
