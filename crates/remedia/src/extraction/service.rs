//! The Extraction Service contract and its HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ExtractionError, PatientData};

/// Narrow contract over the external image-extraction service.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Derive structured prescription data from an uploaded image.
    async fn extract(&self, image_ref: &str) -> Result<PatientData, ExtractionError>;
}

// ============================================================================
// HTTP Implementation
// ============================================================================

/// HTTP client for the extraction service.
///
/// Posts the image reference to `{base_url}/v1/extract` and maps the
/// response envelope onto the error taxonomy. Transport failures and 5xx
/// statuses are transient; a well-formed rejection is not.
pub struct HttpExtractionService {
    client: Client,
    base_url: String,
}

impl HttpExtractionService {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    image_ref: &'a str,
}

/// Response envelope from the extraction service.
#[derive(Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum ExtractResponse {
    Extracted { patient: PatientData },
    NotAPrescription,
    Unreadable,
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn extract(&self, image_ref: &str) -> Result<PatientData, ExtractionError> {
        let url = format!("{}/v1/extract", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ExtractRequest { image_ref })
            .send()
            .await
            .map_err(|e| ExtractionError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_failure_status(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtractionError::UpstreamUnavailable(e.to_string()))?;
        parse_envelope(&body)
    }
}

/// Any non-2xx is treated as the service misbehaving, hence transient:
/// rejections ("not a prescription") arrive inside a successful envelope.
fn map_failure_status(status: StatusCode, body: &str) -> ExtractionError {
    let detail = if body.is_empty() {
        format!("status {}", status)
    } else {
        format!("status {}: {}", status, body.chars().take(200).collect::<String>())
    };
    ExtractionError::UpstreamUnavailable(detail)
}

fn parse_envelope(body: &str) -> Result<PatientData, ExtractionError> {
    // A malformed envelope means the upstream produced garbage for this
    // image; asking the user to re-upload is the recovery path.
    let envelope: ExtractResponse =
        serde_json::from_str(body).map_err(|_| ExtractionError::Unreadable)?;
    match envelope {
        ExtractResponse::Extracted { patient } => Ok(patient),
        ExtractResponse::NotAPrescription => Err(ExtractionError::NotAPrescription),
        ExtractResponse::Unreadable => Err(ExtractionError::Unreadable),
    }
}
