//! Common test utilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use remedia::extraction::{ExtractionBridge, ExtractionError, ExtractionService, PatientData};
use remedia::session::{IntentClassifier, SessionManager};
use remedia::store::{MemorySessionStore, SessionStore};
use remedia_channel_protocol::{Channel, InboundContent, InboundEvent};

/// Extraction service that replays scripted results in order.
///
/// When the script runs out it keeps answering with a successful sample
/// extraction, so tests only script the interesting prefix.
pub struct ScriptedExtraction {
    results: Mutex<Vec<Result<PatientData, ExtractionError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedExtraction {
    pub fn new(results: Vec<Result<PatientData, ExtractionError>>) -> Self {
        Self {
            results: Mutex::new(results),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ExtractionService for ScriptedExtraction {
    async fn extract(&self, _image_ref: &str) -> Result<PatientData, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().await;
        if results.is_empty() {
            Ok(sample_patient_data())
        } else {
            results.remove(0)
        }
    }
}

pub fn sample_patient_data() -> PatientData {
    PatientData {
        document_type: Some("CC".to_string()),
        document_number: Some("1032456789".to_string()),
        full_name: Some("María Pérez".to_string()),
        phone_numbers: vec!["573001234567".to_string()],
        eps: Some("Salud Total".to_string()),
        diagnosis: Some("hipertensión arterial".to_string()),
        medications: vec!["losartán 50mg".to_string()],
        ..Default::default()
    }
}

/// Build a manager over the given store and extraction script, with the
/// default Spanish phrase configuration.
pub fn build_manager(
    store: Arc<MemorySessionStore>,
    extraction: Arc<ScriptedExtraction>,
) -> Arc<SessionManager> {
    let bridge = ExtractionBridge::new(extraction, 1, Duration::from_millis(1));
    let classifier = IntentClassifier::new(
        &[
            "sí".to_string(),
            "si".to_string(),
            "acepto".to_string(),
            "autorizo".to_string(),
        ],
        &[
            "no necesito nada más".to_string(),
            "eso es todo".to_string(),
        ],
    );
    let store: Arc<dyn SessionStore> = store;
    Arc::new(SessionManager::new(store, bridge, classifier))
}

/// Deterministic timeline for ordering-sensitive tests: `t(n)` is n seconds
/// past a fixed origin.
pub fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

pub fn text_event(user: &str, text: &str, at: DateTime<Utc>) -> InboundEvent {
    InboundEvent {
        channel: Channel::Whatsapp,
        user_external_id: user.to_string(),
        content: InboundContent::text(text),
        received_at: at,
    }
}

pub fn image_event(user: &str, image_ref: &str, at: DateTime<Utc>) -> InboundEvent {
    InboundEvent {
        channel: Channel::Whatsapp,
        user_external_id: user.to_string(),
        content: InboundContent::image(image_ref, None),
        received_at: at,
    }
}
