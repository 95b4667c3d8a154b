//! Retry wrapper over the Extraction Service.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{ExtractionError, ExtractionService, PatientData};

/// Adapter invoking the Extraction Service with bounded retry.
///
/// Only `UpstreamUnavailable` is retried; a rejected or unreadable image is
/// the user's to fix, not ours to hammer the upstream with.
#[derive(Clone)]
pub struct ExtractionBridge {
    service: Arc<dyn ExtractionService>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ExtractionBridge {
    pub fn new(service: Arc<dyn ExtractionService>, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            service,
            max_retries,
            retry_backoff,
        }
    }

    pub async fn extract(&self, image_ref: &str) -> Result<PatientData, ExtractionError> {
        let mut attempt = 0;
        loop {
            match self.service.extract(image_ref).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        image_ref = %image_ref,
                        attempt,
                        error = %e,
                        "extraction failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    /// Returns scripted results in order, then repeats the last behavior.
    struct Scripted {
        results: Mutex<Vec<Result<PatientData, ExtractionError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<Result<PatientData, ExtractionError>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExtractionService for Scripted {
        async fn extract(&self, _image_ref: &str) -> Result<PatientData, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(ExtractionError::UpstreamUnavailable("exhausted".to_string()))
            } else {
                results.remove(0)
            }
        }
    }

    fn identified() -> PatientData {
        PatientData {
            full_name: Some("María Pérez".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_once_after_transient_failure() {
        let service = Arc::new(Scripted::new(vec![
            Err(ExtractionError::UpstreamUnavailable("503".to_string())),
            Ok(identified()),
        ]));
        let bridge = ExtractionBridge::new(service.clone(), 1, Duration::from_millis(1));

        let data = bridge.extract("uploads/rx1").await.unwrap();
        assert_eq!(data.full_name.as_deref(), Some("María Pérez"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_when_retries_are_exhausted() {
        let service = Arc::new(Scripted::new(vec![
            Err(ExtractionError::UpstreamUnavailable("503".to_string())),
            Err(ExtractionError::UpstreamUnavailable("503".to_string())),
            Ok(identified()),
        ]));
        let bridge = ExtractionBridge::new(service.clone(), 1, Duration::from_millis(1));

        let result = bridge.extract("uploads/rx1").await;
        assert!(matches!(result, Err(ExtractionError::UpstreamUnavailable(_))));
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let service = Arc::new(Scripted::new(vec![Err(ExtractionError::NotAPrescription)]));
        let bridge = ExtractionBridge::new(service.clone(), 3, Duration::from_millis(1));

        let result = bridge.extract("uploads/selfie").await;
        assert!(matches!(result, Err(ExtractionError::NotAPrescription)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreadable_is_not_retried() {
        let service = Arc::new(Scripted::new(vec![Err(ExtractionError::Unreadable)]));
        let bridge = ExtractionBridge::new(service.clone(), 3, Duration::from_millis(1));

        let result = bridge.extract("uploads/blurry").await;
        assert!(matches!(result, Err(ExtractionError::Unreadable)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
