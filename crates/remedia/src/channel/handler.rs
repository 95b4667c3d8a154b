//! Bridges dispatcher events to the session manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use remedia_channel_protocol::{InboundEvent, OutboundDirective};

use crate::session::SessionManager;

use super::dispatcher::EventHandler;

/// Routes every inbound event through the session manager and maps session
/// errors onto directives the adapter can render.
pub struct SessionEventHandler {
    manager: Arc<SessionManager>,
}

impl SessionEventHandler {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for SessionEventHandler {
    async fn handle_event(&self, adapter: &str, event: &InboundEvent) -> OutboundDirective {
        match self.manager.handle_event(event).await {
            Ok(directive) => directive,
            Err(e) if e.is_transient() => {
                warn!(
                    adapter = %adapter,
                    user = %event.user_external_id,
                    error = %e,
                    "transient failure handling event"
                );
                OutboundDirective::TransientError
            }
            Err(e) => {
                error!(
                    adapter = %adapter,
                    user = %event.user_external_id,
                    error = %e,
                    "session failure handling event"
                );
                OutboundDirective::TransientError
            }
        }
    }
}
