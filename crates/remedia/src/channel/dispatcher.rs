//! The Channel Dispatcher.
//!
//! Thin boundary between the session core and channel adapters: adapters
//! register and get a command/event channel pair, inbound events are handed
//! to the registered handler, and the resulting directive is delivered back
//! through the adapter that owns the user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use remedia_channel_protocol::{ChannelCommand, ChannelEvent, InboundEvent, OutboundDirective};

/// Default timeout for handler execution per event.
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Event Handler
// ============================================================================

/// Consumer of normalized inbound events.
///
/// The dispatcher calls this for every `EventReceived`; the returned
/// directive is delivered back through the originating adapter. Handlers are
/// infallible at this boundary — failures surface as a directive.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, adapter: &str, event: &InboundEvent) -> OutboundDirective;
}

// ============================================================================
// Channel Dispatcher
// ============================================================================

/// Handle for communicating with a registered adapter.
pub struct AdapterHandle {
    /// Adapter name (e.g. "whatsapp", "telegram").
    pub name: String,
    /// Channel to send commands to the adapter.
    pub command_tx: mpsc::Sender<ChannelCommand>,
}

struct DispatcherInner {
    adapters: HashMap<String, AdapterHandle>,
    handler: Option<Arc<dyn EventHandler>>,
    handler_timeout: Duration,
    /// JoinHandles for event pump tasks, awaited at shutdown.
    pump_handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Registry and router for channel adapters.
#[derive(Clone)]
pub struct ChannelDispatcher {
    inner: Arc<RwLock<DispatcherInner>>,
}

impl ChannelDispatcher {
    /// Events are handled concurrently across adapters and users; per-pair
    /// ordering is the session manager's responsibility, not the
    /// dispatcher's.
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DispatcherInner {
                adapters: HashMap::new(),
                handler: None,
                handler_timeout,
                pump_handles: Vec::new(),
            })),
        }
    }

    /// Set the handler for incoming events.
    pub async fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut inner = self.inner.write().await;
        inner.handler = Some(handler);
    }

    /// Register an adapter and get its communication channels.
    ///
    /// Returns:
    /// - `Receiver<ChannelCommand>`: the adapter receives commands here
    /// - `Sender<ChannelEvent>`: the adapter sends events here
    pub async fn register(
        &self,
        name: impl Into<String>,
    ) -> (mpsc::Receiver<ChannelCommand>, mpsc::Sender<ChannelEvent>) {
        let name = name.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        let (evt_tx, evt_rx) = mpsc::channel(100);

        {
            let mut inner = self.inner.write().await;
            inner.adapters.insert(
                name.clone(),
                AdapterHandle {
                    name: name.clone(),
                    command_tx: cmd_tx,
                },
            );
        }

        let dispatcher = self.clone();
        let adapter_name = name.clone();
        let handle = tokio::spawn(async move {
            dispatcher.pump_events(adapter_name, evt_rx).await;
        });

        {
            let mut inner = self.inner.write().await;
            inner.pump_handles.push(handle);
        }

        info!(adapter = %name, "channel adapter registered");
        (cmd_rx, evt_tx)
    }

    /// Unregister an adapter.
    pub async fn unregister(&self, name: &str) {
        let mut inner = self.inner.write().await;
        if inner.adapters.remove(name).is_some() {
            info!(adapter = %name, "channel adapter unregistered");
        }
    }

    /// List registered adapter names.
    pub async fn list(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.adapters.keys().cloned().collect()
    }

    /// Deliver a directive to a user through an adapter.
    pub async fn deliver(
        &self,
        adapter: &str,
        user_external_id: &str,
        directive: OutboundDirective,
    ) -> Result<(), DispatchError> {
        let tx = {
            let inner = self.inner.read().await;
            inner.adapters.get(adapter).map(|h| h.command_tx.clone())
        };

        let Some(tx) = tx else {
            warn!(adapter = %adapter, "adapter not registered");
            return Err(DispatchError::UnknownAdapter(adapter.to_string()));
        };

        let command = ChannelCommand::DeliverDirective {
            request_id: ulid::Ulid::new().to_string(),
            user_external_id: user_external_id.to_string(),
            directive,
        };

        tx.send(command)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Shut down all adapters and wait for in-flight handlers.
    pub async fn shutdown(&self) {
        let adapters = {
            let inner = self.inner.read().await;
            inner
                .adapters
                .iter()
                .map(|(k, v)| (k.clone(), v.command_tx.clone()))
                .collect::<Vec<_>>()
        };

        for (name, tx) in adapters {
            debug!(adapter = %name, "sending shutdown to adapter");
            let _ = tx.send(ChannelCommand::Shutdown).await;
        }

        let handles = {
            let mut inner = self.inner.write().await;
            std::mem::take(&mut inner.pump_handles)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Consume events from one adapter until its channel closes.
    async fn pump_events(&self, adapter: String, mut rx: mpsc::Receiver<ChannelEvent>) {
        let mut inflight = tokio::task::JoinSet::new();

        while let Some(event) = rx.recv().await {
            // Reap completed handler tasks
            while inflight.try_join_next().is_some() {}

            match event {
                ChannelEvent::Ready { channel, version } => {
                    info!(
                        adapter = %adapter,
                        channel = %channel,
                        version = %version,
                        "adapter ready"
                    );
                }

                ChannelEvent::EventReceived(data) => {
                    debug!(
                        adapter = %adapter,
                        channel = %data.channel,
                        user = %data.user_external_id,
                        "inbound event received"
                    );

                    let (handler, handler_timeout) = {
                        let inner = self.inner.read().await;
                        (inner.handler.clone(), inner.handler_timeout)
                    };

                    let Some(handler) = handler else {
                        warn!(adapter = %adapter, "no event handler registered");
                        continue;
                    };

                    let dispatcher = self.clone();
                    let adapter = adapter.clone();
                    inflight.spawn(async move {
                        // Failure blast radius is one (channel, user) pair:
                        // whatever happens here, only this event's reply is
                        // affected.
                        let directive = match tokio::time::timeout(
                            handler_timeout,
                            handler.handle_event(&adapter, &data),
                        )
                        .await
                        {
                            Ok(directive) => directive,
                            Err(_elapsed) => {
                                warn!(
                                    adapter = %adapter,
                                    user = %data.user_external_id,
                                    timeout_secs = handler_timeout.as_secs(),
                                    "event handler timed out"
                                );
                                OutboundDirective::TransientError
                            }
                        };

                        if let Err(e) = dispatcher
                            .deliver(&adapter, &data.user_external_id, directive)
                            .await
                        {
                            error!(
                                adapter = %adapter,
                                user = %data.user_external_id,
                                error = %e,
                                "failed to deliver directive"
                            );
                        }
                    });
                }

                ChannelEvent::Error {
                    code,
                    message,
                    fatal,
                } => {
                    if fatal {
                        error!(adapter = %adapter, code = %code, message = %message, "fatal adapter error");
                        self.unregister(&adapter).await;
                    } else {
                        warn!(adapter = %adapter, code = %code, message = %message, "adapter error");
                    }
                }

                ChannelEvent::Shutdown { reason } => {
                    info!(adapter = %adapter, reason = %reason, "adapter shutdown");
                    self.unregister(&adapter).await;
                    break;
                }
            }
        }

        // Wait for in-flight handlers to complete
        while inflight.join_next().await.is_some() {}

        debug!(adapter = %adapter, "event pump stopped");
    }
}

impl Default for ChannelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TIMEOUT)
    }
}

/// Error delivering a command to an adapter.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("adapter not registered: {0}")]
    UnknownAdapter(String),

    #[error("adapter channel closed")]
    ChannelClosed,
}
