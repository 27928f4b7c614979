//! WebSocket tool-update listener.
//!
//! Maintains a single client connection to the tool host's update endpoint
//! and forwards install/update/uninstall frames to the runtime, which
//! triggers forced registry refreshes.  Frames are idempotent; an
//! in-process cache keeps the latest state per tool.  Reconnects use
//! exponential backoff with a cap; persistent failure raises a
//! high-severity event and the listener bows out, leaving the registry on
//! its poll cadence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use conductor_health::{ErrorCategory, ErrorEvent, ErrorSeverity, HealthLedger};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A tool lifecycle event from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolHostEvent {
    ToolInstalled {
        tool_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    ToolUpdated {
        tool_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    ToolUninstalled {
        tool_id: String,
    },
}

impl ToolHostEvent {
    /// The tool this event concerns.
    pub fn tool_id(&self) -> &str {
        match self {
            Self::ToolInstalled { tool_id, .. }
            | Self::ToolUpdated { tool_id, .. }
            | Self::ToolUninstalled { tool_id } => tool_id,
        }
    }
}

/// Parse one wire frame.  Unknown frame types yield `None` and are skipped.
pub fn parse_frame(text: &str) -> Option<ToolHostEvent> {
    match serde_json::from_str::<ToolHostEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable tool-host frame");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Tunables for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Initial reconnect delay; doubles per attempt.
    pub initial_backoff: Duration,

    /// Backoff ceiling.
    pub max_backoff: Duration,

    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Reconnect delay for the given attempt (0-based), doubling from the
/// initial backoff up to the cap.
pub fn backoff_delay(config: &ListenerConfig, attempt: u32) -> Duration {
    let doubled = config
        .initial_backoff
        .checked_mul(1u32 << attempt.min(16))
        .unwrap_or(config.max_backoff);
    doubled.min(config.max_backoff)
}

/// The WebSocket tool-update listener.
pub struct UpdateListener {
    url: String,
    events: mpsc::Sender<ToolHostEvent>,
    ledger: Arc<HealthLedger>,
    cache: Mutex<HashMap<String, ToolHostEvent>>,
    config: ListenerConfig,
}

impl UpdateListener {
    /// Create a listener for the given `ws://` endpoint; events are
    /// forwarded through `events`.
    pub fn new(
        url: impl Into<String>,
        events: mpsc::Sender<ToolHostEvent>,
        ledger: Arc<HealthLedger>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            url: url.into(),
            events,
            ledger,
            cache: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Latest known state per tool, from received frames.
    pub fn cached_tools(&self) -> Vec<ToolHostEvent> {
        self.cache
            .lock()
            .expect("listener lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Ingest one event: update the cache and forward it.
    ///
    /// Frames are idempotent; replaying the latest frame for a tool is
    /// harmless.
    pub async fn ingest(&self, event: ToolHostEvent) {
        {
            let mut cache = self.cache.lock().expect("listener lock poisoned");
            match &event {
                ToolHostEvent::ToolUninstalled { tool_id } => {
                    cache.remove(tool_id);
                }
                other => {
                    cache.insert(other.tool_id().to_owned(), other.clone());
                }
            }
        }

        tracing::info!(tool_id = event.tool_id(), "tool-host event received");
        if self.events.send(event).await.is_err() {
            tracing::warn!("tool-host event receiver dropped");
        }
    }

    /// Drive the connection until shutdown or the attempt limit.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((stream, _response)) => {
                    tracing::info!(url = %self.url, "tool-host update stream connected");
                    attempt = 0;

                    let (_write, mut read) = stream.split();
                    loop {
                        tokio::select! {
                            frame = read.next() => {
                                match frame {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Some(event) = parse_frame(&text) {
                                            self.ingest(event).await;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        tracing::warn!("tool-host update stream closed");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        tracing::warn!(error = %e, "tool-host update stream error");
                                        break;
                                    }
                                }
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    tracing::info!("update listener stopping");
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, attempt, "tool-host connection failed");
                }
            }

            attempt += 1;
            if attempt >= self.config.max_attempts {
                // Persistent failure is surfaced but never fatal: the
                // registry keeps operating on its poll cadence.
                let event = ErrorEvent::new(
                    "listener",
                    "WebSocketError",
                    format!(
                        "tool-host update stream unavailable after {} attempts",
                        self.config.max_attempts
                    ),
                    ErrorSeverity::High,
                    ErrorCategory::Network,
                );
                self.ledger.record_event(&event);
                tracing::error!(
                    attempts = self.config.max_attempts,
                    "update listener giving up; registry falls back to polling"
                );
                return;
            }

            let delay = backoff_delay(&self.config, attempt - 1);
            tracing::info!(delay = ?delay, attempt, "update listener reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_health::LedgerConfig;

    fn listener() -> (Arc<UpdateListener>, mpsc::Receiver<ToolHostEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let listener = Arc::new(UpdateListener::new(
            "ws://localhost:9999/updates",
            tx,
            Arc::new(HealthLedger::new(LedgerConfig::default())),
            ListenerConfig::default(),
        ));
        (listener, rx)
    }

    #[test]
    fn frame_parsing() {
        let event = parse_frame(
            r#"{"type": "tool_installed", "tool_id": "pdf-tools", "name": "PDF tools"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ToolHostEvent::ToolInstalled {
                tool_id: "pdf-tools".to_owned(),
                name: Some("PDF tools".to_owned()),
                endpoint: None,
            }
        );

        let event = parse_frame(r#"{"type": "tool_uninstalled", "tool_id": "pdf-tools"}"#).unwrap();
        assert_eq!(event.tool_id(), "pdf-tools");

        assert!(parse_frame(r#"{"type": "heartbeat"}"#).is_none());
        assert!(parse_frame("not json").is_none());
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = ListenerConfig::default();
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(60));
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn ingest_updates_cache_and_forwards() {
        let (listener, mut rx) = listener();

        let install = ToolHostEvent::ToolInstalled {
            tool_id: "pdf-tools".to_owned(),
            name: None,
            endpoint: Some("http://localhost:8200".to_owned()),
        };
        listener.ingest(install.clone()).await;

        assert_eq!(rx.recv().await, Some(install));
        assert_eq!(listener.cached_tools().len(), 1);

        // Idempotent: replaying the same frame leaves one cache entry.
        listener
            .ingest(ToolHostEvent::ToolInstalled {
                tool_id: "pdf-tools".to_owned(),
                name: None,
                endpoint: Some("http://localhost:8200".to_owned()),
            })
            .await;
        assert_eq!(listener.cached_tools().len(), 1);

        listener
            .ingest(ToolHostEvent::ToolUninstalled {
                tool_id: "pdf-tools".to_owned(),
            })
            .await;
        assert!(listener.cached_tools().is_empty());
    }
}
