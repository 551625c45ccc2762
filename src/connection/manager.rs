//! Connection manager
//!
//! Owns one [`ProtocolConnection`] per configured instance. All sessions feed
//! a single bounded queue; a forwarder task drains it into whichever
//! [`EventSink`] is registered at the time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::ConnectionStatus;
use super::{ConnectionSettings, EventSink, ProtocolConnection, StopError};
use crate::config::InstanceConfig;
use crate::metrics::{DropStage, stats};
use crate::protocol::{Event, EventKind};

type SharedSink = Arc<RwLock<Option<Arc<dyn EventSink>>>>;

/// Errors from starting or stopping the manager
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no instances configured")]
    NoInstances,

    #[error("manager already started")]
    AlreadyStarted,

    #[error("no instance connected within {window:?}")]
    NoInstanceConnected { window: Duration },

    #[error("startup cancelled")]
    Cancelled,

    #[error("{} connection(s) did not stop cleanly", .failures.len())]
    Stop { failures: Vec<StopError> },
}

/// Manages the sessions with all configured instances
pub struct ConnectionManager {
    connections: Vec<Arc<ProtocolConnection>>,
    settings: ConnectionSettings,
    sink: SharedSink,
    connected: Arc<Notify>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Build a session per instance; nothing connects until [`start`](Self::start)
    pub fn new(
        instances: Vec<InstanceConfig>,
        settings: ConnectionSettings,
        events: &[EventKind],
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let connected = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(settings.queue_capacity.get());

        let connections = instances
            .into_iter()
            .map(|instance| {
                Arc::new(ProtocolConnection::new(
                    instance,
                    settings.clone(),
                    events,
                    tx.clone(),
                    Arc::clone(&connected),
                    cancel.child_token(),
                ))
            })
            .collect();

        Self {
            connections,
            settings,
            sink: Arc::new(RwLock::new(None)),
            connected,
            cancel,
            tx,
            rx: Mutex::new(Some(rx)),
            forwarder: Mutex::new(None),
        }
    }

    /// Register the downstream consumer, replacing any previous one
    pub fn set_event_forwarder(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Start every session and wait for the first one to connect
    ///
    /// Sessions are independent: one failing instance never blocks the
    /// others. If none connects within the startup window this returns
    /// [`ManagerError::NoInstanceConnected`] while all sessions keep retrying.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let rx = self.rx.lock().take().ok_or(ManagerError::AlreadyStarted)?;
        *self.forwarder.lock() = Some(tokio::spawn(forward(
            rx,
            Arc::clone(&self.sink),
            self.cancel.clone(),
        )));

        if self.connections.is_empty() {
            return Err(ManagerError::NoInstances);
        }

        let notified = self.connected.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        for connection in &self.connections {
            connection.start();
        }
        info!(instances = self.connections.len(), "Started event socket sessions");

        if self.connected_count() > 0 {
            return Ok(());
        }

        let window = self.settings.startup_window;
        tokio::select! {
            _ = &mut notified => Ok(()),
            _ = tokio::time::sleep(window) => {
                if self.connected_count() > 0 {
                    Ok(())
                } else {
                    Err(ManagerError::NoInstanceConnected { window })
                }
            }
            _ = self.cancel.cancelled() => Err(ManagerError::Cancelled),
        }
    }

    /// Snapshot of every session keyed by instance name
    #[must_use]
    pub fn status(&self) -> HashMap<String, ConnectionStatus> {
        self.connections
            .iter()
            .map(|c| (c.name().to_string(), c.status()))
            .collect()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.status().connected)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Stop all sessions concurrently, then drain the queue into the sink
    pub async fn stop(&self) -> Result<(), ManagerError> {
        let timeout = self.settings.stop_timeout;
        let mut set = JoinSet::new();
        for connection in &self.connections {
            let connection = Arc::clone(connection);
            set.spawn(async move { connection.stop(timeout).await });
        }

        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Connection stop failed");
                    failures.push(e);
                }
                Err(e) => failures.push(StopError::TaskFailed {
                    instance: "<unknown>".to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        self.cancel.cancel();
        let forwarder = self.forwarder.lock().take();
        if let Some(mut forwarder) = forwarder
            && tokio::time::timeout(timeout, &mut forwarder).await.is_err()
        {
            warn!("Event forwarder did not drain in time");
            forwarder.abort();
        }

        debug!(stopped = self.connections.len(), failed = failures.len(), "Connections stopped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Stop { failures })
        }
    }
}

/// Hand queued events to the sink until cancelled, then flush what is left
async fn forward(mut rx: mpsc::Receiver<Event>, sink: SharedSink, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => deliver(&sink, event),
                None => return,
            },
        }
    }
    while let Ok(event) = rx.try_recv() {
        deliver(&sink, event);
    }
}

fn deliver(sink: &SharedSink, event: Event) {
    let current = sink.read().clone();
    match current {
        Some(sink) => {
            sink.offer(event);
        }
        None => stats().event_dropped(DropStage::Manager, event.instance()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Delivery;
    use crate::protocol::Headers;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl EventSink for Collect {
        fn offer(&self, event: Event) -> Delivery {
            self.0.lock().push(event.name().to_string());
            Delivery::Accepted
        }
    }

    fn event(name: &str, instance: &str) -> Event {
        let headers: Headers = [("Event-Name", name), ("Unique-ID", "u1")]
            .into_iter()
            .collect();
        Event::new(instance, headers, None).unwrap()
    }

    #[tokio::test]
    async fn test_start_without_instances() {
        let cancel = CancellationToken::new();
        let manager =
            ConnectionManager::new(Vec::new(), ConnectionSettings::default(), &EventKind::ALL, &cancel);
        assert!(matches!(manager.start().await, Err(ManagerError::NoInstances)));
        assert!(matches!(manager.start().await, Err(ManagerError::AlreadyStarted)));
        assert!(manager.status().is_empty());
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarder_delivers_to_registered_sink() {
        let cancel = CancellationToken::new();
        let manager =
            ConnectionManager::new(Vec::new(), ConnectionSettings::default(), &EventKind::ALL, &cancel);
        let sink = Arc::new(Collect::default());
        manager.set_event_forwarder(sink.clone());
        let _ = manager.start().await;

        manager.tx.send(event("CHANNEL_CREATE", "mgr-fwd")).await.unwrap();
        manager.tx.send(event("CHANNEL_ANSWER", "mgr-fwd")).await.unwrap();
        manager.stop().await.unwrap();

        assert_eq!(*sink.0.lock(), vec!["CHANNEL_CREATE", "CHANNEL_ANSWER"]);
    }

    #[tokio::test]
    async fn test_events_without_sink_are_counted() {
        let cancel = CancellationToken::new();
        let manager =
            ConnectionManager::new(Vec::new(), ConnectionSettings::default(), &EventKind::ALL, &cancel);
        let _ = manager.start().await;

        manager.tx.send(event("CHANNEL_CREATE", "mgr-nosink")).await.unwrap();
        manager.stop().await.unwrap();

        assert_eq!(stats().events_dropped(DropStage::Manager, "mgr-nosink"), 1);
    }
}
