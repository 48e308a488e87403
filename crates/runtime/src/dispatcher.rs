//! Event dispatcher: typed publish/subscribe for observers.
//!
//! `emit` validates the payload against the event type and enqueues the
//! event; a background worker delivers it to the subscribed handlers in
//! registration order. Handlers therefore never run inside the code that
//! emitted the event. Each handler call is bounded by a time limit, and a
//! failing, hung or panicking handler is logged without affecting the others.
//!
//! Emitting never waits: when the queue is full the event is rejected with
//! [`EventError::QueueFull`] rather than stalling the turn.
//!
//! Raw observers can also [`tap`](EventDispatcher::tap) the stream through a
//! broadcast channel.

use async_trait::async_trait;
use cadence_core::error::EventError;
use cadence_core::{Event, EventPayload, EventType};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::isolate::{Isolated, isolate};

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// A subscriber to one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HandlerMap = HashMap<EventType, Vec<Arc<dyn EventHandler>>>;

enum Envelope {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HandlerMap>>,
    queue: mpsc::Sender<Envelope>,
    tap: broadcast::Sender<Event>,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its delivery worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(queue_capacity: usize, tap_capacity: usize) -> Self {
        Self::with_handler_timeout(queue_capacity, tap_capacity, DEFAULT_HANDLER_TIMEOUT)
    }

    /// Like [`new`](Self::new), with an explicit limit per handler call.
    pub fn with_handler_timeout(
        queue_capacity: usize,
        tap_capacity: usize,
        handler_timeout: Duration,
    ) -> Self {
        let handlers: Arc<RwLock<HandlerMap>> = Arc::default();
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        tokio::spawn(deliver(rx, handlers.clone(), handler_timeout));
        Self {
            handlers,
            queue,
            tap,
        }
    }

    /// Register a handler for one event type. Handlers of the same type
    /// run in registration order.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type)
            .or_default()
            .push(handler);
        debug!(event = %event_type, "Handler subscribed");
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// A receiver of every event emitted from now on.
    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.tap.subscribe()
    }

    /// Validate and enqueue an event for delivery.
    ///
    /// Fails with [`EventError::QueueFull`] instead of waiting when the
    /// handlers have fallen behind.
    pub async fn emit(&self, event_type: EventType, payload: EventPayload) -> Result<(), EventError> {
        let event = Event::new(event_type, payload)?;
        // No tap receivers is fine.
        let _ = self.tap.send(event.clone());
        self.queue
            .try_send(Envelope::Event(event))
            .map_err(|e| match e {
                TrySendError::Full(_) => EventError::QueueFull,
                TrySendError::Closed(_) => EventError::Closed,
            })
    }

    /// Like [`emit`](Self::emit), but logs failures instead of returning them.
    pub async fn notify(&self, event_type: EventType, payload: EventPayload) {
        if let Err(e) = self.emit(event_type, payload).await {
            warn!(event = %event_type, error = %e, "Failed to emit event");
        }
    }

    /// Wait until every event emitted before this call has been delivered.
    pub async fn flush(&self) -> Result<(), EventError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(Envelope::Flush(tx))
            .await
            .map_err(|_| EventError::Closed)?;
        rx.await.map_err(|_| EventError::Closed)
    }
}

async fn deliver(
    mut rx: mpsc::Receiver<Envelope>,
    handlers: Arc<RwLock<HandlerMap>>,
    handler_timeout: Duration,
) {
    while let Some(envelope) = rx.recv().await {
        let event = match envelope {
            Envelope::Event(event) => event,
            Envelope::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        let subscribed: Vec<Arc<dyn EventHandler>> = handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        for handler in subscribed {
            match isolate(handler_timeout, handler.handle(&event)).await {
                Ok(()) => {}
                Err(Isolated::Failed(e)) => {
                    warn!(event = %event.event_type, error = %e, "Event handler failed")
                }
                Err(Isolated::TimedOut(limit)) => warn!(
                    event = %event.event_type,
                    limit_ms = limit.as_millis() as u64,
                    "Event handler timed out"
                ),
                Err(Isolated::Panicked(panic)) => warn!(
                    event = %event.event_type,
                    panic = %panic,
                    "Event handler panicked"
                ),
            }
        }
    }
    debug!("Event dispatcher worker stopped");
}
