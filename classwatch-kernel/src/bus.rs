//! Named-event fan-out between the bridge and its consumers (views, chart
//! recorder, records sync).
//!
//! Emission is synchronous, in registration order, on the caller's task.
//! Handlers that fail or panic are logged and skipped; the others still run.
//! There is no replay for late subscribers.

use crate::models::{ConnectionState, TelemetryMap};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    SensorData,
    SensorValue,
    DeviceStatus,
    Heartbeat,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connection => "connection",
            EventKind::SensorData => "sensorData",
            EventKind::SensorValue => "sensorValue",
            EventKind::DeviceStatus => "deviceStatus",
            EventKind::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connection {
        status: ConnectionState,
    },
    /// Bulk update from `/{id}/data`; `data` holds only the fields of that message.
    SensorData {
        device_id: String,
        data: TelemetryMap,
    },
    /// Scalar update; `value` is the raw payload text.
    SensorValue {
        device_id: String,
        field: String,
        value: String,
    },
    DeviceStatus {
        device_id: String,
        component: String,
        status: String,
    },
    Heartbeat {
        device_id: String,
        timestamp: OffsetDateTime,
    },
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::Connection { .. } => EventKind::Connection,
            BridgeEvent::SensorData { .. } => EventKind::SensorData,
            BridgeEvent::SensorValue { .. } => EventKind::SensorValue,
            BridgeEvent::DeviceStatus { .. } => EventKind::DeviceStatus,
            BridgeEvent::Heartbeat { .. } => EventKind::Heartbeat,
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::Connection { .. } => None,
            BridgeEvent::SensorData { device_id, .. }
            | BridgeEvent::SensorValue { device_id, .. }
            | BridgeEvent::DeviceStatus { device_id, .. }
            | BridgeEvent::Heartbeat { device_id, .. } => Some(device_id),
        }
    }
}

pub type Handler = Arc<dyn Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl BusInner {
    fn remove(&self, kind: EventKind, id: u64) {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle to one registration. Its only capability is to remove it.
pub struct Subscription {
    bus: Weak<BusInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Removes this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.kind, self.id);
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind.name())
            .field("id", &self.id)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Invokes every handler registered for the event's kind and returns how
    /// many completed without error.
    pub fn emit(&self, event: &BridgeEvent) -> usize {
        let kind = event.kind();
        // copy out so handlers may (un)subscribe while we iterate
        let handlers: Vec<Handler> = match self.inner.handlers.lock().get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(event = kind.name(), "subscriber failed: {e:#}");
                }
                Err(_) => {
                    tracing::error!(event = kind.name(), "subscriber panicked");
                }
            }
        }
        delivered
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .lock()
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}
