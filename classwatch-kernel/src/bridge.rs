//! The device bridge: connection manager, topic router, device store and
//! event bus wired together.
//!
//! Constructed once at start and handed to whoever needs it (HTTP surface,
//! command dispatcher, views). Cloning is cheap and shares everything.

use crate::bus::{BridgeEvent, EventBus};
use crate::error::BridgeError;
use crate::models::ConnectionState;
use crate::mqtt::{ConnectionTracker, MqttLink, ReconnectPolicy};
use crate::notify::SharedNotifier;
use crate::router;
use crate::store::DeviceStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Static settings of one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub broker: String,
    pub client_id: String,
    /// Filters subscribed after every successful connect.
    pub topics: Vec<String>,
    pub reconnect: ReconnectPolicy,
}

impl BridgeSettings {
    pub fn for_devices(broker: &str, client_id: &str, device_ids: &[String]) -> Self {
        Self {
            broker: broker.to_string(),
            client_id: client_id.to_string(),
            topics: router::subscription_topics(device_ids),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub state: ConnectionState,
    pub broker: String,
    pub client_id: String,
    pub known_devices: usize,
    pub reconnects: u32,
}

struct BridgeInner {
    link: Arc<dyn MqttLink>,
    tracker: Mutex<ConnectionTracker>,
    store: DeviceStore,
    bus: EventBus,
    notifier: SharedNotifier,
    settings: BridgeSettings,
    wake: Notify,
}

#[derive(Clone)]
pub struct DeviceBridge {
    inner: Arc<BridgeInner>,
}

impl DeviceBridge {
    pub fn new(
        link: Arc<dyn MqttLink>,
        settings: BridgeSettings,
        store: DeviceStore,
        bus: EventBus,
        notifier: SharedNotifier,
    ) -> Self {
        let tracker = ConnectionTracker::new(settings.reconnect.clone());
        Self {
            inner: Arc::new(BridgeInner {
                link,
                tracker: Mutex::new(tracker),
                store,
                bus,
                notifier,
                settings,
                wake: Notify::new(),
            }),
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn notifier(&self) -> &SharedNotifier {
        &self.inner.notifier
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.tracker.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True between an explicit `disconnect()` and the next `connect()`.
    pub fn is_manually_closed(&self) -> bool {
        self.inner.tracker.lock().is_manually_closed()
    }

    pub fn retries(&self) -> u32 {
        self.inner.tracker.lock().retries()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let (state, reconnects) = {
            let tracker = self.inner.tracker.lock();
            (tracker.state(), tracker.total_reconnects())
        };
        ConnectionInfo {
            connected: state == ConnectionState::Connected,
            state,
            broker: self.inner.settings.broker.clone(),
            client_id: self.inner.settings.client_id.clone(),
            known_devices: self.inner.store.len(),
            reconnects,
        }
    }

    /// Asks the listener to connect. No-op when connected or connecting.
    pub fn connect(&self) -> bool {
        let started = self.inner.tracker.lock().request_connect();
        if started {
            info!("[bridge] connecting to {}", self.inner.settings.broker);
            self.inner.wake.notify_one();
        }
        started
    }

    /// Resolves once `connect()` has been called while idle.
    pub async fn connect_requested(&self) {
        self.inner.wake.notified().await
    }

    /// Explicit close; never followed by an automatic retry.
    pub fn disconnect(&self) {
        if let Err(e) = self.inner.link.disconnect() {
            warn!("[bridge] disconnect failed: {e}");
        }
        self.inner.tracker.lock().on_disconnect_requested();
        self.emit_connection(ConnectionState::Disconnected);
    }

    pub fn handle_connected(&self) {
        self.inner.tracker.lock().on_connected();
        info!("[bridge] connected to {}", self.inner.settings.broker);

        for topic in &self.inner.settings.topics {
            if let Err(e) = self.inner.link.subscribe(topic) {
                warn!("[bridge] failed to subscribe to {topic}: {e}");
            }
        }

        self.inner.notifier.success("MQTT connected");
        self.emit_connection(ConnectionState::Connected);
    }

    /// Transport error. Returns the backoff to wait before `resume_after_backoff`.
    pub fn handle_error(&self, reason: &str) -> Option<Duration> {
        let (retry, manual) = {
            let mut tracker = self.inner.tracker.lock();
            (tracker.on_error(), tracker.is_manually_closed())
        };
        if manual {
            debug!("[bridge] transport error after disconnect: {reason}");
            return None;
        }
        self.emit_connection(ConnectionState::Disconnected);
        if retry.is_none() {
            warn!("[bridge] giving up after transport error: {reason}");
            self.inner.notifier.error("MQTT connection failed");
        }
        retry
    }

    pub fn handle_closed(&self) -> Option<Duration> {
        let (retry, manual) = {
            let mut tracker = self.inner.tracker.lock();
            (tracker.on_close(), tracker.is_manually_closed())
        };
        if manual {
            return None;
        }
        info!("[bridge] connection closed");
        self.emit_connection(ConnectionState::Disconnected);
        retry
    }

    /// Called once the backoff delay elapsed. Refused after an explicit disconnect.
    pub fn resume_after_backoff(&self) -> bool {
        self.inner.tracker.lock().begin_connect()
    }

    /// Routes one inbound message, updates the store and fans out the event.
    ///
    /// Malformed payloads and unknown topics are dropped here and return `None`.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<BridgeEvent> {
        let inbound = match router::decode(topic, payload) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                debug!("[bridge] ignoring topic {topic}");
                return None;
            }
            Err(e) => {
                warn!("[bridge] dropped message: {e}");
                return None;
            }
        };

        let now = OffsetDateTime::now_utc();
        self.inner
            .store
            .upsert_at(inbound.device_id(), inbound.telemetry(), now);
        let event = inbound.into_event(now);
        self.inner.bus.emit(&event);
        Some(event)
    }

    /// Best-effort publish. Fails immediately when not connected.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        if !self.is_connected() {
            self.inner.notifier.error("MQTT not connected");
            return Err(BridgeError::NotConnected);
        }
        self.inner.link.publish(topic, payload.as_bytes()).map_err(|e| {
            self.inner.notifier.error(&format!("Failed to send command: {e}"));
            e
        })
    }

    fn emit_connection(&self, status: ConnectionState) {
        self.inner.bus.emit(&BridgeEvent::Connection { status });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notify::{Notifier, ToastLevel};

    /// Link that records what the bridge hands it.
    #[derive(Default)]
    pub struct RecordingLink {
        pub published: Mutex<Vec<(String, String)>>,
        pub subscribed: Mutex<Vec<String>>,
        pub fail_publish: Mutex<bool>,
    }

    impl MqttLink for RecordingLink {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
            if *self.fail_publish.lock() {
                return Err(BridgeError::Transport("request channel closed".into()));
            }
            self.published
                .lock()
                .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
            Ok(())
        }

        fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
            self.subscribed.lock().push(filter.to_string());
            Ok(())
        }

        fn disconnect(&self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub toasts: Mutex<Vec<(ToastLevel, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, level: ToastLevel, message: &str) {
            self.toasts.lock().push((level, message.to_string()));
        }
    }

    pub fn bridge() -> (DeviceBridge, Arc<RecordingLink>, Arc<RecordingNotifier>) {
        let link = Arc::new(RecordingLink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = DeviceBridge::new(
            link.clone(),
            BridgeSettings::for_devices("localhost:1883", "web_client_test", &["dev1".to_string()]),
            DeviceStore::new(),
            EventBus::new(),
            notifier.clone(),
        );
        (bridge, link, notifier)
    }

    pub fn connected_bridge() -> (DeviceBridge, Arc<RecordingLink>, Arc<RecordingNotifier>) {
        let (bridge, link, notifier) = bridge();
        bridge.connect();
        bridge.handle_connected();
        (bridge, link, notifier)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::bus::EventKind;
    use crate::notify::ToastLevel;
    use serde_json::json;

    fn record_events(bridge: &DeviceBridge, kind: EventKind) -> Arc<Mutex<Vec<BridgeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        // the registration stays for the bus lifetime
        let _ = bridge.bus().subscribe(kind, move |e| {
            s.lock().push(e.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn test_connect_subscribes_and_emits() {
        let (bridge, link, notifier) = bridge();
        let events = record_events(&bridge, EventKind::Connection);

        assert!(bridge.connect());
        assert!(!bridge.connect());
        assert_eq!(bridge.state(), ConnectionState::Connecting);

        bridge.handle_connected();
        assert!(bridge.is_connected());
        assert!(link.subscribed.lock().contains(&"/+/heartbeat".to_string()));
        assert_eq!(
            *events.lock(),
            vec![BridgeEvent::Connection { status: ConnectionState::Connected }]
        );
        assert_eq!(notifier.toasts.lock()[0].0, ToastLevel::Success);
    }

    #[test]
    fn test_bulk_then_scalar_merges() {
        let (bridge, _, _) = connected_bridge();
        bridge.handle_message("/dev1/data", br#"{"temperature":22,"humidity":45}"#);
        bridge.handle_message("/dev1/humidity", b"50");

        let rec = bridge.store().get("dev1").unwrap();
        assert_eq!(
            serde_json::Value::Object(rec.data),
            json!({"temperature": 22, "humidity": 50})
        );
    }

    #[test]
    fn test_unknown_topic_has_no_effect() {
        let (bridge, _, _) = connected_bridge();
        let events = record_events(&bridge, EventKind::SensorData);
        assert!(bridge.handle_message("/dev1/unknown/thing", b"x").is_none());
        assert!(bridge.store().is_empty());
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_malformed_payload_dropped_without_affecting_others() {
        let (bridge, _, _) = connected_bridge();
        bridge.handle_message("/dev2/data", br#"{"temperature":19}"#);
        assert!(bridge.handle_message("/dev1/data", b"{broken").is_none());

        assert!(bridge.store().get("dev1").is_none());
        assert_eq!(bridge.store().get("dev2").unwrap().data["temperature"], json!(19));
        assert!(bridge.is_connected());
    }

    #[test]
    fn test_heartbeat_and_buzzer_status() {
        let (bridge, _, _) = connected_bridge();
        let beats = record_events(&bridge, EventKind::Heartbeat);
        let statuses = record_events(&bridge, EventKind::DeviceStatus);

        bridge.handle_message("/dev3/heartbeat", b"");
        bridge.handle_message("/dev3/buzzer/status", b"BEEP");

        assert_eq!(beats.lock().len(), 1);
        assert_eq!(
            statuses.lock()[0],
            BridgeEvent::DeviceStatus {
                device_id: "dev3".into(),
                component: "buzzer".into(),
                status: "BEEP".into(),
            }
        );
        assert_eq!(bridge.store().get("dev3").unwrap().data["buzzerStatus"], json!("BEEP"));
    }

    #[test]
    fn test_six_errors_schedule_five_retries() {
        let (bridge, _, notifier) = bridge();
        bridge.connect();
        let mut scheduled = 0;
        for _ in 0..6 {
            if bridge.handle_error("connection refused").is_some() {
                scheduled += 1;
                bridge.resume_after_backoff();
            }
        }
        assert_eq!(scheduled, 5);
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        let toasts = notifier.toasts.lock();
        assert_eq!(toasts.last().unwrap(), &(ToastLevel::Error, "MQTT connection failed".to_string()));
    }

    #[test]
    fn test_close_emits_disconnected_without_retry() {
        let (bridge, _, _) = connected_bridge();
        let events = record_events(&bridge, EventKind::Connection);
        assert_eq!(bridge.handle_closed(), None);
        assert_eq!(
            *events.lock(),
            vec![BridgeEvent::Connection { status: ConnectionState::Disconnected }]
        );
    }

    #[test]
    fn test_explicit_disconnect_is_final_even_when_close_retries() {
        let (_, link, notifier) = bridge();
        let mut settings =
            BridgeSettings::for_devices("localhost:1883", "web_client_test", &["dev1".to_string()]);
        settings.reconnect.on_close = true;
        let bridge = DeviceBridge::new(
            link,
            settings,
            DeviceStore::new(),
            EventBus::new(),
            notifier,
        );
        bridge.connect();
        bridge.handle_connected();
        let events = record_events(&bridge, EventKind::Connection);

        bridge.disconnect();
        // the listener sees our own DISCONNECT packet go out
        assert_eq!(bridge.handle_closed(), None);
        assert_eq!(bridge.handle_error("connection reset"), None);
        assert!(!bridge.resume_after_backoff());
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
        assert_eq!(
            *events.lock(),
            vec![BridgeEvent::Connection { status: ConnectionState::Disconnected }]
        );

        assert!(bridge.connect());
        assert!(!bridge.is_manually_closed());
    }

    #[test]
    fn test_disconnect_during_backoff_stops_resume() {
        let (bridge, _, _) = connected_bridge();
        assert!(bridge.handle_error("connection refused").is_some());
        bridge.disconnect();
        assert!(!bridge.resume_after_backoff());
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_publish_requires_connection() {
        let (bridge, link, notifier) = bridge();
        let err = bridge.publish("/dev1/buzzer", "ON").unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        assert!(link.published.lock().is_empty());
        assert_eq!(notifier.toasts.lock()[0].1, "MQTT not connected");
    }

    #[test]
    fn test_publish_failure_is_reported_not_raised_further() {
        let (bridge, link, notifier) = connected_bridge();
        *link.fail_publish.lock() = true;
        assert!(bridge.publish("/dev1/buzzer", "ON").is_err());
        assert!(bridge.is_connected());
        assert_eq!(notifier.toasts.lock().last().unwrap().0, ToastLevel::Error);
    }

    #[test]
    fn test_connection_info() {
        let (bridge, _, _) = connected_bridge();
        bridge.handle_message("/dev1/heartbeat", b"");
        let info = bridge.connection_info();
        assert!(info.connected);
        assert_eq!(info.known_devices, 1);
        assert_eq!(info.client_id, "web_client_test");
    }
}
