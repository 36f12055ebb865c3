/*!
Test Harness pour le bridge Classwatch

Facilite l'écriture de tests avec:
- Un `DeviceBridge` complet branché sur `MockMqttClient`
- Simulation des messages appareils (data, scalaires, heartbeat, buzzer)
- Assertions sur les commandes publiées et les notifications
*/

use crate::mqtt_stub::{DeviceMessageBuilder, MockMqttClient};
use classwatch_kernel::bridge::BridgeSettings;
use classwatch_kernel::notify::{Notifier, ToastLevel};
use classwatch_kernel::{BridgeEvent, CommandDispatcher, DeviceBridge, DeviceStore, EventBus, EventKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::Result;

/// Notifier that keeps every toast for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<(ToastLevel, String)>>,
}

impl RecordingNotifier {
    pub fn toasts(&self) -> Vec<(ToastLevel, String)> {
        self.toasts.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(ToastLevel, String)> {
        self.toasts.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: ToastLevel, message: &str) {
        self.toasts.lock().unwrap().push((level, message.to_string()));
    }
}

/// Harness de test complet : bridge + mock client + recorder d'événements
pub struct TestHarness {
    pub mqtt_client: Arc<MockMqttClient>,
    pub bridge: DeviceBridge,
    pub commands: CommandDispatcher,
    pub notifier: Arc<RecordingNotifier>,
    events: Arc<Mutex<Vec<BridgeEvent>>>,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    /// Harness for the given device ids; not yet connected.
    pub fn new(device_ids: &[&str]) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let ids: Vec<String> = device_ids.iter().map(|s| s.to_string()).collect();
        let mqtt_client = Arc::new(MockMqttClient::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let bus = EventBus::new();
        let bridge = DeviceBridge::new(
            mqtt_client.clone(),
            BridgeSettings::for_devices("mock:1883", "web_client_harness", &ids),
            DeviceStore::new(),
            bus.clone(),
            notifier.clone(),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Connection,
            EventKind::SensorData,
            EventKind::SensorValue,
            EventKind::DeviceStatus,
            EventKind::Heartbeat,
        ] {
            let sink = events.clone();
            // recorder lives as long as the bus
            let _ = bus.subscribe(kind, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }

        Self {
            commands: CommandDispatcher::new(bridge.clone()),
            mqtt_client,
            bridge,
            notifier,
            events,
            expectations: Vec::new(),
        }
    }

    /// Connect request plus a simulated CONNACK.
    pub fn connected(self) -> Self {
        self.bridge.connect();
        self.bridge.handle_connected();
        log::info!("🔌 Harness connected");
        self
    }

    /// Ajoute une expectation: on s'attend à N messages publiés sur un topic
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub fn send_raw(&self, topic: &str, payload: &[u8]) -> Option<BridgeEvent> {
        log::info!("📨 Simulated incoming: {}", topic);
        self.bridge.handle_message(topic, payload)
    }

    pub fn send_data(&self, device_id: &str, data: &Value) -> Result<Option<BridgeEvent>> {
        let payload = serde_json::to_vec(data)?;
        Ok(self.send_raw(&DeviceMessageBuilder::data_topic(device_id), &payload))
    }

    pub fn send_scalar(&self, device_id: &str, field: &str, raw: &str) -> Option<BridgeEvent> {
        self.send_raw(&DeviceMessageBuilder::scalar_topic(device_id, field), raw.as_bytes())
    }

    pub fn send_heartbeat(&self, device_id: &str) -> Result<Option<BridgeEvent>> {
        let payload = serde_json::to_vec(&DeviceMessageBuilder::heartbeat(0))?;
        log::info!("💓 Sent heartbeat for device: {}", device_id);
        Ok(self.send_raw(&DeviceMessageBuilder::heartbeat_topic(device_id), &payload))
    }

    pub fn send_buzzer_status(&self, device_id: &str, status: &str) -> Option<BridgeEvent> {
        self.send_raw(&DeviceMessageBuilder::buzzer_status_topic(device_id), status.as_bytes())
    }

    /// Events seen on the bus, oldest first.
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<BridgeEvent> {
        self.events().into_iter().filter(|e| e.kind() == kind).collect()
    }

    /// Attend qu'un message soit publié sur un topic
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Option<String> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.find_messages_by_topic(topic).last() {
                log::info!("✅ Received expected message on {}", topic);
                return Some(msg.payload_text());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("⏰ Timeout waiting for message on {}", topic);
        None
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());

        for expectation in &self.expectations {
            let actual_count = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic, expectation.expected_count, actual_count
                );
            }
        }
        Ok(())
    }

    /// Assert qu'un payload précis a été publié sur le topic
    pub fn assert_message_sent(&self, topic: &str, expected_payload: &str) -> Result<()> {
        let found = self
            .mqtt_client
            .find_messages_by_topic(topic)
            .iter()
            .any(|msg| msg.payload_text() == expected_payload);
        if !found {
            anyhow::bail!("Expected '{}' not found on topic: {}", expected_payload, topic);
        }
        Ok(())
    }

    pub fn assert_nothing_published(&self) -> Result<()> {
        let sent = self.mqtt_client.get_published_messages();
        if !sent.is_empty() {
            anyhow::bail!("Expected no publish, got {} (first on {})", sent.len(), sent[0].topic);
        }
        Ok(())
    }

    /// Stats sur les messages collectés
    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.mqtt_client.get_subscriptions(),
            events: self.events.lock().unwrap().len(),
        }
    }

    /// Reset le harness pour un nouveau test (l'état du bridge est conservé)
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        self.events.lock().unwrap().clear();
        self.expectations.clear();
        log::info!("🧹 Test harness reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(&["ESP32_001"])
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
    pub events: usize,
}
