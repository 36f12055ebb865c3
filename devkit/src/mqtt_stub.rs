/*!
Mock MQTT Client pour développement sans broker

Implémente `MqttLink` du kernel : un `DeviceBridge` peut tourner dessus sans
broker réel. Enregistre publications et abonnements, peut simuler un client
hors service.
*/

use classwatch_kernel::{BridgeError, MqttLink};
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock MQTT Client, stand-in for rumqttc::AsyncClient behind `MqttLink`
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to failing mode: every request is refused like a dead client.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> std::result::Result<(), BridgeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("mock client offline".into()));
        }
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl MqttLink for MockMqttClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<(), BridgeError> {
        self.check()?;
        let message = MockMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().unwrap().push(message);
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> std::result::Result<(), BridgeError> {
        self.check()?;
        self.subscriptions.lock().unwrap().push(filter.to_string());
        log::info!("📥 [MOCK] Subscribed to {}", filter);
        Ok(())
    }

    fn disconnect(&self) -> std::result::Result<(), BridgeError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds payloads in the device wire format (ESP32 firmware topics).
pub struct DeviceMessageBuilder;

impl DeviceMessageBuilder {
    pub fn data_topic(device_id: &str) -> String {
        format!("/{device_id}/data")
    }

    pub fn scalar_topic(device_id: &str, field: &str) -> String {
        format!("/{device_id}/{field}")
    }

    pub fn heartbeat_topic(device_id: &str) -> String {
        format!("/{device_id}/heartbeat")
    }

    pub fn buzzer_status_topic(device_id: &str) -> String {
        format!("/{device_id}/buzzer/status")
    }

    /// Bulk reading as published on `/{id}/data`.
    pub fn sensor_data(temperature: f64, humidity: f64, light_level: u32, gas_level: u32) -> Value {
        serde_json::json!({
            "temperature": temperature,
            "humidity": humidity,
            "lightLevel": light_level,
            "gasLevel": gas_level,
        })
    }

    /// Heartbeat body; the bridge only looks at the topic.
    pub fn heartbeat(uptime_secs: u64) -> Value {
        serde_json::json!({
            "uptime": uptime_secs,
            "ts": chrono::Utc::now().to_rfc3339(),
        })
    }
}
