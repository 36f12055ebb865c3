/**
 * MQTT - Connexion au broker des appareils
 *
 * RÔLE : Une seule connexion logique au broker, retry borné, événements
 * `connection` vers le bus via `DeviceBridge`.
 *
 * FONCTIONNEMENT :
 * - `ConnectionTracker` : machine d'état pure (disconnected/connecting/connected)
 *   + compteur de retry, testable sans réseau
 * - `MqttLink` : ce dont le bridge a besoin du client (publish/subscribe)
 * - `spawn_mqtt_listener` : boucle rumqttc qui pilote le bridge
 */

use crate::bridge::DeviceBridge;
use crate::config::{KernelConfig, MqttTransportKind, ReconnectConf};
use crate::error::BridgeError;
use crate::models::ConnectionState;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outbound side of the broker client.
///
/// Calls hand the request to the client and return; they never wait for the
/// broker and never queue for a later connection.
pub trait MqttLink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError>;
    fn subscribe(&self, filter: &str) -> Result<(), BridgeError>;
    fn disconnect(&self) -> Result<(), BridgeError>;
}

impl MqttLink for AsyncClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        self.try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        self.try_disconnect()
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub on_close: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConf::default())
    }
}

impl From<&ReconnectConf> for ReconnectPolicy {
    fn from(conf: &ReconnectConf) -> Self {
        Self {
            max_retries: conf.max_retries,
            delay: conf.delay(),
            on_close: conf.on_close,
        }
    }
}

/// Connection state plus the retry budget.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    retries: u32,
    total_reconnects: u32,
    /// Set by an operator disconnect, cleared by the next operator connect.
    manual_close: bool,
    policy: ReconnectPolicy,
}

impl ConnectionTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retries: 0,
            total_reconnects: 0,
            manual_close: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful connect.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn total_reconnects(&self) -> u32 {
        self.total_reconnects
    }

    pub fn is_manually_closed(&self) -> bool {
        self.manual_close
    }

    /// Returns false when already connected or connecting, or after an
    /// operator disconnect.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected || self.manual_close {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Operator-initiated connect: same as `begin_connect`, with a fresh retry budget.
    pub fn request_connect(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            self.manual_close = false;
        }
        let started = self.begin_connect();
        if started {
            self.retries = 0;
        }
        started
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.retries = 0;
    }

    /// Transport error. Returns the backoff delay if a retry is scheduled.
    pub fn on_error(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if self.manual_close {
            return None;
        }
        self.schedule_retry()
    }

    /// Clean close. Only retries when the policy asks for it.
    pub fn on_close(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if self.policy.on_close && !self.manual_close {
            self.schedule_retry()
        } else {
            None
        }
    }

    /// Explicit disconnect: never retried.
    pub fn on_disconnect_requested(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.manual_close = true;
    }

    fn schedule_retry(&mut self) -> Option<Duration> {
        if self.retries < self.policy.max_retries {
            self.retries += 1;
            self.total_reconnects += 1;
            Some(self.policy.delay)
        } else {
            None
        }
    }
}

/// Builds the rumqttc client and its event loop from the kernel config.
pub fn create_mqtt_client(cfg: &KernelConfig, client_id: &str) -> (AsyncClient, EventLoop) {
    let mqtt = &cfg.mqtt;
    let mut opts = match mqtt.transport {
        MqttTransportKind::Tcp => MqttOptions::new(client_id, &mqtt.host, mqtt.port),
        MqttTransportKind::Ws => {
            let url = format!("ws://{}:{}{}", mqtt.host, mqtt.port, mqtt.ws_path);
            let mut opts = MqttOptions::new(client_id, url, mqtt.port);
            opts.set_transport(rumqttc::Transport::Ws);
            opts
        }
    };
    opts.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    opts.set_clean_session(true);
    AsyncClient::new(opts, 64)
}

/// Maps one event-loop event onto the bridge. Returns the backoff to wait, if any.
///
/// Our own `Outgoing::Disconnect` is the echo of `DeviceBridge::disconnect`,
/// which already emitted `connection: disconnected`.
pub fn route_event(bridge: &DeviceBridge, event: Event) -> Option<Duration> {
    match event {
        Event::Incoming(Incoming::ConnAck(_)) => {
            bridge.handle_connected();
            None
        }
        Event::Incoming(Incoming::Publish(p)) => {
            bridge.handle_message(&p.topic, &p.payload);
            None
        }
        Event::Outgoing(Outgoing::Disconnect) if bridge.is_manually_closed() => {
            debug!("[mqtt] disconnect sent");
            None
        }
        Event::Incoming(Incoming::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
            bridge.handle_closed()
        }
        _ => None,
    }
}

/// Drives the broker event loop for the lifetime of the process.
///
/// All inbound handling runs on this one task, so a message is routed, stored
/// and fanned out before the next one is looked at.
pub fn spawn_mqtt_listener(bridge: DeviceBridge, mut eventloop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if bridge.state() == ConnectionState::Disconnected {
                debug!("[mqtt] idle, waiting for connect request");
                bridge.connect_requested().await;
                continue;
            }

            let backoff = match eventloop.poll().await {
                Ok(event) => route_event(&bridge, event),
                Err(e) => {
                    warn!("[mqtt] connection error: {e}");
                    bridge.handle_error(&e.to_string())
                }
            };

            if let Some(delay) = backoff {
                info!("[mqtt] reconnect in {}s (attempt {})", delay.as_secs(), bridge.retries());
                tokio::time::sleep(delay).await;
                bridge.resume_after_backoff();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    fn tracker() -> ConnectionTracker {
        ConnectionTracker::new(ReconnectPolicy::default())
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut t = tracker();
        assert!(t.begin_connect());
        assert!(!t.begin_connect());
        t.on_connected();
        assert!(!t.begin_connect());
        assert_eq!(t.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_retry_bound() {
        let mut t = tracker();
        t.begin_connect();
        let mut scheduled = 0;
        for _ in 0..6 {
            if let Some(delay) = t.on_error() {
                assert_eq!(delay, Duration::from_secs(5));
                scheduled += 1;
                t.begin_connect();
            }
        }
        assert_eq!(scheduled, 5);
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(t.on_error(), None);
    }

    #[test]
    fn test_success_resets_retry_budget() {
        let mut t = tracker();
        t.begin_connect();
        for _ in 0..4 {
            t.on_error();
            t.begin_connect();
        }
        t.on_connected();
        assert_eq!(t.retries(), 0);
        assert_eq!(t.total_reconnects(), 4);
        for _ in 0..5 {
            assert!(t.on_error().is_some());
            t.begin_connect();
        }
        assert!(t.on_error().is_none());
    }

    #[test]
    fn test_explicit_connect_restores_budget() {
        let mut t = tracker();
        t.begin_connect();
        while t.on_error().is_some() {
            t.begin_connect();
        }
        assert_eq!(t.retries(), 5);
        assert!(t.request_connect());
        assert_eq!(t.retries(), 0);
        assert!(t.on_error().is_some());
    }

    #[test]
    fn test_close_does_not_retry_by_default() {
        let mut t = tracker();
        t.begin_connect();
        t.on_connected();
        assert_eq!(t.on_close(), None);
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(t.retries(), 0);
    }

    #[test]
    fn test_close_retries_when_enabled() {
        let mut t = ConnectionTracker::new(ReconnectPolicy {
            on_close: true,
            ..ReconnectPolicy::default()
        });
        t.begin_connect();
        t.on_connected();
        assert_eq!(t.on_close(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_manual_disconnect_is_final() {
        let mut t = ConnectionTracker::new(ReconnectPolicy {
            on_close: true,
            ..ReconnectPolicy::default()
        });
        t.request_connect();
        t.on_connected();
        t.on_disconnect_requested();
        assert!(t.is_manually_closed());
        assert_eq!(t.on_close(), None);
        assert_eq!(t.on_error(), None);
        assert!(!t.begin_connect());
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(t.total_reconnects(), 0);
    }

    #[test]
    fn test_manual_disconnect_during_backoff_blocks_resume() {
        let mut t = tracker();
        t.request_connect();
        assert!(t.on_error().is_some());
        // operator disconnects while the listener sleeps
        t.on_disconnect_requested();
        assert!(!t.begin_connect());
        assert_eq!(t.state(), ConnectionState::Disconnected);

        assert!(t.request_connect());
        assert!(!t.is_manually_closed());
        assert_eq!(t.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_route_event_maps_broker_events() {
        let (bridge, link, _) = testing::bridge();
        bridge.connect();

        let connack = Event::Incoming(Incoming::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        assert_eq!(route_event(&bridge, connack), None);
        assert!(bridge.is_connected());
        assert!(!link.subscribed.lock().is_empty());

        let publish = Publish::new("/dev1/temperature", QoS::AtMostOnce, "21");
        route_event(&bridge, Event::Incoming(Incoming::Publish(publish)));
        assert_eq!(bridge.store().get("dev1").map(|r| r.data["temperature"].clone()), Some(serde_json::json!(21)));

        assert_eq!(route_event(&bridge, Event::Incoming(Incoming::Disconnect)), None);
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_route_event_ignores_own_disconnect_echo() {
        let (bridge, _, _) = testing::bridge();
        bridge.connect();
        bridge.handle_connected();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(0));
        let s = seen.clone();
        let _sub = bridge.bus().subscribe(crate::bus::EventKind::Connection, move |_| {
            *s.lock() += 1;
            Ok(())
        });

        bridge.disconnect();
        assert_eq!(route_event(&bridge, Event::Outgoing(Outgoing::Disconnect)), None);
        assert_eq!(*seen.lock(), 1);
        assert!(!bridge.resume_after_backoff());
    }
}
