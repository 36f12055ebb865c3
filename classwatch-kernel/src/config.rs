use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    /// Device ids whose topics are subscribed on every connect.
    pub devices: Vec<String>,
    pub reconnect: ReconnectConf,
    pub http: HttpConf,
    pub records: RecordsConf,
    pub chart: ChartConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransportKind {
    Tcp,
    Ws,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_prefix: String,
    pub keep_alive_secs: u64,
    pub transport: MqttTransportKind,
    pub ws_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConf {
    pub max_retries: u32,
    pub delay_secs: u64,
    /// Also retry after a clean close, not only after transport errors.
    pub on_close: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecordsConf {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChartConf {
    pub capacity: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".into(),
            port: 1883,
            client_prefix: "web_client_".into(),
            keep_alive_secs: 60,
            transport: MqttTransportKind::Tcp,
            ws_path: "/mqtt".into(),
        }
    }
}

impl MqttConf {
    /// `host:port` as shown to operators.
    pub fn broker_label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Prefix followed by 8 random hex chars.
    pub fn fresh_client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_prefix, &suffix[..8])
    }
}

impl Default for ReconnectConf {
    fn default() -> Self {
        Self { max_retries: 5, delay_secs: 5, on_close: false }
    }
}

impl ReconnectConf {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for RecordsConf {
    fn default() -> Self {
        Self { path: "./data/records.json".into() }
    }
}

impl Default for ChartConf {
    fn default() -> Self {
        Self { capacity: crate::chart::DEFAULT_CAPACITY }
    }
}

impl KernelConfig {
    /// Configured device ids, or the single factory device when none are set.
    pub fn device_ids(&self) -> Vec<String> {
        if self.devices.is_empty() {
            vec!["ESP32_001".to_string()]
        } else {
            self.devices.clone()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CLASSWATCH_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("CLASSWATCH_MQTT_PORT") {
            match port.parse() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => warn!("[config] invalid CLASSWATCH_MQTT_PORT: {port}"),
            }
        }
        if let Ok(bind) = std::env::var("CLASSWATCH_HTTP_BIND") {
            self.http.bind = bind;
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CLASSWATCH_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("[config] invalid config ({path}): {e}");
            KernelConfig::default()
        })
    } else {
        info!("[config] no {path}, using default config");
        KernelConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.reconnect.max_retries, 5);
        assert_eq!(cfg.reconnect.delay(), Duration::from_secs(5));
        assert!(!cfg.reconnect.on_close);
        assert_eq!(cfg.device_ids(), vec!["ESP32_001".to_string()]);
        assert_eq!(cfg.chart.capacity, 20);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = parse_config(
            "mqtt:\n  host: 10.0.0.5\n  transport: ws\ndevices: [ESP32_001, ESP32_002]\nreconnect:\n  on_close: true\n",
        )
        .unwrap();
        assert_eq!(cfg.mqtt.host, "10.0.0.5");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.transport, MqttTransportKind::Ws);
        assert_eq!(cfg.device_ids().len(), 2);
        assert!(cfg.reconnect.on_close);
        assert_eq!(cfg.reconnect.max_retries, 5);
    }

    #[test]
    fn test_empty_and_invalid_yaml() {
        assert_eq!(parse_config("   \n").unwrap().mqtt.host, "broker.hivemq.com");
        assert!(parse_config("mqtt: [not, a, map]").is_err());
    }

    #[test]
    fn test_client_id_shape() {
        let mqtt = MqttConf::default();
        let id = mqtt.fresh_client_id();
        assert!(id.starts_with("web_client_"));
        assert_eq!(id.len(), "web_client_".len() + 8);
        assert_ne!(id, mqtt.fresh_client_id());
    }
}
