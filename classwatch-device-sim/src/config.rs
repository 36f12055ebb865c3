//! Simulator configuration, read from the environment.

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub device_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device_id: "ESP32_001".to_string(),
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl SimConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(id) = lookup("SIM_DEVICE_ID").filter(|id| !id.is_empty()) {
            cfg.device_id = id;
        }
        if let Some(host) = lookup("SIM_BROKER_HOST") {
            cfg.broker_host = host;
        }
        if let Some(port) = lookup("SIM_BROKER_PORT") {
            cfg.broker_port = port
                .parse()
                .with_context(|| format!("invalid SIM_BROKER_PORT: {port}"))?;
        }
        if let Some(secs) = lookup("SIM_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid SIM_INTERVAL_SECS: {secs}"))?;
            cfg.interval = Duration::from_secs(secs.max(1));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = SimConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.device_id, "ESP32_001");
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = SimConfig::from_lookup(lookup(&[
            ("SIM_DEVICE_ID", "ESP32_007"),
            ("SIM_BROKER_HOST", "localhost"),
            ("SIM_BROKER_PORT", "1884"),
            ("SIM_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.device_id, "ESP32_007");
        assert_eq!(cfg.broker_port, 1884);
        assert_eq!(cfg.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_port_is_an_error() {
        assert!(SimConfig::from_lookup(lookup(&[("SIM_BROKER_PORT", "mqtt")])).is_err());
    }
}
