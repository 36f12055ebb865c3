use crate::bridge::DeviceBridge;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub devices_tracked: u32,
    pub devices_online: u32,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, bridge: &DeviceBridge) -> KernelHealth {
        let info = bridge.connection_info();
        let online = bridge.store().online_count(OffsetDateTime::now_utc());

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: info.state.to_string(),
            mqtt_reconnects: info.reconnects,
            devices_tracked: info.known_devices as u32,
            devices_online: online as u32,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::connected_bridge;

    #[test]
    fn test_health_reflects_bridge() {
        let (bridge, _, _) = connected_bridge();
        bridge.handle_message("/dev1/heartbeat", b"");
        bridge.handle_message("/dev2/temperature", b"21");

        let health = HealthTracker::new().get_health(&bridge);
        assert_eq!(health.mqtt_status, "connected");
        assert_eq!(health.devices_tracked, 2);
        assert_eq!(health.devices_online, 2);
        assert_eq!(health.mqtt_reconnects, 0);
    }
}
