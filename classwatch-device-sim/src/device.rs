//! Behaviour of one simulated sensor node, independent of the network.

use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub light_level: u32,
    pub gas_level: u32,
}

/// Outbound messages the device wants sent, as `(topic suffix, payload)`.
pub type Outbox = Vec<(String, String)>;

pub struct SimDevice {
    id: String,
    last: Reading,
    buzzer: String,
}

impl SimDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last: Reading {
                temperature: 24.0,
                humidity: 55.0,
                light_level: 60,
                gas_level: 5,
            },
            buzzer: "OFF".to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("/{}/{}", self.id, suffix)
    }

    pub fn buzzer_status(&self) -> &str {
        &self.buzzer
    }

    pub fn last_reading(&self) -> Reading {
        self.last
    }

    /// Small random walk from the previous reading, clamped to plausible ranges.
    pub fn next_reading<R: Rng>(&mut self, rng: &mut R) -> Reading {
        let r = &mut self.last;
        r.temperature = round1((r.temperature + rng.gen_range(-0.5..=0.5)).clamp(15.0, 40.0));
        r.humidity = round1((r.humidity + rng.gen_range(-2.0..=2.0)).clamp(20.0, 95.0));
        r.light_level = (r.light_level as i64 + rng.gen_range(-5..=5)).clamp(0, 100) as u32;
        r.gas_level = (r.gas_level as i64 + rng.gen_range(-2..=2)).clamp(0, 100) as u32;
        *r
    }

    /// Bulk message plus the four scalar topics.
    pub fn telemetry(&self, reading: &Reading) -> Outbox {
        let mut out = vec![(
            "data".to_string(),
            serde_json::to_string(reading).unwrap_or_default(),
        )];
        out.push(("temperature".into(), reading.temperature.to_string()));
        out.push(("humidity".into(), reading.humidity.to_string()));
        out.push(("light".into(), reading.light_level.to_string()));
        out.push(("gas".into(), reading.gas_level.to_string()));
        out
    }

    /// Applies a `/{id}/buzzer` payload. Returns the status token to report,
    /// or `None` when the payload is not understood.
    pub fn handle_buzzer(&mut self, payload: &str) -> Option<String> {
        let status = match payload {
            "ON" | "OFF" | "BEEP" | "ALARM" => payload.to_string(),
            tone if tone.starts_with("TONE:") => {
                let mut parts = tone.trim_end_matches(':').split(':').skip(1);
                let freq: u32 = parts.next()?.parse().ok()?;
                let dur: u32 = parts.next()?.parse().ok()?;
                tracing::debug!("[sim] tone {freq}Hz for {dur}ms");
                "TONE".to_string()
            }
            _ => return None,
        };
        self.buzzer = status.clone();
        Some(status)
    }

    /// Applies a `/{id}/command` payload.
    pub fn handle_command(&self, payload: &str) -> Outbox {
        match payload.trim() {
            "status" => {
                let mut out = self.telemetry(&self.last);
                out.push(("buzzer/status".into(), self.buzzer.clone()));
                out
            }
            _ => Vec::new(),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings_stay_in_range() {
        let mut dev = SimDevice::new("ESP32_001");
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let r = dev.next_reading(&mut rng);
            assert!((15.0..=40.0).contains(&r.temperature));
            assert!(r.light_level <= 100);
        }
    }

    #[test]
    fn test_telemetry_topics_and_shape() {
        let dev = SimDevice::new("ESP32_001");
        let out = dev.telemetry(&dev.last_reading());
        let topics: Vec<&str> = out.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["data", "temperature", "humidity", "light", "gas"]);
        let data: serde_json::Value = serde_json::from_str(&out[0].1).unwrap();
        assert_eq!(data["lightLevel"], 60);
        assert_eq!(data["gasLevel"], 5);
        assert_eq!(dev.topic("data"), "/ESP32_001/data");
    }

    #[test]
    fn test_buzzer_commands() {
        let mut dev = SimDevice::new("d");
        assert_eq!(dev.handle_buzzer("ALARM").as_deref(), Some("ALARM"));
        assert_eq!(dev.handle_buzzer("TONE:1000:250:").as_deref(), Some("TONE"));
        assert_eq!(dev.handle_buzzer("TONE:abc:250:"), None);
        assert_eq!(dev.handle_buzzer("on"), None);
        assert_eq!(dev.buzzer_status(), "TONE");
    }

    #[test]
    fn test_status_command_reports_everything() {
        let dev = SimDevice::new("d");
        let out = dev.handle_command("status");
        assert_eq!(out.len(), 6);
        assert_eq!(out.last().unwrap(), &("buzzer/status".to_string(), "OFF".to_string()));
        assert!(dev.handle_command("reboot").is_empty());
    }
}
