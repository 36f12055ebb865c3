//! Topic routing for the device wire format.
//!
//! Inbound topics look like `/{deviceId}/{kind}` (leading empty segment).
//! Anything that does not match one of the known shapes is ignored.

use crate::bus::BridgeEvent;
use crate::error::BridgeError;
use crate::models::{number_value, TelemetryMap};
use serde_json::Value;
use time::OffsetDateTime;

/// Scalar telemetry kinds; the kind name is also the stored field name.
pub const SCALAR_FIELDS: [&str; 4] = ["temperature", "humidity", "light", "gas"];

pub const HEARTBEAT_FILTER: &str = "/+/heartbeat";

/// Field under which the buzzer status token is stored.
pub const BUZZER_STATUS_FIELD: &str = "buzzerStatus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Data,
    Scalar(&'static str),
    BuzzerStatus,
    Heartbeat,
}

/// Decoded inbound message, ready for the store and the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Bulk {
        device_id: String,
        data: TelemetryMap,
    },
    Scalar {
        device_id: String,
        field: &'static str,
        value: Value,
        raw: String,
    },
    BuzzerStatus {
        device_id: String,
        status: String,
    },
    Heartbeat {
        device_id: String,
    },
}

impl Inbound {
    pub fn device_id(&self) -> &str {
        match self {
            Inbound::Bulk { device_id, .. }
            | Inbound::Scalar { device_id, .. }
            | Inbound::BuzzerStatus { device_id, .. }
            | Inbound::Heartbeat { device_id } => device_id,
        }
    }

    /// Fields this message contributes to the device record.
    pub fn telemetry(&self) -> TelemetryMap {
        let mut out = TelemetryMap::new();
        match self {
            Inbound::Bulk { data, .. } => out = data.clone(),
            Inbound::Scalar { field, value, .. } => {
                out.insert((*field).to_string(), value.clone());
            }
            Inbound::BuzzerStatus { status, .. } => {
                out.insert(BUZZER_STATUS_FIELD.to_string(), Value::String(status.clone()));
            }
            Inbound::Heartbeat { .. } => {}
        }
        out
    }

    pub fn into_event(self, now: OffsetDateTime) -> BridgeEvent {
        match self {
            Inbound::Bulk { device_id, data } => BridgeEvent::SensorData { device_id, data },
            Inbound::Scalar { device_id, field, raw, .. } => BridgeEvent::SensorValue {
                device_id,
                field: field.to_string(),
                value: raw,
            },
            Inbound::BuzzerStatus { device_id, status } => BridgeEvent::DeviceStatus {
                device_id,
                component: "buzzer".to_string(),
                status,
            },
            Inbound::Heartbeat { device_id } => BridgeEvent::Heartbeat {
                device_id,
                timestamp: now,
            },
        }
    }
}

/// Splits a topic into `(deviceId, kind)`, or `None` for unknown shapes.
pub fn classify(topic: &str) -> Option<(&str, TopicKind)> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 3 || !parts[0].is_empty() {
        return None;
    }
    let device_id = parts[1];
    if device_id.is_empty() || device_id == "+" || device_id == "#" {
        return None;
    }

    let kind = match (parts.len(), parts[2]) {
        (3, "data") => TopicKind::Data,
        (3, "heartbeat") => TopicKind::Heartbeat,
        (3, kind) => TopicKind::Scalar(SCALAR_FIELDS.into_iter().find(|f| *f == kind)?),
        (4, "buzzer") if parts[3] == "status" => TopicKind::BuzzerStatus,
        _ => return None,
    };
    Some((device_id, kind))
}

/// Decodes one broker message.
///
/// `Ok(None)` means the topic is not ours; `Err` means the payload was
/// malformed and the message must be dropped.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Option<Inbound>, BridgeError> {
    let Some((device_id, kind)) = classify(topic) else {
        return Ok(None);
    };
    let malformed = |reason: String| BridgeError::MalformedPayload {
        topic: topic.to_string(),
        reason,
    };
    let text = std::str::from_utf8(payload).map_err(|e| malformed(e.to_string()))?;
    let device_id = device_id.to_string();

    let inbound = match kind {
        TopicKind::Data => {
            let trimmed = text.trim_start();
            if !trimmed.starts_with('{') {
                return Err(malformed("bulk telemetry is not an object".into()));
            }
            match serde_json::from_str::<Value>(trimmed).map_err(|e| malformed(e.to_string()))? {
                Value::Object(mut data) => {
                    normalize_numbers(&mut data);
                    Inbound::Bulk { device_id, data }
                }
                _ => return Err(malformed("bulk telemetry is not an object".into())),
            }
        }
        TopicKind::Scalar(field) => Inbound::Scalar {
            device_id,
            field,
            value: scalar_value(text),
            raw: text.to_string(),
        },
        TopicKind::BuzzerStatus => Inbound::BuzzerStatus {
            device_id,
            status: text.to_string(),
        },
        TopicKind::Heartbeat => Inbound::Heartbeat { device_id },
    };
    Ok(Some(inbound))
}

/// Integral floats (`51.0`) become integers, matching scalar updates.
fn normalize_numbers(data: &mut TelemetryMap) {
    for value in data.values_mut() {
        if let Some(f) = value.as_f64().filter(|_| value.is_f64()) {
            *value = number_value(f);
        }
    }
}

/// Leading decimal number of `text`, so `"22.5C"` reads as 22.5.
/// Anything without a leading number stays the raw string.
fn scalar_value(text: &str) -> Value {
    match numeric_prefix(text.trim_start()).and_then(|n| n.parse::<f64>().ok()) {
        Some(v) if v.is_finite() => number_value(v),
        _ => Value::String(text.to_string()),
    }
}

/// `[+-]digits[.digits][(e|E)[+-]digits]`, at least one mantissa digit.
fn numeric_prefix(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    Some(&text[..end])
}

/// Topic filters subscribed after every successful connect.
pub fn subscription_topics(device_ids: &[String]) -> Vec<String> {
    let mut topics = Vec::with_capacity(device_ids.len() * 7 + 1);
    for id in device_ids {
        topics.push(format!("/{id}/+"));
        topics.push(format!("/{id}/data"));
        for field in SCALAR_FIELDS {
            topics.push(format!("/{id}/{field}"));
        }
        topics.push(format!("/{id}/buzzer/status"));
    }
    topics.push(HEARTBEAT_FILTER.to_string());
    topics
}
