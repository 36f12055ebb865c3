//! Outbound device commands.
//!
//! Everything here is fire-and-forget: `Ok` means the message was handed to
//! the broker client, not that the device executed it.

use crate::bridge::DeviceBridge;
use crate::error::BridgeError;
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub fn buzzer_topic(device_id: &str) -> String {
    format!("/{device_id}/buzzer")
}

pub fn command_topic(device_id: &str) -> String {
    format!("/{device_id}/command")
}

pub const STATUS_REQUEST: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerAction {
    On,
    Off,
    Beep,
    Alarm,
}

impl BuzzerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuzzerAction::On => "ON",
            BuzzerAction::Off => "OFF",
            BuzzerAction::Beep => "BEEP",
            BuzzerAction::Alarm => "ALARM",
        }
    }
}

impl fmt::Display for BuzzerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuzzerAction {
    type Err = BridgeError;

    /// Exact, case-sensitive match on the wire tokens.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(BuzzerAction::On),
            "OFF" => Ok(BuzzerAction::Off),
            "BEEP" => Ok(BuzzerAction::Beep),
            "ALARM" => Ok(BuzzerAction::Alarm),
            other => Err(BridgeError::InvalidBuzzerAction(other.to_string())),
        }
    }
}

/// `TONE:{freq}:{duration}:`
pub fn tone_payload(frequency_hz: u32, duration_ms: u32) -> String {
    format!("TONE:{frequency_hz}:{duration_ms}:")
}

#[derive(Clone)]
pub struct CommandDispatcher {
    bridge: DeviceBridge,
}

impl CommandDispatcher {
    pub fn new(bridge: DeviceBridge) -> Self {
        Self { bridge }
    }

    /// Validates `action` before anything reaches the network.
    pub fn control_buzzer(&self, device_id: &str, action: &str) -> Result<(), BridgeError> {
        let action = action.parse::<BuzzerAction>().map_err(|e| {
            self.bridge.notifier().error("Invalid buzzer command");
            e
        })?;
        self.send(device_id, buzzer_topic(device_id), action.as_str(), "buzzer")
    }

    /// Both values must be present; ranges are the caller's business.
    pub fn send_tone(
        &self,
        device_id: &str,
        frequency_hz: Option<u32>,
        duration_ms: Option<u32>,
    ) -> Result<(), BridgeError> {
        let (frequency_hz, duration_ms) = match (frequency_hz, duration_ms) {
            (Some(f), Some(d)) => (f, d),
            (f, _) => {
                self.bridge.notifier().warning("Please enter frequency and duration");
                let missing = if f.is_none() { "frequency" } else { "duration" };
                return Err(BridgeError::MissingToneParameter(missing));
            }
        };
        self.send(
            device_id,
            buzzer_topic(device_id),
            &tone_payload(frequency_hz, duration_ms),
            "buzzer",
        )
    }

    pub fn request_status(&self, device_id: &str) -> Result<(), BridgeError> {
        self.send(device_id, command_topic(device_id), STATUS_REQUEST, "command")
    }

    /// A short beep used to locate a device.
    pub fn ping(&self, device_id: &str) -> Result<(), BridgeError> {
        self.control_buzzer(device_id, BuzzerAction::Beep.as_str())?;
        self.bridge.notifier().info("Ping sent to device");
        Ok(())
    }

    /// Requests status from every id; returns how many were handed off.
    pub fn scan(&self, device_ids: &[String]) -> usize {
        self.bridge.notifier().info("Scanning for devices...");
        device_ids
            .iter()
            .filter(|id| self.request_status(id).is_ok())
            .count()
    }

    fn send(&self, device_id: &str, topic: String, payload: &str, command: &str) -> Result<(), BridgeError> {
        self.bridge.publish(&topic, payload)?;
        info!("[commands] sent {payload} to {device_id} on {topic}");
        self.bridge.notifier().success(&format!("Command sent: {command}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{bridge, connected_bridge};
    use crate::notify::ToastLevel;

    #[test]
    fn test_invalid_action_never_publishes() {
        let (bridge, link, notifier) = connected_bridge();
        let commands = CommandDispatcher::new(bridge);

        let err = commands.control_buzzer("id", "INVALID").unwrap_err();
        assert!(err.is_rejection());
        assert!(link.published.lock().is_empty());
        assert_eq!(
            notifier.toasts.lock().last().unwrap(),
            &(ToastLevel::Error, "Invalid buzzer command".to_string())
        );
    }

    #[test]
    fn test_valid_action_publishes_once() {
        let (bridge, link, _) = connected_bridge();
        let commands = CommandDispatcher::new(bridge);

        commands.control_buzzer("id", "ON").unwrap();
        assert_eq!(*link.published.lock(), vec![("/id/buzzer".to_string(), "ON".to_string())]);
    }

    #[test]
    fn test_actions_are_case_sensitive() {
        assert!("on".parse::<BuzzerAction>().is_err());
        assert_eq!("ALARM".parse::<BuzzerAction>().unwrap(), BuzzerAction::Alarm);
    }

    #[test]
    fn test_tone_payload_and_missing_parameters() {
        let (bridge, link, notifier) = connected_bridge();
        let commands = CommandDispatcher::new(bridge);

        commands.send_tone("dev1", Some(1000), Some(250)).unwrap();
        assert_eq!(
            link.published.lock()[0],
            ("/dev1/buzzer".to_string(), "TONE:1000:250:".to_string())
        );

        let err = commands.send_tone("dev1", Some(1000), None).unwrap_err();
        assert!(matches!(err, BridgeError::MissingToneParameter("duration")));
        let err = commands.send_tone("dev1", None, None).unwrap_err();
        assert!(matches!(err, BridgeError::MissingToneParameter("frequency")));
        assert_eq!(link.published.lock().len(), 1);
        assert_eq!(notifier.toasts.lock().last().unwrap().0, ToastLevel::Warning);
    }

    #[test]
    fn test_status_request_and_scan() {
        let (bridge, link, _) = connected_bridge();
        let commands = CommandDispatcher::new(bridge);

        commands.request_status("dev1").unwrap();
        let sent = commands.scan(&["a".to_string(), "b".to_string()]);
        assert_eq!(sent, 2);
        let topics: Vec<String> = link.published.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(topics, vec!["/dev1/command", "/a/command", "/b/command"]);
        assert!(link.published.lock().iter().all(|(_, p)| p == "status"));
    }

    #[test]
    fn test_commands_fail_when_disconnected() {
        let (bridge, link, _) = bridge();
        let commands = CommandDispatcher::new(bridge);
        assert!(matches!(commands.ping("dev1"), Err(BridgeError::NotConnected)));
        assert_eq!(commands.scan(&["dev1".to_string()]), 0);
        assert!(link.published.lock().is_empty());
    }
}
