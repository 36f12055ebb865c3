use thiserror::Error;

/// Failures of the device bridge.
///
/// None of these are fatal to the process: each one ends the single operation
/// that produced it.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("MQTT not connected")]
    NotConnected,
    #[error("invalid buzzer action: {0}")]
    InvalidBuzzerAction(String),
    #[error("missing tone parameter: {0}")]
    MissingToneParameter(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },
}

impl BridgeError {
    /// True for errors raised before any network call was attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidBuzzerAction(_) | BridgeError::MissingToneParameter(_)
        )
    }
}

/// Errors of the file-backed records collaborator.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(String),
    #[error("records unavailable")]
    Unavailable,
}
