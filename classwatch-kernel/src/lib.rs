//! Classwatch kernel: device liveness and command bridge between the device
//! broker and the classroom dashboard.

pub mod attendance;
pub mod bridge;
pub mod bus;
pub mod chart;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod http;
pub mod liveness;
pub mod models;
pub mod mqtt;
pub mod notify;
pub mod records;
pub mod router;
pub mod store;
pub mod view;

pub use bridge::{BridgeSettings, DeviceBridge};
pub use bus::{BridgeEvent, EventBus, EventKind, Subscription};
pub use commands::CommandDispatcher;
pub use error::{BridgeError, RecordsError};
pub use mqtt::MqttLink;
pub use store::DeviceStore;
