//! User-facing notifications (the dashboard's toasts).

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use time::OffsetDateTime;

/// Toasts kept for the front-end to poll.
pub const TOAST_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, level: ToastLevel, message: &str);

    fn info(&self, message: &str) {
        self.notify(ToastLevel::Info, message)
    }
    fn success(&self, message: &str) {
        self.notify(ToastLevel::Success, message)
    }
    fn warning(&self, message: &str) {
        self.notify(ToastLevel::Warning, message)
    }
    fn error(&self, message: &str) {
        self.notify(ToastLevel::Error, message)
    }
}

pub type SharedNotifier = Arc<dyn Notifier>;

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Bounded board of recent toasts, newest last. Every toast is also logged.
#[derive(Clone, Default)]
pub struct ToastBoard {
    toasts: Arc<Mutex<VecDeque<Toast>>>,
}

impl ToastBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self) -> Vec<Toast> {
        self.toasts.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.toasts.lock().clear();
    }
}

impl Notifier for ToastBoard {
    fn notify(&self, level: ToastLevel, message: &str) {
        match level {
            ToastLevel::Error => tracing::error!("[toast] {message}"),
            ToastLevel::Warning => tracing::warn!("[toast] {message}"),
            _ => tracing::info!("[toast] {message}"),
        }
        let mut toasts = self.toasts.lock();
        if toasts.len() == TOAST_HISTORY {
            toasts.pop_front();
        }
        toasts.push_back(Toast {
            level,
            message: message.to_string(),
            at: OffsetDateTime::now_utc(),
        });
    }
}
