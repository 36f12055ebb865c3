//! View lifecycle: what a dashboard view registers, it releases on teardown.

use crate::bus::{BridgeEvent, EventBus, EventKind, Subscription};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owns the bus subscriptions and periodic tasks of one view.
#[derive(Default)]
pub struct ViewScope {
    name: String,
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl ViewScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe<F>(&mut self, bus: &EventBus, kind: EventKind, handler: F)
    where
        F: Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscriptions.push(bus.subscribe(kind, handler));
    }

    pub fn adopt(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Runs `tick` every `period` until teardown. Needs a tokio runtime.
    pub fn every<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tick().await;
            }
        }));
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn teardown(&mut self) {
        if self.subscriptions.is_empty() && self.tasks.is_empty() {
            return;
        }
        tracing::debug!(
            "[view] teardown {}: {} subscriptions, {} tasks",
            self.name,
            self.subscriptions.len(),
            self.tasks.len()
        );
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Open/closed flags for menus and modals, keyed by id. Closed unless opened.
#[derive(Debug, Default, Clone)]
pub struct PanelState {
    open: HashSet<String>,
}

impl PanelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, id: &str) {
        self.open.insert(id.to_string());
    }

    pub fn close(&mut self, id: &str) {
        self.open.remove(id);
    }

    /// Returns the new state.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.open.remove(id) {
            false
        } else {
            self.open.insert(id.to_string());
            true
        }
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains(id)
    }

    pub fn close_all(&mut self) {
        self.open.clear();
    }
}
