//! Rolling sensor charts fed from `sensorData` events.

use crate::bus::{BridgeEvent, EventBus, EventKind, Subscription};
use crate::models::TelemetryMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;

pub const DEFAULT_CAPACITY: usize = 20;

/// Bulk telemetry fields plotted, in series order.
pub const CHART_FIELDS: [&str; 4] = ["temperature", "humidity", "lightLevel", "gasLevel"];

/// FIFO holding at most `capacity` items; the oldest is evicted first.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct RollingWindow<T> {
    #[serde(skip)]
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub field: &'static str,
    pub points: RollingWindow<Option<Value>>,
}

/// Four aligned series sharing one timestamp axis.
#[derive(Debug, Clone, Serialize)]
pub struct SensorChart {
    #[serde(serialize_with = "serialize_labels")]
    labels: RollingWindow<OffsetDateTime>,
    series: Vec<ChartSeries>,
    paused: bool,
}

fn serialize_labels<S>(labels: &RollingWindow<OffsetDateTime>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(labels.len()))?;
    for at in labels.iter() {
        let txt = at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        seq.serialize_element(&txt)?;
    }
    seq.end()
}

impl SensorChart {
    pub fn new(capacity: usize) -> Self {
        Self {
            labels: RollingWindow::new(capacity),
            series: CHART_FIELDS
                .into_iter()
                .map(|field| ChartSeries {
                    field,
                    points: RollingWindow::new(capacity),
                })
                .collect(),
            paused: false,
        }
    }

    /// Appends one sample per series, `None` where the field is absent.
    /// Returns false while paused.
    pub fn record(&mut self, data: &TelemetryMap, at: OffsetDateTime) -> bool {
        if self.paused {
            return false;
        }
        self.labels.push(at);
        for series in &mut self.series {
            series.points.push(data.get(series.field).cloned());
        }
        true
    }

    pub fn series(&self, field: &str) -> Option<&RollingWindow<Option<Value>>> {
        self.series
            .iter()
            .find(|s| s.field == field)
            .map(|s| &s.points)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Flips the pause flag and returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        for series in &mut self.series {
            series.points.clear();
        }
    }
}

/// One chart per device, kept current from the bus.
#[derive(Clone)]
pub struct ChartRecorder {
    capacity: usize,
    charts: Arc<Mutex<HashMap<String, SensorChart>>>,
}

impl ChartRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            charts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers on `sensorData`. Dropping the recorder does not unsubscribe;
    /// use the returned handle.
    pub fn attach(&self, bus: &EventBus) -> Subscription {
        let recorder = self.clone();
        bus.subscribe(EventKind::SensorData, move |event| {
            if let BridgeEvent::SensorData { device_id, data } = event {
                recorder.record(device_id, data, OffsetDateTime::now_utc());
            }
            Ok(())
        })
    }

    pub fn record(&self, device_id: &str, data: &TelemetryMap, at: OffsetDateTime) -> bool {
        self.charts
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| SensorChart::new(self.capacity))
            .record(data, at)
    }

    pub fn chart(&self, device_id: &str) -> Option<SensorChart> {
        self.charts.lock().get(device_id).cloned()
    }

    /// Returns the new pause flag, or `None` for an unknown device.
    pub fn toggle_pause(&self, device_id: &str) -> Option<bool> {
        self.charts.lock().get_mut(device_id).map(SensorChart::toggle_pause)
    }

    pub fn clear(&self, device_id: &str) -> bool {
        match self.charts.lock().get_mut(device_id) {
            Some(chart) => {
                chart.clear();
                true
            }
            None => false,
        }
    }
}
