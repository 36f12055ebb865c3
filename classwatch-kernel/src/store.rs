/**
 * DEVICE STORE - Dernier état connu de chaque appareil
 *
 * Source unique de vérité pour la télémétrie des appareils vus sur le broker.
 * Fusion champ par champ (last-write-wins), jamais d'effacement.
 * Le statut online/offline n'est pas stocké : il est recalculé à la lecture
 * via `liveness`.
 */

use crate::liveness;
use crate::models::{DeviceRecord, TelemetryMap};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone, Default)]
pub struct DeviceStore {
    devices: Arc<Mutex<HashMap<String, DeviceRecord>>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `partial` into the device's data and stamps it as seen now.
    pub fn upsert(&self, device_id: &str, partial: TelemetryMap) -> DeviceRecord {
        self.upsert_at(device_id, partial, OffsetDateTime::now_utc())
    }

    pub fn upsert_at(&self, device_id: &str, partial: TelemetryMap, now: OffsetDateTime) -> DeviceRecord {
        let mut devices = self.devices.lock();
        let record = devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                tracing::info!(device_id, "new device seen");
                DeviceRecord {
                    id: device_id.to_string(),
                    first_seen: now,
                    last_update: now,
                    data: TelemetryMap::new(),
                }
            });

        for (key, value) in partial {
            record.data.insert(key, value);
        }
        record.last_update = now;
        record.clone()
    }

    /// Refreshes `last_update` only (heartbeats).
    pub fn touch(&self, device_id: &str) -> DeviceRecord {
        self.upsert(device_id, TelemetryMap::new())
    }

    /// Snapshot copy; mutating it never affects the store.
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.lock().get(device_id).cloned()
    }

    /// All devices, sorted by id.
    pub fn list(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.lock().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn online_count(&self, now: OffsetDateTime) -> usize {
        let devices = self.devices.lock();
        liveness::count_online(devices.values(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use time::Duration;

    fn partial(v: serde_json::Value) -> TelemetryMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_is_keywise_last_write_wins() {
        let store = DeviceStore::new();
        store.upsert("dev1", partial(json!({"temperature": 20, "humidity": 40})));
        store.upsert("dev1", partial(json!({"temperature": 21})));
        store.upsert("dev1", partial(json!({"gasLevel": 3})));
        store.upsert("dev1", partial(json!({"humidity": 41, "temperature": 22})));

        let rec = store.get("dev1").unwrap();
        assert_eq!(
            serde_json::Value::Object(rec.data),
            json!({"temperature": 22, "humidity": 41, "gasLevel": 3})
        );
    }

    #[test]
    fn test_keys_never_written_are_absent() {
        let store = DeviceStore::new();
        store.upsert("dev1", partial(json!({"temperature": 20})));
        let rec = store.get("dev1").unwrap();
        assert!(!rec.data.contains_key("humidity"));
        assert_eq!(rec.data.len(), 1);
    }

    #[test]
    fn test_upsert_creates_and_stamps() {
        let store = DeviceStore::new();
        let t0 = datetime!(2024-05-01 08:00:00 UTC);
        let t1 = t0 + Duration::seconds(12);

        let created = store.upsert_at("dev9", TelemetryMap::new(), t0);
        assert_eq!(created.first_seen, t0);
        assert!(created.data.is_empty());

        let updated = store.upsert_at("dev9", partial(json!({"light": 70})), t1);
        assert_eq!(updated.first_seen, t0);
        assert_eq!(updated.last_update, t1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_returns_snapshot() {
        let store = DeviceStore::new();
        store.upsert("dev1", partial(json!({"temperature": 20})));
        let mut snapshot = store.get("dev1").unwrap();
        snapshot.data.insert("temperature".into(), json!(99));
        assert_eq!(store.get("dev1").unwrap().data["temperature"], json!(20));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_list_sorted_and_online_count() {
        let store = DeviceStore::new();
        let now = datetime!(2024-05-01 08:00:00 UTC);
        store.upsert_at("b", TelemetryMap::new(), now - Duration::seconds(5));
        store.upsert_at("a", TelemetryMap::new(), now - Duration::seconds(45));
        store.upsert_at("c", TelemetryMap::new(), now);

        let ids: Vec<String> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.online_count(now), 2);
    }
}
