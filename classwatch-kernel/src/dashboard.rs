//! Read models served to the dashboard front-end.

use crate::attendance::{self, AttendanceOverview};
use crate::liveness;
use crate::models::{DeviceRecord, DeviceStatus, TelemetryMap};
use crate::records::{RecordsSource, SensorSnapshot};
use crate::store::DeviceStore;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub status: DeviceStatus,
    pub last_update: String,
    pub age_seconds: i64,
    pub data: TelemetryMap,
}

pub fn to_view(record: &DeviceRecord, now: OffsetDateTime) -> DeviceView {
    DeviceView {
        id: record.id.clone(),
        status: liveness::status_at(record, now),
        last_update: record.last_update.format(&Rfc3339).unwrap_or_default(),
        age_seconds: (now - record.last_update).whole_seconds().max(0),
        data: record.data.clone(),
    }
}

/// All devices, sorted by id.
pub fn device_views(store: &DeviceStore, now: OffsetDateTime) -> Vec<DeviceView> {
    store.list().iter().map(|r| to_view(r, now)).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceCounts {
    pub total: usize,
    pub online: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub date: String,
    pub devices: DeviceCounts,
    pub attendance: AttendanceOverview,
    pub latest_data: Option<SensorSnapshot>,
}

pub fn compose(
    store: &DeviceStore,
    records: &dyn RecordsSource,
    date: &str,
    now: OffsetDateTime,
) -> DashboardSummary {
    let students = records.students();
    let marks = records.attendance_by_date(date);
    DashboardSummary {
        date: date.to_string(),
        devices: DeviceCounts {
            total: store.len(),
            online: store.online_count(now),
        },
        attendance: attendance::overview(&students, &marks),
        latest_data: records.latest_sensor_snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NoRecords;
    use serde_json::json;
    use time::Duration;

    #[test]
    fn test_views_compute_status() {
        let store = DeviceStore::new();
        let t0 = OffsetDateTime::now_utc();
        store.upsert_at("b", json!({"temperature": 20}).as_object().cloned().unwrap(), t0);
        store.upsert_at("a", TelemetryMap::new(), t0 - Duration::seconds(45));

        let views = device_views(&store, t0 + Duration::seconds(10));
        assert_eq!(views[0].id, "a");
        assert_eq!(views[0].status, DeviceStatus::Offline);
        assert_eq!(views[0].age_seconds, 55);
        assert_eq!(views[1].status, DeviceStatus::Online);
        assert_eq!(views[1].data["temperature"], json!(20));
    }

    #[test]
    fn test_compose_without_records() {
        let store = DeviceStore::new();
        let now = OffsetDateTime::now_utc();
        store.upsert_at("a", TelemetryMap::new(), now);
        let summary = compose(&store, &NoRecords, "2024-05-01", now);
        assert_eq!(summary.devices.total, 1);
        assert_eq!(summary.devices.online, 1);
        assert_eq!(summary.attendance.total, 0);
        assert!(summary.latest_data.is_none());
    }
}
