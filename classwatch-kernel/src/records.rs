/**
 * RECORDS - Élèves, présences et dernier relevé capteurs
 *
 * RÔLE : Source de données "temps réel" du dashboard, hors broker.
 *
 * FONCTIONNEMENT :
 * - `RecordsSource` : lecture élèves / présences par date / dernier relevé
 * - `JsonRecords` : un seul document JSON chargé au démarrage, réécrit
 *   après chaque écriture (cache mémoire + fichier)
 * - Lectures indisponibles => résultats vides, jamais d'erreur
 * - `persist_snapshots` : écriture du dernier relevé dans une tâche à part,
 *   jamais sur la boucle MQTT (rafales fusionnées, seul le plus récent compte)
 *
 * DONNÉES :
 * ```json
 * {
 *   "students":   { "S01": { "id": "S01", "name": "An", "class": "10A" } },
 *   "attendance": { "2024-05-01": { "S01": { "student_id": "S01", "class": "10A", "status": "present" } } },
 *   "latest_data": { "temperature": 22, "saved_at": "2024-05-01T08:00:00Z" }
 * }
 * ```
 */

use crate::bus::{BridgeEvent, EventBus, EventKind, Subscription};
use crate::error::RecordsError;
use crate::models::TelemetryMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "class", default)]
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Any other column of the source row.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    #[serde(rename = "class", default)]
    pub class_name: String,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    #[serde(flatten)]
    pub data: TelemetryMap,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
}

/// `YYYY-MM-DD`, the key attendance is filed under.
pub fn date_key(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

pub fn parse_date_key(key: &str) -> Option<Date> {
    Date::parse(key, format_description!("[year]-[month]-[day]")).ok()
}

pub fn today_key() -> String {
    date_key(OffsetDateTime::now_utc().date())
}

pub trait RecordsSource: Send + Sync {
    fn students(&self) -> Vec<Student>;
    fn attendance_by_date(&self, date: &str) -> Vec<AttendanceRecord>;
    fn save_sensor_snapshot(&self, data: &TelemetryMap) -> Result<(), RecordsError>;
    fn latest_sensor_snapshot(&self) -> Option<SensorSnapshot>;
    /// Imports students from CSV text with a header row. Rows without an `id`
    /// are skipped. Returns how many students were written.
    fn import_students_csv(&self, text: &str) -> Result<usize, RecordsError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RecordsDocument {
    students: BTreeMap<String, Student>,
    attendance: BTreeMap<String, BTreeMap<String, AttendanceRecord>>,
    latest_data: Option<SensorSnapshot>,
}

/// File-backed records: one JSON document, cached in memory.
pub struct JsonRecords {
    path: PathBuf,
    doc: Mutex<RecordsDocument>,
}

impl JsonRecords {
    /// Loads the document, creating an empty one when the file is missing.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, RecordsError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let doc = if path.exists() {
            let txt = fs::read_to_string(&path)?;
            if txt.trim().is_empty() {
                RecordsDocument::default()
            } else {
                serde_json::from_str(&txt)?
            }
        } else {
            RecordsDocument::default()
        };
        let records = Self { path, doc: Mutex::new(doc) };
        records.save()?;
        info!("[records] loaded {:?} ({} students)", records.path, records.students().len());
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), RecordsError> {
        let json = serde_json::to_string_pretty(&*self.doc.lock())?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn record_attendance(&self, date: &str, record: AttendanceRecord) -> Result<(), RecordsError> {
        if parse_date_key(date).is_none() {
            return Err(RecordsError::Csv(format!("invalid date key: {date}")));
        }
        self.doc
            .lock()
            .attendance
            .entry(date.to_string())
            .or_default()
            .insert(record.student_id.clone(), record);
        self.save()
    }
}

impl RecordsSource for JsonRecords {
    fn students(&self) -> Vec<Student> {
        self.doc.lock().students.values().cloned().collect()
    }

    fn attendance_by_date(&self, date: &str) -> Vec<AttendanceRecord> {
        self.doc
            .lock()
            .attendance
            .get(date)
            .map(|day| day.values().cloned().collect())
            .unwrap_or_default()
    }

    fn save_sensor_snapshot(&self, data: &TelemetryMap) -> Result<(), RecordsError> {
        self.doc.lock().latest_data = Some(SensorSnapshot {
            data: data.clone(),
            saved_at: OffsetDateTime::now_utc(),
        });
        self.save()
    }

    fn latest_sensor_snapshot(&self) -> Option<SensorSnapshot> {
        self.doc.lock().latest_data.clone()
    }

    fn import_students_csv(&self, text: &str) -> Result<usize, RecordsError> {
        let students = parse_students_csv(text)?;
        let count = students.len();
        {
            let mut doc = self.doc.lock();
            for student in students {
                doc.students.insert(student.id.clone(), student);
            }
        }
        self.save()?;
        info!("[records] imported {count} students");
        Ok(count)
    }
}

/// Stand-in used when the records file cannot be opened.
pub struct NoRecords;

impl RecordsSource for NoRecords {
    fn students(&self) -> Vec<Student> {
        Vec::new()
    }

    fn attendance_by_date(&self, _date: &str) -> Vec<AttendanceRecord> {
        Vec::new()
    }

    fn save_sensor_snapshot(&self, _data: &TelemetryMap) -> Result<(), RecordsError> {
        Ok(())
    }

    fn latest_sensor_snapshot(&self) -> Option<SensorSnapshot> {
        None
    }

    fn import_students_csv(&self, _text: &str) -> Result<usize, RecordsError> {
        Err(RecordsError::Unavailable)
    }
}

/// Writes every bulk update as the latest sensor snapshot.
/// Saves bulk telemetry as the latest snapshot, off the emitting task.
pub struct SnapshotWriter {
    subscription: Subscription,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    pub fn stop(self) {
        self.subscription.unsubscribe();
        self.task.abort();
    }
}

/// Must be called inside a tokio runtime.
pub fn persist_snapshots(bus: &EventBus, records: Arc<dyn RecordsSource>) -> SnapshotWriter {
    let (tx, mut rx) = watch::channel::<Option<TelemetryMap>>(None);

    let task = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let latest = rx.borrow_and_update().clone();
            let Some(data) = latest else {
                continue;
            };
            let records = records.clone();
            match tokio::task::spawn_blocking(move || records.save_sensor_snapshot(&data)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("[records] snapshot not saved: {e}"),
                Err(e) => warn!("[records] snapshot writer failed: {e}"),
            }
        }
    });

    let subscription = bus.subscribe(EventKind::SensorData, move |event| {
        if let BridgeEvent::SensorData { data, .. } = event {
            tx.send_replace(Some(data.clone()));
        }
        Ok(())
    });

    SnapshotWriter { subscription, task }
}

/// Comma separated, values trimmed, missing trailing cells read as "".
pub fn parse_students_csv(text: &str) -> Result<Vec<Student>, RecordsError> {
    let mut lines = text.trim().lines();
    let headers: Vec<&str> = match lines.next() {
        Some(h) if !h.trim().is_empty() => h.split(',').map(str::trim).collect(),
        _ => return Err(RecordsError::Csv("missing header row".into())),
    };
    if !headers.contains(&"id") {
        return Err(RecordsError::Csv("header has no `id` column".into()));
    }

    let mut students = Vec::new();
    for (n, line) in lines.enumerate() {
        let values: Vec<&str> = line.split(',').map(str::trim).collect();
        let mut row = serde_json::Map::new();
        for (i, header) in headers.iter().enumerate() {
            let value = values.get(i).copied().unwrap_or("");
            row.insert(header.to_string(), value.into());
        }
        if row.get("id").and_then(|v| v.as_str()).unwrap_or("").is_empty() {
            continue;
        }
        row.insert("status".into(), "active".into());
        match serde_json::from_value::<Student>(serde_json::Value::Object(row)) {
            Ok(student) => students.push(student),
            Err(e) => warn!("[records] skipping csv row {}: {e}", n + 2),
        }
    }
    Ok(students)
}
