//! Attendance statistics over one day of records.
//!
//! A student without a present/late record that day counts as absent.

use crate::records::{AttendanceRecord, AttendanceStatus, Student};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub class_name: String,
    pub total: u32,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceOverview {
    pub total: u32,
    pub attended: u32,
    pub attendance_rate: u32,
    pub late_rate: u32,
    pub absent_rate: u32,
}

/// Rounded percentage, 0 when `total` is 0.
pub fn percent(part: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(part) * 100.0 / f64::from(total)).round() as u32
}

/// Per-class counts, one entry per class that has students, sorted by class.
/// Records for classes with no students are ignored.
pub fn class_summaries(students: &[Student], attendance: &[AttendanceRecord]) -> Vec<ClassSummary> {
    let mut classes: BTreeMap<&str, ClassSummary> = BTreeMap::new();
    for student in students {
        classes
            .entry(student.class_name.as_str())
            .or_insert_with(|| ClassSummary {
                class_name: student.class_name.clone(),
                total: 0,
                present: 0,
                late: 0,
                absent: 0,
                percentage: 0,
            })
            .total += 1;
    }

    for record in attendance {
        if let Some(summary) = classes.get_mut(record.class_name.as_str()) {
            match record.status {
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Late => summary.late += 1,
                AttendanceStatus::Absent => {}
            }
        }
    }

    classes
        .into_values()
        .map(|mut summary| {
            let attended = summary.present + summary.late;
            summary.absent = summary.total.saturating_sub(attended);
            summary.percentage = percent(attended, summary.total);
            summary
        })
        .collect()
}

pub fn overview(students: &[Student], attendance: &[AttendanceRecord]) -> AttendanceOverview {
    let total = students.len() as u32;
    let count = |status: AttendanceStatus| attendance.iter().filter(|r| r.status == status).count() as u32;
    let present = count(AttendanceStatus::Present);
    let late = count(AttendanceStatus::Late);
    let attended = (present + late).min(total);
    let absent = total - attended;

    AttendanceOverview {
        total,
        attended,
        attendance_rate: percent(attended, total),
        late_rate: percent(late, total),
        absent_rate: percent(absent, total),
    }
}
