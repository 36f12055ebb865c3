//! Online/offline classification from time since last message.
//!
//! The store and every view call the same predicate, so the dashboard and the
//! device-control page never disagree about a device.

use crate::models::{DeviceRecord, DeviceStatus};
use time::{Duration, OffsetDateTime};

/// A device that has been silent for this long is offline.
pub const STALENESS_THRESHOLD: Duration = Duration::seconds(30);

/// `now - last_update < 30s`. Exactly 30s is already offline.
pub fn is_online(last_update: OffsetDateTime, now: OffsetDateTime) -> bool {
    now - last_update < STALENESS_THRESHOLD
}

pub fn status_at(record: &DeviceRecord, now: OffsetDateTime) -> DeviceStatus {
    if is_online(record.last_update, now) {
        DeviceStatus::Online
    } else {
        DeviceStatus::Offline
    }
}

pub fn count_online<'a, I>(records: I, now: OffsetDateTime) -> usize
where
    I: IntoIterator<Item = &'a DeviceRecord>,
{
    records
        .into_iter()
        .filter(|r| is_online(r.last_update, now))
        .count()
}
