//! In-memory collaborators for unit tests.
//!
//! They record every call so tests can assert on what reached the store,
//! the cache and the publisher, and can be switched into failure modes.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    cache::{PositionCache, ScanPage},
    publisher::UpdatePublisher,
    store::{self, LocationStore},
    validator, CacheEntry, HistoryEntry, IdentityTriple, Position, TelemetryReport,
    VehicleRecord,
};

// ---

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap()
}

/// History row captured `id` minutes after a fixed base time.
pub fn history_entry(
    id: i64,
    device_id: &str,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> HistoryEntry {
    HistoryEntry {
        id,
        device_id: device_id.to_string(),
        latitude,
        longitude,
        speed: None,
        satellites: None,
        raw_gnss: None,
        temperature: None,
        gyro_x: None,
        gyro_y: None,
        gyro_z: None,
        accel_x: None,
        accel_y: None,
        accel_z: None,
        captured_at: base_time() + Duration::minutes(id),
    }
}

pub fn vehicle(org_id: i64, id: i64, device_id: &str, latitude: f64, longitude: f64) -> VehicleRecord {
    VehicleRecord {
        id,
        organization_id: org_id,
        device_id: device_id.to_string(),
        latitude,
        longitude,
        vehicle_number: Some(format!("RJ14-{id}")),
        make: Some("Tata".to_string()),
        model: Some("Ace".to_string()),
        year: Some(2021),
        is_deleted: false,
        updated_at: base_time(),
    }
}

fn matches_identity(record: &VehicleRecord, identity: &IdentityTriple) -> bool {
    record.organization_id == identity.org_id
        && record.id == identity.vehicle_id
        && record.device_id == identity.device_id
        && !record.is_deleted
}

fn record_position(record: &VehicleRecord) -> Position {
    Position {
        latitude: record.latitude,
        longitude: record.longitude,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    history: Mutex<Vec<HistoryEntry>>,
    vehicles: Mutex<Vec<VehicleRecord>>,
    calls: Mutex<Vec<&'static str>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn with_vehicle(self, record: VehicleRecord) -> Self {
        self.vehicles.lock().unwrap().push(record);
        self
    }

    pub fn push_history(&self, entry: HistoryEntry) {
        self.history.lock().unwrap().push(entry);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().unwrap().clone()
    }

    pub fn vehicles(&self) -> Vec<VehicleRecord> {
        self.vehicles.lock().unwrap().clone()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|op| **op == operation).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every query (not the writes) fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(operation);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("{operation} failed: connection closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn insert_history(&self, report: &TelemetryReport) -> Result<i64> {
        self.calls.lock().unwrap().push("insert_history");
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("insert failed: connection closed"));
        }

        let mut history = self.history.lock().unwrap();
        let id = history.len() as i64 + 1;
        let gyro = report.gyroscope.unwrap_or_default();
        let accel = report.accelerometer.unwrap_or_default();
        history.push(HistoryEntry {
            id,
            device_id: report.device_id.clone().unwrap_or_default(),
            latitude: store::stored_coordinate(report.latitude.as_deref()),
            longitude: store::stored_coordinate(report.longitude.as_deref()),
            speed: report.speed.clone(),
            satellites: report.satellites,
            raw_gnss: report.raw_gnss.clone(),
            temperature: report.temperature,
            gyro_x: gyro.x,
            gyro_y: gyro.y,
            gyro_z: gyro.z,
            accel_x: accel.x,
            accel_y: accel.y,
            accel_z: accel.z,
            captured_at: report.timestamp.unwrap_or_else(Utc::now),
        });
        Ok(id)
    }

    async fn latest_usable_position(&self, device_id: &str) -> Result<Option<HistoryEntry>> {
        self.enter("latest_usable_position")?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.device_id == device_id)
            .filter(|e| e.position().is_some_and(validator::is_usable_numeric))
            .max_by_key(|e| e.captured_at)
            .cloned())
    }

    async fn resolve_identity(&self, device_id: &str) -> Result<Option<(i64, i64)>> {
        self.enter("resolve_identity")?;
        Ok(self
            .vehicles
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.device_id == device_id && !v.is_deleted)
            .map(|v| (v.organization_id, v.id)))
    }

    async fn get_vehicle(&self, identity: &IdentityTriple) -> Result<Option<VehicleRecord>> {
        self.enter("get_vehicle")?;
        Ok(self
            .vehicles
            .lock()
            .unwrap()
            .iter()
            .find(|v| matches_identity(v, identity))
            .filter(|v| validator::is_usable_numeric(record_position(v)))
            .cloned())
    }

    async fn update_vehicle_position(
        &self,
        identity: &IdentityTriple,
        position: Position,
        observed_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.calls.lock().unwrap().push("update_vehicle_position");
        let mut vehicles = self.vehicles.lock().unwrap();
        let mut changed = 0;
        for record in vehicles
            .iter_mut()
            .filter(|v| matches_identity(v, identity) && v.updated_at <= observed_at)
        {
            record.latitude = position.latitude;
            record.longitude = position.longitude;
            record.updated_at = observed_at;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_vehicles(&self, org_id: i64) -> Result<Vec<VehicleRecord>> {
        self.enter("list_vehicles")?;
        Ok(self
            .vehicles
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.organization_id == org_id && !v.is_deleted)
            .filter(|v| validator::is_usable_numeric(record_position(v)))
            .cloned()
            .collect())
    }
}

/// Sorted key-value map with SCAN paging over key offsets.
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, (String, u64)>>,
    expire_before_batch: Mutex<HashSet<String>>,
    page_size: usize,
    scan_calls: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_page_size(10)
    }
}

impl MemoryCache {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            expire_before_batch: Mutex::new(HashSet::new()),
            page_size,
            scan_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), 300));
    }

    /// Drop `key` right before the next batch get, as a TTL expiry would.
    pub fn expire_before_batch(&self, key: &str) {
        self.expire_before_batch.lock().unwrap().insert(key.to_string());
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .map(|(value, _)| serde_json::from_str(value).unwrap())
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("cache unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl PositionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reads()?;
        Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("cache unavailable"));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl_secs));
        Ok(())
    }

    async fn scan_page(&self, pattern: &str, cursor: u64) -> Result<ScanPage> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;

        let matching: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        let start = cursor as usize;
        let end = (start + self.page_size).min(matching.len());
        let keys = matching.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
        let next = if end < matching.len() { end as u64 } else { 0 };
        Ok(ScanPage { cursor: next, keys })
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check_reads()?;
        let mut entries = self.entries.lock().unwrap();
        for key in self.expire_before_batch.lock().unwrap().drain() {
            entries.remove(&key);
        }
        Ok(keys
            .iter()
            .map(|key| entries.get(key).map(|(v, _)| v.clone()))
            .collect())
    }
}

/// Glob match supporting `*` only, which is all the fleet pattern uses.
fn glob_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((head, rest)) => {
            let Some(tail) = text.strip_prefix(head) else {
                return false;
            };
            (0..=tail.len())
                .filter(|i| tail.is_char_boundary(*i))
                .any(|i| glob_match(rest, &tail[i..]))
        }
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpdatePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("publish rejected"));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_glob_match() {
        // ---
        assert!(glob_match("1:*:*", "1:7:D1"));
        assert!(!glob_match("1:*:*", "11:7:D1"));
        assert!(!glob_match("1:*:*", "2:7:D1"));
        assert!(glob_match("1:*:*", "1:7:D1:extra"));
        assert!(!glob_match("1:*:*", "1:7"));
    }
}
