//! Backends for running without a remote: uploads are logged and dropped,
//! the event log keeps only its most recent entries.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EventRecord, ObjectStore, RealtimeDb};
use crate::error::RemoteError;

pub const DEFAULT_RECENT_EVENTS: usize = 32;

#[derive(Default)]
struct OfflineObjectsInner {
    uploads: u64,
    bytes: u64,
}

/// Object store that logs each upload and keeps no image bytes.
#[derive(Clone, Default)]
pub struct OfflineObjectStore {
    inner: Arc<Mutex<OfflineObjectsInner>>,
}

impl OfflineObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> u64 {
        self.lock().uploads
    }

    /// Total bytes seen, none of them retained.
    pub fn bytes_seen(&self) -> u64 {
        self.lock().bytes
    }

    fn lock(&self) -> MutexGuard<'_, OfflineObjectsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for OfflineObjectStore {
    fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.uploads += 1;
        inner.bytes += bytes.len() as u64;
        log::debug!(
            "offline upload dropped: {}/{} ({} bytes, {})",
            folder,
            file_name,
            bytes.len(),
            content_type
        );
        Ok(())
    }
}

struct OfflineDbInner {
    recent: VecDeque<(String, EventRecord)>,
    capacity: usize,
    root: BTreeMap<String, String>,
    pushes: u64,
}

/// Realtime database that keeps the root fields and a bounded tail of the
/// event logs.
#[derive(Clone)]
pub struct OfflineRealtimeDb {
    inner: Arc<Mutex<OfflineDbInner>>,
}

impl OfflineRealtimeDb {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OfflineDbInner {
                recent: VecDeque::new(),
                capacity: capacity.max(1),
                root: BTreeMap::new(),
                pushes: 0,
            })),
        }
    }

    /// Most recent `(key, record)` pairs, oldest first.
    pub fn recent(&self) -> Vec<(String, EventRecord)> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn pushes(&self) -> u64 {
        self.lock().pushes
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().root.get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, OfflineDbInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for OfflineRealtimeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeDb for OfflineRealtimeDb {
    fn push(&mut self, key: &str, record: &EventRecord) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.pushes += 1;
        if inner.recent.len() == inner.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back((key.to_string(), record.clone()));
        log::debug!("offline event log {}: {}", key, record.file_name);
        Ok(format!("-offline{:08}", inner.pushes))
    }

    fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        for (key, value) in fields {
            inner.root.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
