use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EventRecord, ObjectStore, RealtimeDb};
use crate::error::RemoteError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct ObjectStoreInner {
    objects: Vec<StoredObject>,
    attempts: u64,
    failures: VecDeque<RemoteError>,
}

/// In-process object store. Clones share state, so a test can keep one
/// handle and give another to the reporter.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<ObjectStoreInner>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next upload attempt.
    pub fn fail_next(&self, err: RemoteError) {
        self.lock().failures.push_back(err);
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.lock().objects.clone()
    }

    /// Upload calls seen, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    fn lock(&self) -> MutexGuard<'_, ObjectStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.attempts += 1;
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.objects.push(StoredObject {
            path: format!("{}/{}", folder, file_name),
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct RealtimeDbInner {
    lists: BTreeMap<String, Vec<(String, EventRecord)>>,
    root: BTreeMap<String, String>,
    push_attempts: u64,
    update_attempts: u64,
    next_id: u64,
    push_failures: VecDeque<RemoteError>,
    update_failures: VecDeque<RemoteError>,
}

/// In-process realtime database. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRealtimeDb {
    inner: Arc<Mutex<RealtimeDbInner>>,
}

impl InMemoryRealtimeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_push(&self, err: RemoteError) {
        self.lock().push_failures.push_back(err);
    }

    pub fn fail_next_update(&self, err: RemoteError) {
        self.lock().update_failures.push_back(err);
    }

    /// Records appended under `key`, oldest first.
    pub fn list(&self, key: &str) -> Vec<EventRecord> {
        self.lock()
            .lists
            .get(key)
            .map(|entries| entries.iter().map(|(_, rec)| rec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().root.get(key).cloned()
    }

    pub fn push_attempts(&self) -> u64 {
        self.lock().push_attempts
    }

    pub fn update_attempts(&self) -> u64 {
        self.lock().update_attempts
    }

    fn lock(&self) -> MutexGuard<'_, RealtimeDbInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RealtimeDb for InMemoryRealtimeDb {
    fn push(&mut self, key: &str, record: &EventRecord) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.push_attempts += 1;
        if let Some(err) = inner.push_failures.pop_front() {
            return Err(err);
        }
        inner.next_id += 1;
        let id = format!("-mem{:08}", inner.next_id);
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push((id.clone(), record.clone()));
        Ok(id)
    }

    fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.update_attempts += 1;
        if let Some(err) = inner.update_failures.pop_front() {
            return Err(err);
        }
        for (key, value) in fields {
            inner.root.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_store_records_uploads_and_scripted_failures() {
        let handle = InMemoryObjectStore::new();
        let mut store = handle.clone();
        handle.fail_next(RemoteError::Transport("reset".into()));

        assert!(store.upload("fire_img", "a.jpg", b"x", "image/jpeg").is_err());
        store.upload("fire_img", "a.jpg", b"x", "image/jpeg").unwrap();

        assert_eq!(handle.attempts(), 2);
        let objects = handle.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].path, "fire_img/a.jpg");
        assert_eq!(objects[0].content_type, "image/jpeg");
    }

    #[test]
    fn realtime_db_push_and_update() {
        let handle = InMemoryRealtimeDb::new();
        let mut db = handle.clone();
        let rec = EventRecord {
            file_name: "fire_x_1.jpg".into(),
        };
        let id1 = db.push("fire_img", &rec).unwrap();
        let id2 = db.push("fire_img", &rec).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(handle.list("fire_img").len(), 2);
        assert!(handle.list("weapon_img").is_empty());

        let mut fields = BTreeMap::new();
        fields.insert("fire_count".to_string(), "2".to_string());
        db.update(&fields).unwrap();
        assert_eq!(handle.value("fire_count").as_deref(), Some("2"));

        handle.fail_next_update(RemoteError::Status {
            code: 401,
            body: "denied".into(),
        });
        assert!(db.update(&fields).is_err());
        assert_eq!(handle.update_attempts(), 2);
    }
}
