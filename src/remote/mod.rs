//! Remote backends: the snapshot archive and the realtime database.
//!
//! The reporter only sees the two traits below. `memory` holds in-process
//! implementations used by tests and the demo, `offline` the bounded ones
//! the daemon uses when no remote is configured; `firebase` talks to the
//! Firebase Storage and Realtime Database REST APIs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RemoteError;

#[cfg(feature = "firebase")]
pub mod firebase;
pub mod memory;
pub mod offline;

#[cfg(feature = "firebase")]
pub use firebase::{FirebaseDatabase, FirebaseSettings, FirebaseStorage};
pub use memory::{InMemoryObjectStore, InMemoryRealtimeDb, StoredObject};
pub use offline::{OfflineObjectStore, OfflineRealtimeDb};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Object storage holding snapshot images.
pub trait ObjectStore {
    /// Store `bytes` as `{folder}/{file_name}`.
    fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError>;
}

/// Key-value store with append-only lists.
pub trait RealtimeDb {
    /// Append `record` to the list at `key`, returning the generated child id.
    fn push(&mut self, key: &str, record: &EventRecord) -> Result<String, RemoteError>;

    /// Merge `fields` into the root object.
    fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<(), RemoteError>;
}

/// Entry appended to a category's event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub file_name: String,
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), RemoteError> {
        (**self).upload(folder, file_name, bytes, content_type)
    }
}

impl<T: RealtimeDb + ?Sized> RealtimeDb for Box<T> {
    fn push(&mut self, key: &str, record: &EventRecord) -> Result<String, RemoteError> {
        (**self).push(key, record)
    }

    fn update(&mut self, fields: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        (**self).update(fields)
    }
}
