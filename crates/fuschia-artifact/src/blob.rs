//! In-process blob materializer.
//!
//! Turns raw preview bytes into [`BlobHandle`]s. The store plays the part of
//! the external allocator: a blob stays live until its handle is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;

use crate::handle::ResourceHandle;

/// A materialized blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
  pub data: Bytes,
  pub content_type: String,
}

type BlobTable = Mutex<HashMap<String, Blob>>;

fn lock(table: &BlobTable) -> MutexGuard<'_, HashMap<String, Blob>> {
  table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of live blobs.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
  blobs: Arc<BlobTable>,
}

impl BlobStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store `data` and return the handle that owns it.
  pub fn create(&self, data: Bytes, content_type: impl Into<String>) -> BlobHandle {
    let id = format!("blob:{}", uuid::Uuid::new_v4());
    lock(&self.blobs).insert(
      id.clone(),
      Blob {
        data,
        content_type: content_type.into(),
      },
    );
    BlobHandle {
      id,
      blobs: Arc::downgrade(&self.blobs),
    }
  }

  pub fn get(&self, id: &str) -> Option<Blob> {
    lock(&self.blobs).get(id).cloned()
  }

  /// Number of blobs not yet released.
  pub fn live_count(&self) -> usize {
    lock(&self.blobs).len()
  }
}

/// Handle to one blob in a [`BlobStore`]. Releasing it frees the bytes.
#[derive(Debug)]
pub struct BlobHandle {
  id: String,
  blobs: Weak<BlobTable>,
}

impl ResourceHandle for BlobHandle {
  fn id(&self) -> &str {
    &self.id
  }

  fn release(&self) {
    if let Some(blobs) = self.blobs.upgrade() {
      lock(&blobs).remove(&self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_release_frees_blob() {
    let store = BlobStore::new();
    let handle = store.create(Bytes::from_static(b"\x89PNG"), "image/png");

    assert!(handle.id().starts_with("blob:"));
    assert_eq!(store.live_count(), 1);
    assert_eq!(
      store.get(handle.id()).map(|blob| blob.content_type),
      Some("image/png".to_string())
    );

    handle.release();
    handle.release();
    assert_eq!(store.live_count(), 0);
    assert_eq!(store.get(handle.id()), None);
  }

  #[test]
  fn test_release_after_store_dropped() {
    let store = BlobStore::new();
    let handle = store.create(Bytes::from_static(b"data"), "image/jpeg");
    drop(store);
    handle.release();
  }
}
