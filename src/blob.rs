//! Ephemeral URL store
//!
//! Process-lifetime table of in-memory blobs addressed by opaque
//! `blob:lector/<n>` URLs. Revoking a URL frees the bytes; a revoked URL is
//! never reissued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::href::split_fragment;

/// URL prefix of every ephemeral URL.
pub const BLOB_URL_PREFIX: &str = "blob:lector/";

static NEXT_BLOB_ID: AtomicU64 = AtomicU64::new(1);

/// Bytes registered under an ephemeral URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    /// MIME type served with the bytes.
    pub media_type: String,
    /// Blob contents.
    pub data: Arc<[u8]>,
}

/// Shared handle to the ephemeral URL table.
#[derive(Clone, Debug, Default)]
pub struct BlobStore {
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
}

impl BlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register bytes and return a fresh URL for them.
    pub fn create(&self, data: impl Into<Arc<[u8]>>, media_type: &str) -> String {
        let id = NEXT_BLOB_ID.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{}", BLOB_URL_PREFIX, id);
        let blob = Blob {
            media_type: media_type.to_string(),
            data: data.into(),
        };
        log::debug!(
            "[BLOB] Created {} ({} bytes, {})",
            url,
            blob.data.len(),
            blob.media_type
        );
        self.table().insert(url.clone(), blob);
        url
    }

    /// Look up a URL. Any `#fragment` is ignored.
    pub fn get(&self, url: &str) -> Option<Blob> {
        let (base, _) = split_fragment(url);
        self.table().get(base).cloned()
    }

    /// Whether the URL is currently live.
    pub fn contains(&self, url: &str) -> bool {
        let (base, _) = split_fragment(url);
        self.table().contains_key(base)
    }

    /// Free the bytes behind a URL. Returns `false` if it was not live.
    pub fn revoke(&self, url: &str) -> bool {
        let (base, _) = split_fragment(url);
        let removed = self.table().remove(base).is_some();
        if removed {
            log::debug!("[BLOB] Revoked {}", base);
        }
        removed
    }

    /// Number of live URLs.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no URL is live.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
