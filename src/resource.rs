//! Resource cache
//!
//! A [`Resource`] wraps one archive entry and hands out a single ephemeral
//! URL for it, shared by every holder. Holders are identified by a
//! [`HolderId`]; acquiring twice with the same key registers it once. When
//! the last holder releases, the URL is revoked after a grace period unless
//! someone acquires the resource again in the meantime.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::archive::ArchiveEntry;
use crate::blob::BlobStore;
use crate::error::{LectorError, Result};
use crate::xml::{decode_text, XmlDocument};

/// Default delay between the last release and revocation.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Caller key used to acquire and release resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(u64);

impl HolderId {
    /// Allocate a process-unique key.
    pub fn next() -> Self {
        HolderId(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the key.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a convenience accessor keeps the acquisition it makes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Retain {
    /// Release the key once the content has been read.
    #[default]
    Release,
    /// Keep the key registered; the caller releases it later.
    Keep,
}

/// Resource cache configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Delay between the last release and revocation of the URL.
    pub grace: Duration,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
        }
    }
}

impl ResourceOptions {
    /// Set the revoke grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

struct ResourceState {
    holders: HashSet<HolderId>,
    url: Arc<OnceCell<String>>,
    revoke: Option<JoinHandle<()>>,
    // Bumped on every schedule/cancel; a revoke task only acts on its own epoch.
    epoch: u64,
}

struct ResourceInner {
    entry: ArchiveEntry,
    blobs: BlobStore,
    options: ResourceOptions,
    state: Mutex<ResourceState>,
    materializations: AtomicUsize,
}

impl ResourceInner {
    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn revoke_locked(&self, state: &mut ResourceState) {
        let cell = std::mem::replace(&mut state.url, Arc::new(OnceCell::new()));
        state.revoke = None;
        if let Some(url) = cell.get() {
            self.blobs.revoke(url);
            log::debug!("[RESOURCE] Revoked {} ({})", self.entry.path(), url);
        }
    }

    fn revoke_if_idle(&self, epoch: u64) {
        let mut state = self.state();
        if state.epoch == epoch && state.holders.is_empty() {
            self.revoke_locked(&mut state);
        }
    }
}

/// Reference-counted ephemeral URL for one archive entry. Cheap to clone;
/// clones share the same holders and URL.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path())
            .field("holders", &self.holder_count())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl Resource {
    /// Wrap `entry`; URLs are registered in `blobs`.
    pub fn new(entry: ArchiveEntry, blobs: BlobStore, options: ResourceOptions) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                entry,
                blobs,
                options,
                state: Mutex::new(ResourceState {
                    holders: HashSet::new(),
                    url: Arc::new(OnceCell::new()),
                    revoke: None,
                    epoch: 0,
                }),
                materializations: AtomicUsize::new(0),
            }),
        }
    }

    /// Archive path of the wrapped entry.
    pub fn path(&self) -> &str {
        self.inner.entry.path()
    }

    /// The wrapped entry.
    pub fn entry(&self) -> &ArchiveEntry {
        &self.inner.entry
    }

    /// Whether two handles share the same cache state.
    pub fn same_resource(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of distinct keys currently holding the resource.
    pub fn holder_count(&self) -> usize {
        self.inner.state().holders.len()
    }

    /// Whether `key` currently holds the resource.
    pub fn is_held_by(&self, key: HolderId) -> bool {
        self.inner.state().holders.contains(&key)
    }

    /// Whether an ephemeral URL is currently live.
    pub fn is_materialized(&self) -> bool {
        self.inner.state().url.initialized()
    }

    /// Number of times the entry has been decoded into a URL.
    pub fn materializations(&self) -> usize {
        self.inner.materializations.load(Ordering::Relaxed)
    }

    /// Acquire the resource for `key` and return its ephemeral URL.
    ///
    /// The first acquisition decodes the entry; concurrent first
    /// acquisitions wait on the same decode. Acquiring cancels a pending
    /// revoke. If decoding fails, `key` is not registered and a later call
    /// retries.
    pub async fn as_ephemeral_url(&self, key: HolderId) -> Result<String> {
        let (cell, newly_held) = {
            let mut state = self.inner.state();
            if let Some(pending) = state.revoke.take() {
                pending.abort();
                log::debug!("[RESOURCE] Cancelled revoke of {}", self.path());
            }
            state.epoch += 1;
            let newly_held = state.holders.insert(key);
            (Arc::clone(&state.url), newly_held)
        };

        let result = cell
            .get_or_try_init(|| async {
                self.inner.materializations.fetch_add(1, Ordering::Relaxed);
                let url = self.inner.entry.as_ephemeral_url(&self.inner.blobs).await?;
                log::debug!("[RESOURCE] Materialized {} as {}", self.path(), url);
                Ok::<_, LectorError>(url)
            })
            .await;

        match result {
            Ok(url) => Ok(url.clone()),
            Err(err) => {
                if newly_held {
                    self.inner.state().holders.remove(&key);
                }
                log::warn!("[RESOURCE] Failed to materialize {}: {}", self.path(), err);
                Err(err)
            }
        }
    }

    /// Release `key`. Fails with `ResourceKey` if `key` does not hold the
    /// resource. Releasing the last key schedules revocation after the grace
    /// period; outside a tokio runtime the URL is revoked immediately.
    pub fn release(&self, key: HolderId) -> Result<()> {
        let mut state = self.inner.state();
        if !state.holders.remove(&key) {
            return Err(LectorError::ResourceKey {
                path: self.path().to_string(),
                key: key.get(),
            });
        }
        if !state.holders.is_empty() || !state.url.initialized() {
            return Ok(());
        }

        state.epoch += 1;
        let epoch = state.epoch;
        if let Some(pending) = state.revoke.take() {
            pending.abort();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let grace = self.inner.options.grace;
                state.revoke = Some(handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    inner.revoke_if_idle(epoch);
                }));
                log::debug!(
                    "[RESOURCE] Revoke of {} scheduled in {:?}",
                    self.path(),
                    grace
                );
            }
            Err(_) => self.inner.revoke_locked(&mut state),
        }
        Ok(())
    }

    /// Acquire, read the materialized bytes and release unless `retain`
    /// says otherwise.
    pub async fn as_bytes(&self, key: HolderId, retain: Retain) -> Result<Arc<[u8]>> {
        let url = self.as_ephemeral_url(key).await?;
        let blob = self.inner.blobs.get(&url);
        if retain == Retain::Release {
            self.release(key)?;
        }
        blob.map(|blob| blob.data)
            .ok_or_else(|| LectorError::NotFound(format!("{} ({})", self.path(), url)))
    }

    /// Like [`Resource::as_bytes`], decoded as UTF-8.
    pub async fn as_text(&self, key: HolderId, retain: Retain) -> Result<String> {
        let bytes = self.as_bytes(key, retain).await?;
        decode_text(&bytes)
    }

    /// Like [`Resource::as_text`], checked to be well-formed XML.
    pub async fn as_xml(&self, key: HolderId, retain: Retain) -> Result<XmlDocument> {
        let text = self.as_text(key, retain).await?;
        XmlDocument::parse_xml(text)
    }

    /// Like [`Resource::as_text`], parsed as an XHTML document.
    pub async fn as_document(&self, key: HolderId, retain: Retain) -> Result<XmlDocument> {
        let text = self.as_text(key, retain).await?;
        XmlDocument::parse_document(text)
    }
}
