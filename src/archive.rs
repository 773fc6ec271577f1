//! Archive reader
//!
//! An [`Archive`] wraps one zip-compressed source (a local file, an in-memory
//! blob picked by the user, or a URL) and, once [`Archive::init`] has
//! completed, exposes every entry by path. Entries decode lazily; the
//! archive bytes are shared, never copied per entry.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::blob::BlobStore;
use crate::error::{LectorError, Result, ZipError};
use crate::href::decode_path;
use crate::zip::{read_central_directory, read_entry_bytes, CdEntry, ZipLimits};

/// Where the archive bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveSource {
    /// A file on the local file system.
    Path(PathBuf),
    /// Bytes already in memory, e.g. from a file picker.
    Bytes(Arc<[u8]>),
    /// A `file://` URL or a remote URL resolved through a [`Fetcher`].
    Url(String),
}

impl ArchiveSource {
    /// Short human-readable description used in logs and events.
    pub fn describe(&self) -> String {
        match self {
            ArchiveSource::Path(path) => path.display().to_string(),
            ArchiveSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            ArchiveSource::Url(url) => url.clone(),
        }
    }
}

impl From<PathBuf> for ArchiveSource {
    fn from(path: PathBuf) -> Self {
        ArchiveSource::Path(path)
    }
}

impl From<Vec<u8>> for ArchiveSource {
    fn from(bytes: Vec<u8>) -> Self {
        ArchiveSource::Bytes(bytes.into())
    }
}

impl From<Arc<[u8]>> for ArchiveSource {
    fn from(bytes: Arc<[u8]>) -> Self {
        ArchiveSource::Bytes(bytes)
    }
}

/// Downloads archive bytes for non-file URLs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the whole resource at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Archive configuration.
#[derive(Clone)]
pub struct ArchiveOptions {
    /// ZIP safety limits.
    pub zip_limits: ZipLimits,
    /// Run central-directory parsing and entry inflation on tokio's
    /// blocking pool instead of the calling task.
    pub offload_decompression: bool,
    /// Fetcher for remote URLs.
    pub fetcher: Option<Arc<dyn Fetcher>>,
    /// Ephemeral URL store entries are materialized into.
    pub blobs: BlobStore,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            zip_limits: ZipLimits::default(),
            offload_decompression: true,
            fetcher: None,
            blobs: BlobStore::new(),
        }
    }
}

impl fmt::Debug for ArchiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveOptions")
            .field("zip_limits", &self.zip_limits)
            .field("offload_decompression", &self.offload_decompression)
            .field("fetcher", &self.fetcher.is_some())
            .finish_non_exhaustive()
    }
}

impl ArchiveOptions {
    /// Set explicit ZIP limits.
    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.zip_limits = limits;
        self
    }

    /// Enable or disable blocking-pool decompression.
    pub fn with_offload(mut self, offload: bool) -> Self {
        self.offload_decompression = offload;
        self
    }

    /// Set the fetcher used for remote URLs.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share an existing ephemeral URL store.
    pub fn with_blob_store(mut self, blobs: BlobStore) -> Self {
        self.blobs = blobs;
        self
    }
}

struct EntryInner {
    cd: CdEntry,
    data: Arc<[u8]>,
    limits: ZipLimits,
    offload: bool,
}

/// One file inside an archive. Cheap to clone.
#[derive(Clone)]
pub struct ArchiveEntry {
    inner: Arc<EntryInner>,
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("path", &self.inner.cd.filename)
            .field("compressed_size", &self.inner.cd.compressed_size)
            .field("uncompressed_size", &self.inner.cd.uncompressed_size)
            .finish()
    }
}

impl ArchiveEntry {
    /// Path inside the archive.
    pub fn path(&self) -> &str {
        &self.inner.cd.filename
    }

    /// Stored size in bytes.
    pub fn compressed_size(&self) -> u32 {
        self.inner.cd.compressed_size
    }

    /// Decoded size in bytes.
    pub fn uncompressed_size(&self) -> u32 {
        self.inner.cd.uncompressed_size
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.inner.cd.is_dir()
    }

    /// MIME type guessed from the file extension.
    pub fn media_type(&self) -> String {
        mime_guess::from_path(self.path())
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// Whether two handles refer to the same entry of the same archive.
    pub fn same_entry(&self, other: &ArchiveEntry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Decode the entry.
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        if self.is_dir() {
            return Err(LectorError::NotFound(format!(
                "{} is a directory",
                self.path()
            )));
        }
        let inner = Arc::clone(&self.inner);
        let decode = move || read_entry_bytes(&inner.data, &inner.cd, &inner.limits);
        let bytes = if self.inner.offload {
            tokio::task::spawn_blocking(decode)
                .await
                .map_err(|e| LectorError::Io(e.to_string()))?
        } else {
            decode()
        };
        bytes.map_err(|err| {
            log::warn!("[ARCHIVE] Failed to decode '{}': {}", self.path(), err);
            LectorError::ArchiveCorrupt(err)
        })
    }

    /// Decode the entry and register it in `store`, returning a fresh URL.
    pub async fn as_ephemeral_url(&self, store: &BlobStore) -> Result<String> {
        let bytes = self.read_bytes().await?;
        Ok(store.create(bytes, &self.media_type()))
    }
}

/// Entries of an initialized archive, in central-directory order.
#[derive(Debug, Default)]
pub struct ArchiveEntries {
    entries: Vec<ArchiveEntry>,
    by_path: HashMap<String, usize>,
}

impl ArchiveEntries {
    /// Look up an entry: exact path, then ASCII case-insensitive with a
    /// leading `/` tolerated, then the percent-decoded path.
    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        let bare = path.strip_prefix('/').unwrap_or(path);
        if let Some(&index) = self.by_path.get(bare) {
            return self.entries.get(index);
        }
        let found = self.entries.iter().find(|entry| {
            let stored = entry.path().strip_prefix('/').unwrap_or(entry.path());
            stored.eq_ignore_ascii_case(bare)
        });
        match found {
            Some(entry) => Some(entry),
            None => decode_path(bare)
                .filter(|decoded| decoded != bare)
                .and_then(|decoded| self.get(&decoded)),
        }
    }

    /// Whether an entry exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Iterate in archive order.
    pub fn iter(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter()
    }

    /// Iterate over entry paths in archive order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(ArchiveEntry::path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct ArchiveInner {
    source: ArchiveSource,
    options: ArchiveOptions,
    entries: OnceCell<Result<ArchiveEntries>>,
}

/// A zip archive opened from an [`ArchiveSource`].
#[derive(Clone)]
pub struct Archive {
    inner: Arc<ArchiveInner>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("source", &self.inner.source.describe())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Archive {
    /// Create an archive for `source`. Nothing is read until [`Archive::init`].
    pub fn open(source: impl Into<ArchiveSource>, options: ArchiveOptions) -> Self {
        Self {
            inner: Arc::new(ArchiveInner {
                source: source.into(),
                options,
                entries: OnceCell::new(),
            }),
        }
    }

    /// The source this archive reads from.
    pub fn source(&self) -> &ArchiveSource {
        &self.inner.source
    }

    /// Options this archive was opened with.
    pub fn options(&self) -> &ArchiveOptions {
        &self.inner.options
    }

    /// The ephemeral URL store entries materialize into.
    pub fn blobs(&self) -> &BlobStore {
        &self.inner.options.blobs
    }

    /// Whether `init` has completed successfully.
    pub fn is_initialized(&self) -> bool {
        matches!(self.inner.entries.get(), Some(Ok(_)))
    }

    /// Read the source and parse the central directory. Concurrent callers
    /// share one initialization; the outcome is cached, failures included.
    pub async fn init(&self) -> Result<()> {
        self.inner
            .entries
            .get_or_init(|| self.load())
            .await
            .as_ref()
            .map(|_| ())
            .map_err(Clone::clone)
    }

    /// Entries by path. Fails with `NotInitialized` before `init` resolved.
    pub fn entries(&self) -> Result<&ArchiveEntries> {
        match self.inner.entries.get() {
            None => Err(LectorError::NotInitialized("archive")),
            Some(Err(err)) => Err(err.clone()),
            Some(Ok(entries)) => Ok(entries),
        }
    }

    /// Look up one entry, failing with `NotFound`.
    pub fn entry(&self, path: &str) -> Result<ArchiveEntry> {
        self.entries()?
            .get(path)
            .cloned()
            .ok_or_else(|| LectorError::NotFound(path.to_string()))
    }

    /// Check that the `mimetype` entry reads `application/epub+zip`.
    pub async fn validate_mimetype(&self) -> Result<()> {
        let entry = self.entries()?.get("mimetype").cloned().ok_or_else(|| {
            LectorError::ArchiveCorrupt(ZipError::InvalidMimetype(
                "mimetype file not found in archive".into(),
            ))
        })?;
        let bytes = entry.read_bytes().await?;
        let content = String::from_utf8_lossy(&bytes);
        if content.trim_end() != "application/epub+zip" {
            return Err(LectorError::ArchiveCorrupt(ZipError::InvalidMimetype(
                format!("expected 'application/epub+zip', got '{}'", content),
            )));
        }
        Ok(())
    }

    async fn read_source(&self) -> Result<Arc<[u8]>> {
        match &self.inner.source {
            ArchiveSource::Path(path) => Ok(tokio::fs::read(path).await?.into()),
            ArchiveSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            ArchiveSource::Url(url) => {
                if let Some(path) = url.strip_prefix("file://") {
                    return Ok(tokio::fs::read(path).await?.into());
                }
                match &self.inner.options.fetcher {
                    Some(fetcher) => Ok(fetcher.fetch(url).await?.into()),
                    None => Err(LectorError::NotFound(format!(
                        "no fetcher configured for {}",
                        url
                    ))),
                }
            }
        }
    }

    async fn load(&self) -> Result<ArchiveEntries> {
        let data = self.read_source().await?;
        let options = &self.inner.options;
        let limits = options.zip_limits;
        let offload = options.offload_decompression;

        let parse = {
            let data = Arc::clone(&data);
            move || read_central_directory(&data, &limits)
        };
        let directory = if offload {
            tokio::task::spawn_blocking(parse)
                .await
                .map_err(|e| LectorError::Io(e.to_string()))?
        } else {
            parse()
        };
        let directory = directory.map_err(|err| {
            log::warn!(
                "[ARCHIVE] Cannot decode {}: {}",
                self.inner.source.describe(),
                err
            );
            LectorError::ArchiveCorrupt(err)
        })?;

        let mut entries = ArchiveEntries::default();
        for cd in directory {
            let path = cd.filename.strip_prefix('/').unwrap_or(&cd.filename).to_string();
            entries.by_path.entry(path).or_insert(entries.entries.len());
            entries.entries.push(ArchiveEntry {
                inner: Arc::new(EntryInner {
                    cd,
                    data: Arc::clone(&data),
                    limits,
                    offload,
                }),
            });
        }
        log::info!(
            "[ARCHIVE] Opened {} ({} entries)",
            self.inner.source.describe(),
            entries.len()
        );
        Ok(entries)
    }
}
