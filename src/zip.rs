//! ZIP central-directory reader for EPUB containers
//!
//! Archives are held in memory, so everything here works on byte slices:
//! locate the end-of-central-directory record, list the central directory,
//! and decode single entries on demand (stored or raw DEFLATE through
//! miniz_oxide, verified with crc32fast).

use miniz_oxide::inflate::{decompress_to_vec_with_limit, TINFLStatus};

use crate::error::ZipError;

const DEFAULT_MAX_ENTRIES: usize = 16_384;
const DEFAULT_MAX_FILE_READ_SIZE: usize = 64 * 1024 * 1024;

const SIG_LOCAL_HEADER: u32 = 0x0403_4b50;
const SIG_CENTRAL: u32 = 0x0201_4b50;
const SIG_END: u32 = 0x0605_4b50;
const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;

const END_RECORD_LEN: usize = 22;
const CENTRAL_RECORD_LEN: usize = 46;
const LOCAL_HEADER_LEN: usize = 30;
const ZIP64_LOCATOR_LEN: usize = 20;
/// The end record plus the longest possible archive comment.
const MAX_TAIL_SCAN: usize = END_RECORD_LEN + u16::MAX as usize;

pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATED: u16 = 8;

/// Safety limits applied while reading an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Largest entry (compressed or decoded) that will be read.
    pub max_file_read_size: usize,
    /// Most central directory records accepted.
    pub max_entries: usize,
    /// Fail on structural problems instead of keeping what was read.
    pub strict: bool,
    /// Bytes searched from the end of the archive for the end record.
    pub max_eocd_scan: usize,
}

impl Default for ZipLimits {
    fn default() -> Self {
        Self {
            max_file_read_size: DEFAULT_MAX_FILE_READ_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
            strict: false,
            max_eocd_scan: MAX_TAIL_SCAN,
        }
    }
}

impl ZipLimits {
    /// Limits with an explicit per-entry size cap.
    pub fn new(max_file_read_size: usize) -> Self {
        Self {
            max_file_read_size,
            ..Self::default()
        }
    }

    /// Toggle strict parsing.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Cap the number of central directory records.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Cap the tail scan for the end record.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.clamp(END_RECORD_LEN, MAX_TAIL_SCAN);
        self
    }
}

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdEntry {
    /// Compression method.
    pub method: u16,
    /// Size of the stored payload.
    pub compressed_size: u32,
    /// Size once decoded.
    pub uncompressed_size: u32,
    /// Offset of the local file header.
    pub local_header_offset: u32,
    /// Expected CRC-32 of the decoded bytes.
    pub crc32: u32,
    /// Path inside the archive.
    pub filename: String,
}

impl CdEntry {
    /// Directory records end with `/`.
    pub fn is_dir(&self) -> bool {
        self.filename.ends_with('/')
    }
}

/// Little-endian field access that reports truncation instead of panicking.
trait LeFields {
    fn u16_at(&self, at: usize) -> Result<u16, ZipError>;
    fn u32_at(&self, at: usize) -> Result<u32, ZipError>;
    fn span(&self, at: usize, len: usize) -> Result<&[u8], ZipError>;
}

impl LeFields for [u8] {
    fn u16_at(&self, at: usize) -> Result<u16, ZipError> {
        let b = self.span(at, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_at(&self, at: usize) -> Result<u32, ZipError> {
        let b = self.span(at, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn span(&self, at: usize, len: usize) -> Result<&[u8], ZipError> {
        at.checked_add(len)
            .and_then(|end| self.get(at..end))
            .ok_or(ZipError::IoError)
    }
}

struct EndRecord {
    offset: usize,
    entries: u16,
    cd_size: u32,
    cd_offset: u32,
}

impl EndRecord {
    fn is_zip64(&self, data: &[u8]) -> bool {
        let sentinel = self.entries == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX;
        let locator = self
            .offset
            .checked_sub(ZIP64_LOCATOR_LEN)
            .and_then(|at| data.u32_at(at).ok())
            == Some(SIG_ZIP64_LOCATOR);
        sentinel || locator
    }
}

/// Search the tail for an end record whose comment runs exactly to the end
/// of the data.
fn find_end_record(data: &[u8], max_scan: usize) -> Result<EndRecord, ZipError> {
    let scan = data.len().min(max_scan.min(MAX_TAIL_SCAN));
    if scan < END_RECORD_LEN {
        return Err(ZipError::InvalidFormat);
    }
    let first = data.len() - scan;
    let last = data.len() - END_RECORD_LEN;

    for offset in (first..=last).rev() {
        if data.u32_at(offset)? != SIG_END {
            continue;
        }
        let comment_len = data.u16_at(offset + 20)? as usize;
        if offset + END_RECORD_LEN + comment_len != data.len() {
            continue;
        }
        let record = EndRecord {
            offset,
            entries: data.u16_at(offset + 10)?,
            cd_size: data.u32_at(offset + 12)?,
            cd_offset: data.u32_at(offset + 16)?,
        };
        let cd_end = (record.cd_offset as usize).checked_add(record.cd_size as usize);
        if cd_end.is_none_or(|end| end > offset) {
            return Err(ZipError::InvalidFormat);
        }
        return Ok(record);
    }
    Err(ZipError::InvalidFormat)
}

fn parse_central_record(data: &[u8], at: usize) -> Result<(CdEntry, usize), ZipError> {
    let fixed = data.span(at, CENTRAL_RECORD_LEN)?;
    if fixed.u32_at(0)? != SIG_CENTRAL {
        return Err(ZipError::InvalidFormat);
    }
    let name_len = fixed.u16_at(28)? as usize;
    let trailing = fixed.u16_at(30)? as usize + fixed.u16_at(32)? as usize;
    let name = data.span(at + CENTRAL_RECORD_LEN, name_len)?;
    let entry = CdEntry {
        method: fixed.u16_at(10)?,
        crc32: fixed.u32_at(16)?,
        compressed_size: fixed.u32_at(20)?,
        uncompressed_size: fixed.u32_at(24)?,
        local_header_offset: fixed.u32_at(42)?,
        filename: String::from_utf8_lossy(name).into_owned(),
    };
    Ok((entry, at + CENTRAL_RECORD_LEN + name_len + trailing))
}

/// List the central directory of an in-memory archive.
///
/// Lenient limits keep the records read before a structural problem;
/// strict limits fail instead.
pub fn read_central_directory(data: &[u8], limits: &ZipLimits) -> Result<Vec<CdEntry>, ZipError> {
    let end = find_end_record(data, limits.max_eocd_scan)?;
    if end.is_zip64(data) {
        return Err(ZipError::UnsupportedZip64);
    }

    let declared = end.entries as usize;
    if declared > limits.max_entries {
        if limits.strict {
            return Err(ZipError::CentralDirFull);
        }
        log::warn!(
            "[ZIP] Archive declares {} entries, keeping the first {}",
            declared,
            limits.max_entries
        );
    }

    let cd_end = end.cd_offset as usize + end.cd_size as usize;
    let mut at = end.cd_offset as usize;
    let mut entries = Vec::with_capacity(declared.min(limits.max_entries));
    while entries.len() < declared.min(limits.max_entries) {
        let parsed = if at < cd_end {
            parse_central_record(data, at)
        } else {
            Err(ZipError::InvalidFormat)
        };
        match parsed {
            Ok((entry, next)) => {
                entries.push(entry);
                at = next;
            }
            Err(err) if limits.strict => return Err(err),
            Err(err) => {
                log::warn!(
                    "[ZIP] Central directory ends early after {} of {} records: {}",
                    entries.len(),
                    declared,
                    err
                );
                break;
            }
        }
    }

    log::debug!(
        "[ZIP] {} central directory records at offset {}",
        entries.len(),
        end.cd_offset
    );
    Ok(entries)
}

fn payload<'a>(data: &'a [u8], entry: &CdEntry) -> Result<&'a [u8], ZipError> {
    let at = entry.local_header_offset as usize;
    let header = data
        .span(at, LOCAL_HEADER_LEN)
        .map_err(|_| ZipError::InvalidFormat)?;
    if header.u32_at(0)? != SIG_LOCAL_HEADER {
        return Err(ZipError::InvalidFormat);
    }
    let skip = LOCAL_HEADER_LEN + header.u16_at(26)? as usize + header.u16_at(28)? as usize;
    data.span(at + skip, entry.compressed_size as usize)
}

/// Decode one entry of an in-memory archive and verify its checksum.
pub fn read_entry_bytes(
    data: &[u8],
    entry: &CdEntry,
    limits: &ZipLimits,
) -> Result<Vec<u8>, ZipError> {
    let max = limits.max_file_read_size;
    if entry.uncompressed_size as usize > max || entry.compressed_size as usize > max {
        return Err(ZipError::FileTooLarge);
    }

    let raw = payload(data, entry)?;
    let bytes = match entry.method {
        METHOD_STORED => raw.to_vec(),
        METHOD_DEFLATED => decompress_to_vec_with_limit(raw, max).map_err(|err| {
            match err.status {
                TINFLStatus::HasMoreOutput => ZipError::FileTooLarge,
                _ => ZipError::DecompressError,
            }
        })?,
        other => return Err(ZipError::UnsupportedCompression(other)),
    };

    if entry.crc32 != 0 && crc32fast::hash(&bytes) != entry.crc32 {
        log::warn!("[ZIP] CRC mismatch in {}", entry.filename);
        return Err(ZipError::CrcMismatch);
    }
    Ok(bytes)
}
