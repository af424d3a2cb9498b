//! The Detail Store: a rotating, append-only binary log of activity detail
//! payloads, one log family per checkout context.
//!
//! Grounded bit-exactly in
//! `original_source/lmcommon/activity/detaildb.py::ActivityDetailDB`: an
//! 8-byte magic (`__g__lsn`) followed by three little-endian `u32` fields
//! (file number, offset, length) forms a 20-byte header; a detail key is the
//! basename prefix followed by the base64 of that header. Rotation is a
//! soft 4 MB limit — one record is always allowed to land past the limit
//! before the next file is opened.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use labbook_types::ErrorKind;
use serde::{Deserialize, Serialize};

const MAGIC: &[u8; 8] = b"__g__lsn";
/// Byte length of the framing header every `get` result begins with.
pub const HEADER_LEN: usize = 20;
const BASENAME_PREFIX_LEN: usize = 20;
const DEFAULT_LOGFILE_LIMIT: u64 = 4_000_000;

/// Metadata persisted alongside the log files (`.detaildb`), tracking the
/// active file number and the checkout context it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DetailDbMeta {
    basename: String,
    file_number: u32,
}

/// A parsed 20-byte detail header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailHeader {
    pub file_number: u32,
    pub offset: u32,
    pub length: u32,
}

impl DetailHeader {
    fn encode(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..12].copy_from_slice(&self.file_number.to_le_bytes());
        buf[12..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN || &bytes[0..8] != MAGIC {
            bail!("invalid detail record header");
        }
        Ok(Self {
            file_number: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            offset: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            length: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        })
    }
}

/// A rotating append-only binary log keyed by checkout context.
pub struct DetailStore {
    root_path: PathBuf,
    basename: String,
    logfile_limit: u64,
    metadata_path: PathBuf,
}

impl DetailStore {
    /// `checkout_id` plus the fixed `detail_log-` prefix must fit in
    /// [`BASENAME_PREFIX_LEN`] bytes: this is the on-disk log family name
    /// and also the fixed-width prefix every detail key starts with.
    pub fn new(root_path: impl Into<PathBuf>, checkout_id: &str) -> Result<Self, ErrorKind> {
        Self::with_logfile_limit(root_path, checkout_id, DEFAULT_LOGFILE_LIMIT)
    }

    pub fn with_logfile_limit(
        root_path: impl Into<PathBuf>,
        checkout_id: &str,
        logfile_limit: u64,
    ) -> Result<Self, ErrorKind> {
        let root_path = root_path.into();
        let basename = format!("detail_log-{checkout_id}");
        if basename.len() != BASENAME_PREFIX_LEN {
            return Err(ErrorKind::validation(format!(
                "checkout id {checkout_id:?} produces a {}-byte basename; \
                 detail store basenames must be exactly {BASENAME_PREFIX_LEN} bytes",
                basename.len()
            )));
        }

        let metadata_path = root_path.join(".detaildb");
        Ok(Self {
            root_path,
            basename,
            logfile_limit,
            metadata_path,
        })
    }

    fn read_metadata(&self) -> Result<Option<DetailDbMeta>> {
        if !self.metadata_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.metadata_path)
            .with_context(|| format!("reading {}", self.metadata_path.display()))?;
        Ok(Some(serde_json::from_str(&raw).with_context(|| {
            format!("parsing {}", self.metadata_path.display())
        })?))
    }

    fn write_metadata(&self, file_number: u32) -> Result<()> {
        let meta = DetailDbMeta {
            basename: self.basename.clone(),
            file_number,
        };
        let raw = serde_json::to_string(&meta)?;
        fs::write(&self.metadata_path, raw)
            .with_context(|| format!("writing {}", self.metadata_path.display()))
    }

    /// The active file number, resolving checkout-context changes. Resets
    /// to 0 (with a warning) if `.detaildb` names a different basename,
    /// matching the original's detection of reused log directories across
    /// checkouts.
    fn current_file_number(&self) -> Result<u32> {
        match self.read_metadata()? {
            Some(meta) if meta.basename == self.basename => Ok(meta.file_number),
            Some(_) => {
                tracing::warn!(
                    basename = %self.basename,
                    "detected checkout context change in detail store, resetting log file index"
                );
                self.write_metadata(0)?;
                Ok(0)
            }
            None => {
                self.write_metadata(0)?;
                Ok(0)
            }
        }
    }

    fn log_file_path(&self, file_number: u32) -> PathBuf {
        self.root_path.join(format!("{}{file_number}", self.basename))
    }

    /// Opens the active log file for append, rotating to the next file
    /// number first if the current one is already past the soft size
    /// limit. One record is always allowed to land past the limit before
    /// rotation happens, so this never splits a single record across files.
    fn open_for_append_and_rotate(&self) -> Result<(File, u32)> {
        let mut file_number = self.current_file_number()?;
        loop {
            let path = self.log_file_path(file_number);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let size = file.metadata()?.len();
            if size > self.logfile_limit {
                file_number += 1;
                self.write_metadata(file_number)?;
                continue;
            }
            return Ok((file, file_number));
        }
    }

    /// Append `value` and return the detail key needed to retrieve it.
    ///
    /// `value` must fit in a `u32` byte length (the header's `length` field
    /// is bit-exact with the original 4-byte little-endian encoding); larger
    /// payloads are rejected rather than silently truncated.
    pub fn put(&self, value: &[u8]) -> Result<String> {
        let length: u32 = value
            .len()
            .try_into()
            .map_err(|_| ErrorKind::validation("detail record exceeds 4 GiB"))?;

        let (mut file, file_number) = self.open_for_append_and_rotate()?;
        let offset = file.metadata()?.len() as u32;

        let header = DetailHeader {
            file_number,
            offset,
            length,
        };
        let encoded = header.encode();

        file.write_all(&encoded)
            .and_then(|_| file.write_all(value))
            .context("writing detail record")?;

        Ok(self.generate_detail_key(&encoded))
    }

    /// Fetch a previously stored detail record by key: the 20-byte header
    /// followed by the payload, exactly as framed on disk.
    pub fn get(&self, detail_key: &str) -> Result<Vec<u8>> {
        let header = self.parse_detail_key(detail_key)?;
        let path = self.log_file_path(header.file_number);
        let mut file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        file.seek(SeekFrom::Start(header.offset as u64))?;

        let mut buf = vec![0u8; HEADER_LEN + header.length as usize];
        file.read_exact(&mut buf)
            .with_context(|| format!("reading detail record from {}", path.display()))?;

        Ok(buf)
    }

    fn generate_detail_key(&self, header: &[u8; HEADER_LEN]) -> String {
        format!("{}{}", self.basename, BASE64.encode(header))
    }

    fn parse_detail_key(&self, detail_key: &str) -> Result<DetailHeader> {
        if detail_key.len() <= BASENAME_PREFIX_LEN {
            bail!("detail key too short to contain a basename and header");
        }
        let (_basename, encoded_header) = detail_key.split_at(BASENAME_PREFIX_LEN);
        let decoded = BASE64
            .decode(encoded_header)
            .context("decoding detail key header")?;
        DetailHeader::decode(&decoded)
    }
}
