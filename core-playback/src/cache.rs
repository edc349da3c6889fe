//! # Stream Disk Cache
//!
//! A stream is cached as the exact byte sequence fetched from the network,
//! written in order as chunks arrive. Once the whole file has been written its
//! SHA-256 digest is recorded as an empty marker file whose name is the cache
//! directory path followed by the hex digest. On the next run the file is only
//! trusted if its recomputed digest has a marker.
//!
//! All I/O goes through [`FileSystemAccess`] so hosts can redirect it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::storage::FileSystemAccess;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{PlaybackError, Result};

/// How the controller uses the cache file. The modes are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Off,
    Read,
    Write,
}

/// File name used for the cache of `url`.
///
/// The query string and fragment are dropped, then the extension of the last
/// path segment, and `.wav` is appended.
pub fn cache_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    let stem = match segment.rfind('.') {
        Some(0) | None => segment,
        Some(dot) => &segment[..dot],
    };

    if stem.is_empty() {
        "stream.wav".to_string()
    } else {
        format!("{}.wav", stem)
    }
}

/// Full path of the cache file for `url` inside `cache_dir`.
pub fn cache_path_for_url(url: &str, cache_dir: &Path) -> PathBuf {
    cache_dir.join(cache_file_name(url))
}

/// Marker path: the cache directory path string followed by the hex digest.
pub fn checksum_marker_path(cache_dir: &Path, hex_digest: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", cache_dir.display(), hex_digest))
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Cache file handles and bookkeeping for one stream.
pub struct CacheSession {
    fs: Arc<dyn FileSystemAccess>,
    cache_dir: PathBuf,
    path: PathBuf,
    mode: CacheMode,
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    written: u64,
    read: u64,
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("written", &self.written)
            .field("read", &self.read)
            .finish()
    }
}

/// Outcome of opening a cache session.
#[derive(Debug)]
pub struct CacheOpen {
    pub session: CacheSession,
    /// Set when an existing file was rejected and deleted.
    pub discarded: Option<String>,
}

impl CacheSession {
    /// A session that never touches the disk.
    pub fn disabled(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self {
            fs,
            cache_dir: PathBuf::new(),
            path: PathBuf::new(),
            mode: CacheMode::Off,
            reader: None,
            writer: None,
            written: 0,
            read: 0,
        }
    }

    /// Resolve the cache file for `url` and pick the initial mode.
    ///
    /// An existing file selects `Read` mode, unless `verify` is set and the
    /// file has no matching checksum marker, in which case it is deleted and
    /// the session starts in `Write` mode.
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        cache_directory: &str,
        url: &str,
        verify: bool,
    ) -> Result<CacheOpen> {
        let cache_dir = fs.get_data_directory().await?.join(cache_directory);
        fs.create_dir_all(&cache_dir).await?;
        let path = cache_path_for_url(url, &cache_dir);

        let mut session = Self {
            fs,
            cache_dir,
            path,
            mode: CacheMode::Write,
            reader: None,
            writer: None,
            written: 0,
            read: 0,
        };

        if !session.fs.exists(&session.path).await? {
            debug!(file = %session.file_label(), "No cached copy, writing new cache");
            return Ok(CacheOpen {
                session,
                discarded: None,
            });
        }

        if verify && !session.verify_integrity().await? {
            let reason = "checksum marker missing".to_string();
            warn!(file = %session.file_label(), %reason, "Discarding cached copy");
            session.delete_file().await;
            return Ok(CacheOpen {
                session,
                discarded: Some(reason),
            });
        }

        info!(file = %session.file_label(), "Using cached copy");
        session.mode = CacheMode::Read;
        Ok(CacheOpen {
            session,
            discarded: None,
        })
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Bytes appended in `Write` mode.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes consumed in `Read` mode.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Size of the cache file on disk.
    pub async fn file_size(&mut self) -> Result<u64> {
        Ok(self.fs.metadata(&self.path).await?.size)
    }

    /// Recompute the file digest and check for its marker.
    pub async fn verify_integrity(&mut self) -> Result<bool> {
        let data = self.fs.read_file(&self.path).await?;
        let digest = sha256_hex(&data);
        let marker = checksum_marker_path(&self.cache_dir, &digest);
        Ok(self.fs.exists(&marker).await?)
    }

    /// Read the next `len` bytes.
    ///
    /// Fewer bytes than requested is a `CacheReadShortfall`.
    pub async fn read_next(&mut self, len: usize) -> Result<Bytes> {
        if self.mode != CacheMode::Read {
            return Err(PlaybackError::InvalidState(format!(
                "cache read in {:?} mode",
                self.mode
            )));
        }

        if self.reader.is_none() {
            self.reader = Some(self.fs.open_read_stream(&self.path).await?);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| PlaybackError::Internal("cache reader missing".to_string()))?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.read += filled as u64;

        if filled < len {
            return Err(PlaybackError::CacheReadShortfall {
                expected: len,
                actual: filled,
            });
        }

        buf.truncate(filled);
        Ok(buf.freeze())
    }

    /// Append a raw chunk in `Write` mode; returns the cached length.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<u64> {
        if self.mode != CacheMode::Write {
            return Ok(self.written);
        }

        if self.writer.is_none() {
            self.writer = Some(self.fs.open_write_stream(&self.path).await?);
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(chunk).await?;
        }
        self.written += chunk.len() as u64;
        Ok(self.written)
    }

    /// Close the writer, hash the file and create its checksum marker.
    ///
    /// The session switches to `Off`; returns the hex digest.
    pub async fn complete(&mut self) -> Result<String> {
        self.close_writer().await?;
        self.mode = CacheMode::Off;

        let data = self.fs.read_file(&self.path).await?;
        let digest = sha256_hex(&data);
        let marker = checksum_marker_path(&self.cache_dir, &digest);
        self.fs.write_file(&marker, Bytes::new()).await?;

        info!(
            file = %self.file_label(),
            bytes = data.len(),
            checksum = %digest,
            "Stream cache completed"
        );
        Ok(digest)
    }

    /// Delete the cache file and continue in `Write` mode from scratch.
    pub async fn restart_write(&mut self) {
        self.release();
        self.delete_file().await;
        self.written = 0;
        self.read = 0;
        self.mode = CacheMode::Write;
    }

    /// Delete the cache file and stop caching for this stream.
    pub async fn abandon(&mut self) {
        self.release();
        self.delete_file().await;
        self.mode = CacheMode::Off;
    }

    /// Flush and close open handles.
    pub async fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.close_writer().await
    }

    /// Drop handles without flushing.
    pub fn release(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    async fn close_writer(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn delete_file(&mut self) {
        if let Err(err) = self.fs.delete_file(&self.path).await {
            debug!(file = %self.file_label(), error = %err, "Cache file not deleted");
        }
    }

    fn file_label(&self) -> String {
        core_runtime::logging::strip_path(&self.path.display().to_string()).to_string()
    }
}
