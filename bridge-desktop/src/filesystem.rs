//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Provides async file I/O operations using:
/// - `tokio::fs` for async operations
/// - Platform-specific app data directory
pub struct TokioFileSystem {
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the default data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("wavstream");

        Self { data_dir }
    }

    /// Create a new file system accessor rooted at a custom directory
    pub fn with_data_directory(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.data_dir)
            .await
            .map_err(Self::map_io_error)?
        {
            fs::create_dir_all(&self.data_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.data_dir, "Created data directory");
        }
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let file = fs::File::open(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Opened file for reading");
        Ok(Box::new(file))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        let file = fs::File::create(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Opened file for writing");
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn scratch_dir() -> PathBuf {
        env::temp_dir().join(format!("wavstream-fs-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_custom_data_directory_is_created() {
        let data = scratch_dir();
        let fs = TokioFileSystem::with_data_directory(data.clone());

        let data_dir = fs.get_data_directory().await.unwrap();
        assert_eq!(data_dir, data);
        assert!(fs.exists(&data).await.unwrap());

        tokio::fs::remove_dir_all(&data).await.ok();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let root = scratch_dir();
        let fs = TokioFileSystem::with_data_directory(root.clone());
        let test_file = root.join("nested").join("test-file.txt");

        let data = Bytes::from("Hello, World!");
        fs.write_file(&test_file, data.clone()).await.unwrap();

        let read_data = fs.read_file(&test_file).await.unwrap();
        assert_eq!(data, read_data);
        assert_eq!(fs.metadata(&test_file).await.unwrap().size, 13);

        fs.delete_file(&test_file).await.unwrap();
        assert!(!fs.exists(&test_file).await.unwrap());

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn test_write_stream_truncates_and_read_stream_reads() {
        let root = scratch_dir();
        let fs = TokioFileSystem::with_data_directory(root.clone());
        let path = root.join("stream.bin");

        fs.write_file(&path, Bytes::from_static(b"stale contents"))
            .await
            .unwrap();

        let mut writer = fs.open_write_stream(&path).await.unwrap();
        writer.write_all(b"abc").await.unwrap();
        writer.write_all(b"def").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = fs.open_read_stream(&path).await.unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"abcdef");

        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
