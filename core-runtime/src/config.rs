//! # Core Configuration Module
//!
//! Provides configuration management for the streaming core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the host bridges every stream controller needs. It
//! enforces fail-fast validation so a missing capability is reported before the
//! first request goes out.
//!
//! ## Dependencies
//!
//! - `HttpClient` - Ranged HTTP fetches (desktop default: reqwest)
//! - `FileSystemAccess` - Disk cache I/O (desktop default: tokio fs)
//! - `MediaPlayerControl` - Host video player (optional, required for media sync)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! `HttpClient` and `FileSystemAccess` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .file_system(Arc::new(MyFileSystem))
//!     .media_player(Arc::new(MyVideoPlayer))
//!     .enable_media_sync(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, MediaPlayerControl};
use std::sync::Arc;

/// Core configuration for the streaming core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// HTTP client used for ranged fetches
    pub http_client: Arc<dyn HttpClient>,

    /// File system access used by the disk cache
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Host media player (optional)
    pub media_player: Option<Arc<dyn MediaPlayerControl>>,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "media_player",
                &self
                    .media_player
                    .as_ref()
                    .map(|_| "MediaPlayerControl { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Gate and pause the host media player on audio buffer shortage
    /// (requires MediaPlayerControl)
    pub enable_media_sync: bool,

    /// Allow stream controllers to read and write the disk cache
    pub enable_disk_cache: bool,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// Feature flags must be consistent with the provided bridges.
    pub fn validate(&self) -> Result<()> {
        if self.features.enable_media_sync && self.media_player.is_none() {
            return Err(Error::Config(
                "Media sync enabled but no MediaPlayerControl provided. \
                 Disable the feature or inject the host media player."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for ranged stream fetches. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Mobile: inject the platform-native HTTP stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the stream cache. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Mobile: inject sandboxed app storage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    media_player: Option<Arc<dyn MediaPlayerControl>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the host media player (optional).
    pub fn media_player(mut self, player: Arc<dyn MediaPlayerControl>) -> Self {
        self.media_player = Some(player);
        self
    }

    /// Enables or disables media player synchronisation.
    ///
    /// Requires a `MediaPlayerControl` to be provided.
    ///
    /// Default: false
    pub fn enable_media_sync(mut self, enabled: bool) -> Self {
        self.features.enable_media_sync = enabled;
        self
    }

    /// Enables or disables the disk cache.
    ///
    /// Default: false
    pub fn enable_disk_cache(mut self, enabled: bool) -> Self {
        self.features.enable_disk_cache = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - Required bridges are missing and no platform default exists
    /// - Feature flags are inconsistent with available bridges
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = CoreConfig {
            http_client,
            file_system,
            media_player: self.media_player,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::storage::FileMetadata;
    use bytes::Bytes;
    use std::path::{Path, PathBuf};

    // Mock implementations for testing
    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse {
                status: 206,
                headers: Default::default(),
                body: Bytes::new(),
            })
        }
    }

    struct MockFileSystem;

    #[async_trait]
    impl FileSystemAccess for MockFileSystem {
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp"))
        }

        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                modified_at: None,
                is_directory: false,
            })
        }

        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }

        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }

        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn open_read_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(tokio::io::empty()))
        }

        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
            Ok(Box::new(tokio::io::sink()))
        }
    }

    struct MockPlayer;

    impl MediaPlayerControl for MockPlayer {
        fn is_buffering(&self) -> bool {
            false
        }

        fn is_playing(&self) -> bool {
            false
        }

        fn first_frame_ready(&self) -> bool {
            true
        }

        fn play(&self) {}

        fn pause(&self) {}
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .file_system(Arc::new(MockFileSystem))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = builder_with_bridges().build().unwrap();

        assert!(config.media_player.is_none());
        assert_eq!(config.features, FeatureFlags::default());
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder().build();
        assert!(config.is_ok());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let result = CoreConfig::builder()
            .file_system(Arc::new(MockFileSystem))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient");
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_file_system() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "FileSystemAccess");
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(!flags.enable_media_sync);
        assert!(!flags.enable_disk_cache);
    }

    #[test]
    fn test_validate_media_sync_requires_player() {
        let result = builder_with_bridges().enable_media_sync(true).build();

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("MediaPlayerControl"));
    }

    #[test]
    fn test_media_sync_with_player() {
        let config = builder_with_bridges()
            .media_player(Arc::new(MockPlayer))
            .enable_media_sync(true)
            .enable_disk_cache(true)
            .build()
            .unwrap();

        assert!(config.features.enable_media_sync);
        assert!(config.features.enable_disk_cache);
        assert!(config.media_player.is_some());
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder_with_bridges().build().unwrap();
        let cloned = config.clone();

        assert!(Arc::ptr_eq(&config.http_client, &cloned.http_client));
        assert!(format!("{:?}", cloned).contains("HttpClient { ... }"));
    }
}
