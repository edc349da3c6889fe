//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the streaming core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with byte ranges and retry
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the stream cache
//!
//! ### Playback
//! - [`MediaPlayerControl`](playback::MediaPlayerControl) - Host video/media player surface
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | Mobile   | TBD                 | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core should fail fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! use core_runtime::error::Error;
//!
//! let http_client = builder.http_client
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "No HTTP client implementation provided.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type for consistent
//! error handling. Platform implementations should convert platform-specific
//! errors to `BridgeError` and include context such as file paths or URLs.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod logging;
pub mod playback;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use playback::MediaPlayerControl;
pub use storage::{FileMetadata, FileSystemAccess};
