//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the streaming core:
//! - Logging and tracing infrastructure
//! - Host bridge configuration
//! - Event bus for stream and transport events
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the playback crate depends on.
//! It establishes the logging conventions and the event broadcasting
//! mechanism used throughout the workspace.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
