//! Workspace facade crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-playback`, `core-runtime`, `bridge-desktop`).
//! Host applications can depend on `wavstream-workspace` and enable the
//! documented features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
#[cfg(any(feature = "desktop-shims", feature = "http-streaming"))]
pub use core_playback;
#[cfg(feature = "desktop-shims")]
pub use core_runtime;
