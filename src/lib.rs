//! termwin - curses-style window handles for embedding hosts
//!
//! termwin tracks every native window of a terminal screen with exactly one
//! handle, links subwindows to their parents, and closes whole window trees
//! in one call. Hosts receive reference-counted [`WindowRef`]s whose
//! operations never fail loudly: a closed window simply answers `false` or
//! `None`.
//!
//! # Layers
//!
//! - **backend**: the drawing capability (`DrawingBackend`) and its
//!   headless and crossterm implementations
//! - **handle**: handle nodes, the registry, lifecycle and panels
//! - **session**: one screen plus its registry
//! - **host**: `Host` / `WindowRef`, the reference-counted host surface
//! - **config**: `~/.termwin/config.toml`

pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod host;
pub mod session;

pub use config::{Config, ReleasePolicy};
pub use error::HandleError;
pub use handle::{HandleKey, Released, WindowHandle, WindowRegistry};
pub use host::{Host, WindowRef};
pub use session::Session;
