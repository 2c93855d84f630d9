//! Window handles - tracking nodes for native windows.
//!
//! Every live native window has exactly one [`WindowHandle`], stored in a
//! [`WindowRegistry`] arena and addressed by a generational [`HandleKey`].
//!
//! - **registry**: the arena and the native-identity index
//! - **lifecycle**: reference counting and recursive close
//! - **panel**: attaching, detaching and querying stacking panels
//!
//! # Handle Tree
//!
//! ```text
//! WindowRegistry
//! ├── stdscr ─┬─ subwin A ── derwin B
//! │           └─ subwin C
//! ├── newwin W (panel)
//! └── dupwin D
//! ```
//!
//! Parent links are plain keys: once a parent is freed its key simply stops
//! resolving, so a child can never reach freed memory through it.

pub mod lifecycle;
pub mod panel;
pub mod registry;

pub use lifecycle::Released;
pub use registry::WindowRegistry;

use crate::backend::{NativePanel, NativeWindow};

slotmap::new_key_type! {
    /// Stable arena key of a window handle
    pub struct HandleKey;
}

/// Tracking state for one native window
#[derive(Debug)]
pub struct WindowHandle {
    native: NativeWindow,
    parent: Option<HandleKey>,
    children: Vec<HandleKey>,
    panel: Option<NativePanel>,
    refs: usize,
    closed: bool,
}

impl WindowHandle {
    fn new(native: NativeWindow) -> Self {
        Self {
            native,
            parent: None,
            children: Vec::new(),
            panel: None,
            refs: 0,
            closed: false,
        }
    }

    pub fn native(&self) -> NativeWindow {
        self.native
    }

    pub fn parent(&self) -> Option<HandleKey> {
        self.parent
    }

    pub fn children(&self) -> &[HandleKey] {
        &self.children
    }

    pub fn panel(&self) -> Option<NativePanel> {
        self.panel
    }

    pub fn is_panel(&self) -> bool {
        self.panel.is_some()
    }

    /// Live external references
    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Both free conditions hold
    fn is_reclaimable(&self) -> bool {
        self.closed && self.refs == 0
    }
}
