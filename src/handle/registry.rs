//! Window registry - the single source of truth for live handles

use std::collections::{HashMap, HashSet};

use slotmap::SlotMap;
use tracing::{debug, error};

use super::{HandleKey, WindowHandle};
use crate::backend::{NativePanel, NativeWindow};
use crate::error::{HandleError, Result};

/// Arena of all tracked handles plus a native-identity index.
///
/// The index only covers handles whose native window is still live; a
/// closed handle stays in the arena (while references to it remain) but
/// no longer answers for its old native identity.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    handles: SlotMap<HandleKey, WindowHandle>,
    index: HashMap<NativeWindow, HandleKey>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle tracking `native`, creating it on first sight
    pub fn find_or_create(&mut self, native: NativeWindow) -> Result<HandleKey> {
        if let Some(&key) = self.index.get(&native) {
            return match self.handles.get(key) {
                Some(handle) if handle.native == native && !handle.closed => Ok(key),
                _ => {
                    error!("Registry index for native window {} is stale", native);
                    Err(HandleError::IdentityViolation(native))
                }
            };
        }

        let key = self.handles.insert(WindowHandle::new(native));
        self.index.insert(native, key);
        debug!("Tracking native window {} as {:?}", native, key);
        Ok(key)
    }

    /// Handle currently tracking `native`, if any
    pub fn find(&self, native: NativeWindow) -> Option<HandleKey> {
        self.index.get(&native).copied()
    }

    /// Handle owning the given native panel
    pub fn lookup_by_panel(&self, panel: NativePanel) -> Option<HandleKey> {
        self.handles
            .iter()
            .find(|(_, h)| h.panel == Some(panel))
            .map(|(key, _)| key)
    }

    pub fn get(&self, key: HandleKey) -> Option<&WindowHandle> {
        self.handles.get(key)
    }

    /// The handle, provided its window is still open
    pub fn open(&self, key: HandleKey) -> Result<&WindowHandle> {
        match self.handles.get(key) {
            Some(handle) if handle.closed => Err(HandleError::InvalidHandle),
            Some(handle) => Ok(handle),
            None => Err(HandleError::UnknownHandle),
        }
    }

    pub(crate) fn get_mut(&mut self, key: HandleKey) -> Option<&mut WindowHandle> {
        self.handles.get_mut(key)
    }

    pub fn contains(&self, key: HandleKey) -> bool {
        self.handles.contains_key(key)
    }

    /// Number of handle structs alive (open or closed-but-referenced)
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = HandleKey> + '_ {
        self.handles.keys()
    }

    /// Open handles that have no open parent
    pub fn roots(&self) -> Vec<HandleKey> {
        self.handles
            .iter()
            .filter(|(_, h)| !h.closed)
            .filter(|(_, h)| {
                h.parent
                    .and_then(|p| self.handles.get(p))
                    .map_or(true, |p| p.closed)
            })
            .map(|(key, _)| key)
            .collect()
    }

    /// Record `child` as a subwindow of `parent`
    pub(crate) fn link_child(&mut self, parent: HandleKey, child: HandleKey) -> Result<()> {
        if parent == child || !self.handles.contains_key(parent) {
            return Err(HandleError::UnknownHandle);
        }
        let handle = self.handles.get_mut(child).ok_or(HandleError::UnknownHandle)?;
        handle.parent = Some(parent);

        let parent = &mut self.handles[parent];
        if !parent.children.contains(&child) {
            parent.children.push(child);
        }
        Ok(())
    }

    /// Splice `child` out of its parent's child list
    pub(crate) fn unlink_child(&mut self, parent: HandleKey, child: HandleKey) {
        if let Some(parent) = self.handles.get_mut(parent) {
            if let Some(pos) = parent.children.iter().position(|&c| c == child) {
                parent.children.swap_remove(pos);
            }
        }
    }

    /// Stop answering for the handle's native identity
    pub(crate) fn unindex(&mut self, key: HandleKey) {
        if let Some(native) = self.handles.get(key).map(|h| h.native) {
            if self.index.get(&native) == Some(&key) {
                self.index.remove(&native);
            }
        }
    }

    /// Free a handle struct
    pub(crate) fn remove(&mut self, key: HandleKey) -> Option<WindowHandle> {
        self.unindex(key);
        let handle = self.handles.remove(key)?;
        debug!("Freed handle {:?} (native window {})", key, handle.native);
        Some(handle)
    }

    /// Drop every handle, returning how many were dropped
    pub(crate) fn drain(&mut self) -> usize {
        let count = self.handles.len();
        self.handles.clear();
        self.index.clear();
        count
    }

    /// Check the identity and tree invariants
    pub fn verify(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (key, handle) in &self.handles {
            if handle.closed {
                let still_linked = handle
                    .parent
                    .and_then(|p| self.handles.get(p))
                    .map_or(false, |p| p.children.contains(&key));
                if !handle.children.is_empty() || still_linked || handle.panel.is_some() {
                    error!("Closed handle {:?} is still part of the window tree", key);
                    return Err(HandleError::IdentityViolation(handle.native));
                }
                continue;
            }

            if !seen.insert(handle.native) || self.index.get(&handle.native) != Some(&key) {
                error!("Native window {} has more than one handle", handle.native);
                return Err(HandleError::IdentityViolation(handle.native));
            }
            for &child in &handle.children {
                let back = self.handles.get(child).and_then(|c| c.parent);
                if back != Some(key) {
                    error!("Child {:?} of {:?} does not point back to its parent", child, key);
                    return Err(HandleError::IdentityViolation(handle.native));
                }
            }
        }

        if self.index.len() != seen.len() {
            let stray = self
                .index
                .keys()
                .find(|n| !seen.contains(*n))
                .copied()
                .unwrap_or(NativeWindow(0));
            error!("Registry index holds stale entry for native window {}", stray);
            return Err(HandleError::IdentityViolation(stray));
        }
        Ok(())
    }
}
