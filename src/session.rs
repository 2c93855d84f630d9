//! Session - one terminal screen plus the handles tracking its windows
//!
//! Every call that produces a native window routes the result through
//! [`WindowRegistry::find_or_create`], so a native window never gets a
//! second handle. Operations addressed to a closed handle are rejected
//! before the backend is touched.

use tracing::{debug, error, info, warn};

use crate::backend::{self, DrawingBackend, NativePanel, NativeWindow, Point, Size};
use crate::config::{ReleasePolicy, SessionConfig};
use crate::error::{HandleError, Result};
use crate::handle::{lifecycle, panel, HandleKey, Released, WindowHandle, WindowRegistry};

/// A terminal screen and its window registry
pub struct Session<B: DrawingBackend> {
    backend: B,
    registry: WindowRegistry,
    /// Handle of the root window (stdscr) once initialized
    root: Option<HandleKey>,
    config: SessionConfig,
}

impl<B: DrawingBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            registry: WindowRegistry::new(),
            root: None,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn root(&self) -> Option<HandleKey> {
        self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    /// Start the screen and register the root window. On a started
    /// session this resumes the screen after [`Session::end`] and returns
    /// the same root.
    pub fn init(&mut self) -> Result<HandleKey> {
        let native = self
            .backend
            .init_screen()
            .map_err(HandleError::native("init_screen"))?;
        if let Some(root) = self.root {
            let current = self.native_of(root)?;
            if current != native {
                error!("Root window {} resumed as {}", current, native);
                return Err(HandleError::IdentityViolation(native));
            }
            debug!("Session resumed, root window {}", native);
            return Ok(root);
        }
        let key = self.registry.find_or_create(native)?;
        if self.config.keypad {
            if let Err(e) = self.backend.set_keypad(native, true) {
                warn!("Could not enable keypad on the root window: {}", e);
            }
        }
        self.root = Some(key);
        info!("Session initialized, root window {}", native);
        Ok(key)
    }

    /// Give the terminal back; windows stay tracked
    pub fn end(&mut self) -> Result<()> {
        self.backend
            .end_screen()
            .map_err(HandleError::native("end_screen"))
    }

    /// Close every window, forget every handle and return to the
    /// uninitialized state. Returns the number of handles dropped.
    pub fn reset(&mut self) -> usize {
        match self.backend.end_screen() {
            Ok(()) | Err(backend::BackendError::NotInitialized) => {}
            Err(e) => warn!("end_screen during reset failed: {}", e),
        }
        let trees = lifecycle::close_all(&mut self.registry, &mut self.backend);
        let dropped = self.registry.drain();
        self.root = None;
        info!("Session reset: {} window trees closed, {} handles dropped", trees, dropped);
        dropped
    }

    fn require_init(&self) -> Result<()> {
        if self.root.is_none() {
            return Err(HandleError::NotInitialized);
        }
        Ok(())
    }

    /// Native window of an open handle
    pub fn native_of(&self, key: HandleKey) -> Result<NativeWindow> {
        Ok(self.registry.open(key)?.native())
    }

    /// Native identity of a handle in any state
    pub fn native(&self, key: HandleKey) -> Option<NativeWindow> {
        self.registry.get(key).map(WindowHandle::native)
    }

    pub fn is_valid(&self, key: HandleKey) -> bool {
        self.registry.open(key).is_ok()
    }

    /// Handle of a native window produced outside the session's own calls
    pub fn adopt(&mut self, native: NativeWindow) -> Result<HandleKey> {
        self.registry.find_or_create(native)
    }

    pub fn new_window(&mut self, size: Size, origin: Point) -> Result<HandleKey> {
        self.require_init()?;
        let native = self
            .backend
            .create_window(size, origin)
            .map_err(HandleError::native("create_window"))?;
        self.registry.find_or_create(native)
    }

    pub fn new_pad(&mut self, size: Size) -> Result<HandleKey> {
        self.require_init()?;
        let native = self
            .backend
            .create_pad(size)
            .map_err(HandleError::native("create_pad"))?;
        self.registry.find_or_create(native)
    }

    /// Subwindow at a screen-relative origin
    pub fn sub_window(&mut self, parent: HandleKey, size: Size, origin: Point) -> Result<HandleKey> {
        self.create_child(parent, "create_subwindow", |b, p| b.create_subwindow(p, size, origin))
    }

    /// Subwindow at an origin relative to the parent
    pub fn derived_window(&mut self, parent: HandleKey, size: Size, origin: Point) -> Result<HandleKey> {
        self.create_child(parent, "create_derived_window", |b, p| {
            b.create_derived_window(p, size, origin)
        })
    }

    pub fn sub_pad(&mut self, parent: HandleKey, size: Size, origin: Point) -> Result<HandleKey> {
        self.create_child(parent, "create_subpad", |b, p| b.create_subpad(p, size, origin))
    }

    fn create_child<F>(&mut self, parent: HandleKey, op: &'static str, create: F) -> Result<HandleKey>
    where
        F: FnOnce(&mut B, NativeWindow) -> backend::Result<NativeWindow>,
    {
        let parent_native = self.native_of(parent)?;
        let native = create(&mut self.backend, parent_native).map_err(HandleError::native(op))?;
        let key = self.registry.find_or_create(native)?;
        self.registry.link_child(parent, key)?;
        debug!("Window {} created under {}", native, parent_native);
        Ok(key)
    }

    /// Copy of a window as a new top-level window
    pub fn duplicate(&mut self, key: HandleKey) -> Result<HandleKey> {
        let native = self.native_of(key)?;
        let copy = self
            .backend
            .duplicate_window(native)
            .map_err(HandleError::native("duplicate_window"))?;
        self.registry.find_or_create(copy)
    }

    /// Close a window and all of its subwindows
    pub fn close(&mut self, key: HandleKey) -> Result<bool> {
        let closed = lifecycle::close(&mut self.registry, &mut self.backend, key)?;
        if self.root == Some(key) && !self.is_valid(key) {
            // Without its root window the session starts over
            self.root = None;
            info!("Root window closed, session uninitialized");
        }
        Ok(closed)
    }

    pub fn wrap(&mut self, key: HandleKey) -> Result<usize> {
        lifecycle::wrap(&mut self.registry, key)
    }

    /// Drop one reference, applying the release policy to idle windows
    pub fn release(&mut self, key: HandleKey) -> Result<Released> {
        let released = lifecycle::release(&mut self.registry, key)?;
        if released == Released::Idle
            && self.config.release_policy == ReleasePolicy::CloseOnLastRelease
            && self.root != Some(key)
        {
            debug!("Closing unreferenced window {:?}", key);
            lifecycle::close(&mut self.registry, &mut self.backend, key)?;
            return Ok(Released::Freed);
        }
        Ok(released)
    }

    /// Open parent of an open handle
    pub fn parent(&self, key: HandleKey) -> Result<Option<HandleKey>> {
        let handle = self.registry.open(key)?;
        Ok(handle.parent().filter(|&p| self.is_valid(p)))
    }

    pub fn children(&self, key: HandleKey) -> Result<Vec<HandleKey>> {
        Ok(self.registry.open(key)?.children().to_vec())
    }

    /// Number of handles whose window is still open
    pub fn live_handles(&self) -> usize {
        self.registry
            .keys()
            .filter(|&k| self.is_valid(k))
            .count()
    }

    /// Run a native operation on an open window
    pub fn with_window<T, F>(&mut self, key: HandleKey, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut B, NativeWindow) -> backend::Result<T>,
    {
        let native = self.native_of(key)?;
        f(&mut self.backend, native).map_err(HandleError::native(op))
    }

    /// Run a native operation involving two open windows
    pub fn with_windows<T, F>(&mut self, src: HandleKey, dst: HandleKey, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut B, NativeWindow, NativeWindow) -> backend::Result<T>,
    {
        let src = self.native_of(src)?;
        let dst = self.native_of(dst)?;
        f(&mut self.backend, src, dst).map_err(HandleError::native(op))
    }

    /// Run a native query on an open window
    pub fn query<T, F>(&self, key: HandleKey, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&B, NativeWindow) -> backend::Result<T>,
    {
        let native = self.native_of(key)?;
        f(&self.backend, native).map_err(HandleError::native(op))
    }

    pub fn new_panel(&mut self, key: HandleKey) -> Result<NativePanel> {
        panel::attach(&mut self.registry, &mut self.backend, key)
    }

    pub fn del_panel(&mut self, key: HandleKey) -> Result<()> {
        panel::detach(&mut self.registry, &mut self.backend, key)
    }

    pub fn replace_panel(&mut self, src: HandleKey, dst: HandleKey) -> Result<()> {
        panel::replace(&mut self.registry, &mut self.backend, src, dst)
    }

    pub fn panel_above(&self, key: HandleKey) -> Result<Option<HandleKey>> {
        panel::above(&self.registry, &self.backend, key)
    }

    pub fn panel_below(&self, key: HandleKey) -> Result<Option<HandleKey>> {
        panel::below(&self.registry, &self.backend, key)
    }

    /// Run a native operation on the panel of an open window
    pub fn with_panel<T, F>(&mut self, key: HandleKey, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut B, NativePanel) -> backend::Result<T>,
    {
        let panel = panel::panel_of(&self.registry, key)?;
        f(&mut self.backend, panel).map_err(HandleError::native(op))
    }

    pub fn update_panels(&mut self) {
        self.backend.update_panels();
    }

    pub fn doupdate(&mut self) -> Result<()> {
        self.backend
            .doupdate()
            .map_err(HandleError::native("doupdate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailPoint, MemoryBackend};

    fn session() -> Session<MemoryBackend> {
        let mut session = Session::new(MemoryBackend::headless(Size::new(24, 80)));
        session.init().unwrap();
        session
    }

    #[test]
    fn test_window_and_subwindow_scenario() {
        let mut s = session();
        let w = s.new_window(Size::new(24, 80), Point::new(0, 0)).unwrap();
        let sub = s.sub_window(w, Size::new(10, 10), Point::new(5, 5)).unwrap();
        s.wrap(w).unwrap();
        s.wrap(sub).unwrap();

        assert_eq!(s.parent(sub).unwrap(), Some(w));
        assert_eq!(s.children(w).unwrap(), vec![sub]);

        assert!(s.close(w).unwrap());
        assert!(!s.is_valid(w));
        assert!(!s.is_valid(sub));
        assert!(s.registry().get(w).unwrap().children().is_empty());
        s.registry().verify().unwrap();
    }

    #[test]
    fn test_init_twice_returns_root() {
        let mut s = session();
        let root = s.root().unwrap();
        assert_eq!(s.init().unwrap(), root);
        assert!(s.backend().device().is_entered());
        assert!(s.is_valid(root));
        assert_eq!(s.live_handles(), 1);
    }

    #[test]
    fn test_end_then_init_resumes() {
        let mut s = session();
        let root = s.root().unwrap();
        let w = s.new_window(Size::new(2, 2), Point::new(0, 0)).unwrap();

        s.end().unwrap();
        assert!(!s.backend().device().is_entered());
        assert_eq!(s.init().unwrap(), root);
        assert!(s.backend().device().is_entered());
        assert!(s.is_valid(w));
    }

    #[test]
    fn test_closing_root_uninitializes() {
        let mut s = session();
        let root = s.root().unwrap();
        assert!(s.close(root).unwrap());
        assert!(!s.is_initialized());

        // The terminal is still given back
        s.end().unwrap();
        assert!(!s.backend().device().is_entered());

        let again = s.init().unwrap();
        assert_ne!(again, root);
        assert!(s.backend().device().is_entered());
        let w = s.new_window(Size::new(2, 2), Point::new(0, 0)).unwrap();
        assert!(s.is_valid(w));
        s.registry().verify().unwrap();
    }

    #[test]
    fn test_adopt_returns_existing_handle() {
        let mut s = session();
        let w = s.new_window(Size::new(2, 2), Point::new(0, 0)).unwrap();
        let native = s.native_of(w).unwrap();
        let before = s.registry().len();

        assert_eq!(s.adopt(native).unwrap(), w);
        assert_eq!(s.registry().len(), before);
    }

    #[test]
    fn test_with_windows_rejects_closed_handle() {
        let mut s = session();
        let a = s.new_window(Size::new(2, 2), Point::new(0, 0)).unwrap();
        let b = s.new_window(Size::new(2, 2), Point::new(0, 1)).unwrap();
        s.with_windows(a, b, "overwrite", |bk, src, dst| bk.overwrite(src, dst))
            .unwrap();

        s.close(b).unwrap();
        assert!(matches!(
            s.with_windows(a, b, "overwrite", |bk, src, dst| bk.overwrite(src, dst)),
            Err(HandleError::InvalidHandle)
        ));
    }

    #[test]
    fn test_windows_need_init() {
        let mut s = Session::new(MemoryBackend::headless(Size::new(24, 80)));
        assert!(matches!(
            s.new_window(Size::new(1, 1), Point::new(0, 0)),
            Err(HandleError::NotInitialized)
        ));
    }

    #[test]
    fn test_closed_handle_rejects_operations() {
        let mut s = session();
        let w = s.new_window(Size::new(5, 5), Point::new(0, 0)).unwrap();
        s.wrap(w).unwrap();
        s.close(w).unwrap();

        assert!(matches!(
            s.with_window(w, "add_str", |b, n| b.add_str(n, "x")),
            Err(HandleError::InvalidHandle)
        ));
        assert!(matches!(
            s.sub_window(w, Size::new(1, 1), Point::new(0, 0)),
            Err(HandleError::InvalidHandle)
        ));
        assert!(matches!(s.new_panel(w), Err(HandleError::InvalidHandle)));
        assert!(matches!(s.duplicate(w), Err(HandleError::InvalidHandle)));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut s = session();
        let w = s.new_window(Size::new(5, 5), Point::new(0, 0)).unwrap();
        s.with_window(w, "add_str", |b, n| b.add_str(n, "dup")).unwrap();
        let d = s.duplicate(w).unwrap();

        assert_ne!(s.native_of(w).unwrap(), s.native_of(d).unwrap());
        assert_eq!(s.parent(d).unwrap(), None);
        s.close(w).unwrap();
        assert!(s.is_valid(d));
        let cell = s.backend().cell(s.native_of(d).unwrap(), Point::new(0, 0)).unwrap();
        assert_eq!(cell.ch, 'd');
    }

    #[test]
    fn test_native_create_failure_leaves_no_handle() {
        let mut s = session();
        let before = s.registry().len();
        s.backend_mut().fail_next(FailPoint::CreateSubwindow);
        let root = s.root().unwrap();

        assert!(matches!(
            s.derived_window(root, Size::new(2, 2), Point::new(0, 0)),
            Err(HandleError::NativeOperationFailed { .. })
        ));
        assert_eq!(s.registry().len(), before);
        assert!(s.children(root).unwrap().is_empty());
    }

    #[test]
    fn test_pads_and_subpads() {
        let mut s = session();
        let pad = s.new_pad(Size::new(100, 100)).unwrap();
        let sub = s.sub_pad(pad, Size::new(10, 10), Point::new(50, 50)).unwrap();
        assert_eq!(s.parent(sub).unwrap(), Some(pad));

        let root = s.root().unwrap();
        assert!(s.sub_pad(root, Size::new(1, 1), Point::new(0, 0)).is_err());
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut s = session();
        let w = s.new_window(Size::new(5, 5), Point::new(0, 0)).unwrap();
        s.derived_window(w, Size::new(2, 2), Point::new(1, 1)).unwrap();
        s.wrap(w).unwrap();

        assert_eq!(s.reset(), 3);
        assert!(!s.is_initialized());
        assert!(s.registry().is_empty());
        assert_eq!(s.backend().window_count(), 0);
        assert!(matches!(s.release(w), Err(HandleError::UnknownHandle)));

        // A fresh session can start on the same backend
        s.init().unwrap();
        assert_eq!(s.live_handles(), 1);
    }

    #[test]
    fn test_close_on_last_release_policy() {
        let config = SessionConfig {
            release_policy: ReleasePolicy::CloseOnLastRelease,
            keypad: false,
        };
        let mut s = Session::with_config(MemoryBackend::headless(Size::new(24, 80)), config);
        let root = s.init().unwrap();
        let w = s.new_window(Size::new(5, 5), Point::new(0, 0)).unwrap();
        let native = s.native_of(w).unwrap();
        s.wrap(w).unwrap();
        s.wrap(w).unwrap();

        assert_eq!(s.release(w).unwrap(), Released::Held(1));
        assert_eq!(s.release(w).unwrap(), Released::Freed);
        assert!(s.registry().get(w).is_none());
        assert!(!s.backend().is_live(native));

        // The root window survives losing its last reference
        s.wrap(root).unwrap();
        assert_eq!(s.release(root).unwrap(), Released::Idle);
        assert!(s.is_valid(root));
    }

    #[test]
    fn test_unbalanced_release_keeps_window_open() {
        let config = SessionConfig {
            release_policy: ReleasePolicy::CloseOnLastRelease,
            keypad: false,
        };
        let mut s = Session::with_config(MemoryBackend::headless(Size::new(24, 80)), config);
        s.init().unwrap();
        let w = s.new_window(Size::new(5, 5), Point::new(0, 0)).unwrap();

        assert_eq!(s.release(w).unwrap(), Released::Unbalanced);
        assert!(s.is_valid(w));
    }
}
