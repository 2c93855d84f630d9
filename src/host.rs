//! Host bridge - window references handed to a scripting host
//!
//! A [`WindowRef`] is one live use of a window handle. Creating or cloning
//! one counts a reference; dropping one releases it. Drops can happen at
//! any point, including while the session is in the middle of another
//! operation (a host collector running during a call). Such releases are
//! queued and applied at the start of the next session operation, so the
//! registry is only ever mutated from one place at a time.
//!
//! # Example
//!
//! ```
//! use termwin::backend::{MemoryBackend, Size};
//! use termwin::{Host, Session};
//!
//! let host = Host::new(Session::new(MemoryBackend::headless(Size::new(24, 80))));
//! let stdscr = host.initscr().unwrap();
//! let win = host.newwin(10, 20, 2, 2).unwrap();
//! let sub = win.derwin(3, 3, 1, 1).unwrap();
//!
//! assert!(win.close());
//! assert!(!sub.is_valid());
//! assert_eq!(sub.to_string(), "INVALID WINDOW");
//! assert_eq!(stdscr.to_string(), "stdscr");
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::backend::{Attr, Border, Cell, DrawingBackend, Key, NativeWindow, Point, Size};
use crate::error::{HandleError, Result};
use crate::handle::HandleKey;
use crate::session::Session;

/// Reference-count change that arrived while the session was busy
#[derive(Clone, Copy, Debug)]
enum Pending {
    Wrap(HandleKey),
    Release(HandleKey),
}

struct Shared<B: DrawingBackend> {
    session: RefCell<Session<B>>,
    pending: RefCell<Vec<Pending>>,
}

impl<B: DrawingBackend> Shared<B> {
    /// Apply queued reference changes, oldest first
    fn drain(&self, session: &mut Session<B>) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let count = pending.len();
        for change in pending {
            match change {
                Pending::Wrap(key) => {
                    if let Err(e) = session.wrap(key) {
                        debug!("Deferred wrap of {:?} dropped: {}", key, e);
                    }
                }
                Pending::Release(key) => release_one(session, key),
            }
        }
        count
    }

    fn apply(&self, change: Pending) {
        match self.session.try_borrow_mut() {
            Ok(mut session) => {
                self.drain(&mut *session);
                match change {
                    Pending::Wrap(key) => {
                        if let Err(e) = session.wrap(key) {
                            debug!("wrap of {:?} failed: {}", key, e);
                        }
                    }
                    Pending::Release(key) => release_one(&mut *session, key),
                }
            }
            Err(_) => {
                trace!("Session busy, deferring {:?}", change);
                self.pending.borrow_mut().push(change);
            }
        }
    }
}

fn release_one<B: DrawingBackend>(session: &mut Session<B>, key: HandleKey) {
    match session.release(key) {
        Ok(released) => trace!("Released {:?}: {:?}", key, released),
        // Handles forgotten by a reset
        Err(HandleError::UnknownHandle) => trace!("Release of forgotten handle {:?}", key),
        Err(e) => warn!("Release of {:?} failed: {}", key, e),
    }
}

/// Count a reference to `key` and hand it out
fn new_ref<B: DrawingBackend>(
    shared: &Rc<Shared<B>>,
    session: &mut Session<B>,
    key: HandleKey,
) -> Result<WindowRef<B>> {
    session.wrap(key)?;
    let native = session.native(key).ok_or(HandleError::UnknownHandle)?;
    Ok(WindowRef {
        key,
        native,
        host: Rc::downgrade(shared),
    })
}

/// Shared access to a session from the host side
pub struct Host<B: DrawingBackend> {
    shared: Rc<Shared<B>>,
}

impl<B: DrawingBackend> Clone for Host<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<B: DrawingBackend> Host<B> {
    pub fn new(session: Session<B>) -> Self {
        Self {
            shared: Rc::new(Shared {
                session: RefCell::new(session),
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Run `f` with exclusive access to the session, after applying any
    /// deferred reference changes.
    ///
    /// # Panics
    ///
    /// Panics if called from inside another `with_session` closure.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session<B>) -> R) -> R {
        let mut session = self.shared.session.borrow_mut();
        self.shared.drain(&mut *session);
        f(&mut *session)
    }

    fn make<F>(&self, op: &'static str, create: F) -> Option<WindowRef<B>>
    where
        F: FnOnce(&mut Session<B>) -> Result<HandleKey>,
    {
        self.with_session(|session| {
            let made = create(session).and_then(|key| new_ref(&self.shared, session, key));
            made.map_err(|e| debug!("{} failed: {}", op, e)).ok()
        })
    }

    /// Start the screen, or resume it after `endwin`; returns the root window
    pub fn initscr(&self) -> Option<WindowRef<B>> {
        self.make("initscr", |s| s.init())
    }

    /// The root window, once initialized
    pub fn stdscr(&self) -> Option<WindowRef<B>> {
        self.make("stdscr", |s| s.root().ok_or(HandleError::NotInitialized))
    }

    pub fn newwin(&self, lines: u16, cols: u16, y: u16, x: u16) -> Option<WindowRef<B>> {
        self.make("newwin", |s| s.new_window(Size::new(lines, cols), Point::new(y, x)))
    }

    pub fn newpad(&self, lines: u16, cols: u16) -> Option<WindowRef<B>> {
        self.make("newpad", |s| s.new_pad(Size::new(lines, cols)))
    }

    /// Give the terminal back
    pub fn endwin(&self) -> bool {
        self.with_session(|s| s.end()).is_ok()
    }

    /// Close every window and forget every handle; outstanding references
    /// become invalid
    pub fn reset(&self) -> usize {
        self.with_session(|s| s.reset())
    }

    pub fn update_panels(&self) {
        self.with_session(|s| s.update_panels())
    }

    pub fn doupdate(&self) -> bool {
        self.with_session(|s| s.doupdate()).is_ok()
    }

    /// Apply deferred reference changes now; returns how many were applied
    /// Inside a session operation nothing can be applied and 0 is returned.
    pub fn collect(&self) -> usize {
        let Ok(mut session) = self.shared.session.try_borrow_mut() else {
            trace!("Session busy, nothing collected");
            return 0;
        };
        self.shared.drain(&mut *session)
    }

    /// Reference changes waiting for the session to become free
    pub fn pending_releases(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    /// Windows still open
    pub fn live_windows(&self) -> usize {
        self.with_session(|s| s.live_handles())
    }
}

/// An opaque reference to a window, as held by the host
pub struct WindowRef<B: DrawingBackend> {
    key: HandleKey,
    native: NativeWindow,
    host: Weak<Shared<B>>,
}

impl<B: DrawingBackend> WindowRef<B> {
    pub fn key(&self) -> HandleKey {
        self.key
    }

    pub fn native(&self) -> NativeWindow {
        self.native
    }

    /// Run `f` against the session; errors become `None`
    fn call<R, F>(&self, op: &'static str, f: F) -> Option<R>
    where
        F: FnOnce(&Rc<Shared<B>>, &mut Session<B>, HandleKey) -> Result<R>,
    {
        let shared = self.host.upgrade()?;
        let Ok(mut session) = shared.session.try_borrow_mut() else {
            warn!("{} on window {} while the session is busy", op, self.native);
            return None;
        };
        shared.drain(&mut *session);
        match f(&shared, &mut *session, self.key) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{} on window {}: {}", op, self.native, e);
                None
            }
        }
    }

    fn ok<F>(&self, op: &'static str, f: F) -> bool
    where
        F: FnOnce(&mut Session<B>, HandleKey) -> Result<()>,
    {
        self.call(op, |_, session, key| f(session, key)).is_some()
    }

    fn draw<F>(&self, op: &'static str, f: F) -> bool
    where
        F: FnOnce(&mut B, NativeWindow) -> crate::backend::Result<()>,
    {
        self.ok(op, |session, key| session.with_window(key, op, f))
    }

    fn get<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&B, NativeWindow) -> crate::backend::Result<T>,
    {
        self.call(op, |_, session, key| session.query(key, op, f))
    }

    /// Native operation from this window onto `other`
    fn onto<F>(&self, op: &'static str, other: &WindowRef<B>, f: F) -> bool
    where
        F: FnOnce(&mut B, NativeWindow, NativeWindow) -> crate::backend::Result<()>,
    {
        if !Weak::ptr_eq(&self.host, &other.host) {
            debug!("{}: windows {} and {} belong to different hosts", op, self.native, other.native);
            return false;
        }
        let dst = other.key;
        self.ok(op, |session, key| session.with_windows(key, dst, op, f))
    }

    fn spawn<F>(&self, op: &'static str, create: F) -> Option<WindowRef<B>>
    where
        F: FnOnce(&mut Session<B>, HandleKey) -> Result<HandleKey>,
    {
        self.call(op, |shared, session, key| {
            let made = create(session, key)?;
            new_ref(shared, session, made)
        })
    }

    /// False once the window has been closed
    pub fn is_valid(&self) -> bool {
        self.call("isvalid", |_, session, key| Ok(session.is_valid(key)))
            .unwrap_or(false)
    }

    /// Close the window and all of its subwindows
    pub fn close(&self) -> bool {
        self.call("delwin", |_, session, key| session.close(key))
            .unwrap_or(false)
    }

    /// Subwindow at screen coordinates
    pub fn subwin(&self, lines: u16, cols: u16, y: u16, x: u16) -> Option<WindowRef<B>> {
        self.spawn("subwin", |s, key| {
            s.sub_window(key, Size::new(lines, cols), Point::new(y, x))
        })
    }

    /// Subwindow at coordinates relative to this window
    pub fn derwin(&self, lines: u16, cols: u16, y: u16, x: u16) -> Option<WindowRef<B>> {
        self.spawn("derwin", |s, key| {
            s.derived_window(key, Size::new(lines, cols), Point::new(y, x))
        })
    }

    pub fn subpad(&self, lines: u16, cols: u16, y: u16, x: u16) -> Option<WindowRef<B>> {
        self.spawn("subpad", |s, key| {
            s.sub_pad(key, Size::new(lines, cols), Point::new(y, x))
        })
    }

    pub fn dupwin(&self) -> Option<WindowRef<B>> {
        self.spawn("dupwin", |s, key| s.duplicate(key))
    }

    /// The parent window, if this is an open subwindow
    pub fn parent(&self) -> Option<WindowRef<B>> {
        self.spawn("getparent", |s, key| {
            s.parent(key)?.ok_or(HandleError::UnknownHandle)
        })
    }

    pub fn is_subwindow(&self) -> bool {
        self.call("is_subwindow", |_, s, key| s.parent(key))
            .flatten()
            .is_some()
    }

    pub fn add_str(&self, text: &str) -> bool {
        self.draw("addstr", |b, w| b.add_str(w, text))
    }

    pub fn add_ch(&self, ch: char) -> bool {
        self.draw("addch", |b, w| b.add_char(w, ch))
    }

    pub fn mv_add_str(&self, y: u16, x: u16, text: &str) -> bool {
        self.draw("mvaddstr", |b, w| {
            b.move_cursor(w, Point::new(y, x))?;
            b.add_str(w, text)
        })
    }

    pub fn move_cursor(&self, y: u16, x: u16) -> bool {
        self.draw("move", |b, w| b.move_cursor(w, Point::new(y, x)))
    }

    pub fn clear(&self) -> bool {
        self.draw("clear", |b, w| b.clear(w))
    }

    pub fn erase(&self) -> bool {
        self.draw("erase", |b, w| b.erase(w))
    }

    pub fn clear_to_eol(&self) -> bool {
        self.draw("clrtoeol", |b, w| b.clear_to_eol(w))
    }

    pub fn clear_to_bottom(&self) -> bool {
        self.draw("clrtobot", |b, w| b.clear_to_bottom(w))
    }

    pub fn draw_box(&self) -> bool {
        self.draw("box", |b, w| b.draw_box(w))
    }

    pub fn border(&self, chars: Border) -> bool {
        self.draw("border", |b, w| b.border(w, chars))
    }

    /// Horizontal line from the cursor, at most `n` cells
    pub fn hline(&self, ch: char, n: u16) -> bool {
        self.draw("hline", |b, w| b.hline(w, ch, n))
    }

    pub fn vline(&self, ch: char, n: u16) -> bool {
        self.draw("vline", |b, w| b.vline(w, ch, n))
    }

    pub fn insert_char(&self, ch: char) -> bool {
        self.draw("insch", |b, w| b.insert_char(w, ch))
    }

    pub fn delete_char(&self) -> bool {
        self.draw("delch", |b, w| b.delete_char(w))
    }

    pub fn insert_line(&self) -> bool {
        self.draw("insertln", |b, w| b.insert_line(w))
    }

    pub fn delete_line(&self) -> bool {
        self.draw("deleteln", |b, w| b.delete_line(w))
    }

    /// Scroll the scrolling region up `n` lines (down when negative)
    pub fn scroll(&self, n: i16) -> bool {
        self.draw("scrl", |b, w| b.scroll(w, n))
    }

    pub fn set_scroll_region(&self, top: u16, bottom: u16) -> bool {
        self.draw("setscrreg", |b, w| b.set_scroll_region(w, top, bottom))
    }

    /// Character and attributes under the cursor
    pub fn char_at(&self) -> Option<Cell> {
        self.get("inch", |b, w| b.char_at(w))
    }

    /// Text from the cursor to the end of the line, at most `limit` chars
    pub fn read_str(&self, limit: Option<usize>) -> Option<String> {
        self.get("instr", |b, w| b.read_str(w, limit))
    }

    pub fn set_background(&self, ch: char, attrs: Attr) -> bool {
        self.draw("bkgd", |b, w| b.set_background(w, Cell::new(ch, attrs)))
    }

    pub fn background(&self) -> Option<Cell> {
        self.get("getbkgd", |b, w| b.background(w))
    }

    pub fn touch(&self) -> bool {
        self.draw("touchwin", |b, w| b.touch(w))
    }

    pub fn is_touched(&self) -> Option<bool> {
        self.get("is_wintouched", |b, w| b.is_touched(w))
    }

    /// Repaint the whole window on the next update
    pub fn redraw(&self) -> bool {
        self.draw("redrawwin", |b, w| b.redraw(w))
    }

    /// Copy the overlapping part onto `dst`, skipping blanks
    pub fn overlay(&self, dst: &WindowRef<B>) -> bool {
        self.onto("overlay", dst, |b, src, dst| b.overlay(src, dst))
    }

    pub fn overwrite(&self, dst: &WindowRef<B>) -> bool {
        self.onto("overwrite", dst, |b, src, dst| b.overwrite(src, dst))
    }

    /// Copy the rectangle starting at `src_from` into `dst_from..=dst_to`
    /// of `dst`
    pub fn copy_to(
        &self,
        dst: &WindowRef<B>,
        src_from: Point,
        dst_from: Point,
        dst_to: Point,
        overlay: bool,
    ) -> bool {
        self.onto("copywin", dst, |b, src, dst| {
            b.copy_window(src, dst, src_from, dst_from, dst_to, overlay)
        })
    }

    pub fn refresh(&self) -> bool {
        self.draw("refresh", |b, w| b.refresh(w))
    }

    pub fn noutrefresh(&self) -> bool {
        self.draw("noutrefresh", |b, w| b.noutrefresh(w))
    }

    pub fn attr_on(&self, attrs: Attr) -> bool {
        self.draw("attron", |b, w| b.attr_on(w, attrs))
    }

    pub fn attr_off(&self, attrs: Attr) -> bool {
        self.draw("attroff", |b, w| b.attr_off(w, attrs))
    }

    pub fn attr_set(&self, attrs: Attr) -> bool {
        self.draw("attrset", |b, w| b.attr_set(w, attrs))
    }

    pub fn attrs(&self) -> Option<Attr> {
        self.get("getattrs", |b, w| b.attrs(w))
    }

    pub fn keypad(&self, enabled: bool) -> bool {
        self.draw("keypad", |b, w| b.set_keypad(w, enabled))
    }

    pub fn scroll_ok(&self, enabled: bool) -> bool {
        self.draw("scrollok", |b, w| b.set_scroll(w, enabled))
    }

    /// (lines, cols)
    pub fn size(&self) -> Option<Size> {
        self.get("getmaxyx", |b, w| b.size(w))
    }

    /// Screen position of the top-left corner
    pub fn origin(&self) -> Option<Point> {
        self.get("getbegyx", |b, w| b.origin(w))
    }

    pub fn cursor(&self) -> Option<Point> {
        self.get("getyx", |b, w| b.cursor(w))
    }

    /// Position inside the parent, `None` for top-level windows
    pub fn parent_offset(&self) -> Option<Point> {
        self.get("getparyx", |b, w| b.parent_offset(w)).flatten()
    }

    pub fn move_window(&self, y: u16, x: u16) -> bool {
        self.draw("mvwin", |b, w| b.move_window(w, Point::new(y, x)))
    }

    /// Next key, `None` on failure or when no input is available
    pub fn get_ch(&self) -> Option<Key> {
        self.call("getch", |_, s, key| s.with_window(key, "getch", |b, w| b.read_key(w)))
    }

    /// Attach a panel on top of the stack
    pub fn new_panel(&self) -> bool {
        self.ok("new_panel", |s, key| s.new_panel(key).map(|_| ()))
    }

    pub fn del_panel(&self) -> bool {
        self.ok("del_panel", |s, key| s.del_panel(key))
    }

    /// Move this window's panel onto `other`, which must not be a panel
    pub fn replace_panel(&self, other: &WindowRef<B>) -> bool {
        let dst = other.key;
        self.ok("replace_panel", |s, key| s.replace_panel(key, dst))
    }

    pub fn is_panel(&self) -> bool {
        self.call("is_panel", |_, s, key| Ok(s.registry().open(key)?.is_panel()))
            .unwrap_or(false)
    }

    pub fn move_panel(&self, y: u16, x: u16) -> bool {
        self.ok("move_panel", |s, key| {
            s.with_panel(key, "move_panel", |b, p| b.move_panel(p, Point::new(y, x)))
        })
    }

    pub fn panel_hidden(&self) -> Option<bool> {
        self.call("panel_hidden", |_, s, key| {
            s.with_panel(key, "panel_hidden", |b, p| b.panel_hidden(p))
        })
    }

    pub fn show_panel(&self) -> bool {
        self.ok("show_panel", |s, key| s.with_panel(key, "show_panel", |b, p| b.show_panel(p)))
    }

    pub fn hide_panel(&self) -> bool {
        self.ok("hide_panel", |s, key| s.with_panel(key, "hide_panel", |b, p| b.hide_panel(p)))
    }

    pub fn top_panel(&self) -> bool {
        self.ok("top_panel", |s, key| s.with_panel(key, "top_panel", |b, p| b.top_panel(p)))
    }

    pub fn bottom_panel(&self) -> bool {
        self.ok("bottom_panel", |s, key| {
            s.with_panel(key, "bottom_panel", |b, p| b.bottom_panel(p))
        })
    }

    /// Tracked panel directly above this one
    pub fn panel_above(&self) -> Option<WindowRef<B>> {
        self.spawn("panel_above", |s, key| {
            s.panel_above(key)?.ok_or(HandleError::UnknownHandle)
        })
    }

    /// Tracked panel directly below this one
    pub fn panel_below(&self) -> Option<WindowRef<B>> {
        self.spawn("panel_below", |s, key| {
            s.panel_below(key)?.ok_or(HandleError::UnknownHandle)
        })
    }

    /// Another reference to this panel's window
    pub fn panel_window(&self) -> Option<WindowRef<B>> {
        self.spawn("panel_window", |s, key| {
            crate::handle::panel::panel_of(s.registry(), key)?;
            Ok(key)
        })
    }
}

impl<B: DrawingBackend> Clone for WindowRef<B> {
    fn clone(&self) -> Self {
        if let Some(shared) = self.host.upgrade() {
            shared.apply(Pending::Wrap(self.key));
        }
        Self {
            key: self.key,
            native: self.native,
            host: Weak::clone(&self.host),
        }
    }
}

impl<B: DrawingBackend> Drop for WindowRef<B> {
    fn drop(&mut self) {
        if let Some(shared) = self.host.upgrade() {
            shared.apply(Pending::Release(self.key));
        }
    }
}

/// Same native window (within the same host)
impl<B: DrawingBackend> PartialEq for WindowRef<B> {
    fn eq(&self, other: &Self) -> bool {
        self.native == other.native && Weak::ptr_eq(&self.host, &other.host)
    }
}

impl<B: DrawingBackend> Eq for WindowRef<B> {}

impl<B: DrawingBackend> fmt::Display for WindowRef<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(shared) = self.host.upgrade() else {
            return f.write_str("INVALID WINDOW");
        };
        let Ok(session) = shared.session.try_borrow() else {
            // Validity is unknown while the session is busy
            return write!(f, "window {} (busy)", self.native);
        };
        if !session.is_valid(self.key) {
            f.write_str("INVALID WINDOW")
        } else if session.root() == Some(self.key) {
            f.write_str("stdscr")
        } else {
            write!(f, "window {}", self.native)
        }
    }
}

impl<B: DrawingBackend> fmt::Debug for WindowRef<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowRef")
            .field("key", &self.key)
            .field("native", &self.native)
            .finish()
    }
}
