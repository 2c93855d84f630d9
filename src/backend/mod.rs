//! Terminal drawing capability.
//!
//! Everything that actually touches a terminal lives behind the
//! [`DrawingBackend`] trait: creating and destroying native windows and
//! panels, drawing into windows, and flushing the composed screen. The handle
//! layer only ever sees opaque [`NativeWindow`] / [`NativePanel`] identities.
//!
//! - **surface**: `SurfaceBackend`, the window/panel bookkeeping shared by
//!   every device
//! - **device**: output devices (`Headless` for tests and embedding)
//! - **terminal**: `CrosstermDevice`, a real terminal via crossterm
//!
//! # Architecture
//!
//! ```text
//! SurfaceBackend<D: Device>  (implements DrawingBackend)
//! ├── windows   (cell grid + cursor + attributes per native window)
//! ├── deck      (panel stacking order, bottom to top)
//! ├── screen    (virtual screen composed by noutrefresh/update_panels)
//! └── device    (paints the virtual screen, reads keys)
//! ```

pub mod device;
pub mod surface;
pub mod terminal;

pub use device::{Device, Frame, Headless};
pub use surface::{Cell, FailPoint, SurfaceBackend};
pub use terminal::CrosstermDevice;

use std::fmt;
use std::io;

use bitflags::bitflags;
use thiserror::Error;

/// Headless backend used by tests and embedders without a terminal
pub type MemoryBackend = SurfaceBackend<Headless>;

/// Backend driving the real terminal
pub type CrosstermBackend = SurfaceBackend<CrosstermDevice>;

/// Opaque identity of a native window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeWindow(pub u64);

impl fmt::Display for NativeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Opaque identity of a native panel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePanel(pub u64);

impl fmt::Display for NativePanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Window dimensions. A zero component means "extend to the edge" on creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Size {
    pub lines: u16,
    pub cols: u16,
}

impl Size {
    pub const fn new(lines: u16, cols: u16) -> Self {
        Self { lines, cols }
    }

    pub fn area(&self) -> usize {
        self.lines as usize * self.cols as usize
    }
}

/// A (row, column) position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub y: u16,
    pub x: u16,
}

impl Point {
    pub const fn new(y: u16, x: u16) -> Self {
        Self { y, x }
    }
}

/// Characters of a window border, as passed to curses `border`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Border {
    pub left: char,
    pub right: char,
    pub top: char,
    pub bottom: char,
    pub top_left: char,
    pub top_right: char,
    pub bottom_left: char,
    pub bottom_right: char,
}

impl Default for Border {
    fn default() -> Self {
        Self {
            left: '│',
            right: '│',
            top: '─',
            bottom: '─',
            top_left: '┌',
            top_right: '┐',
            bottom_left: '└',
            bottom_right: '┘',
        }
    }
}

bitflags! {
    /// Character attributes
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Attr: u16 {
        const BOLD      = 0b0000_0000_0001;
        const DIM       = 0b0000_0000_0010;
        const ITALIC    = 0b0000_0000_0100;
        const UNDERLINE = 0b0000_0000_1000;
        const BLINK     = 0b0000_0001_0000;
        const REVERSE   = 0b0000_0010_0000;
        const INVISIBLE = 0b0000_0100_0000;
        const STANDOUT  = 0b0000_1000_0000;
    }
}

/// A key read from a window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Esc,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0} failed")]
    Failed(&'static str),

    #[error("No such native window")]
    NoSuchWindow,

    #[error("No such native panel")]
    NoSuchPanel,

    #[error("Position or size outside the parent area")]
    OutOfBounds,

    #[error("Window still has live subwindows")]
    HasSubwindows,

    #[error("Window is attached to a panel")]
    PanelAttached,

    #[error("Operation requires a pad")]
    NotAPad,

    #[error("Screen is not initialized")]
    NotInitialized,

    #[error("No input available")]
    NoInput,

    #[error("Terminal I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Primitive window, panel and drawing operations of a terminal library.
///
/// Methods map one-to-one onto the classic curses calls; a `Result` error is
/// the native `ERR` return.
pub trait DrawingBackend {
    /// Start the screen and return the root window (stdscr). On a screen
    /// that was ended, re-enter it and return the same root.
    fn init_screen(&mut self) -> Result<NativeWindow>;
    /// Restore the terminal
    fn end_screen(&mut self) -> Result<()>;

    // Window lifecycle
    fn create_window(&mut self, size: Size, origin: Point) -> Result<NativeWindow>;
    fn create_pad(&mut self, size: Size) -> Result<NativeWindow>;
    /// `origin` is in screen coordinates
    fn create_subwindow(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow>;
    /// `origin` is relative to the parent window
    fn create_derived_window(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow>;
    /// `origin` is relative to the parent pad
    fn create_subpad(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow>;
    fn duplicate_window(&mut self, win: NativeWindow) -> Result<NativeWindow>;
    fn destroy_window(&mut self, win: NativeWindow) -> Result<()>;

    // Panels
    fn create_panel(&mut self, win: NativeWindow) -> Result<NativePanel>;
    fn destroy_panel(&mut self, panel: NativePanel) -> Result<()>;
    fn replace_panel(&mut self, panel: NativePanel, win: NativeWindow) -> Result<()>;
    fn panel_above(&self, panel: NativePanel) -> Option<NativePanel>;
    fn panel_below(&self, panel: NativePanel) -> Option<NativePanel>;
    fn move_panel(&mut self, panel: NativePanel, origin: Point) -> Result<()>;
    fn panel_hidden(&self, panel: NativePanel) -> Result<bool>;
    fn show_panel(&mut self, panel: NativePanel) -> Result<()>;
    fn hide_panel(&mut self, panel: NativePanel) -> Result<()>;
    fn top_panel(&mut self, panel: NativePanel) -> Result<()>;
    fn bottom_panel(&mut self, panel: NativePanel) -> Result<()>;
    fn update_panels(&mut self);

    // Drawing
    fn move_cursor(&mut self, win: NativeWindow, at: Point) -> Result<()>;
    fn add_str(&mut self, win: NativeWindow, text: &str) -> Result<()>;
    fn add_char(&mut self, win: NativeWindow, ch: char) -> Result<()>;
    fn clear(&mut self, win: NativeWindow) -> Result<()>;
    fn erase(&mut self, win: NativeWindow) -> Result<()>;
    fn clear_to_eol(&mut self, win: NativeWindow) -> Result<()>;
    fn clear_to_bottom(&mut self, win: NativeWindow) -> Result<()>;
    fn border(&mut self, win: NativeWindow, chars: Border) -> Result<()>;
    fn draw_box(&mut self, win: NativeWindow) -> Result<()> {
        self.border(win, Border::default())
    }
    /// Draw up to `n` copies of `ch` rightwards from the cursor; the cursor stays
    fn hline(&mut self, win: NativeWindow, ch: char, n: u16) -> Result<()>;
    /// Draw up to `n` copies of `ch` downwards from the cursor; the cursor stays
    fn vline(&mut self, win: NativeWindow, ch: char, n: u16) -> Result<()>;
    fn insert_char(&mut self, win: NativeWindow, ch: char) -> Result<()>;
    fn delete_char(&mut self, win: NativeWindow) -> Result<()>;
    fn insert_line(&mut self, win: NativeWindow) -> Result<()>;
    fn delete_line(&mut self, win: NativeWindow) -> Result<()>;
    /// Scroll the scrolling region up by `n` lines (down when negative)
    fn scroll(&mut self, win: NativeWindow, n: i16) -> Result<()>;
    fn set_scroll_region(&mut self, win: NativeWindow, top: u16, bottom: u16) -> Result<()>;
    fn set_background(&mut self, win: NativeWindow, bg: Cell) -> Result<()>;
    /// Mark the whole window as changed
    fn touch(&mut self, win: NativeWindow) -> Result<()>;
    /// Force a full repaint of the window's area on its next refresh
    fn redraw(&mut self, win: NativeWindow) -> Result<()>;
    /// Copy the overlapping part of `src` onto `dst`, skipping blanks
    fn overlay(&mut self, src: NativeWindow, dst: NativeWindow) -> Result<()>;
    /// Copy the overlapping part of `src` onto `dst`, blanks included
    fn overwrite(&mut self, src: NativeWindow, dst: NativeWindow) -> Result<()>;
    /// Copy the `dst_from..=dst_to` rectangle of `dst` from `src` starting at
    /// `src_from`; `overlay` skips blanks
    fn copy_window(
        &mut self,
        src: NativeWindow,
        dst: NativeWindow,
        src_from: Point,
        dst_from: Point,
        dst_to: Point,
        overlay: bool,
    ) -> Result<()>;
    fn attr_on(&mut self, win: NativeWindow, attrs: Attr) -> Result<()>;
    fn attr_off(&mut self, win: NativeWindow, attrs: Attr) -> Result<()>;
    fn attr_set(&mut self, win: NativeWindow, attrs: Attr) -> Result<()>;
    fn set_keypad(&mut self, win: NativeWindow, enabled: bool) -> Result<()>;
    fn set_scroll(&mut self, win: NativeWindow, enabled: bool) -> Result<()>;
    fn move_window(&mut self, win: NativeWindow, origin: Point) -> Result<()>;

    // Queries
    fn attrs(&self, win: NativeWindow) -> Result<Attr>;
    fn size(&self, win: NativeWindow) -> Result<Size>;
    fn origin(&self, win: NativeWindow) -> Result<Point>;
    fn cursor(&self, win: NativeWindow) -> Result<Point>;
    /// Cell under the cursor
    fn char_at(&self, win: NativeWindow) -> Result<Cell>;
    /// Text from the cursor to the end of the line, at most `limit` characters
    fn read_str(&self, win: NativeWindow, limit: Option<usize>) -> Result<String>;
    fn background(&self, win: NativeWindow) -> Result<Cell>;
    fn is_touched(&self, win: NativeWindow) -> Result<bool>;
    /// Offset inside the parent window, `None` for top-level windows
    fn parent_offset(&self, win: NativeWindow) -> Result<Option<Point>>;

    // Output and input
    fn noutrefresh(&mut self, win: NativeWindow) -> Result<()>;
    fn doupdate(&mut self) -> Result<()>;
    fn refresh(&mut self, win: NativeWindow) -> Result<()> {
        self.noutrefresh(win)?;
        self.doupdate()
    }
    fn read_key(&mut self, win: NativeWindow) -> Result<Key>;
}
