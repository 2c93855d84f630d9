//! Surface backend - window and panel bookkeeping over an output device
//!
//! Every native window is a cell grid with its own cursor and attributes.
//! Subwindows share storage with their ancestors the way curses subwindows
//! do: after a write, the changed window's cells are copied into every
//! overlapping window of the same family.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};
use unicode_width::UnicodeWidthChar;

use super::device::{Device, Frame, Headless};
use super::{
    Attr, BackendError, Border, DrawingBackend, Key, NativePanel, NativeWindow, Point, Result,
    Size,
};

const TAB_WIDTH: u16 = 8;

/// A single character cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attrs: Attr,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            attrs: Attr::empty(),
        }
    }
}

impl Cell {
    const CONTINUATION: char = '\0';

    pub fn new(ch: char, attrs: Attr) -> Self {
        Self { ch, attrs }
    }

    /// Right half of a double-width character
    pub fn is_continuation(&self) -> bool {
        self.ch == Self::CONTINUATION
    }
}

/// Native operations that can be told to fail once (failure injection)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InitScreen,
    CreateWindow,
    CreateSubwindow,
    DuplicateWindow,
    DestroyWindow,
    CreatePanel,
    DestroyPanel,
    ReplacePanel,
    Refresh,
}

impl FailPoint {
    fn name(self) -> &'static str {
        match self {
            FailPoint::InitScreen => "init_screen",
            FailPoint::CreateWindow => "create_window",
            FailPoint::CreateSubwindow => "create_subwindow",
            FailPoint::DuplicateWindow => "duplicate_window",
            FailPoint::DestroyWindow => "destroy_window",
            FailPoint::CreatePanel => "create_panel",
            FailPoint::DestroyPanel => "destroy_panel",
            FailPoint::ReplacePanel => "replace_panel",
            FailPoint::Refresh => "refresh",
        }
    }
}

struct Surface {
    size: Size,
    /// Screen position (pads: position inside the root pad)
    origin: Point,
    /// Parent window and offset inside it
    parent: Option<(NativeWindow, Point)>,
    cursor: Point,
    attrs: Attr,
    cells: Vec<Cell>,
    keypad: bool,
    scroll: bool,
    /// Scrolling region, first and last line
    region: (u16, u16),
    background: Cell,
    pad: bool,
    cleared: bool,
    touched: bool,
}

impl Surface {
    fn new(size: Size, origin: Point) -> Self {
        Self {
            size,
            origin,
            parent: None,
            cursor: Point::default(),
            attrs: Attr::empty(),
            cells: vec![Cell::default(); size.area()],
            keypad: false,
            scroll: false,
            region: (0, size.lines.saturating_sub(1)),
            background: Cell::default(),
            pad: false,
            cleared: false,
            touched: true,
        }
    }

    fn index(&self, y: u16, x: u16) -> usize {
        y as usize * self.size.cols as usize + x as usize
    }

    fn contains(&self, at: Point) -> bool {
        at.y < self.size.lines && at.x < self.size.cols
    }

    fn blank(&mut self) {
        self.cells.fill(self.background);
        self.cursor = Point::default();
    }

    fn clear_to_eol(&mut self) {
        let start = self.index(self.cursor.y, self.cursor.x);
        let end = self.index(self.cursor.y, 0) + self.size.cols as usize;
        self.cells[start..end].fill(self.background);
    }

    fn clear_to_bottom(&mut self) {
        self.clear_to_eol();
        let start = self.index(self.cursor.y, 0) + self.size.cols as usize;
        self.cells[start..].fill(self.background);
    }

    /// Shift rows `first..=last` up by `n` rows (down when negative),
    /// filling with the background
    fn shift_rows(&mut self, first: u16, last: u16, n: i32) {
        let cols = self.size.cols as usize;
        let rows = (last - first + 1) as usize;
        let shift = (n.unsigned_abs() as usize).min(rows) * cols;
        let start = first as usize * cols;
        let bg = self.background;
        let block = &mut self.cells[start..start + rows * cols];
        let len = block.len();
        if n > 0 {
            block.rotate_left(shift);
            block[len - shift..].fill(bg);
        } else if n < 0 {
            block.rotate_right(shift);
            block[..shift].fill(bg);
        }
    }

    /// The cursor row from the cursor column on
    fn row_tail(&mut self) -> &mut [Cell] {
        let start = self.index(self.cursor.y, self.cursor.x);
        let end = self.index(self.cursor.y, 0) + self.size.cols as usize;
        &mut self.cells[start..end]
    }

    fn newline(&mut self) -> Result<()> {
        self.cursor.x = 0;
        let (top, bottom) = self.region;
        if self.cursor.y == bottom && self.scroll {
            self.shift_rows(top, bottom, 1);
            Ok(())
        } else if self.cursor.y + 1 < self.size.lines {
            self.cursor.y += 1;
            Ok(())
        } else {
            // Cursor sticks to the last cell, like curses at the bottom-right corner
            self.cursor.x = self.size.cols.saturating_sub(1);
            Err(BackendError::OutOfBounds)
        }
    }

    fn put(&mut self, ch: char) -> Result<()> {
        match ch {
            '\n' => {
                self.clear_to_eol();
                return self.newline();
            }
            '\r' => {
                self.cursor.x = 0;
                return Ok(());
            }
            '\t' => {
                let stop = (self.cursor.x / TAB_WIDTH + 1) * TAB_WIDTH;
                let spaces = stop.min(self.size.cols) - self.cursor.x;
                for _ in 0..spaces.max(1) {
                    self.put(' ')?;
                }
                return Ok(());
            }
            c if c.is_control() => {
                // Control characters are shown in caret notation
                let shown = char::from_u32((c as u32) ^ 0x40).unwrap_or('?');
                self.put('^')?;
                return self.put(shown);
            }
            _ => {}
        }

        let width = ch.width().unwrap_or(0) as u16;
        if width == 0 || width > self.size.cols {
            return Ok(());
        }
        if width == 2 && self.cursor.x + 1 >= self.size.cols {
            let idx = self.index(self.cursor.y, self.cursor.x);
            self.cells[idx] = self.background;
            self.newline()?;
        }

        let idx = self.index(self.cursor.y, self.cursor.x);
        self.cells[idx] = Cell::new(ch, self.attrs);
        if width == 2 {
            self.cells[idx + 1] = Cell::new(Cell::CONTINUATION, self.attrs);
        }

        self.cursor.x += width;
        if self.cursor.x >= self.size.cols {
            self.newline()?;
        }
        Ok(())
    }
}

struct PanelSlot {
    id: NativePanel,
    window: NativeWindow,
    hidden: bool,
}

/// Window/panel bookkeeping over a [`Device`]
pub struct SurfaceBackend<D: Device> {
    device: D,
    size: Size,
    next_id: u64,
    root: Option<NativeWindow>,
    /// Whether the device is currently entered (between init and end)
    entered: bool,
    windows: HashMap<NativeWindow, Surface>,
    /// Panels, bottom to top
    deck: Vec<PanelSlot>,
    screen: Vec<Cell>,
    screen_cursor: Option<Point>,
    full_repaint: bool,
    fail_points: HashSet<FailPoint>,
}

impl SurfaceBackend<Headless> {
    /// Backend over a headless device of the given size
    pub fn headless(size: Size) -> Self {
        Self::with_size(Headless::new(size), size)
    }
}

impl<D: Device> SurfaceBackend<D> {
    /// Create a backend, taking the screen size from the device
    pub fn new(device: D) -> Result<Self> {
        let size = device.size()?;
        Ok(Self::with_size(device, size))
    }

    fn with_size(device: D, size: Size) -> Self {
        Self {
            device,
            size,
            next_id: 1,
            root: None,
            entered: false,
            windows: HashMap::new(),
            deck: Vec::new(),
            screen: vec![Cell::default(); size.area()],
            screen_cursor: None,
            full_repaint: true,
            fail_points: HashSet::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Make the next call of the given operation fail
    pub fn fail_next(&mut self, point: FailPoint) {
        self.fail_points.insert(point);
    }

    /// Whether a native window currently exists
    pub fn is_live(&self, win: NativeWindow) -> bool {
        self.windows.contains_key(&win)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn panel_count(&self) -> usize {
        self.deck.len()
    }

    /// The window a native panel is bound to
    pub fn panel_window(&self, panel: NativePanel) -> Option<NativeWindow> {
        self.deck.iter().find(|s| s.id == panel).map(|s| s.window)
    }

    /// Panels from bottom to top, hidden ones included
    pub fn stacking_order(&self) -> Vec<NativePanel> {
        self.deck.iter().map(|s| s.id).collect()
    }

    /// Contents of a window cell
    pub fn cell(&self, win: NativeWindow, at: Point) -> Option<Cell> {
        let surface = self.windows.get(&win)?;
        surface.contains(at).then(|| surface.cells[surface.index(at.y, at.x)])
    }

    /// Text of one row of the virtual screen
    pub fn screen_line(&self, y: u16) -> String {
        if y >= self.size.lines {
            return String::new();
        }
        let cols = self.size.cols as usize;
        let start = y as usize * cols;
        self.screen[start..start + cols]
            .iter()
            .filter(|c| !c.is_continuation())
            .map(|c| c.ch)
            .collect()
    }

    fn trip(&mut self, point: FailPoint) -> Result<()> {
        if self.fail_points.remove(&point) {
            debug!("Injected failure: {}", point.name());
            return Err(BackendError::Failed(point.name()));
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn surface(&self, win: NativeWindow) -> Result<&Surface> {
        self.windows.get(&win).ok_or(BackendError::NoSuchWindow)
    }

    fn surface_mut(&mut self, win: NativeWindow) -> Result<&mut Surface> {
        self.windows.get_mut(&win).ok_or(BackendError::NoSuchWindow)
    }

    fn slot_index(&self, panel: NativePanel) -> Result<usize> {
        self.deck
            .iter()
            .position(|s| s.id == panel)
            .ok_or(BackendError::NoSuchPanel)
    }

    fn insert(&mut self, surface: Surface) -> NativeWindow {
        let win = NativeWindow(self.alloc_id());
        trace!("Native window {} created ({}x{})", win, surface.size.cols, surface.size.lines);
        self.windows.insert(win, surface);
        win
    }

    /// Resolve zero components of `size` against the area left of `origin`
    /// inside `bounds`, and check that the result fits
    fn fit(size: Size, origin: Point, bounds: Size) -> Result<Size> {
        if origin.y >= bounds.lines || origin.x >= bounds.cols {
            return Err(BackendError::OutOfBounds);
        }
        let lines = if size.lines == 0 { bounds.lines - origin.y } else { size.lines };
        let cols = if size.cols == 0 { bounds.cols - origin.x } else { size.cols };
        if origin.y as u32 + lines as u32 > bounds.lines as u32
            || origin.x as u32 + cols as u32 > bounds.cols as u32
        {
            return Err(BackendError::OutOfBounds);
        }
        Ok(Size::new(lines, cols))
    }

    /// Topmost ancestor of a window and the window's offset inside it
    fn top_offset(&self, win: NativeWindow) -> (NativeWindow, Point) {
        let mut top = win;
        let mut offset = Point::default();
        while let Some((parent, rel)) = self.windows.get(&top).and_then(|s| s.parent) {
            offset.y += rel.y;
            offset.x += rel.x;
            top = parent;
        }
        (top, offset)
    }

    /// Copy a window's cells into every overlapping window sharing its storage
    fn sync_family(&mut self, win: NativeWindow) {
        if let Some(surface) = self.windows.get_mut(&win) {
            surface.touched = true;
        }
        let (top, offset) = self.top_offset(win);
        let family: Vec<(NativeWindow, Point)> = self
            .windows
            .keys()
            .copied()
            .filter(|&w| w != win)
            .map(|w| (w, self.top_offset(w)))
            .filter(|(_, (t, _))| *t == top)
            .map(|(w, (_, off))| (w, off))
            .collect();
        if family.is_empty() {
            return;
        }

        let Some(source) = self.windows.get(&win) else {
            return;
        };
        let src_size = source.size;
        let cells = source.cells.clone();

        for (other, other_off) in family {
            let Some(dst) = self.windows.get_mut(&other) else {
                continue;
            };
            dst.touched = true;
            for y in 0..src_size.lines {
                for x in 0..src_size.cols {
                    let abs_y = offset.y + y;
                    let abs_x = offset.x + x;
                    if abs_y < other_off.y || abs_x < other_off.x {
                        continue;
                    }
                    let at = Point::new(abs_y - other_off.y, abs_x - other_off.x);
                    if dst.contains(at) {
                        let idx = dst.index(at.y, at.x);
                        dst.cells[idx] = cells[y as usize * src_size.cols as usize + x as usize];
                    }
                }
            }
        }
    }

    /// Copy a window onto the virtual screen, clipped
    fn compose(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.windows.get(&win).ok_or(BackendError::NoSuchWindow)?;
        let cols = self.size.cols as usize;
        for y in 0..surface.size.lines {
            let sy = surface.origin.y + y;
            if sy >= self.size.lines {
                break;
            }
            for x in 0..surface.size.cols {
                let sx = surface.origin.x + x;
                if sx >= self.size.cols {
                    break;
                }
                self.screen[sy as usize * cols + sx as usize] = surface.cells[surface.index(y, x)];
            }
        }
        Ok(())
    }

    /// Copy `src` cells starting at `src_from` into the `dst_from..=dst_to`
    /// rectangle of `dst`
    fn copy_cells(
        &mut self,
        src: NativeWindow,
        dst: NativeWindow,
        src_from: Point,
        dst_from: Point,
        dst_to: Point,
        skip_blanks: bool,
    ) -> Result<()> {
        if dst_to.y < dst_from.y || dst_to.x < dst_from.x {
            return Err(BackendError::OutOfBounds);
        }
        let rows = dst_to.y - dst_from.y + 1;
        let cols = dst_to.x - dst_from.x + 1;

        let source = self.surface(src)?;
        if src_from.y as u32 + rows as u32 > source.size.lines as u32
            || src_from.x as u32 + cols as u32 > source.size.cols as u32
        {
            return Err(BackendError::OutOfBounds);
        }
        let mut block = Vec::with_capacity(rows as usize * cols as usize);
        for y in 0..rows {
            for x in 0..cols {
                block.push(source.cells[source.index(src_from.y + y, src_from.x + x)]);
            }
        }

        let target = self.surface_mut(dst)?;
        if !target.contains(dst_to) {
            return Err(BackendError::OutOfBounds);
        }
        for y in 0..rows {
            for x in 0..cols {
                let cell = block[y as usize * cols as usize + x as usize];
                if skip_blanks && cell.ch == ' ' {
                    continue;
                }
                let idx = target.index(dst_from.y + y, dst_from.x + x);
                target.cells[idx] = cell;
            }
        }
        self.sync_family(dst);
        Ok(())
    }

    /// Copy the screen-overlapping part of two windows
    fn overlap_copy(&mut self, src: NativeWindow, dst: NativeWindow, skip_blanks: bool) -> Result<()> {
        let (s, d) = (self.surface(src)?, self.surface(dst)?);
        let top = s.origin.y.max(d.origin.y);
        let left = s.origin.x.max(d.origin.x);
        let bottom = (s.origin.y + s.size.lines).min(d.origin.y + d.size.lines);
        let right = (s.origin.x + s.size.cols).min(d.origin.x + d.size.cols);
        if top >= bottom || left >= right {
            // Nothing overlaps
            return Ok(());
        }
        let src_from = Point::new(top - s.origin.y, left - s.origin.x);
        let dst_from = Point::new(top - d.origin.y, left - d.origin.x);
        let dst_to = Point::new(bottom - 1 - d.origin.y, right - 1 - d.origin.x);
        self.copy_cells(src, dst, src_from, dst_from, dst_to, skip_blanks)
    }

    fn create_child(
        &mut self,
        parent: NativeWindow,
        size: Size,
        rel: Point,
        pad: bool,
    ) -> Result<NativeWindow> {
        self.trip(FailPoint::CreateSubwindow)?;
        let p = self.surface(parent)?;
        if pad && !p.pad {
            return Err(BackendError::NotAPad);
        }
        let size = Self::fit(size, rel, p.size)?;
        let origin = Point::new(p.origin.y + rel.y, p.origin.x + rel.x);

        let mut surface = Surface::new(size, origin);
        surface.parent = Some((parent, rel));
        surface.pad = p.pad;
        surface.attrs = p.attrs;
        surface.background = p.background;
        // Shared storage: start from the parent's cells
        for y in 0..size.lines {
            for x in 0..size.cols {
                let idx = surface.index(y, x);
                surface.cells[idx] = p.cells[p.index(rel.y + y, rel.x + x)];
            }
        }
        Ok(self.insert(surface))
    }
}

impl<D: Device> DrawingBackend for SurfaceBackend<D> {
    fn init_screen(&mut self) -> Result<NativeWindow> {
        self.trip(FailPoint::InitScreen)?;
        if let Some(root) = self.root {
            if !self.entered {
                self.device.enter()?;
                self.entered = true;
                self.full_repaint = true;
                debug!("Screen resumed");
            }
            return Ok(root);
        }
        if !self.entered {
            self.device.enter()?;
            self.entered = true;
        }
        self.size = self.device.size()?;
        self.screen = vec![Cell::default(); self.size.area()];
        self.full_repaint = true;

        let root = self.insert(Surface::new(self.size, Point::default()));
        self.root = Some(root);
        debug!("Screen initialized: {}x{}", self.size.cols, self.size.lines);
        Ok(root)
    }

    fn end_screen(&mut self) -> Result<()> {
        if self.entered {
            self.device.leave()?;
            self.entered = false;
            return Ok(());
        }
        if self.root.is_none() {
            return Err(BackendError::NotInitialized);
        }
        Ok(())
    }

    fn create_window(&mut self, size: Size, origin: Point) -> Result<NativeWindow> {
        if self.root.is_none() {
            return Err(BackendError::NotInitialized);
        }
        self.trip(FailPoint::CreateWindow)?;
        let size = Self::fit(size, origin, self.size)?;
        Ok(self.insert(Surface::new(size, origin)))
    }

    fn create_pad(&mut self, size: Size) -> Result<NativeWindow> {
        self.trip(FailPoint::CreateWindow)?;
        if size.lines == 0 || size.cols == 0 {
            return Err(BackendError::OutOfBounds);
        }
        let mut surface = Surface::new(size, Point::default());
        surface.pad = true;
        Ok(self.insert(surface))
    }

    fn create_subwindow(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow> {
        let p = self.surface(parent)?;
        if origin.y < p.origin.y || origin.x < p.origin.x {
            return Err(BackendError::OutOfBounds);
        }
        let rel = Point::new(origin.y - p.origin.y, origin.x - p.origin.x);
        self.create_child(parent, size, rel, false)
    }

    fn create_derived_window(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow> {
        self.create_child(parent, size, origin, false)
    }

    fn create_subpad(&mut self, parent: NativeWindow, size: Size, origin: Point) -> Result<NativeWindow> {
        self.create_child(parent, size, origin, true)
    }

    fn duplicate_window(&mut self, win: NativeWindow) -> Result<NativeWindow> {
        self.trip(FailPoint::DuplicateWindow)?;
        let src = self.surface(win)?;
        let mut copy = Surface::new(src.size, src.origin);
        copy.cells = src.cells.clone();
        copy.cursor = src.cursor;
        copy.attrs = src.attrs;
        copy.keypad = src.keypad;
        copy.scroll = src.scroll;
        copy.region = src.region;
        copy.background = src.background;
        copy.pad = src.pad;
        Ok(self.insert(copy))
    }

    fn destroy_window(&mut self, win: NativeWindow) -> Result<()> {
        self.trip(FailPoint::DestroyWindow)?;
        self.surface(win)?;
        if self.windows.values().any(|s| matches!(s.parent, Some((p, _)) if p == win)) {
            return Err(BackendError::HasSubwindows);
        }
        if self.deck.iter().any(|s| s.window == win) {
            return Err(BackendError::PanelAttached);
        }
        self.windows.remove(&win);
        if self.root == Some(win) {
            self.root = None;
        }
        trace!("Native window {} destroyed", win);
        Ok(())
    }

    fn create_panel(&mut self, win: NativeWindow) -> Result<NativePanel> {
        self.trip(FailPoint::CreatePanel)?;
        self.surface(win)?;
        if self.deck.iter().any(|s| s.window == win) {
            return Err(BackendError::PanelAttached);
        }
        let id = NativePanel(self.alloc_id());
        self.deck.push(PanelSlot {
            id,
            window: win,
            hidden: false,
        });
        Ok(id)
    }

    fn destroy_panel(&mut self, panel: NativePanel) -> Result<()> {
        self.trip(FailPoint::DestroyPanel)?;
        let idx = self.slot_index(panel)?;
        self.deck.remove(idx);
        Ok(())
    }

    fn replace_panel(&mut self, panel: NativePanel, win: NativeWindow) -> Result<()> {
        self.trip(FailPoint::ReplacePanel)?;
        self.surface(win)?;
        if self.deck.iter().any(|s| s.window == win) {
            return Err(BackendError::PanelAttached);
        }
        let idx = self.slot_index(panel)?;
        self.deck[idx].window = win;
        Ok(())
    }

    fn panel_above(&self, panel: NativePanel) -> Option<NativePanel> {
        let idx = self.slot_index(panel).ok()?;
        self.deck[idx + 1..].iter().find(|s| !s.hidden).map(|s| s.id)
    }

    fn panel_below(&self, panel: NativePanel) -> Option<NativePanel> {
        let idx = self.slot_index(panel).ok()?;
        self.deck[..idx].iter().rev().find(|s| !s.hidden).map(|s| s.id)
    }

    fn move_panel(&mut self, panel: NativePanel, origin: Point) -> Result<()> {
        let idx = self.slot_index(panel)?;
        let win = self.deck[idx].window;
        self.move_window(win, origin)
    }

    fn panel_hidden(&self, panel: NativePanel) -> Result<bool> {
        Ok(self.deck[self.slot_index(panel)?].hidden)
    }

    fn show_panel(&mut self, panel: NativePanel) -> Result<()> {
        let idx = self.slot_index(panel)?;
        let mut slot = self.deck.remove(idx);
        slot.hidden = false;
        self.deck.push(slot);
        Ok(())
    }

    fn hide_panel(&mut self, panel: NativePanel) -> Result<()> {
        let idx = self.slot_index(panel)?;
        self.deck[idx].hidden = true;
        Ok(())
    }

    fn top_panel(&mut self, panel: NativePanel) -> Result<()> {
        let idx = self.slot_index(panel)?;
        let slot = self.deck.remove(idx);
        self.deck.push(slot);
        Ok(())
    }

    fn bottom_panel(&mut self, panel: NativePanel) -> Result<()> {
        let idx = self.slot_index(panel)?;
        let slot = self.deck.remove(idx);
        self.deck.insert(0, slot);
        Ok(())
    }

    fn update_panels(&mut self) {
        if let Some(root) = self.root {
            let _ = self.compose(root);
        }
        let visible: Vec<NativeWindow> = self
            .deck
            .iter()
            .filter(|s| !s.hidden)
            .map(|s| s.window)
            .collect();
        for win in visible {
            let _ = self.compose(win);
        }
    }

    fn move_cursor(&mut self, win: NativeWindow, at: Point) -> Result<()> {
        let surface = self.surface_mut(win)?;
        if !surface.contains(at) {
            return Err(BackendError::OutOfBounds);
        }
        surface.cursor = at;
        Ok(())
    }

    fn add_str(&mut self, win: NativeWindow, text: &str) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let mut result = Ok(());
        for ch in text.chars() {
            if let Err(e) = surface.put(ch) {
                result = Err(e);
                break;
            }
        }
        self.sync_family(win);
        result
    }

    fn add_char(&mut self, win: NativeWindow, ch: char) -> Result<()> {
        let result = self.surface_mut(win)?.put(ch);
        self.sync_family(win);
        result
    }

    fn clear(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.surface_mut(win)?;
        surface.blank();
        surface.cleared = true;
        self.sync_family(win);
        Ok(())
    }

    fn erase(&mut self, win: NativeWindow) -> Result<()> {
        self.surface_mut(win)?.blank();
        self.sync_family(win);
        Ok(())
    }

    fn clear_to_eol(&mut self, win: NativeWindow) -> Result<()> {
        self.surface_mut(win)?.clear_to_eol();
        self.sync_family(win);
        Ok(())
    }

    fn clear_to_bottom(&mut self, win: NativeWindow) -> Result<()> {
        self.surface_mut(win)?.clear_to_bottom();
        self.sync_family(win);
        Ok(())
    }

    fn border(&mut self, win: NativeWindow, chars: Border) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let Size { lines, cols } = surface.size;
        if lines < 2 || cols < 2 {
            return Err(BackendError::OutOfBounds);
        }
        let attrs = surface.attrs;
        let set = |s: &mut Surface, y: u16, x: u16, ch: char| {
            let idx = s.index(y, x);
            s.cells[idx] = Cell::new(ch, attrs);
        };
        for x in 1..cols - 1 {
            set(surface, 0, x, chars.top);
            set(surface, lines - 1, x, chars.bottom);
        }
        for y in 1..lines - 1 {
            set(surface, y, 0, chars.left);
            set(surface, y, cols - 1, chars.right);
        }
        set(surface, 0, 0, chars.top_left);
        set(surface, 0, cols - 1, chars.top_right);
        set(surface, lines - 1, 0, chars.bottom_left);
        set(surface, lines - 1, cols - 1, chars.bottom_right);
        self.sync_family(win);
        Ok(())
    }

    fn hline(&mut self, win: NativeWindow, ch: char, n: u16) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let cell = Cell::new(ch, surface.attrs);
        let tail = surface.row_tail();
        let n = (n as usize).min(tail.len());
        tail[..n].fill(cell);
        self.sync_family(win);
        Ok(())
    }

    fn vline(&mut self, win: NativeWindow, ch: char, n: u16) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let cell = Cell::new(ch, surface.attrs);
        let Point { y, x } = surface.cursor;
        for row in y..surface.size.lines.min(y.saturating_add(n)) {
            let idx = surface.index(row, x);
            surface.cells[idx] = cell;
        }
        self.sync_family(win);
        Ok(())
    }

    fn insert_char(&mut self, win: NativeWindow, ch: char) -> Result<()> {
        if ch.width() != Some(1) {
            return Err(BackendError::Failed("insert_char"));
        }
        let surface = self.surface_mut(win)?;
        let cell = Cell::new(ch, surface.attrs);
        let tail = surface.row_tail();
        tail.rotate_right(1);
        tail[0] = cell;
        self.sync_family(win);
        Ok(())
    }

    fn delete_char(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let bg = surface.background;
        let tail = surface.row_tail();
        tail.rotate_left(1);
        let last = tail.len() - 1;
        tail[last] = bg;
        self.sync_family(win);
        Ok(())
    }

    fn insert_line(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let last = surface.size.lines - 1;
        surface.shift_rows(surface.cursor.y, last, -1);
        self.sync_family(win);
        Ok(())
    }

    fn delete_line(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let last = surface.size.lines - 1;
        surface.shift_rows(surface.cursor.y, last, 1);
        self.sync_family(win);
        Ok(())
    }

    fn scroll(&mut self, win: NativeWindow, n: i16) -> Result<()> {
        let surface = self.surface_mut(win)?;
        if !surface.scroll {
            return Err(BackendError::Failed("scroll"));
        }
        let (top, bottom) = surface.region;
        surface.shift_rows(top, bottom, n.into());
        self.sync_family(win);
        Ok(())
    }

    fn set_scroll_region(&mut self, win: NativeWindow, top: u16, bottom: u16) -> Result<()> {
        let surface = self.surface_mut(win)?;
        if top > bottom || bottom >= surface.size.lines {
            return Err(BackendError::OutOfBounds);
        }
        surface.region = (top, bottom);
        Ok(())
    }

    fn set_background(&mut self, win: NativeWindow, bg: Cell) -> Result<()> {
        let surface = self.surface_mut(win)?;
        let old = std::mem::replace(&mut surface.background, bg);
        for cell in surface.cells.iter_mut().filter(|c| !c.is_continuation()) {
            if cell.ch == old.ch {
                cell.ch = bg.ch;
            }
            cell.attrs = cell.attrs.difference(old.attrs).union(bg.attrs);
        }
        self.sync_family(win);
        Ok(())
    }

    fn touch(&mut self, win: NativeWindow) -> Result<()> {
        self.surface_mut(win)?.touched = true;
        Ok(())
    }

    fn redraw(&mut self, win: NativeWindow) -> Result<()> {
        let surface = self.surface_mut(win)?;
        surface.touched = true;
        surface.cleared = true;
        Ok(())
    }

    fn overlay(&mut self, src: NativeWindow, dst: NativeWindow) -> Result<()> {
        self.overlap_copy(src, dst, true)
    }

    fn overwrite(&mut self, src: NativeWindow, dst: NativeWindow) -> Result<()> {
        self.overlap_copy(src, dst, false)
    }

    fn copy_window(
        &mut self,
        src: NativeWindow,
        dst: NativeWindow,
        src_from: Point,
        dst_from: Point,
        dst_to: Point,
        overlay: bool,
    ) -> Result<()> {
        self.copy_cells(src, dst, src_from, dst_from, dst_to, overlay)
    }

    fn attr_on(&mut self, win: NativeWindow, attrs: Attr) -> Result<()> {
        self.surface_mut(win)?.attrs.insert(attrs);
        Ok(())
    }

    fn attr_off(&mut self, win: NativeWindow, attrs: Attr) -> Result<()> {
        self.surface_mut(win)?.attrs.remove(attrs);
        Ok(())
    }

    fn attr_set(&mut self, win: NativeWindow, attrs: Attr) -> Result<()> {
        self.surface_mut(win)?.attrs = attrs;
        Ok(())
    }

    fn set_keypad(&mut self, win: NativeWindow, enabled: bool) -> Result<()> {
        self.surface_mut(win)?.keypad = enabled;
        Ok(())
    }

    fn set_scroll(&mut self, win: NativeWindow, enabled: bool) -> Result<()> {
        self.surface_mut(win)?.scroll = enabled;
        Ok(())
    }

    fn move_window(&mut self, win: NativeWindow, origin: Point) -> Result<()> {
        let screen = self.size;
        let surface = self.surface_mut(win)?;
        if surface.pad || surface.parent.is_some() {
            return Err(BackendError::Failed("move_window"));
        }
        Self::fit(surface.size, origin, screen)?;
        surface.origin = origin;
        Ok(())
    }

    fn attrs(&self, win: NativeWindow) -> Result<Attr> {
        Ok(self.surface(win)?.attrs)
    }

    fn size(&self, win: NativeWindow) -> Result<Size> {
        Ok(self.surface(win)?.size)
    }

    fn origin(&self, win: NativeWindow) -> Result<Point> {
        Ok(self.surface(win)?.origin)
    }

    fn cursor(&self, win: NativeWindow) -> Result<Point> {
        Ok(self.surface(win)?.cursor)
    }

    fn parent_offset(&self, win: NativeWindow) -> Result<Option<Point>> {
        Ok(self.surface(win)?.parent.map(|(_, rel)| rel))
    }

    fn char_at(&self, win: NativeWindow) -> Result<Cell> {
        let surface = self.surface(win)?;
        Ok(surface.cells[surface.index(surface.cursor.y, surface.cursor.x)])
    }

    fn read_str(&self, win: NativeWindow, limit: Option<usize>) -> Result<String> {
        let surface = self.surface(win)?;
        let Point { y, x } = surface.cursor;
        let start = surface.index(y, x);
        let end = surface.index(y, 0) + surface.size.cols as usize;
        Ok(surface.cells[start..end]
            .iter()
            .filter(|c| !c.is_continuation())
            .map(|c| c.ch)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn background(&self, win: NativeWindow) -> Result<Cell> {
        Ok(self.surface(win)?.background)
    }

    fn is_touched(&self, win: NativeWindow) -> Result<bool> {
        Ok(self.surface(win)?.touched)
    }

    fn noutrefresh(&mut self, win: NativeWindow) -> Result<()> {
        self.trip(FailPoint::Refresh)?;
        let surface = self.surface_mut(win)?;
        if surface.pad {
            return Err(BackendError::Failed("noutrefresh on a pad"));
        }
        let cleared = std::mem::take(&mut surface.cleared);
        surface.touched = false;
        let (origin, cursor) = (surface.origin, surface.cursor);
        if cleared {
            self.full_repaint = true;
        }
        self.compose(win)?;
        self.screen_cursor = Some(Point::new(origin.y + cursor.y, origin.x + cursor.x));
        Ok(())
    }

    fn doupdate(&mut self) -> Result<()> {
        if self.root.is_none() {
            return Err(BackendError::NotInitialized);
        }
        if !self.entered {
            // Refreshing after end_screen resumes the screen
            self.device.enter()?;
            self.entered = true;
            self.full_repaint = true;
        }
        let frame = Frame {
            size: self.size,
            cells: &self.screen,
            cursor: self.screen_cursor,
            full: self.full_repaint,
        };
        self.device.paint(&frame)?;
        self.full_repaint = false;
        Ok(())
    }

    fn read_key(&mut self, win: NativeWindow) -> Result<Key> {
        let keypad = self.surface(win)?.keypad;
        self.device.read_key(keypad)?.ok_or(BackendError::NoInput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SurfaceBackend<Headless> {
        let mut b = SurfaceBackend::headless(Size::new(24, 80));
        b.init_screen().unwrap();
        b
    }

    fn row_text(b: &SurfaceBackend<Headless>, win: NativeWindow, y: u16) -> String {
        let size = b.size(win).unwrap();
        (0..size.cols)
            .filter_map(|x| b.cell(win, Point::new(y, x)))
            .filter(|c| !c.is_continuation())
            .map(|c| c.ch)
            .collect()
    }

    #[test]
    fn test_zero_size_extends_to_edge() {
        let mut b = backend();
        let w = b.create_window(Size::new(0, 0), Point::new(4, 10)).unwrap();
        assert_eq!(b.size(w).unwrap(), Size::new(20, 70));
        assert!(b.create_window(Size::new(30, 10), Point::new(0, 0)).is_err());
    }

    #[test]
    fn test_subwindow_shares_storage() {
        let mut b = backend();
        let w = b.create_window(Size::new(10, 20), Point::new(2, 2)).unwrap();
        let s = b.create_subwindow(w, Size::new(3, 5), Point::new(4, 4)).unwrap();
        assert_eq!(b.parent_offset(s).unwrap(), Some(Point::new(2, 2)));

        b.add_str(s, "hi").unwrap();
        assert_eq!(b.cell(w, Point::new(2, 2)).unwrap().ch, 'h');
        assert_eq!(b.cell(w, Point::new(2, 3)).unwrap().ch, 'i');

        // Outside the parent area
        assert!(matches!(
            b.create_subwindow(w, Size::new(3, 5), Point::new(0, 0)),
            Err(BackendError::OutOfBounds)
        ));
    }

    #[test]
    fn test_destroy_requires_subwindows_gone() {
        let mut b = backend();
        let w = b.create_window(Size::new(10, 20), Point::new(0, 0)).unwrap();
        let d = b.create_derived_window(w, Size::new(2, 2), Point::new(1, 1)).unwrap();
        assert!(matches!(b.destroy_window(w), Err(BackendError::HasSubwindows)));
        b.destroy_window(d).unwrap();
        b.destroy_window(w).unwrap();
        assert!(!b.is_live(w));
    }

    #[test]
    fn test_add_str_wraps_and_stops_at_bottom() {
        let mut b = backend();
        let w = b.create_window(Size::new(2, 4), Point::new(0, 0)).unwrap();
        assert!(b.add_str(w, "abcdefgh").is_err());
        assert_eq!(row_text(&b, w, 0), "abcd");
        assert_eq!(row_text(&b, w, 1), "efgh");

        b.erase(w).unwrap();
        b.set_scroll(w, true).unwrap();
        b.add_str(w, "abcdefghij").unwrap();
        assert_eq!(row_text(&b, w, 0), "efgh");
        assert_eq!(row_text(&b, w, 1), "ij  ");
    }

    #[test]
    fn test_panel_stacking() {
        let mut b = backend();
        let w1 = b.create_window(Size::new(5, 5), Point::new(0, 0)).unwrap();
        let w2 = b.create_window(Size::new(5, 5), Point::new(1, 1)).unwrap();
        let p1 = b.create_panel(w1).unwrap();
        let p2 = b.create_panel(w2).unwrap();

        assert_eq!(b.panel_above(p1), Some(p2));
        assert_eq!(b.panel_below(p2), Some(p1));
        assert_eq!(b.panel_above(p2), None);

        b.top_panel(p1).unwrap();
        assert_eq!(b.panel_above(p2), Some(p1));
        assert_eq!(b.stacking_order(), vec![p2, p1]);

        b.hide_panel(p1).unwrap();
        assert!(b.panel_hidden(p1).unwrap());
        assert_eq!(b.panel_above(p2), None);

        assert!(matches!(b.create_panel(w1), Err(BackendError::PanelAttached)));
        assert!(matches!(b.destroy_window(w1), Err(BackendError::PanelAttached)));
    }

    #[test]
    fn test_update_panels_composes_in_order() {
        let mut b = backend();
        let w1 = b.create_window(Size::new(1, 3), Point::new(0, 0)).unwrap();
        let w2 = b.create_window(Size::new(1, 3), Point::new(0, 1)).unwrap();
        b.add_str(w1, "aaa").unwrap_or(());
        b.add_str(w2, "bbb").unwrap_or(());
        let p1 = b.create_panel(w1).unwrap();
        b.create_panel(w2).unwrap();

        b.update_panels();
        // Composed, not painted yet
        assert!(b.screen_line(0).starts_with("abbb"));
        assert_eq!(b.device().paints(), 0);
        b.doupdate().unwrap();
        assert!(b.device().line(0).unwrap().starts_with("abbb"));

        b.top_panel(p1).unwrap();
        b.update_panels();
        b.doupdate().unwrap();
        assert!(b.device().line(0).unwrap().starts_with("aaab"));
        assert_eq!(b.device().paints(), 2);
    }

    #[test]
    fn test_fail_point_is_one_shot() {
        let mut b = backend();
        b.fail_next(FailPoint::CreateWindow);
        assert!(b.create_window(Size::new(1, 1), Point::new(0, 0)).is_err());
        assert!(b.create_window(Size::new(1, 1), Point::new(0, 0)).is_ok());
    }

    #[test]
    fn test_end_and_resume_screen() {
        let mut b = SurfaceBackend::headless(Size::new(24, 80));
        let root = b.init_screen().unwrap();

        b.end_screen().unwrap();
        assert!(!b.device().is_entered());
        b.end_screen().unwrap();

        assert_eq!(b.init_screen().unwrap(), root);
        assert!(b.device().is_entered());

        // Refreshing after end_screen re-enters as well
        b.end_screen().unwrap();
        b.doupdate().unwrap();
        assert!(b.device().is_entered());
        assert_eq!(b.window_count(), 1);
    }

    #[test]
    fn test_end_screen_after_root_destroyed() {
        let mut b = SurfaceBackend::headless(Size::new(24, 80));
        let root = b.init_screen().unwrap();
        b.destroy_window(root).unwrap();

        b.end_screen().unwrap();
        assert!(!b.device().is_entered());
        assert!(matches!(b.end_screen(), Err(BackendError::NotInitialized)));

        let again = b.init_screen().unwrap();
        assert_ne!(again, root);
        assert!(b.device().is_entered());
    }

    #[test]
    fn test_line_editing() {
        let mut b = backend();
        let w = b.create_window(Size::new(3, 6), Point::new(0, 0)).unwrap();
        b.add_str(w, "abcde").unwrap();

        b.move_cursor(w, Point::new(0, 1)).unwrap();
        b.insert_char(w, 'X').unwrap();
        assert_eq!(row_text(&b, w, 0), "aXbcde");
        assert_eq!(b.cursor(w).unwrap(), Point::new(0, 1));
        assert_eq!(b.char_at(w).unwrap().ch, 'X');

        b.delete_char(w).unwrap();
        assert_eq!(row_text(&b, w, 0), "abcde ");
        assert_eq!(b.read_str(w, Some(3)).unwrap(), "bcd");
        assert_eq!(b.read_str(w, None).unwrap(), "bcde ");

        b.move_cursor(w, Point::new(0, 3)).unwrap();
        b.clear_to_eol(w).unwrap();
        assert_eq!(row_text(&b, w, 0), "abc   ");

        b.move_cursor(w, Point::new(1, 0)).unwrap();
        b.hline(w, '-', 4).unwrap();
        assert_eq!(b.cursor(w).unwrap(), Point::new(1, 0));
        b.move_cursor(w, Point::new(0, 5)).unwrap();
        b.vline(w, '|', 9).unwrap();
        assert_eq!(row_text(&b, w, 0), "abc  |");
        assert_eq!(row_text(&b, w, 1), "---- |");
        assert_eq!(row_text(&b, w, 2), "     |");

        b.move_cursor(w, Point::new(0, 0)).unwrap();
        b.insert_line(w).unwrap();
        assert_eq!(row_text(&b, w, 0), "      ");
        assert_eq!(row_text(&b, w, 1), "abc  |");
        assert_eq!(row_text(&b, w, 2), "---- |");

        b.delete_line(w).unwrap();
        assert_eq!(row_text(&b, w, 0), "abc  |");
        assert_eq!(row_text(&b, w, 1), "---- |");
        assert_eq!(row_text(&b, w, 2), "      ");

        b.move_cursor(w, Point::new(1, 2)).unwrap();
        b.clear_to_bottom(w).unwrap();
        assert_eq!(row_text(&b, w, 0), "abc  |");
        assert_eq!(row_text(&b, w, 1), "--    ");
    }

    #[test]
    fn test_scroll_region() {
        let mut b = backend();
        let w = b.create_window(Size::new(4, 3), Point::new(0, 0)).unwrap();
        for (y, text) in ["a", "b", "c", "d"].iter().enumerate() {
            b.move_cursor(w, Point::new(y as u16, 0)).unwrap();
            b.add_str(w, text).unwrap();
        }

        assert!(b.scroll(w, 1).is_err());
        b.set_scroll(w, true).unwrap();
        b.set_scroll_region(w, 1, 2).unwrap();

        b.scroll(w, 1).unwrap();
        let rows: Vec<String> = (0..4).map(|y| row_text(&b, w, y)).collect();
        assert_eq!(rows, ["a  ", "c  ", "   ", "d  "]);

        b.scroll(w, -1).unwrap();
        let rows: Vec<String> = (0..4).map(|y| row_text(&b, w, y)).collect();
        assert_eq!(rows, ["a  ", "   ", "c  ", "d  "]);

        assert!(b.set_scroll_region(w, 2, 1).is_err());
        assert!(b.set_scroll_region(w, 0, 4).is_err());
    }

    #[test]
    fn test_overlay_overwrite_and_copy() {
        let mut b = backend();
        let w1 = b.create_window(Size::new(2, 4), Point::new(0, 0)).unwrap();
        let w2 = b.create_window(Size::new(2, 4), Point::new(0, 2)).unwrap();
        b.add_str(w1, "ab d").unwrap();
        for y in 0..2 {
            b.move_cursor(w2, Point::new(y, 0)).unwrap();
            b.hline(w2, 'x', 4).unwrap();
        }

        b.overlay(w1, w2).unwrap();
        assert_eq!(row_text(&b, w2, 0), "xdxx");
        assert_eq!(row_text(&b, w2, 1), "xxxx");

        b.overwrite(w1, w2).unwrap();
        assert_eq!(row_text(&b, w2, 0), " dxx");
        assert_eq!(row_text(&b, w2, 1), "  xx");

        b.copy_window(w1, w2, Point::new(0, 0), Point::new(1, 2), Point::new(1, 3), false)
            .unwrap();
        assert_eq!(row_text(&b, w2, 1), "  ab");
        assert!(matches!(
            b.copy_window(w1, w2, Point::new(0, 0), Point::new(1, 2), Point::new(1, 4), false),
            Err(BackendError::OutOfBounds)
        ));

        // Windows that do not overlap copy nothing
        let far = b.create_window(Size::new(1, 1), Point::new(10, 10)).unwrap();
        b.overlay(w1, far).unwrap();
        assert_eq!(b.cell(far, Point::new(0, 0)).unwrap().ch, ' ');
    }

    #[test]
    fn test_background_fills_blanks() {
        let mut b = backend();
        let w = b.create_window(Size::new(1, 3), Point::new(0, 0)).unwrap();
        let bg = Cell::new('.', Attr::DIM);
        b.set_background(w, bg).unwrap();
        assert_eq!(row_text(&b, w, 0), "...");
        assert_eq!(b.background(w).unwrap(), bg);

        b.add_str(w, "a").unwrap();
        assert_eq!(row_text(&b, w, 0), "a..");
        b.erase(w).unwrap();
        assert_eq!(b.char_at(w).unwrap(), bg);
    }

    #[test]
    fn test_touch_tracking() {
        let mut b = backend();
        let w = b.create_window(Size::new(4, 4), Point::new(0, 0)).unwrap();
        let d = b.create_derived_window(w, Size::new(2, 2), Point::new(1, 1)).unwrap();
        assert!(b.is_touched(w).unwrap());

        b.noutrefresh(w).unwrap();
        assert!(!b.is_touched(w).unwrap());
        b.touch(w).unwrap();
        assert!(b.is_touched(w).unwrap());
        b.noutrefresh(w).unwrap();

        // Writing through a subwindow touches its parent
        b.add_str(d, "x").unwrap();
        assert!(b.is_touched(w).unwrap());
        b.noutrefresh(w).unwrap();

        b.redraw(w).unwrap();
        assert!(b.is_touched(w).unwrap());
    }
}
