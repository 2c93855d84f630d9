//! Output devices for the surface backend

use std::collections::VecDeque;
use std::io;

use super::surface::Cell;
use super::{Key, Point, Size};

/// A composed screen ready to be painted
pub struct Frame<'a> {
    pub size: Size,
    /// Row-major cells, `size.lines * size.cols` long
    pub cells: &'a [Cell],
    /// Where to leave the hardware cursor
    pub cursor: Option<Point>,
    /// Repaint everything instead of diffing against the last frame
    pub full: bool,
}

impl Frame<'_> {
    pub fn row(&self, y: u16) -> &[Cell] {
        let cols = self.size.cols as usize;
        let start = y as usize * cols;
        &self.cells[start..start + cols]
    }
}

/// Something that can show a frame and produce keys
pub trait Device {
    fn size(&self) -> io::Result<Size>;
    /// Take over the terminal (raw mode, alternate screen)
    fn enter(&mut self) -> io::Result<()>;
    /// Give the terminal back
    fn leave(&mut self) -> io::Result<()>;
    fn paint(&mut self, frame: &Frame<'_>) -> io::Result<()>;
    /// Blocking read of the next key; `Ok(None)` when no key will ever arrive
    fn read_key(&mut self, keypad: bool) -> io::Result<Option<Key>>;
}

/// In-memory device: keeps the last painted frame as text and replays
/// scripted keys
#[derive(Debug, Default)]
pub struct Headless {
    size: Size,
    entered: bool,
    lines: Vec<String>,
    paints: usize,
    keys: VecDeque<Key>,
}

impl Headless {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Queue a key for `read_key`
    pub fn push_key(&mut self, key: Key) {
        self.keys.push_back(key);
    }

    /// Text of a painted line
    pub fn line(&self, y: usize) -> Option<&str> {
        self.lines.get(y).map(String::as_str)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of frames painted so far
    pub fn paints(&self) -> usize {
        self.paints
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

impl Device for Headless {
    fn size(&self) -> io::Result<Size> {
        Ok(self.size)
    }

    fn enter(&mut self) -> io::Result<()> {
        self.entered = true;
        Ok(())
    }

    fn leave(&mut self) -> io::Result<()> {
        self.entered = false;
        Ok(())
    }

    fn paint(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        self.lines = (0..frame.size.lines)
            .map(|y| frame.row(y).iter().filter(|c| !c.is_continuation()).map(|c| c.ch).collect())
            .collect();
        self.paints += 1;
        Ok(())
    }

    fn read_key(&mut self, _keypad: bool) -> io::Result<Option<Key>> {
        Ok(self.keys.pop_front())
    }
}
