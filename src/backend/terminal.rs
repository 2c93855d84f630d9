//! Crossterm device
//!
//! Paints composed frames to the real terminal and turns crossterm key
//! events into [`Key`]s.

use std::io::{self, Stdout, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use tracing::debug;

use super::device::{Device, Frame};
use super::surface::Cell;
use super::{Attr, Key, Size};

/// The process terminal, driven through crossterm
pub struct CrosstermDevice<W: Write = Stdout> {
    out: W,
    /// Last painted frame, for diff rendering
    painted: Vec<Cell>,
    entered: bool,
}

impl CrosstermDevice<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> CrosstermDevice<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            painted: Vec::new(),
            entered: false,
        }
    }

    fn set_attrs(&mut self, attrs: Attr) -> io::Result<()> {
        queue!(self.out, SetAttribute(Attribute::Reset))?;
        let pairs = [
            (Attr::BOLD, Attribute::Bold),
            (Attr::DIM, Attribute::Dim),
            (Attr::ITALIC, Attribute::Italic),
            (Attr::UNDERLINE, Attribute::Underlined),
            (Attr::BLINK, Attribute::SlowBlink),
            (Attr::REVERSE, Attribute::Reverse),
            (Attr::STANDOUT, Attribute::Reverse),
            (Attr::INVISIBLE, Attribute::Hidden),
        ];
        for (flag, attribute) in pairs {
            if attrs.contains(flag) {
                queue!(self.out, SetAttribute(attribute))?;
            }
        }
        Ok(())
    }
}

impl<W: Write> Device for CrosstermDevice<W> {
    fn size(&self) -> io::Result<Size> {
        let (cols, rows) = terminal::size()?;
        Ok(Size::new(rows, cols))
    }

    fn enter(&mut self) -> io::Result<()> {
        if self.entered {
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        execute!(
            self.out,
            EnterAlternateScreen,
            DisableLineWrap,
            Hide,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.painted.clear();
        self.entered = true;
        debug!("Terminal entered raw mode");
        Ok(())
    }

    fn leave(&mut self) -> io::Result<()> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;
        let _ = execute!(
            self.out,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            LeaveAlternateScreen
        );
        // Raw mode must go even if the escape sequences above failed
        terminal::disable_raw_mode()?;
        debug!("Terminal restored");
        Ok(())
    }

    fn paint(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        let full = frame.full || self.painted.len() != frame.cells.len();
        if full {
            queue!(self.out, Clear(ClearType::All))?;
        }

        // Begin synchronized update (reduces flicker)
        write!(self.out, "\x1b[?2026h")?;
        queue!(self.out, Hide)?;

        let cols = frame.size.cols as usize;
        let mut last_attrs: Option<Attr> = None;
        for (idx, cell) in frame.cells.iter().enumerate() {
            if cell.is_continuation() {
                continue;
            }
            if !full && self.painted.get(idx) == Some(cell) {
                continue;
            }
            let y = (idx / cols) as u16;
            let x = (idx % cols) as u16;
            if last_attrs != Some(cell.attrs) {
                self.set_attrs(cell.attrs)?;
                last_attrs = Some(cell.attrs);
            }
            queue!(self.out, MoveTo(x, y), Print(cell.ch))?;
        }

        if let Some(cursor) = frame.cursor {
            queue!(self.out, MoveTo(cursor.x, cursor.y), Show)?;
        }

        // End synchronized update
        write!(self.out, "\x1b[?2026l")?;
        self.out.flush()?;

        self.painted.clear();
        self.painted.extend_from_slice(frame.cells);
        Ok(())
    }

    fn read_key(&mut self, keypad: bool) -> io::Result<Option<Key>> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Release {
                    continue;
                }
                if let Some(mapped) = map_key(&key, keypad) {
                    return Ok(Some(mapped));
                }
            }
        }
    }
}

impl<W: Write> Drop for CrosstermDevice<W> {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

/// Translate a crossterm key event. Without keypad mode, special keys
/// surface as the escape that starts their sequence.
fn map_key(event: &KeyEvent, keypad: bool) -> Option<Key> {
    let special = |key: Key| if keypad { key } else { Key::Esc };
    match event.code {
        KeyCode::Char(ch) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) && ch.is_ascii_alphabetic() {
                let code = (ch.to_ascii_lowercase() as u8) - b'a' + 1;
                Some(Key::Char(code as char))
            } else {
                Some(Key::Char(ch))
            }
        }
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Tab => Some(Key::Tab),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Up => Some(special(Key::Up)),
        KeyCode::Down => Some(special(Key::Down)),
        KeyCode::Left => Some(special(Key::Left)),
        KeyCode::Right => Some(special(Key::Right)),
        KeyCode::Home => Some(special(Key::Home)),
        KeyCode::End => Some(special(Key::End)),
        KeyCode::PageUp => Some(special(Key::PageUp)),
        KeyCode::PageDown => Some(special(Key::PageDown)),
        KeyCode::Insert => Some(special(Key::Insert)),
        KeyCode::Delete => Some(special(Key::Delete)),
        KeyCode::F(n) => Some(special(Key::F(n))),
        _ => None,
    }
}
