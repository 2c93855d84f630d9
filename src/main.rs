//! termwin - window handle demo
//!
//! Opens a few paneled windows on the terminal and lets you shuffle them
//! around, exercising the handle layer end to end.
//!
//! # Quick Start
//!
//! ```text
//! termwin              # Interactive demo on the terminal
//! termwin --headless   # Scripted run, prints the final screen
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Tab | Raise the bottom panel |
//! | Arrows | Move the top panel |
//! | h | Hide/show the top panel |
//! | d | Close the top window (and its subwindows) |
//! | n | Open another window |
//! | q / Esc | Quit |

use std::env;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use termwin::backend::{CrosstermBackend, CrosstermDevice, DrawingBackend, Key, MemoryBackend, Size};
use termwin::config::{Config, DemoConfig};
use termwin::{Host, Session, WindowRef};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line options
#[derive(Debug, Default)]
struct Options {
    headless: bool,
}

fn print_version() {
    eprintln!("termwin {}", VERSION);
}

fn print_help() {
    eprintln!("termwin {} - curses-style window handle demo", VERSION);
    eprintln!();
    eprintln!("Usage: termwin [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --headless            Run a scripted session without a terminal");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Tab                   Raise the bottom panel");
    eprintln!("  Arrow keys            Move the top panel");
    eprintln!("  h                     Hide/show the top panel");
    eprintln!("  d                     Close the top window");
    eprintln!("  n                     Open another window");
    eprintln!("  q, Esc                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.termwin/config.toml");
    eprintln!("Log filter:    TERMWIN_LOG (e.g. TERMWIN_LOG=termwin=trace)");
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--headless" => options.headless = true,
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }
    Ok(options)
}

/// Log to a file; the terminal belongs to the demo
fn init_logging(config: &Config) {
    let Some(path) = config.log_path() else {
        return;
    };
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let filter = EnvFilter::try_from_env("TERMWIN_LOG")
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = Config::load();
    init_logging(&config);
    info!("termwin {} starting (headless: {})", VERSION, options.headless);

    if options.headless {
        return run_headless(&config);
    }

    let backend: CrosstermBackend = CrosstermBackend::new(CrosstermDevice::stdout())?;
    let host = Host::new(Session::with_config(backend, config.session.clone()));
    let result = run_demo(&host, &config.demo, false);
    if !host.endwin() {
        warn!("endwin failed");
    }
    if let Err(e) = &result {
        error!("Demo failed: {}", e);
    }
    result
}

/// Replay a fixed key script on an in-memory screen and print the result
fn run_headless(config: &Config) -> anyhow::Result<()> {
    let mut backend = MemoryBackend::headless(Size::new(24, 80));
    for key in [Key::Tab, Key::Right, Key::Down, Key::Char('d'), Key::Char('n'), Key::Char('h')] {
        backend.device_mut().push_key(key);
    }
    let host = Host::new(Session::with_config(backend, config.session.clone()));
    run_demo(&host, &config.demo, true)?;

    let lines = host.with_session(|s| s.backend().device().lines().to_vec());
    for line in lines {
        println!("{}", line.trim_end());
    }
    info!("{} windows still open", host.live_windows());
    Ok(())
}

/// Draw a boxed, labeled window and put it on the panel stack
fn open_panel<B: DrawingBackend>(
    host: &Host<B>,
    label: &str,
    at: (u16, u16),
) -> Option<WindowRef<B>> {
    let win = host.newwin(8, 30, at.0, at.1)?;
    win.draw_box();
    win.mv_add_str(1, 2, label);
    win.move_cursor(2, 1);
    win.hline('─', 28);
    win.new_panel();

    // A subwindow, closed along with its parent
    if let Some(inner) = win.derwin(4, 26, 3, 2) {
        inner.add_str("subwindow of ");
        inner.add_str(label);
    }
    Some(win)
}

fn run_demo<B: DrawingBackend>(
    host: &Host<B>,
    demo: &DemoConfig,
    stop_when_idle: bool,
) -> anyhow::Result<()> {
    let stdscr = host
        .initscr()
        .ok_or_else(|| anyhow::anyhow!("could not initialize the screen"))?;
    if demo.border {
        stdscr.draw_box();
    }
    stdscr.mv_add_str(0, 2, &format!(" {} ", demo.title));

    // Bottom to top, mirroring the panel stack
    let mut stack: Vec<WindowRef<B>> = Vec::new();
    let mut opened = 0;
    for _ in 0..3 {
        opened += 1;
        let at = (2 + opened * 3, 4 + opened * 8);
        if let Some(win) = open_panel(host, &format!("window {}", opened), at) {
            stack.push(win);
        }
    }

    loop {
        host.update_panels();
        if !host.doupdate() {
            warn!("doupdate failed");
        }

        let Some(key) = stdscr.get_ch() else {
            if stop_when_idle {
                break;
            }
            continue;
        };

        match key {
            Key::Char('q') | Key::Esc | Key::Char('\u{3}') => break,
            Key::Tab => {
                if !stack.is_empty() {
                    let bottom = stack.remove(0);
                    bottom.top_panel();
                    stack.push(bottom);
                }
            }
            Key::Up | Key::Down | Key::Left | Key::Right => {
                let Some(top) = stack.last() else { continue };
                let Some(origin) = top.origin() else { continue };
                let (y, x) = match key {
                    Key::Up => (origin.y.saturating_sub(1), origin.x),
                    Key::Down => (origin.y + 1, origin.x),
                    Key::Left => (origin.y, origin.x.saturating_sub(1)),
                    _ => (origin.y, origin.x + 1),
                };
                top.move_panel(y, x);
            }
            Key::Char('h') => {
                if let Some(top) = stack.last() {
                    match top.panel_hidden() {
                        Some(true) => top.show_panel(),
                        _ => top.hide_panel(),
                    };
                }
            }
            Key::Char('d') => {
                if let Some(top) = stack.pop() {
                    if !top.close() {
                        warn!("close of {} reported a failure", top);
                    }
                }
            }
            Key::Char('n') => {
                opened += 1;
                let at = (2 + (opened % 4) * 3, 4 + (opened % 6) * 8);
                if let Some(win) = open_panel(host, &format!("window {}", opened), at) {
                    stack.push(win);
                }
            }
            _ => {}
        }
    }

    info!("Demo finished with {} windows on the stack", stack.len());
    Ok(())
}
