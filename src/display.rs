//! Character display showing the current scale and the latest value.
//!
//! The panel mimics the 16x4 character OLED of the shield: the scale name on
//! the second row and the value on the fourth, both centered.

use std::io::{self, Stdout};

use crossterm::tty::IsTty;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use ratatui::{Terminal, TerminalOptions, Viewport};
use tracing::{info, warn};

pub const PANEL_COLUMNS: u16 = 16;
pub const PANEL_ROWS: u16 = 4;
pub const NO_SCALE: &str = "No scale";
pub const NO_VALUE: &str = "No value";

/// Sink for the two display fields.
pub trait Screen {
    fn show(&mut self, scale: Option<&str>, value: &str);
}

impl<S: Screen + ?Sized> Screen for Box<S> {
    fn show(&mut self, scale: Option<&str>, value: &str) {
        (**self).show(scale, value);
    }
}

/// Content of the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OledFrame {
    pub scale: Option<String>,
    pub value: String,
}

impl Default for OledFrame {
    fn default() -> Self {
        Self {
            scale: None,
            value: NO_VALUE.to_string(),
        }
    }
}

impl OledFrame {
    pub fn new(scale: Option<&str>, value: &str) -> Self {
        Self {
            scale: scale.map(str::to_string),
            value: value.to_string(),
        }
    }

    pub fn scale_text(&self) -> &str {
        self.scale.as_deref().unwrap_or(NO_SCALE)
    }
}

impl Widget for &OledFrame {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let lines = vec![
            Line::from(""),
            Line::from(self.scale_text().to_string()),
            Line::from(""),
            Line::styled(self.value.clone(), Style::default().add_modifier(Modifier::BOLD)),
        ];
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("DMMShield"))
            .render(area, buf);
    }
}

/// Keeps the last frame; used by scripted runs and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingScreen {
    pub frame: OledFrame,
    pub refreshes: usize,
}

impl Screen for RecordingScreen {
    fn show(&mut self, scale: Option<&str>, value: &str) {
        self.frame = OledFrame::new(scale, value);
        self.refreshes += 1;
    }
}

/// Reports display refreshes as log events.
#[derive(Debug, Default)]
pub struct LogScreen;

impl Screen for LogScreen {
    fn show(&mut self, scale: Option<&str>, value: &str) {
        info!(scale = scale.unwrap_or(NO_SCALE), value, "display");
    }
}

/// Draws the panel inline on the controlling terminal.
pub struct TerminalScreen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalScreen {
    /// Fails when stdout is not a terminal.
    pub fn new() -> io::Result<Self> {
        let stdout = io::stdout();
        if !stdout.is_tty() {
            return Err(io::Error::new(io::ErrorKind::Other, "stdout is not a terminal"));
        }
        let terminal = Terminal::with_options(
            CrosstermBackend::new(stdout),
            TerminalOptions {
                viewport: Viewport::Inline(PANEL_ROWS + 2),
            },
        )?;
        Ok(Self { terminal })
    }
}

impl Screen for TerminalScreen {
    fn show(&mut self, scale: Option<&str>, value: &str) {
        let frame = OledFrame::new(scale, value);
        let drawn = self.terminal.draw(|f| {
            let area = f.size();
            let panel = Rect::new(
                area.x,
                area.y,
                (PANEL_COLUMNS + 2).min(area.width),
                (PANEL_ROWS + 2).min(area.height),
            );
            f.render_widget(&frame, panel);
        });
        if let Err(e) = drawn {
            warn!(error = %e, "display refresh failed");
        }
    }
}
