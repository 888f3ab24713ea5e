//! Line-oriented transports the interpreter talks through.

use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::debug;

use crate::error::DmmError;

pub trait Transport {
    /// At most one received line, without its terminator. Waits no longer
    /// than the transport's line timeout; `Ok(None)` when nothing arrived.
    fn read_line(&mut self) -> Result<Option<String>, DmmError>;
    fn write_str(&mut self, text: &str) -> Result<(), DmmError>;
}

/// Longest accepted command line, terminator excluded.
pub const MAX_LINE_LEN: usize = 100;

/// Outcome of line assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Line(String),
    /// The line exceeded the length limit; its bytes up to the next
    /// terminator are dropped.
    Overflow,
}

/// Splits a byte stream into lines terminated by CR, LF or both.
///
/// Blank lines are skipped and at most `max_len` bytes are buffered.
#[derive(Debug)]
pub struct LineAssembler {
    pending: Vec<u8>,
    ready: VecDeque<Assembled>,
    max_len: usize,
    discarding: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}

impl LineAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_len),
            ready: VecDeque::new(),
            max_len,
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if !line.is_empty() {
                    self.ready.push_back(Assembled::Line(line));
                }
            } else if self.discarding {
                continue;
            } else if self.pending.len() == self.max_len {
                self.pending.clear();
                self.discarding = true;
                self.ready.push_back(Assembled::Overflow);
            } else {
                self.pending.push(byte);
            }
        }
    }

    pub fn next_line(&mut self) -> Option<Assembled> {
        self.ready.pop_front()
    }

    /// Bytes of the unterminated line held so far.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

fn too_long() -> DmmError {
    DmmError::Generic(format!(
        "Command line longer than {} characters",
        MAX_LINE_LEN
    ))
}

fn assembled(item: Assembled) -> Result<Option<String>, DmmError> {
    match item {
        Assembled::Line(line) => Ok(Some(line)),
        Assembled::Overflow => Err(too_long()),
    }
}

/// UART link, lines terminated by CR, LF or both.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: LineAssembler,
    line_timeout: Duration,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>, line_timeout: Duration) -> Self {
        Self {
            port,
            lines: LineAssembler::default(),
            line_timeout,
        }
    }

    /// Opens `path` at `baud`, 8N1.
    pub fn open(path: &str, baud: u32, line_timeout: Duration) -> Result<Self, DmmError> {
        let port = serialport::new(path, baud)
            .timeout(line_timeout)
            .open()
            .map_err(|e| DmmError::Transport(format!("failed to open port '{}': {}", path, e)))?;
        Ok(Self::new(port, line_timeout))
    }
}

impl Transport for SerialTransport {
    /// An over-long line is reported once as a generic error.
    fn read_line(&mut self) -> Result<Option<String>, DmmError> {
        if let Some(item) = self.lines.next_line() {
            return assembled(item);
        }
        let start = Instant::now();
        let mut chunk = [0u8; 128];
        loop {
            match self.port.read(&mut chunk) {
                Ok(n) if n > 0 => {
                    self.lines.push(&chunk[..n]);
                    if let Some(item) = self.lines.next_line() {
                        return assembled(item);
                    }
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
            if start.elapsed() >= self.line_timeout {
                return Ok(None);
            }
        }
    }

    fn write_str(&mut self, text: &str) -> Result<(), DmmError> {
        self.port.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// Lines delivered by another thread, typically a stdin reader; output goes
/// to stdout.
pub struct ChannelTransport {
    lines: Receiver<String>,
    line_timeout: Duration,
}

impl ChannelTransport {
    pub fn new(lines: Receiver<String>, line_timeout: Duration) -> Self {
        Self {
            lines,
            line_timeout,
        }
    }

    /// Spawns a reader forwarding stdin lines until EOF.
    pub fn stdin(line_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("stdin reader finished");
        });
        Self::new(rx, line_timeout)
    }
}

impl Transport for ChannelTransport {
    fn read_line(&mut self) -> Result<Option<String>, DmmError> {
        match self.lines.recv_timeout(self.line_timeout) {
            Ok(line) if line.len() > MAX_LINE_LEN => Err(too_long()),
            Ok(line) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DmmError::Transport(String::from("input closed")))
            }
        }
    }

    fn write_str(&mut self, text: &str) -> Result<(), DmmError> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Queue of input lines and a capture of everything written.
#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    input: VecDeque<String>,
    output: String,
}

impl ScriptedTransport {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            output: String::new(),
        }
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        self.input.push_back(line.into());
    }

    pub fn is_drained(&self) -> bool {
        self.input.is_empty()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Returns and clears the captured output.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Transport for ScriptedTransport {
    fn read_line(&mut self) -> Result<Option<String>, DmmError> {
        Ok(self.input.pop_front())
    }

    fn write_str(&mut self, text: &str) -> Result<(), DmmError> {
        self.output.push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_transport_replays_and_captures() {
        let mut t = ScriptedTransport::new(["DMMConfig Diode", "DMMMeasureAvg"]);
        assert_eq!(t.read_line().unwrap().as_deref(), Some("DMMConfig Diode"));
        t.write_str("PASS, x\r\n").unwrap();
        t.push_line("DMMMeasureStop");
        assert_eq!(t.read_line().unwrap().as_deref(), Some("DMMMeasureAvg"));
        assert_eq!(t.read_line().unwrap().as_deref(), Some("DMMMeasureStop"));
        assert_eq!(t.read_line().unwrap(), None);
        assert!(t.is_drained());
        assert_eq!(t.take_output(), "PASS, x\r\n");
        assert_eq!(t.output(), "");
    }

    fn lines(assembler: &mut LineAssembler) -> Vec<Assembled> {
        std::iter::from_fn(|| assembler.next_line()).collect()
    }

    fn line(text: &str) -> Assembled {
        Assembled::Line(text.to_string())
    }

    #[test]
    fn assembler_accepts_every_terminator() {
        let mut a = LineAssembler::default();
        a.push(b"DMMMeasureRep\r\nDMMMeasureStop\rDMMMeasureAvg\n");
        assert_eq!(
            lines(&mut a),
            [line("DMMMeasureRep"), line("DMMMeasureStop"), line("DMMMeasureAvg")]
        );
        assert_eq!(a.buffered(), 0);
    }

    #[test]
    fn assembler_skips_blank_lines() {
        let mut a = LineAssembler::default();
        a.push(b"\r\n\r\n   \r\nDMMConfig Diode\n\n");
        assert_eq!(lines(&mut a), [line("DMMConfig Diode")]);
    }

    #[test]
    fn assembler_joins_chunks() {
        let mut a = LineAssembler::default();
        a.push(b"DMMCon");
        assert_eq!(a.next_line(), None);
        assert_eq!(a.buffered(), 6);
        a.push(b"fig VoltageDC5");
        a.push(b"\r");
        a.push(b"\nDMMMeasureRaw\r\n");
        assert_eq!(
            lines(&mut a),
            [line("DMMConfig VoltageDC5"), line("DMMMeasureRaw")]
        );
    }

    #[test]
    fn assembler_replaces_invalid_utf8() {
        let mut a = LineAssembler::default();
        a.push(b"DMM\xffStop\n");
        assert_eq!(lines(&mut a), [line("DMM\u{fffd}Stop")]);
    }

    #[test]
    fn assembler_drops_overlong_line_until_terminator() {
        let mut a = LineAssembler::new(8);
        a.push(b"12345678");
        assert_eq!(a.next_line(), None);
        a.push(&[b'9'; 10_000]);
        assert_eq!(a.buffered(), 0);
        assert_eq!(lines(&mut a), [Assembled::Overflow]);
        a.push(b"tail\r\nDMMStop\n");
        assert_eq!(lines(&mut a), [line("DMMStop")]);
    }

    #[test]
    fn assembler_keeps_line_at_the_limit() {
        let mut a = LineAssembler::new(4);
        a.push(b"abcd\n");
        assert_eq!(lines(&mut a), [line("abcd")]);
    }

    #[test]
    fn channel_transport_rejects_overlong_line() {
        let (tx, rx) = mpsc::channel();
        let mut t = ChannelTransport::new(rx, Duration::from_millis(1));
        tx.send("1".repeat(MAX_LINE_LEN + 1)).unwrap();
        assert!(matches!(t.read_line(), Err(DmmError::Generic(_))));
    }

    #[test]
    fn channel_transport_times_out_then_reports_closed() {
        let (tx, rx) = mpsc::channel();
        let mut t = ChannelTransport::new(rx, Duration::from_millis(1));
        assert_eq!(t.read_line().unwrap(), None);
        tx.send(String::from("DMMMeasureStop\r")).unwrap();
        assert_eq!(t.read_line().unwrap().as_deref(), Some("DMMMeasureStop"));
        drop(tx);
        assert!(matches!(t.read_line(), Err(DmmError::Transport(_))));
    }
}
