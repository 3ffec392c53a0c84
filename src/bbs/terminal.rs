//! Line-oriented terminal on top of an SSH channel.
//!
//! The channel delivers raw keystrokes; [`LineTerminal`] turns them into edited
//! lines (echo, backspace, Ctrl-U, Enter) and writes output with CRLF line
//! endings. Geometry and the prompt live in a [`TerminalControl`] shared with
//! the request dispatcher, which updates them on `pty-req` and `window-change`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Buf;
use tokio::sync::mpsc;

pub const DEFAULT_WIDTH: u32 = 80;
pub const DEFAULT_HEIGHT: u32 = 24;
/// Prompt shown before a line read until a pty-req clears it.
pub const DEFAULT_PROMPT: &str = "> ";

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const CTRL_U: u8 = 0x15;
const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    /// Input queue closed or Ctrl-D on an empty line.
    #[error("client disconnected")]
    Disconnected,
    /// Ctrl-C while reading.
    #[error("input interrupted")]
    Interrupted,
    #[error("terminal write failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry { width: DEFAULT_WIDTH, height: DEFAULT_HEIGHT }
    }
}

impl Geometry {
    /// Two big-endian u32 values (width, height); anything shorter is 80x24.
    pub fn parse(payload: &[u8]) -> Self {
        if payload.len() < 8 {
            return Geometry::default();
        }
        let mut buf = payload;
        let width = buf.get_u32();
        let height = buf.get_u32();
        Geometry { width, height }
    }
}

#[derive(Debug)]
struct ControlState {
    geometry: Geometry,
    prompt: String,
}

/// Shared, clonable handle on a terminal's geometry and prompt.
#[derive(Debug, Clone)]
pub struct TerminalControl {
    inner: Arc<Mutex<ControlState>>,
}

impl Default for TerminalControl {
    fn default() -> Self {
        TerminalControl {
            inner: Arc::new(Mutex::new(ControlState {
                geometry: Geometry::default(),
                prompt: DEFAULT_PROMPT.to_string(),
            })),
        }
    }
}

impl TerminalControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_size(&self, geometry: Geometry) {
        self.state().geometry = geometry;
    }

    pub fn geometry(&self) -> Geometry {
        self.state().geometry
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.state().prompt = prompt.into();
    }

    pub fn prompt(&self) -> String {
        self.state().prompt.clone()
    }
}

/// Where terminal output bytes go (an SSH channel in production).
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<(), TerminalError>;
}

/// What the menu engine needs from a terminal.
#[async_trait]
pub trait Terminal: Send {
    /// Write text; `\n` becomes `\r\n`.
    async fn write(&mut self, text: &str) -> Result<(), TerminalError>;
    /// Show the current prompt (if any) and read one echoed line.
    async fn read_line(&mut self) -> Result<String, TerminalError>;
    /// Show `prompt` and read one line without echo.
    async fn read_password(&mut self, prompt: &str) -> Result<String, TerminalError>;
    fn control(&self) -> &TerminalControl;
}

/// Line discipline over a queue of raw input chunks.
pub struct LineTerminal<S> {
    sink: S,
    input: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
    skip_lf: bool,
    control: TerminalControl,
}

impl<S: OutputSink> LineTerminal<S> {
    pub fn new(sink: S, input: mpsc::UnboundedReceiver<Vec<u8>>, control: TerminalControl) -> Self {
        LineTerminal {
            sink,
            input,
            pending: VecDeque::new(),
            skip_lf: false,
            control,
        }
    }

    async fn next_byte(&mut self) -> Result<u8, TerminalError> {
        loop {
            if let Some(b) = self.pending.pop_front() {
                return Ok(b);
            }
            match self.input.recv().await {
                Some(chunk) => self.pending.extend(chunk),
                None => return Err(TerminalError::Disconnected),
            }
        }
    }

    /// Swallow the rest of a CSI (`ESC [ ... final`) or SS3 (`ESC O x`) sequence.
    async fn skip_escape(&mut self) -> Result<(), TerminalError> {
        match self.next_byte().await? {
            b'[' => loop {
                let b = self.next_byte().await?;
                if (0x40..=0x7e).contains(&b) {
                    return Ok(());
                }
            },
            b'O' => self.next_byte().await.map(|_| ()),
            _ => Ok(()),
        }
    }

    async fn read_edited(&mut self, echo: bool) -> Result<String, TerminalError> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let b = self.next_byte().await?;
            if std::mem::take(&mut self.skip_lf) && b == b'\n' {
                continue;
            }
            match b {
                b'\r' | b'\n' => {
                    self.skip_lf = b == b'\r';
                    self.sink.send(b"\r\n").await?;
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                DEL | BACKSPACE => {
                    if pop_char(&mut line) && echo {
                        self.sink.send(b"\x08 \x08").await?;
                    }
                }
                CTRL_C => {
                    self.sink.send(b"^C\r\n").await?;
                    return Err(TerminalError::Interrupted);
                }
                CTRL_D if line.is_empty() => return Err(TerminalError::Disconnected),
                CTRL_U => {
                    let erased = String::from_utf8_lossy(&line).chars().count();
                    line.clear();
                    if echo && erased > 0 {
                        self.sink.send("\x08 \x08".repeat(erased).as_bytes()).await?;
                    }
                }
                ESC => self.skip_escape().await?,
                b if b < 0x20 => {}
                b => {
                    line.push(b);
                    if echo {
                        self.sink.send(&[b]).await?;
                    }
                }
            }
        }
    }
}

/// Drop the last UTF-8 character. Returns false on an empty line.
fn pop_char(line: &mut Vec<u8>) -> bool {
    if line.is_empty() {
        return false;
    }
    while let Some(b) = line.pop() {
        if b & 0xc0 != 0x80 {
            break;
        }
    }
    true
}

fn to_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev = '\0';
    for ch in text.chars() {
        if ch == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(ch);
        prev = ch;
    }
    out
}

#[async_trait]
impl<S: OutputSink> Terminal for LineTerminal<S> {
    async fn write(&mut self, text: &str) -> Result<(), TerminalError> {
        self.sink.send(to_crlf(text).as_bytes()).await
    }

    async fn read_line(&mut self) -> Result<String, TerminalError> {
        let prompt = self.control.prompt();
        if !prompt.is_empty() {
            self.sink.send(prompt.as_bytes()).await?;
        }
        self.read_edited(true).await
    }

    async fn read_password(&mut self, prompt: &str) -> Result<String, TerminalError> {
        if !prompt.is_empty() {
            self.sink.send(prompt.as_bytes()).await?;
        }
        self.read_edited(false).await
    }

    fn control(&self) -> &TerminalControl {
        &self.control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[async_trait]
    impl OutputSink for Capture {
        async fn send(&self, bytes: &[u8]) -> Result<(), TerminalError> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    fn terminal(input: &[u8]) -> (LineTerminal<Capture>, Capture) {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(input.to_vec()).unwrap();
        let capture = Capture::default();
        let control = TerminalControl::new();
        control.set_prompt("");
        (LineTerminal::new(capture.clone(), rx, control), capture)
    }

    #[test]
    fn geometry_parsing() {
        assert_eq!(Geometry::parse(&[0, 0, 0, 0x50, 0, 0, 0, 0x18]), Geometry { width: 80, height: 24 });
        assert_eq!(Geometry::parse(&[0, 0, 0, 0x84, 0, 0, 0, 0x2b, 1, 2]), Geometry { width: 132, height: 43 });
        assert_eq!(Geometry::parse(&[0, 0, 0]), Geometry::default());
    }

    #[test]
    fn control_is_shared_between_clones() {
        let control = TerminalControl::new();
        assert_eq!(control.prompt(), DEFAULT_PROMPT);
        let other = control.clone();
        other.set_size(Geometry { width: 100, height: 30 });
        other.set_prompt("");
        assert_eq!(control.geometry().width, 100);
        assert_eq!(control.prompt(), "");
    }

    #[tokio::test]
    async fn lines_are_echoed_and_crlf_is_one_terminator() {
        let (mut term, out) = terminal(b"ab\r\ncd\r");
        assert_eq!(term.read_line().await.unwrap(), "ab");
        assert_eq!(term.read_line().await.unwrap(), "cd");
        assert_eq!(out.text(), "ab\r\ncd\r\n");
    }

    #[tokio::test]
    async fn backspace_removes_whole_characters() {
        let (mut term, _) = terminal("abx\x7f\r\u{e9}\u{e9}\x08\r".as_bytes());
        assert_eq!(term.read_line().await.unwrap(), "ab");
        assert_eq!(term.read_line().await.unwrap(), "\u{e9}");
    }

    #[tokio::test]
    async fn ctrl_u_and_escape_sequences() {
        let (mut term, _) = terminal(b"junk\x15ok\x1b[Ago\r");
        assert_eq!(term.read_line().await.unwrap(), "okgo");
    }

    #[tokio::test]
    async fn password_reads_do_not_echo() {
        let (mut term, out) = terminal(b"secret\r");
        assert_eq!(term.read_password("Password: ").await.unwrap(), "secret");
        assert_eq!(out.text(), "Password: \r\n");
    }

    #[tokio::test]
    async fn end_of_input_is_a_disconnect() {
        let (mut term, _) = terminal(b"\x04");
        assert!(matches!(term.read_line().await, Err(TerminalError::Disconnected)));
        // queue sender dropped with the helper, so the next read also ends
        assert!(matches!(term.read_line().await, Err(TerminalError::Disconnected)));
    }

    #[tokio::test]
    async fn ctrl_c_interrupts() {
        let (mut term, _) = terminal(b"ab\x03");
        assert!(matches!(term.read_line().await, Err(TerminalError::Interrupted)));
    }

    #[tokio::test]
    async fn write_translates_newlines() {
        let (mut term, out) = terminal(b"");
        term.write("a\nb\r\n").await.unwrap();
        assert_eq!(out.text(), "a\r\nb\r\n");
    }
}
