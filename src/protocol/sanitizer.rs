//! # Line Sanitizer
//!
//! Turns the raw console byte stream into clean logical lines.
//!
//! The MESC console decorates its output for an interactive terminal: colour
//! escapes, cursor movement, carriage returns and leftover prompt fragments.
//! The sanitizer removes all of that and only ever emits complete lines, so
//! an escape sequence or a UTF-8 character split across two reads is handled
//! by carrying state between calls.
//!
//! It has no protocol knowledge. Deciding whether a line is an echo, a banner
//! or data is left to the snapshot and stream parsers.

use bytes::BytesMut;
use tokio::time::Instant;
use tracing::debug;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

/// One sanitized logical line
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    /// Line text without terminator, escapes or surrounding whitespace
    pub text: String,
    /// Monotonic time the terminator was seen
    pub arrived_at: Instant,
}

impl RawLine {
    pub fn new(text: impl Into<String>, arrived_at: Instant) -> Self {
        Self {
            text: text.into(),
            arrived_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Ground,
    /// After ESC
    Escape,
    /// Inside `ESC [` ... final byte
    Csi,
    /// Inside `ESC ]` ... BEL or ST
    Osc,
}

/// Incremental line sanitizer
#[derive(Debug)]
pub struct LineSanitizer {
    pending: BytesMut,
    state: EscapeState,
    max_line_length: usize,
    overflowed: bool,
    overflowed_lines: u64,
}

impl LineSanitizer {
    /// Create a sanitizer that drops lines longer than `max_line_length` bytes
    pub fn new(max_line_length: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(256),
            state: EscapeState::Ground,
            max_line_length,
            overflowed: false,
            overflowed_lines: 0,
        }
    }

    /// Feed raw transport bytes, returning every line they complete
    ///
    /// Bytes after the last terminator stay buffered until a later call.
    ///
    /// # Examples
    ///
    /// ```
    /// use mesc_capture::protocol::LineSanitizer;
    /// use tokio::time::Instant;
    ///
    /// let mut sanitizer = LineSanitizer::new(4096);
    /// let now = Instant::now();
    ///
    /// assert!(sanitizer.feed(b"\x1b[32mIa, Ib", now).is_empty());
    /// let lines = sanitizer.feed(b", Ic\x1b[0m\r\n", now);
    /// assert_eq!(lines[0].text, "Ia, Ib, Ic");
    /// ```
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<RawLine> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                // A terminator always ends the line, even inside a broken escape
                self.state = EscapeState::Ground;
                if let Some(line) = self.finish_line(now) {
                    lines.push(line);
                }
                continue;
            }

            match self.state {
                EscapeState::Ground => match byte {
                    ESC => self.state = EscapeState::Escape,
                    b'\r' => {}
                    b'\t' => self.push_byte(byte),
                    b if b < 0x20 || b == 0x7F => {}
                    b => self.push_byte(b),
                },
                EscapeState::Escape => {
                    self.state = match byte {
                        b'[' => EscapeState::Csi,
                        b']' => EscapeState::Osc,
                        _ => EscapeState::Ground,
                    };
                }
                EscapeState::Csi => {
                    // Parameter and intermediate bytes are 0x20..=0x3F, the final byte ends it
                    if (0x40..=0x7E).contains(&byte) {
                        self.state = EscapeState::Ground;
                    }
                }
                EscapeState::Osc => match byte {
                    BEL => self.state = EscapeState::Ground,
                    ESC => self.state = EscapeState::Escape,
                    _ => {}
                },
            }
        }

        lines
    }

    /// Number of lines dropped for exceeding the length limit
    pub fn overflowed_lines(&self) -> u64 {
        self.overflowed_lines
    }

    /// Discard any partial line and escape state
    pub fn reset(&mut self) {
        self.pending.clear();
        self.state = EscapeState::Ground;
        self.overflowed = false;
    }

    fn push_byte(&mut self, byte: u8) {
        if self.pending.len() >= self.max_line_length {
            self.overflowed = true;
            return;
        }
        self.pending.extend_from_slice(&[byte]);
    }

    fn finish_line(&mut self, now: Instant) -> Option<RawLine> {
        let raw = self.pending.split();

        if self.overflowed {
            self.overflowed = false;
            self.overflowed_lines += 1;
            debug!("Dropped over-long console line ({} bytes kept)", raw.len());
            return None;
        }

        let text = String::from_utf8_lossy(&raw);
        clean_text(&text).map(|text| RawLine::new(text, now))
    }
}

/// Clean a single, already delimited line
///
/// Removes CSI escapes, carriage returns and `[<digits>`` ` cursor
/// fragments, then trims. Returns `None` if nothing is left.
///
/// # Examples
///
/// ```
/// use mesc_capture::protocol::sanitizer::sanitize_line;
///
/// assert_eq!(sanitize_line("\x1b[1;33m0.1, 0.2\r").as_deref(), Some("0.1, 0.2"));
/// assert_eq!(sanitize_line("[12`0.5, 0.6").as_deref(), Some("0.5, 0.6"));
/// assert_eq!(sanitize_line("\x1b[2K\r"), None);
/// ```
pub fn sanitize_line(line: &str) -> Option<String> {
    let mut sanitizer = LineSanitizer::new(usize::MAX);
    let stripped = sanitizer.feed(line.as_bytes(), Instant::now());
    if !stripped.is_empty() {
        // Embedded terminators: keep the first non-empty piece only
        return stripped.into_iter().next().map(|l| l.text);
    }
    sanitizer.feed(b"\n", Instant::now()).pop().map(|l| l.text)
}

/// Remove `[<digits>`` ` fragments left behind by the console's cursor handling
fn strip_prompt_artifacts(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied_to = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            let digits_start = i + 1;
            let mut j = digits_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > digits_start && j < bytes.len() && bytes[j] == b'`' {
                out.push_str(&text[copied_to..i]);
                i = j + 1;
                copied_to = i;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[copied_to..]);
    out
}

fn clean_text(text: &str) -> Option<String> {
    let cleaned = strip_prompt_artifacts(text);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
