//! Message framing
//!
//! Turns the byte stream of a session into discrete text messages. Where one
//! message ends is an explicit wire contract chosen by `Framing`; reads are
//! never assumed to line up with the peer's writes unless `ReadBoundary` is
//! selected on purpose.

use crate::ops::SessionOps;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

/// Reference read buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Largest message accepted by default
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Length prefix size for `Framing::LengthPrefixed`
const LENGTH_PREFIX: usize = 4;

/// Where one message ends
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Framing {
    /// Newline terminated; a trailing `\r` is stripped. An unterminated
    /// message is only delivered once the peer closes the stream.
    #[default]
    Line,
    /// Terminated by an arbitrary byte string, e.g. `<EOF>`
    Terminator { terminator: String },
    /// 4-byte big-endian length followed by the payload
    LengthPrefixed,
    /// One message per successful read
    ReadBoundary,
    /// Everything up to end of stream is a single message
    UntilClose,
}

impl Framing {
    /// Parse the CLI spelling: `line`, `length_prefixed`, `read_boundary`,
    /// `until_close` or `terminator:<bytes>`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Framing::Line),
            "length_prefixed" => Some(Framing::LengthPrefixed),
            "read_boundary" => Some(Framing::ReadBoundary),
            "until_close" => Some(Framing::UntilClose),
            _ => s
                .strip_prefix("terminator:")
                .filter(|t| !t.is_empty())
                .map(|t| Framing::Terminator { terminator: t.to_string() }),
        }
    }

    fn delimiter(&self) -> Option<&[u8]> {
        match self {
            Framing::Line => Some(b"\n"),
            Framing::Terminator { terminator } => Some(terminator.as_bytes()),
            _ => None,
        }
    }
}

/// One decoded application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Message { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Case-insensitive match of the trimmed text against a command word
    pub fn is_command(&self, command: &str) -> bool {
        self.text.trim().to_uppercase() == command.trim().to_uppercase()
    }
}

/// Streaming UTF-8 decoder
///
/// Holds back an incomplete multi-byte sequence at the end of a chunk until
/// the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
    consumed: usize,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, appending complete characters to `out`
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) -> Result<()> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        match std::str::from_utf8(&bytes) {
            Ok(s) => {
                out.push_str(s);
                self.consumed += bytes.len();
                Ok(())
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(prefix) = std::str::from_utf8(&bytes[..valid]) {
                    out.push_str(prefix);
                }
                self.consumed += valid;

                match e.error_len() {
                    None => {
                        self.pending = bytes[valid..].to_vec();
                        Ok(())
                    }
                    Some(_) => Err(Error::Decode(format!(
                        "invalid UTF-8 sequence at byte {}",
                        self.consumed
                    ))),
                }
            }
        }
    }

    /// Fail if the stream ended inside a multi-byte sequence
    pub fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            self.pending.clear();
            Err(Error::Decode(format!(
                "truncated UTF-8 sequence at byte {}",
                self.consumed
            )))
        }
    }
}

/// Reads messages from a session
pub struct MessageFramer {
    framing: Framing,
    max_message_len: usize,
    chunk: Vec<u8>,
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for the delimiter
    scanned: usize,
    decoder: Utf8Decoder,
    eof: bool,
}

impl MessageFramer {
    /// Create a framer; `buffer_size` is clamped to at least one byte
    pub fn new(framing: Framing, buffer_size: usize, max_message_len: usize) -> Self {
        MessageFramer {
            framing,
            max_message_len,
            chunk: vec![0u8; buffer_size.max(1)],
            buffer: BytesMut::with_capacity(buffer_size.max(1)),
            scanned: 0,
            decoder: Utf8Decoder::new(),
            eof: false,
        }
    }

    /// Read the next message. `Ok(None)` means the peer closed the stream.
    pub fn next_message<O: SessionOps>(&mut self, session: &mut O) -> Result<Option<Message>> {
        match self.framing {
            Framing::Line | Framing::Terminator { .. } => self.next_delimited(session),
            Framing::LengthPrefixed => self.next_length_prefixed(session),
            Framing::ReadBoundary => self.next_read_boundary(session),
            Framing::UntilClose => self.next_until_close(session),
        }
    }

    /// Read one chunk into `buffer`; returns false at end of stream
    fn fill<O: SessionOps>(&mut self, session: &mut O) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = session.read(&mut self.chunk)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.buffer.extend_from_slice(&self.chunk[..n]);
        Ok(true)
    }

    fn next_delimited<O: SessionOps>(&mut self, session: &mut O) -> Result<Option<Message>> {
        let delimiter = match self.framing.delimiter() {
            Some(d) if !d.is_empty() => d.to_vec(),
            _ => return Err(Error::Protocol("empty message delimiter".to_string())),
        };

        loop {
            let start = self.scanned.saturating_sub(delimiter.len() - 1);
            if let Some(pos) = find(&self.buffer[start..], &delimiter) {
                let end = start + pos;
                let frame = self.buffer.split_to(end);
                self.buffer.advance(delimiter.len());
                self.scanned = 0;

                let mut message = decode_frame(&frame)?;
                if self.framing == Framing::Line && message.text.ends_with('\r') {
                    message.text.pop();
                }
                return Ok(Some(message));
            }
            self.scanned = self.buffer.len();

            if self.buffer.len() > self.max_message_len {
                return Err(Error::MessageTooLarge { limit: self.max_message_len });
            }

            if !self.fill(session)? {
                return self.take_remainder();
            }
        }
    }

    fn next_length_prefixed<O: SessionOps>(
        &mut self,
        session: &mut O,
    ) -> Result<Option<Message>> {
        loop {
            if self.buffer.len() >= LENGTH_PREFIX {
                let len = u32::from_be_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]) as usize;
                if len > self.max_message_len {
                    return Err(Error::MessageTooLarge { limit: self.max_message_len });
                }
                if self.buffer.len() >= LENGTH_PREFIX + len {
                    self.buffer.advance(LENGTH_PREFIX);
                    let frame = self.buffer.split_to(len);
                    return decode_frame(&frame).map(Some);
                }
            }

            if !self.fill(session)? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let buffered = self.buffer.len();
                self.buffer.clear();
                return Err(Error::Protocol(format!(
                    "stream ended inside a length-prefixed frame ({} bytes buffered)",
                    buffered
                )));
            }
        }
    }

    fn next_read_boundary<O: SessionOps>(&mut self, session: &mut O) -> Result<Option<Message>> {
        loop {
            if self.eof {
                return Ok(None);
            }
            let n = session.read(&mut self.chunk)?;
            if n == 0 {
                self.eof = true;
                self.decoder.finish()?;
                return Ok(None);
            }

            let mut text = String::new();
            self.decoder.decode(&self.chunk[..n], &mut text)?;
            // A chunk holding only the start of a character yields nothing yet
            if !text.is_empty() {
                return Ok(Some(Message { text }));
            }
        }
    }

    fn next_until_close<O: SessionOps>(&mut self, session: &mut O) -> Result<Option<Message>> {
        if self.eof {
            return Ok(None);
        }

        let mut text = String::new();
        loop {
            let n = session.read(&mut self.chunk)?;
            if n == 0 {
                self.eof = true;
                self.decoder.finish()?;
                break;
            }
            self.decoder.decode(&self.chunk[..n], &mut text)?;
            if text.len() > self.max_message_len {
                return Err(Error::MessageTooLarge { limit: self.max_message_len });
            }
        }

        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Message { text }))
        }
    }

    /// Unterminated bytes at end of stream form a final message
    fn take_remainder(&mut self) -> Result<Option<Message>> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let frame = self.buffer.split();
        decode_frame(&frame).map(Some)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|&b| b == needle[0]);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_frame(frame: &[u8]) -> Result<Message> {
    let mut decoder = Utf8Decoder::new();
    let mut text = String::with_capacity(frame.len());
    decoder.decode(frame, &mut text)?;
    decoder.finish()?;
    Ok(Message { text })
}
