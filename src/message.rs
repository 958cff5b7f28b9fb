//! Line framing and the chat message envelope.
//!
//! The wire format is newline-delimited plaintext. Clients prefix every
//! line after the first with their own name:
//!
//! ```text
//! alice: hello everyone
//! alice: /who
//! ```
//!
//! Inbound lines are parsed into an [`Envelope`] once, at the read
//! boundary. Formatting an envelope back into a line reproduces the
//! inbound text exactly, so relayed chat is byte-for-byte what the sender
//! typed.

use bytes::BytesMut;
use std::fmt;

/// Separator between the sender tag and the message body.
pub const SENDER_DELIMITER: &str = ": ";

/// A chat line split into its sender tag and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender tag as supplied by the client. `None` when the line had no
    /// delimiter at all.
    pub sender: Option<String>,
    /// Everything after the first delimiter, or the whole line.
    pub body: String,
}

impl Envelope {
    /// Split an inbound line on the first `": "`.
    ///
    /// A line without the delimiter is not an error: it becomes an
    /// envelope with no sender whose body is the entire line.
    pub fn parse(line: &str) -> Self {
        match line.split_once(SENDER_DELIMITER) {
            Some((sender, body)) => Envelope {
                sender: Some(sender.to_string()),
                body: body.to_string(),
            },
            None => Envelope {
                sender: None,
                body: line.to_string(),
            },
        }
    }

    /// Split an inbound line from a session registered as `name`.
    ///
    /// A line that starts with the session's own `name: ` tag is split
    /// right after it, even when the name itself contains the delimiter.
    /// Anything else falls back to [`Envelope::parse`].
    pub fn parse_from(line: &str, name: &str) -> Self {
        let own_tag = line
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(SENDER_DELIMITER));
        match own_tag {
            Some(body) => Envelope {
                sender: Some(name.to_string()),
                body: body.to_string(),
            },
            None => Envelope::parse(line),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Some(sender) => write!(f, "{sender}{SENDER_DELIMITER}{}", self.body),
            None => f.write_str(&self.body),
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`) from a raw line.
pub fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Decode a raw line read off the wire, replacing invalid UTF-8.
pub fn decode_line(raw: &[u8]) -> String {
    trim_line_ending(&String::from_utf8_lossy(raw)).to_string()
}

/// Encode a batch of lines into one newline-terminated buffer.
pub fn encode_lines<S: AsRef<str>>(lines: &[S]) -> BytesMut {
    let len: usize = lines.iter().map(|l| l.as_ref().len() + 1).sum();
    let mut buf = BytesMut::with_capacity(len);
    for line in lines {
        buf.extend_from_slice(line.as_ref().as_bytes());
        buf.extend_from_slice(b"\n");
    }
    buf
}
