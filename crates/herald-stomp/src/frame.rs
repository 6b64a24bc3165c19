//! Structured frames and their text encoding.

use std::borrow::Cow;
use std::fmt;

use tracing::trace;

use crate::escape::{escape, unescape};

/// Frame command.
///
/// Commands are matched case-insensitively on input and always written in
/// upper case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (STOMP 1.2 spelling).
    Stomp,
    /// Client subscribes to a destination.
    Subscribe,
    /// Client drops a subscription.
    Unsubscribe,
    /// Client ends the session.
    Disconnect,
    /// Server handshake acknowledgment.
    Connected,
    /// Server delivers a payload.
    Message,
    /// Server acknowledges a `receipt` header.
    Receipt,
    /// Server reports a problem.
    Error,
    /// Any command the relay does not know.
    Other(String),
}

impl Command {
    /// Map a wire command to its variant.
    pub fn from_wire(command: &str) -> Self {
        const KNOWN: [(&str, Command); 9] = [
            ("CONNECT", Command::Connect),
            ("STOMP", Command::Stomp),
            ("SUBSCRIBE", Command::Subscribe),
            ("UNSUBSCRIBE", Command::Unsubscribe),
            ("DISCONNECT", Command::Disconnect),
            ("CONNECTED", Command::Connected),
            ("MESSAGE", Command::Message),
            ("RECEIPT", Command::Receipt),
            ("ERROR", Command::Error),
        ];
        KNOWN
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(command))
            .map_or_else(|| Command::Other(command.to_owned()), |(_, cmd)| cmd)
    }

    /// Wire spelling of the command.
    pub fn as_str(&self) -> &str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Other(name) => name,
        }
    }

    /// Whether this is one of the two handshake commands.
    ///
    /// Handshake frames carry their header values unescaped.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Command::Connect | Command::Stomp)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup.
///
/// Inserting a key that already exists (in any case) replaces the earlier
/// value in place, so later duplicates win.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header value, ignoring key case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present, ignoring key case.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a header, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.0.push((key, value));
        None
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One protocol unit: command, headers and an optional body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// The frame command.
    pub command: Command,
    /// Frame headers.
    pub headers: Headers,
    /// Frame body (empty when absent).
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and no body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Builder-style header setter.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key, value);
        self
    }

    /// Builder-style body setter.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Shorthand for `self.headers.get(key)`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Parse one frame from its text, without the NUL terminator.
    ///
    /// Line endings are normalised to LF, the header block is split from
    /// the body on the first blank line, and the first non-empty line is
    /// the command. Header lines without a colon, or with the colon in
    /// first position, are skipped. Keys and values are taken verbatim,
    /// then unescaped except on handshake frames. A `content-length` that
    /// fits the body bounds it. Returns `None` when there is no command.
    pub fn parse(raw: &str) -> Option<Frame> {
        let normalized: Cow<'_, str> = if raw.contains('\r') {
            Cow::Owned(raw.replace("\r\n", "\n"))
        } else {
            Cow::Borrowed(raw)
        };
        let text = normalized
            .strip_suffix('\0')
            .unwrap_or(&normalized)
            .trim_start_matches('\n');

        let (head, body) = text.split_once("\n\n").unwrap_or((text, ""));
        let mut lines = head.lines();
        let command = lines.by_ref().map(str::trim).find(|l| !l.is_empty())?;
        let command = Command::from_wire(command);

        let mut headers = Headers::new();
        for line in lines {
            let Some((key, value)) = line.split_once(':') else {
                if !line.trim().is_empty() {
                    trace!(line, "skipping header line without colon");
                }
                continue;
            };
            if key.is_empty() {
                trace!(line, "skipping header line with empty key");
                continue;
            }
            if command.is_handshake() {
                let _ = headers.insert(key, value);
            } else {
                let _ = headers.insert(unescape(key), unescape(value));
            }
        }

        let body = headers
            .get("content-length")
            .and_then(|len| len.parse::<usize>().ok())
            .filter(|&len| len <= body.len() && body.is_char_boundary(len))
            .map_or(body, |len| &body[..len]);

        Some(Frame {
            command,
            headers,
            body: body.to_owned(),
        })
    }

    /// Encode the frame for the wire, including the NUL terminator.
    ///
    /// Header keys and values are escaped. A `content-length` header is
    /// added when the body is non-empty and the caller did not set one.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in self.headers.iter() {
            out.push_str(&escape(key));
            out.push(':');
            out.push_str(&escape(value));
            out.push('\n');
        }
        if !self.body.is_empty() && !self.headers.contains("content-length") {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}
