//! Header value escaping.
//!
//! Outbound header values replace `\` with `\\`, LF with `\n`, CR with
//! `\r` and `:` with `\c`. The backslash is handled first so the escape
//! sequences introduced for the other characters are not doubled.

use std::borrow::Cow;

/// Escape a header key or value for the wire.
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '\n', '\r', ':']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape`].
///
/// Unknown sequences such as `\t` are kept verbatim, as is a trailing lone
/// backslash.
pub fn unescape(value: &str) -> Cow<'_, str> {
    if !value.contains('\\') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}
