//! Key-to-path-segment codec.
//!
//! Object keys may contain characters that some host filesystems refuse in
//! file names (Windows rejects `< > : " \ | ? *` and control characters).
//! [`KeyCodec`] maps a key onto a filesystem-safe form and back. The codec is
//! picked once when the store is built; path logic never checks the platform.
//!
//! Keys are encoded one `/`-separated segment at a time and the separator is
//! never escaped: the path resolver splits on it to build intermediate
//! directories. Every codec also escapes what the layout itself relies on:
//!
//! - `%` and `#`, so no encoded segment can contain the resource marker;
//! - the dot segments `.` and `..` (as `%2E` and `%2E%2E`);
//! - the empty segment, written as a lone `%`.
//!
//! A lone `%` is never produced for any other segment, so every mapping stays
//! reversible and any S3 key lands on a path inside its bucket.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Encoded form of an empty key segment (`a//b`, `dir/`).
pub const EMPTY_SEGMENT: &str = "%";

/// Characters escaped by every codec.
///
/// `%` is the escape marker itself and `#` starts the resource marker of the
/// on-disk layout.
const LAYOUT_RESERVED: &AsciiSet = &CONTROLS.add(b'%').add(b'#');

/// Characters escaped by [`KeyCodec::Escaped`].
const PORTABLE_RESERVED: &AsciiSet = &LAYOUT_RESERVED
    .add(b'<')
    .add(b'>')
    .add(b':')
    .add(b'"')
    .add(b'\\')
    .add(b'|')
    .add(b'?')
    .add(b'*');

/// Bidirectional mapping between object keys and path text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCodec {
    /// Keys are used verbatim apart from the escapes the layout needs
    /// (POSIX filesystems).
    Identity,
    /// Windows-reserved characters also become `%XX` (hex of the UTF-8
    /// byte).
    Escaped,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::native()
    }
}

impl KeyCodec {
    /// The codec required by the host platform.
    #[must_use]
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::Escaped
        } else {
            Self::Identity
        }
    }

    /// Return the canonical name used in configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Escaped => "escaped",
        }
    }

    fn reserved(self) -> &'static AsciiSet {
        match self {
            Self::Identity => LAYOUT_RESERVED,
            Self::Escaped => PORTABLE_RESERVED,
        }
    }

    /// Encode a full key into filesystem-safe text, segment by segment.
    ///
    /// The empty key encodes to the empty string; it addresses bucket-level
    /// resources.
    ///
    /// # Examples
    ///
    /// ```
    /// use ruststack_s3_fs::codec::KeyCodec;
    ///
    /// assert_eq!(KeyCodec::Escaped.encode("a:b/c?"), "a%3Ab/c%3F");
    /// assert_eq!(KeyCodec::Identity.encode("a:b/c?"), "a:b/c?");
    /// assert_eq!(KeyCodec::Identity.encode("a//../b"), "a/%/%2E%2E/b");
    /// ```
    #[must_use]
    pub fn encode<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if key.is_empty() {
            return Cow::Borrowed(key);
        }
        let segments: Vec<Cow<'_, str>> = key.split('/').map(|s| self.encode_segment(s)).collect();
        if segments.iter().zip(key.split('/')).all(|(e, raw)| e == raw) {
            Cow::Borrowed(key)
        } else {
            Cow::Owned(segments.join("/"))
        }
    }

    /// Encode one key segment (text between two `/`) into a file or
    /// directory name.
    #[must_use]
    pub fn encode_segment<'a>(&self, segment: &'a str) -> Cow<'a, str> {
        match segment {
            "" => Cow::Borrowed(EMPTY_SEGMENT),
            "." => Cow::Borrowed("%2E"),
            ".." => Cow::Borrowed("%2E%2E"),
            _ => utf8_percent_encode(segment, self.reserved()).into(),
        }
    }

    /// Decode a full encoded key back into the key it was produced from.
    ///
    /// Returns `None` when any segment fails [`KeyCodec::decode_segment`].
    #[must_use]
    pub fn decode<'a>(&self, encoded: &'a str) -> Option<Cow<'a, str>> {
        if encoded.is_empty() {
            return Some(Cow::Borrowed(encoded));
        }
        let segments = encoded
            .split('/')
            .map(|s| self.decode_segment(s))
            .collect::<Option<Vec<_>>>()?;
        if segments.iter().zip(encoded.split('/')).all(|(d, raw)| d == raw) {
            Some(Cow::Borrowed(encoded))
        } else {
            Some(Cow::Owned(segments.join("/")))
        }
    }

    /// Decode one file or directory name back into the key segment it was
    /// produced from.
    ///
    /// Returns `None` when the text is not something
    /// [`KeyCodec::encode_segment`] could have produced (escapes decoding to
    /// invalid UTF-8). Callers treat such entries as foreign files.
    #[must_use]
    pub fn decode_segment<'a>(&self, name: &'a str) -> Option<Cow<'a, str>> {
        if name == EMPTY_SEGMENT {
            return Some(Cow::Borrowed(""));
        }
        percent_decode_str(name).decode_utf8().ok()
    }
}

impl fmt::Display for KeyCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`KeyCodec`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown key codec: {0}")]
pub struct ParseKeyCodecError(String);

impl FromStr for KeyCodec {
    type Err = ParseKeyCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "escaped" => Ok(Self::Escaped),
            _ => Err(ParseKeyCodecError(s.to_owned())),
        }
    }
}
