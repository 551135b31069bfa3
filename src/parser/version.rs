//! Representation of the requested HTTP version

use std::fmt::Display;

/// The only version this engine accepts on the wire is `HTTP/1.1`. Still
/// modeled as an enum rather than a bare constant so `set_version` has
/// somewhere to report what it actually saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// The only variant the request-line parser will ever accept.
    Http11,
}

impl Version {
    /// Parses the version token, accepting only `HTTP/1.1`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HTTP/1.1")
    }
}
