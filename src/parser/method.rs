//! Representation of HTTP method
use std::fmt::Display;

/// Methods this engine understands. Any other token is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Static file fetch, or CGI dispatch when the target carries a query string.
    Get,
    /// Always CGI dispatch.
    Post,
}

impl Method {
    /// Parses a method token, rejecting anything but `GET`/`POST`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            _ => None,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}
