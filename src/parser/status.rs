//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// The status codes this engine can produce.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1 — static file or CGI success.
    Ok = 200,
    /// 15.5.1 — malformed request line/headers/version, or a directory target.
    BadRequest = 400,
    /// 15.5.4 — target exists but lacks the world-readable bit.
    Forbidden = 403,
    /// 15.5.5 — `stat` failed on the resolved path.
    NotFound = 404,
    /// 15.6.1 — CGI fork/pipe failure.
    InternalError = 500,
}

impl Status {
    /// The reason phrase that follows the status code on the status line.
    pub fn title(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::InternalError => "Internal Error",
        }
    }

    /// The literal inline body emitted for non-200 responses. `Ok` has no
    /// canned body — its body is always the mapped file.
    pub fn body(self) -> &'static str {
        match self {
            Self::Ok => "",
            Self::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            Self::Forbidden => "You do not have permission to get file from this server.\n",
            Self::NotFound => "The requested file was not found on this server.\n",
            Self::InternalError => "There was an unusual problem serving the requested file.\n",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", *self as u16))
    }
}
