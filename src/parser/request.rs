//! The main request/header/body state machine.
//!
//! A [`Request`] holds only index ranges into the connection's read buffer,
//! never owned strings or borrowed slices — the buffer is shared with the
//! reactor thread between calls, so nothing here can hold a real Rust
//! lifetime across a `process()` invocation. Offsets, not owned strings or
//! borrows, are the only representation that survives a hand-off between
//! threads this way.

use std::ops::Range;

use super::line_scanner::{scan_line, LineStatus};
use super::{Method, ParseError, Version};

/// Which part of the request the main state machine is currently expecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Expecting `METHOD TARGET VERSION\r\n`.
    RequestLine,
    /// Expecting header lines, terminated by an empty line.
    Header,
    /// Expecting `declared_content_length` more body bytes. Not line-oriented.
    Body,
}

impl Default for ParserState {
    fn default() -> Self {
        Self::RequestLine
    }
}

/// Result of driving the state machine with whatever bytes are currently
/// buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More bytes are required before the request can be classified.
    NeedMore,
    /// The request (headers, and body if any) is fully buffered. `body` is
    /// the (possibly empty) range of body bytes within the read buffer.
    Complete {
        /// Byte range of the request body within the connection's read buffer.
        body: Range<usize>,
    },
}

/// Parsed request state, resumable across multiple `advance` calls as more
/// bytes arrive on the socket.
#[derive(Debug, Default)]
pub struct Request {
    /// Current main-state-machine state.
    pub state: ParserState,
    /// Parsed method, set once the request line completes.
    pub method: Option<Method>,
    /// Parsed version, set once the request line completes.
    pub version: Option<Version>,
    /// Target path range, excluding any query string.
    pub target: Range<usize>,
    /// Query string range, present for POST or GET-with-`?`.
    pub query: Option<Range<usize>>,
    /// `Host` header value range, if present.
    pub host: Option<Range<usize>>,
    /// `Content-Length` value. `None` means the header was absent entirely,
    /// tracked explicitly rather than folded into a sentinel value.
    pub content_length: Option<u64>,
    /// Set by `Connection: keep-alive`.
    pub keep_alive: bool,
    /// True for POST, or GET with a non-empty-or-empty `?` query string.
    pub cgi: bool,
}

impl Request {
    /// Resets all parsed state, as `init` does at the start of each request.
    pub fn reset(&mut self) {
        *self = Request::default();
    }

    /// Drives the state machine forward using `buf[0..read_idx]`, resuming
    /// from `*checked`/`*start_of_line` and rewriting `\r\n` to NULs in place
    /// as lines are recognized.
    pub fn advance(
        &mut self,
        buf: &mut [u8],
        read_idx: usize,
        checked: &mut usize,
        start_of_line: &mut usize,
    ) -> Result<ParseOutcome, ParseError> {
        loop {
            if self.state == ParserState::Body {
                let needed = self.content_length.unwrap_or(0) as usize;
                if read_idx >= *checked + needed {
                    let body = *checked..(*checked + needed);
                    *checked += needed;
                    return Ok(ParseOutcome::Complete { body });
                }
                return Ok(ParseOutcome::NeedMore);
            }

            match scan_line(buf, checked, read_idx) {
                LineStatus::Open => return Ok(ParseOutcome::NeedMore),
                LineStatus::Bad => return Err(ParseError::BadLineTerminator),
                LineStatus::Ok => {
                    let line = *start_of_line..(*checked - 2);
                    *start_of_line = *checked;

                    match self.state {
                        ParserState::RequestLine => {
                            self.parse_request_line(buf, line)?;
                            self.state = ParserState::Header;
                        }
                        ParserState::Header => {
                            if line.is_empty() {
                                if self.content_length.unwrap_or(0) > 0 {
                                    self.state = ParserState::Body;
                                } else {
                                    return Ok(ParseOutcome::Complete {
                                        body: *checked..*checked,
                                    });
                                }
                            } else {
                                self.parse_header_line(buf, line);
                            }
                        }
                        ParserState::Body => unreachable!("handled above"),
                    }
                }
            }
        }
    }

    fn parse_request_line(
        &mut self,
        buf: &[u8],
        line: Range<usize>,
    ) -> Result<(), ParseError> {
        let text = &buf[line.clone()];
        let sp1 = find(text, b' ').ok_or(ParseError::RequestLine)?;
        let method = Method::from_bytes(&text[..sp1]).ok_or(ParseError::Method)?;

        let rest = &text[sp1 + 1..];
        let sp2 = find(rest, b' ').ok_or(ParseError::RequestLine)?;
        let target = &rest[..sp2];
        let version_bytes = &rest[sp2 + 1..];

        let version = Version::from_bytes(version_bytes).ok_or(ParseError::Version)?;

        if target.first() != Some(&b'/') {
            return Err(ParseError::Target);
        }

        let target_abs_start = line.start + sp1 + 1;
        let target_abs_end = target_abs_start + sp2;

        self.cgi = method == Method::Post;

        if method == Method::Get {
            if let Some(q) = find(target, b'?') {
                self.target = target_abs_start..(target_abs_start + q);
                self.query = Some((target_abs_start + q + 1)..target_abs_end);
                self.cgi = true;
            } else {
                self.target = target_abs_start..target_abs_end;
                self.query = None;
            }
        } else {
            self.target = target_abs_start..target_abs_end;
            self.query = None;
        }

        self.method = Some(method);
        self.version = Some(version);
        Ok(())
    }

    fn parse_header_line(&mut self, buf: &[u8], line: Range<usize>) {
        let text = &buf[line.clone()];

        if let Some(value) = strip_prefix_ci(text, b"Connection:") {
            let (vs, ve) = trim_ows(line.start + (text.len() - value.len()), value);
            if eq_ci(&buf[vs..ve], b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = strip_prefix_ci(text, b"Content-Length:") {
            let (vs, ve) = trim_ows(line.start + (text.len() - value.len()), value);
            self.content_length = Some(parse_u64_lenient(&buf[vs..ve]));
        } else if let Some(value) = strip_prefix_ci(text, b"Host:") {
            let (vs, ve) = trim_ows(line.start + (text.len() - value.len()), value);
            self.host = Some(vs..ve);
        }
        // Unknown headers are logged by the caller (which has access to the
        // connection's token for context) and otherwise ignored.
    }
}

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn eq_ci(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Returns the remainder of `text` after `prefix`, if `text` starts with
/// `prefix` case-insensitively.
fn strip_prefix_ci<'a>(text: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if text.len() < prefix.len() {
        return None;
    }
    if text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Trims leading/trailing space and tab (RFC 9110 OWS) from `value`, which
/// starts at absolute offset `abs_start` in the owning buffer. Returns the
/// trimmed range as absolute offsets.
fn trim_ows(abs_start: usize, value: &[u8]) -> (usize, usize) {
    let leading = value.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
    let trailing = value
        .iter()
        .rev()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    let end = value.len().saturating_sub(trailing).max(leading);
    (abs_start + leading, abs_start + end)
}

/// Parses a decimal non-negative integer leniently: stops at the first
/// non-digit and returns 0 for an empty/non-numeric prefix, matching the
/// original's use of `atol`.
fn parse_u64_lenient(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, &b| {
            acc.saturating_mul(10).saturating_add((b - b'0') as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_all(req: &mut Request, buf: &mut [u8]) -> Result<ParseOutcome, ParseError> {
        let mut checked = 0;
        let mut start = 0;
        req.advance(buf, buf.len(), &mut checked, &mut start)
    }

    #[test]
    fn parses_simple_get() {
        let mut buf = b"GET /hello.html HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
        let mut req = Request::default();
        let outcome = advance_all(&mut req, &mut buf).unwrap();
        assert_eq!(outcome, ParseOutcome::Complete { body: 38..38 });
        assert_eq!(req.method, Some(Method::Get));
        assert_eq!(&buf[req.target.clone()], b"/hello.html");
        assert!(!req.cgi);
    }

    #[test]
    fn get_with_empty_query_string_triggers_cgi() {
        let mut buf = b"GET /a.cgi? HTTP/1.1\r\n\r\n".to_vec();
        let mut req = Request::default();
        advance_all(&mut req, &mut buf).unwrap();
        assert!(req.cgi);
        assert_eq!(req.query, Some(11..11));
    }

    #[test]
    fn post_sets_cgi_and_parses_content_length() {
        let mut buf = b"POST /echo.cgi HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let mut req = Request::default();
        let outcome = advance_all(&mut req, &mut buf).unwrap();
        assert!(req.cgi);
        assert_eq!(req.content_length, Some(5));
        match outcome {
            ParseOutcome::Complete { body } => assert_eq!(&buf[body], b"hello"),
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut buf = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        let mut req = Request::default();
        assert_eq!(advance_all(&mut req, &mut buf), Err(ParseError::Version));
    }

    #[test]
    fn rejects_target_without_leading_slash() {
        let mut buf = b"GET index.html HTTP/1.1\r\n\r\n".to_vec();
        let mut req = Request::default();
        assert_eq!(advance_all(&mut req, &mut buf), Err(ParseError::Target));
    }

    #[test]
    fn keep_alive_header_sets_flag() {
        let mut buf = b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n".to_vec();
        let mut req = Request::default();
        advance_all(&mut req, &mut buf).unwrap();
        assert!(req.keep_alive);
    }

    #[test]
    fn needs_more_when_headers_incomplete() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: h\r\n".to_vec();
        let mut req = Request::default();
        let outcome = advance_all(&mut req, &mut buf).unwrap();
        assert_eq!(outcome, ParseOutcome::NeedMore);
    }
}
