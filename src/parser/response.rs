//! Response head construction.
//!
//! The wire format:
//!
//! ```text
//! HTTP/1.1 <code> <reason>\r\n
//! Content-Length: <N>\r\n
//! Content-Type:text/html\r\n
//! Connection: <keep-alive|close>\r\n
//! \r\n
//! <body>
//! ```
//!
//! Note the deliberate absence of a space after `Content-Type:`.

use super::status::Status;

/// Builds a response head (and, for non-200 codes, its inline body) into
/// `write_buf`, returning the number of bytes written.
///
/// Returns `Err(())` if the head would overflow `write_buf` — the caller
/// treats that as a reason to close the connection rather than send a
/// truncated response.
pub fn build_response_head(
    write_buf: &mut [u8],
    status: Status,
    content_length: u64,
    keep_alive: bool,
) -> Result<usize, ()> {
    let body = if status == Status::Ok {
        ""
    } else {
        status.body()
    };

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type:text/html\r\nConnection: {}\r\n\r\n{}",
        status as u16,
        status.title(),
        content_length,
        if keep_alive { "keep-alive" } else { "close" },
        body,
    );

    if head.len() > write_buf.len() {
        return Err(());
    }

    write_buf[..head.len()].copy_from_slice(head.as_bytes());
    Ok(head.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_200_head_with_no_inline_body() {
        let mut buf = [0u8; 1024];
        let len = build_response_head(&mut buf, Status::Ok, 3, false).unwrap();
        assert_eq!(
            &buf[..len],
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Type:text/html\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn builds_404_with_inline_body() {
        let mut buf = [0u8; 1024];
        let body = Status::NotFound.body();
        let len =
            build_response_head(&mut buf, Status::NotFound, body.len() as u64, false).unwrap();
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("The requested file was not found on this server.\n"));
    }

    #[test]
    fn overflowing_head_fails_closed() {
        let mut buf = [0u8; 16];
        assert!(build_response_head(&mut buf, Status::Ok, 3, true).is_err());
    }
}
