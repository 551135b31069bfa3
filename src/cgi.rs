//! CGI dispatch.
//!
//! Triggered for POST, or GET with a (possibly empty) query string. Runs
//! synchronously on the worker thread that owns the connection: a worker
//! executing CGI blocks for the lifetime of the child process rather than
//! handing it off to a dedicated executor, a known bottleneck that is
//! deliberately preserved rather than hardened.
//!
//! `std::process::Command` with piped stdio stands in for a fork, pipe
//! setup, and exec of the resolved path.

use std::io::{self, ErrorKind, Read, Write};
use std::ops::Range;
use std::process::{Command, Stdio};

use crate::connection::Connection;
use crate::parser::{Method, Status};

/// Runs the CGI script for the request currently buffered in `conn`,
/// forwarding its stdout to the socket. Writes directly to the socket,
/// bypassing the ordinary `process_write`/`drain_write` response pipeline
/// entirely.
pub fn run(conn: &mut Connection, body: Range<usize>) {
    let method = conn.request().method.expect("cgi request has a method");

    if method == Method::Post && conn.request().content_length.is_none() {
        write_status_only(conn, Status::BadRequest);
        return;
    }

    let path = conn.cgi_path();

    let query = conn
        .request()
        .query
        .clone()
        .map(|r| String::from_utf8_lossy(&conn.read_buf()[r]).into_owned());
    let content_length = conn.request().content_length;

    let mut command = Command::new(&path);
    command.stdin(Stdio::piped()).stdout(Stdio::piped());
    command.env("REQUEST_METHOD", method.to_string());
    if let Some(query) = &query {
        command.env("QUERY_STRING", query);
    }
    if let Some(len) = content_length {
        command.env("CONTENT_LENGTH", len.to_string());
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cgi spawn failed");
            write_status_only(conn, Status::InternalError);
            return;
        }
    };

    if method == Method::Post {
        if let Some(mut stdin) = child.stdin.take() {
            let body_bytes = conn.read_buf()[body].to_vec();
            if let Err(e) = stdin.write_all(&body_bytes) {
                tracing::warn!(error = %e, "cgi stdin write failed");
            }
        }
    } else {
        drop(child.stdin.take());
    }

    if let Err(e) = blocking_write_all(conn, b"HTTP/1.0 200 OK\r\n") {
        tracing::warn!(error = %e, "cgi prelude write failed");
        let _ = child.wait();
        return;
    }

    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if blocking_write_all(conn, &buf[..n]).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    let _ = child.wait();
}

/// Builds and sends only a status head (no file body) for the CGI guard
/// failures — there is no mapped file to attach in this path.
fn write_status_only(conn: &mut Connection, status: Status) {
    let mut head_buf = [0u8; 256];
    let body = status.body();
    if let Ok(len) = crate::parser::response::build_response_head(
        &mut head_buf,
        status,
        body.len() as u64,
        false,
    ) {
        let _ = blocking_write_all(conn, &head_buf[..len]);
    }
}

/// Writes `bytes` to the connection's (non-blocking) socket, spinning past
/// `WouldBlock` rather than returning early. Acceptable only because CGI
/// dispatch is already a deliberately blocking path.
fn blocking_write_all(conn: &mut Connection, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        let socket = match conn.socket_mut() {
            Some(socket) => socket,
            None => return Err(io::Error::from(ErrorKind::NotConnected)),
        };
        match socket.write(bytes) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::yield_now();
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
