//! The per-connection HTTP request/response state machine.
//!
//! A `Connection` is shared between the reactor thread and whichever worker
//! currently owns it, wrapped in a mutex inside `descriptor_table::Entry`.
//! One-shot edge-triggered re-arming is the only thing preventing two
//! workers from touching the same connection at once; nothing here takes a
//! second lock or spawns further threads.

use std::io::{self, ErrorKind, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use mio::net::TcpStream;
use mio::{Interest as MioInterest, Registry, Token};

use crate::config::Config;
use crate::parser::{self, ParseError, ParseOutcome, Request, Status};

/// Readiness interest the reactor should re-arm a connection for after a
/// worker (or the reactor itself) finishes touching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn as_mio(self) -> MioInterest {
        match self {
            Self::Read => MioInterest::READABLE,
            Self::Write => MioInterest::WRITABLE,
        }
    }
}

/// What the reactor should do with a connection after a worker returns from
/// [`Connection::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Re-arm the socket for the given interest; the connection stays open.
    Rearm(Interest),
    /// The connection is already closed; remove it from the expiry queue.
    Close,
}

/// One accepted TCP connection and all state needed to carry it through a
/// request/response cycle. The connection's idle deadline is tracked
/// separately (see [`crate::descriptor_table::Deadline`]), not as a field
/// here, so it can be refreshed without taking this struct's mutex.
pub struct Connection {
    token: Token,
    socket: Option<TcpStream>,
    peer_addr: SocketAddr,
    doc_root: PathBuf,

    read_buf: Vec<u8>,
    read_idx: usize,
    checked_idx: usize,
    start_of_line: usize,
    request: Request,

    resolved_path: Option<PathBuf>,
    mmap: Option<Mmap>,

    write_buf: Vec<u8>,
    write_idx: usize,
    bytes_sent: u64,
}

impl Connection {
    /// Builds a freshly-accepted connection entry.
    pub fn new(token: Token, socket: TcpStream, peer_addr: SocketAddr, config: &Config) -> Self {
        Self {
            token,
            socket: Some(socket),
            peer_addr,
            doc_root: config.doc_root.clone(),
            read_buf: vec![0u8; config.read_buffer_size],
            read_idx: 0,
            checked_idx: 0,
            start_of_line: 0,
            request: Request::default(),
            resolved_path: None,
            mmap: None,
            write_buf: vec![0u8; config.write_buffer_size],
            write_idx: 0,
            bytes_sent: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_test(token: Token, config: &Config) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let client = std::net::TcpStream::connect(addr).expect("connect loopback");
        let (server, peer) = listener.accept().expect("accept loopback");
        server.set_nonblocking(true).expect("nonblocking");
        drop(client);
        Self::new(token, TcpStream::from_std(server), peer, config)
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// True once the socket has been closed; the entry is a dead husk
    /// awaiting removal from the descriptor table.
    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let socket = self.socket.as_mut().expect("register on live connection");
        registry.register(socket, self.token, MioInterest::READABLE)
    }

    pub fn reregister(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        let socket = self.socket.as_mut().expect("reregister on live connection");
        registry.reregister(socket, self.token, interest.as_mio())
    }

    /// Deregisters and closes the socket, marking the entry dead. Idempotent
    /// — a second call observes `self.socket` already `None` and does
    /// nothing.
    pub fn close_conn(&mut self, registry: &Registry) {
        if let Some(mut socket) = self.socket.take() {
            let _ = registry.deregister(&mut socket);
            self.mmap = None;
        }
    }

    /// Resets parser and buffer state for the next request on a kept-alive
    /// socket. The socket itself, and the connection's position in the
    /// descriptor table, are retained.
    pub fn init(&mut self) {
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_of_line = 0;
        self.request.reset();
        self.resolved_path = None;
        self.mmap = None;
        self.write_idx = 0;
        self.bytes_sent = 0;
    }

    /// Non-blocking repeated read into `read_buf[read_idx..]` until the
    /// socket would block, the peer closes, or the buffer fills.
    ///
    /// Returns `Ok(true)` if at least one byte was read and the peer has not
    /// closed, `Ok(false)` if the peer closed (caller should close), and
    /// `Err` for any transport error other than would-block.
    pub fn drain_read(&mut self) -> io::Result<bool> {
        let socket = self.socket.as_mut().expect("drain_read on live connection");
        let mut progressed = false;
        loop {
            if self.read_idx == self.read_buf.len() {
                break;
            }
            match socket.read(&mut self.read_buf[self.read_idx..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.read_idx += n;
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(progressed)
    }

    /// Runs `process_read`, then either dispatches CGI, builds a static-file
    /// response, or reports that more bytes are needed. Invoked on a worker
    /// thread.
    pub fn process(&mut self, registry: &Registry) -> Outcome {
        match self.process_read() {
            Ok(ReadOutcome::NeedMore) => Outcome::Rearm(Interest::Read),
            Ok(ReadOutcome::Overflow) => {
                self.close_conn(registry);
                Outcome::Close
            }
            Ok(ReadOutcome::Cgi { body }) => {
                crate::cgi::run(self, body);
                self.close_conn(registry);
                Outcome::Close
            }
            Ok(ReadOutcome::StaticFile) => {
                let status = self.do_request();
                self.finish_response(registry, status)
            }
            Err(_parse_error) => {
                self.mmap = None;
                self.finish_response(registry, Status::BadRequest)
            }
        }
    }

    fn finish_response(&mut self, registry: &Registry, status: Status) -> Outcome {
        match self.process_write(status) {
            Ok(()) => Outcome::Rearm(Interest::Write),
            Err(()) => {
                self.close_conn(registry);
                Outcome::Close
            }
        }
    }

    /// Drives the request/header/body state machine over whatever bytes are
    /// currently buffered.
    fn process_read(&mut self) -> Result<ReadOutcome, ParseError> {
        let outcome = self.request.advance(
            &mut self.read_buf,
            self.read_idx,
            &mut self.checked_idx,
            &mut self.start_of_line,
        );

        match outcome {
            Ok(ParseOutcome::NeedMore) => {
                if self.read_idx == self.read_buf.len() {
                    Ok(ReadOutcome::Overflow)
                } else {
                    Ok(ReadOutcome::NeedMore)
                }
            }
            Ok(ParseOutcome::Complete { body }) => {
                if self.request.cgi {
                    Ok(ReadOutcome::Cgi { body })
                } else {
                    Ok(ReadOutcome::StaticFile)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// stat → world-readable check → directory check → open+mmap, in that
    /// exact order.
    fn do_request(&mut self) -> Status {
        let target_bytes = self.read_buf[self.request.target.clone()].to_vec();
        let path = resolve_path(&self.doc_root, &target_bytes);

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => return Status::NotFound,
        };

        if meta.permissions().mode() & 0o004 == 0 {
            return Status::Forbidden;
        }

        if meta.is_dir() {
            return Status::BadRequest;
        }

        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(_) => return Status::NotFound,
        };

        if meta.len() == 0 {
            self.mmap = None;
            self.resolved_path = Some(path);
            return Status::Ok;
        }

        match unsafe { Mmap::map(&file) } {
            Ok(mmap) => {
                self.mmap = Some(mmap);
                self.resolved_path = Some(path);
                Status::Ok
            }
            Err(_) => Status::InternalError,
        }
    }

    /// Builds the response head (and, for non-200 codes, its inline body)
    /// into `write_buf`.
    fn process_write(&mut self, status: Status) -> Result<(), ()> {
        let content_length = match status {
            Status::Ok => self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0),
            other => other.body().len() as u64,
        };

        let head_len = parser::response::build_response_head(
            &mut self.write_buf,
            status,
            content_length,
            self.request.keep_alive,
        )?;

        self.write_idx = head_len;
        self.bytes_sent = 0;
        Ok(())
    }

    fn total_response_len(&self) -> u64 {
        self.write_idx as u64 + self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    /// Scatter/gather write loop over `[write_buf, mapped file]`.
    pub fn drain_write(&mut self) -> io::Result<WriteOutcome> {
        loop {
            let total = self.total_response_len();
            if self.bytes_sent >= total {
                break;
            }

            let head_remaining = (self.write_idx as u64).saturating_sub(self.bytes_sent);
            let slice0: &[u8] = if head_remaining > 0 {
                &self.write_buf[self.bytes_sent as usize..self.write_idx]
            } else {
                &[]
            };
            let slice1: &[u8] = match &self.mmap {
                Some(mmap) => {
                    let file_sent = self.bytes_sent.saturating_sub(self.write_idx as u64) as usize;
                    &mmap[file_sent..]
                }
                None => &[],
            };

            let iovecs = [IoSlice::new(slice0), IoSlice::new(slice1)];
            let socket = self.socket.as_mut().expect("drain_write on live connection");

            match socket.write_vectored(&iovecs) {
                Ok(0) => return Ok(WriteOutcome::Pending),
                Ok(n) => self.bytes_sent += n as u64,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteOutcome::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.mmap = None;
                    return Err(e);
                }
            }
        }

        self.mmap = None;
        if self.request.keep_alive {
            self.init();
            Ok(WriteOutcome::KeepAlive)
        } else {
            Ok(WriteOutcome::Close)
        }
    }

    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn socket_mut(&mut self) -> Option<&mut TcpStream> {
        self.socket.as_mut()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Resolved filesystem path for the current request's target, usable as
    /// the CGI executable path. Recomputed rather than cached since CGI
    /// dispatch short-circuits before `do_request` ever runs.
    pub(crate) fn cgi_path(&self) -> PathBuf {
        let target_bytes = self.read_buf[self.request.target.clone()].to_vec();
        resolve_path(&self.doc_root, &target_bytes)
    }
}

/// Outcome of `process_read` before static-file/CGI dispatch.
enum ReadOutcome {
    NeedMore,
    Overflow,
    Cgi { body: std::ops::Range<usize> },
    StaticFile,
}

/// Outcome of a completed `drain_write` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `writev` would block; stay registered for writable and try again.
    Pending,
    /// Response fully sent, `Connection: keep-alive` was set; `init` already ran.
    KeepAlive,
    /// Response fully sent, connection should be closed.
    Close,
}

/// Joins `doc_root` and a request target, appending `index.html` when the
/// target is `/` or ends in `/`.
fn resolve_path(doc_root: &Path, target: &[u8]) -> PathBuf {
    let mut rel = String::from_utf8_lossy(target).into_owned();
    if rel.starts_with('/') {
        rel.remove(0);
    }
    if rel.is_empty() || rel.ends_with('/') {
        rel.push_str("index.html");
    }
    doc_root.join(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_appends_index_html_for_root() {
        let root = Path::new("/srv/www");
        assert_eq!(resolve_path(root, b"/"), PathBuf::from("/srv/www/index.html"));
    }

    #[test]
    fn resolve_path_appends_index_html_for_trailing_slash() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, b"/sub/"),
            PathBuf::from("/srv/www/sub/index.html")
        );
    }

    #[test]
    fn resolve_path_keeps_plain_target() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, b"/hello.html"),
            PathBuf::from("/srv/www/hello.html")
        );
    }
}
