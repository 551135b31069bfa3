//! The reactor loop: the single thread that owns the readiness facility,
//! the descriptor table, and the expiry queue, and that hands connections
//! to the worker pool.
//!
//! A `mio::Poll` loop dispatches on reserved tokens for the listening
//! socket, a waker, and the signal-tick source, with every other token
//! routed through the descriptor table. Expiry runs as a post-batch step
//! on this same thread rather than on a dedicated timer thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::unbounded;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest as MioInterest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::connection::{Connection, Interest, Outcome, WriteOutcome};
use crate::descriptor_table::DescriptorTable;
use crate::error::EngineError;
use crate::expiry::ExpiryQueue;
use crate::signal_tick::SignalTick;
use crate::worker_pool::{Completion, WorkerPool};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);
const TICK_TOKEN: Token = Token(usize::MAX - 2);

const LISTEN_BACKLOG: i32 = 5;

/// Binds the listening socket: IPv4, `INADDR_ANY`, `SO_REUSEADDR`, backlog 5.
fn bind_listener(port: u16) -> Result<std::net::TcpListener, EngineError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| EngineError::Bind { port, source })?;
    socket
        .set_reuse_address(true)
        .map_err(|source| EngineError::Bind { port, source })?;
    let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
    socket
        .bind(&addr.into())
        .map_err(|source| EngineError::Bind { port, source })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| EngineError::Bind { port, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| EngineError::Bind { port, source })?;
    Ok(socket.into())
}

/// Runs the engine until the process is killed. This never returns `Ok` in
/// ordinary operation; it returns `Err` only for startup/fatal failures
/// (bind failure, poll failure, a non-`EINTR` poll error).
pub fn run(config: Config) -> Result<(), EngineError> {
    if !config.doc_root.is_dir() {
        return Err(EngineError::DocRoot {
            path: config.doc_root.clone(),
        });
    }

    let std_listener = bind_listener(config.port)?;
    let mut listener = TcpListener::from_std(std_listener);

    let mut poll = Poll::new().map_err(EngineError::Poll)?;
    let registry = poll.registry().try_clone().map_err(EngineError::Poll)?;

    poll.registry()
        .register(&mut listener, LISTEN_TOKEN, MioInterest::READABLE)
        .map_err(EngineError::Poll)?;

    let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(EngineError::Poll)?);
    let mut signal_tick = SignalTick::new(poll.registry(), TICK_TOKEN, config.timeslot())?;

    let (completions_tx, completions_rx) = unbounded::<Completion>();
    let worker_pool = WorkerPool::new(&config, &registry, completions_tx, Arc::clone(&waker))?;

    let mut table = DescriptorTable::new(config.max_connections);
    let mut expiry = ExpiryQueue::new();
    let mut events = Events::with_capacity(1024);

    tracing::info!(port = config.port, workers = config.workers, "reactor started");

    loop {
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::Poll(e)),
        }

        let mut timed_out = false;

        for event in events.iter() {
            match event.token() {
                LISTEN_TOKEN => accept_all(&listener, &registry, &config, &mut table, &mut expiry),
                WAKE_TOKEN => {}
                TICK_TOKEN => {
                    if signal_tick.drain_and_rearm(config.timeslot()) {
                        timed_out = true;
                    }
                }
                token => handle_connection_event(
                    token,
                    event,
                    &registry,
                    &config,
                    &mut table,
                    &mut expiry,
                    &worker_pool,
                ),
            }
        }

        while let Ok(completion) = completions_rx.try_recv() {
            apply_completion(completion, &registry, &mut table);
        }

        if timed_out {
            run_expiry_tick(&registry, &mut table, &mut expiry);
        }
    }
}

fn accept_all(
    listener: &TcpListener,
    registry: &mio::Registry,
    config: &Config,
    table: &mut DescriptorTable,
    expiry: &mut ExpiryQueue,
) {
    loop {
        let (stream, peer): (TcpStream, SocketAddr) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let deadline = Instant::now() + config.idle_timeout();
        let token = table.insert(deadline, |token| Connection::new(token, stream, peer, config));

        let Some(token) = token else {
            tracing::warn!("descriptor table full, rejecting connection");
            continue;
        };

        let entry = table.get(token).expect("just inserted");
        if let Err(e) = entry
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .register(registry)
        {
            tracing::warn!(error = %e, "failed to register accepted socket");
        }
        expiry.push(token, deadline);
    }
}

fn handle_connection_event(
    token: Token,
    event: &mio::event::Event,
    registry: &mio::Registry,
    config: &Config,
    table: &mut DescriptorTable,
    expiry: &mut ExpiryQueue,
    worker_pool: &WorkerPool,
) {
    let Some(entry) = table.get(token) else {
        return;
    };

    if event.is_read_closed() || event.is_write_closed() || event.is_error() {
        entry
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close_conn(registry);
        table.remove(token);
        return;
    }

    if event.is_readable() {
        let read_result = {
            let mut conn = entry.connection.lock().unwrap_or_else(|e| e.into_inner());
            conn.drain_read()
        };

        match read_result {
            Ok(true) => {
                if worker_pool.dispatch(token, Arc::clone(&entry)) {
                    // The entry now belongs to a worker, which may hold its
                    // mutex for a long time (CGI blocks on the child for its
                    // whole lifetime). Refresh the deadline through the
                    // atomic the descriptor table keeps alongside the
                    // connection instead of locking it here.
                    let deadline = Instant::now() + config.idle_timeout();
                    entry.deadline.store(deadline);
                    expiry.push(token, deadline);
                } else {
                    entry
                        .connection
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .close_conn(registry);
                    table.remove(token);
                }
            }
            Ok(false) | Err(_) => {
                entry
                    .connection
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .close_conn(registry);
                table.remove(token);
            }
        }
    }

    if event.is_writable() {
        let already_closed = entry
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_closed();
        if already_closed {
            return;
        }

        let write_result = {
            let mut conn = entry.connection.lock().unwrap_or_else(|e| e.into_inner());
            conn.drain_write()
        };

        match write_result {
            Ok(WriteOutcome::Pending) => {
                let mut conn = entry.connection.lock().unwrap_or_else(|e| e.into_inner());
                let _ = conn.reregister(registry, Interest::Write);
            }
            Ok(WriteOutcome::KeepAlive) => {
                {
                    let mut conn = entry.connection.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = conn.reregister(registry, Interest::Read);
                }
                let deadline = Instant::now() + config.idle_timeout();
                entry.deadline.store(deadline);
                expiry.push(token, deadline);
            }
            Ok(WriteOutcome::Close) | Err(_) => {
                entry
                    .connection
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .close_conn(registry);
                table.remove(token);
            }
        }
    }
}

fn apply_completion(completion: Completion, registry: &mio::Registry, table: &mut DescriptorTable) {
    match completion.outcome {
        Outcome::Rearm(interest) => {
            if let Some(entry) = table.get(completion.token) {
                let mut conn = entry.connection.lock().unwrap_or_else(|e| e.into_inner());
                if !conn.is_closed() {
                    let _ = conn.reregister(registry, interest);
                }
            }
        }
        Outcome::Close => {
            table.remove(completion.token);
        }
    }
}

fn run_expiry_tick(registry: &mio::Registry, table: &mut DescriptorTable, expiry: &mut ExpiryQueue) {
    let now = Instant::now();
    let expired = expiry.tick(now, |token| table.get(token).map(|entry| entry.deadline.load()));

    for token in expired {
        if let Some(entry) = table.get(token) {
            entry
                .connection
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .close_conn(registry);
        }
        table.remove(token);
    }
}
