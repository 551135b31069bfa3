//! The descriptor-indexed connection table.
//!
//! Connections are identified by `mio::Token` rather than a raw file
//! descriptor, so `slab` gives a dense, reusable-index map with O(1)
//! insert/remove and no unbounded growth as connections come and go.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use mio::Token;
use slab::Slab;

use crate::connection::Connection;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// A connection's idle deadline, stored as a plain atomic rather than as a
/// field of [`Connection`]. Kept outside the connection's mutex so the
/// reactor can refresh it after handing a connection to a worker without
/// waiting on whatever lock that worker currently holds — for a CGI
/// request, that can be the lifetime of a child process.
#[derive(Debug)]
pub struct Deadline(AtomicU64);

impl Deadline {
    pub fn new(instant: Instant) -> Self {
        Self(AtomicU64::new(Self::encode(instant)))
    }

    pub fn load(&self) -> Instant {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, instant: Instant) {
        self.0.store(Self::encode(instant), Ordering::Release);
    }

    fn encode(instant: Instant) -> u64 {
        instant.saturating_duration_since(epoch()).as_nanos() as u64
    }

    fn decode(nanos: u64) -> Instant {
        epoch() + Duration::from_nanos(nanos)
    }
}

/// One slot in the descriptor table: a connection and its idle deadline.
/// The two are locked independently — `deadline` never requires taking
/// `connection`'s mutex.
#[derive(Debug)]
pub struct Entry {
    pub connection: Mutex<Connection>,
    pub deadline: Deadline,
}

impl Entry {
    fn new(connection: Connection, deadline: Instant) -> Self {
        Self {
            connection: Mutex::new(connection),
            deadline: Deadline::new(deadline),
        }
    }
}

/// Bounded table of live connections, indexed by `mio::Token`.
#[derive(Debug)]
pub struct DescriptorTable {
    slots: Slab<Arc<Entry>>,
    capacity: usize,
}

impl DescriptorTable {
    /// Creates a table that refuses inserts once `capacity` connections are live.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::new(),
            capacity,
        }
    }

    /// Inserts a new connection with an initial idle `deadline`, returning
    /// its token, unless the table is already at capacity.
    pub fn insert(&mut self, deadline: Instant, build: impl FnOnce(Token) -> Connection) -> Option<Token> {
        if self.slots.len() >= self.capacity {
            return None;
        }
        let slot = self.slots.vacant_entry();
        let token = Token(slot.key());
        slot.insert(Arc::new(Entry::new(build(token), deadline)));
        Some(token)
    }

    /// Borrows the entry at `token`, if it is still live.
    pub fn get(&self, token: Token) -> Option<Arc<Entry>> {
        self.slots.get(token.0).cloned()
    }

    /// Removes and drops the entry at `token`. A no-op if already removed
    /// (mirrors `close_conn`'s idempotence at the table level).
    pub fn remove(&mut self, token: Token) {
        if self.slots.contains(token.0) {
            self.slots.remove(token.0);
        }
    }

    /// Number of connections currently tracked.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table currently holds no connections.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    fn cfg() -> Config {
        Config {
            port: 0,
            doc_root: PathBuf::from("."),
            workers: 1,
            queue_capacity: 1,
            timeslot_secs: 5,
            max_connections: 1,
            read_buffer_size: 2048,
            write_buffer_size: 1024,
        }
    }

    #[test]
    fn insert_rejects_once_capacity_is_reached() {
        let mut table = DescriptorTable::new(1);
        let cfg = cfg();
        let now = Instant::now();
        let first = table.insert(now, |token| Connection::new_test(token, &cfg));
        assert!(first.is_some());
        let second = table.insert(now, |token| Connection::new_test(token, &cfg));
        assert!(second.is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = DescriptorTable::new(4);
        let cfg = cfg();
        let now = Instant::now();
        let token = table.insert(now, |token| Connection::new_test(token, &cfg)).unwrap();
        table.remove(token);
        table.remove(token);
        assert!(table.get(token).is_none());
    }

    #[test]
    fn deadline_refresh_does_not_require_the_connection_lock() {
        let mut table = DescriptorTable::new(4);
        let cfg = cfg();
        let now = Instant::now();
        let token = table.insert(now, |token| Connection::new_test(token, &cfg)).unwrap();
        let entry = table.get(token).unwrap();

        let guard = entry.connection.lock().unwrap();
        let later = now + Duration::from_secs(30);
        entry.deadline.store(later);
        assert_eq!(entry.deadline.load(), later);
        drop(guard);
    }
}
