use std::sync::{Arc, Mutex};

use mio::Token;

use crate::connection::Connection;

/// The display name attached to server-generated notices (joins, leaves,
/// status text that doesn't originate from a client).
pub const SERVER_NAME: &[u8] = b"[Server]";

/// Live connection directory. A plain `Mutex<Vec<_>>` rather than a
/// concurrent map: lookups and snapshots are O(n) over a handful of
/// connections, and every access here is already short and uncontended
/// relative to the per-connection locks the transition table spends its time
/// on.
pub struct Registry {
    conns: Mutex<Vec<Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { conns: Mutex::new(Vec::new()) }
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        self.conns.lock().unwrap().push(conn);
    }

    pub fn remove(&self, token: Token) {
        self.conns.lock().unwrap().retain(|c| c.token != token);
    }

    /// True if some other connection has already claimed `username`. Exact
    /// byte comparison: the wire format carries raw bytes, not a locale, and
    /// a server that did case-folding or Unicode normalization would be
    /// inventing a comparison the protocol never specified.
    pub fn username_taken(&self, username: &[u8], excluding: Token) -> bool {
        self.conns
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.token != excluding && c.inner.lock().unwrap().username == username)
    }

    /// Comma-separated list of currently registered usernames, for the
    /// "Current Clients" enrichment line sent to a freshly-registered client.
    /// `excluding` is always the registering connection itself — its own
    /// `Inner` mutex is already held by the caller, so skipping it here
    /// avoids locking it a second time from the same thread.
    pub fn usernames_csv_excluding(&self, excluding: Token) -> Vec<u8> {
        let conns = self.conns.lock().unwrap();
        let mut out = Vec::new();
        let mut first = true;
        for c in conns.iter() {
            if c.token == excluding {
                continue;
            }
            let inner = c.inner.lock().unwrap();
            if inner.username.is_empty() {
                continue;
            }
            if !first {
                out.extend_from_slice(b", ");
            }
            first = false;
            out.extend_from_slice(&inner.username);
        }
        out
    }

    /// A point-in-time snapshot of live connections, safe to iterate without
    /// holding the registry lock (each entry's own mutex still guards it).
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.conns.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.conns.lock().unwrap().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
