use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bcp_wire::FrameReader;
use mio::net::TcpStream;
use mio::Token;

/// Where a connection sits in the per-record state machine. Exactly one of
/// these holds at a time, and the mutex that guards [`Inner`] is the only
/// thing allowed to move a connection between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    PreRegister,
    Available,
    SendStat,
    SendMsg,
    PendingStatus,
    Err,
    Closing,
}

/// The part of a connection that a worker thread needs exclusive access to
/// while dispatching a task: the socket itself, the incremental frame
/// decoder, and the bits of state the transition table reads and writes.
pub struct Inner {
    pub stream: TcpStream,
    pub state: ConnState,
    pub username: Vec<u8>,
    pub stat_msg: Vec<u8>,
    pub reader: FrameReader,
    pub registered_for_read: bool,
    /// Set once CLOSING's teardown body (leave broadcast, registry removal)
    /// has run. A replayed `Event::Shutdown`/`Event::Heartbeat` task against
    /// an already-CLOSING record (e.g. from a stale entry in the readiness
    /// loop's own connection map) finds this already `true` and is a no-op.
    pub finalized: bool,
}

/// A single client connection. Cheap to clone (it's always held as an
/// `Arc<Connection>`); the expensive bits live behind [`Inner`]'s mutex.
pub struct Connection {
    pub token: Token,
    pub peer: SocketAddr,
    pub inner: Mutex<Inner>,
    pending: AtomicUsize,
    last_active: AtomicU64,
}

impl Connection {
    pub fn new(token: Token, peer: SocketAddr, stream: TcpStream, now: Instant, start: Instant) -> Self {
        Self {
            token,
            peer,
            inner: Mutex::new(Inner {
                stream,
                state: ConnState::PreRegister,
                username: Vec::new(),
                stat_msg: Vec::new(),
                reader: FrameReader::new(),
                registered_for_read: true,
                finalized: false,
            }),
            pending: AtomicUsize::new(0),
            last_active: AtomicU64::new(now.duration_since(start).as_secs()),
        }
    }

    /// Called by [`crate::pool::PoolHandle::submit`] when a task is enqueued
    /// against this connection, and undone by the worker that dequeues it.
    /// A count of zero after a CLOSING record finishes its own task means no
    /// other task still references the record, so it's safe to tear down.
    pub fn mark_scheduled(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_dequeued(&self) {
        bcp_support::safe_assert!(self.pending.load(Ordering::SeqCst) > 0, "dequeued a task with no pending count to release");
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn touch(&self, start: Instant) {
        self.last_active.store(Instant::now().duration_since(start).as_secs(), Ordering::Relaxed);
    }

    pub fn idle_secs(&self, start: Instant) -> u64 {
        let now = Instant::now().duration_since(start).as_secs();
        now.saturating_sub(self.last_active.load(Ordering::Relaxed))
    }
}
