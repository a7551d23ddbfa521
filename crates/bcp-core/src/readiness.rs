use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{info, warn};

use crate::connection::Connection;
use crate::pool::PoolHandle;
use crate::processor::ProcessorContext;
use crate::task::{Event, Task};

pub const CONTROL_TOKEN: Token = Token(0);
pub const LISTENER_TOKEN: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

/// Messages the control-plane threads (signal handler, heartbeat timer) push
/// across the `mio::Waker` boundary into the readiness loop.
pub enum ControlEvent {
    Heartbeat,
    Shutdown,
}

/// Tier 1 of the server: a single thread blocked in `Poll::poll`, doing
/// nothing but accepting connections and turning "this fd is readable" into
/// an `Event::Inbound` task for the worker pool. No frame is ever decoded
/// here — that's Tier 2's job, once the fd has been taken out of the
/// interest set so the same readiness edge can't produce two tasks.
pub struct ReadinessLoop {
    poll: Poll,
    listener: TcpListener,
    conns: HashMap<Token, Arc<Connection>>,
    next_token: usize,
    control_rx: Receiver<ControlEvent>,
}

impl ReadinessLoop {
    pub fn new(mut listener: TcpListener, control_rx: Receiver<ControlEvent>) -> io::Result<(Self, mio::Waker)> {
        let poll = Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), CONTROL_TOKEN)?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok((
            Self { poll, listener, conns: HashMap::new(), next_token: FIRST_CLIENT_TOKEN, control_rx },
            waker,
        ))
    }

    pub fn poll_registry(&self) -> io::Result<mio::Registry> {
        self.poll.registry().try_clone()
    }

    /// Blocks until a `ControlEvent::Shutdown` arrives, then drops every
    /// still-registered connection with a synthetic `Event::Shutdown` and
    /// returns.
    pub fn run(mut self, ctx: &Arc<ProcessorContext>, pool: &PoolHandle) {
        let mut events = Events::with_capacity(1024);
        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                warn!(%err, "poll failed");
                continue;
            }

            let mut shutting_down = false;
            for event in events.iter() {
                match event.token() {
                    CONTROL_TOKEN => {
                        while let Ok(msg) = self.control_rx.try_recv() {
                            match msg {
                                ControlEvent::Heartbeat => self.audit(ctx, pool),
                                ControlEvent::Shutdown => shutting_down = true,
                            }
                        }
                    }
                    LISTENER_TOKEN => self.accept(ctx, pool),
                    token => self.on_client_readable(token, pool),
                }
            }

            if shutting_down {
                self.drain_all(pool);
                return;
            }
        }
    }

    fn accept(&mut self, ctx: &Arc<ProcessorContext>, pool: &PoolHandle) {
        loop {
            let (mut stream, peer): (_, SocketAddr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(%err, "accept failed");
                    return;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(err) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                warn!(%err, "failed to register accepted connection");
                continue;
            }

            let now = Instant::now();
            let conn = Arc::new(Connection::new(token, peer, stream, now, ctx.start));
            info!(%peer, ?token, "accepted connection");
            ctx.registry.insert(Arc::clone(&conn));
            self.conns.insert(token, conn);
        }
    }

    fn on_client_readable(&mut self, token: Token, pool: &PoolHandle) {
        let Some(conn) = self.conns.get(&token) else { return };
        {
            let mut inner = conn.inner.lock().unwrap();
            if self.poll.registry().deregister(&mut inner.stream).is_ok() {
                inner.registered_for_read = false;
            }
        }
        pool.submit(Task { conn: Arc::clone(conn), event: Event::Inbound });
    }

    fn audit(&mut self, ctx: &Arc<ProcessorContext>, pool: &PoolHandle) {
        let snapshot = ctx.registry.snapshot();
        let live: std::collections::HashSet<Token> = snapshot.iter().map(|c| c.token).collect();
        // A token drops out of the registry once CLOSING has broadcast its
        // leave notice and torn the record down; prune it here rather than
        // letting this map grow for the life of the process.
        self.conns.retain(|token, _| live.contains(token));

        for conn in snapshot {
            pool.submit(Task { conn, event: Event::Heartbeat });
        }
    }

    fn drain_all(&mut self, pool: &PoolHandle) {
        for conn in self.conns.values() {
            pool.submit(Task { conn: Arc::clone(conn), event: Event::Shutdown });
        }
    }
}
