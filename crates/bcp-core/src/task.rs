use std::sync::Arc;

use bcp_wire::Frame;

use crate::connection::Connection;

/// What triggered a dispatch of the transition table against a connection.
#[derive(Debug)]
pub enum Event {
    /// The poller observed readable/error/hangup on the connection's fd.
    /// The handler is responsible for reading as many frames as the socket
    /// currently has buffered.
    Inbound,
    /// A frame this connection owes some other party the chance to send.
    Outbound(Frame),
    /// A periodic audit tick: check this connection's idle time against the
    /// inactivity timeout.
    Heartbeat,
    /// The server is shutting down; drop this connection unconditionally,
    /// same as a timed-out heartbeat but without consulting the clock.
    Shutdown,
}

/// One unit of work for the pool: dispatch `event` against `conn`.
pub struct Task {
    pub conn: Arc<Connection>,
    pub event: Event,
}
