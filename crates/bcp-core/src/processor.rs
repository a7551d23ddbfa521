use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bcp_support::{sanitize_message, sanitize_username};
use bcp_wire::{Frame, Outcome};
use mio::Interest;
use tracing::{debug, warn};

use crate::broadcast::broadcast;
use crate::connection::{ConnState, Connection, Inner};
use crate::pool::PoolHandle;
use crate::registry::{Registry, SERVER_NAME};
use crate::task::{Event, Task};

/// Everything a worker needs besides the task it was handed: the registry
/// (to look up and list other connections), the readiness loop's poll
/// registry handle (to re-arm a connection's fd for reading), and the clock
/// origin used to compute idle time.
pub struct ProcessorContext {
    pub registry: Arc<Registry>,
    pub poll_registry: mio::Registry,
    pub start: Instant,
    pub conn_timeout: Duration,
}

/// Dispatch one task against its connection's current state. Holds the
/// connection's mutex for the whole call, matching the record's own
/// description of itself as "one in-flight operation at a time".
pub fn process(task: Task, ctx: &ProcessorContext, pool: &PoolHandle) {
    let Task { conn, event } = task;

    let Ok(mut inner) = conn.inner.try_lock() else {
        // Someone else is mid-dispatch for this connection (can only
        // happen for a freshly re-queued task racing a slow handler).
        // Put it back of the line rather than blocking a worker thread.
        pool.submit(Task { conn, event });
        return;
    };

    if !matches!(event, Event::Heartbeat) {
        conn.touch(ctx.start);
    }

    match inner.state {
        ConnState::PreRegister => on_pre_register(&mut inner, &conn, event, ctx, pool),
        ConnState::Available => on_available(&mut inner, &conn, event, ctx, pool),
        ConnState::SendStat => on_send_stat(&mut inner, &conn, event, ctx, pool),
        ConnState::SendMsg => on_send_msg(&mut inner, &conn, event, ctx, pool),
        ConnState::PendingStatus => on_pending_status(&mut inner, &conn, event, ctx, pool),
        ConnState::Err => on_err(&mut inner, &conn, ctx, pool),
        ConnState::Closing => on_closing(&mut inner, &conn, ctx, pool),
    }
}

fn requeue(pool: &PoolHandle, conn: &Arc<Connection>, event: Event) {
    pool.submit(Task { conn: Arc::clone(conn), event });
}

/// Move a connection into ERR: remember why, and schedule the one follow-up
/// task that will actually send the error status and close the socket. The
/// event carried by that follow-up task is irrelevant — the ERR row ignores
/// it — `Heartbeat` is used because it never borrows a `Frame`.
fn fail(inner: &mut Inner, conn: &Arc<Connection>, pool: &PoolHandle, reason: impl Into<Vec<u8>>) {
    inner.state = ConnState::Err;
    inner.stat_msg = reason.into();
    pool.submit(Task { conn: Arc::clone(conn), event: Event::Heartbeat });
}

fn timed_out(conn: &Connection, ctx: &ProcessorContext) -> bool {
    conn.idle_secs(ctx.start) >= ctx.conn_timeout.as_secs()
}

fn check_timeout_or_shutdown(inner: &mut Inner, conn: &Arc<Connection>, event: &Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Shutdown => fail(inner, conn, pool, &b"server is shutting down"[..]),
        Event::Heartbeat if timed_out(conn, ctx) => fail(inner, conn, pool, &b"disconnected for inactivity"[..]),
        _ => {}
    }
}

fn rearm_read(inner: &mut Inner, conn: &Connection, ctx: &ProcessorContext) {
    if inner.registered_for_read {
        return;
    }
    match ctx.poll_registry.reregister(&mut inner.stream, conn.token, Interest::READABLE) {
        Ok(()) => inner.registered_for_read = true,
        Err(err) => warn!(token = ?conn.token, %err, "failed to re-arm connection for reading"),
    }
}

fn write_frame(inner: &mut Inner, frame: &Frame) -> bool {
    let mut buf = Vec::new();
    bcp_wire::encode_into(frame, &mut buf);
    match inner.stream.write(&buf) {
        Ok(n) => n == buf.len(),
        Err(_) => false,
    }
}

// ---- PRE_REGISTER ----------------------------------------------------

fn on_pre_register(inner: &mut Inner, conn: &Arc<Connection>, event: Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Inbound => match read_one(inner) {
            ReadResult::WouldBlock => rearm_read(inner, conn, ctx),
            ReadResult::Err(reason) => fail(inner, conn, pool, reason),
            ReadResult::Frame(Frame::Register { username }) => handle_register(inner, conn, ctx, pool, username),
            ReadResult::Frame(_) => fail(inner, conn, pool, &b"expected REGISTER"[..]),
        },
        Event::Outbound(frame) => requeue(pool, conn, Event::Outbound(frame)),
        Event::Heartbeat | Event::Shutdown => check_timeout_or_shutdown(inner, conn, &event, ctx, pool),
    }
}

fn handle_register(inner: &mut Inner, conn: &Arc<Connection>, ctx: &ProcessorContext, pool: &PoolHandle, raw_username: Vec<u8>) {
    let username = sanitize_username(&raw_username);
    if username.is_empty() {
        fail(inner, conn, pool, &b"invalid username"[..]);
        return;
    }
    if ctx.registry.username_taken(&username, conn.token) {
        fail(inner, conn, pool, &b"username already taken"[..]);
        return;
    }

    let others = ctx.registry.usernames_csv_excluding(conn.token);
    inner.username = username.clone();

    let mut welcome = Vec::with_capacity(32 + username.len());
    welcome.extend_from_slice(b"Logged in as ");
    welcome.extend_from_slice(&username);
    welcome.extend_from_slice(b".\nCurrent Clients: ");
    welcome.extend_from_slice(&others);
    pool.submit(Task {
        conn: Arc::clone(conn),
        event: Event::Outbound(Frame::Deliver { from: SERVER_NAME.to_vec(), message: welcome }),
    });

    let mut joined = username.clone();
    joined.extend_from_slice(b" has joined the server.");
    broadcast(ctx, pool, conn.token, SERVER_NAME, &joined);

    inner.state = ConnState::SendStat;
    pool.submit(Task { conn: Arc::clone(conn), event: Event::Outbound(Frame::status_ok()) });
}

// ---- AVAILABLE ---------------------------------------------------------

fn on_available(inner: &mut Inner, conn: &Arc<Connection>, event: Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Inbound => match read_one(inner) {
            ReadResult::WouldBlock => rearm_read(inner, conn, ctx),
            ReadResult::Err(reason) => fail(inner, conn, pool, reason),
            ReadResult::Frame(Frame::Send { message }) => {
                let message = sanitize_message(&message);
                broadcast(ctx, pool, conn.token, &inner.username.clone(), &message);
                inner.state = ConnState::SendStat;
                pool.submit(Task { conn: Arc::clone(conn), event: Event::Outbound(Frame::status_ok()) });
            }
            ReadResult::Frame(_) => fail(inner, conn, pool, &b"unexpected frame"[..]),
        },
        Event::Outbound(frame @ Frame::Deliver { .. }) => {
            inner.state = ConnState::SendMsg;
            requeue(pool, conn, Event::Outbound(frame));
        }
        Event::Outbound(frame @ Frame::Status { .. }) => {
            inner.state = ConnState::SendStat;
            requeue(pool, conn, Event::Outbound(frame));
        }
        Event::Outbound(frame) => requeue(pool, conn, Event::Outbound(frame)),
        Event::Heartbeat | Event::Shutdown => check_timeout_or_shutdown(inner, conn, &event, ctx, pool),
    }
}

// ---- SEND_STAT -----------------------------------------------------------

fn on_send_stat(inner: &mut Inner, conn: &Arc<Connection>, event: Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Inbound => requeue(pool, conn, Event::Inbound),
        Event::Outbound(frame @ Frame::Status { .. }) => {
            if write_frame(inner, &frame) {
                inner.state = ConnState::Available;
                inner.registered_for_read = false;
                rearm_read(inner, conn, ctx);
            } else {
                fail(inner, conn, pool, &b"write failed"[..]);
            }
        }
        Event::Outbound(frame) => requeue(pool, conn, Event::Outbound(frame)),
        Event::Heartbeat | Event::Shutdown => check_timeout_or_shutdown(inner, conn, &event, ctx, pool),
    }
}

// ---- SEND_MSG --------------------------------------------------------

fn on_send_msg(inner: &mut Inner, conn: &Arc<Connection>, event: Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Inbound => requeue(pool, conn, Event::Inbound),
        Event::Outbound(frame @ Frame::Deliver { .. }) => {
            if write_frame(inner, &frame) {
                inner.state = ConnState::PendingStatus;
                inner.registered_for_read = false;
                rearm_read(inner, conn, ctx);
            } else {
                fail(inner, conn, pool, &b"write failed"[..]);
            }
        }
        Event::Outbound(frame) => requeue(pool, conn, Event::Outbound(frame)),
        Event::Heartbeat | Event::Shutdown => check_timeout_or_shutdown(inner, conn, &event, ctx, pool),
    }
}

// ---- PENDING_STATUS --------------------------------------------------

fn on_pending_status(inner: &mut Inner, conn: &Arc<Connection>, event: Event, ctx: &ProcessorContext, pool: &PoolHandle) {
    match event {
        Event::Inbound => match read_one(inner) {
            ReadResult::WouldBlock => rearm_read(inner, conn, ctx),
            ReadResult::Err(reason) => fail(inner, conn, pool, reason),
            ReadResult::Frame(Frame::Status { code: 0, .. }) => {
                inner.state = ConnState::Available;
                rearm_read(inner, conn, ctx);
            }
            ReadResult::Frame(_) => fail(inner, conn, pool, &b"expected STATUS(OK) acknowledgement"[..]),
        },
        Event::Outbound(frame) => requeue(pool, conn, Event::Outbound(frame)),
        Event::Heartbeat | Event::Shutdown => check_timeout_or_shutdown(inner, conn, &event, ctx, pool),
    }
}

// ---- ERR / CLOSING -----------------------------------------------------

fn on_err(inner: &mut Inner, conn: &Arc<Connection>, ctx: &ProcessorContext, pool: &PoolHandle) {
    let reason = inner.stat_msg.clone();
    debug!(token = ?conn.token, reason = %String::from_utf8_lossy(&reason), "connection entering ERR");
    let _ = write_frame(inner, &Frame::status_error(reason));
    let _ = inner.stream.shutdown(std::net::Shutdown::Both);
    let _ = ctx.poll_registry.deregister(&mut inner.stream);
    inner.state = ConnState::Closing;
    pool.submit(Task { conn: Arc::clone(conn), event: Event::Heartbeat });
}

fn on_closing(inner: &mut Inner, conn: &Arc<Connection>, ctx: &ProcessorContext, pool: &PoolHandle) {
    // Already torn down by an earlier pass over this same record (e.g. a
    // stale Event::Shutdown replayed by the readiness loop for a connection
    // that finished CLOSING between two heartbeat ticks). Nothing left to do.
    if inner.finalized {
        return;
    }

    if conn.pending_count() > 0 {
        pool.submit(Task { conn: Arc::clone(conn), event: Event::Heartbeat });
        return;
    }

    let display: &[u8] = if inner.username.is_empty() { b"An unregistered user" } else { &inner.username };
    let mut left = display.to_vec();
    left.extend_from_slice(b" has left the server.");
    broadcast(ctx, pool, conn.token, SERVER_NAME, &left);

    ctx.registry.remove(conn.token);
    inner.finalized = true;
    debug!(token = ?conn.token, "connection closed");
}

// ---- frame reading -----------------------------------------------------

enum ReadResult {
    Frame(Frame),
    WouldBlock,
    Err(Vec<u8>),
}

fn read_one(inner: &mut Inner) -> ReadResult {
    let Inner { stream, reader, .. } = inner;
    match reader.read_from(stream) {
        Ok(Outcome::Ready(frame)) => ReadResult::Frame(frame),
        Ok(Outcome::WouldBlock) => ReadResult::WouldBlock,
        Err(err) => ReadResult::Err(err.to_string().into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdListener;

    use mio::net::TcpStream;

    use super::*;

    fn test_ctx() -> (Arc<ProcessorContext>, PoolHandle) {
        let poll = mio::Poll::new().unwrap();
        let ctx = Arc::new(ProcessorContext {
            registry: Arc::new(Registry::new()),
            poll_registry: poll.registry().try_clone().unwrap(),
            start: Instant::now(),
            conn_timeout: Duration::from_secs(60),
        });
        std::mem::forget(poll); // keep the epoll fd the cloned registry refers to alive
        (ctx, PoolHandle::inert())
    }

    fn dummy_conn(ctx: &ProcessorContext, token: usize) -> Arc<Connection> {
        dummy_conn_with_peer(ctx, token).0
    }

    fn dummy_conn_with_peer(ctx: &ProcessorContext, token: usize) -> (Arc<Connection>, std::net::TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(server);
        let conn = Arc::new(Connection::new(mio::Token(token), peer, stream, Instant::now(), ctx.start));
        (conn, client)
    }

    #[test]
    fn successful_registration_queues_welcome_and_status() {
        let (ctx, pool) = test_ctx();
        let conn = dummy_conn(&ctx, 1);

        let mut inner = conn.inner.lock().unwrap();
        handle_register(&mut inner, &conn, &ctx, &pool, b"nova".to_vec());
        assert_eq!(inner.state, ConnState::SendStat);
        assert_eq!(inner.username, b"nova");
        drop(inner);

        assert_eq!(pool.queued_len(), 2, "expects a private welcome DELIVER and a STATUS(OK)");
        match pool.pop().unwrap().event {
            Event::Outbound(Frame::Deliver { from, message }) => {
                assert_eq!(from, SERVER_NAME);
                assert!(String::from_utf8_lossy(&message).starts_with("Logged in as nova"));
            }
            other => panic!("unexpected first queued event: {other:?}"),
        }
        match pool.pop().unwrap().event {
            Event::Outbound(Frame::Status { code: 0, .. }) => {}
            other => panic!("unexpected second queued event: {other:?}"),
        }
    }

    #[test]
    fn registration_with_taken_username_fails() {
        let (ctx, pool) = test_ctx();
        let existing = dummy_conn(&ctx, 1);
        existing.inner.lock().unwrap().username = b"nova".to_vec();
        ctx.registry.insert(Arc::clone(&existing));

        let conn = dummy_conn(&ctx, 2);
        let mut inner = conn.inner.lock().unwrap();
        handle_register(&mut inner, &conn, &ctx, &pool, b"nova".to_vec());
        assert_eq!(inner.state, ConnState::Err);
        assert_eq!(inner.stat_msg, b"username already taken");
    }

    #[test]
    fn available_send_broadcasts_to_others_and_owes_self_a_status() {
        let (ctx, pool) = test_ctx();
        let (sender, mut sender_peer) = dummy_conn_with_peer(&ctx, 1);
        sender.inner.lock().unwrap().username = b"alice".to_vec();
        sender.inner.lock().unwrap().state = ConnState::Available;
        ctx.registry.insert(Arc::clone(&sender));

        let other = dummy_conn(&ctx, 2);
        other.inner.lock().unwrap().username = b"bob".to_vec();
        ctx.registry.insert(Arc::clone(&other));

        use std::io::Write as _;
        sender_peer.write_all(&bcp_wire::encode(&Frame::Send { message: b"hi".to_vec() })).unwrap();

        on_available(&mut sender.inner.lock().unwrap(), &sender, Event::Inbound, &ctx, &pool);

        assert_eq!(sender.inner.lock().unwrap().state, ConnState::SendStat);
        assert_eq!(pool.queued_len(), 2, "expects a DELIVER to `other` and a STATUS(OK) to self");
        let mut saw_deliver_to_other = false;
        let mut saw_self_status = false;
        while let Some(task) = pool.pop() {
            match task.event {
                Event::Outbound(Frame::Deliver { from, message }) => {
                    assert_eq!(from, b"alice");
                    assert_eq!(message, b"hi");
                    assert_eq!(task.conn.token, other.token);
                    saw_deliver_to_other = true;
                }
                Event::Outbound(Frame::Status { code: 0, .. }) => {
                    assert_eq!(task.conn.token, sender.token);
                    saw_self_status = true;
                }
                other => panic!("unexpected queued event: {other:?}"),
            }
        }
        assert!(saw_deliver_to_other && saw_self_status);
    }
}
