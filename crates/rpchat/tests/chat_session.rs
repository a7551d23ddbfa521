use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use bcp_core::{Config, Server};
use bcp_wire::{encode, Frame};

// `Server::run` only stops on SIGINT, and signal delivery is process-wide:
// two servers running in the same test binary would both hear one raise().
// Serialize the tests in this file so at most one server is ever up.
static ONLY_ONE_SERVER_AT_A_TIME: Mutex<()> = Mutex::new(());

static NEXT_PORT: AtomicU16 = AtomicU16::new(19001);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

fn spawn_server(port: u16) -> thread::JoinHandle<()> {
    let config = Config {
        port,
        workers: 2,
        audit_interval: Duration::from_millis(50),
        conn_timeout: Duration::from_secs(30),
        ..Config::default()
    };
    thread::spawn(move || {
        Server::run(config).expect("server run");
    })
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            return stream;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server never came up on port {port}");
}

fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut reader = bcp_wire::FrameReader::new();
    loop {
        match reader.read_from(stream).expect("decode frame") {
            bcp_wire::Outcome::Ready(frame) => return frame,
            bcp_wire::Outcome::WouldBlock => continue,
        }
    }
}

fn send_frame(stream: &mut TcpStream, frame: &Frame) {
    stream.write_all(&encode(frame)).unwrap();
}

fn shutdown_server(handle: thread::JoinHandle<()>) {
    unsafe {
        libc::raise(libc::SIGINT);
    }
    handle.join().expect("server thread panicked");
}

#[test]
fn register_and_relay_a_message() {
    let _guard = ONLY_ONE_SERVER_AT_A_TIME.lock().unwrap();
    let port = next_port();
    let server = spawn_server(port);

    let mut alice = connect(port);
    send_frame(&mut alice, &Frame::Register { username: b"alice".to_vec() });
    let ack = read_frame(&mut alice);
    assert_eq!(ack, Frame::Status { code: 0, message: Vec::new() });
    let welcome = read_frame(&mut alice);
    assert!(matches!(welcome, Frame::Deliver { .. }));
    // Ack her own welcome: the interlock won't let the next Deliver in the
    // same direction (Bob's join announcement) flow until she does.
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    let mut bob = connect(port);
    send_frame(&mut bob, &Frame::Register { username: b"bob".to_vec() });
    let _bob_ack = read_frame(&mut bob);
    let _bob_welcome = read_frame(&mut bob);
    send_frame(&mut bob, &Frame::Status { code: 0, message: Vec::new() });

    // Alice sees Bob's join announcement.
    let joined = read_frame(&mut alice);
    assert_eq!(joined, Frame::Deliver { from: b"[Server]".to_vec(), message: b"bob has joined the server.".to_vec() });
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    send_frame(&mut bob, &Frame::Send { message: b"hello alice".to_vec() });
    let bob_ack = read_frame(&mut bob);
    assert_eq!(bob_ack, Frame::Status { code: 0, message: Vec::new() });

    let delivered = read_frame(&mut alice);
    assert_eq!(delivered, Frame::Deliver { from: b"bob".to_vec(), message: b"hello alice".to_vec() });
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    shutdown_server(server);
}

#[test]
fn idle_client_is_disconnected_by_heartbeat_audit() {
    let _guard = ONLY_ONE_SERVER_AT_A_TIME.lock().unwrap();
    let port = next_port();
    let config = Config {
        port,
        workers: 2,
        audit_interval: Duration::from_millis(100),
        conn_timeout: Duration::from_secs(1),
        ..Config::default()
    };
    let server = thread::spawn(move || Server::run(config).expect("server run"));

    let mut bob = connect(port);
    send_frame(&mut bob, &Frame::Register { username: b"bob".to_vec() });
    let _ = read_frame(&mut bob);
    let _ = read_frame(&mut bob);

    // Bob sends nothing else. Several heartbeat ticks pass his one-second
    // timeout; the audit should fail him without any further frame from him.
    thread::sleep(Duration::from_millis(1500));

    let status = read_frame(&mut bob);
    assert!(
        matches!(&status, Frame::Status { code, message } if *code != 0 && message == b"disconnected for inactivity"),
        "expected an inactivity disconnect, got {status:?}"
    );

    let mut buf = [0u8; 1];
    let eof = bob.read(&mut buf).unwrap();
    assert_eq!(eof, 0, "server should close the socket after an inactivity timeout");

    shutdown_server(server);
}

#[test]
fn sigint_does_not_replay_teardown_for_an_already_closed_connection() {
    let _guard = ONLY_ONE_SERVER_AT_A_TIME.lock().unwrap();
    let port = next_port();
    // A long audit interval guarantees the only other place that prunes a
    // finished connection out of the readiness loop's local bookkeeping map
    // (the heartbeat tick) has no chance to run before SIGINT arrives. That
    // is exactly the window a stale, already-torn-down map entry used to get
    // replayed in: SIGINT racing a connection that finished CLOSING on its
    // own moments earlier.
    let config = Config {
        port,
        workers: 2,
        audit_interval: Duration::from_secs(5),
        conn_timeout: Duration::from_secs(30),
        ..Config::default()
    };
    let server = thread::spawn(move || Server::run(config).expect("server run"));

    let mut alice = connect(port);
    send_frame(&mut alice, &Frame::Register { username: b"alice".to_vec() });
    let _ = read_frame(&mut alice);
    let _ = read_frame(&mut alice);
    // Ack her own welcome so Bob's join announcement isn't stuck behind it.
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    let mut bob = connect(port);
    send_frame(&mut bob, &Frame::Register { username: b"bob".to_vec() });
    let _ = read_frame(&mut bob);
    let _ = read_frame(&mut bob);

    let joined = read_frame(&mut alice);
    assert_eq!(joined, Frame::Deliver { from: b"[Server]".to_vec(), message: b"bob has joined the server.".to_vec() });
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    // An unrecognized opcode byte: a protocol violation that fails Bob
    // straight to ERR, then CLOSING, with no need to wait for a heartbeat.
    bob.write_all(&[9u8]).unwrap();

    let left = read_frame(&mut alice);
    assert_eq!(left, Frame::Deliver { from: b"[Server]".to_vec(), message: b"bob has left the server.".to_vec() });
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    // Bob's record has already finished CLOSING, but his token is still
    // sitting in the readiness loop's map (the next prune is a heartbeat
    // tick away). SIGINT replays Event::Shutdown against every entry still
    // in that map, Bob's included.
    unsafe {
        libc::raise(libc::SIGINT);
    }

    // Alice should see only her own shutdown status, never a second "has
    // left" notice for Bob.
    let after_sigint = read_frame(&mut alice);
    assert!(
        matches!(after_sigint, Frame::Status { code, .. } if code != 0),
        "expected alice's own shutdown status, got a replayed notice: {after_sigint:?}"
    );

    server.join().expect("server thread panicked");
}

#[test]
fn duplicate_username_is_rejected() {
    let _guard = ONLY_ONE_SERVER_AT_A_TIME.lock().unwrap();
    let port = next_port();
    let server = spawn_server(port);

    let mut alice = connect(port);
    send_frame(&mut alice, &Frame::Register { username: b"carol".to_vec() });
    let _ = read_frame(&mut alice);
    let _ = read_frame(&mut alice);
    send_frame(&mut alice, &Frame::Status { code: 0, message: Vec::new() });

    let mut impostor = connect(port);
    send_frame(&mut impostor, &Frame::Register { username: b"carol".to_vec() });
    let reply = read_frame(&mut impostor);
    assert!(matches!(reply, Frame::Status { code, .. } if code != 0));

    let mut buf = [0u8; 1];
    let eof = impostor.read(&mut buf).unwrap();
    assert_eq!(eof, 0, "server should close the connection after a protocol error");

    shutdown_server(server);
}
