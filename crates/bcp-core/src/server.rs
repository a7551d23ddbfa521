use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use socket2::{Domain, Socket, Type};
use tracing::info;

use crate::pool::WorkerPool;
use crate::processor::ProcessorContext;
use crate::readiness::{ControlEvent, ReadinessLoop};
use crate::registry::Registry;

const LISTEN_BACKLOG: i32 = 1024;

pub struct Config {
    pub port: u16,
    pub workers: usize,
    pub audit_interval: Duration,
    pub conn_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self { port: 9001, workers: 4, audit_interval: Duration::from_secs(10), conn_timeout: Duration::from_secs(60) }
    }
}

/// Owns nothing once `run` returns: this is a thin entry point that wires the
/// readiness loop, the worker pool, and the two control-plane threads
/// (signal handling, heartbeat ticking) together and blocks until shutdown.
pub struct Server;

impl Server {
    pub fn run(config: Config) -> std::io::Result<()> {
        let listener = bind(config.port)?;
        info!(port = config.port, clients_estimate = bcp_support::estimated_max_clients(), "listening");

        let (control_tx, control_rx) = mpsc::channel();
        let (readiness, waker) = ReadinessLoop::new(listener, control_rx)?;
        let waker = Arc::new(waker);
        let poll_registry = readiness.poll_registry()?;

        let start = Instant::now();
        let registry = Arc::new(Registry::new());
        let ctx = Arc::new(ProcessorContext { registry, poll_registry, start, conn_timeout: config.conn_timeout });
        let pool = WorkerPool::start(config.workers, Arc::clone(&ctx));
        let pool_handle = pool.handle();

        let stop_heartbeat = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(config.audit_interval, control_tx.clone(), Arc::clone(&waker), Arc::clone(&stop_heartbeat));
        let signals = spawn_sigint_watcher(control_tx, Arc::clone(&waker))?;

        readiness.run(&ctx, &pool_handle);
        info!("shutdown requested, draining worker pool");

        stop_heartbeat.store(true, Ordering::SeqCst);
        let _ = heartbeat.join();
        let _ = signals.join();
        pool.shutdown(true);
        info!("shutdown complete");
        Ok(())
    }
}

fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}

fn spawn_heartbeat(
    interval: Duration,
    control_tx: mpsc::Sender<ControlEvent>,
    waker: Arc<mio::Waker>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("bcp-heartbeat".into())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(interval);
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if control_tx.send(ControlEvent::Heartbeat).is_err() {
                    break;
                }
                let _ = waker.wake();
            }
        })
        .expect("spawn heartbeat thread")
}

fn spawn_sigint_watcher(control_tx: mpsc::Sender<ControlEvent>, waker: Arc<mio::Waker>) -> std::io::Result<thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT])?;
    Ok(thread::Builder::new()
        .name("bcp-signals".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                info!("SIGINT received");
                let _ = control_tx.send(ControlEvent::Shutdown);
                let _ = waker.wake();
            }
        })
        .expect("spawn signal watcher thread"))
}
