/// File descriptors reserved for the listener, the `mio::Waker`, and stdio,
/// kept out of the advertised "max concurrent clients" figure.
const RESERVED_FDS: u64 = 16;

/// Best-effort estimate of how many clients this process can concurrently
/// hold open sockets for, derived from `RLIMIT_NOFILE`. Informational only —
/// the server does not enforce it as an admission-control gate.
pub fn estimated_max_clients() -> u64 {
    match rustix::process::getrlimit(rustix::process::Resource::Nofile).current {
        Some(soft) => soft.saturating_sub(RESERVED_FDS),
        None => u64::MAX - RESERVED_FDS,
    }
}
