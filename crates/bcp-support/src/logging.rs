use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Opens (creating if absent, appending otherwise) the log file for `-l`,
/// with the permissions the CLI contract promises (0744).
pub fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).mode(0o744).open(path)
}

/// Installs the global `tracing` subscriber. `writer` is `None` for plain
/// stdout logging, or an owned file handle when `-l` redirected output.
///
/// The filter level is a fixed `info`, not read from `RUST_LOG`: this process
/// reads no environment variables.
pub fn init_logging(writer: Option<File>) {
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(tracing::Level::INFO);

    match writer {
        Some(file) => builder.with_writer(move || file.try_clone().expect("clone log fd")).init(),
        None => builder.init(),
    }
}
