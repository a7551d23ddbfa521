use std::path::PathBuf;

/// Failures that can stop the server before or during a run. Kept as a
/// single enum (rather than threading `io::Error` around bare) so `main`
/// has one place to format a message and pick an exit code.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open log file {path}: {source}")]
    LogFile { path: PathBuf, source: std::io::Error },
    #[error("server failed: {0}")]
    Server(#[from] std::io::Error),
}
