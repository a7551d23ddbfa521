mod assert;
pub mod limits;
pub mod logging;
pub mod sanitize;

pub use limits::estimated_max_clients;
pub use logging::{init_logging, open_log_file};
pub use sanitize::{sanitize_message, sanitize_username};
