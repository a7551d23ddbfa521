mod broadcast;
mod connection;
mod pool;
mod processor;
mod readiness;
mod registry;
pub mod server;
mod task;

pub use connection::{ConnState, Connection};
pub use pool::{PoolHandle, WorkerPool};
pub use processor::ProcessorContext;
pub use registry::{Registry, SERVER_NAME};
pub use server::{Config, Server};
pub use task::{Event, Task};
