use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::processor::ProcessorContext;
use crate::task::Task;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
    stopping: AtomicBool,
    drain: AtomicBool,
}

/// A cloneable, `Send + Sync` reference to the pool's task queue. Held by the
/// readiness loop, by every worker (so a handler can re-queue the task it's
/// currently holding), and by the processor when it fans a broadcast out to
/// other connections.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    pub fn submit(&self, task: Task) {
        task.conn.mark_scheduled();
        self.shared.queue.lock().unwrap().push_back(task);
        self.shared.cv.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }
}

/// Fixed-size worker pool: `n` OS threads pull tasks off a single FIFO queue
/// guarded by a mutex and condvar. No work-stealing, no per-worker queues —
/// the spec's concurrency model is "one queue, N consumers, one lock per
/// connection", and a more elaborate scheduler would buy nothing a chat
/// server's traffic needs.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(n: usize, ctx: Arc<ProcessorContext>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            stopping: AtomicBool::new(false),
            drain: AtomicBool::new(true),
        });

        let handles = (0..n.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                let ctx = Arc::clone(&ctx);
                thread::Builder::new()
                    .name(format!("bcp-worker-{id}"))
                    .spawn(move || worker_loop(&shared, &ctx))
                    .expect("spawn worker thread")
            })
            .collect();

        Self { shared, handles }
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle { shared: Arc::clone(&self.shared) }
    }

    /// Signal every worker to stop taking new tasks once the queue is
    /// empty (`drain = true`), or as soon as each worker finishes whatever
    /// it's holding (`drain = false`), then join all threads.
    pub fn shutdown(mut self, drain: bool) {
        self.shared.drain.store(drain, Ordering::SeqCst);
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.cv.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
impl PoolHandle {
    /// A handle over a queue nothing is draining, for processor unit tests
    /// that want to inspect what got enqueued rather than run it.
    pub fn inert() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
                stopping: AtomicBool::new(false),
                drain: AtomicBool::new(true),
            }),
        }
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn pop(&self) -> Option<Task> {
        self.shared.queue.lock().unwrap().pop_front()
    }
}

fn worker_loop(shared: &Arc<Shared>, ctx: &Arc<ProcessorContext>) {
    let pool = PoolHandle { shared: Arc::clone(shared) };
    loop {
        let drain = shared.drain.load(Ordering::SeqCst);
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.stopping.load(Ordering::SeqCst) && (!drain || queue.is_empty()) {
                    break None;
                }
                queue = shared.cv.wait(queue).unwrap();
            }
        };
        // Popping a task (or giving up) can be the event that lets a sibling
        // worker's stopping-and-drained check finally succeed; nudge them
        // all rather than relying on a future submit() that may never come.
        shared.cv.notify_all();

        let Some(task) = task else { break };
        task.conn.mark_dequeued();
        crate::processor::process(task, ctx, &pool);
    }
}
