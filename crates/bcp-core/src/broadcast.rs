use bcp_wire::Frame;
use mio::Token;

use crate::connection::ConnState;
use crate::pool::PoolHandle;
use crate::processor::ProcessorContext;
use crate::task::{Event, Task};

/// Fan a DELIVER frame out to every connection except `sender`, skipping
/// anything already on its way out (ERR/CLOSING). Takes a snapshot of the
/// registry rather than holding its lock while enqueuing, so a slow client
/// can't stall delivery to everyone else.
pub fn broadcast(ctx: &ProcessorContext, pool: &PoolHandle, sender: Token, from: &[u8], message: &[u8]) {
    for conn in ctx.registry.snapshot() {
        if conn.token == sender {
            continue;
        }
        let skip = {
            let inner = conn.inner.lock().unwrap();
            matches!(inner.state, ConnState::Err | ConnState::Closing)
        };
        if skip {
            continue;
        }
        pool.submit(Task {
            conn,
            event: Event::Outbound(Frame::Deliver { from: from.to_vec(), message: message.to_vec() }),
        });
    }
}
