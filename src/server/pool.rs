use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::handler::Handler;

/// Free list of pooled contexts.
///
/// The pool is the only process-wide mutable resource: contexts move from
/// the pool to exactly one connection task and back, so a plain lock-guarded
/// stack is sufficient. Size is bounded only by peak concurrent connections.
pub(crate) struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl ContextPool {
    pub(crate) fn new() -> Self {
        ContextPool {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Pop a context off the free list, or build one, and bind it to the
    /// connection's handler chain.
    pub(crate) fn acquire(&self, chain: Arc<Vec<Handler>>) -> Box<Context> {
        let mut ctx = self
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Box::new(Context::new()));
        ctx.chain = chain;
        ctx
    }

    /// Reset a context and return it to the free list.
    pub(crate) fn release(&self, mut ctx: Box<Context>) {
        ctx.reset();
        self.free.lock().unwrap().push(ctx);
    }
}
