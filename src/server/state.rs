use std::sync::Arc;

use crate::config::Config;
use crate::handler::Handler;
use crate::server::pool::ContextPool;

/// State shared by every connection task.
///
/// The handler chain (middlewares plus the terminal dispatch) is frozen when
/// `serve` starts and read-only from then on; the context pool is the only
/// mutable member.
pub(crate) struct ServerState {
    pub(crate) chain: Arc<Vec<Handler>>,
    pub(crate) pool: ContextPool,
    pub(crate) config: Config,
}

impl ServerState {
    pub(crate) fn new(chain: Vec<Handler>, config: Config) -> Arc<Self> {
        Arc::new(ServerState {
            chain: Arc::new(chain),
            pool: ContextPool::new(),
            config,
        })
    }
}
