use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// Outcome of a handler or middleware invocation. A non-`Ok` return engages
/// the central error handler, which logs an opaque reference id and emits a
/// 500 response.
pub type HandlerResult = anyhow::Result<()>;

/// Boxed future returned by handlers; borrows the context for its lifetime.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// A route handler or middleware: a shared callable over a mutable request
/// context. Handlers and middlewares share the same shape so the dispatch
/// chain is uniform.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync>;

/// Wrap a closure into a [`Handler`].
///
/// ```no_run
/// use arbor::{handler, Handler};
///
/// let hello: Handler = handler(|ctx| {
///     Box::pin(async move {
///         ctx.write_str("hello");
///         Ok(())
///     })
/// });
/// ```
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}
