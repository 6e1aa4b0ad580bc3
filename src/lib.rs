//! Lightweight HTTP/1.1 server framework built around a radix-tree route
//! matcher with zero-allocation lookup.
//!
//! The core is deliberately small: a hand-rolled HTTP/1.1 connection loop
//! that pools per-request state, a linear middleware chain terminated by
//! router dispatch, and one compressed radix tree per method with an
//! exact-match fast path. Static files, server-sent events, reverse
//! proxying, cookies, and WebSocket upgrades sit on top as adapters of the
//! same handler shape.
//!
//! ```no_run
//! use arbor::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Server::new();
//!     server.config_mut().listen = ":8080".to_string();
//!
//!     server.middleware(|ctx| {
//!         Box::pin(async move {
//!             tracing::info!("request: {} {}", ctx.method(), ctx.path());
//!             ctx.next().await
//!         })
//!     });
//!
//!     server.get("/greet/:name", |ctx| {
//!         Box::pin(async move {
//!             let name = ctx.param("name").to_owned();
//!             ctx.write_str("Hello ");
//!             ctx.write_str(&name);
//!             Ok(())
//!         })
//!     });
//!
//!     server.serve().await
//! }
//! ```

pub mod config;
pub mod context;
mod cookies;
pub mod error;
pub mod files;
pub mod handler;
mod middleware;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod sse;
pub mod ws;

pub use config::{Config, SseConfig, TlsConfig};
pub use context::{BoxedConnection, Connection, Context, UpgradeHandler};
pub use error::ServerError;
pub use handler::{handler, Handler, HandlerFuture, HandlerResult};
pub use middleware::Group;
pub use routing::{Router, Tree};
pub use server::Server;
pub use sse::{Event, EventSender, EventSource};

// The HTTP vocabulary types used across the public surface.
pub use http::{Method, StatusCode};
