mod conn;
mod pool;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use http::Method;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TlsConfig};
use crate::context::{BoxedConnection, Context};
use crate::error::ServerError;
use crate::handler::{handler, Handler, HandlerFuture};
use crate::middleware::{dispatch, Group};
use crate::routing::{Router, METHODS};
use state::ServerState;

/// The HTTP/1.1 server.
///
/// Routes and middlewares are registered up front; [`serve`](Server::serve)
/// freezes the tables, binds the listener, and runs until SIGINT or SIGTERM.
///
/// ```no_run
/// use arbor::Server;
///
/// # async fn run() -> anyhow::Result<()> {
/// let mut server = Server::new();
/// server.get("/greet/:name", |ctx| {
///     Box::pin(async move {
///         let name = ctx.param("name").to_owned();
///         ctx.write_str("Hello ");
///         ctx.write_str(&name);
///         Ok(())
///     })
/// });
/// server.serve().await
/// # }
/// ```
pub struct Server {
    config: Config,
    router: Router<Handler>,
    middlewares: Vec<Handler>,
    ready: Option<oneshot::Sender<SocketAddr>>,
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Server::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Server {
            config,
            router: Router::new(),
            middlewares: Vec::new(),
            ready: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Install a single-shot receiver fired with the bound address once the
    /// listener is ready. Useful with port `0`.
    pub fn ready_signal(&mut self, ready: oneshot::Sender<SocketAddr>) {
        self.ready = Some(ready);
    }

    /// Append a server-level middleware. Middlewares run in registration
    /// order ahead of route dispatch; one that does not call
    /// [`Context::next`] short-circuits the chain.
    pub fn middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.middlewares.push(handler(f));
        self
    }

    /// Create a route group with a shared path prefix and middleware list.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group::new(self, prefix)
    }

    /// Register a handler. Registration failures (parameter-name conflicts,
    /// unrecognized methods) are startup faults and abort the program.
    pub fn route(&mut self, method: Method, pattern: &str, h: Handler) -> &mut Self {
        if let Err(e) = self.try_route(method.clone(), pattern, h) {
            panic!("cannot register {method} {pattern}: {e}");
        }
        self
    }

    /// Fallible registration, for callers that prefer to handle conflicts.
    pub fn try_route(&mut self, method: Method, pattern: &str, h: Handler) -> Result<(), ServerError> {
        self.router.register(&method, pattern, h)
    }

    pub fn get<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::GET, pattern, handler(f))
    }

    pub fn post<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::POST, pattern, handler(f))
    }

    pub fn put<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::PUT, pattern, handler(f))
    }

    pub fn patch<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::PATCH, pattern, handler(f))
    }

    pub fn delete<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, pattern, handler(f))
    }

    pub fn head<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::HEAD, pattern, handler(f))
    }

    pub fn options<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::OPTIONS, pattern, handler(f))
    }

    pub fn connect<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::CONNECT, pattern, handler(f))
    }

    pub fn trace<F>(&mut self, pattern: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.route(Method::TRACE, pattern, handler(f))
    }

    /// Register one handler on every recognized method.
    pub fn all(&mut self, pattern: &str, h: Handler) -> &mut Self {
        for method in METHODS {
            self.route(method, pattern, h.clone());
        }
        self
    }

    /// Uniformly wrap every registered route handler, e.g. to add logging or
    /// instrumentation after all routes are in place.
    pub fn wrap_handlers(&mut self, f: impl Fn(Handler) -> Handler) {
        self.router.visit_mut(&mut |h| {
            let inner = h.clone();
            *h = f(inner);
        });
    }

    /// Bind the listener and serve until the process receives SIGINT or
    /// SIGTERM. Returns `Ok(())` after a signal-initiated shutdown; bind and
    /// TLS-material failures are returned before the ready signal fires.
    pub async fn serve(mut self) -> Result<()> {
        init_tracing(&self.config);

        let mut chain = std::mem::take(&mut self.middlewares);
        chain.push(dispatch(Arc::new(self.router)));
        let state = ServerState::new(chain, self.config.clone());

        let acceptor = if self.config.tls.enabled {
            Some(build_tls_acceptor(&self.config.tls)?)
        } else {
            None
        };

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        info!(
            "server: listening, addr={}, tls={}",
            local_addr,
            acceptor.is_some()
        );
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(local_addr);
        }

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("server: shutdown signal received, closing listener");
                    break;
                }
                accepted = listener.accept() => {
                    let (tcp, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            error!("server: accept failed, error={}", e);
                            continue;
                        }
                    };

                    let state = state.clone();
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        let io: BoxedConnection = match acceptor {
                            Some(tls) => match tls.accept(tcp).await {
                                Ok(stream) => Box::new(stream),
                                Err(e) => {
                                    debug!(
                                        "server: tls handshake failed, peer={}, error={}",
                                        peer, e
                                    );
                                    return;
                                }
                            },
                            None => Box::new(tcp),
                        };
                        conn::serve_connection(io, state).await;
                    });
                }
            }
        }

        info!("server: shutdown complete");
        Ok(())
    }
}

fn init_tracing(config: &Config) {
    let default_level = if config.debug {
        "debug"
    } else if config.verbose {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A host application may already have installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn build_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(&tls.certificate)?;
    let key = load_key(&tls.key)?;
    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServerError::Tls(format!("cannot open certificate {path}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("cannot parse certificate {path}: {e}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServerError::Tls(format!("cannot open key {path}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("cannot parse key {path}: {e}")))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {path}")))
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("server: received SIGINT, shutting down"),
        _ = terminate => info!("server: received SIGTERM, shutting down"),
    }
}
