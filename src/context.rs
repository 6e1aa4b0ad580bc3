use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::handler::{Handler, HandlerResult};
use crate::sse::EventSource;

/// A raw byte stream the connection loop can hand off after a protocol
/// upgrade. TLS and plain TCP connections both live behind this trait.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

pub type UpgradeFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback receiving ownership of the raw connection once the upgrade
/// response headers have been written. The HTTP state machine exits after
/// invoking it.
pub type UpgradeHandler = Box<dyn FnOnce(BoxedConnection) -> UpgradeFuture + Send + Sync>;

/// Ordered list of string pairs with slot recycling: truncation keeps both
/// the vector and the per-entry string capacity, so steady-state requests on
/// a pooled context do not allocate.
#[derive(Default)]
pub(crate) struct PairList {
    entries: Vec<(String, String)>,
    len: usize,
}

impl PairList {
    pub(crate) fn push(&mut self, name: &str, value: &str) {
        if self.len < self.entries.len() {
            let slot = &mut self.entries[self.len];
            slot.0.clear();
            slot.0.push_str(name);
            slot.1.clear();
            slot.1.push_str(value);
        } else {
            self.entries.push((name.to_owned(), value.to_owned()));
        }
        self.len += 1;
    }

    pub(crate) fn entries(&self) -> &[(String, String)] {
        &self.entries[..self.len]
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

/// Per-request state, pooled and reused across the requests of a connection.
///
/// Carries the parsed request, the accumulated response, captured route
/// parameters, the middleware chain cursor, and a lazily allocated user
/// scratch map. Handlers receive `&mut Context` and advance the chain with
/// [`next`](Context::next).
pub struct Context {
    // Parsed request.
    pub(crate) method: Method,
    pub(crate) scheme: String,
    pub(crate) host: String,
    pub(crate) path: String,
    pub(crate) query: String,
    pub(crate) request_headers: PairList,
    pub(crate) body: Vec<u8>,
    pub(crate) params: PairList,
    pub(crate) content_type: String,

    // Response under construction.
    pub(crate) status: StatusCode,
    pub(crate) response_headers: PairList,
    pub(crate) response_body: Vec<u8>,

    // Middleware chain.
    pub(crate) chain: Arc<Vec<Handler>>,
    pub(crate) cursor: usize,
    pub(crate) layers: Vec<Handler>,

    // User scratch, allocated on first write.
    pub(crate) scratch: Option<HashMap<String, Box<dyn Any + Send + Sync>>>,

    // Streaming departures from the HTTP state machine.
    pub(crate) events: Option<EventSource>,
    pub(crate) upgraded: bool,
    pub(crate) upgrade: Option<UpgradeHandler>,

    // Lazily parsed form arguments and external-parser cleanup hooks.
    pub(crate) form: Option<Vec<(String, String)>>,
    pub(crate) cleanup: Vec<Box<dyn FnOnce() + Send + Sync>>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Context {
            method: Method::GET,
            scheme: String::new(),
            host: String::new(),
            path: String::new(),
            query: String::new(),
            request_headers: PairList::default(),
            body: Vec::new(),
            params: PairList::default(),
            content_type: String::new(),
            status: StatusCode::OK,
            response_headers: PairList::default(),
            response_body: Vec::new(),
            chain: Arc::new(Vec::new()),
            cursor: 0,
            layers: Vec::new(),
            scratch: None,
            events: None,
            upgraded: false,
            upgrade: None,
            form: None,
            cleanup: Vec::new(),
        }
    }

    /// Return the context to its post-construction state while keeping every
    /// buffer's capacity. Runs pending cleanup hooks.
    pub(crate) fn reset(&mut self) {
        self.scheme.clear();
        self.host.clear();
        self.path.clear();
        self.query.clear();
        self.request_headers.clear();
        self.body.clear();
        self.params.clear();
        self.content_type.clear();
        self.status = StatusCode::OK;
        self.response_headers.clear();
        self.response_body.clear();
        self.cursor = 0;
        self.layers.clear();
        if let Some(map) = self.scratch.as_mut() {
            map.clear();
        }
        self.events = None;
        self.upgraded = false;
        self.upgrade = None;
        self.form = None;
        for hook in self.cleanup.drain(..) {
            hook();
        }
    }

    // --- request side ---------------------------------------------------

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// First request header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .entries()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All request headers in wire order, duplicates preserved.
    pub fn headers(&self) -> &[(String, String)] {
        self.request_headers.entries()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Value of the `Content-Type` header, or the empty string.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Value captured for the route parameter `name`, or the empty string.
    pub fn param(&self, name: &str) -> &str {
        self.params
            .entries()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Captured route parameters in path order.
    pub fn params(&self) -> &[(String, String)] {
        self.params.entries()
    }

    pub(crate) fn push_param(&mut self, name: &str, value: &str) {
        self.params.push(name, value);
    }

    /// Percent-decoded value of the query argument `name`.
    pub fn query_value(&self, name: &str) -> Option<String> {
        find_arg(&self.query, name)
    }

    /// Percent-decoded value of the form argument `name`. The body is parsed
    /// on first access and only when the request is form-encoded; a parse
    /// failure yields no arguments and never aborts the request.
    pub fn form_value(&mut self, name: &str) -> Option<&str> {
        self.parse_form();
        self.form
            .as_ref()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn parse_form(&mut self) {
        if self.form.is_some() {
            return;
        }
        let mut args = Vec::new();
        if self
            .content_type
            .starts_with("application/x-www-form-urlencoded")
        {
            match std::str::from_utf8(&self.body) {
                Ok(raw) => {
                    for pair in raw.split('&').filter(|p| !p.is_empty()) {
                        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                        if let (Some(k), Some(v)) = (decode_component(k), decode_component(v)) {
                            args.push((k, v));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("context: form body is not valid utf-8, error={}", e);
                }
            }
        }
        self.form = Some(args);
    }

    // --- response side --------------------------------------------------

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Append a response header. Duplicates are allowed and preserved in
    /// insertion order.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.response_headers.push(name, value);
        self
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        self.response_headers.entries()
    }

    /// Append bytes to the response body.
    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.response_body.extend_from_slice(bytes);
        self
    }

    pub fn write_str(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes())
    }

    pub fn response_body(&self) -> &[u8] {
        &self.response_body
    }

    /// Serialize `value` as JSON into the response body and set the
    /// Content-Type accordingly.
    pub fn json<T: serde::Serialize>(&mut self, value: &T) -> HandlerResult {
        let body = serde_json::to_vec(value)?;
        self.set_header("Content-Type", "application/json");
        self.response_body.extend_from_slice(&body);
        Ok(())
    }

    // --- chain ----------------------------------------------------------

    /// Pass control to the next element of the middleware chain and return
    /// its result. A middleware that does not call `next` terminates the
    /// chain. Inside a group composition, `next` consumes the next wrapped
    /// layer before falling back to the server-level chain.
    pub async fn next(&mut self) -> HandlerResult {
        if let Some(layer) = self.layers.pop() {
            return layer(self).await;
        }
        self.cursor += 1;
        let handler = self.chain.get(self.cursor).cloned();
        match handler {
            Some(h) => h(self).await,
            None => Ok(()),
        }
    }

    // --- user scratch ---------------------------------------------------

    /// Store an arbitrary value under `key`. The scratch map is allocated on
    /// the first write and recycled across requests.
    pub fn set<V: Any + Send + Sync>(&mut self, key: &str, value: V) {
        self.scratch
            .get_or_insert_with(HashMap::new)
            .insert(key.to_owned(), Box::new(value));
    }

    /// Fetch a value previously stored with [`set`](Context::set), downcast
    /// to `V`.
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<&V> {
        self.scratch.as_ref()?.get(key)?.downcast_ref()
    }

    // --- streaming departures -------------------------------------------

    /// Attach an event source; the connection loop will stream it after the
    /// handler chain returns. Prefer [`crate::sse::attach`], which also
    /// installs the event-stream headers.
    pub fn set_event_source(&mut self, source: EventSource) {
        self.events = Some(source);
    }

    /// Whether this connection has left HTTP mode via protocol upgrade.
    pub fn upgraded(&self) -> bool {
        self.upgraded
    }

    /// Mark the connection upgraded and install the hand-off that receives
    /// the raw socket once the upgrade headers are on the wire.
    pub fn set_upgrade(&mut self, hook: UpgradeHandler) {
        self.upgraded = true;
        self.upgrade = Some(hook);
    }

    /// Register a hook to run when the context is reset, e.g. temp-file
    /// cleanup owned by an external body parser.
    pub fn add_cleanup(&mut self, hook: impl FnOnce() + Send + Sync + 'static) {
        self.cleanup.push(Box::new(hook));
    }
}

/// Find `name` in an `application/x-www-form-urlencoded` style argument
/// string and percent-decode its value.
fn find_arg(raw: &str, name: &str) -> Option<String> {
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_component(k).as_deref() == Some(name) {
            return decode_component(v);
        }
    }
    None
}

fn decode_component(raw: &str) -> Option<String> {
    let raw = raw.replace('+', " ");
    percent_decode_str(&raw)
        .decode_utf8()
        .ok()
        .map(|c| c.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler;

    #[test]
    fn params_recycle_their_slots() {
        let mut ctx = Context::new();
        ctx.push_param("year", "2024");
        ctx.push_param("title", "hello");
        assert_eq!(ctx.param("year"), "2024");
        assert_eq!(ctx.params().len(), 2);

        ctx.reset();
        assert!(ctx.params().is_empty());

        ctx.push_param("id", "7");
        assert_eq!(ctx.param("id"), "7");
        assert_eq!(ctx.params().len(), 1);
        assert_eq!(ctx.param("year"), "");
    }

    #[test]
    fn headers_are_case_insensitive_and_ordered() {
        let mut ctx = Context::new();
        ctx.request_headers.push("Content-Type", "text/plain");
        ctx.request_headers.push("X-Tag", "one");
        ctx.request_headers.push("X-Tag", "two");

        assert_eq!(ctx.header("content-type"), Some("text/plain"));
        assert_eq!(ctx.header("x-tag"), Some("one"));
        assert_eq!(ctx.headers().len(), 3);
    }

    #[test]
    fn response_defaults_and_duplicate_headers() {
        let mut ctx = Context::new();
        assert_eq!(ctx.status(), StatusCode::OK);

        ctx.set_header("Set-Cookie", "a=1");
        ctx.set_header("Set-Cookie", "b=2");
        assert_eq!(ctx.response_headers().len(), 2);
    }

    #[test]
    fn scratch_is_lazy_and_typed() {
        let mut ctx = Context::new();
        assert!(ctx.scratch.is_none());
        assert!(ctx.get::<u32>("n").is_none());

        ctx.set("n", 7u32);
        assert_eq!(ctx.get::<u32>("n"), Some(&7));
        assert!(ctx.get::<String>("n").is_none());

        ctx.reset();
        assert!(ctx.get::<u32>("n").is_none());
    }

    #[test]
    fn form_values_decode_lazily() {
        let mut ctx = Context::new();
        ctx.content_type = "application/x-www-form-urlencoded".to_owned();
        ctx.body = b"name=al%20ice&tag=a%2Bb&plus=1+2".to_vec();

        assert_eq!(ctx.form_value("name"), Some("al ice"));
        assert_eq!(ctx.form_value("tag"), Some("a+b"));
        assert_eq!(ctx.form_value("plus"), Some("1 2"));
        assert_eq!(ctx.form_value("missing"), None);
    }

    #[test]
    fn form_requires_the_form_content_type() {
        let mut ctx = Context::new();
        ctx.content_type = "application/json".to_owned();
        ctx.body = b"name=x".to_vec();
        assert_eq!(ctx.form_value("name"), None);
    }

    #[test]
    fn query_values_decode() {
        let mut ctx = Context::new();
        ctx.query = "q=rust%20lang&page=2".to_owned();
        assert_eq!(ctx.query_value("q"), Some("rust lang".to_owned()));
        assert_eq!(ctx.query_value("page"), Some("2".to_owned()));
        assert_eq!(ctx.query_value("none"), None);
    }

    #[tokio::test]
    async fn next_advances_the_chain_in_order() {
        let chain: Vec<Handler> = vec![
            handler(|ctx| {
                Box::pin(async move {
                    ctx.write_str("a");
                    ctx.next().await?;
                    ctx.write_str("d");
                    Ok(())
                })
            }),
            handler(|ctx| {
                Box::pin(async move {
                    ctx.write_str("b");
                    ctx.next().await
                })
            }),
            handler(|ctx| {
                Box::pin(async move {
                    ctx.write_str("c");
                    Ok(())
                })
            }),
        ];

        let mut ctx = Context::new();
        ctx.chain = Arc::new(chain);
        let first = ctx.chain[0].clone();
        first(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_body(), b"abcd");
    }

    #[tokio::test]
    async fn chain_stops_without_next() {
        let chain: Vec<Handler> = vec![
            handler(|ctx| {
                Box::pin(async move {
                    ctx.set_status(StatusCode::UNAUTHORIZED);
                    ctx.write_str("denied");
                    Ok(())
                })
            }),
            handler(|ctx| {
                Box::pin(async move {
                    ctx.write_str("never");
                    Ok(())
                })
            }),
        ];

        let mut ctx = Context::new();
        ctx.chain = Arc::new(chain);
        let first = ctx.chain[0].clone();
        first(&mut ctx).await.unwrap();

        assert_eq!(ctx.response_body(), b"denied");
        assert_eq!(ctx.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn cleanup_hooks_run_on_reset() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicBool::new(false));
        let mut ctx = Context::new();
        let flag = fired.clone();
        ctx.add_cleanup(move || flag.store(true, Ordering::SeqCst));

        ctx.reset();
        assert!(fired.load(Ordering::SeqCst));
        assert!(ctx.cleanup.is_empty());
    }
}
