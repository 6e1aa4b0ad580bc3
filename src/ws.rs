//! RFC 6455 upgrade handshake. Frame parsing is owned by whatever handler
//! receives the socket.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::StatusCode;
use sha1::{Digest, Sha1};

use crate::context::{BoxedConnection, Context, UpgradeFuture};
use crate::handler::HandlerResult;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` digest for a client key.
fn accept_digest(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// Perform the upgrade handshake and transfer socket ownership.
///
/// Installs the `101 Switching Protocols` response, marks the context
/// upgraded, and registers `on_connection` to receive the raw connection
/// after the connection loop has written the upgrade headers. A request
/// without a `Sec-WebSocket-Key` answers 400 and stays in HTTP mode.
pub fn upgrade<F, Fut>(ctx: &mut Context, on_connection: F) -> HandlerResult
where
    F: FnOnce(BoxedConnection) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let Some(key) = ctx.header("Sec-WebSocket-Key").map(|k| k.trim().to_owned()) else {
        ctx.set_status(StatusCode::BAD_REQUEST);
        ctx.write_str("missing Sec-WebSocket-Key");
        return Ok(());
    };

    ctx.set_status(StatusCode::SWITCHING_PROTOCOLS);
    ctx.set_header("Upgrade", "websocket");
    ctx.set_header("Connection", "Upgrade");
    ctx.set_header("Sec-WebSocket-Accept", &accept_digest(&key));
    ctx.set_upgrade(Box::new(move |io| {
        let fut: UpgradeFuture = Box::pin(on_connection(io));
        fut
    }));
    Ok(())
}
