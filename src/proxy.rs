use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};
use tracing::{debug, warn};

use crate::handler::handler;
use crate::server::Server;

/// Mount a reverse proxy under `url_prefix`, forwarding to the `upstream`
/// base URL on every recognized method.
///
/// The matched wildcard capture, minus `strip_tokens` leading path tokens,
/// is appended to `upstream` together with the original query string. The
/// request method, headers, and body are forwarded; the upstream status,
/// headers (except Content-Length, which the response serializer recomputes,
/// and Transfer-Encoding, since the body arrives decoded), and body are
/// copied back. Upstream failures answer 502.
pub fn mount(server: &mut Server, url_prefix: &str, upstream: &str, strip_tokens: usize) {
    let client = reqwest::Client::new();
    let upstream = upstream.trim_end_matches('/').to_owned();
    let pattern = format!("{}/*path", url_prefix.trim_end_matches('/'));

    let h = handler(move |ctx| {
        let client = client.clone();
        let upstream = upstream.clone();
        Box::pin(async move {
            let rewritten: Vec<&str> = ctx
                .param("path")
                .split('/')
                .filter(|t| !t.is_empty())
                .skip(strip_tokens)
                .collect();
            let mut url = format!("{}/{}", upstream, rewritten.join("/"));
            if !ctx.query().is_empty() {
                url.push('?');
                url.push_str(ctx.query());
            }

            let mut request = client.request(ctx.method().clone(), &url);
            for (name, value) in ctx.headers() {
                if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length")
                {
                    continue;
                }
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(n), Ok(v)) => request = request.header(n, v),
                    _ => debug!("proxy: skipping invalid header, name={}", name),
                }
            }
            if !ctx.body().is_empty() {
                request = request.body(ctx.body().to_vec());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("proxy: upstream request failed, url={}, error={}", url, e);
                    ctx.set_status(StatusCode::BAD_GATEWAY);
                    ctx.write_str("Bad Gateway");
                    return Ok(());
                }
            };

            ctx.set_status(response.status());
            for (name, value) in response.headers() {
                if name == http::header::CONTENT_LENGTH || name == http::header::TRANSFER_ENCODING
                {
                    continue;
                }
                if let Ok(v) = value.to_str() {
                    ctx.set_header(name.as_str(), v);
                }
            }

            let body: Bytes = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("proxy: upstream body failed, url={}, error={}", url, e);
                    ctx.set_status(StatusCode::BAD_GATEWAY);
                    return Ok(());
                }
            };
            ctx.write(&body);
            Ok(())
        })
    });

    server.all(&pattern, h);
}
