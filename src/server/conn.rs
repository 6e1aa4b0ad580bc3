use std::io;
use std::sync::Arc;

use http::{Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::config::SseConfig;
use crate::context::{BoxedConnection, Context};
use crate::error::ServerError;
use crate::server::state::ServerState;
use crate::sse::{format_event, Event, EventSource, CLOSE};

/// Internal split between "answer with 400 and close" and "just close".
#[derive(Debug)]
enum ConnError {
    Malformed(ServerError),
    Io(io::Error),
}

#[derive(Debug)]
enum ReadOutcome {
    Request,
    /// Clean end of stream before a request line.
    Closed,
}

/// Serve a sequence of HTTP/1.1 requests on one accepted byte stream.
///
/// One pooled context is bound to the connection and reset between requests.
/// The loop exits when the peer closes, a parse error is answered with a 400,
/// or the context departs HTTP mode for event streaming or a protocol
/// upgrade.
pub(crate) async fn serve_connection(io: BoxedConnection, state: Arc<ServerState>) {
    let mut stream = BufStream::new(io);
    let mut ctx = state.pool.acquire(state.chain.clone());

    loop {
        match read_request(&mut stream, &mut ctx).await {
            Ok(ReadOutcome::Request) => {}
            Ok(ReadOutcome::Closed) => break,
            Err(ConnError::Malformed(e)) => {
                tracing::debug!("conn: malformed request, error={}", e);
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
                let _ = stream.flush().await;
                break;
            }
            Err(ConnError::Io(e)) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::debug!("conn: read failed, error={}", e);
                }
                break;
            }
        }

        let first = ctx.chain[0].clone();
        if let Err(e) = first(&mut ctx).await {
            handle_error(&mut ctx, e);
        }

        // Event streams: headers only (no Content-Length), then drain the
        // source on the raw writer and drop out of the request loop.
        if ctx.events.is_some() {
            let source = ctx.events.take().unwrap();
            if write_head(&mut stream, &ctx, false).await.is_err() {
                break;
            }
            if stream.flush().await.is_err() {
                break;
            }
            if let Err(e) = stream_events(&mut stream, source, &state.config.sse).await {
                tracing::debug!("conn: event stream ended, error={}", e);
            }
            break;
        }

        // Protocol upgrades: write the upgrade headers, then the socket
        // belongs to the upgrade handler.
        if ctx.upgraded {
            let write_ok = write_head(&mut stream, &ctx, false).await.is_ok()
                && stream.flush().await.is_ok();
            let hook = ctx.upgrade.take();
            state.pool.release(ctx);
            if write_ok {
                let io = stream.into_inner();
                if let Some(hook) = hook {
                    hook(io).await;
                }
            }
            return;
        }

        if let Err(e) = write_response(&mut stream, &ctx).await {
            tracing::debug!("conn: write failed, error={}", e);
            break;
        }

        ctx.reset();
    }

    state.pool.release(ctx);
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    buf.clear();
    r.read_until(b'\n', buf).await
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut line = line;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

fn eof(what: &str) -> ConnError {
    ConnError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, what.to_owned()))
}

/// Parse one request (request line, headers, body) into the context.
async fn read_request<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    ctx: &mut Context,
) -> Result<ReadOutcome, ConnError> {
    let mut line = Vec::with_capacity(256);

    let n = read_line(stream, &mut line).await.map_err(ConnError::Io)?;
    if n == 0 {
        return Ok(ReadOutcome::Closed);
    }
    parse_request_line(&line, ctx).map_err(ConnError::Malformed)?;

    let mut content_length = 0usize;
    let mut chunked = false;

    loop {
        let n = read_line(stream, &mut line).await.map_err(ConnError::Io)?;
        if n == 0 {
            return Err(eof("connection closed inside headers"));
        }
        let trimmed = trim_crlf(&line);
        if trimmed.is_empty() {
            break;
        }
        let Ok(text) = std::str::from_utf8(trimmed) else {
            return Err(ConnError::Malformed(ServerError::MalformedRequest(
                "header is not valid utf-8".to_owned(),
            )));
        };
        // Lines without a colon are tolerated and skipped.
        let Some((key, value)) = text.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        ctx.request_headers.push(key, value);

        if key.eq_ignore_ascii_case("Content-Length") {
            content_length = value.trim().parse::<usize>().map_err(|_| {
                ConnError::Malformed(ServerError::MalformedRequest(format!(
                    "bad content-length: {value}"
                )))
            })?;
        } else if key.eq_ignore_ascii_case("Content-Type") {
            ctx.content_type.clear();
            ctx.content_type.push_str(value);
        } else if key.eq_ignore_ascii_case("Transfer-Encoding")
            && value.trim().eq_ignore_ascii_case("chunked")
        {
            chunked = true;
        }
    }

    if content_length > 0 {
        if ctx.method == Method::HEAD || ctx.method == Method::TRACE {
            discard_exact(stream, content_length)
                .await
                .map_err(ConnError::Io)?;
        } else {
            ctx.body.resize(content_length, 0);
            stream
                .read_exact(&mut ctx.body[..])
                .await
                .map_err(ConnError::Io)?;
        }
    } else if chunked {
        read_chunked(stream, &mut line, ctx).await?;
    }

    Ok(ReadOutcome::Request)
}

fn parse_request_line(line: &[u8], ctx: &mut Context) -> Result<(), ServerError> {
    let line = trim_crlf(line);
    let text = std::str::from_utf8(line)
        .map_err(|_| ServerError::MalformedRequest("request line is not valid utf-8".to_owned()))?;

    let first_space = text
        .find(' ')
        .ok_or_else(|| ServerError::MalformedRequest("request line has no spaces".to_owned()))?;

    let method = &text[..first_space];
    ctx.method = parse_method(method)
        .ok_or_else(|| ServerError::MalformedRequest(format!("unknown method: {method}")))?;

    // The URL spans from the first space to the last one; a request line
    // without a version has only one space.
    let rest = &text[first_space + 1..];
    let url = match rest.rfind(' ') {
        Some(last) => &rest[..last],
        None => rest,
    };
    split_url(url, ctx);
    Ok(())
}

fn parse_method(method: &str) -> Option<Method> {
    match method {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        "HEAD" => Some(Method::HEAD),
        "OPTIONS" => Some(Method::OPTIONS),
        "CONNECT" => Some(Method::CONNECT),
        "TRACE" => Some(Method::TRACE),
        _ => None,
    }
}

/// `scheme://` prefix if any, `/` begins the host-less path, `?` begins the
/// query.
fn split_url(url: &str, ctx: &mut Context) {
    let mut rest = url;

    if let Some(pos) = rest.find("://") {
        ctx.scheme.push_str(&rest[..pos]);
        rest = &rest[pos + 3..];
        match rest.find('/') {
            Some(slash) => {
                ctx.host.push_str(&rest[..slash]);
                rest = &rest[slash..];
            }
            None => {
                ctx.host.push_str(rest);
                rest = "";
            }
        }
    }

    match rest.split_once('?') {
        Some((path, query)) => {
            ctx.path.push_str(path);
            ctx.query.push_str(query);
        }
        None => ctx.path.push_str(rest),
    }
}

async fn discard_exact<R: AsyncBufRead + Unpin>(stream: &mut R, len: usize) -> io::Result<()> {
    let mut scratch = [0u8; 8192];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let n = stream.read(&mut scratch[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof in body"));
        }
        remaining -= n;
    }
    Ok(())
}

/// Chunked transfer decoding: hex size line, `size` bytes, trailing CRLF per
/// chunk; a zero-size chunk ends the body.
async fn read_chunked<R: AsyncBufRead + Unpin>(
    stream: &mut R,
    line: &mut Vec<u8>,
    ctx: &mut Context,
) -> Result<(), ConnError> {
    loop {
        let n = read_line(stream, line).await.map_err(ConnError::Io)?;
        if n == 0 {
            return Err(eof("connection closed inside chunked body"));
        }
        let trimmed = trim_crlf(line);
        let text = std::str::from_utf8(trimmed).map_err(|_| {
            ConnError::Malformed(ServerError::BadChunk("chunk size is not valid utf-8".to_owned()))
        })?;
        // Chunk extensions after ';' are ignored.
        let size_part = text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_part, 16).map_err(|_| {
            ConnError::Malformed(ServerError::BadChunk(format!("invalid chunk size: {text}")))
        })?;

        if size == 0 {
            read_line(stream, line).await.map_err(ConnError::Io)?;
            return Ok(());
        }

        let start = ctx.body.len();
        ctx.body.resize(start + size, 0);
        stream
            .read_exact(&mut ctx.body[start..])
            .await
            .map_err(ConnError::Io)?;
        read_line(stream, line).await.map_err(ConnError::Io)?;
    }
}

/// Status line, optional Content-Length, response headers in insertion order
/// (duplicates preserved), terminating CRLF.
async fn write_head<W: AsyncWrite + Unpin>(
    w: &mut W,
    ctx: &Context,
    with_length: bool,
) -> io::Result<()> {
    let mut digits = itoa::Buffer::new();

    w.write_all(b"HTTP/1.1 ").await?;
    w.write_all(digits.format(ctx.status().as_u16()).as_bytes())
        .await?;
    w.write_all(b" ").await?;
    w.write_all(
        ctx.status()
            .canonical_reason()
            .unwrap_or("Unknown")
            .as_bytes(),
    )
    .await?;
    w.write_all(b"\r\n").await?;

    if with_length {
        w.write_all(b"Content-Length: ").await?;
        w.write_all(digits.format(ctx.response_body().len()).as_bytes())
            .await?;
        w.write_all(b"\r\n").await?;
    }

    for (key, value) in ctx.response_headers() {
        w.write_all(key.as_bytes()).await?;
        w.write_all(b": ").await?;
        w.write_all(value.as_bytes()).await?;
        w.write_all(b"\r\n").await?;
    }

    w.write_all(b"\r\n").await?;
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, ctx: &Context) -> io::Result<()> {
    write_head(w, ctx, true).await?;
    w.write_all(ctx.response_body()).await?;
    w.flush().await
}

/// Central error handler: log the failure under an opaque reference id and
/// answer with a minimal HTML body carrying the same id.
fn handle_error(ctx: &mut Context, err: anyhow::Error) {
    let reference = format!("{:08x}", rand::random::<u32>());
    tracing::error!(
        "handler: request failed, path={}, reference={}, error={:#}",
        ctx.path(),
        reference,
        err
    );

    if ctx.status() == StatusCode::OK {
        ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
    ctx.response_body.clear();
    ctx.write_str("<html><body><h1>Internal Server Error</h1><p>Reference: ");
    ctx.write_str(&reference);
    ctx.write_str("</p></body></html>");
}

/// Drain an event source onto the wire, flushing after every frame. A
/// message whose payload equals [`CLOSE`] ends the stream; so does closing
/// the sending half (after buffered messages are drained) or a write error.
async fn stream_events<W: AsyncWrite + Unpin>(
    w: &mut W,
    mut source: EventSource,
    config: &SseConfig,
) -> io::Result<()> {
    let mut frame = Vec::with_capacity(256);

    if config.initial_connected_event {
        format_event(&mut frame, &config.default_event_name, &Event::new("Connected"));
        w.write_all(&frame).await?;
        w.flush().await?;
    }

    while let Some(event) = source.rx.recv().await {
        if event.data == CLOSE {
            break;
        }
        format_event(&mut frame, &config.default_event_name, &event);
        w.write_all(&frame).await?;
        w.flush().await?;
    }
    Ok(())
}
