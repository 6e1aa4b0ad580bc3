#![allow(dead_code)]

use std::net::SocketAddr;

use arbor::Server;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Start a server on an OS-assigned loopback port and return its address.
pub async fn start(configure: impl FnOnce(&mut Server)) -> SocketAddr {
    let mut server = Server::new();
    server.config_mut().listen = "127.0.0.1:0".to_string();
    configure(&mut server);

    let (tx, rx) = oneshot::channel();
    server.ready_signal(tx);
    tokio::spawn(server.serve());

    rx.await.expect("server failed to signal readiness")
}

pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.expect("connect"))
}

/// Write raw request bytes and read exactly one framed response.
pub async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> RawResponse {
    let mut stream = connect(addr).await;
    stream.write_all(raw).await.expect("write request");
    stream.flush().await.expect("flush request");
    read_response(&mut stream).await
}

/// Read one `Content-Length`-framed response off the stream.
pub async fn read_response(stream: &mut BufReader<TcpStream>) -> RawResponse {
    let mut line = String::new();
    stream.read_line(&mut line).await.expect("status line");
    let status: u16 = line
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        stream.read_line(&mut header).await.expect("header line");
        let trimmed = header.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((k, v)) = trimmed.split_once(':') {
            headers.push((k.to_owned(), v.trim_start().to_owned()));
        }
    }

    let length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse().expect("numeric content-length"))
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.expect("body");

    RawResponse {
        status,
        headers,
        body,
    }
}

/// Convenience GET against a path.
pub async fn get(addr: SocketAddr, path: &str) -> RawResponse {
    let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    roundtrip(addr, raw.as_bytes()).await
}
