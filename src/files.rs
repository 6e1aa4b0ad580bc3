use std::path::{Path, PathBuf};

use http::{Method, StatusCode};

use crate::handler::handler;
use crate::server::Server;

/// Extensions that are offered as downloads instead of rendered inline.
const DOWNLOADABLE: &[&str] = &[
    "7z", "apk", "bin", "deb", "dmg", "exe", "gz", "iso", "jar", "msi", "rar", "rpm", "tar",
    "zip",
];

/// Serve files from `directory` under `url_prefix`.
///
/// Registers a `GET <url_prefix>/*path` route. The wildcard capture, minus
/// `strip_tokens` leading path tokens, is joined onto `directory`; the file
/// is read with a MIME type derived from its extension. Downloadable
/// extensions additionally get `Content-Disposition` and cache headers.
/// Traversal segments (`..`) and misses answer 404.
pub fn serve_files(
    server: &mut Server,
    url_prefix: &str,
    directory: impl Into<PathBuf>,
    strip_tokens: usize,
) {
    let root: PathBuf = directory.into();
    let pattern = format!("{}/*path", url_prefix.trim_end_matches('/'));

    server.route(
        Method::GET,
        &pattern,
        handler(move |ctx| {
            let root = root.clone();
            Box::pin(async move {
                let capture = ctx.param("path").to_owned();
                let Some(relative) = strip_and_sanitize(&capture, strip_tokens) else {
                    ctx.set_status(StatusCode::NOT_FOUND);
                    ctx.write_str("Not Found");
                    return Ok(());
                };

                let full = root.join(&relative);
                match tokio::fs::read(&full).await {
                    Ok(bytes) => {
                        let mime = mime_guess::from_path(&full).first_or_octet_stream();
                        ctx.set_header("Content-Type", mime.essence_str());
                        if is_downloadable(&full) {
                            let filename = full
                                .file_name()
                                .and_then(|n| n.to_str())
                                .unwrap_or("download");
                            ctx.set_header(
                                "Content-Disposition",
                                &format!("attachment; filename=\"{filename}\""),
                            );
                            ctx.set_header("Cache-Control", "public, max-age=31536000, immutable");
                        }
                        ctx.write(&bytes);
                    }
                    Err(e) => {
                        tracing::debug!(
                            "files: read failed, path={}, error={}",
                            full.display(),
                            e
                        );
                        ctx.set_status(StatusCode::NOT_FOUND);
                        ctx.write_str("Not Found");
                    }
                }
                Ok(())
            })
        }),
    );
}

/// Drop `strip` leading tokens from the capture and refuse traversal
/// segments. Returns the cleaned relative path.
fn strip_and_sanitize(capture: &str, strip: usize) -> Option<String> {
    let mut tokens = capture.split('/').filter(|t| !t.is_empty());
    for _ in 0..strip {
        tokens.next()?;
    }

    let mut parts = Vec::new();
    for token in tokens {
        if token == ".." || token == "." {
            return None;
        }
        parts.push(token);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn is_downloadable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOWNLOADABLE.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
