//! HTTP file server
//!
//! Mounts the virtual filesystem under a URL prefix:
//! - `GET <prefix>/` lists buckets
//! - `GET <prefix>/<bucket>/` lists a bucket or directory
//! - `GET <prefix>/<bucket>/<key>` returns the object, honouring single
//!   byte ranges
//!
//! HEAD requests are answered by the GET routes without a body.

use std::future::Future;
use std::io::{self, SeekFrom};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::fs::{BucketFs, Entry, Handle};

/// Largest chunk read from an object per body frame
const BODY_CHUNK: u64 = 64 * 1024;

/// HTTP front end for a [`BucketFs`]
pub struct FileServer {
    config: HttpConfig,
    fs: BucketFs,
}

impl FileServer {
    /// Create a new file server
    pub fn new(config: HttpConfig, fs: BucketFs) -> Self {
        Self { config, fs }
    }

    /// Build the router (also used directly by tests)
    pub fn router(&self) -> Router {
        create_router(&self.config.prefix, self.fs.clone())
    }

    /// Run until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(
            "File server listening on {} (mounted at {})",
            self.config.bind_address, self.config.prefix
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("File server stopped");
        Ok(())
    }
}

fn create_router(prefix: &str, fs: BucketFs) -> Router {
    let prefix = prefix.trim_end_matches('/');

    let mut router = Router::new().route("/health", get(handle_health));
    if prefix.is_empty() {
        router = router
            .route("/", get(handle_root))
            .route("/*path", get(handle_path));
    } else {
        router = router
            .route(prefix, get(handle_root))
            .route(&format!("{}/", prefix), get(handle_root))
            .route(&format!("{}/*path", prefix), get(handle_path));
    }

    router.with_state(fs).layer(TraceLayer::new_for_http())
}

// ============ Handlers ============

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_root(
    State(fs): State<BucketFs>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    serve(&fs, "/", &method, &uri, &headers).await
}

async fn handle_path(
    State(fs): State<BucketFs>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    serve(&fs, &path, &method, &uri, &headers).await
}

async fn serve(fs: &BucketFs, path: &str, method: &Method, uri: &Uri, headers: &HeaderMap) -> Response {
    let mut handle = match fs.open(path).await {
        Ok(h) => h,
        Err(e) => return error_response(path, e),
    };

    let response = if handle.is_dir() {
        directory_response(&mut handle, uri)
    } else if uri.path().ends_with('/') {
        // Files are only served from their canonical, slash-less URL
        Ok(redirect(uri.path().trim_end_matches('/'), uri.query()))
    } else {
        // The body stream owns the handle and closes it once drained
        return file_response(handle, method, headers)
            .await
            .unwrap_or_else(|e| error_response(path, e));
    };

    finish(handle).await;
    response.unwrap_or_else(|e| error_response(path, e))
}

/// Close a handle whose response no longer needs it
async fn finish(handle: Handle) {
    let path = handle.path().to_string();
    if let Err(e) = handle.close().await {
        warn!("close {} failed: {}", path, e);
    }
}

fn redirect(path: &str, query: Option<&str>) -> Response {
    let target = match query {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    };
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, target)]).into_response()
}

fn directory_response(handle: &mut Handle, uri: &Uri) -> Result<Response> {
    // Relative links only resolve against a slash-terminated URL
    if !uri.path().ends_with('/') {
        return Ok(redirect(&format!("{}/", uri.path()), uri.query()));
    }

    let html = render_listing(handle.readdir(None)?);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response())
}

async fn file_response(mut handle: Handle, method: &Method, headers: &HeaderMap) -> Result<Response> {
    let (size, modified) = {
        let entry = handle.stat().await?;
        (entry.size(), entry.mod_time())
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, size))
        .unwrap_or(Ok(None));

    let (status, start, end) = match range {
        Ok(Some((start, end))) => (StatusCode::PARTIAL_CONTENT, start, end),
        Ok(None) => (StatusCode::OK, 0, size.saturating_sub(1)),
        Err(()) => {
            finish(handle).await;
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
            )
                .into_response());
        }
    };

    let len = if size == 0 { 0 } else { end - start + 1 };
    let content_type = content_type(handle.path());

    let body = if *method == Method::HEAD {
        finish(handle).await;
        Body::empty()
    } else {
        handle.seek(SeekFrom::Start(start)).await?;
        Body::from_stream(body_stream(handle, len))
    };

    let mut response = (
        status,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::LAST_MODIFIED, http_date(modified)),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response();

    if status == StatusCode::PARTIAL_CONTENT {
        if let Ok(value) = format!("bytes {}-{}/{}", start, end, size).parse() {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

/// Stream `remaining` bytes from the handle's position in chunks, closing
/// the handle after the last one. An error or a dropped body drops the
/// handle instead, which still returns it to the pool.
fn body_stream(handle: Handle, remaining: u64) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::unfold(Some((handle, remaining)), |state| async move {
        let (mut handle, remaining) = state?;
        if remaining == 0 {
            finish(handle).await;
            return None;
        }

        let mut chunk = vec![0u8; remaining.min(BODY_CHUNK) as usize];
        match handle.read(&mut chunk).await {
            Ok(0) => Some((
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "object ended early")),
                None,
            )),
            Ok(n) => {
                chunk.truncate(n);
                Some((Ok(Bytes::from(chunk)), Some((handle, remaining - n as u64))))
            }
            Err(e) => {
                warn!("read {} failed: {}", handle.path(), e);
                Some((Err(e), None))
            }
        }
    })
}

fn error_response(path: &str, e: Error) -> Response {
    if e.is_not_found() {
        return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
    }
    if let Error::InvalidPath(reason) = &e {
        debug!("rejecting {:?}: {}", path, reason);
        return (StatusCode::BAD_REQUEST, "400 Bad Request\n").into_response();
    }
    error!("serving {} failed: {}", path, e);
    (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error\n").into_response()
}

// ============ Helpers ============

/// Parse a `Range` header against an object of `size` bytes.
///
/// `Ok(None)` means serve the whole object (no `bytes=` unit, or several
/// ranges); `Err(())` means the range cannot be satisfied.
fn parse_range(value: &str, size: u64) -> std::result::Result<Option<(u64, u64)>, ()> {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let (first, last) = spec.split_once('-').ok_or(())?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the last N bytes
        let n: u64 = last.parse().map_err(|_| ())?;
        if n == 0 || size == 0 {
            return Err(());
        }
        return Ok(Some((size.saturating_sub(n), size - 1)));
    }

    let start: u64 = first.parse().map_err(|_| ())?;
    if start >= size {
        return Err(());
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        let end: u64 = last.parse().map_err(|_| ())?;
        end.min(size - 1)
    };
    if end < start {
        return Err(());
    }
    Ok(Some((start, end)))
}

fn render_listing(entries: &[Entry]) -> String {
    let mut html = String::from("<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n");
    for entry in entries {
        let mut name = entry.name().to_string();
        if entry.is_dir() {
            name.push('/');
        }
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            html_escape(&url_escape(&name)),
            html_escape(&name)
        ));
    }
    html.push_str("</pre>\n");
    html
}

/// Format a timestamp as an HTTP date (RFC 7231)
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" | "log" | "md" => "text/plain; charset=utf-8",
        "xml" => "text/xml; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// HTML-escape a string
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Percent-encode everything but unreserved characters and `/`
fn url_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
