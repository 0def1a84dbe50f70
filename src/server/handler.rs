// Axum request handler: serves torrent file bytes to the player with Range support.

use std::io::{self, SeekFrom};
use std::net::Ipv4Addr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::detect::mime::mime_for_path;
use crate::engine::state::WeakState;
use crate::error::{Result, SessionError};
use crate::transfer::traits::Priority;

/// Read buffer used when copying file bytes into the response body.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Pause before surfacing a mid-body read error to the connection.
const ERROR_FLUSH_DELAY: Duration = Duration::from_millis(50);

pub struct StreamServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Bind the first free loopback port in `[base, base + span)` and start serving.
    pub async fn start(state: WeakState, base: u16, span: u16) -> Result<Self> {
        let listener = bind_first_free(base, span).await?;
        let port = listener
            .local_addr()
            .map_err(|e| SessionError::listener("reading listener address", e))?
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .route("/stream", get(stream_handler))
            .with_state(state);

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        info!("HTTP server started on port {}", port);
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build the URL a player uses to stream one file of a transfer.
    pub fn url_for(&self, hash: &str, file_index: usize) -> String {
        format!(
            "http://127.0.0.1:{}/stream?hash={}&file={}",
            self.port, hash, file_index
        )
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// responses before aborting them.
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(
                    "HTTP server on port {} did not drain within {:?}, aborting",
                    self.port, grace
                );
                task.abort();
            }
        }
        debug!("HTTP server on port {} stopped", self.port);
    }
}

/// Bind `127.0.0.1` on the first port of the scan range that is free.
/// A `base` of 0 asks the OS for an ephemeral port instead.
pub async fn bind_first_free(base: u16, span: u16) -> Result<TcpListener> {
    if base == 0 {
        return TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| SessionError::listener("binding streaming listener", e));
    }

    for offset in 0..span {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("port {} unavailable: {}", port, e),
        }
    }
    Err(SessionError::NoPortAvailable { base, span })
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedRange {
    StartEnd {
        start: u64,
        end_inclusive: Option<u64>,
    },
    Suffix {
        len: u64,
    },
}

/// Parse a Range header value.
/// Supports:
/// - bytes=start-end
/// - bytes=start-
/// - bytes=-suffix_len
fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let value = value.trim();
    let rest = value.strip_prefix("bytes=")?;
    let mut parts = rest.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    if start_str.is_empty() {
        let len: u64 = end_str.parse().ok()?;
        if len == 0 {
            return None;
        }
        Some(ParsedRange::Suffix { len })
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end_inclusive = if end_str.is_empty() {
            None
        } else {
            Some(end_str.parse::<u64>().ok()?)
        };
        Some(ParsedRange::StartEnd {
            start,
            end_inclusive,
        })
    }
}

/// Turn a parsed range into inclusive `(start, end)` offsets within a file of
/// `total` bytes. `None` means the whole file is served.
fn resolve_range(range: Option<ParsedRange>, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let last = total - 1;
    match range? {
        ParsedRange::StartEnd {
            start,
            end_inclusive,
        } => {
            if start > last {
                return None;
            }
            let end = end_inclusive.unwrap_or(last).min(last);
            (end >= start).then_some((start, end))
        }
        ParsedRange::Suffix { len } => Some((total.saturating_sub(len), last)),
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    hash: Option<String>,
    file: Option<String>,
}

/// GET /stream?hash=<id>&file=<index>: serve one file with Range support.
async fn stream_handler(
    State(state): State<WeakState>,
    Query(params): Query<StreamParams>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let (hash, file_param) = match (params.hash, params.file) {
        (Some(hash), Some(file)) if !hash.is_empty() && !file.is_empty() => (hash, file),
        _ => {
            return (StatusCode::BAD_REQUEST, "Missing hash or file parameter").into_response();
        }
    };

    // Only the lookup happens under the session lock; streaming runs without it.
    let handle = match state.upgrade() {
        Some(state) => {
            let guard = state.lock().await;
            guard.lookup(&hash)
        }
        None => None,
    };
    let handle = match handle {
        Some(h) => h,
        None => return (StatusCode::NOT_FOUND, "Torrent not found").into_response(),
    };

    let requested: i64 = match file_param.parse() {
        Ok(i) => i,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid file index").into_response(),
    };
    let files = handle.files();
    let found = usize::try_from(requested)
        .ok()
        .and_then(|i| files.get(i).map(|file| (i, file)));
    let Some((index, file)) = found else {
        let err = SessionError::FileIndexOutOfRange {
            index: requested,
            count: files.len(),
        };
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    };

    let total = file.length;
    let content_type = mime_for_path(&file.display_path);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);
    let (start, end, is_partial) = match resolve_range(range, total) {
        Some((start, end)) => (start, end, true),
        None => (0, total.saturating_sub(1), false),
    };
    let body_len = if total == 0 { 0 } else { end - start + 1 };

    debug!(
        "stream request hash={} file={} range=[{}, {}] partial={}",
        hash, index, start, end, is_partial
    );

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    let status = if is_partial {
        // Content-Range: bytes start-end/total (end is inclusive in HTTP).
        let content_range = format!("bytes {}-{}/{}", start, end, total);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            resp_headers.insert(header::CONTENT_RANGE, value);
        }
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    if method == Method::HEAD || body_len == 0 {
        return (status, resp_headers).into_response();
    }

    // Pull the pieces under the playhead first.
    handle.set_priority(index, Priority::High);

    let mut reader = match handle.open_reader(index).await {
        Ok(r) => r,
        Err(e) => {
            error!("open stream for {}#{} failed: {:#}", hash, index, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error opening file stream")
                .into_response();
        }
    };
    if start > 0 {
        if let Err(e) = reader.seek(SeekFrom::Start(start)).await {
            error!("seek to {} in {}#{} failed: {}", start, hash, index, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error seeking file stream")
                .into_response();
        }
    }

    let mut reader = reader.take(body_len);

    // Nothing is committed until the first chunk is in hand, so a failure
    // here can still be answered with a status.
    let mut first = BytesMut::with_capacity(STREAM_CHUNK_BYTES.min(body_len as usize));
    match reader.read_buf(&mut first).await {
        Ok(0) => {
            error!("stream for {}#{} ended before byte {}", hash, index, start);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading file stream")
                .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            error!("first read of {}#{} failed: {}", hash, index, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading file stream")
                .into_response();
        }
    }

    // The reader is dropped when the body finishes or the client goes away.
    let rest = ReaderStream::with_capacity(reader, STREAM_CHUNK_BYTES);
    let body = stream::iter([Ok::<Bytes, io::Error>(first.freeze())])
        .chain(rest)
        .then(|chunk| async move {
            if chunk.is_err() {
                // An erroring body aborts the connection; let already
                // buffered bytes reach the socket first.
                tokio::time::sleep(ERROR_FLUSH_DELAY).await;
            }
            chunk
        })
        .inspect_err(move |e| warn!("error streaming {}#{}: {}", hash, index, e));

    (status, resp_headers, Body::from_stream(body)).into_response()
}
