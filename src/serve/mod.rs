//! Serve Module
//!
//! Response sinks and the two streaming primitives the cache builds on:
//! serving a seekable source with byte ranges, and serving a file from disk.

pub mod channel;
mod range;

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Component, Path};

use axum::http::{
    header::{
        ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
        IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, LAST_MODIFIED, RANGE,
    },
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
};
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::debug;

pub use channel::{channel, respond, ChannelSink, PendingResponse};
pub use range::{format_http_date, parse_http_date, parse_range, ByteRange, RangeError};

/// Bytes moved per write while streaming a body.
pub const CHUNK_SIZE: usize = 32 * 1024;

// == Response Sink ==
/// Outbound side of one HTTP response.
///
/// Headers may be edited until `write_header` is called; later calls to
/// `write_header` are ignored by well-behaved sinks. Writing a body chunk
/// before any header implies `200 OK`.
pub trait ResponseSink: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

// == Request Head ==
/// The parts of an incoming request that serving depends on.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: Method,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self { method, headers }
    }

    /// A bare `GET` request.
    pub fn get() -> Self {
        Self::default()
    }

    /// Adds a header, ignoring values that are not valid header text.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// == Memory Sink ==
/// Sink that buffers the whole response. Can be told to fail after a number
/// of body bytes to simulate a client that disconnects.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `limit` body bytes, then reports a broken pipe.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            fail_after: Some(limit),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl ResponseSink for MemorySink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_header(StatusCode::OK);
        if let Some(limit) = self.fail_after {
            let room = limit.saturating_sub(self.body.len());
            if chunk.len() > room {
                self.body.extend_from_slice(&chunk[..room]);
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "client disconnected",
                ));
            }
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

// == Errors ==
/// Writes a short plain-text error response.
pub async fn write_error<S: ResponseSink>(sink: &mut S, status: StatusCode) -> io::Result<()> {
    let headers = sink.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    sink.write_header(status);
    let text = match status {
        StatusCode::NOT_FOUND => "404 page not found".to_string(),
        other => format!(
            "{} {}",
            other.as_u16(),
            other.canonical_reason().unwrap_or("Error")
        ),
    };
    sink.write(format!("{}\n", text).as_bytes()).await
}

/// True when `key` is a relative path made only of normal components.
///
/// Empty and `.` segments are refused so that each file has one key.
pub fn is_safe_path(key: &str) -> bool {
    let key = key.trim_start_matches('/');
    key.split('/').all(|segment| !matches!(segment, "" | "." | ".."))
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

// == Serve Content ==
/// Streams `size` bytes from `source` with conditional and range handling.
///
/// Sets `Last-Modified` when `modified` is known, answers `If-Modified-Since`
/// with 304, serves a single satisfiable range as 206 and an unsatisfiable one
/// as 416. Multi-range requests get the full body. `Content-Type` must already
/// be set by the caller.
pub async fn serve_content<S, R>(
    sink: &mut S,
    req: &RequestHead,
    modified: Option<DateTime<Utc>>,
    size: u64,
    source: &mut R,
) -> io::Result<()>
where
    S: ResponseSink,
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    // Header dates carry whole seconds.
    let modified = modified
        .and_then(|time| DateTime::from_timestamp(time.timestamp(), 0))
        .filter(|time| time.timestamp() > 0);

    if let Some(time) = modified {
        if let Ok(value) = HeaderValue::from_str(&format_http_date(time)) {
            sink.headers_mut().insert(LAST_MODIFIED, value);
        }
        if not_modified(req, time) {
            let headers = sink.headers_mut();
            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_LENGTH);
            headers.remove(CONTENT_ENCODING);
            sink.write_header(StatusCode::NOT_MODIFIED);
            return Ok(());
        }
    }

    let mut status = StatusCode::OK;
    let mut start = 0;
    let mut send_len = size;

    if let Some(header) = req.header(&RANGE).filter(|_| range_applies(req, modified)) {
        match parse_range(header, size) {
            Ok(ranges) if ranges.len() == 1 => {
                let range = ranges[0];
                if let Ok(value) = HeaderValue::from_str(&range.content_range(size)) {
                    sink.headers_mut().insert(CONTENT_RANGE, value);
                }
                status = StatusCode::PARTIAL_CONTENT;
                start = range.start;
                send_len = range.length;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(range = header, ?err, "Rejecting range request");
                if err == RangeError::NoOverlap {
                    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                        sink.headers_mut().insert(CONTENT_RANGE, value);
                    }
                }
                return write_error(sink, StatusCode::RANGE_NOT_SATISFIABLE).await;
            }
        }
    }

    let headers = sink.headers_mut();
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if !headers.contains_key(CONTENT_ENCODING) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(send_len));
    }
    sink.write_header(status);

    if req.method == Method::HEAD || send_len == 0 {
        return Ok(());
    }
    if start > 0 {
        source.seek(SeekFrom::Start(start)).await?;
    }

    let mut buf = vec![0u8; CHUNK_SIZE.min(send_len as usize)];
    let mut remaining = send_len;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        source.read_exact(&mut buf[..n]).await?;
        sink.write(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

fn not_modified(req: &RequestHead, modified: DateTime<Utc>) -> bool {
    if req.method != Method::GET && req.method != Method::HEAD {
        return false;
    }
    if req.headers.contains_key(IF_NONE_MATCH) {
        return false;
    }
    req.header(&IF_MODIFIED_SINCE)
        .and_then(parse_http_date)
        .map_or(false, |since| modified <= since)
}

/// `If-Range` is honored only in its date form and only on an exact match.
fn range_applies(req: &RequestHead, modified: Option<DateTime<Utc>>) -> bool {
    match req.header(&IF_RANGE) {
        None => true,
        Some(value) => match (parse_http_date(value), modified) {
            (Some(date), Some(modified)) => date == modified,
            _ => false,
        },
    }
}

// == Serve File ==
/// Streams the file at `path`, setting type, length and date headers.
///
/// Missing files and directories answer 404, unreadable ones 403 or 500.
pub async fn serve_file<S: ResponseSink>(
    sink: &mut S,
    req: &RequestHead,
    path: &Path,
) -> io::Result<()> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Cannot open file");
            return write_error(sink, status_for(&err)).await;
        }
    };
    let metadata = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return write_error(sink, StatusCode::NOT_FOUND).await,
        Err(err) => return write_error(sink, status_for(&err)).await,
    };

    let headers = sink.headers_mut();
    if !headers.contains_key(CONTENT_TYPE) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(CONTENT_TYPE, value);
        }
    }

    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    serve_content(sink, req, modified, metadata.len(), &mut file).await
}

fn status_for(err: &io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
