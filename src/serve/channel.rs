//! Channel-backed sink that turns sink writes into a streaming axum response

use std::convert::Infallible;
use std::future::Future;
use std::io;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::ResponseSink;

/// Body chunks buffered between the writer and the client.
const BODY_CHANNEL_DEPTH: usize = 8;

// == Channel Sink ==
/// Writer half: the status line and headers go out once, body chunks follow
/// through a bounded channel. A send failure means the client went away.
#[derive(Debug)]
pub struct ChannelSink {
    headers: HeaderMap,
    head: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    body: mpsc::Sender<Bytes>,
}

/// Reader half, awaited by the HTTP handler.
#[derive(Debug)]
pub struct PendingResponse {
    head: oneshot::Receiver<(StatusCode, HeaderMap)>,
    body: mpsc::Receiver<Bytes>,
}

/// Creates a connected sink/response pair.
pub fn channel() -> (ChannelSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    (
        ChannelSink {
            headers: HeaderMap::new(),
            head: Some(head_tx),
            body: body_tx,
        },
        PendingResponse {
            head: head_rx,
            body: body_rx,
        },
    )
}

impl ResponseSink for ChannelSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if let Some(head) = self.head.take() {
            let headers = std::mem::take(&mut self.headers);
            if head.send((status, headers)).is_err() {
                debug!(%status, "Response dropped before headers were sent");
            }
        }
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_header(StatusCode::OK);
        self.body
            .send(Bytes::copy_from_slice(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }
}

impl PendingResponse {
    /// Waits for the headers and returns a response streaming the body.
    ///
    /// If the writer finishes without sending anything the response is an
    /// empty `200 OK`.
    pub async fn into_response(self) -> Response {
        let (status, headers) = match self.head.await {
            Ok(head) => head,
            Err(_) => return StatusCode::OK.into_response(),
        };
        let stream = futures::stream::unfold(self.body, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Runs `work` on its own task with a fresh sink and answers with whatever it
/// writes. The task keeps running for as long as the client reads the body.
pub async fn respond<F, Fut>(work: F) -> Response
where
    F: FnOnce(ChannelSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (sink, pending) = channel();
    tokio::spawn(work(sink));
    pending.into_response().await
}
