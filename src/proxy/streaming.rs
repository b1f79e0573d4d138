//! Simulated streaming
//!
//! The default-forward branch buffers the whole upstream response and then
//! re-emits it to the client as fixed-size chunks at a fixed cadence:
//! - the full body is collected before any client byte is written
//! - chunks are consecutive slices of the body, the last one may be shorter
//! - the client always gets `200`, `text/plain`, `Cache-Control: no-cache`

use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use hyper::{header, Body, HeaderMap, Response, StatusCode};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Chunk cadence for simulated streaming
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub chunk_size: usize,
    pub interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4,
            interval: Duration::from_millis(100),
        }
    }
}

impl RelayConfig {
    pub fn from_config(streaming_config: &crate::config::settings::StreamingConfig) -> Self {
        Self {
            chunk_size: streaming_config.chunk_size,
            interval: streaming_config.interval(),
        }
    }
}

/// Upstream response collected in full
#[derive(Debug)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    /// Accumulate the upstream body chunk by chunk until it ends
    pub async fn collect(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }

        Ok(Self {
            status,
            headers,
            body: body.freeze(),
        })
    }

    /// Re-emit the body as a simulated stream. Upstream status and headers
    /// are dropped; the client always sees `200`.
    pub fn into_simulated_stream(self, config: &RelayConfig) -> Response<Body> {
        debug!(
            "📦 Re-streaming {} bytes (upstream status {} discarded) in {}-byte chunks every {:?}",
            self.body.len(),
            self.status,
            config.chunk_size,
            config.interval
        );
        simulated_stream_response(self.body, config)
    }
}

/// Split `body` into consecutive `chunk_size` slices. Slices share the
/// underlying buffer.
pub fn split_chunks(body: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    (0..body.len())
        .step_by(chunk_size)
        .map(|start| body.slice(start..(start + chunk_size).min(body.len())))
        .collect()
}

/// One chunk per tick, the first one tick after the stream is created.
/// The stream ends right after the last chunk.
pub fn chunk_stream(body: Bytes, config: &RelayConfig) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunks = split_chunks(&body, config.chunk_size).into_iter();
    let ticker = if config.interval.is_zero() {
        None
    } else {
        let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    };

    stream::unfold((chunks, ticker), |(mut chunks, mut ticker)| async move {
        let chunk = chunks.next()?;
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }
        Some((Ok(chunk), (chunks, ticker)))
    })
}

pub fn simulated_stream_response(body: Bytes, config: &RelayConfig) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::TRANSFER_ENCODING, "chunked")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::wrap_stream(chunk_stream(body, config)))
        .unwrap()
}
