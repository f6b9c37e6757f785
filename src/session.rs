// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-client streaming session.
//!
//! A session owns one connection and its own capture/encode pipeline:
//!
//! ```text
//! Starting ──header──▶ Streaming ──error / cancel──▶ Closed
//!                        │    ▲
//!                        └────┘ produce → encode → pace → write
//! ```
//!
//! Every await point races the session's cancellation token, so a session
//! blocked in a socket write or in the pacing sleep is released immediately
//! when the server stops. The socket and pipeline are owned values and are
//! dropped on every exit path.

use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::capture::FrameSource;
use crate::config::StreamConfig;
use crate::encoder::{EncodedChunk, FrameEncoder};
use crate::error::{MjpegError, Result};
use crate::multipart::MultipartWriter;
use crate::registry::SessionId;

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Response head not yet written.
    Starting,
    /// Writing frames.
    Streaming,
    /// Terminal: connection closed and pipeline released.
    Closed,
}

/// Capture and encode stages owned by a single session.
struct Pipeline {
    source: Box<dyn FrameSource>,
    encoder: FrameEncoder,
}

impl Pipeline {
    fn next_chunk(&mut self) -> Result<EncodedChunk> {
        let frame = self.source.produce()?;
        self.encoder.encode(&frame)
    }
}

/// How a session ended.
#[derive(Debug)]
pub(crate) struct SessionSummary {
    pub frames_sent: u64,
    pub error: Option<MjpegError>,
}

/// Streams frames to one client until the connection fails or it is cancelled.
pub(crate) struct ClientSession<S> {
    id: SessionId,
    writer: MultipartWriter<S>,
    pipeline: Option<Pipeline>,
    interval: Duration,
    cancel: CancellationToken,
    state: SessionState,
    frames_sent: u64,
}

impl<S: AsyncWrite + Unpin + Send> ClientSession<S> {
    pub(crate) fn new(
        id: SessionId,
        stream: S,
        config: &StreamConfig,
        source: Box<dyn FrameSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            writer: MultipartWriter::new(stream, config.boundary.clone()),
            pipeline: Some(Pipeline {
                source,
                encoder: FrameEncoder::new(config.jpeg_quality),
            }),
            interval: config.frame_interval,
            cancel,
            state: SessionState::Starting,
            frames_sent: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion. Never fails: errors end up in the summary.
    pub(crate) async fn run(mut self) -> SessionSummary {
        let result = self.stream().await;
        self.close().await;

        let error = match result {
            Ok(()) => {
                log::debug!("Client {}: session cancelled", self.id);
                None
            }
            Err(MjpegError::TransportClosed(e)) => {
                log::info!("Client {}: connection closed ({})", self.id, e);
                Some(MjpegError::TransportClosed(e))
            }
            Err(e) => {
                log::warn!("Client {}: session failed: {}", self.id, e);
                Some(e)
            }
        };

        SessionSummary {
            frames_sent: self.frames_sent,
            error,
        }
    }

    /// Header, then the frame loop. Returns `Ok(())` only on cancellation.
    async fn stream(&mut self) -> Result<()> {
        let cancel = self.cancel.clone();

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = self.writer.write_header() => result?,
        }
        self.state = SessionState::Streaming;
        log::debug!("Client {}: streaming", self.id);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = next_chunk(&mut self.pipeline) => result?,
            };

            if !self.interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.writer.write_chunk(&chunk) => result?,
            }
            self.frames_sent += 1;

            if self.frames_sent % 100 == 0 {
                log::debug!("Client {}: {} frames sent", self.id, self.frames_sent);
            }
        }
    }

    /// Releases the pipeline and shuts the connection down. Idempotent.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.pipeline = None;
        self.writer.close().await;
    }
}

/// Captures and encodes one frame on the blocking pool.
///
/// The pipeline is moved into the blocking task and put back afterwards. If the
/// session is cancelled meanwhile, the slot stays empty and the pipeline is
/// dropped as soon as the capture in flight returns.
async fn next_chunk(slot: &mut Option<Pipeline>) -> Result<EncodedChunk> {
    let mut pipeline = slot
        .take()
        .ok_or_else(|| MjpegError::InvalidOperation("pipeline already released".to_string()))?;

    let (pipeline, result) = tokio::task::spawn_blocking(move || {
        let result = pipeline.next_chunk();
        (pipeline, result)
    })
    .await
    .map_err(|e| MjpegError::CaptureUnavailable(format!("capture task failed: {e}")))?;

    *slot = Some(pipeline);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, SyntheticSource};
    use crate::multipart::PartDecoder;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct FailingSource {
        remaining: usize,
        inner: SyntheticSource,
    }

    impl FrameSource for FailingSource {
        fn produce(&mut self) -> Result<Frame> {
            if self.remaining == 0 {
                return Err(MjpegError::CaptureUnavailable("display went away".to_string()));
            }
            self.remaining -= 1;
            self.inner.produce()
        }
    }

    fn config() -> StreamConfig {
        StreamConfig::default().with_frame_interval(Duration::from_millis(1))
    }

    async fn read_more(client: &mut DuplexStream, buf: &mut BytesMut) -> usize {
        let mut tmp = [0u8; 4096];
        let n = client.read(&mut tmp).await.unwrap();
        buf.extend_from_slice(&tmp[..n]);
        n
    }

    #[tokio::test]
    async fn test_streams_header_then_decodable_frames() {
        let (server, mut client) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let session = ClientSession::new(
            1,
            server,
            &config(),
            Box::new(SyntheticSource::new(4, 4)),
            cancel.clone(),
        );
        let task = tokio::spawn(session.run());

        let mut buf = BytesMut::new();
        let head = loop {
            if let Some(head) = PartDecoder::decode_head(&mut buf).unwrap() {
                break head;
            }
            read_more(&mut client, &mut buf).await;
        };
        assert_eq!(head.status, 200);
        assert_eq!(head.boundary, "--boundary");

        let decoder = PartDecoder::new(head.boundary);
        let mut parts = Vec::new();
        while parts.len() < 3 {
            match decoder.decode_part(&mut buf).unwrap() {
                Some(part) => parts.push(part),
                None => {
                    read_more(&mut client, &mut buf).await;
                }
            }
        }

        for part in &parts {
            assert_eq!(part.content_type, "image/jpeg");
            let image =
                image::load_from_memory_with_format(&part.body, image::ImageFormat::Jpeg).unwrap();
            assert_eq!((image.width(), image.height()), (4, 4));
        }

        cancel.cancel();
        let summary = task.await.unwrap();
        assert!(summary.error.is_none());
        assert!(summary.frames_sent >= 3);
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_writer() {
        // Tiny pipe that nobody reads: the session blocks in a write.
        let (server, _client) = tokio::io::duplex(16);
        let cancel = CancellationToken::new();
        let session = ClientSession::new(
            2,
            server,
            &config(),
            Box::new(SyntheticSource::new(32, 32)),
            cancel.clone(),
        );
        let task = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(summary.error.is_none());
        assert_eq!(summary.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_ends_session() {
        let (server, client) = tokio::io::duplex(1024);
        let session = ClientSession::new(
            3,
            server,
            &config(),
            Box::new(SyntheticSource::new(16, 16)),
            CancellationToken::new(),
        );
        drop(client);

        let summary = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .expect("session did not notice the disconnect");
        assert!(matches!(summary.error, Some(MjpegError::TransportClosed(_))));
    }

    #[tokio::test]
    async fn test_capture_failure_closes_session() {
        let (server, mut client) = tokio::io::duplex(64 * 1024);
        let source = FailingSource {
            remaining: 2,
            inner: SyntheticSource::new(4, 4),
        };
        let session =
            ClientSession::new(4, server, &config(), Box::new(source), CancellationToken::new());

        let summary = session.run().await;
        assert!(matches!(summary.error, Some(MjpegError::CaptureUnavailable(_))));
        assert_eq!(summary.frames_sent, 2);

        // Header and both frames made it out before the stream was closed.
        let mut buf = BytesMut::new();
        while read_more(&mut client, &mut buf).await > 0 {}
        assert!(PartDecoder::decode_head(&mut buf).unwrap().is_some());
        let decoder = PartDecoder::new("--boundary");
        assert!(decoder.decode_part(&mut buf).unwrap().is_some());
        assert!(decoder.decode_part(&mut buf).unwrap().is_some());
        assert!(decoder.decode_part(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (server, _client) = tokio::io::duplex(1024);
        let mut session = ClientSession::new(
            5,
            server,
            &config(),
            Box::new(SyntheticSource::new(4, 4)),
            CancellationToken::new(),
        );
        assert_eq!(session.state(), SessionState::Starting);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.pipeline.is_none());
    }
}
