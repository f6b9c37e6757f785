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

//! `multipart/x-mixed-replace` framing.
//!
//! # Wire Format
//!
//! Response head, sent once per connection:
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: multipart/x-mixed-replace; boundary=<token>\r\n
//! \r\n
//! ```
//!
//! Every frame:
//!
//! ```text
//! \r\n
//! <token>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```
//!
//! The delimiter line is the token itself. With the default token `--boundary`
//! this is the exact byte layout existing MJPEG viewers of this stream expect.
//! A token occurring inside JPEG data is not escaped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::encoder::EncodedChunk;
use crate::error::{MjpegError, Result};
use crate::STREAM_CONTENT_TYPE;

/// Content type of every part.
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

// Longest header block the decoder buffers before giving up.
const MAX_HEAD_LEN: usize = 8 * 1024;

/// Writes the response head for `boundary` into `buf`.
pub fn put_response_head(buf: &mut BytesMut, boundary: &str) {
    buf.put_slice(b"HTTP/1.1 200 OK\r\n");
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(STREAM_CONTENT_TYPE.as_bytes());
    buf.put_slice(b"; boundary=");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"\r\n\r\n");
}

/// Writes the per-part preamble (everything before the JPEG bytes) into `buf`.
pub fn put_part_preamble(buf: &mut BytesMut, boundary: &str, content_length: usize) {
    buf.put_slice(b"\r\n");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(PART_CONTENT_TYPE.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(format!("Content-Length: {content_length}\r\n").as_bytes());
    buf.put_slice(b"\r\n");
}

/// Frames encoded chunks onto an async byte stream.
pub struct MultipartWriter<W> {
    stream: W,
    boundary: String,
    scratch: BytesMut,
    header_written: bool,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> MultipartWriter<W> {
    /// Creates a writer using `boundary` for the lifetime of the stream.
    pub fn new(stream: W, boundary: impl Into<String>) -> Self {
        Self {
            stream,
            boundary: boundary.into(),
            scratch: BytesMut::with_capacity(128),
            header_written: false,
            closed: false,
        }
    }

    /// Boundary token in use.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// True once the response head has been sent.
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Sends the response head and flushes it.
    ///
    /// # Errors
    ///
    /// [`MjpegError::InvalidOperation`] if the head was already written,
    /// [`MjpegError::TransportClosed`] if the write fails.
    pub async fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Err(MjpegError::InvalidOperation(
                "response head already written".to_string(),
            ));
        }

        self.scratch.clear();
        put_response_head(&mut self.scratch, &self.boundary);
        self.stream
            .write_all(&self.scratch)
            .await
            .map_err(MjpegError::TransportClosed)?;
        self.stream.flush().await.map_err(MjpegError::TransportClosed)?;

        self.header_written = true;
        Ok(())
    }

    /// Sends one part and flushes it so the client can render it immediately.
    ///
    /// # Errors
    ///
    /// [`MjpegError::InvalidOperation`] before [`write_header`](Self::write_header),
    /// [`MjpegError::TransportClosed`] if the write fails.
    pub async fn write_chunk(&mut self, chunk: &EncodedChunk) -> Result<()> {
        if !self.header_written {
            return Err(MjpegError::InvalidOperation(
                "chunk written before response head".to_string(),
            ));
        }

        self.scratch.clear();
        put_part_preamble(&mut self.scratch, &self.boundary, chunk.len());
        self.stream
            .write_all(&self.scratch)
            .await
            .map_err(MjpegError::TransportClosed)?;
        self.stream
            .write_all(&chunk.data)
            .await
            .map_err(MjpegError::TransportClosed)?;
        self.stream
            .write_all(b"\r\n")
            .await
            .map_err(MjpegError::TransportClosed)?;
        self.stream.flush().await.map_err(MjpegError::TransportClosed)
    }

    /// Shuts down the write half. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            log::debug!("Stream shutdown: {}", e);
        }
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> W {
        self.stream
    }
}

/// Parsed response head of a multipart stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Boundary parameter of the `Content-Type` header.
    pub boundary: String,
}

/// One decoded part.
#[derive(Debug, Clone)]
pub struct Part {
    /// `Content-Type` header of the part.
    pub content_type: String,
    /// Part payload, exactly `Content-Length` bytes.
    pub body: Bytes,
}

/// Incremental client-side decoder for the stream produced by [`MultipartWriter`].
///
/// Feed received bytes into a `BytesMut` and call the decode methods until they
/// return `Ok(None)`, which means more input is needed.
#[derive(Debug, Clone)]
pub struct PartDecoder {
    delimiter: String,
}

impl PartDecoder {
    /// Creates a decoder expecting `delimiter` as the line opening every part.
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    /// Decodes the HTTP response head.
    pub fn decode_head(buf: &mut BytesMut) -> Result<Option<ResponseHead>> {
        let Some(end) = find(buf, b"\r\n\r\n") else {
            return too_long(buf.len());
        };

        let text = std::str::from_utf8(&buf[..end])
            .map_err(|_| MjpegError::Protocol("response head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let status = status_line
            .strip_prefix("HTTP/1.1 ")
            .or_else(|| status_line.strip_prefix("HTTP/1.0 "))
            .and_then(|rest| rest.split(' ').next())
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| MjpegError::Protocol(format!("bad status line: {status_line:?}")))?;

        let mut boundary = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(MjpegError::Protocol(format!("bad header line: {line:?}")));
            };
            if !name.trim().eq_ignore_ascii_case("content-type") {
                continue;
            }
            let mut params = value.split(';').map(str::trim);
            if params.next() != Some(STREAM_CONTENT_TYPE) {
                return Err(MjpegError::Protocol(format!("unexpected content type: {value:?}")));
            }
            boundary = params
                .filter_map(|p| p.strip_prefix("boundary="))
                .map(|b| b.trim_matches('"').to_string())
                .next();
        }

        let boundary =
            boundary.ok_or_else(|| MjpegError::Protocol("missing boundary".to_string()))?;
        buf.advance(end + 4);
        Ok(Some(ResponseHead { status, boundary }))
    }

    /// Decodes the next part, checking its `Content-Length` against the payload.
    pub fn decode_part(&self, buf: &mut BytesMut) -> Result<Option<Part>> {
        let mut start = 0;
        while buf[start..].starts_with(b"\r\n") {
            start += 2;
        }

        let Some(head_len) = find(&buf[start..], b"\r\n\r\n") else {
            return too_long(buf.len() - start);
        };
        let head = std::str::from_utf8(&buf[start..start + head_len])
            .map_err(|_| MjpegError::Protocol("part head is not UTF-8".to_string()))?;
        let mut lines = head.split("\r\n");

        let delimiter = lines.next().unwrap_or_default();
        if delimiter != self.delimiter {
            return Err(MjpegError::Protocol(format!(
                "expected delimiter {:?}, got {:?}",
                self.delimiter, delimiter
            )));
        }

        let mut content_type = None;
        let mut content_length = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(MjpegError::Protocol(format!("bad part header: {line:?}")));
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| MjpegError::Protocol(format!("bad content length: {value:?}")))?;
                content_length = Some(len);
            }
        }
        let content_length = content_length
            .ok_or_else(|| MjpegError::Protocol("part without Content-Length".to_string()))?;

        let body_start = start + head_len + 4;
        let part_end = body_start
            .checked_add(content_length)
            .and_then(|end| end.checked_add(2))
            .ok_or_else(|| {
                MjpegError::Protocol(format!("content length out of range: {content_length}"))
            })?;
        if buf.len() < part_end {
            return Ok(None);
        }
        if &buf[part_end - 2..part_end] != b"\r\n" {
            return Err(MjpegError::Protocol(
                "payload does not end where Content-Length says".to_string(),
            ));
        }

        buf.advance(body_start);
        let body = buf.split_to(content_length).freeze();
        buf.advance(2);

        Ok(Some(Part {
            content_type: content_type.unwrap_or_default(),
            body,
        }))
    }
}

fn too_long<T>(len: usize) -> Result<Option<T>> {
    if len > MAX_HEAD_LEN {
        Err(MjpegError::Protocol(format!(
            "no header terminator within {MAX_HEAD_LEN} bytes"
        )))
    } else {
        Ok(None)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio_test::io::Builder;

    const HEAD: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=--boundary\r\n\r\n";

    fn chunk(data: &'static [u8]) -> EncodedChunk {
        EncodedChunk {
            data: Bytes::from_static(data),
            sequence: 0,
            width: 1,
            height: 1,
        }
    }

    #[tokio::test]
    async fn test_header_bytes() {
        let mock = Builder::new().write(HEAD).build();
        let mut writer = MultipartWriter::new(mock, "--boundary");
        writer.write_header().await.unwrap();
        assert!(writer.header_written());
    }

    #[tokio::test]
    async fn test_chunk_bytes() {
        let mock = Builder::new()
            .write(HEAD)
            .write(b"\r\n--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n")
            .write(b"\xFF\xD8abc")
            .write(b"\r\n")
            .build();
        let mut writer = MultipartWriter::new(mock, "--boundary");
        writer.write_header().await.unwrap();
        writer.write_chunk(&chunk(b"\xFF\xD8abc")).await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_boundary() {
        let mock = Builder::new()
            .write(b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n")
            .write(b"\r\nframe\r\nContent-Type: image/jpeg\r\nContent-Length: 1\r\n\r\n")
            .write(b"x")
            .write(b"\r\n")
            .build();
        let mut writer = MultipartWriter::new(mock, "frame");
        writer.write_header().await.unwrap();
        writer.write_chunk(&chunk(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_chunk_before_header_rejected() {
        let mock = Builder::new().build();
        let mut writer = MultipartWriter::new(mock, "--boundary");
        let result = writer.write_chunk(&chunk(b"x")).await;
        assert!(matches!(result, Err(MjpegError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let mock = Builder::new().write(HEAD).build();
        let mut writer = MultipartWriter::new(mock, "--boundary");
        writer.write_header().await.unwrap();
        assert!(matches!(
            writer.write_header().await,
            Err(MjpegError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_write_error_is_transport_closed() {
        let mock = Builder::new()
            .write(HEAD)
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut writer = MultipartWriter::new(mock, "--boundary");
        writer.write_header().await.unwrap();
        let err = writer.write_chunk(&chunk(b"abc")).await.unwrap_err();
        assert!(matches!(err, MjpegError::TransportClosed(_)));
        assert!(err.is_session_scoped());
    }

    #[test]
    fn test_decode_head() {
        let mut buf = BytesMut::from(HEAD);
        let head = PartDecoder::decode_head(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.boundary, "--boundary");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_head_incomplete() {
        let mut buf = BytesMut::from(&HEAD[..20]);
        assert!(PartDecoder::decode_head(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 20);
    }

    #[test]
    fn test_decode_parts() {
        let mut buf = BytesMut::new();
        put_part_preamble(&mut buf, "--boundary", 3);
        buf.put_slice(b"abc\r\n");
        put_part_preamble(&mut buf, "--boundary", 2);
        buf.put_slice(b"de\r\n");

        let decoder = PartDecoder::new("--boundary");
        let first = decoder.decode_part(&mut buf).unwrap().unwrap();
        assert_eq!(first.content_type, "image/jpeg");
        assert_eq!(&first.body[..], b"abc");
        let second = decoder.decode_part(&mut buf).unwrap().unwrap();
        assert_eq!(&second.body[..], b"de");
        assert!(decoder.decode_part(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_part_waits() {
        let mut buf = BytesMut::new();
        put_part_preamble(&mut buf, "--boundary", 10);
        buf.put_slice(b"abc");
        let decoder = PartDecoder::new("--boundary");
        assert!(decoder.decode_part(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut buf = BytesMut::new();
        put_part_preamble(&mut buf, "--boundary", 2);
        buf.put_slice(b"abcd\r\n");
        let decoder = PartDecoder::new("--boundary");
        assert!(matches!(decoder.decode_part(&mut buf), Err(MjpegError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = BytesMut::from(
            &b"\r\n--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: 18446744073709551615\r\n\r\nabc\r\n"[..],
        );
        let decoder = PartDecoder::new("--boundary");
        assert!(matches!(decoder.decode_part(&mut buf), Err(MjpegError::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_delimiter() {
        let mut buf = BytesMut::new();
        put_part_preamble(&mut buf, "--other", 1);
        buf.put_slice(b"a\r\n");
        let decoder = PartDecoder::new("--boundary");
        assert!(matches!(decoder.decode_part(&mut buf), Err(MjpegError::Protocol(_))));
    }
}
