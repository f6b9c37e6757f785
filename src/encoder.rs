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

//! JPEG frame encoding.
//!
//! Each captured [`Frame`] is compressed independently into an [`EncodedChunk`].
//! There is no inter-frame state; the encoder only keeps its scratch buffers
//! around so steady-state streaming does not allocate per frame.

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::capture::Frame;
use crate::error::{MjpegError, Result};

/// One JPEG-compressed frame ready to be written to a client.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// JPEG bytes.
    pub data: Bytes,
    /// Sequence number of the source frame.
    pub sequence: u64,
    /// Width of the encoded image.
    pub width: u32,
    /// Height of the encoded image.
    pub height: u32,
}

impl EncodedChunk {
    /// Length of the JPEG payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Converts frames to JPEG at a fixed quality.
pub struct FrameEncoder {
    quality: u8,
    rgb: Vec<u8>,
    out: BytesMut,
    last_len: usize,
}

impl FrameEncoder {
    /// Creates an encoder with the given JPEG quality (1-100).
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            rgb: Vec::new(),
            out: BytesMut::new(),
            last_len: 0,
        }
    }

    /// JPEG quality in use.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compresses one frame.
    ///
    /// # Errors
    ///
    /// Returns [`MjpegError::EncodeFailed`] for zero-size frames, pixel buffers that
    /// do not match the frame dimensions, or codec failures.
    pub fn encode(&mut self, frame: &Frame) -> Result<EncodedChunk> {
        if frame.width == 0 || frame.height == 0 {
            return Err(MjpegError::EncodeFailed(format!(
                "zero-size frame ({}x{})",
                frame.width, frame.height
            )));
        }
        if frame.data.len() != frame.expected_len() {
            return Err(MjpegError::EncodeFailed(format!(
                "invalid RGBA data size: expected {}, got {}",
                frame.expected_len(),
                frame.data.len()
            )));
        }

        // Convert RGBA to RGB
        self.rgb.clear();
        self.rgb.reserve(frame.data.len() / 4 * 3);
        for chunk in frame.data.chunks_exact(4) {
            self.rgb.extend_from_slice(&chunk[..3]);
        }

        // Reclaims the previous allocation once the last chunk has been dropped.
        self.out.reserve(self.last_len);

        let writer = (&mut self.out).writer();
        JpegEncoder::new_with_quality(writer, self.quality)
            .encode(&self.rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| MjpegError::EncodeFailed(e.to_string()))?;

        let data = self.out.split().freeze();
        self.last_len = data.len();

        Ok(EncodedChunk {
            data,
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, SyntheticSource};
    use std::time::Instant;

    fn solid_frame(width: u32, height: u32) -> Frame {
        Frame {
            width,
            height,
            data: [255u8, 0, 0, 255].repeat((width * height) as usize),
            sequence: 7,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let mut encoder = FrameEncoder::new(90);
        let chunk = encoder.encode(&solid_frame(2, 2)).unwrap();

        assert!(!chunk.is_empty());
        assert_eq!(chunk.len(), chunk.data.len());
        // JPEG files start with 0xFF 0xD8 and end with 0xFF 0xD9
        assert_eq!(&chunk.data[..2], &[0xFF, 0xD8]);
        assert_eq!(&chunk.data[chunk.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(chunk.sequence, 7);
    }

    #[test]
    fn test_encoder_is_reusable() {
        let mut encoder = FrameEncoder::new(75);
        let mut source = SyntheticSource::new(16, 16);
        let first = encoder.encode(&source.produce().unwrap()).unwrap();
        let second = encoder.encode(&source.produce().unwrap()).unwrap();

        // Earlier chunks stay intact after the buffer is reused.
        assert_eq!(&first.data[..2], &[0xFF, 0xD8]);
        assert_eq!(&second.data[..2], &[0xFF, 0xD8]);
        assert_eq!((first.sequence, second.sequence), (0, 1));
    }

    #[test]
    fn test_decodes_to_original_dimensions() {
        let mut encoder = FrameEncoder::new(75);
        let chunk = encoder.encode(&solid_frame(12, 5)).unwrap();
        let decoded =
            image::load_from_memory_with_format(&chunk.data, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 5));
    }

    #[test]
    fn test_zero_size_frame_fails() {
        let mut encoder = FrameEncoder::new(75);
        let frame = solid_frame(0, 0);
        assert!(matches!(encoder.encode(&frame), Err(MjpegError::EncodeFailed(_))));
    }

    #[test]
    fn test_malformed_frame_fails() {
        let mut encoder = FrameEncoder::new(75);
        let mut frame = solid_frame(4, 4);
        frame.data.truncate(10);
        assert!(matches!(encoder.encode(&frame), Err(MjpegError::EncodeFailed(_))));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(FrameEncoder::new(0).quality(), 1);
        assert_eq!(FrameEncoder::new(200).quality(), 100);
    }
}
