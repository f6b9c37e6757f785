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

//! Streaming configuration.
//!
//! The server keeps no configuration files and reads no environment variables.
//! Everything is carried by a [`StreamConfig`] value handed to
//! [`StreamController::new`](crate::StreamController::new).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{MjpegError, Result};

/// Default multipart boundary token.
pub const DEFAULT_BOUNDARY: &str = "--boundary";

/// Default delay slept before every chunk.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Default upper bound on how long `stop()` waits for sessions to wind down.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Which monitor a screen source captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplaySelection {
    /// The primary monitor, or the first one if none reports as primary.
    #[default]
    Primary,
    /// Monitor at this position in the platform's enumeration order.
    Index(usize),
}

/// Configuration shared by every session of one server.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Multipart boundary token, constant for the lifetime of a session.
    pub boundary: String,
    /// Pause before each chunk is written.
    pub frame_interval: Duration,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Output dimensions. `None` or a zero component keeps native resolution.
    pub output_size: Option<(u32, u32)>,
    /// Draw the mouse pointer onto captured frames.
    pub show_pointer: bool,
    /// Monitor to capture.
    pub display: DisplaySelection,
    /// Interface the listener binds to.
    pub bind_address: IpAddr,
    /// Upper bound on session teardown during `stop()`.
    pub shutdown_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            boundary: DEFAULT_BOUNDARY.to_string(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            output_size: None,
            show_pointer: true,
            display: DisplaySelection::Primary,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl StreamConfig {
    /// Sets the multipart boundary token.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Sets the inter-frame interval.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Sets the JPEG quality.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Scales every frame to `width` x `height`.
    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_size = Some((width, height));
        self
    }

    /// Enables or disables the pointer overlay.
    pub fn with_pointer(mut self, show: bool) -> Self {
        self.show_pointer = show;
        self
    }

    /// Selects the monitor to capture.
    pub fn with_display(mut self, display: DisplaySelection) -> Self {
        self.display = display;
        self
    }

    /// Sets the interface the listener binds to.
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Sets the teardown bound used by `stop()`.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Output size with the "zero means native" rule applied.
    pub fn target_size(&self) -> Option<(u32, u32)> {
        match self.output_size {
            Some((w, h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Checks the values that would otherwise corrupt the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.boundary.is_empty() {
            return Err(MjpegError::InvalidOperation(
                "boundary token must not be empty".to_string(),
            ));
        }
        if self.boundary.contains(['\r', '\n']) {
            return Err(MjpegError::InvalidOperation(
                "boundary token must not contain line breaks".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(MjpegError::InvalidOperation(format!(
                "JPEG quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.boundary, "--boundary");
        assert_eq!(config.frame_interval, Duration::from_millis(50));
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_output_size_means_native() {
        assert_eq!(StreamConfig::default().target_size(), None);
        assert_eq!(StreamConfig::default().with_output_size(0, 600).target_size(), None);
        assert_eq!(
            StreamConfig::default().with_output_size(800, 600).target_size(),
            Some((800, 600))
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(StreamConfig::default().with_boundary("").validate().is_err());
        assert!(StreamConfig::default().with_boundary("a\r\nb").validate().is_err());
        assert!(StreamConfig::default().with_jpeg_quality(0).validate().is_err());
        assert!(StreamConfig::default().with_jpeg_quality(101).validate().is_err());
    }
}
