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


//! # rustmjpegserver
//!
//! A pure Rust motion-JPEG screen streaming server.
//!
//! The server captures the local display, compresses every capture as a JPEG
//! and streams the images to any number of HTTP clients as a
//! `multipart/x-mixed-replace` response. Browsers and MJPEG viewers render the
//! stream as a live, auto-refreshing picture of the screen.
//!
//! ## Features
//!
//! - **Any viewer**: plain HTTP/1.1 multipart stream, no client software needed
//! - **Per-client pipelines**: every client gets its own capture and encoder, so a
//!   slow or broken client never stalls another
//! - **Async I/O**: Built on Tokio for efficient concurrent client handling
//! - **Clean shutdown**: `stop()` closes the listener and every client socket
//! - **Optional screen backend**: real capture through `xcap` behind the
//!   `screen-capture` feature; a synthetic source works everywhere
//!
//! ## Quick Start
//!
//! ```no_run
//! use rustmjpegserver::{StreamConfig, StreamController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (controller, mut events) = StreamController::new(StreamConfig::default())?;
//!
//!     // Start listening on port 8080; returns once the port is bound
//!     controller.start(8080).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     controller.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Your Application              │
//! │                                         │
//! │  • start(port) / stop()                 │
//! │  • Receive server events                │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │        StreamController (Public)        │
//! │                                         │
//! │  • TCP listener + accept loop           │
//! │  • Session registry                     │
//! │  • Coordinated shutdown                 │
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │Client 1│ │Client 2│ │Client N│
//!   └────────┘ └────────┘ └────────┘
//!        │           │           │
//!        ▼           ▼           ▼
//!   capture → JPEG encode → multipart write
//!   (one independent pipeline per client)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod events;
pub mod multipart;
pub mod registry;

// Internal modules
mod server;
mod session;

// Re-exports
pub use capture::{Frame, FrameSource, ScreenSource, SourceFactory, SyntheticSource};
pub use config::{DisplaySelection, StreamConfig};
pub use controller::StreamController;
pub use encoder::{EncodedChunk, FrameEncoder};
pub use error::{MjpegError, Result};
pub use events::{ServerEvent, EVENT_QUEUE_CAPACITY};
pub use multipart::{MultipartWriter, PartDecoder};
pub use registry::{SessionId, SessionInfo};
pub use session::SessionState;

/// Content type announced in the response head.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;
