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

//! Start/stop control surface.
//!
//! [`StreamController`] is what a UI (or any embedding application) talks to.
//! `start` and `stop` are serialized by an async mutex, so concurrent calls
//! never observe a half-started server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::capture::{screen_source_factory, SourceFactory};
use crate::config::StreamConfig;
use crate::error::{MjpegError, Result};
use crate::events::{ServerEvent, EVENT_QUEUE_CAPACITY};
use crate::registry::{SessionInfo, SessionRegistry};
use crate::server::{self, ServerContext, ServerHandle};

/// Owns at most one running MJPEG server.
///
/// # Example
///
/// ```no_run
/// use rustmjpegserver::{StreamConfig, StreamController};
///
/// # async fn run() -> rustmjpegserver::Result<()> {
/// // Events are not needed here, so the receiver is dropped.
/// let (controller, _) = StreamController::new(StreamConfig::default())?;
/// let addr = controller.start(8080).await?;
/// println!("Open http://{addr}/ in a browser");
/// controller.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamController {
    ctx: ServerContext,
    server: Mutex<Option<ServerHandle>>,
}

impl StreamController {
    /// Creates a controller that streams the local display.
    ///
    /// Returns the controller and the receiving end of its event channel.
    pub fn new(config: StreamConfig) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        Self::with_source_factory(config, screen_source_factory())
    }

    /// Creates a controller whose sessions get their frames from `factory`.
    pub fn with_source_factory(
        config: StreamConfig,
        factory: SourceFactory,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        config.validate()?;
        let (events, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let controller = Self {
            ctx: ServerContext {
                config: Arc::new(config),
                factory,
                registry: Arc::new(SessionRegistry::new()),
                events,
            },
            server: Mutex::new(None),
        };
        Ok((controller, rx))
    }

    /// Configuration shared by all sessions.
    pub fn config(&self) -> &StreamConfig {
        &self.ctx.config
    }

    /// Starts listening on `port`, stopping a running server first.
    ///
    /// Returns the bound address as soon as the listener is up; connections are
    /// accepted in the background.
    ///
    /// # Errors
    ///
    /// [`MjpegError::InvalidPort`] for port 0 and [`MjpegError::BindFailed`] if
    /// the port cannot be bound. In both cases the server is left stopped.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        if port == 0 {
            return Err(MjpegError::InvalidPort(port));
        }

        let mut server = self.server.lock().await;
        if let Some(running) = server.take() {
            log::info!("Restarting MJPEG server on port {}", port);
            self.shutdown(running).await;
        }

        let handle = server::listen(self.ctx.clone(), port).await?;
        let addr = handle.local_addr();
        *server = Some(handle);
        Ok(addr)
    }

    /// Stops the server: closes the listener and every client connection.
    ///
    /// Does nothing if the server is not running. Waits at most
    /// [`StreamConfig::shutdown_grace`] for sessions before aborting them.
    pub async fn stop(&self) {
        let mut server = self.server.lock().await;
        if let Some(running) = server.take() {
            self.shutdown(running).await;
        }
    }

    async fn shutdown(&self, handle: ServerHandle) {
        log::info!("Stopping MJPEG server on {}", handle.local_addr());
        handle.shutdown(self.ctx.config.shutdown_grace).await;
        self.ctx.registry.clear();
    }

    /// True while the listener is accepting connections.
    pub async fn is_running(&self) -> bool {
        self.server
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Address of the running listener.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .await
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(ServerHandle::local_addr)
    }

    /// Number of connected clients.
    pub fn session_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Snapshot of the connected clients.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.ctx.registry.snapshot()
    }
}
