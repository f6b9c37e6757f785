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

//! TCP listener and accept loop.
//!
//! The accept loop is a single task. Every accepted connection becomes a
//! [`ClientSession`] spawned into a `JoinSet` owned by that task, so when the
//! loop ends, for whatever reason, it can cancel and join every session it
//! started before reporting the server as stopped.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::capture::SourceFactory;
use crate::config::StreamConfig;
use crate::error::{MjpegError, Result};
use crate::events::ServerEvent;
use crate::registry::SessionRegistry;
use crate::session::ClientSession;

// Extra time granted to the accept loop on top of the session grace period.
const SHUTDOWN_MARGIN: Duration = Duration::from_millis(500);

/// Everything the accept loop and its sessions share.
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub config: Arc<StreamConfig>,
    pub factory: SourceFactory,
    pub registry: Arc<SessionRegistry>,
    pub events: mpsc::Sender<ServerEvent>,
}

/// A bound listener with its running accept loop.
pub(crate) struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once the accept loop has exited and its sessions are gone.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops accepting, tears down every session and waits for the loop to exit.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(grace + SHUTDOWN_MARGIN, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Accept loop task failed: {}", e),
            Err(_) => {
                log::warn!("Accept loop did not stop within {:?}, aborting", grace);
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // A dropped handle must not leave the listener running.
        self.cancel.cancel();
    }
}

/// Binds `port` on the configured interface and starts the accept loop.
///
/// Returns once the listener is bound; the loop keeps running in the background.
///
/// # Errors
///
/// [`MjpegError::BindFailed`] if the listener cannot be created. Nothing is left
/// running in that case.
pub(crate) async fn listen(ctx: ServerContext, port: u16) -> Result<ServerHandle> {
    let addr = SocketAddr::new(ctx.config.bind_address, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| MjpegError::BindFailed { addr, source })?;
    let local_addr = listener.local_addr()?;

    log::info!("MJPEG server listening on {}", local_addr);
    emit(
        &ctx.events,
        ServerEvent::Listening {
            address: local_addr,
        },
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn(accept_loop(listener, ctx, cancel.clone()));

    Ok(ServerHandle {
        local_addr,
        cancel,
        task,
    })
}

async fn accept_loop(listener: TcpListener, ctx: ServerContext, cancel: CancellationToken) {
    let mut sessions = JoinSet::new();

    let error = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => spawn_session(&mut sessions, &ctx, &cancel, stream, address),
                Err(e) if is_transient(&e) => {
                    log::warn!("Transient accept error: {}", e);
                }
                Err(e) => {
                    log::error!("Accept loop failed: {}", e);
                    break Some(MjpegError::AcceptLoop(e));
                }
            },
            // Reap finished sessions as we go.
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    };

    drop(listener);
    cancel.cancel();
    let active = ctx.registry.cancel_all();
    if active > 0 {
        log::info!("Closing {} client session(s)", active);
    }
    drain_sessions(&mut sessions, ctx.config.shutdown_grace).await;

    let leftover = ctx.registry.clear();
    if leftover > 0 {
        log::warn!("{} session(s) still registered after teardown", leftover);
    }

    log::info!("MJPEG server stopped");
    emit(
        &ctx.events,
        ServerEvent::ServerStopped {
            error: error.map(|e| e.to_string()),
        },
    );
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    ctx: &ServerContext,
    parent: &CancellationToken,
    stream: TcpStream,
    address: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Failed to set TCP_NODELAY: {}", e);
    }

    let cancel = parent.child_token();
    let guard = ctx.registry.register(address, cancel.clone());
    let id = guard.id();

    #[cfg(feature = "debug-logging")]
    log::info!("Client {} connected from {}", id, address);
    #[cfg(not(feature = "debug-logging"))]
    log::info!("Client {} connected", id);

    emit(&ctx.events, ServerEvent::ClientConnected { id, address });

    let ctx = ctx.clone();
    sessions.spawn(async move {
        let config: &StreamConfig = &ctx.config;
        let (frames_sent, error) = match (ctx.factory)(config) {
            Ok(source) => {
                let summary = ClientSession::new(id, stream, config, source, cancel)
                    .run()
                    .await;
                (summary.frames_sent, summary.error)
            }
            Err(e) => {
                log::warn!("Client {}: no frame source: {}", id, e);
                (0, Some(e))
            }
        };

        drop(guard);
        log::info!("Client {} disconnected after {} frames", id, frames_sent);
        emit(
            &ctx.events,
            ServerEvent::ClientDisconnected {
                id,
                frames_sent,
                error: error.map(|e| e.to_string()),
            },
        );
    });
}

/// Joins every session, aborting the ones still running after `grace`.
async fn drain_sessions(sessions: &mut JoinSet<()>, grace: Duration) {
    let joined = tokio::time::timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if joined.is_err() {
        log::warn!(
            "{} session(s) did not stop within {:?}, aborting",
            sessions.len(),
            grace
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

/// Queues `event` without waiting. Dropped when the application is not keeping up.
fn emit(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    match events.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            log::debug!("Event queue full, dropping {:?}", event);
        }
    }
}

/// Accept errors that concern one pending connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
