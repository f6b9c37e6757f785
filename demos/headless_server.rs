//! Headless MJPEG server example with animated content.
//!
//! This example streams a generated gradient instead of the real display,
//! demonstrating the server in a headless environment without screen capture.
//!
//! Usage:
//!   cargo run --example headless_server [port]
//!
//! Then open http://localhost:8080/ in a browser.

use rustmjpegserver::capture::synthetic_source_factory;
use rustmjpegserver::{ServerEvent, StreamConfig, StreamController, DEFAULT_PORT};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    let (controller, mut events) = StreamController::with_source_factory(
        StreamConfig::default(),
        synthetic_source_factory(WIDTH, HEIGHT),
    )?;

    let addr = controller.start(port).await?;
    println!("Streaming a {}x{} test pattern on http://{}/", WIDTH, HEIGHT, addr);
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ServerEvent::ClientConnected { id, address }) => {
                    println!("Client {} connected from {}", id, address);
                }
                Some(ServerEvent::ClientDisconnected { id, frames_sent, .. }) => {
                    println!("Client {} left after {} frames", id, frames_sent);
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    controller.stop().await;
    println!("Server stopped");
    Ok(())
}
