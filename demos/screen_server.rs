//! Screen streaming example.
//!
//! Streams the primary monitor to every connected browser or MJPEG viewer.
//!
//! Usage:
//!   cargo run --example screen_server --features screen-capture [port] [WIDTHxHEIGHT]
//!
//! Then open http://localhost:8080/ in a browser.

use rustmjpegserver::{StreamConfig, StreamController, DEFAULT_PORT};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(arg) => arg.parse()?,
        None => DEFAULT_PORT,
    };

    let mut config = StreamConfig::default();
    if let Some(size) = args.next() {
        let (width, height) = size
            .split_once('x')
            .ok_or("output size must look like 1280x720")?;
        config = config.with_output_size(width.parse()?, height.parse()?);
    }

    let (controller, _) = StreamController::new(config)?;
    let addr = controller.start(port).await?;

    println!("Streaming the screen on http://{}/", addr);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    controller.stop().await;
    println!("Server stopped");
    Ok(())
}
