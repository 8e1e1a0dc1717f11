//! EVS camera demo server: streams colour bars to an in-process consumer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use evs_camera::{ChannelTransport, Config, EvsCamera, HeapAllocator, StreamEvent, StreamMessage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evs_camera=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("EVS camera launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    evs_camera::CONFIG.store(Arc::new(config));
    let config = evs_camera::CONFIG.load_full();

    let allocator = Arc::new(HeapAllocator::new());
    let camera = Arc::new(EvsCamera::new(&config.camera, &config.stream, allocator));
    info!("Serving camera: {:?}", camera.get_camera_info());

    camera
        .set_max_frames_in_flight(config.stream.initial_buffer_count)
        .map_err(|e| eyre!("Failed to configure buffers: {}", e))?;

    let (transport, rx) = ChannelTransport::bounded(config.stream.transport_queue_depth);
    camera
        .start_video_stream(Arc::new(transport))
        .map_err(|e| eyre!("Failed to start stream: {}", e))?;

    // Consumer: hold each frame briefly, then give its buffer back
    let consumer_camera = camera.clone();
    let consumer = tokio::spawn(async move {
        while let Ok(message) = rx.recv_async().await {
            match message {
                StreamMessage::Frame(frame) => {
                    info!(
                        "Frame #{} in buffer {} ({}x{}, stride {})",
                        frame.sequence,
                        frame.buffer_id,
                        frame.geometry.width,
                        frame.geometry.height,
                        frame.stride
                    );
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    if let Err(e) = consumer_camera.done_with_frame(frame.buffer_id) {
                        warn!("Could not return frame: {}", e);
                        break;
                    }
                }
                StreamMessage::Event(StreamEvent::StreamStopped { device_id }) => {
                    info!("Stream from {} stopped", device_id);
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping stream");

    // Stopping joins the producer thread; keep it off the async workers
    let shutdown_camera = camera.clone();
    tokio::task::spawn_blocking(move || shutdown_camera.stop_video_stream()).await?;

    if let Err(e) = consumer.await {
        error!("Consumer task failed: {}", e);
    }

    info!("Stream stats: {:?}", camera.stats());
    camera.force_shutdown();

    info!("EVS camera shutting down");
    Ok(())
}
