//! Frame producer thread
//!
//! One per running stream. Each cycle checks out a free buffer under the camera lock,
//! paints the test pattern and delivers the frame with the lock released, then paces
//! itself to the target rate. The stop signal only wakes the pacing wait; the loop
//! exits when it sees the stream is no longer `Running`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, info_span, warn};

use crate::buffer::CheckedOutBuffer;
use crate::camera::Shared;
use crate::capture::pattern;
use crate::capture::{BufferGeometry, FrameDescriptor};
use crate::error::TransportError;
use crate::pipeline::{FrameTransport, StreamEvent};

/// Frame rate used when none is configured
pub const DEFAULT_TARGET_FPS: u32 = 15;

/// Pause between frames for a target rate; zero means the default rate.
pub fn frame_interval(target_fps: u32) -> Duration {
    let fps = if target_fps == 0 {
        DEFAULT_TARGET_FPS
    } else {
        target_fps
    };
    Duration::from_secs(1) / fps
}

/// Owner of a running producer thread
pub struct ProducerHandle {
    thread: JoinHandle<()>,
    stop_tx: Sender<()>,
}

impl ProducerHandle {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        transport: Arc<dyn FrameTransport>,
        target_fps: u32,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = flume::bounded(1);
        let producer = FrameProducer {
            interval: frame_interval(target_fps),
            shared,
            transport,
            stop_rx,
        };

        let thread = thread::Builder::new()
            .name("evs-producer".into())
            .spawn(move || producer.run())?;

        Ok(Self { thread, stop_tx })
    }

    /// Wake the producer and wait until its thread has exited.
    ///
    /// The caller must already have moved the stream out of `Running` and must not hold
    /// the camera lock.
    pub fn join(self) {
        let _ = self.stop_tx.try_send(());
        if self.thread.join().is_err() {
            error!("Frame producer thread panicked");
        }
    }
}

struct FrameProducer {
    interval: Duration,
    shared: Arc<Shared>,
    transport: Arc<dyn FrameTransport>,
    stop_rx: Receiver<()>,
}

impl FrameProducer {
    fn run(self) {
        let _span = info_span!("producer", camera = %self.shared.device_id).entered();
        info!("Frame generation loop started");

        loop {
            let started = Instant::now();

            let checked_out = {
                let mut inner = self.shared.lock();
                if !inner.state.is_running() {
                    break;
                }
                let geometry = *inner.pool.geometry();
                let buffer = inner.pool.acquire_free();
                if buffer.is_none() {
                    warn!("Skipped a frame because too many are in flight");
                    self.shared.stats.frame_skipped();
                }
                buffer.map(|buffer| (buffer, geometry))
            };

            if let Some((buffer, geometry)) = checked_out {
                if let Err(e) = self.produce(&buffer, geometry) {
                    // Likely the client died; stop generating calls that will keep failing
                    error!("Frame delivery call failed in the transport layer: {}", e);
                    self.shared.stats.delivery_failed();

                    let mut inner = self.shared.lock();
                    if let Err(e) = inner.pool.reclaim(buffer) {
                        error!("Could not reclaim undelivered buffer: {}", e);
                    }
                    inner.last_error = Some(e.into());
                    break;
                }
            }

            self.pace(started);
        }

        let event = StreamEvent::StreamStopped {
            device_id: self.shared.device_id.clone(),
        };
        if let Err(e) = self.transport.notify(event) {
            error!("Error delivering end of stream marker: {}", e);
        }
        info!("Frame generation loop ended");
    }

    fn produce(
        &self,
        buffer: &CheckedOutBuffer,
        geometry: BufferGeometry,
    ) -> Result<(), TransportError> {
        let frame = FrameDescriptor {
            geometry,
            stride: buffer.stride(),
            handle: buffer.native(),
            buffer_id: buffer.index(),
            sequence: self.shared.next_sequence.fetch_add(1, Ordering::Relaxed),
            timestamp_us: now_micros(),
            device_id: self.shared.device_id.clone(),
        };

        let fill_started = Instant::now();
        let filled = self.shared.allocator.lock_pixels(frame.handle, &mut |pixels: &mut [u32]| {
            pattern::fill_color_bars(pixels, geometry.width, geometry.height, frame.stride);
        });
        if let Err(e) = filled {
            error!("Camera failed to gain access to image buffer for writing: {}", e);
        }
        let fill_time = fill_started.elapsed();

        self.transport.deliver_frame(&frame)?;
        debug!("Delivered {:?} as id {}", frame.handle, frame.buffer_id);
        self.shared.stats.frame_delivered(fill_time);
        Ok(())
    }

    /// Sleep out the rest of the frame interval, waking early on a stop signal.
    fn pace(&self, started: Instant) {
        let Some(remaining) = self.interval.checked_sub(started.elapsed()) else {
            return;
        };
        match self.stop_rx.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(remaining),
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
