//! Client control surface of a camera
//!
//! Every pool and stream-state change happens under one lock. The lock is released
//! before joining the producer thread, which needs the same lock to notice it should
//! exit.

pub mod info;
pub mod state;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, instrument, warn};

use crate::buffer::{
    BufferPool, ExternalBuffer, GraphicsAllocator, NativeHandle, Resize, MIN_BUFFERS_IN_FLIGHT,
};
use crate::capture::{BufferGeometry, ProducerHandle};
use crate::error::EvsError;
use crate::pipeline::{FrameTransport, StatsSnapshot, StreamStats};
use crate::{CameraConfig, StreamConfig};

pub use info::{CameraDescription, CameraParam, ControlRange};
pub use state::StreamState;

/// State shared with the producer thread
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    /// Signalled when a stop settles back to `Stopped`
    stopped: Condvar,
    pub(crate) allocator: Arc<dyn GraphicsAllocator>,
    pub(crate) stats: StreamStats,
    pub(crate) device_id: Arc<str>,
    pub(crate) next_sequence: AtomicU64,
}

pub(crate) struct Inner {
    pub(crate) pool: BufferPool,
    pub(crate) state: StreamState,
    /// Why the producer loop ended on its own, if it did
    pub(crate) last_error: Option<EvsError>,
    producer: Option<ProducerHandle>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a stop started by another caller has joined the producer.
    fn wait_for_stop<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.stopped
            .wait_while(guard, |inner| inner.state == StreamState::Stopping)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Buffer accounting as seen by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    pub allowed: u32,
    pub in_use: u32,
}

/// One camera session, from creation until ownership is taken away.
pub struct EvsCamera {
    shared: Arc<Shared>,
    description: CameraDescription,
    controls: Vec<ControlRange>,
    target_fps: u32,
    params: Mutex<HashMap<CameraParam, i32>>,
    extended_info: Mutex<HashMap<u32, Vec<u8>>>,
}

impl EvsCamera {
    pub fn new(
        camera: &CameraConfig,
        stream: &StreamConfig,
        allocator: Arc<dyn GraphicsAllocator>,
    ) -> Self {
        info!("Creating camera {}", camera.id);

        let geometry = BufferGeometry {
            width: camera.width,
            height: camera.height,
            format: camera.format,
            usage: camera.usage,
        };
        let device_id: Arc<str> = Arc::from(camera.id.as_str());
        let pool =
            BufferPool::with_max_buffers(allocator.clone(), geometry, stream.max_buffers_in_flight);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    pool,
                    state: StreamState::Stopped,
                    last_error: None,
                    producer: None,
                }),
                stopped: Condvar::new(),
                allocator,
                stats: StreamStats::new(),
                device_id: device_id.clone(),
                next_sequence: AtomicU64::new(0),
            }),
            description: CameraDescription {
                id: device_id,
                vendor_flags: camera.vendor_flags,
                metadata: camera.metadata.clone(),
            },
            controls: camera.controls.clone(),
            target_fps: stream.target_fps,
            params: Mutex::new(HashMap::new()),
            extended_info: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_camera_info(&self) -> CameraDescription {
        self.description.clone()
    }

    /// This camera is its own only physical device.
    pub fn get_physical_camera_info(&self, _id: &str) -> CameraDescription {
        self.description.clone()
    }

    pub fn stream_state(&self) -> StreamState {
        self.shared.lock().state
    }

    pub fn buffer_status(&self) -> BufferStatus {
        let inner = self.shared.lock();
        BufferStatus {
            allowed: inner.pool.frames_allowed(),
            in_use: inner.pool.frames_in_use(),
        }
    }

    /// Handle held by each pool slot, in slot order.
    pub fn buffer_handles(&self) -> Vec<Option<NativeHandle>> {
        self.shared
            .lock()
            .pool
            .records()
            .iter()
            .map(|record| record.native())
            .collect()
    }

    /// Error that ended the current stream's frame loop early, e.g. `DeliveryFailed`.
    ///
    /// The stream stays `Running` until stopped; this tells the controller why frames
    /// stopped arriving.
    pub fn take_stream_error(&self) -> Option<EvsError> {
        self.shared.lock().last_error.take()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Set how many frames may be in flight at once.
    ///
    /// Shrinking is best effort: buffers the client still holds are not freed, and the
    /// returned [`Resize`] says how many actually were.
    #[instrument(skip(self))]
    pub fn set_max_frames_in_flight(&self, buffer_count: u32) -> Result<Resize, EvsError> {
        let mut inner = self.shared.lock();

        if inner.state == StreamState::Dead {
            error!("Ignoring setMaxFramesInFlight call when camera has been lost");
            return Err(EvsError::OwnershipLost);
        }

        if buffer_count < MIN_BUFFERS_IN_FLIGHT {
            error!("Ignoring setMaxFramesInFlight with less than one buffer requested");
            return Err(EvsError::InvalidArgument(format!(
                "buffer count {buffer_count} is below the minimum of {MIN_BUFFERS_IN_FLIGHT}"
            )));
        }

        Ok(inner.pool.set_capacity(buffer_count)?)
    }

    /// Start delivering frames to `transport` on a dedicated thread.
    #[instrument(skip(self, transport))]
    pub fn start_video_stream(&self, transport: Arc<dyn FrameTransport>) -> Result<(), EvsError> {
        let mut inner = self.shared.lock();

        if let Err(e) = inner.state.ensure_can_start() {
            error!("Ignoring startVideoStream call: {}", e);
            return Err(e);
        }

        // A client that never configured buffers gets a single one
        if inner.pool.frames_allowed() < MIN_BUFFERS_IN_FLIGHT {
            if let Err(e) = inner.pool.set_capacity(MIN_BUFFERS_IN_FLIGHT) {
                error!("Failed to start stream because we couldn't get a graphics buffer: {}", e);
                return Err(EvsError::BufferUnavailable);
            }
        }

        inner.state = StreamState::Running;
        inner.last_error = None;
        match ProducerHandle::spawn(self.shared.clone(), transport, self.target_fps) {
            Ok(producer) => {
                inner.producer = Some(producer);
                info!("Video stream started");
                Ok(())
            }
            Err(e) => {
                inner.state = StreamState::Stopped;
                error!("Failed to spawn the frame producer: {}", e);
                Err(EvsError::UnderlyingService(e.to_string()))
            }
        }
    }

    /// Stop the stream and wait for the producer thread to exit.
    ///
    /// Frames already handed to the client may still arrive. If another caller is already
    /// stopping the stream, waits for that stop to finish. Does nothing when not running.
    #[instrument(skip(self))]
    pub fn stop_video_stream(&self) {
        let producer = {
            let mut inner = self.shared.lock();
            if inner.state == StreamState::Stopping {
                debug!("Stop already in progress, waiting for it");
                drop(self.shared.wait_for_stop(inner));
                return;
            }
            if !inner.state.begin_stop() {
                return;
            }
            inner.producer.take()
        };

        debug!("Waiting for stream thread to end...");
        if let Some(producer) = producer {
            producer.join();
        }

        self.shared.lock().state.finish_stop();
        self.shared.stopped.notify_all();
        debug!("Stream marked STOPPED");
    }

    /// Hand a delivered frame's buffer back to the pool.
    ///
    /// Bad indices and double returns are logged and otherwise ignored.
    pub fn done_with_frame(&self, buffer_id: u32) -> Result<(), EvsError> {
        self.done_with_frames(&[buffer_id])
    }

    pub fn done_with_frames(&self, buffer_ids: &[u32]) -> Result<(), EvsError> {
        let mut inner = self.shared.lock();
        inner.state.ensure_alive()?;

        for buffer_id in buffer_ids {
            match inner.pool.release(*buffer_id) {
                Ok(()) => self.shared.stats.frame_returned(),
                Err(e) => {
                    error!("Ignoring doneWithFrame: {}", e);
                    self.shared.stats.invalid_return();
                }
            }
        }
        Ok(())
    }

    /// Adopt client-allocated buffers. Returns how many were accepted.
    #[instrument(skip(self, buffers), fields(offered = buffers.len()))]
    pub fn import_external_buffers(&self, buffers: &[ExternalBuffer]) -> Result<u32, EvsError> {
        let mut inner = self.shared.lock();
        inner.state.ensure_alive()?;

        if buffers.is_empty() {
            debug!("No buffers to add");
            return Ok(0);
        }
        Ok(inner.pool.import_external(buffers))
    }

    /// Another client took the camera: stop, free every buffer, and die.
    #[instrument(skip(self))]
    pub fn force_shutdown(&self) {
        // A start may slip in between the stop and the relock; stop again until it sticks
        let mut inner = loop {
            self.stop_video_stream();
            let inner = self.shared.lock();
            if !matches!(inner.state, StreamState::Running | StreamState::Stopping) {
                break inner;
            }
        };
        let freed = inner.pool.drain_all();
        inner.state.kill();
        info!(freed, "Camera shut down, ownership transferred");
    }

    pub fn pause_video_stream(&self) -> Result<(), EvsError> {
        self.shared.lock().state.ensure_alive()?;
        Err(EvsError::Unsupported)
    }

    pub fn resume_video_stream(&self) -> Result<(), EvsError> {
        self.shared.lock().state.ensure_alive()?;
        Err(EvsError::Unsupported)
    }

    /// A single client drives this camera, so claiming it always succeeds.
    pub fn set_primary_client(&self) -> Result<(), EvsError> {
        self.shared.lock().state.ensure_alive()
    }

    pub fn force_primary_client(&self) -> Result<(), EvsError> {
        self.shared.lock().state.ensure_alive()
    }

    pub fn unset_primary_client(&self) -> Result<(), EvsError> {
        self.shared.lock().state.ensure_alive()
    }

    pub fn get_parameter_list(&self) -> Vec<CameraParam> {
        self.controls.iter().map(|control| control.param).collect()
    }

    /// `(min, max, step)`, or all zeros for a control the camera lacks.
    pub fn get_int_parameter_range(&self, param: CameraParam) -> (i32, i32, i32) {
        self.controls
            .iter()
            .find(|control| control.param == param)
            .map_or(ControlRange::UNSUPPORTED, ControlRange::as_tuple)
    }

    pub fn set_int_parameter(&self, param: CameraParam, value: i32) -> Result<Vec<i32>, EvsError> {
        self.shared.lock().state.ensure_alive()?;
        if !self.controls.iter().any(|control| control.param == param) {
            warn!(?param, "Setting a parameter the camera does not advertise");
        }
        lock(&self.params).insert(param, value);
        Ok(vec![value])
    }

    pub fn get_int_parameter(&self, param: CameraParam) -> Result<Vec<i32>, EvsError> {
        self.shared.lock().state.ensure_alive()?;
        lock(&self.params)
            .get(&param)
            .map(|value| vec![*value])
            .ok_or_else(|| EvsError::InvalidArgument(format!("{param:?} has not been set")))
    }

    pub fn set_extended_info(&self, id: u32, value: i32) {
        lock(&self.extended_info).insert(id, value.to_le_bytes().to_vec());
    }

    /// Zero when nothing was stored under `id`.
    pub fn get_extended_info(&self, id: u32) -> i32 {
        let info = lock(&self.extended_info);
        let Some(stored) = info.get(&id) else {
            return 0;
        };
        let mut bytes = [0u8; 4];
        let len = stored.len().min(4);
        bytes[..len].copy_from_slice(&stored[..len]);
        i32::from_le_bytes(bytes)
    }

    pub fn set_extended_info_bytes(&self, id: u32, value: Vec<u8>) {
        lock(&self.extended_info).insert(id, value);
    }

    pub fn get_extended_info_bytes(&self, id: u32) -> Result<Vec<u8>, EvsError> {
        lock(&self.extended_info)
            .get(&id)
            .cloned()
            .ok_or_else(|| EvsError::InvalidArgument(format!("no extended info under {id:#x}")))
    }
}

impl Drop for EvsCamera {
    fn drop(&mut self) {
        self.force_shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
