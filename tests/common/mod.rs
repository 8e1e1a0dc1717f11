#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};

use evs_camera::camera::BufferStatus;
use evs_camera::error::TransportError;
use evs_camera::{
    Config, EvsCamera, FrameDescriptor, FrameTransport, HeapAllocator, StreamEvent,
};

/// Transport double that records deliveries and can start failing after a number of frames.
pub struct ScriptedTransport {
    frames: Sender<FrameDescriptor>,
    events: Sender<StreamEvent>,
    attempts: AtomicUsize,
    fail_from: Option<usize>,
}

pub struct Observed {
    pub frames: Receiver<FrameDescriptor>,
    pub events: Receiver<StreamEvent>,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, Observed) {
        Self::build(None)
    }

    /// Deliveries succeed for the first `ok_frames` attempts and fail afterwards.
    pub fn failing_after(ok_frames: usize) -> (Arc<Self>, Observed) {
        Self::build(Some(ok_frames))
    }

    fn build(fail_from: Option<usize>) -> (Arc<Self>, Observed) {
        let (frames_tx, frames_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();
        let transport = Arc::new(Self {
            frames: frames_tx,
            events: events_tx,
            attempts: AtomicUsize::new(0),
            fail_from,
        });
        (
            transport,
            Observed {
                frames: frames_rx,
                events: events_rx,
            },
        )
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl FrameTransport for ScriptedTransport {
    fn deliver_frame(&self, frame: &FrameDescriptor) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|limit| attempt >= limit) {
            return Err(TransportError::Disconnected);
        }
        let _ = self.frames.send(frame.clone());
        Ok(())
    }

    fn notify(&self, event: StreamEvent) -> Result<(), TransportError> {
        let _ = self.events.send(event);
        Ok(())
    }
}

/// Transport whose deliveries park until the test opens the gate.
pub struct GatedTransport {
    entered: Sender<u32>,
    gate: Receiver<()>,
}

pub struct Gate {
    /// Buffer id of each delivery as it starts waiting
    pub entered: Receiver<u32>,
    open_tx: Sender<()>,
}

impl GatedTransport {
    pub fn new() -> (Arc<Self>, Gate) {
        let (entered_tx, entered_rx) = flume::unbounded();
        let (open_tx, open_rx) = flume::unbounded();
        (
            Arc::new(Self {
                entered: entered_tx,
                gate: open_rx,
            }),
            Gate {
                entered: entered_rx,
                open_tx,
            },
        )
    }
}

impl Gate {
    /// Let every pending and future delivery through.
    pub fn open(self) {
        drop(self.open_tx);
    }
}

impl FrameTransport for GatedTransport {
    fn deliver_frame(&self, frame: &FrameDescriptor) -> Result<(), TransportError> {
        let _ = self.entered.send(frame.buffer_id);
        // Only ever disconnects, which is the signal to proceed
        let _ = self.gate.recv();
        Ok(())
    }

    fn notify(&self, _event: StreamEvent) -> Result<(), TransportError> {
        Ok(())
    }
}

pub fn camera_with_fps(target_fps: u32) -> (EvsCamera, Arc<HeapAllocator>) {
    let mut config = Config::default();
    config.camera.width = 64;
    config.camera.height = 16;
    config.stream.target_fps = target_fps;
    let allocator = Arc::new(HeapAllocator::new());
    let camera = EvsCamera::new(&config.camera, &config.stream, allocator.clone());
    (camera, allocator)
}

pub fn status(allowed: u32, in_use: u32) -> BufferStatus {
    BufferStatus { allowed, in_use }
}

pub const WAIT: Duration = Duration::from_secs(2);
