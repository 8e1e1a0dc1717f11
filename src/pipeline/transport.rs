//! Delivery of frames and stream events to the remote consumer

use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::debug;

use crate::capture::FrameDescriptor;
use crate::error::TransportError;

/// Out-of-band stream notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// No more frames will follow
    StreamStopped { device_id: Arc<str> },
}

/// The consumer's side of a camera stream.
///
/// Both calls are synchronous from the camera's point of view and are made from the
/// producer thread without any camera lock held.
pub trait FrameTransport: Send + Sync {
    fn deliver_frame(&self, frame: &FrameDescriptor) -> Result<(), TransportError>;

    fn notify(&self, event: StreamEvent) -> Result<(), TransportError>;
}

/// What a [`ChannelTransport`] receiver sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Frame(FrameDescriptor),
    Event(StreamEvent),
}

/// Transport that hands frames to an in-process consumer over a bounded channel.
///
/// Delivery blocks while the queue is full and fails once the receiver is gone.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<StreamMessage>,
}

impl ChannelTransport {
    pub fn bounded(depth: usize) -> (Self, Receiver<StreamMessage>) {
        let (tx, rx) = flume::bounded(depth.max(1));
        (Self { tx }, rx)
    }

    fn send(&self, message: StreamMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .map_err(|_| TransportError::Disconnected)
    }
}

impl FrameTransport for ChannelTransport {
    fn deliver_frame(&self, frame: &FrameDescriptor) -> Result<(), TransportError> {
        debug!(buffer_id = frame.buffer_id, sequence = frame.sequence, "Queueing frame");
        self.send(StreamMessage::Frame(frame.clone()))
    }

    fn notify(&self, event: StreamEvent) -> Result<(), TransportError> {
        self.send(StreamMessage::Event(event))
    }
}
