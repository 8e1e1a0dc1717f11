pub mod stats;
pub mod transport;

pub use stats::{StatsSnapshot, StreamStats};
pub use transport::{ChannelTransport, FrameTransport, StreamEvent, StreamMessage};
