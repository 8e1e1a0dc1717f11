pub mod frame;
pub mod pattern;
pub mod producer;

pub use frame::{BufferGeometry, BufferUsage, FrameDescriptor, PixelFormat};
pub use producer::{ProducerHandle, DEFAULT_TARGET_FPS};
