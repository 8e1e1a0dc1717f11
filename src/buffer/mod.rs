pub mod allocator;
pub mod pool;

pub use allocator::{BufferHandle, GraphicsAllocator, HeapAllocator, NativeHandle};
pub use pool::{
    BufferPool, BufferRecord, CheckedOutBuffer, ExternalBuffer, Lease, Resize,
    MAX_BUFFERS_IN_FLIGHT, MIN_BUFFERS_IN_FLIGHT,
};
