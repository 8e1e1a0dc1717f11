//! Graphics buffer allocator seam and an in-memory reference implementation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::capture::BufferGeometry;
use crate::error::AllocError;

/// Raw identity of a graphics buffer, as it travels in frame descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

/// Owned reference to a live graphics buffer.
///
/// Deliberately not `Clone`: whoever holds it is the only party allowed to give it
/// back to [`GraphicsAllocator::free`].
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    native: NativeHandle,
    stride: u32,
}

impl BufferHandle {
    pub fn new(native: NativeHandle, stride: u32) -> Self {
        Self { native, stride }
    }

    pub fn native(&self) -> NativeHandle {
        self.native
    }

    /// Row stride in pixels
    pub fn stride(&self) -> u32 {
        self.stride
    }
}

/// Allocates, imports, maps and frees graphics buffers.
///
/// Must be callable from any thread. The camera never calls it reentrantly.
pub trait GraphicsAllocator: Send + Sync {
    fn allocate(&self, geometry: &BufferGeometry) -> Result<BufferHandle, AllocError>;

    /// Take a reference on a buffer allocated elsewhere.
    fn import(
        &self,
        native: NativeHandle,
        geometry: &BufferGeometry,
        stride: u32,
    ) -> Result<BufferHandle, AllocError>;

    fn free(&self, handle: BufferHandle);

    /// Map the buffer for CPU writes and run `write` over its pixels (stride-padded rows).
    fn lock_pixels(
        &self,
        native: NativeHandle,
        write: &mut dyn FnMut(&mut [u32]),
    ) -> Result<(), AllocError>;
}

/// Rows are padded to a multiple of this many pixels
pub const STRIDE_ALIGNMENT: u32 = 16;

struct HeapState {
    next_id: u64,
    buffers: HashMap<NativeHandle, HeapBuffer>,
    budget: Option<usize>,
}

struct HeapBuffer {
    pixels: Vec<u32>,
}

/// Heap-backed allocator.
///
/// Handy for running the camera without graphics hardware. An optional budget caps
/// the number of live buffers; allocations past it fail with `OutOfMemory`.
pub struct HeapAllocator {
    state: Mutex<HeapState>,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState {
                next_id: 1,
                buffers: HashMap::new(),
                budget: None,
            }),
        }
    }

    pub fn with_budget(max_live: usize) -> Self {
        let allocator = Self::new();
        allocator.set_budget(Some(max_live));
        allocator
    }

    pub fn set_budget(&self, max_live: Option<usize>) {
        self.lock().budget = max_live;
    }

    pub fn live_count(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_live(&self, native: NativeHandle) -> bool {
        self.lock().buffers.contains_key(&native)
    }

    /// Copy of the buffer's contents as little-endian bytes.
    pub fn snapshot(&self, native: NativeHandle) -> Option<Bytes> {
        let state = self.lock();
        let buffer = state.buffers.get(&native)?;
        let mut bytes = BytesMut::with_capacity(buffer.pixels.len() * 4);
        for pixel in &buffer.pixels {
            bytes.put_u32_le(*pixel);
        }
        Some(bytes.freeze())
    }

    fn lock(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn aligned_stride(width: u32) -> u32 {
        width.div_ceil(STRIDE_ALIGNMENT) * STRIDE_ALIGNMENT
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapState {
    fn has_room(&self) -> bool {
        self.budget.map_or(true, |max| self.buffers.len() < max)
    }

    fn next_handle(&mut self) -> NativeHandle {
        loop {
            let native = NativeHandle(self.next_id);
            self.next_id += 1;
            if !self.buffers.contains_key(&native) {
                return native;
            }
        }
    }
}

impl GraphicsAllocator for HeapAllocator {
    fn allocate(&self, geometry: &BufferGeometry) -> Result<BufferHandle, AllocError> {
        let stride = Self::aligned_stride(geometry.width);
        if geometry.is_empty() {
            return Err(AllocError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
                stride,
            });
        }

        let mut state = self.lock();
        if !state.has_room() {
            return Err(AllocError::OutOfMemory);
        }

        let native = state.next_handle();
        let pixels = vec![0; stride as usize * geometry.height as usize];
        state.buffers.insert(native, HeapBuffer { pixels });
        debug!(?native, stride, "Allocated heap graphics buffer");
        Ok(BufferHandle::new(native, stride))
    }

    fn import(
        &self,
        native: NativeHandle,
        geometry: &BufferGeometry,
        stride: u32,
    ) -> Result<BufferHandle, AllocError> {
        if geometry.is_empty() || stride < geometry.width {
            return Err(AllocError::InvalidGeometry {
                width: geometry.width,
                height: geometry.height,
                stride,
            });
        }

        let mut state = self.lock();
        if state.buffers.contains_key(&native) {
            return Err(AllocError::DuplicateHandle(native));
        }
        if !state.has_room() {
            return Err(AllocError::OutOfMemory);
        }

        let pixels = vec![0; stride as usize * geometry.height as usize];
        state.buffers.insert(native, HeapBuffer { pixels });
        debug!(?native, stride, "Imported external graphics buffer");
        Ok(BufferHandle::new(native, stride))
    }

    fn free(&self, handle: BufferHandle) {
        if self.lock().buffers.remove(&handle.native()).is_none() {
            warn!(native = ?handle.native(), "Freeing a buffer this allocator does not own");
        }
    }

    fn lock_pixels(
        &self,
        native: NativeHandle,
        write: &mut dyn FnMut(&mut [u32]),
    ) -> Result<(), AllocError> {
        let mut state = self.lock();
        let buffer = state
            .buffers
            .get_mut(&native)
            .ok_or(AllocError::UnknownHandle(native))?;
        write(&mut buffer.pixels);
        Ok(())
    }
}
