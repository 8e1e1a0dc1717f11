//! Fixed-cap pool of graphics buffers shared between the producer and the consumer
//!
//! Records are identified by position. A record either holds no buffer, holds a free
//! buffer, or holds a buffer checked out under a lease. The pool keeps
//! `frames_in_use <= frames_allowed` and exactly `frames_allowed` records holding a
//! buffer at all times; every failure path restores those counts before returning.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::buffer::{BufferHandle, GraphicsAllocator, NativeHandle};
use crate::capture::BufferGeometry;
use crate::error::{PoolError, ReturnRejection};

/// Hard cap on buffers a camera may own
pub const MAX_BUFFERS_IN_FLIGHT: u32 = 100;

/// A stream cannot run with fewer buffers than this
pub const MIN_BUFFERS_IN_FLIGHT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

/// Checkout state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    Free,
    CheckedOut(LeaseId),
}

#[derive(Debug)]
pub struct BufferRecord {
    handle: Option<BufferHandle>,
    lease: Lease,
}

impl BufferRecord {
    fn holding(handle: BufferHandle) -> Self {
        Self {
            handle: Some(handle),
            lease: Lease::Free,
        }
    }

    pub fn native(&self) -> Option<NativeHandle> {
        self.handle.as_ref().map(BufferHandle::native)
    }

    pub fn in_use(&self) -> bool {
        matches!(self.lease, Lease::CheckedOut(_))
    }

    pub fn lease(&self) -> Lease {
        self.lease
    }

    fn is_free(&self) -> bool {
        self.handle.is_some() && self.lease == Lease::Free
    }
}

/// A buffer handed out by [`BufferPool::acquire_free`].
///
/// Not `Clone`: the producer gives it back at most once, through [`BufferPool::reclaim`].
/// A consumer that received the frame returns it by index instead.
#[derive(Debug)]
#[must_use = "a checked-out buffer stays in use until it is returned"]
pub struct CheckedOutBuffer {
    index: u32,
    lease: LeaseId,
    native: NativeHandle,
    stride: u32,
}

impl CheckedOutBuffer {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn native(&self) -> NativeHandle {
        self.native
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}

/// Buffer supplied by a client for [`BufferPool::import_external`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalBuffer {
    pub native: NativeHandle,
    pub geometry: BufferGeometry,
    pub stride: u32,
}

/// Outcome of [`BufferPool::set_capacity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    Unchanged,
    Grew { added: u32 },
    /// `released` falls short of `requested` when buffers were still checked out.
    Shrank { requested: u32, released: u32 },
}

pub struct BufferPool {
    allocator: Arc<dyn GraphicsAllocator>,
    geometry: BufferGeometry,
    max_buffers: u32,
    records: Vec<BufferRecord>,
    frames_allowed: u32,
    frames_in_use: u32,
    next_lease: u64,
}

impl BufferPool {
    pub fn new(allocator: Arc<dyn GraphicsAllocator>, geometry: BufferGeometry) -> Self {
        Self::with_max_buffers(allocator, geometry, MAX_BUFFERS_IN_FLIGHT)
    }

    /// `max_buffers` is clamped to [`MAX_BUFFERS_IN_FLIGHT`].
    pub fn with_max_buffers(
        allocator: Arc<dyn GraphicsAllocator>,
        geometry: BufferGeometry,
        max_buffers: u32,
    ) -> Self {
        Self {
            allocator,
            geometry,
            max_buffers: max_buffers.clamp(MIN_BUFFERS_IN_FLIGHT, MAX_BUFFERS_IN_FLIGHT),
            records: Vec::new(),
            frames_allowed: 0,
            frames_in_use: 0,
            next_lease: 0,
        }
    }

    pub fn geometry(&self) -> &BufferGeometry {
        &self.geometry
    }

    pub fn max_buffers(&self) -> u32 {
        self.max_buffers
    }

    pub fn frames_allowed(&self) -> u32 {
        self.frames_allowed
    }

    pub fn frames_in_use(&self) -> u32 {
        self.frames_in_use
    }

    pub fn records(&self) -> &[BufferRecord] {
        &self.records
    }

    /// Grow or shrink toward `target` buffers.
    ///
    /// Growth is all-or-nothing. Shrinking only frees buffers that are not checked out,
    /// so it may release fewer than requested.
    pub fn set_capacity(&mut self, target: u32) -> Result<Resize, PoolError> {
        if !(MIN_BUFFERS_IN_FLIGHT..=self.max_buffers).contains(&target) {
            error!(
                target,
                max = self.max_buffers,
                "Rejecting buffer count outside the allowed range"
            );
            return Err(PoolError::CapacityOutOfRange {
                requested: target,
                max: self.max_buffers,
            });
        }

        let resize = if self.frames_allowed < target {
            let needed = target - self.frames_allowed;
            info!("Allocating {} buffers for camera frames", needed);

            let added = self.grow(needed);
            if added.len() as u32 != needed {
                error!("Rolling back to previous frame queue size");
                self.release_slots(&added);
                return Err(PoolError::AllocationFailed {
                    requested: needed,
                    added: added.len() as u32,
                });
            }
            Resize::Grew { added: needed }
        } else if self.frames_allowed > target {
            let requested = self.frames_allowed - target;
            info!("Returning {} camera frame buffers", requested);

            let released = self.shrink(requested);
            if released != requested {
                warn!(
                    requested,
                    released, "Buffer queue shrink fell short, too many buffers in use"
                );
            }
            Resize::Shrank {
                requested,
                released,
            }
        } else {
            Resize::Unchanged
        };

        self.publish_capacity();
        Ok(resize)
    }

    /// Check out the lowest-indexed free buffer.
    ///
    /// `None` means every allowed buffer is in flight; the caller skips this frame.
    pub fn acquire_free(&mut self) -> Option<CheckedOutBuffer> {
        if self.frames_in_use >= self.frames_allowed {
            return None;
        }

        let free = self
            .records
            .iter()
            .enumerate()
            .find_map(|(index, record)| match (&record.handle, record.lease) {
                (Some(handle), Lease::Free) => Some((index, handle.native(), handle.stride())),
                _ => None,
            });
        let Some((index, native, stride)) = free else {
            error!(
                in_use = self.frames_in_use,
                allowed = self.frames_allowed,
                "Failed to find an available buffer slot"
            );
            return None;
        };

        let lease = LeaseId(self.next_lease);
        self.next_lease += 1;
        self.records[index].lease = Lease::CheckedOut(lease);
        self.frames_in_use += 1;

        Some(CheckedOutBuffer {
            index: index as u32,
            lease,
            native,
            stride,
        })
    }

    /// Return the buffer at `index`, as a consumer does once it is done with a frame.
    pub fn release(&mut self, index: u32) -> Result<(), PoolError> {
        self.validate_return(index, None)?;
        self.mark_free(index as usize);
        Ok(())
    }

    /// Return a buffer that was checked out but never handed to the consumer.
    pub fn reclaim(&mut self, buffer: CheckedOutBuffer) -> Result<(), PoolError> {
        self.validate_return(buffer.index, Some(buffer.lease))?;
        self.mark_free(buffer.index as usize);
        Ok(())
    }

    /// Adopt buffers allocated elsewhere; returns how many were added.
    ///
    /// Never pushes the pool past its cap. Buffers the allocator refuses are skipped.
    pub fn import_external(&mut self, buffers: &[ExternalBuffer]) -> u32 {
        let room = self.max_buffers.saturating_sub(self.frames_allowed) as usize;
        if buffers.len() > room {
            warn!(
                offered = buffers.len(),
                room, "Exceeded the buffer limit, importing only part of the set"
            );
        }

        let mut added = 0;
        for external in buffers.iter().take(room) {
            match self
                .allocator
                .import(external.native, &external.geometry, external.stride)
            {
                Ok(handle) => {
                    self.store(handle);
                    added += 1;
                }
                Err(e) => warn!(native = ?external.native, "Failed to import a buffer: {}", e),
            }
        }

        self.publish_capacity();
        added
    }

    /// Free every buffer, checked out or not. Returns how many were freed.
    pub fn drain_all(&mut self) -> u32 {
        let mut freed = 0;
        for (index, record) in self.records.drain(..).enumerate() {
            if record.in_use() {
                error!(index, "Releasing buffer despite remote ownership");
            }
            if let Some(handle) = record.handle {
                self.allocator.free(handle);
                freed += 1;
            }
        }

        self.frames_allowed = 0;
        self.frames_in_use = 0;
        self.publish_capacity();
        freed
    }

    fn grow(&mut self, count: u32) -> Vec<usize> {
        let mut added = Vec::with_capacity(count as usize);
        while (added.len() as u32) < count {
            match self.allocator.allocate(&self.geometry) {
                Ok(handle) => added.push(self.store(handle)),
                Err(e) => {
                    error!(
                        "Error allocating {} x {} graphics buffer: {}",
                        self.geometry.width, self.geometry.height, e
                    );
                    break;
                }
            }
        }
        added
    }

    fn shrink(&mut self, count: u32) -> u32 {
        let mut released = 0;
        for index in 0..self.records.len() {
            if released == count {
                break;
            }
            if self.records[index].is_free() {
                self.release_slot(index);
                released += 1;
            }
        }
        released
    }

    /// Put `handle` in the lowest empty slot, appending if there is none.
    fn store(&mut self, handle: BufferHandle) -> usize {
        let index = match self.records.iter().position(|r| r.handle.is_none()) {
            Some(index) => {
                self.records[index] = BufferRecord::holding(handle);
                index
            }
            None => {
                self.records.push(BufferRecord::holding(handle));
                self.records.len() - 1
            }
        };
        self.frames_allowed += 1;
        index
    }

    fn release_slots(&mut self, indices: &[usize]) {
        for index in indices {
            self.release_slot(*index);
        }
    }

    fn release_slot(&mut self, index: usize) {
        let record = &mut self.records[index];
        if let Some(handle) = record.handle.take() {
            record.lease = Lease::Free;
            self.allocator.free(handle);
            self.frames_allowed -= 1;
        }
    }

    fn validate_return(&self, index: u32, lease: Option<LeaseId>) -> Result<(), PoolError> {
        let rejection = match self.records.get(index as usize) {
            None => Some(ReturnRejection::OutOfRange),
            Some(record) if record.handle.is_none() => Some(ReturnRejection::NoHandle),
            Some(record) => match (record.lease, lease) {
                (Lease::Free, _) => Some(ReturnRejection::AlreadyFree),
                (Lease::CheckedOut(held), Some(offered)) if held != offered => {
                    Some(ReturnRejection::StaleLease)
                }
                (Lease::CheckedOut(_), _) => None,
            },
        };

        match rejection {
            Some(reason) => Err(PoolError::InvalidReturn { index, reason }),
            None => Ok(()),
        }
    }

    fn mark_free(&mut self, index: usize) {
        self.records[index].lease = Lease::Free;
        self.frames_in_use -= 1;

        // Capacity shrank while this buffer was out: move it down into an empty slot
        if index as u32 >= self.frames_allowed {
            if let Some(empty) = self.records.iter().position(|r| r.handle.is_none()) {
                let handle = self.records[index].handle.take();
                self.records[empty].handle = handle;
                self.records[empty].lease = Lease::Free;
                debug!(from = index, to = empty, "Relocated returned buffer");
            }
        }
    }

    fn publish_capacity(&self) {
        metrics::gauge!("evs_buffers_allowed").set(self.frames_allowed as f64);
    }

    /// Panics if the bookkeeping counters disagree with the records.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let in_use = self.records.iter().filter(|r| r.in_use()).count() as u32;
        let present = self.records.iter().filter(|r| r.handle.is_some()).count() as u32;
        assert!(self.frames_in_use <= self.frames_allowed);
        assert!(self.frames_allowed as usize <= self.records.len());
        assert_eq!(in_use, self.frames_in_use);
        assert_eq!(present, self.frames_allowed);
        assert!(self
            .records
            .iter()
            .all(|r| r.handle.is_some() || !r.in_use()));
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            self.drain_all();
        }
    }
}
