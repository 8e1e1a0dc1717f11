use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use proptest::prelude::*;

use evs_camera::buffer::{BufferPool, CheckedOutBuffer, ExternalBuffer, HeapAllocator, Lease};
use evs_camera::capture::{BufferGeometry, BufferUsage, PixelFormat};
use evs_camera::error::{PoolError, ReturnRejection};
use evs_camera::NativeHandle;

const MAX: u32 = 12;

fn geometry() -> BufferGeometry {
    BufferGeometry {
        width: 16,
        height: 4,
        format: PixelFormat::Rgba8888,
        usage: BufferUsage::CAMERA_DEFAULT,
    }
}

#[derive(Debug, Clone)]
enum Op {
    SetCapacity(u32),
    Acquire,
    Return(u32),
    Reclaim,
    Import(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..=MAX + 1).prop_map(Op::SetCapacity),
        Just(Op::Acquire),
        (0..MAX + 2).prop_map(Op::Return),
        Just(Op::Reclaim),
        (0usize..4).prop_map(Op::Import),
    ]
}

fn assert_invariants(pool: &BufferPool, allocator: &HeapAllocator) {
    let records = pool.records();
    let in_use = records.iter().filter(|r| r.in_use()).count() as u32;
    let present = records.iter().filter(|r| r.native().is_some()).count() as u32;

    assert!(pool.frames_in_use() <= pool.frames_allowed());
    assert!(pool.frames_allowed() <= pool.max_buffers());
    assert_eq!(in_use, pool.frames_in_use());
    assert_eq!(present, pool.frames_allowed());
    assert_eq!(allocator.live_count() as u32, pool.frames_allowed());
    assert!(records
        .iter()
        .all(|r| r.native().is_some() || r.lease() == Lease::Free));
    assert!(records
        .iter()
        .all(|r| r.in_use() == matches!(r.lease(), Lease::CheckedOut(_))));
}

proptest! {
    #[test]
    fn bookkeeping_holds_for_any_sequence(
        budget in proptest::option::of(0usize..16),
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let allocator = Arc::new(match budget {
            Some(max) => HeapAllocator::with_budget(max),
            None => HeapAllocator::new(),
        });
        let mut pool = BufferPool::with_max_buffers(allocator.clone(), geometry(), MAX);
        let mut leases: Vec<CheckedOutBuffer> = Vec::new();
        let mut next_native = 50_000;

        for op in ops {
            match op {
                Op::SetCapacity(target) => {
                    let before = pool.frames_allowed();
                    match pool.set_capacity(target) {
                        Ok(_) => prop_assert!(target >= 1 && target <= MAX),
                        Err(PoolError::AllocationFailed { .. })
                        | Err(PoolError::CapacityOutOfRange { .. }) => {
                            prop_assert_eq!(pool.frames_allowed(), before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {:?}", e),
                    }
                }
                Op::Acquire => {
                    if let Some(buffer) = pool.acquire_free() {
                        leases.push(buffer);
                    }
                }
                Op::Return(index) => {
                    let before = pool.frames_in_use();
                    if pool.release(index).is_ok() {
                        prop_assert_eq!(pool.frames_in_use(), before - 1);
                        prop_assert!(pool.release(index).is_err());
                        prop_assert_eq!(pool.frames_in_use(), before - 1);
                    } else {
                        prop_assert_eq!(pool.frames_in_use(), before);
                    }
                }
                Op::Reclaim => {
                    if let Some(buffer) = leases.pop() {
                        let before = pool.frames_in_use();
                        match pool.reclaim(buffer) {
                            Ok(()) => prop_assert_eq!(pool.frames_in_use(), before - 1),
                            Err(_) => prop_assert_eq!(pool.frames_in_use(), before),
                        }
                    }
                }
                Op::Import(count) => {
                    let buffers: Vec<_> = (0..count)
                        .map(|_| {
                            next_native += 1;
                            ExternalBuffer {
                                native: NativeHandle(next_native),
                                geometry: geometry(),
                                stride: 16,
                            }
                        })
                        .collect();
                    let before = pool.frames_allowed();
                    let added = pool.import_external(&buffers);
                    prop_assert!(added as usize <= count);
                    prop_assert_eq!(pool.frames_allowed(), before + added);
                }
            }
            assert_invariants(&pool, &allocator);
        }
    }
}

#[test]
fn failed_growth_leaves_capacity_unchanged() {
    let allocator = Arc::new(HeapAllocator::with_budget(3));
    let mut pool = BufferPool::new(allocator.clone(), geometry());

    assert_eq!(
        pool.set_capacity(6),
        Err(PoolError::AllocationFailed { requested: 6, added: 3 })
    );
    assert_eq!(pool.frames_allowed(), 0);
    assert_eq!(allocator.live_count(), 0);
    assert_invariants(&pool, &allocator);
}

#[test]
fn second_return_of_the_same_buffer_is_rejected() {
    let allocator = Arc::new(HeapAllocator::new());
    let mut pool = BufferPool::new(allocator.clone(), geometry());
    pool.set_capacity(2).unwrap();
    let _first = pool.acquire_free().unwrap();
    let _second = pool.acquire_free().unwrap();

    pool.release(1).unwrap();
    assert_eq!(
        pool.release(1),
        Err(PoolError::InvalidReturn { index: 1, reason: ReturnRejection::AlreadyFree })
    );
    assert_eq!(pool.frames_in_use(), 1);
}

#[test]
fn concurrent_acquires_never_share_a_buffer() {
    let allocator = Arc::new(HeapAllocator::new());
    let pool = Arc::new(Mutex::new(BufferPool::new(allocator.clone(), geometry())));
    pool.lock().unwrap().set_capacity(40).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut taken = Vec::new();
                while let Some(buffer) = pool.lock().unwrap().acquire_free() {
                    taken.push(buffer);
                }
                taken
            })
        })
        .collect();

    let taken: Vec<CheckedOutBuffer> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    let unique: HashSet<u32> = taken.iter().map(CheckedOutBuffer::index).collect();
    let handles: HashSet<NativeHandle> = taken.iter().map(CheckedOutBuffer::native).collect();

    assert_eq!(taken.len(), 40);
    assert_eq!(unique.len(), 40);
    assert_eq!(handles.len(), 40);

    let mut pool = pool.lock().unwrap();
    for buffer in taken {
        pool.reclaim(buffer).unwrap();
    }
    assert_eq!(pool.frames_in_use(), 0);
    assert_invariants(&pool, &allocator);
}
