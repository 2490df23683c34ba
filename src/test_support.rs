// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! In-memory [`HwAccessRef`] implementation used by the unit tests of every other module.
//!
//! Models physical memory as a flat byte vector and allocation as a simple bump allocator. None
//! of this is reachable from outside `#[cfg(test)]` builds.

use crate::HwAccessRef;
use alloc::{sync::Arc, vec, vec::Vec};
use core::{
    alloc::Layout,
    cell::RefCell,
    future::Future,
    num::{NonZeroU32, NonZeroU64},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// Total size of the fake physical address space. Comfortably larger than anything the core
/// allocates in a test (a handful of 16-byte EDs and one 256-byte HCCA).
const SPACE_SIZE: usize = 1 << 20;

struct Inner {
    memory: Vec<u8>,
    next_free: u32,
}

/// Shared, cheaply-clonable fake hardware backend.
///
/// Cloning a `FakeHardware` clones the `Arc`, not the underlying memory, matching the teacher's
/// `TAcc: Clone` bound on every constructor that needs to pass the handle down to nested
/// allocations.
#[derive(Clone)]
pub(crate) struct FakeHardware {
    inner: Arc<RefCell<Inner>>,
}

impl FakeHardware {
    pub(crate) fn new() -> Self {
        FakeHardware {
            inner: Arc::new(RefCell::new(Inner {
                memory: vec![0; SPACE_SIZE],
                // Start allocations away from address 0, so a `NonZeroU32` is never in doubt.
                next_free: 0x1000,
            })),
        }
    }

    /// Reads back raw bytes, for assertions in tests that don't want to go through an accessor.
    #[allow(dead_code)]
    pub(crate) fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let inner = self.inner.borrow();
        inner.memory[address as usize..address as usize + len].to_vec()
    }
}

struct ReadyFuture<T>(Option<T>);

impl<T> Future for ReadyFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context) -> Poll<T> {
        Poll::Ready(self.0.take().expect("polled after completion"))
    }
}

unsafe impl<'a> HwAccessRef<'a> for &'a FakeHardware {
    type Delay = ReadyFuture<()>;
    type ReadMemFutureU32 = ReadyFuture<()>;
    type WriteMemFutureU32 = ReadyFuture<()>;
    type Alloc64 = ReadyFuture<Result<NonZeroU64, ()>>;
    type Alloc32 = ReadyFuture<Result<NonZeroU32, ()>>;

    unsafe fn read_memory_u32_le(self, address: u64, dest: &'a mut [u32]) -> Self::ReadMemFutureU32 {
        let inner = self.inner.borrow();
        for (i, slot) in dest.iter_mut().enumerate() {
            let offset = address as usize + i * 4;
            let bytes = [
                inner.memory[offset],
                inner.memory[offset + 1],
                inner.memory[offset + 2],
                inner.memory[offset + 3],
            ];
            *slot = u32::from_le_bytes(bytes);
        }
        ReadyFuture(Some(()))
    }

    unsafe fn write_memory_u32_le(self, address: u64, data: &'a [u32]) -> Self::WriteMemFutureU32 {
        let mut inner = self.inner.borrow_mut();
        for (i, value) in data.iter().enumerate() {
            let offset = address as usize + i * 4;
            inner.memory[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        ReadyFuture(Some(()))
    }

    fn alloc64(self, layout: Layout) -> Self::Alloc64 {
        ReadyFuture(Some(self.bump_alloc(layout).map(|addr| {
            NonZeroU64::new(u64::from(addr.get())).unwrap()
        })))
    }

    fn alloc32(self, layout: Layout) -> Self::Alloc32 {
        ReadyFuture(Some(self.bump_alloc(layout)))
    }

    unsafe fn dealloc(self, _address: u64, _alloc32: bool, _layout: Layout) {
        // The bump allocator never reclaims memory; tests run small and short-lived.
    }

    fn delay(self, _duration: Duration) -> Self::Delay {
        ReadyFuture(Some(()))
    }
}

impl FakeHardware {
    fn bump_alloc(&self, layout: Layout) -> Result<NonZeroU32, ()> {
        let mut inner = self.inner.borrow_mut();
        let align = layout.align() as u32;
        let aligned = (inner.next_free + align - 1) & !(align - 1);
        let end = aligned
            .checked_add(layout.size() as u32)
            .ok_or(())?;
        if end as usize > SPACE_SIZE {
            return Err(());
        }
        inner.next_free = end;
        Ok(NonZeroU32::new(aligned).unwrap())
    }
}
