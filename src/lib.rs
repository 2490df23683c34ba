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

//! Core of an OHCI (Open Host Controller Interface, USB 1.1) host controller driver.
//!
//! This crate does not talk to hardware on its own. All access to physical memory — register
//! reads and writes, and allocation of DMA-coherent buffers — goes through the [`HwAccessRef`]
//! trait, which an embedder implements against whatever physical-memory primitives its kernel
//! exposes. The rest of this crate only ever sees physical addresses; it never assumes it can
//! dereference a pointer directly.

#![no_std]

extern crate alloc;

pub mod address_alloc;
pub mod error;
pub mod ohci;
pub mod root_hub;

#[cfg(test)]
pub(crate) mod test_support;

use core::{
    alloc::Layout,
    future::Future,
    num::{NonZeroU32, NonZeroU64},
    time::Duration,
};

/// Abstraction over the hardware.
///
/// The code of this library doesn't assume that it can directly access physical memory. Instead,
/// any access to physical memory is done through this trait.
pub unsafe trait HwAccessRef<'a>: Copy + Clone {
    type Delay: Future<Output = ()> + 'a;
    type ReadMemFutureU32: Future<Output = ()> + 'a;
    type WriteMemFutureU32: Future<Output = ()> + 'a;
    // TODO: the error type should be core::alloc::AllocErr once it's stable
    type Alloc64: Future<Output = Result<NonZeroU64, ()>> + 'a;
    // TODO: the error type should be core::alloc::AllocErr once it's stable
    type Alloc32: Future<Output = Result<NonZeroU32, ()>> + 'a;

    /// Performs a series of atomic physical memory reads starting at the given address.
    ///
    /// The data is read in little endian, matching the byte order of every field this crate
    /// decodes. `address` must be a multiple of 4.
    unsafe fn read_memory_u32_le(
        self,
        address: u64,
        dest: &'a mut [u32],
    ) -> Self::ReadMemFutureU32;

    /// Performs a series of atomic physical memory writes starting at the given address.
    ///
    /// The data must be written in little endian. `address` must be a multiple of 4.
    unsafe fn write_memory_u32_le(self, address: u64, data: &'a [u32]) -> Self::WriteMemFutureU32;

    /// Allocate a memory buffer in physical memory. Does not need to be cleared with 0s.
    ///
    /// The returned pointer will likely be passed to the USB controller and read by the USB
    /// controller.
    ///
    /// > **Note**: The value returned is a `u64` and not a pointer, as the buffer is not
    /// >           necessarily directly accessible. All accesses to the buffer must be performed
    /// >           through the other methods of this trait.
    fn alloc64(self, layout: Layout) -> Self::Alloc64;

    /// Same as [`HwAccessRef::alloc64`], except that the returned buffer must fit within the
    /// first four gigabytes of physical memory, which is the only range OHCI descriptors can
    /// point into.
    fn alloc32(self, layout: Layout) -> Self::Alloc32;

    /// Deallocates a previously-allocated block of physical memory.
    ///
    /// If `alloc32` is true, then this buffer was allocated using [`HwAccessRef::alloc32`].
    ///
    /// # Safety
    ///
    /// `address` must be a value previously-returned by a call to `alloc`, and `layout` must
    /// match the layout that was passed to `alloc`.
    unsafe fn dealloc(self, address: u64, alloc32: bool, layout: Layout);

    /// Returns a future that is ready after the given duration has passed.
    ///
    /// Used both for the fixed delays of the handoff/start sequences and for the polling
    /// emulator's sleep between samples.
    fn delay(self, duration: Duration) -> Self::Delay;
}

/// An allocation of physical memory guaranteed to fit in the first four gigabytes, RAII-style.
///
/// Every DMA-coherent structure the core hands to the controller — HCCA, endpoint descriptors —
/// is backed by one of these. Dropping it deallocates the buffer.
pub struct Buffer32<TAcc>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    hardware_access: TAcc,
    buffer: NonZeroU32,
    layout: Layout,
}

impl<TAcc> Buffer32<TAcc>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Allocates a new buffer of the given layout.
    pub async fn new(hardware_access: TAcc, layout: Layout) -> Result<Buffer32<TAcc>, ()> {
        let buffer = (&hardware_access).alloc32(layout).await?;
        Ok(Buffer32 {
            hardware_access,
            buffer,
            layout,
        })
    }

    /// Returns the physical memory address of the buffer.
    ///
    /// This value never changes and is valid until the [`Buffer32`] is destroyed.
    pub fn pointer(&self) -> NonZeroU32 {
        self.buffer
    }

    /// Reads `dest.len()` 32-bit words starting at `offset` bytes into the buffer.
    ///
    /// # Safety
    ///
    /// `offset` must be a multiple of 4 and `offset + dest.len() * 4` must not exceed the
    /// buffer's layout size.
    pub async unsafe fn read_u32(&self, offset: u32, dest: &mut [u32]) {
        (&self.hardware_access)
            .read_memory_u32_le(u64::from(self.buffer.get()) + u64::from(offset), dest)
            .await;
    }

    /// Writes `data` as consecutive 32-bit words starting at `offset` bytes into the buffer.
    ///
    /// # Safety
    ///
    /// `offset` must be a multiple of 4 and `offset + data.len() * 4` must not exceed the
    /// buffer's layout size.
    pub async unsafe fn write_u32(&self, offset: u32, data: &[u32]) {
        (&self.hardware_access)
            .write_memory_u32_le(u64::from(self.buffer.get()) + u64::from(offset), data)
            .await;
    }
}

impl<TAcc> Drop for Buffer32<TAcc>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    fn drop(&mut self) {
        unsafe {
            (&self.hardware_access).dealloc(u64::from(self.buffer.get()), true, self.layout);
        }
    }
}
