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

//! USB address allocation collaborator seam.
//!
//! Handing out, binding, and releasing the 7-bit USB device addresses a generic device-enumerator
//! would track is above the host-controller driver (same as the rest of enumeration). This module
//! only defines the trait an embedder's enumeration logic can depend on; the core itself never
//! calls into it.

use derive_more::Display;

/// Speed a device negotiated during reset, affecting which endpoint lists it can appear on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Speed {
    Low,
    Full,
}

#[derive(Debug, Display)]
pub enum AddressAllocError {
    #[display(fmt = "no free USB address available")]
    Exhausted,
}

/// Implemented by the embedder's device-address bookkeeper.
pub trait AddressAllocator<THandle> {
    /// Reserves the next free address for a device of the given speed.
    fn get_free_address(&mut self, speed: Speed) -> Result<u8, AddressAllocError>;

    /// Associates an already-allocated address with an opaque handle the caller uses to identify
    /// the device later.
    fn bind(&mut self, address: u8, handle: THandle);

    /// Frees a previously-allocated address, e.g. on device disconnect.
    fn release(&mut self, address: u8);
}
