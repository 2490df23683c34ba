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

//! Error types shared across the core.

use crate::address_alloc::AddressAllocError;

/// Error that can be returned by any fallible operation on an [`crate::ohci::OhciDevice`].
#[derive(Debug, derive_more::Display)]
pub enum OhciError {
    /// Unrecognized driver revision number.
    ///
    /// > **Note**: This probably indicates that the memory location doesn't correspond to an
    /// >           OHCI implementation, or that there is a bug in the physical memory access
    /// >           mechanism.
    #[display(fmt = "unrecognized OHCI revision: 0x{:x}", _0)]
    BadRevision(u8),

    /// Allocation of an ED, the HCCA, or a batch's descriptor chain failed.
    #[display(fmt = "out of memory")]
    OutOfMemory,

    /// `remove_endpoint` or the registrar's `get` targeted a tuple that was never registered.
    #[display(fmt = "no such endpoint")]
    NoSuchEndpoint,

    /// The IRQ pseudo-program didn't fit in the caller-provided buffer.
    #[display(fmt = "buffer too small to hold the IRQ program")]
    Overflow,

    /// Registering a periodic endpoint would exceed the bandwidth budget.
    #[display(fmt = "bandwidth budget exhausted")]
    BandwidthExhausted,

    /// The controller raised `UnrecoverableError`; the driver re-ran the start sequence.
    #[display(fmt = "hardware reported an unrecoverable error, controller was restarted")]
    HardwareUnrecoverable,

    /// The address allocator collaborator failed to hand out an address.
    #[display(fmt = "address allocation failed: {}", _0)]
    AddressAllocFailed(AddressAllocError),
}
