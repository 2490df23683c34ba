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

//! Root hub collaborator seam.
//!
//! The root hub is the virtual USB hub built into the controller itself: its ports, their
//! connect/enable/reset state machine, and the virtual device that answers hub-class control
//! requests targeting it. None of that lives here — it's above the host-controller driver, same
//! as device enumeration. This module only defines the seam the core uses to reach it: querying
//! the port count the hardware reported at startup, and forwarding root-hub-status-change
//! interrupts and root-hub-targeted requests to whatever implements the state machine.

use crate::{ohci::batch::TransferBatch, ohci::registers::Registers, HwAccessRef};
use alloc::boxed::Box;
use futures::future::LocalBoxFuture;

/// Implemented by the embedder's root-hub state machine.
///
/// `TUd` matches the user-data type of the [`crate::ohci::OhciDevice`] it's installed on, since a
/// batch forwarded to [`RootHub::request`] is one [`OhciDevice::schedule_batch`] would otherwise
/// have committed to a real endpoint list.
pub trait RootHub<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Called once, after the controller has reached the operational state, with the number of
    /// downstream ports read from `HcRhDescriptorA`.
    fn init<'a>(&'a mut self, registers: &'a Registers<TAcc>, num_ports: u8) -> LocalBoxFuture<'a, ()>;

    /// Called every time `RootHubStatusChange` is observed, so the implementation can re-read the
    /// port status registers and update its own state.
    fn interrupt<'a>(&'a mut self, registers: &'a Registers<TAcc>) -> LocalBoxFuture<'a, ()>;

    /// Takes ownership of a batch that targeted the root hub's own address, resolving it entirely
    /// on its own — there is no real endpoint descriptor to commit it to, so the core hands it off
    /// synchronously instead of scheduling it against hardware.
    fn request<'a>(&'a mut self, batch: Box<dyn TransferBatch<TAcc, TUd>>) -> LocalBoxFuture<'a, ()>;

    /// The USB address the virtual root-hub device itself responds on, once enumerated.
    fn address(&self) -> Option<u8>;
}
