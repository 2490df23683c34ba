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

//! Transfer batch scheduling.
//!
//! A transfer batch is an externally-defined unit of work bound to one endpoint. The core
//! doesn't know or care about the byte layout of the transfer descriptors a batch writes; it only
//! needs to commit the batch's descriptors to the endpoint's queue, track it until it reports
//! itself complete, and hand the caller back whatever user data the batch was holding.

use crate::{ohci::ep_descriptor::EndpointDescriptor, HwAccessRef};
use alloc::{boxed::Box, vec::Vec};
use futures::future::LocalBoxFuture;

/// A unit of work queued against one endpoint.
///
/// Implemented by the embedder. The core calls [`TransferBatch::commit`] once, when the batch is
/// first scheduled, to let it link its transfer descriptors onto the endpoint and move the
/// endpoint's `HcEDTailP` forward. After that, the core polls [`TransferBatch::is_complete`] from
/// the writeback-done-head interrupt path; deciding what "complete" means (reading a transfer
/// descriptor's condition code, a counter, anything else) is left entirely to the embedder, since
/// the core does not parse transfer-descriptor byte layouts.
pub trait TransferBatch<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Links this batch's descriptors onto `ed` and advances its tail pointer.
    fn commit<'a>(&'a mut self, ed: &'a EndpointDescriptor<TAcc>) -> LocalBoxFuture<'a, ()>;

    /// Whether every transfer in this batch has finished, successfully or not.
    fn is_complete(&self) -> bool;

    /// Called once `is_complete` has returned true; returns whatever user data the caller wants
    /// back (a completion channel, a future's waker, a raw result buffer).
    fn finish(self: Box<Self>) -> TUd;
}

/// The set of batches that have been committed to hardware and not yet reaped.
pub struct PendingBatches<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    batches: Vec<Box<dyn TransferBatch<TAcc, TUd>>>,
}

impl<TAcc, TUd> PendingBatches<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    pub fn new() -> Self {
        PendingBatches {
            batches: Vec::new(),
        }
    }

    pub fn push(&mut self, batch: Box<dyn TransferBatch<TAcc, TUd>>) {
        self.batches.push(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Removes every batch reporting completion and runs its `finish`, returning the user data in
    /// completion order. Batches still pending are left untouched and keep their position.
    pub fn reap_completed(&mut self) -> Vec<TUd> {
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.batches.len() {
            if self.batches[index].is_complete() {
                let batch = self.batches.remove(index);
                finished.push(batch.finish());
            } else {
                index += 1;
            }
        }
        finished
    }
}
