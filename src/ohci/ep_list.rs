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

//! Endpoint List management.
//!
//! One of the most important part of the OHCI specs is the "endpoint lists processing". The host
//! must maintain a certain number of **endpoint lists** in memory that the USB controller will
//! read and process.
//!
//! Each endpoint list is a linked list of **endpoint descriptors**. Each endpoint descriptor
//! is specific to one USB endpoint. A USB endpoint is a functionality on a USB device.
//!
//! An endpoint list always starts with a dummy sentinel descriptor so that the physical head
//! pointer handed to the controller never changes, no matter how many real descriptors are
//! pushed or removed afterwards.

use crate::{ohci::ep_descriptor, HwAccessRef};

use alloc::vec::Vec;
use core::num::NonZeroU32;

pub use ep_descriptor::{Config, Direction};

/// Linked list of endpoint descriptors, rooted at a dummy sentinel.
pub struct EndpointList<TAcc>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Hardware abstraction layer.
    hardware_access: TAcc,
    /// The list always starts with a dummy descriptor, allowing us to have a constant head
    /// pointer. This not something enforced by the specs, but it is recommended by the specs for
    /// ease of implementation.
    dummy_descriptor: ep_descriptor::EndpointDescriptor<TAcc>,
    /// Descriptors linked to each other, in list order. Index 0 is linked directly after the
    /// dummy descriptor.
    descriptors: Vec<ep_descriptor::EndpointDescriptor<TAcc>>,
    /// Physical head of another list this one continues into once its own descriptors run out,
    /// e.g. the interrupt list chaining into the isochronous list (section 4.3.1). The tail
    /// descriptor's next-pointer is kept pointing here instead of being cleared.
    chained_next: Option<NonZeroU32>,
}

impl<TAcc> EndpointList<TAcc>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Builds a new, empty list. The sentinel starts enabled with no next pointer, so the
    /// physical head pointer is safe to publish to the controller immediately.
    pub async fn new(hardware_access: TAcc) -> Result<EndpointList<TAcc>, ()> {
        let config = Config {
            maximum_packet_size: 0,
            function_address: 0,
            endpoint_number: 0,
            isochronous: false,
            low_speed: false,
            direction: Direction::FromTd,
        };

        let dummy_descriptor =
            ep_descriptor::EndpointDescriptor::new(hardware_access.clone(), config).await?;
        dummy_descriptor.enable().await;

        Ok(EndpointList {
            hardware_access,
            dummy_descriptor,
            descriptors: Vec::new(),
            chained_next: None,
        })
    }

    /// Physical address of the list's head, to be published in `HcControlHeadED`,
    /// `HcBulkHeadED`, or an HCCA interrupt slot.
    pub fn head_pointer(&self) -> NonZeroU32 {
        self.dummy_descriptor.pointer()
    }

    /// Makes this list continue into `next_list_head` once its own descriptors are exhausted,
    /// instead of terminating the chain. Used to splice the isochronous list after the interrupt
    /// list, since both are walked from the same HCCA interrupt-table slots.
    ///
    /// Must be called before any endpoint is scheduled on a list further down the chain, and
    /// before any [`EndpointList::push`]/[`EndpointList::remove`] call on `self`, so that the tail
    /// pointer this rewrites is always the current one.
    pub async fn chain_to(&mut self, next_list_head: NonZeroU32) {
        self.chained_next = Some(next_list_head);
        unsafe {
            match self.descriptors.last() {
                Some(tail) => tail.set_next(next_list_head).await,
                None => self.dummy_descriptor.set_next(next_list_head).await,
            }
        }
    }

    /// Number of real (non-sentinel) descriptors currently in the list.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Appends a new endpoint descriptor at the tail of the list.
    ///
    /// The new descriptor is linked in before it is enabled, and enabled only once its own
    /// next-pointer is already correct, so a controller walking the list at any point during this
    /// call either doesn't see the new descriptor yet or sees a fully-formed one.
    pub async fn push(&mut self, config: Config) -> Result<(), ()> {
        let new_descriptor =
            ep_descriptor::EndpointDescriptor::new(self.hardware_access.clone(), config).await?;

        let tail_is_dummy = self.descriptors.is_empty();

        match self.chained_next {
            Some(next) => unsafe { new_descriptor.set_next(next).await },
            None => new_descriptor.clear_next().await,
        }
        new_descriptor.enable().await;

        unsafe {
            if tail_is_dummy {
                self.dummy_descriptor.set_next(new_descriptor.pointer()).await;
            } else {
                self.descriptors
                    .last()
                    .unwrap()
                    .set_next(new_descriptor.pointer())
                    .await;
            }
        }

        self.descriptors.push(new_descriptor);
        Ok(())
    }

    /// Removes the descriptor matching `function_address`/`endpoint_number`, unlinking it from
    /// its predecessor first. Returns `true` if a matching descriptor was found and removed.
    ///
    /// Callers must have cleared the relevant list-enable bit in `HcControl` before calling this,
    /// per the enable-toggle protocol: the controller must not be walking this list while its
    /// links are being rewritten.
    pub async fn remove(&mut self, function_address: u8, endpoint_number: u8) -> bool {
        let position = match self.descriptors.iter().position(|ed| {
            ed.config().function_address == function_address
                && ed.config().endpoint_number == endpoint_number
        }) {
            Some(position) => position,
            None => return false,
        };

        let next_pointer = self
            .descriptors
            .get(position + 1)
            .map(|ed| ed.pointer())
            .or(self.chained_next);

        unsafe {
            if position == 0 {
                match next_pointer {
                    Some(next) => self.dummy_descriptor.set_next(next).await,
                    None => self.dummy_descriptor.clear_next().await,
                }
            } else {
                let predecessor = &self.descriptors[position - 1];
                match next_pointer {
                    Some(next) => predecessor.set_next(next).await,
                    None => predecessor.clear_next().await,
                }
            }
        }

        self.descriptors.remove(position);
        true
    }

    /// Looks up a descriptor by its logical endpoint key.
    pub fn find(
        &self,
        function_address: u8,
        endpoint_number: u8,
    ) -> Option<&ep_descriptor::EndpointDescriptor<TAcc>> {
        self.descriptors.iter().find(|ed| {
            ed.config().function_address == function_address
                && ed.config().endpoint_number == endpoint_number
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use futures_executor::block_on;

    fn config(function_address: u8, endpoint_number: u8) -> Config {
        Config {
            maximum_packet_size: 64,
            function_address,
            endpoint_number,
            isochronous: false,
            low_speed: false,
            direction: Direction::In,
        }
    }

    #[test]
    fn new_list_head_is_stable_across_pushes() {
        let hw = FakeHardware::new();
        block_on(async {
            let mut list = EndpointList::new(hw.clone()).await.unwrap();
            let head = list.head_pointer();
            list.push(config(1, 1)).await.unwrap();
            list.push(config(2, 1)).await.unwrap();
            assert_eq!(list.head_pointer(), head);
            assert_eq!(list.len(), 2);
        });
    }

    #[test]
    fn push_then_find_round_trips() {
        let hw = FakeHardware::new();
        block_on(async {
            let mut list = EndpointList::new(hw.clone()).await.unwrap();
            list.push(config(3, 2)).await.unwrap();
            assert!(list.find(3, 2).is_some());
            assert!(list.find(4, 2).is_none());
        });
    }

    #[test]
    fn remove_middle_element_preserves_reachability() {
        let hw = FakeHardware::new();
        block_on(async {
            let mut list = EndpointList::new(hw.clone()).await.unwrap();
            list.push(config(1, 1)).await.unwrap();
            list.push(config(2, 1)).await.unwrap();
            list.push(config(3, 1)).await.unwrap();

            assert!(list.remove(2, 1).await);
            assert_eq!(list.len(), 2);
            assert!(list.find(1, 1).is_some());
            assert!(list.find(3, 1).is_some());
            assert!(list.find(2, 1).is_none());
        });
    }

    #[test]
    fn chained_list_keeps_tail_pointed_at_next_list_through_pushes_and_removes() {
        let hw = FakeHardware::new();
        block_on(async {
            let next_list = EndpointList::new(hw.clone()).await.unwrap();
            let next_head = next_list.head_pointer();

            let mut list = EndpointList::new(hw.clone()).await.unwrap();
            list.chain_to(next_head).await;
            assert_eq!(list.dummy_descriptor.next().await, Some(next_head));

            list.push(config(1, 1)).await.unwrap();
            assert_eq!(
                list.descriptors.last().unwrap().next().await,
                Some(next_head)
            );

            list.push(config(2, 1)).await.unwrap();
            assert_eq!(
                list.descriptors.last().unwrap().next().await,
                Some(next_head)
            );

            assert!(list.remove(2, 1).await);
            assert_eq!(
                list.descriptors.last().unwrap().next().await,
                Some(next_head)
            );

            assert!(list.remove(1, 1).await);
            assert_eq!(list.dummy_descriptor.next().await, Some(next_head));
        });
    }

    #[test]
    fn remove_unknown_endpoint_is_a_noop() {
        let hw = FakeHardware::new();
        block_on(async {
            let mut list = EndpointList::new(hw.clone()).await.unwrap();
            list.push(config(1, 1)).await.unwrap();
            assert!(!list.remove(9, 9).await);
            assert_eq!(list.len(), 1);
        });
    }
}
