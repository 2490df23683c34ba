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

//! A single endpoint descriptor (ED).
//!
//! This structure can be seen as the head of the queue of transfers that the USB controller must
//! perform with a specific endpoint. It has to be put in an
//! [`crate::ohci::ep_list::EndpointList`] for any work to be done.
//!
//! Since this memory is concurrently walked by the controller, every mutation that changes
//! reachability (linking or unlinking a neighbour) must happen under the enable-toggle protocol
//! enforced one level up, in [`crate::ohci::OhciDevice`].

use crate::{Buffer32, HwAccessRef};
use core::{alloc::Layout, num::NonZeroU32};

/// Direction of the data flow of an endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    /// Direction is carried by each transfer descriptor rather than fixed at the endpoint.
    FromTd,
}

/// Configuration used when constructing an [`EndpointDescriptor`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of bytes that can be sent or received in a single data packet. Must be
    /// inferior or equal to 4095 (the field is only 11 bits wide per section 4.2, but we accept
    /// a `u16` and assert at encode time to keep the type plain).
    pub maximum_packet_size: u16,
    /// Value between 0 and 127. The USB address of the function containing the endpoint.
    pub function_address: u8,
    /// Value between 0 and 15. The USB address of the endpoint within the function.
    pub endpoint_number: u8,
    /// If true, isochronous TD format. If false, general TD format.
    pub isochronous: bool,
    /// If true, low speed. If false, full speed.
    pub low_speed: bool,
    /// Direction of the data flow.
    pub direction: Direction,
}

const ENDPOINT_DESCRIPTOR_LAYOUT: Layout = unsafe { Layout::from_size_align_unchecked(16, 16) };

// Byte offsets within the 16-byte descriptor.
const CONTROL_OFFSET: u32 = 0x0;
const TAIL_TD_OFFSET: u32 = 0x4;
const HEAD_TD_OFFSET: u32 = 0x8;
const NEXT_ED_OFFSET: u32 = 0xc;

const CTRL_FA_MASK: u32 = 0x7f;
const CTRL_EN_SHIFT: u32 = 7;
const CTRL_EN_MASK: u32 = 0xf << CTRL_EN_SHIFT;
const CTRL_DIR_SHIFT: u32 = 11;
const CTRL_LOW_SPEED: u32 = 1 << 13;
const CTRL_SKIP: u32 = 1 << 14;
const CTRL_ISOCHRONOUS: u32 = 1 << 15;
const CTRL_MPS_SHIFT: u32 = 16;
const CTRL_MPS_MASK: u32 = 0x7ff << CTRL_MPS_SHIFT;

fn encode_control(config: &Config, skip: bool) -> u32 {
    assert!(config.maximum_packet_size < (1 << 12));
    assert!(config.endpoint_number < (1 << 4));
    assert!(config.function_address < (1 << 7));

    let direction = match config.direction {
        Direction::Out => 0b01,
        Direction::In => 0b10,
        Direction::FromTd => 0b00,
    };

    u32::from(config.function_address) & CTRL_FA_MASK
        | (u32::from(config.endpoint_number) << CTRL_EN_SHIFT) & CTRL_EN_MASK
        | direction << CTRL_DIR_SHIFT
        | if config.low_speed { CTRL_LOW_SPEED } else { 0 }
        | if skip { CTRL_SKIP } else { 0 }
        | if config.isochronous {
            CTRL_ISOCHRONOUS
        } else {
            0
        }
        | (u32::from(config.maximum_packet_size) << CTRL_MPS_SHIFT) & CTRL_MPS_MASK
}

/// A single endpoint descriptor, allocated in DMA-coherent physical memory.
pub struct EndpointDescriptor<TAcc>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    buffer: Buffer32<TAcc>,
    config: Config,
}

impl<TAcc> EndpointDescriptor<TAcc>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Allocates a new endpoint descriptor. The descriptor starts with the skip bit set and no
    /// neighbour; the caller is responsible for clearing skip and linking it into a list.
    pub async fn new(hardware_access: TAcc, config: Config) -> Result<Self, ()> {
        let buffer = Buffer32::new(hardware_access, ENDPOINT_DESCRIPTOR_LAYOUT).await?;

        let control = encode_control(&config, true);
        unsafe {
            buffer.write_u32(CONTROL_OFFSET, &[control]).await;
            buffer.write_u32(TAIL_TD_OFFSET, &[0]).await;
            buffer.write_u32(HEAD_TD_OFFSET, &[0]).await;
            buffer.write_u32(NEXT_ED_OFFSET, &[0]).await;
        }

        Ok(EndpointDescriptor { buffer, config })
    }

    /// Physical address of this descriptor. Stable for its lifetime.
    pub fn pointer(&self) -> NonZeroU32 {
        self.buffer.pointer()
    }

    /// The configuration this descriptor was constructed with, for registrar lookups.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Clears the skip bit, making the descriptor visible to a controller walking the list.
    pub async fn enable(&self) {
        let mut control = [0u32];
        unsafe {
            self.buffer.read_u32(CONTROL_OFFSET, &mut control).await;
            control[0] &= !CTRL_SKIP;
            self.buffer.write_u32(CONTROL_OFFSET, &control).await;
        }
    }

    /// Sets the next-ED physical pointer of the linked list this descriptor belongs to.
    ///
    /// # Safety
    ///
    /// `next` must remain a valid, live descriptor for as long as this pointer is published,
    /// i.e. until `clear_next` is called or this descriptor is unlinked.
    pub async unsafe fn set_next(&self, next: NonZeroU32) {
        self.buffer.write_u32(NEXT_ED_OFFSET, &[next.get()]).await;
    }

    /// Clears the next-ED pointer, marking this descriptor as the tail of its list.
    pub async fn clear_next(&self) {
        unsafe {
            self.buffer.write_u32(NEXT_ED_OFFSET, &[0]).await;
        }
    }

    /// Reads back the raw next-ED physical pointer, or `None` if it is the tail.
    pub async fn next(&self) -> Option<NonZeroU32> {
        let mut out = [0u32];
        unsafe {
            self.buffer.read_u32(NEXT_ED_OFFSET, &mut out).await;
        }
        NonZeroU32::new(out[0] & !0xf)
    }

    /// Sets the tail-TD physical pointer (`HcEDTailP`). Queue-head/tail bookkeeping beyond this
    /// pointer is the transfer batch's concern; the core only ever moves the tail forward so the
    /// controller can discover newly-queued transfer descriptors.
    pub async fn set_tail_td(&self, tail: u32) {
        unsafe {
            self.buffer.write_u32(TAIL_TD_OFFSET, &[tail]).await;
        }
    }

    /// Reads the head-TD physical pointer (`HcEDHeadP`), masking off the halted and
    /// toggle-carry bits the controller stores in the low 2 bits of this field.
    pub async fn head_td(&self) -> u32 {
        let mut out = [0u32];
        unsafe {
            self.buffer.read_u32(HEAD_TD_OFFSET, &mut out).await;
        }
        out[0] & !0b11
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use futures_executor::block_on;

    fn config() -> Config {
        Config {
            maximum_packet_size: 64,
            function_address: 5,
            endpoint_number: 2,
            isochronous: false,
            low_speed: false,
            direction: Direction::In,
        }
    }

    #[test]
    fn new_descriptor_starts_skipped_with_no_next() {
        let hw = FakeHardware::new();
        block_on(async {
            let ed = EndpointDescriptor::new(hw.clone(), config()).await.unwrap();
            assert_eq!(ed.next().await, None);
        });
    }

    #[test]
    fn enable_clears_skip_bit_and_next_is_still_none() {
        let hw = FakeHardware::new();
        block_on(async {
            let ed = EndpointDescriptor::new(hw.clone(), config()).await.unwrap();
            ed.enable().await;
            assert_eq!(ed.next().await, None);
        });
    }

    #[test]
    fn set_next_then_clear_round_trips() {
        let hw = FakeHardware::new();
        block_on(async {
            let a = EndpointDescriptor::new(hw.clone(), config()).await.unwrap();
            let b = EndpointDescriptor::new(hw.clone(), config()).await.unwrap();
            unsafe {
                a.set_next(b.pointer()).await;
            }
            assert_eq!(a.next().await, Some(b.pointer()));
            a.clear_next().await;
            assert_eq!(a.next().await, None);
        });
    }

    #[test]
    fn head_td_masks_low_bits() {
        let hw = FakeHardware::new();
        block_on(async {
            let ed = EndpointDescriptor::new(hw.clone(), config()).await.unwrap();
            unsafe {
                ed.buffer.write_u32(HEAD_TD_OFFSET, &[0x1000_0003]).await;
            }
            assert_eq!(ed.head_td().await, 0x1000_0000);
        });
    }
}
