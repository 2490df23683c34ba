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

//! Host Controller Communications Area (HCCA) management.
//!
//! See section 4.4 of the specs.
//!
//! The HCCA is a 256-byte, 256-byte-aligned block of DMA-coherent memory that the host controller
//! both reads from (the interrupt table) and writes to (frame number, done-queue head). This
//! module only owns the buffer and the byte layout within it; the endpoint lists it points into
//! are owned by [`crate::ohci::OhciDevice`].

use crate::{Buffer32, HwAccessRef};
use core::{alloc::Layout, num::NonZeroU32};

const HCCA_LAYOUT: Layout = unsafe { Layout::from_size_align_unchecked(256, 256) };

const INTERRUPT_TABLE_OFFSET: u32 = 0x00;
const FRAME_NUMBER_OFFSET: u32 = 0x80;
const DONE_HEAD_OFFSET: u32 = 0x84;

/// Number of interrupt-table slots, fixed by the specs at 32.
pub const INTERRUPT_TABLE_LEN: usize = 32;

pub struct Hcca<TAcc>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    buffer: Buffer32<TAcc>,
}

impl<TAcc> Hcca<TAcc>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Allocates the HCCA and points every interrupt-table slot at `interrupt_list_head`.
    ///
    /// The specs allow an implementation to build a tree of interrupt endpoint lists of varying
    /// polling rates across the 32 slots; this core keeps a single interrupt endpoint list and
    /// replicates its head pointer into all 32 slots, giving every interrupt endpoint the same
    /// 1 ms polling rate. Finer-grained rates are a quality-of-service concern for a higher
    /// layer, not the core schedule-maintenance problem.
    pub async fn new(
        hardware_access: TAcc,
        interrupt_list_head: NonZeroU32,
    ) -> Result<Hcca<TAcc>, ()> {
        let buffer = Buffer32::new(hardware_access, HCCA_LAYOUT).await?;

        let slots = [interrupt_list_head.get(); INTERRUPT_TABLE_LEN];
        unsafe {
            buffer.write_u32(INTERRUPT_TABLE_OFFSET, &slots).await;
            // Frame number and done head are only ever written by the controller; start them at
            // 0 so a test or a log line never observes stale bytes.
            buffer.write_u32(FRAME_NUMBER_OFFSET, &[0, 0]).await;
        }

        Ok(Hcca { buffer })
    }

    /// Physical memory address of the HCCA, to be written into `HcHCCA`.
    ///
    /// This value never changes and is valid until the [`Hcca`] is destroyed.
    pub fn pointer(&self) -> NonZeroU32 {
        self.buffer.pointer()
    }

    /// Reads the low 16 bits of the frame number the controller last wrote back.
    pub async fn frame_number(&self) -> u16 {
        let mut out = [0u32];
        unsafe {
            self.buffer.read_u32(FRAME_NUMBER_OFFSET, &mut out).await;
        }
        (out[0] & 0xffff) as u16
    }

    /// Reads the current `DoneHead` field, masking off the low bit the controller mirrors
    /// `WritebackDoneHead` into. Returns `None` if the done queue is empty.
    ///
    /// Callers should only trust this value while servicing a `WritebackDoneHead` interrupt,
    /// after which they should clear that status bit.
    pub async fn done_head(&self) -> Option<NonZeroU32> {
        let mut out = [0u32];
        unsafe {
            self.buffer.read_u32(DONE_HEAD_OFFSET, &mut out).await;
        }
        NonZeroU32::new(out[0] & !0x1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use futures_executor::block_on;

    #[test]
    fn interrupt_table_holds_same_head_in_every_slot() {
        let hw = FakeHardware::new();
        block_on(async {
            let head = NonZeroU32::new(0x2000).unwrap();
            let hcca = Hcca::new(hw.clone(), head).await.unwrap();
            let bytes = hw.peek(hcca.pointer().get(), INTERRUPT_TABLE_LEN * 4);
            for chunk in bytes.chunks(4) {
                assert_eq!(
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    head.get()
                );
            }
        });
    }

    #[test]
    fn fresh_hcca_has_no_done_queue() {
        let hw = FakeHardware::new();
        block_on(async {
            let hcca = Hcca::new(hw.clone(), NonZeroU32::new(0x2000).unwrap())
                .await
                .unwrap();
            assert_eq!(hcca.done_head().await, None);
        });
    }
}
