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

//! IRQ-context pseudo-program.
//!
//! Some embedders run a kernel that services interrupts with a tiny fixed instruction set rather
//! than invoking arbitrary code in IRQ context. This module describes, as data, the handful of
//! register operations the kernel must perform to recognize an interrupt raised by this
//! controller and acknowledge the bits this core handles, before waking the driver task. The
//! program never touches anything beyond `HcInterruptStatus`.

use crate::{error::OhciError, ohci::registers};

/// One step of the pseudo-program.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IrqOp {
    /// Reads a 32-bit register at `offset` (absolute physical address) into the program's
    /// accumulator.
    ReadU32 { offset: u64 },
    /// Tests the accumulator against `mask`; the kernel is expected to track the result as its
    /// "interrupt recognized" flag.
    BitTest { mask: u32 },
    /// Skips the next `count` operations if the last `BitTest` found no bit set.
    SkipIfZero { count: u8 },
    /// Write-clears `value` at `offset` (absolute physical address), acknowledging the handled
    /// bits so the controller stops asserting the line.
    WriteAck32 { offset: u64, value: u32 },
    /// Marks the interrupt as ours; the kernel wakes the driver task after this step.
    Accept,
}

/// Fixed length of the program this core ever produces.
pub const PROGRAM_LEN: usize = 5;

/// Builds the pseudo-program for a controller whose registers are mapped at `registers_location`.
pub fn build(registers_location: u64) -> [IrqOp; PROGRAM_LEN] {
    let offset = registers_location + registers::HC_INTERRUPT_STATUS_OFFSET;
    [
        IrqOp::ReadU32 { offset },
        IrqOp::BitTest {
            mask: registers::HANDLED_INTERRUPT_MASK,
        },
        IrqOp::SkipIfZero { count: 2 },
        IrqOp::WriteAck32 {
            offset,
            value: registers::HANDLED_INTERRUPT_MASK,
        },
        IrqOp::Accept,
    ]
}

/// Writes the program into `buf`, returning the number of operations written.
///
/// Fails with [`OhciError::Overflow`] if `buf` is shorter than [`PROGRAM_LEN`].
pub fn build_into(buf: &mut [IrqOp], registers_location: u64) -> Result<usize, OhciError> {
    let program = build(registers_location);
    if buf.len() < program.len() {
        return Err(OhciError::Overflow);
    }
    buf[..program.len()].copy_from_slice(&program);
    Ok(program.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_fits_in_exact_size_buffer() {
        let mut buf = [IrqOp::Accept; PROGRAM_LEN];
        assert_eq!(build_into(&mut buf, 0xfe00_0000).unwrap(), PROGRAM_LEN);
    }

    #[test]
    fn undersized_buffer_overflows() {
        let mut buf = [IrqOp::Accept; PROGRAM_LEN - 1];
        assert!(matches!(
            build_into(&mut buf, 0xfe00_0000),
            Err(OhciError::Overflow)
        ));
    }

    #[test]
    fn program_only_ever_touches_interrupt_status() {
        let program = build(0xfe00_0000);
        let expected_offset = 0xfe00_0000 + registers::HC_INTERRUPT_STATUS_OFFSET;
        for op in &program {
            match op {
                IrqOp::ReadU32 { offset } | IrqOp::WriteAck32 { offset, .. } => {
                    assert_eq!(*offset, expected_offset);
                }
                _ => {}
            }
        }
    }
}
