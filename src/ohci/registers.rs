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

//! Strongly-typed view over the memory-mapped OHCI registers.
//!
//! Offsets and bit positions are as translated from the OHCI 1.0a specification, section 7.
//! Every access goes through a single [`HwAccessRef`] call, so there is never a window during
//! which a partially-applied register update is visible to the controller.

use crate::HwAccessRef;
use core::convert::TryFrom as _;

// Register offsets, relative to the mapped base address.
pub const HC_REVISION_OFFSET: u64 = 0x00;
pub const HC_CONTROL_OFFSET: u64 = 0x04;
pub const HC_COMMAND_STATUS_OFFSET: u64 = 0x08;
pub const HC_INTERRUPT_STATUS_OFFSET: u64 = 0x0c;
pub const HC_INTERRUPT_ENABLE_OFFSET: u64 = 0x10;
pub const HC_INTERRUPT_DISABLE_OFFSET: u64 = 0x14;
pub const HC_HCCA_OFFSET: u64 = 0x18;
pub const HC_PERIOD_CURRENT_ED_OFFSET: u64 = 0x1c;
pub const HC_CONTROL_HEAD_ED_OFFSET: u64 = 0x20;
pub const HC_CONTROL_CURRENT_ED_OFFSET: u64 = 0x24;
pub const HC_BULK_HEAD_ED_OFFSET: u64 = 0x28;
pub const HC_BULK_CURRENT_ED_OFFSET: u64 = 0x2c;
pub const HC_DONE_HEAD_OFFSET: u64 = 0x30;
pub const HC_FM_INTERVAL_OFFSET: u64 = 0x34;
pub const HC_FM_REMAINING_OFFSET: u64 = 0x38;
pub const HC_FM_NUMBER_OFFSET: u64 = 0x3c;
pub const HC_PERIODIC_START_OFFSET: u64 = 0x40;
pub const HC_LS_THRESHOLD_OFFSET: u64 = 0x44;
pub const HC_RH_DESCRIPTOR_A_OFFSET: u64 = 0x48;
pub const HC_RH_DESCRIPTOR_B_OFFSET: u64 = 0x4c;
pub const HC_RH_STATUS_OFFSET: u64 = 0x50;
/// Register corresponding to the status of port 1. The status of port 2 (if it exists) is at 0x58,
/// the status of port 3 (if it exists) is at 0x5c, and so on.
pub const HC_RH_PORT_STATUS_1_OFFSET: u64 = 0x54;

/// Legacy emulation register. Vendor-extension territory, sitting past the end of the
/// specification-defined register block. Only the gate-A20 bit is meaningful to this driver;
/// every other bit must be preserved across accesses, since clearing them directly can reboot
/// some platforms (section 4.3).
pub const HC_LEGACY_OFFSET: u64 = 0x100;
/// Bit of [`HC_LEGACY_OFFSET`] that must be preserved verbatim.
pub const LEGACY_GATE_A20_BIT: u32 = 1 << 0;

/// Bit of `HcRevision` (separate from the low-byte revision number) indicating the controller
/// implements the legacy emulation register at [`HC_LEGACY_OFFSET`].
pub const REVISION_LEGACY_BIT: u32 = 1 << 8;

// HcControl bits.
pub const CTRL_PLE: u32 = 1 << 2;
pub const CTRL_IE: u32 = 1 << 3;
pub const CTRL_CLE: u32 = 1 << 4;
pub const CTRL_BLE: u32 = 1 << 5;
pub const CTRL_HCFS_MASK: u32 = 0b11 << 6;
pub const CTRL_HCFS_SHIFT: u32 = 6;
pub const CTRL_IR: u32 = 1 << 8;
pub const CTRL_RWC: u32 = 1 << 9;
pub const CTRL_RWE: u32 = 1 << 10;

/// HC functional state, the 2-bit `HCFS` field of `HcControl`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FunctionalState {
    Reset,
    Resume,
    Operational,
    Suspend,
}

impl FunctionalState {
    pub fn decode(control: u32) -> FunctionalState {
        match (control & CTRL_HCFS_MASK) >> CTRL_HCFS_SHIFT {
            0b00 => FunctionalState::Reset,
            0b01 => FunctionalState::Resume,
            0b10 => FunctionalState::Operational,
            0b11 => FunctionalState::Suspend,
            _ => unreachable!(),
        }
    }

    pub fn encode(self) -> u32 {
        let bits: u32 = match self {
            FunctionalState::Reset => 0b00,
            FunctionalState::Resume => 0b01,
            FunctionalState::Operational => 0b10,
            FunctionalState::Suspend => 0b11,
        };
        bits << CTRL_HCFS_SHIFT
    }
}

// HcCommandStatus bits.
pub const CMD_HCR: u32 = 1 << 0;
pub const CMD_CLF: u32 = 1 << 1;
pub const CMD_BLF: u32 = 1 << 2;
pub const CMD_OCR: u32 = 1 << 3;

// HcInterruptStatus / HcInterruptEnable / HcInterruptDisable bits.
pub const INT_SO: u32 = 1 << 0;
pub const INT_WDH: u32 = 1 << 1;
pub const INT_SF: u32 = 1 << 2;
pub const INT_RD: u32 = 1 << 3;
pub const INT_UE: u32 = 1 << 4;
pub const INT_FNO: u32 = 1 << 5;
pub const INT_RHSC: u32 = 1 << 6;
pub const INT_OC: u32 = 1 << 30;
pub const INT_MIE: u32 = 1 << 31;

/// The only interrupt sources this core reacts to. `SF` is deliberately excluded: it fires once
/// per millisecond and is masked out in software even when it is observed (section 4.1).
pub const HANDLED_INTERRUPT_MASK: u32 = INT_SO | INT_WDH | INT_UE | INT_RHSC;

// Root hub port status bits (HcRhPortStatus[n]).
pub const RH_PS_CCS: u32 = 1 << 0;
pub const RH_PS_PES: u32 = 1 << 1;
pub const RH_PS_PSS: u32 = 1 << 2;
pub const RH_PS_POCI: u32 = 1 << 3;
pub const RH_PS_PRS: u32 = 1 << 4;
pub const RH_PS_PPS: u32 = 1 << 8;
pub const RH_PS_LSDA: u32 = 1 << 9;
pub const RH_PS_CSC: u32 = 1 << 16;
pub const RH_PS_PESC: u32 = 1 << 17;
pub const RH_PS_PSSC: u32 = 1 << 18;
pub const RH_PS_OCIC: u32 = 1 << 19;
pub const RH_PS_PRSC: u32 = 1 << 20;

/// Typed view over the register window of one OHCI controller.
///
/// Holds only the hardware-access handle and the base address; every accessor reads or writes
/// exactly one register with a single `HwAccessRef` call.
#[derive(Copy, Clone)]
pub struct Registers<TAcc> {
    pub(crate) hardware_access: TAcc,
    pub(crate) base: u64,
}

impl<TAcc> Registers<TAcc>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    pub fn new(hardware_access: TAcc, base: u64) -> Self {
        Registers {
            hardware_access,
            base,
        }
    }

    async fn read32(&self, offset: u64) -> u32 {
        let mut out = [0u32];
        unsafe {
            (&self.hardware_access)
                .read_memory_u32_le(self.base + offset, &mut out)
                .await;
        }
        out[0]
    }

    async fn write32(&self, offset: u64, value: u32) {
        unsafe {
            (&self.hardware_access)
                .write_memory_u32_le(self.base + offset, &[value])
                .await;
        }
    }

    pub async fn revision(&self) -> u8 {
        u8::try_from(self.read32(HC_REVISION_OFFSET).await & 0xff).unwrap()
    }

    /// Whether `HcRevision` reports support for the legacy emulation register.
    pub async fn revision_legacy_support(&self) -> bool {
        self.read32(HC_REVISION_OFFSET).await & REVISION_LEGACY_BIT != 0
    }

    pub async fn control(&self) -> u32 {
        self.read32(HC_CONTROL_OFFSET).await
    }

    pub async fn set_control(&self, value: u32) {
        self.write32(HC_CONTROL_OFFSET, value).await
    }

    pub async fn command_status(&self) -> u32 {
        self.read32(HC_COMMAND_STATUS_OFFSET).await
    }

    pub async fn set_command_status(&self, value: u32) {
        self.write32(HC_COMMAND_STATUS_OFFSET, value).await
    }

    pub async fn interrupt_status(&self) -> u32 {
        self.read32(HC_INTERRUPT_STATUS_OFFSET).await
    }

    /// Write-clears the given bits of `HcInterruptStatus`.
    pub async fn clear_interrupt_status(&self, bits: u32) {
        self.write32(HC_INTERRUPT_STATUS_OFFSET, bits).await
    }

    /// Sets the given bits of `HcInterruptEnable` (write-on-set register).
    pub async fn set_interrupt_enable(&self, bits: u32) {
        self.write32(HC_INTERRUPT_ENABLE_OFFSET, bits).await
    }

    /// Sets the given bits of `HcInterruptDisable`, clearing them in `HcInterruptEnable`.
    pub async fn set_interrupt_disable(&self, bits: u32) {
        self.write32(HC_INTERRUPT_DISABLE_OFFSET, bits).await
    }

    pub async fn set_hcca(&self, physical_address: u32) {
        self.write32(HC_HCCA_OFFSET, physical_address).await
    }

    pub async fn control_head_ed(&self) -> u32 {
        self.read32(HC_CONTROL_HEAD_ED_OFFSET).await
    }

    pub async fn set_control_head_ed(&self, physical_address: u32) {
        self.write32(HC_CONTROL_HEAD_ED_OFFSET, physical_address)
            .await
    }

    pub async fn set_control_current_ed(&self, physical_address: u32) {
        self.write32(HC_CONTROL_CURRENT_ED_OFFSET, physical_address)
            .await
    }

    pub async fn set_bulk_head_ed(&self, physical_address: u32) {
        self.write32(HC_BULK_HEAD_ED_OFFSET, physical_address)
            .await
    }

    pub async fn set_bulk_current_ed(&self, physical_address: u32) {
        self.write32(HC_BULK_CURRENT_ED_OFFSET, physical_address)
            .await
    }

    pub async fn fm_interval(&self) -> u32 {
        self.read32(HC_FM_INTERVAL_OFFSET).await
    }

    pub async fn set_fm_interval(&self, value: u32) {
        self.write32(HC_FM_INTERVAL_OFFSET, value).await
    }

    pub async fn set_periodic_start(&self, value: u32) {
        self.write32(HC_PERIODIC_START_OFFSET, value).await
    }

    pub async fn rh_descriptor_a(&self) -> u32 {
        self.read32(HC_RH_DESCRIPTOR_A_OFFSET).await
    }

    pub async fn rh_port_status(&self, port_zero_based: u8) -> u32 {
        self.read32(HC_RH_PORT_STATUS_1_OFFSET + u64::from(port_zero_based) * 4)
            .await
    }

    pub async fn set_rh_port_status(&self, port_zero_based: u8, value: u32) {
        self.write32(
            HC_RH_PORT_STATUS_1_OFFSET + u64::from(port_zero_based) * 4,
            value,
        )
        .await
    }

    /// Reads the legacy emulation register and masks it down to the gate-A20 bit only.
    pub async fn legacy_gate_a20(&self) -> bool {
        self.read32(HC_LEGACY_OFFSET).await & LEGACY_GATE_A20_BIT != 0
    }

    /// Reads-modifies-writes the legacy emulation register, touching only the gate-A20 bit and
    /// leaving every other bit exactly as it was. Clearing other bits directly can reboot some
    /// platforms (section 4.3).
    pub async fn set_legacy_gate_a20(&self, value: bool) {
        let mut current = self.read32(HC_LEGACY_OFFSET).await;
        if value {
            current |= LEGACY_GATE_A20_BIT;
        } else {
            current &= !LEGACY_GATE_A20_BIT;
        }
        self.write32(HC_LEGACY_OFFSET, current).await
    }

    /// Clears every bit of the legacy emulation register except gate-A20, discarding whatever
    /// else firmware left set there. Part of the handoff sequence, called only when
    /// `HcRevision` reports legacy-register support (section 4.3).
    pub async fn mask_legacy_to_gate_a20(&self) {
        let current = self.read32(HC_LEGACY_OFFSET).await;
        self.write32(HC_LEGACY_OFFSET, current & LEGACY_GATE_A20_BIT)
            .await
    }
}
