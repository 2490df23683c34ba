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

//! Handoff and startup.
//!
//! Because of legacy compatibility, the OHCI controller can be in three possible states when the
//! operating system starts:
//!
//! - Used by the System Management Mode driver (SMM). The SMM driver is one of the first
//! components that starts at system initialization, and redirects the legacy PS/2 I/O ports to
//! the USB controller. If the SMM driver has ownership of the OHCI controller, the
//! `InterruptRouting` bit is set in the `HcControl` register.
//!
//! - Used by the BIOS, or by a previous operating system driver. If the BIOS has ownership of the
//! OHCI controller, the `InterruptRouting` bit is not set and `HostControllerFunctionalState`
//! is not `Reset`.
//!
//! - Not powered up. The `InterruptRouting` bit is not set and `HostControllerFunctionalState` is
//! `Reset`.
//!
//! See also section 5.1.1.3 of the specs. [`gain_control`] performs this handoff. Once it
//! returns, the caller is free to reset and bring the controller to the operational state with
//! [`reset`] and [`start`].

use crate::{
    error::OhciError,
    ohci::registers::{self, FunctionalState, Registers},
    HwAccessRef,
};
use core::convert::TryFrom as _;
use core::time::Duration;

/// Acquires ownership of the controller from whichever of SMM, the BIOS, or a previous driver
/// currently holds it, leaving it in a known, non-operational state.
///
/// The SMM branch of this function spins for an unbounded amount of time: there is no timeout
/// specified in section 5.1.1.3.3, and a buggy or absent SMM handler that never releases
/// ownership is indistinguishable from one that is merely slow (see DESIGN.md).
pub async fn gain_control<TAcc>(regs: &Registers<TAcc>) -> Result<(), OhciError>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    // See section 5.1.1.2. We start by checking whether the revision is one we know.
    let revision = regs.revision().await;
    if revision & 0x0f != 0x0 || (revision >> 4) != 0x1 {
        return Err(OhciError::BadRevision(revision));
    }

    // If the legacy-support bit is set, the legacy emulation register may have other bits set by
    // firmware; mask it down to the gate-A20 bit only, since clearing the other bits directly can
    // reboot some platforms (section 4.3).
    if regs.revision_legacy_support().await {
        regs.mask_legacy_to_gate_a20().await;
    }

    let control = regs.control().await;
    let interrupt_routing = control & registers::CTRL_IR != 0;
    let functional_state = FunctionalState::decode(control);

    if interrupt_routing {
        // Owned by SMM. See section 5.1.1.3.3: ask it to give up ownership, then wait for it to
        // clear InterruptRouting.
        regs.set_command_status(registers::CMD_OCR).await;

        loop {
            let control = regs.control().await;
            if control & registers::CTRL_IR == 0 {
                break;
            }
            (&regs.hardware_access).delay(Duration::from_micros(500)).await;
        }

        // Once SMM has released ownership, the state it leaves HcControl in is unspecified;
        // place the controller into Reset and wait out the same 50ms settling time as the
        // cold-start path before returning (section 4.3 step 2).
        let mut new_control = regs.control().await;
        new_control &= !registers::CTRL_HCFS_MASK;
        new_control |= FunctionalState::Reset.encode();
        regs.set_control(new_control).await;
        (&regs.hardware_access).delay(Duration::from_millis(50)).await;
    } else {
        match functional_state {
            FunctionalState::Reset => {
                // Not powered up yet. See section 5.1.1.3.5. We don't know how long the
                // controller has been in this state, so wait long enough that downstream devices
                // are guaranteed to have seen the reset.
                (&regs.hardware_access).delay(Duration::from_millis(50)).await;
            }
            FunctionalState::Operational => {
                // Owned by the BIOS or a previous driver and already running. See section
                // 5.1.1.3.4. Nothing to do before the reset below.
            }
            FunctionalState::Resume | FunctionalState::Suspend => {
                // Owned by the BIOS or a previous driver, but not currently running. Switch to
                // Resume and wait out the resume signaling before resetting.
                let mut new_control = control;
                new_control &= !(registers::CTRL_PLE
                    | registers::CTRL_IE
                    | registers::CTRL_CLE
                    | registers::CTRL_BLE);
                new_control &= !registers::CTRL_HCFS_MASK;
                new_control |= FunctionalState::Resume.encode();
                regs.set_control(new_control).await;
                (&regs.hardware_access).delay(Duration::from_millis(50)).await;
            }
        }
    }

    Ok(())
}

/// Result of the register-level reset, needed by [`start`] to compute `HcPeriodicStart`.
pub struct StartedController {
    /// Raw value of `HcFmInterval` that was live before the reset, restored afterwards since
    /// firmware sometimes tunes it at boot.
    pub fm_interval_value: u32,
}

/// Resets the controller, per section 5.1.1.4. Must be called after [`gain_control`].
///
/// Only resets the controller and snapshots `HcFmInterval`; the caller still owns writing
/// `HcHCCA` and the list head pointers once it has built the HCCA and endpoint lists, which is
/// why that part is split out into [`start`].
pub async fn reset<TAcc>(regs: &Registers<TAcc>) -> Result<StartedController, OhciError>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    let fm_interval_value = regs.fm_interval().await;

    // HostControllerReset is a write-on-set bit; this doesn't disturb any other field.
    regs.set_command_status(registers::CMD_HCR).await;

    // The reset lasts for a maximum of 10us, per the specs.
    (&regs.hardware_access).delay(Duration::from_micros(10)).await;

    Ok(StartedController { fm_interval_value })
}

/// Finishes bringing the controller to the operational state once the HCCA and the four endpoint
/// lists exist: publishes their physical addresses, restores the frame interval, derives
/// `HcPeriodicStart`, enables list processing, and switches `HcControl` to `Operational`.
pub async fn start<TAcc>(
    regs: &Registers<TAcc>,
    started: &StartedController,
    hcca_pointer: u32,
    control_head: u32,
    bulk_head: u32,
) -> Result<(), OhciError>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    regs.set_hcca(hcca_pointer).await;
    regs.set_control_head_ed(control_head).await;
    regs.set_control_current_ed(0).await;
    regs.set_bulk_head_ed(bulk_head).await;
    regs.set_bulk_current_ed(0).await;

    // The controller resets HcFmInterval to its own default; toggling FrameIntervalToggle (bit
    // 31) relative to its pre-reset value tells it to pick up the restored value instead of
    // ignoring it as unchanged. See section 7.3.2.
    let restored_fm_interval = started.fm_interval_value ^ (1 << 31);
    regs.set_fm_interval(restored_fm_interval).await;

    // Reserve 10% of each frame for non-periodic traffic, a conventional split.
    let frame_interval = u32::try_from(started.fm_interval_value & 0x3fff).unwrap();
    regs.set_periodic_start(frame_interval * 9 / 10).await;

    let operational_control = FunctionalState::Operational.encode()
        | registers::CTRL_PLE
        | registers::CTRL_IE
        | registers::CTRL_CLE
        | registers::CTRL_BLE;
    regs.set_control(operational_control).await;

    regs.set_interrupt_enable(registers::HANDLED_INTERRUPT_MASK | registers::INT_MIE)
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use futures_executor::block_on;

    #[test]
    fn unknown_revision_is_rejected() {
        let hw = FakeHardware::new();
        block_on(async {
            let regs = Registers::new(hw, 0);
            // Revision defaults to 0 in the fake backend, which isn't 0x1x.
            assert!(matches!(
                gain_control(&regs).await,
                Err(OhciError::BadRevision(_))
            ));
        });
    }

    #[test]
    fn cold_start_waits_then_resets_cleanly() {
        let hw = FakeHardware::new();
        block_on(async {
            let regs = Registers::new(hw, 0);
            unsafe {
                (&regs.hardware_access)
                    .write_memory_u32_le(registers::HC_REVISION_OFFSET, &[0x10])
                    .await;
            }
            gain_control(&regs).await.unwrap();
            let started = reset(&regs).await.unwrap();
            start(&regs, &started, 0x3000, 0x4000, 0x5000)
                .await
                .unwrap();

            let control = regs.control().await;
            assert_eq!(FunctionalState::decode(control), FunctionalState::Operational);
        });
    }
}
