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

//! OHCI device handler.
//!
//! [`OhciDevice`] is the root object of this crate: it owns the register window, the HCCA, the
//! four endpoint lists, the pending-batch set and the endpoint registrar, all behind a single
//! async lock, plus whatever root-hub collaborator the embedder supplied.

pub mod batch;
pub mod ep_descriptor;
pub mod ep_list;
pub mod hcca;
pub mod init;
pub mod irq_program;
pub mod poll;
pub mod registers;
pub mod registrar;

use crate::{error::OhciError, root_hub::RootHub, HwAccessRef};
use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicU32, Ordering};
use futures::lock::Mutex;

pub use ep_descriptor::{Config as EndpointConfig, Direction};
pub use registrar::{EndpointKey, TransferType};

/// Mutable scheduling state guarded by a single lock: the pending-batch set, the four endpoint
/// lists, and the registrar are always mutated together under the enable-toggle protocol, so one
/// lock is enough and avoids lock-ordering questions between them.
struct Schedule<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    hcca: hcca::Hcca<TAcc>,
    control_list: ep_list::EndpointList<TAcc>,
    bulk_list: ep_list::EndpointList<TAcc>,
    interrupt_list: ep_list::EndpointList<TAcc>,
    isochronous_list: ep_list::EndpointList<TAcc>,
    registrar: registrar::EndpointRegistrar,
    pending: batch::PendingBatches<TAcc, TUd>,
}

/// A fully attached OHCI host controller.
///
/// `TAcc` is the embedder's [`HwAccessRef`] implementation. `TUd` is whatever user data a
/// scheduled [`batch::TransferBatch`] hands back on completion (a oneshot sender, a waker, a raw
/// buffer handle — the core never looks inside it).
pub struct OhciDevice<TAcc, TUd>
where
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    hardware_access: TAcc,
    registers_location: u64,
    registers: registers::Registers<TAcc>,
    schedule: Mutex<Schedule<TAcc, TUd>>,
    root_hub: Mutex<Option<Box<dyn RootHub<TAcc, TUd> + Send>>>,
    num_root_hub_ports: u8,
    scheduling_overrun_count: AtomicU32,
}

impl<TAcc, TUd> OhciDevice<TAcc, TUd>
where
    TAcc: Clone,
    for<'r> &'r TAcc: HwAccessRef<'r>,
{
    /// Gains ownership of the controller mapped at `registers_location`, resets it, builds the
    /// HCCA and the four endpoint lists, and brings it to the operational state.
    ///
    /// # Safety
    ///
    /// `registers_location` must be the physical address of a genuine OHCI register window, and
    /// nothing else must be concurrently accessing it through `access`.
    pub async unsafe fn init(
        access: TAcc,
        registers_location: u64,
    ) -> Result<OhciDevice<TAcc, TUd>, OhciError> {
        let registers = registers::Registers::new(access.clone(), registers_location);

        init::gain_control(&registers).await?;
        let started = init::reset(&registers).await?;

        let control_list = ep_list::EndpointList::new(access.clone())
            .await
            .map_err(|()| OhciError::OutOfMemory)?;
        let bulk_list = ep_list::EndpointList::new(access.clone())
            .await
            .map_err(|()| OhciError::OutOfMemory)?;
        let mut interrupt_list = ep_list::EndpointList::new(access.clone())
            .await
            .map_err(|()| OhciError::OutOfMemory)?;
        let isochronous_list = ep_list::EndpointList::new(access.clone())
            .await
            .map_err(|()| OhciError::OutOfMemory)?;

        // The interrupt list continues into the isochronous list once its own descriptors run
        // out, since both are walked starting from the same HCCA interrupt-table slots
        // (section 4.3.1).
        interrupt_list.chain_to(isochronous_list.head_pointer()).await;

        let hcca = hcca::Hcca::new(access.clone(), interrupt_list.head_pointer())
            .await
            .map_err(|()| OhciError::OutOfMemory)?;

        init::start(
            &registers,
            &started,
            hcca.pointer().get(),
            control_list.head_pointer().get(),
            bulk_list.head_pointer().get(),
        )
        .await?;

        // HcRhDescriptorA's low 8 bits give the downstream port count (section 7.4.1).
        let num_root_hub_ports = (registers.rh_descriptor_a().await & 0xff) as u8;

        log::info!(
            "OHCI controller at 0x{:x} is operational with {} root hub ports",
            registers_location,
            num_root_hub_ports
        );

        Ok(OhciDevice {
            hardware_access: access,
            registers_location,
            registers,
            schedule: Mutex::new(Schedule {
                hcca,
                control_list,
                bulk_list,
                interrupt_list,
                isochronous_list,
                registrar: registrar::EndpointRegistrar::new(),
                pending: batch::PendingBatches::new(),
            }),
            root_hub: Mutex::new(None),
            num_root_hub_ports,
            scheduling_overrun_count: AtomicU32::new(0),
        })
    }

    /// Installs the embedder's root-hub state machine, calling its `init` hook immediately.
    pub async fn set_root_hub(&self, mut root_hub: Box<dyn RootHub<TAcc, TUd> + Send>) {
        root_hub.init(&self.registers, self.num_root_hub_ports).await;
        *self.root_hub.lock().await = Some(root_hub);
    }

    /// Number of downstream ports the root hub reported at startup.
    pub fn root_hub_num_ports(&self) -> u8 {
        self.num_root_hub_ports
    }

    /// Registers a new endpoint and links its descriptor into the appropriate list.
    ///
    /// Follows the enable-toggle protocol: the relevant list-enable bit in `HcControl` is cleared
    /// before the list is mutated and restored afterwards, so the controller never walks a list
    /// mid-edit. If hardware construction of the descriptor fails, the registrar entry is rolled
    /// back.
    pub async fn add_endpoint(
        &self,
        transfer_type: TransferType,
        config: EndpointConfig,
    ) -> Result<(), OhciError> {
        let key = EndpointKey {
            function_address: config.function_address,
            endpoint_number: config.endpoint_number,
        };

        let mut schedule = self.schedule.lock().await;
        schedule.registrar.register(key, transfer_type)?;

        let enable_bit = enable_bit_for(transfer_type);
        let control = self.registers.control().await;
        self.registers.set_control(control & !enable_bit).await;

        let push_result = match transfer_type {
            TransferType::Control => schedule.control_list.push(config).await,
            TransferType::Bulk => schedule.bulk_list.push(config).await,
            TransferType::Interrupt => schedule.interrupt_list.push(config).await,
            TransferType::Isochronous => schedule.isochronous_list.push(config).await,
        };

        // Control/bulk are only walked from HcControlCurrentED/HcBulkCurrentED, which the
        // controller otherwise leaves pointed at wherever it last stopped; zero it so the next
        // pass starts back at the list head instead of some ED that may no longer be linked in.
        match transfer_type {
            TransferType::Control => self.registers.set_control_current_ed(0).await,
            TransferType::Bulk => self.registers.set_bulk_current_ed(0).await,
            TransferType::Interrupt | TransferType::Isochronous => {}
        }

        self.registers.set_control(control | enable_bit).await;

        if push_result.is_err() {
            let _ = schedule.registrar.unregister(key);
            return Err(OhciError::OutOfMemory);
        }

        Ok(())
    }

    /// Unlinks and forgets a previously-registered endpoint.
    pub async fn remove_endpoint(
        &self,
        transfer_type: TransferType,
        function_address: u8,
        endpoint_number: u8,
    ) -> Result<(), OhciError> {
        let key = EndpointKey {
            function_address,
            endpoint_number,
        };

        let mut schedule = self.schedule.lock().await;

        let enable_bit = enable_bit_for(transfer_type);
        let control = self.registers.control().await;
        self.registers.set_control(control & !enable_bit).await;

        let removed = match transfer_type {
            TransferType::Control => {
                schedule
                    .control_list
                    .remove(function_address, endpoint_number)
                    .await
            }
            TransferType::Bulk => {
                schedule
                    .bulk_list
                    .remove(function_address, endpoint_number)
                    .await
            }
            TransferType::Interrupt => {
                schedule
                    .interrupt_list
                    .remove(function_address, endpoint_number)
                    .await
            }
            TransferType::Isochronous => {
                schedule
                    .isochronous_list
                    .remove(function_address, endpoint_number)
                    .await
            }
        };

        if removed {
            match transfer_type {
                TransferType::Control => self.registers.set_control_current_ed(0).await,
                TransferType::Bulk => self.registers.set_bulk_current_ed(0).await,
                TransferType::Interrupt | TransferType::Isochronous => {}
            }
        } else {
            log::warn!(
                "remove_endpoint({:?}, {}, {}): no hardware descriptor found, unregistering anyway",
                transfer_type,
                function_address,
                endpoint_number
            );
        }

        self.registers.set_control(control | enable_bit).await;

        // Always unregister, even if no hardware ED was found: a logical registration with no
        // hardware counterpart (e.g. a partial add_endpoint) must not be stranded.
        schedule.registrar.unregister(key)
    }

    /// Commits `batch` onto the descriptor of the endpoint it targets and adds it to the pending
    /// set. For control and bulk endpoints this also kicks the relevant `*Filled` command-status
    /// bit, since the controller only re-examines those lists when told to; periodic lists are
    /// walked once per frame regardless.
    pub async fn schedule_batch(
        &self,
        transfer_type: TransferType,
        function_address: u8,
        endpoint_number: u8,
        mut batch: Box<dyn batch::TransferBatch<TAcc, TUd>>,
    ) -> Result<(), OhciError> {
        {
            let mut root_hub = self.root_hub.lock().await;
            if let Some(root_hub) = root_hub.as_mut() {
                if root_hub.address() == Some(function_address) {
                    root_hub.request(batch).await;
                    return Ok(());
                }
            }
        }

        let mut schedule = self.schedule.lock().await;

        {
            let list = match transfer_type {
                TransferType::Control => &schedule.control_list,
                TransferType::Bulk => &schedule.bulk_list,
                TransferType::Interrupt => &schedule.interrupt_list,
                TransferType::Isochronous => &schedule.isochronous_list,
            };
            let ed = list
                .find(function_address, endpoint_number)
                .ok_or(OhciError::NoSuchEndpoint)?;
            batch.commit(ed).await;
        }

        schedule.pending.push(batch);
        drop(schedule);

        match transfer_type {
            TransferType::Control => self.registers.set_command_status(registers::CMD_CLF).await,
            TransferType::Bulk => self.registers.set_command_status(registers::CMD_BLF).await,
            TransferType::Interrupt | TransferType::Isochronous => {}
        }

        Ok(())
    }

    /// Services a real or emulated interrupt: decodes `HcInterruptStatus`, clears the bits this
    /// core handles, and returns the user data of any batch that completed as a result.
    ///
    /// No error from within this function propagates to the caller: `UnrecoverableError` is
    /// logged and triggers a restart attempt, `SchedulingOverrun` is logged and counted. Both are
    /// recoverable conditions from the embedder's point of view.
    pub async fn on_interrupt(&self, status: u32) -> Vec<TUd> {
        if status == 0 {
            return Vec::new();
        }

        let handled = status & registers::HANDLED_INTERRUPT_MASK;
        if handled != 0 {
            self.registers.clear_interrupt_status(handled).await;
        }

        if status & registers::INT_SO != 0 {
            let count = self.scheduling_overrun_count.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("OHCI scheduling overrun (cumulative count: {})", count);
        }

        if status & registers::INT_UE != 0 {
            log::error!("OHCI controller reported an unrecoverable error; restarting it");
            if let Err(err) = self.restart().await {
                log::error!("restart after UnrecoverableError failed: {}", err);
            }
        }

        if status & registers::INT_RHSC != 0 {
            if let Some(root_hub) = self.root_hub.lock().await.as_mut() {
                root_hub.interrupt(&self.registers).await;
            }
        }

        if status & registers::INT_WDH != 0 {
            let mut schedule = self.schedule.lock().await;
            let _done_head = schedule.hcca.done_head().await;
            return schedule.pending.reap_completed();
        }

        Vec::new()
    }

    /// Re-runs the handoff and start sequence in place, used after an unrecoverable error.
    async fn restart(&self) -> Result<(), OhciError> {
        init::gain_control(&self.registers).await?;
        let started = init::reset(&self.registers).await?;

        let schedule = self.schedule.lock().await;
        init::start(
            &self.registers,
            &started,
            schedule.hcca.pointer().get(),
            schedule.control_list.head_pointer().get(),
            schedule.bulk_list.head_pointer().get(),
        )
        .await
    }

    /// Builds the IRQ-context pseudo-program for this controller's register window.
    pub fn build_irq_program(&self, buf: &mut [irq_program::IrqOp]) -> Result<usize, OhciError> {
        irq_program::build_into(buf, self.registers_location)
    }

    /// Runs the polling fallback until `stop` is signaled, invoking `on_complete` for every batch
    /// that finishes along the way.
    pub async fn run_poll_loop(&self, stop: poll::PollStop, mut on_complete: impl FnMut(TUd)) {
        poll::run(
            stop,
            |duration| (&self.hardware_access).delay(duration),
            || async {
                let status = self.registers.interrupt_status().await;
                for ud in self.on_interrupt(status).await {
                    on_complete(ud);
                }
            },
        )
        .await;
    }
}

fn enable_bit_for(transfer_type: TransferType) -> u32 {
    match transfer_type {
        TransferType::Control => registers::CTRL_CLE,
        TransferType::Bulk => registers::CTRL_BLE,
        TransferType::Interrupt | TransferType::Isochronous => registers::CTRL_PLE | registers::CTRL_IE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use alloc::sync::Arc;
    use futures::{future::LocalBoxFuture, FutureExt as _};
    use futures_executor::block_on;

    struct FakeRootHub {
        addr: u8,
        request_count: Arc<AtomicU32>,
    }

    impl RootHub<FakeHardware, u32> for FakeRootHub {
        fn init<'a>(
            &'a mut self,
            _registers: &'a registers::Registers<FakeHardware>,
            _num_ports: u8,
        ) -> LocalBoxFuture<'a, ()> {
            async move {}.boxed_local()
        }

        fn interrupt<'a>(
            &'a mut self,
            _registers: &'a registers::Registers<FakeHardware>,
        ) -> LocalBoxFuture<'a, ()> {
            async move {}.boxed_local()
        }

        fn request<'a>(
            &'a mut self,
            _batch: Box<dyn batch::TransferBatch<FakeHardware, u32>>,
        ) -> LocalBoxFuture<'a, ()> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            async move {}.boxed_local()
        }

        fn address(&self) -> Option<u8> {
            Some(self.addr)
        }
    }

    struct FakeRootHubBatch;

    impl batch::TransferBatch<FakeHardware, u32> for FakeRootHubBatch {
        fn commit<'a>(
            &'a mut self,
            _ed: &'a ep_descriptor::EndpointDescriptor<FakeHardware>,
        ) -> LocalBoxFuture<'a, ()> {
            unreachable!("a batch targeting the root hub must never be committed to a real endpoint list")
        }

        fn is_complete(&self) -> bool {
            false
        }

        fn finish(self: Box<Self>) -> u32 {
            unreachable!()
        }
    }

    fn config(function_address: u8, endpoint_number: u8) -> EndpointConfig {
        EndpointConfig {
            maximum_packet_size: 64,
            function_address,
            endpoint_number,
            isochronous: false,
            low_speed: false,
            direction: Direction::In,
        }
    }

    async fn init_device(hw: &FakeHardware) -> OhciDevice<FakeHardware, u32> {
        unsafe {
            hw.write_memory_u32_le(registers::HC_REVISION_OFFSET, &[0x10])
                .await;
            OhciDevice::init(hw.clone(), 0).await.unwrap()
        }
    }

    #[test]
    fn init_reaches_operational_state() {
        let hw = FakeHardware::new();
        block_on(async {
            let device = init_device(&hw).await;
            let control = device.registers.control().await;
            assert_eq!(
                registers::FunctionalState::decode(control),
                registers::FunctionalState::Operational
            );
        });
    }

    #[test]
    fn add_then_remove_endpoint_round_trips() {
        let hw = FakeHardware::new();
        block_on(async {
            let device = init_device(&hw).await;
            device
                .add_endpoint(TransferType::Bulk, config(1, 2))
                .await
                .unwrap();
            device
                .remove_endpoint(TransferType::Bulk, 1, 2)
                .await
                .unwrap();
            assert!(matches!(
                device.remove_endpoint(TransferType::Bulk, 1, 2).await,
                Err(OhciError::NoSuchEndpoint)
            ));
        });
    }

    #[test]
    fn no_interrupt_status_yields_no_completions() {
        let hw = FakeHardware::new();
        block_on(async {
            let device = init_device(&hw).await;
            assert!(device.on_interrupt(0).await.is_empty());
        });
    }

    #[test]
    fn batch_targeting_root_hub_address_is_forwarded_not_committed() {
        let hw = FakeHardware::new();
        block_on(async {
            let device = init_device(&hw).await;
            let request_count = Arc::new(AtomicU32::new(0));
            device
                .set_root_hub(Box::new(FakeRootHub {
                    addr: 0,
                    request_count: request_count.clone(),
                }))
                .await;

            device
                .schedule_batch(TransferType::Control, 0, 0, Box::new(FakeRootHubBatch))
                .await
                .unwrap();

            assert_eq!(request_count.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn irq_program_fits_a_correctly_sized_buffer() {
        let hw = FakeHardware::new();
        block_on(async {
            let device = init_device(&hw).await;
            let mut buf = [irq_program::IrqOp::Accept; irq_program::PROGRAM_LEN];
            assert_eq!(device.build_irq_program(&mut buf).unwrap(), irq_program::PROGRAM_LEN);
        });
    }
}
