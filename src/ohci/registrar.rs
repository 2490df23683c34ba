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

//! Binds logical `(address, endpoint, direction)` tuples to the transfer type they were
//! registered with, and accounts for the bandwidth periodic endpoints reserve out of each frame.

use crate::error::OhciError;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;

/// Which of the four controller-maintained lists an endpoint belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

impl TransferType {
    fn is_periodic(self) -> bool {
        matches!(self, TransferType::Interrupt | TransferType::Isochronous)
    }
}

/// Logical key identifying an endpoint independently of where its descriptor lives in memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub function_address: u8,
    pub endpoint_number: u8,
}

#[derive(Debug, Clone)]
pub struct RegisteredEndpoint {
    pub transfer_type: TransferType,
    /// Number of the 32 periodic slots this endpoint occupies. Zero for control and bulk
    /// endpoints, which aren't bandwidth-limited by this accounting scheme.
    pub bandwidth_slots: u32,
}

/// Total periodic bandwidth budget, expressed in slots out of the 32-entry interrupt table.
///
/// This is a slot count, not a byte budget: every periodic endpoint occupies exactly one slot
/// regardless of its packet size, since all interrupt-table entries share the same 1 ms polling
/// rate in this core (see [`crate::ohci::hcca`]).
pub const BANDWIDTH_BUDGET_SLOTS: u32 = 32;

/// Tracks which endpoints are registered and how much of the periodic bandwidth budget is spent.
pub struct EndpointRegistrar {
    endpoints: HashMap<EndpointKey, RegisteredEndpoint, FnvBuildHasher>,
    periodic_slots_used: u32,
}

impl EndpointRegistrar {
    pub fn new() -> Self {
        EndpointRegistrar {
            endpoints: HashMap::with_hasher(FnvBuildHasher::default()),
            periodic_slots_used: 0,
        }
    }

    /// Registers a new endpoint. Fails with [`OhciError::BandwidthExhausted`] if the endpoint is
    /// periodic and would push total usage past [`BANDWIDTH_BUDGET_SLOTS`]; the registrar is left
    /// untouched in that case.
    pub fn register(&mut self, key: EndpointKey, transfer_type: TransferType) -> Result<(), OhciError> {
        let bandwidth_slots = if transfer_type.is_periodic() { 1 } else { 0 };

        if self.periodic_slots_used + bandwidth_slots > BANDWIDTH_BUDGET_SLOTS {
            return Err(OhciError::BandwidthExhausted);
        }

        self.endpoints.insert(
            key,
            RegisteredEndpoint {
                transfer_type,
                bandwidth_slots,
            },
        );
        self.periodic_slots_used += bandwidth_slots;
        Ok(())
    }

    /// Removes a previously-registered endpoint, returning its bandwidth to the budget.
    pub fn unregister(&mut self, key: EndpointKey) -> Result<(), OhciError> {
        let removed = self.endpoints.remove(&key).ok_or(OhciError::NoSuchEndpoint)?;
        self.periodic_slots_used -= removed.bandwidth_slots;
        Ok(())
    }

    pub fn get(&self, key: EndpointKey) -> Option<&RegisteredEndpoint> {
        self.endpoints.get(&key)
    }

    pub fn periodic_slots_used(&self) -> u32 {
        self.periodic_slots_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> EndpointKey {
        EndpointKey {
            function_address: n,
            endpoint_number: 1,
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut registrar = EndpointRegistrar::new();
        registrar.register(key(1), TransferType::Bulk).unwrap();
        assert_eq!(registrar.get(key(1)).unwrap().transfer_type, TransferType::Bulk);
    }

    #[test]
    fn unregister_frees_bandwidth() {
        let mut registrar = EndpointRegistrar::new();
        registrar.register(key(1), TransferType::Interrupt).unwrap();
        assert_eq!(registrar.periodic_slots_used(), 1);
        registrar.unregister(key(1)).unwrap();
        assert_eq!(registrar.periodic_slots_used(), 0);
    }

    #[test]
    fn unregister_unknown_endpoint_errors() {
        let mut registrar = EndpointRegistrar::new();
        assert!(matches!(registrar.unregister(key(1)), Err(OhciError::NoSuchEndpoint)));
    }

    #[test]
    fn bulk_and_control_endpoints_never_exhaust_bandwidth() {
        let mut registrar = EndpointRegistrar::new();
        for n in 0..64 {
            registrar.register(key(n), TransferType::Bulk).unwrap();
        }
        assert_eq!(registrar.periodic_slots_used(), 0);
    }

    /// The 33rd periodic endpoint against a budget of 32 slots must be rejected.
    #[test]
    fn thirty_third_periodic_endpoint_exhausts_bandwidth() {
        let mut registrar = EndpointRegistrar::new();
        for n in 0..32 {
            registrar.register(key(n), TransferType::Interrupt).unwrap();
        }
        assert_eq!(registrar.periodic_slots_used(), 32);
        let result = registrar.register(key(32), TransferType::Interrupt);
        assert!(matches!(result, Err(OhciError::BandwidthExhausted)));
        assert_eq!(registrar.periodic_slots_used(), 32);
    }
}
