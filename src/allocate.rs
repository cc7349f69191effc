/*!
    address allocation rules

    when an unaddressed device answers a discovery broadcast, the slot it gets is chosen by the first matching rule:

    1. a mapped slot, offline, not yet heard of or still waiting for ack, already bound to this identifier: the device gets its previous address back
    2. a mapped slot online and bound to this identifier: the device rebooted without the table noticing. The slot goes back to waiting for ack, and no address is issued this round
    3. the first unmapped slot
    4. the first mapped slot, offline or not yet heard of, bound to another identifier: that stale binding is evicted

    This order keeps addresses stable for known devices, grows the table lazily, and only reclaims dead slots last so a device slow to answer is not evicted.
*/

use log::*;
use thiserror::Error;

use crate::{
    device::Uniid,
    table::{ClassTable, Slot, State},
    };


#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// every slot is bound to a live device
    #[error("no address available")]
    NoSlotAvailable,
    /// the device was thought online at this address, it will be reassigned on next discovery
    #[error("device already allocated at {address:#04X}, probably rebooted")]
    AlreadyAllocated { address: u8 },
}

/// slot chosen for a device, as an index in its class table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// rule 1, the device gets its previous address back
    Reuse(usize),
    /// rule 2, the device rebooted while thought online
    Conflict(usize),
    /// rule 3, first unmapped slot
    Claim(usize),
    /// rule 4, stale binding replaced
    Evict(usize),
}
impl Decision {
    pub fn index(self) -> usize {
        match self {
            Self::Reuse(i) | Self::Conflict(i) | Self::Claim(i) | Self::Evict(i) => i,
        }
    }
    /// whether committing this decision changes the persisted identifiers
    pub fn rebinds(self) -> bool {
        matches!(self, Self::Claim(_) | Self::Evict(_))
    }
}

/// choose a slot for the given identifier, without touching the table
pub fn decide(uniid: &Uniid, table: &ClassTable) -> Result<Decision, AllocError> {
    let slots = table.slots();
    let bound = |slot: &Slot| slot.mapped && slot.uniid == *uniid;
    // a device still waiting for ack keeps its pending address, so one identifier never waits on two slots
    if let Some(i) = slots.iter().position(|slot| bound(slot)
            && (slot.state.unreachable() || slot.state == State::WaitingForAck)) {
        return Ok(Decision::Reuse(i));
    }
    if let Some(i) = slots.iter().position(|slot| bound(slot) && slot.state == State::Online) {
        return Ok(Decision::Conflict(i));
    }
    if let Some(i) = slots.iter().position(|slot| !slot.mapped) {
        return Ok(Decision::Claim(i));
    }
    if let Some(i) = slots.iter().position(|slot| slot.mapped && slot.state.unreachable() && slot.uniid != *uniid) {
        return Ok(Decision::Evict(i));
    }
    Err(AllocError::NoSlotAvailable)
}

/// apply a decision taken by [decide] for the given identifier, returning the address to assign
///
/// a decision pointing outside the table commits nothing
pub fn commit(decision: Decision, uniid: &Uniid, table: &mut ClassTable) -> Result<u8, AllocError> {
    let class = table.class();
    let Some(slot) = table.slots_mut().get_mut(decision.index())
        else {return Err(AllocError::NoSlotAvailable)};
    match decision {
        Decision::Reuse(_) => {
            slot.state = State::WaitingForAck;
            info!("{}: {} gets its address {:#04X} back", class, uniid, slot.address());
        },
        Decision::Conflict(_) => {
            slot.state = State::WaitingForAck;
            slot.acked = false;
            warn!("{}: {} answered a broadcast while online at {:#04X}, probably rebooted",
                class, uniid, slot.address());
            return Err(AllocError::AlreadyAllocated {address: slot.address()});
        },
        Decision::Claim(_) => {
            slot.bind(uniid.clone());
            info!("{}: {} claims free address {:#04X}", class, uniid, slot.address());
        },
        Decision::Evict(_) => {
            info!("{}: {} evicts {} from {:#04X}", class, uniid, slot.uniid, slot.address());
            slot.bind(uniid.clone());
        },
    }
    Ok(slot.address())
}

/// decide and commit, returning the decision along the address so callers know whether identifiers changed
pub fn allocate(uniid: &Uniid, table: &mut ClassTable) -> Result<(Decision, u8), AllocError> {
    let decision = decide(uniid, table)?;
    commit(decision, uniid, table).map(|address| (decision, address))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClassConfig,
        device::DeviceClass,
        };

    fn uniid(bytes: &[u8]) -> Uniid {
        Uniid::try_from(bytes).unwrap()
    }
    fn feeders() -> ClassTable {
        ClassTable::new(&ClassConfig::new(DeviceClass::Feeder)).unwrap()
    }
    fn bind(table: &mut ClassTable, address: u8, id: &[u8], state: State) {
        let slot = table.slot_at_mut(address).unwrap();
        slot.bind(uniid(id));
        slot.state = state;
    }

    #[test]
    fn claims_first_free_slot() {
        let mut table = feeders();
        assert_eq!(allocate(&uniid(&[0xAA, 0xBB]), &mut table), Ok((Decision::Claim(0), 1)));
        let slot = table.slot_at(1).unwrap();
        assert!(slot.mapped);
        assert_eq!(slot.state, State::WaitingForAck);
        assert_eq!(slot.uniid, uniid(&[0xAA, 0xBB]));

        assert_eq!(allocate(&uniid(&[0xCC]), &mut table), Ok((Decision::Claim(1), 2)));
    }

    #[test]
    fn known_device_before_free_slot() {
        let mut table = feeders();
        bind(&mut table, 3, &[0xAA], State::Offline);
        assert_eq!(allocate(&uniid(&[0xAA]), &mut table), Ok((Decision::Reuse(2), 3)));
        assert_eq!(table.slot_at(3).unwrap().state, State::WaitingForAck);

        let mut table = feeders();
        bind(&mut table, 4, &[0xAA], State::Init);
        assert_eq!(decide(&uniid(&[0xAA]), &table), Ok(Decision::Reuse(3)));
    }

    #[test]
    fn online_device_broadcasting_is_a_conflict() {
        let mut table = feeders();
        bind(&mut table, 1, &[0xAA, 0xBB], State::Online);
        table.slot_at_mut(1).unwrap().ack();
        assert_eq!(
            allocate(&uniid(&[0xAA, 0xBB]), &mut table),
            Err(AllocError::AlreadyAllocated {address: 1}),
            );
        let slot = table.slot_at(1).unwrap();
        assert_eq!(slot.state, State::WaitingForAck);
        assert!(!slot.acked);
        // nothing else was claimed
        assert_eq!(table.count(|slot| slot.mapped), 1);
    }

    #[test]
    fn waiting_device_keeps_pending_address() {
        let mut table = feeders();
        bind(&mut table, 2, &[0xAA], State::WaitingForAck);
        assert_eq!(allocate(&uniid(&[0xAA]), &mut table), Ok((Decision::Reuse(1), 2)));
        assert_eq!(table.count(|slot| slot.state == State::WaitingForAck), 1);
        assert_eq!(table.count(|slot| slot.mapped), 1);
    }

    #[test]
    fn unreachable_binding_before_online_duplicate() {
        // same identifier in two slots, as left by a table fetch overwriting a slot
        let mut table = feeders();
        bind(&mut table, 1, &[0xAA], State::Online);
        bind(&mut table, 2, &[0xAA], State::Offline);
        assert_eq!(allocate(&uniid(&[0xAA]), &mut table), Ok((Decision::Reuse(1), 2)));
        assert_eq!(table.slot_at(1).unwrap().state, State::Online);
        assert_eq!(table.slot_at(2).unwrap().state, State::WaitingForAck);
    }

    #[test]
    fn foreign_decision_commits_nothing() {
        let mut table = ClassTable::new(&ClassConfig::new(DeviceClass::BeltTensioner)).unwrap();
        let before = table.clone();
        assert_eq!(commit(Decision::Claim(3), &uniid(&[0xAA]), &mut table), Err(AllocError::NoSlotAvailable));
        assert_eq!(table, before);
    }

    #[test]
    fn evicts_stale_bindings_last() {
        let mut table = feeders();
        bind(&mut table, 1, &[0x01], State::Online);
        bind(&mut table, 2, &[0x02], State::Offline);
        bind(&mut table, 3, &[0x03], State::Init);
        bind(&mut table, 4, &[0x04], State::Online);
        assert_eq!(allocate(&uniid(&[0x05]), &mut table), Ok((Decision::Evict(1), 2)));
        assert_eq!(table.slot_at(2).unwrap().uniid, uniid(&[0x05]));
        assert_eq!(table.slot_at(2).unwrap().state, State::WaitingForAck);
    }

    #[test]
    fn exhausted_table() {
        let mut table = feeders();
        for address in 1 ..= 4 {
            bind(&mut table, address, &[address], State::Online);
        }
        let before = table.clone();
        assert_eq!(allocate(&uniid(&[0x99]), &mut table), Err(AllocError::NoSlotAvailable));
        assert_eq!(table, before);
    }

    #[test]
    fn decisions_are_deterministic() {
        let mut table = feeders();
        bind(&mut table, 2, &[0x02], State::Offline);
        bind(&mut table, 1, &[0x01], State::Online);
        for id in [&[0x02][..], &[0x01], &[0x07]] {
            let first = decide(&uniid(id), &table);
            for _ in 0 .. 3 {
                assert_eq!(decide(&uniid(id), &table), first);
            }
        }
        assert!(Decision::Claim(0).rebinds());
        assert!(Decision::Evict(0).rebinds());
        assert!(!Decision::Reuse(0).rebinds());
    }
}
