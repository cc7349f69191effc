use log::*;

use crate::{
    allocate::{allocate, AllocError},
    device::{DeviceClass, Mode, Response},
    table::{AddressBook, State},
    };
use super::events::{Event, EventKind, Listener};


/// table changes the caller must act upon
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// class whose identifiers changed and must be persisted before going on
    pub changed: Option<DeviceClass>,
    /// result of the allocation triggered by a discovery answer
    pub allocation: Option<Result<u8, AllocError>>,
}

/**
    apply an answer to the address book

    at most one slot is changed, and only when the answer matches what the table expects from that slot. Answers from classes not managed here are dropped.
*/
pub fn interpret(book: &mut AddressBook, response: &Response, listener: &mut impl Listener) -> Outcome {
    let mut outcome = Outcome::default();
    let Some(info) = response.info()
        else {
            debug!("{:#04X} acknowledged loader recovery", response.address());
            return outcome;
        };
    let Some(table) = book.class_mut(info.class)
        else {
            warn!("answer from {:#04X} for unmanaged class {}, dropped", response.address(), info.class);
            return outcome;
        };
    let class = table.class();
    if info.uniid.is_unset() {
        warn!("{}: answer from {:#04X} with unset identifier, dropped", class, response.address());
        return outcome;
    }

    // firmware mode follows the identifier, whatever the request was
    if let Some(slot) = table.slot_of_mut(&info.uniid) {
        slot.mode = info.mode;
        if info.mode == Mode::Loader {
            info!("{}: {:#04X} in loader mode", class, slot.address());
        }
    }

    match response {
        Response::SlaveInfo {..} => {
            info!("{}: {} in {:?} mode answered discovery", class, info.uniid, info.mode);
            match allocate(&info.uniid, table) {
                Ok((decision, address)) => {
                    if decision.rebinds() {
                        outcome.changed = Some(class);
                    }
                    listener.notify(Event::new(EventKind::DiscoveryComplete, class, address));
                    outcome.allocation = Some(Ok(address));
                },
                Err(err) => {
                    outcome.allocation = Some(Err(err));
                },
            }
        },
        Response::SlaveAddr {address, ..} => match table.slot_at_mut(*address) {
            Some(slot) if slot.mapped
                    && matches!(slot.state, State::Init | State::WaitingForAck)
                    && !slot.acked
                    && slot.uniid == info.uniid => {
                slot.ack();
                slot.state = State::Online;
                info!("{}: {:#04X} acked its address", class, slot.address());
                listener.notify(Event::new(EventKind::AssignmentComplete, class, slot.address()));
            },
            _ => debug!("{}: unexpected address ack from {:#04X} by {}", class, address, info.uniid),
        },
        Response::OnlineCheck {address, ..} => match table.slot_at_mut(*address) {
            Some(slot) if slot.mapped && slot.uniid == info.uniid => {
                slot.ack();
                if slot.state != State::Online {
                    slot.state = State::Online;
                    info!("{}: {:#04X} connected", class, slot.address());
                    listener.notify(Event::new(EventKind::Connected, class, slot.address()));
                }
            },
            _ => debug!("{}: heartbeat from {:#04X} by unexpected {}", class, address, info.uniid),
        },
        Response::AddrTable {address, ..} => match table.slot_at_mut(*address) {
            Some(slot) => {
                // the device knows better than the persisted record
                slot.uniid = info.uniid.clone();
                slot.mapped = true;
                slot.ack();
                slot.state = State::Online;
                outcome.changed = Some(class);
                info!("{}: {:#04X} reported {}", class, slot.address(), info.uniid);
            },
            None => debug!("{}: table answer from unprovisioned {:#04X}", class, address),
        },
        Response::LoaderToApp {..} => {},
    }
    outcome
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClassConfig,
        device::{DeviceInfo, Uniid},
        };

    fn uniid(bytes: &[u8]) -> Uniid {
        Uniid::try_from(bytes).unwrap()
    }
    fn info(id: &[u8], mode: Mode) -> DeviceInfo {
        DeviceInfo {class: DeviceClass::Feeder, mode, uniid: uniid(id)}
    }
    fn book() -> AddressBook {
        AddressBook::new(&[ClassConfig::new(DeviceClass::Feeder)]).unwrap()
    }
    fn slot(book: &AddressBook, address: u8) -> &crate::table::Slot {
        book.class(DeviceClass::Feeder).unwrap().slot_at(address).unwrap()
    }

    #[test]
    fn discovery_allocates() {
        let mut book = book();
        let mut events = Vec::<Event>::new();
        let outcome = interpret(&mut book, &Response::SlaveInfo {address: 0xFE, info: info(&[0xAA, 0xBB], Mode::App)}, &mut events);
        assert_eq!(outcome, Outcome {changed: Some(DeviceClass::Feeder), allocation: Some(Ok(1))});
        assert_eq!(slot(&book, 1).state, State::WaitingForAck);
        assert_eq!(events, [Event::new(EventKind::DiscoveryComplete, DeviceClass::Feeder, 1)]);

        // a known device coming back does not change persisted identifiers
        book.class_mut(DeviceClass::Feeder).unwrap().slot_at_mut(1).unwrap().state = State::Offline;
        let outcome = interpret(&mut book, &Response::SlaveInfo {address: 0xFE, info: info(&[0xAA, 0xBB], Mode::App)}, &mut events);
        assert_eq!(outcome, Outcome {changed: None, allocation: Some(Ok(1))});
    }

    #[test]
    fn address_ack_requires_matching_pending_slot() {
        let mut book = book();
        let mut events = Vec::<Event>::new();
        interpret(&mut book, &Response::SlaveInfo {address: 0xFE, info: info(&[0xAA], Mode::App)}, &mut ());

        // wrong identifier, wrong address
        interpret(&mut book, &Response::SlaveAddr {address: 1, info: info(&[0xCC], Mode::App)}, &mut events);
        interpret(&mut book, &Response::SlaveAddr {address: 2, info: info(&[0xAA], Mode::App)}, &mut events);
        assert_eq!(slot(&book, 1).state, State::WaitingForAck);
        assert!(events.is_empty());

        let outcome = interpret(&mut book, &Response::SlaveAddr {address: 1, info: info(&[0xAA], Mode::App)}, &mut events);
        assert_eq!(outcome, Outcome::default());
        let acked = slot(&book, 1);
        assert_eq!(acked.state, State::Online);
        assert!(acked.acked);
        assert_eq!(acked.lost, 0);
        assert_eq!(events, [Event::new(EventKind::AssignmentComplete, DeviceClass::Feeder, 1)]);
    }

    #[test]
    fn heartbeat_reconnects() {
        let mut book = book();
        {
            let slot = book.class_mut(DeviceClass::Feeder).unwrap().slot_at_mut(2).unwrap();
            slot.bind(uniid(&[0x42]));
            slot.state = State::Offline;
            slot.lost = 5;
        }
        let mut events = Vec::<Event>::new();
        let heartbeat = Response::OnlineCheck {address: 2, info: info(&[0x42], Mode::App)};
        interpret(&mut book, &heartbeat, &mut events);
        interpret(&mut book, &heartbeat, &mut events);
        assert_eq!(slot(&book, 2).state, State::Online);
        assert_eq!(slot(&book, 2).lost, 0);
        // notified once per transition
        assert_eq!(events, [Event::new(EventKind::Connected, DeviceClass::Feeder, 2)]);
    }

    #[test]
    fn table_answer_overwrites() {
        let mut book = book();
        book.class_mut(DeviceClass::Feeder).unwrap().slot_at_mut(3).unwrap().bind(uniid(&[0x01]));
        let outcome = interpret(&mut book, &Response::AddrTable {address: 3, info: info(&[0x02, 0x03], Mode::App)}, &mut ());
        assert_eq!(outcome.changed, Some(DeviceClass::Feeder));
        let slot = slot(&book, 3);
        assert_eq!(slot.uniid, uniid(&[0x02, 0x03]));
        assert!(slot.mapped && slot.acked);
        assert_eq!(slot.state, State::Online);
    }

    #[test]
    fn loader_mode_follows_identifier() {
        let mut book = book();
        book.class_mut(DeviceClass::Feeder).unwrap().slot_at_mut(4).unwrap().bind(uniid(&[0x09]));
        // answer from another address still flags the slot owning the identifier
        interpret(&mut book, &Response::OnlineCheck {address: 1, info: info(&[0x09], Mode::Loader)}, &mut ());
        assert_eq!(slot(&book, 4).mode, Mode::Loader);
        assert_eq!(slot(&book, 4).state, State::WaitingForAck);
        assert!(book.class(DeviceClass::Feeder).unwrap().any_loader());
    }

    #[test]
    fn unbound_slots_ignore_heartbeats() {
        let mut book = book();
        let before = book.clone();
        let mut events = Vec::<Event>::new();
        // free slots hold the empty identifier, a device reporting it must not bind to them
        for response in [
            Response::OnlineCheck {address: 2, info: info(&[], Mode::App)},
            Response::SlaveInfo {address: 0xFE, info: info(&[], Mode::App)},
            Response::SlaveInfo {address: 0xFE, info: info(&[0x00, 0x01], Mode::App)},
            Response::AddrTable {address: 3, info: info(&[], Mode::App)},
            ] {
            assert_eq!(interpret(&mut book, &response, &mut events), Outcome::default());
        }
        assert_eq!(book, before);
        assert!(events.is_empty());

        // only mapped slots are brought online, whatever identifier they hold
        book.class_mut(DeviceClass::Feeder).unwrap().slot_at_mut(2).unwrap().uniid = uniid(&[0x42]);
        interpret(&mut book, &Response::OnlineCheck {address: 2, info: info(&[0x42], Mode::App)}, &mut events);
        let free = slot(&book, 2);
        assert!(!free.mapped);
        assert_eq!(free.state, State::Offline);
        assert!(events.is_empty());
    }

    #[test]
    fn unmanaged_class_is_dropped() {
        let mut book = book();
        let before = book.clone();
        let motor = DeviceInfo {class: DeviceClass::ClosedLoopMotor, mode: Mode::Loader, uniid: uniid(&[1])};
        let outcome = interpret(&mut book, &Response::SlaveInfo {address: 0xFD, info: motor}, &mut ());
        assert_eq!(outcome, Outcome::default());
        assert_eq!(book, before);
        assert_eq!(interpret(&mut book, &Response::LoaderToApp {address: 0xFF}, &mut ()), Outcome::default());
    }
}
