/*!
    address allocation state

    each device class owns a fixed sequence of [Slot], one per provisioned bus address. Slots are never created nor destroyed after startup, only their binding to a device identifier and their liveness change.
*/

use core::fmt;
use log::*;

use crate::{
    config::{ClassConfig, ConfigError},
    device::{DeviceClass, Mode, Uniid},
    };


/// liveness of the device bound to a slot
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Offline,
    Online,
    /// bound from persisted state, not heard of since startup
    Init,
    /// an address assignment was sent, not yet confirmed by the device
    WaitingForAck,
}
impl State {
    /// a device in these states can be given its address again
    pub fn unreachable(self) -> bool {
        matches!(self, Self::Offline | Self::Init)
    }
}

/// one provisioned bus address and the device currently bound to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    address: u8,
    pub uniid: Uniid,
    /// bound to an identifier at least once
    pub mapped: bool,
    pub state: State,
    /// the device acknowledged its address assignment
    pub acked: bool,
    /// consecutive heartbeats without answer
    pub lost: u32,
    pub mode: Mode,
}
impl Slot {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            uniid: Uniid::empty(),
            mapped: false,
            state: State::Offline,
            acked: false,
            lost: 0,
            mode: Mode::App,
        }
    }
    /// bus address of this slot, fixed for the process lifetime
    pub fn address(&self) -> u8 {self.address}

    /// record a matching answer from the device
    pub fn ack(&mut self) {
        self.acked = true;
        self.lost = 0;
    }
    /// bind a device identifier and wait for it to confirm its address
    pub fn bind(&mut self, uniid: Uniid) {
        self.uniid = uniid;
        self.mapped = true;
        self.state = State::WaitingForAck;
    }
    /// forget the device bound here
    pub fn reset(&mut self) {
        *self = Self::new(self.address);
    }
}
impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04X}, uniid: {}, mapped: {}, online: {:?}, acked: {}, lost: {}, mode: {:?}",
            self.address,
            self.uniid,
            u8::from(self.mapped),
            self.state,
            u8::from(self.acked),
            self.lost,
            self.mode,
            )
    }
}


/// slots of one device class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTable {
    class: DeviceClass,
    broadcast: u8,
    slots: Vec<Slot>,
}
impl ClassTable {
    pub fn new(config: &ClassConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            class: config.class,
            broadcast: config.broadcast,
            slots: config.addresses.iter().copied().map(Slot::new).collect(),
        })
    }
    pub fn class(&self) -> DeviceClass {self.class}
    pub fn broadcast(&self) -> u8 {self.broadcast}
    pub fn len(&self) -> usize {self.slots.len()}
    pub fn is_empty(&self) -> bool {self.slots.is_empty()}

    pub fn slots(&self) -> &[Slot] {&self.slots}
    /// slots can be changed, but not added nor removed
    pub fn slots_mut(&mut self) -> &mut [Slot] {&mut self.slots}

    pub fn slot_at(&self, address: u8) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.address == address)
    }
    pub fn slot_at_mut(&mut self, address: u8) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.address == address)
    }
    /// first mapped slot currently bound to the given identifier
    pub fn slot_of_mut(&mut self, uniid: &Uniid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.mapped && slot.uniid == *uniid)
    }

    /// identifiers in slot order, as persisted
    pub fn identifiers(&self) -> Vec<Uniid> {
        self.slots.iter().map(|slot| slot.uniid.clone()).collect()
    }
    pub fn count(&self, predicate: impl Fn(&Slot) -> bool) -> usize {
        self.slots.iter().filter(|slot| predicate(slot)).count()
    }
    pub fn all_online(&self) -> bool {
        self.slots.iter().all(|slot| slot.state == State::Online)
    }
    pub fn any_loader(&self) -> bool {
        self.slots.iter().any(|slot| slot.mode == Mode::Loader)
    }

    /**
        bind slots to the identifiers persisted before last shutdown

        a slot whose persisted identifier is set starts mapped in [State::Init]. A record that does not match the slot count leaves the whole class unmapped.
    */
    pub fn seed(&mut self, identifiers: &[Uniid]) {
        for slot in &mut self.slots {
            slot.reset();
        }
        if identifiers.len() != self.slots.len() {
            warn!("{}: {} persisted identifiers for {} addresses, starting unmapped",
                self.class, identifiers.len(), self.slots.len());
            return;
        }
        for (slot, uniid) in self.slots.iter_mut().zip(identifiers) {
            if !uniid.is_unset() {
                slot.uniid = uniid.clone();
                slot.mapped = true;
                slot.state = State::Init;
            }
            debug!("{}: seeded {}", self.class, slot);
        }
    }

    /// one line per slot, for operators
    pub fn dump(&self) -> Vec<String> {
        self.slots.iter().map(|slot| format!("{}: {}", self.class, slot)).collect()
    }
}


/**
    address tables of all managed device classes

    built once at startup from static configuration, the classes and their addresses never change afterwards.
*/
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AddressBook {
    tables: Vec<ClassTable>,
}
impl AddressBook {
    pub fn new<'c>(classes: impl IntoIterator<Item=&'c ClassConfig>) -> Result<Self, ConfigError> {
        let mut tables = Vec::<ClassTable>::new();
        for config in classes {
            if tables.iter().any(|table| table.class == config.class) {
                return Err(ConfigError::DuplicateClass(config.class));
            }
            tables.push(ClassTable::new(config)?);
        }
        Ok(Self {tables})
    }
    /// tables in registration order
    pub fn classes(&self) -> &[ClassTable] {&self.tables}
    pub fn classes_mut(&mut self) -> &mut [ClassTable] {&mut self.tables}

    pub fn class(&self, class: DeviceClass) -> Option<&ClassTable> {
        self.tables.iter().find(|table| table.class == class)
    }
    pub fn class_mut(&mut self, class: DeviceClass) -> Option<&mut ClassTable> {
        self.tables.iter_mut().find(|table| table.class == class)
    }

    /// whole book, one line per slot
    pub fn dump(&self) -> Vec<String> {
        self.tables.iter().flat_map(ClassTable::dump).collect()
    }
}
