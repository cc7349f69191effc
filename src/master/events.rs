use core::fmt;
use tokio::sync::mpsc;

use crate::device::DeviceClass;


/// what happened to a device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// an addressed device answered its heartbeat again
    Connected,
    /// a device missed too many heartbeats
    Disconnected,
    /// an unaddressed device answered discovery and was given an address
    DiscoveryComplete,
    /// a device confirmed the address it was given
    AssignmentComplete,
    /// startup sequences are done, steady polling starts. The address is the class broadcast address
    Ready,
}

/// notification sent to the rest of the host
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub class: DeviceClass,
    pub address: u8,
}
impl Event {
    pub fn new(kind: EventKind, class: DeviceClass, address: u8) -> Self {
        Self {kind, class, address}
    }
}
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#04X} {:?}", self.class, self.address, self.kind)
    }
}

/// receiver of notifications, called synchronously from the polling task
pub trait Listener {
    fn notify(&mut self, event: Event);
}
/// events are dropped
impl Listener for () {
    fn notify(&mut self, _event: Event) {}
}
/// events are collected, mostly for tests
impl Listener for Vec<Event> {
    fn notify(&mut self, event: Event) {
        self.push(event);
    }
}
/// events are forwarded to another task, a closed channel silently drops them
impl Listener for mpsc::UnboundedSender<Event> {
    fn notify(&mut self, event: Event) {
        let _ = self.send(event);
    }
}
impl<L: Listener + ?Sized> Listener for &mut L {
    fn notify(&mut self, event: Event) {
        (**self).notify(event);
    }
}
