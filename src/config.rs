/*!
    static configuration of the addressing master

    nothing here is read from files, hosts build these structs with the defaults and adjust what they need with the `with_*` methods.
*/

use std::time::Duration;
use thiserror::Error;

use crate::{
    device::DeviceClass,
    packet::{Function, BROADCAST},
    };


/// malformed static configuration, always fatal at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("address {address:#04X} provisioned twice for {class}")]
    DuplicateAddress { class: DeviceClass, address: u8 },
    #[error("device class {0} configured twice")]
    DuplicateClass(DeviceClass),
    #[error("no address provisioned for {0}")]
    EmptyClass(DeviceClass),
    #[error("address {address:#04X} of {class} collides with a broadcast address")]
    ReservedAddress { class: DeviceClass, address: u8 },
}


/// addresses provisioned for one device class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassConfig {
    pub class: DeviceClass,
    pub broadcast: u8,
    pub addresses: Vec<u8>,
}
impl ClassConfig {
    /// standard broadcast address and addresses of the given class
    pub fn new(class: DeviceClass) -> Self {
        Self {
            class,
            broadcast: class.broadcast(),
            addresses: class.addresses().to_vec(),
        }
    }
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item=u8>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }
    pub fn with_broadcast(mut self, broadcast: u8) -> Self {
        self.broadcast = broadcast;
        self
    }
    /// check this class alone, collisions between classes are checked by the address book
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::EmptyClass(self.class));
        }
        for (i, &address) in self.addresses.iter().enumerate() {
            if address == BROADCAST || address == self.broadcast {
                return Err(ConfigError::ReservedAddress {class: self.class, address});
            }
            if self.addresses[.. i].contains(&address) {
                return Err(ConfigError::DuplicateAddress {class: self.class, address});
            }
        }
        Ok(())
    }
}


/// how long to wait for an answer, per function
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// broadcast queries, devices answer after a random backoff
    pub discovery: Duration,
    pub addressing: Duration,
    pub table: Duration,
    pub heartbeat: Duration,
    pub loader: Duration,
}
impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_millis(1000),
            addressing: Duration::from_millis(50),
            table: Duration::from_millis(50),
            heartbeat: Duration::from_millis(100),
            loader: Duration::from_millis(50),
        }
    }
}
impl Timeouts {
    pub fn of(&self, function: Function) -> Duration {
        match function {
            Function::GetSlaveInfo => self.discovery,
            Function::SetSlaveAddr => self.addressing,
            Function::GetAddrTable => self.table,
            Function::OnlineCheck => self.heartbeat,
            Function::LoaderToApp => self.loader,
        }
    }
}


/// thresholds and pacing of the polling scheduler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// consecutive missed heartbeats tolerated before a device is declared offline
    pub max_lost: u32,
    /// attempts of the startup table fetch
    pub fetch_attempts: usize,
    /// attempts of the startup push of persisted addresses
    pub push_attempts: usize,
    /// pause between cycles
    pub interval: Duration,
    /// pause between cycles while a print job is running, to leave the bus to motion traffic
    pub printing_interval: Duration,
    /// pause while the host has suspended polling
    pub suspended_interval: Duration,
    pub timeouts: Timeouts,
    /// device classes to manage, polled in this order
    pub classes: Vec<ClassConfig>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            max_lost: 3,
            fetch_attempts: 2,
            push_attempts: 2,
            interval: Duration::from_millis(1000),
            printing_interval: Duration::from_secs(10),
            suspended_interval: Duration::from_secs(10),
            timeouts: Timeouts::default(),
            classes: vec![ClassConfig::new(DeviceClass::Feeder)],
        }
    }
}
impl Config {
    pub fn with_max_lost(mut self, max_lost: u32) -> Self {
        self.max_lost = max_lost;
        self
    }
    pub fn with_attempts(mut self, fetch: usize, push: usize) -> Self {
        self.fetch_attempts = fetch;
        self.push_attempts = push;
        self
    }
    pub fn with_intervals(mut self, idle: Duration, printing: Duration) -> Self {
        self.interval = idle;
        self.printing_interval = printing;
        self
    }
    pub fn with_suspended_interval(mut self, interval: Duration) -> Self {
        self.suspended_interval = interval;
        self
    }
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
    pub fn with_classes(mut self, classes: impl IntoIterator<Item=ClassConfig>) -> Self {
        self.classes = classes.into_iter().collect();
        self
    }
    /// pause to apply after a cycle
    pub fn interval(&self, printing: bool) -> Duration {
        if printing {self.printing_interval} else {self.interval}
    }
}
