/*!
    addressing master, driving the bus from the printer host

    The central resource is the [Scheduler] which owns the [AddressBook](crate::table::AddressBook) and polls the bus through a [Transport]. Everything around it is a narrow collaborator:

    - [Transport] sends one request and returns at most one answer
    - [Store] persists the identifiers of each device class
    - [Listener] receives connection and assignment notifications
    - [Host] tells whether a print is running or the process is shutting down
    - [Operator] reads table snapshots and triggers table fetches from other tasks
*/

/// decoding of answers into table changes, this is where the protocol state lives
pub mod interpret;
/// polling passes and their ordering
pub mod scheduler;
pub mod transport;
pub mod persist;
pub mod events;
pub mod host;


pub use interpret::{interpret, Outcome};
pub use scheduler::Scheduler;
pub use transport::Transport;
#[cfg(feature = "serial")]
pub use transport::{SerialTransport, Port};
pub use persist::{Store, MemoryStore, FileStore, PersistError};
pub use events::{Event, EventKind, Listener};
pub use host::{Host, HostFlags, Operator};


use thiserror::Error;

/// failure of one bus exchange, never seen past the transport which reports it as a missing answer
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with uart bus")]
    Bus(#[from] std::io::Error),
    #[error("no data arrived in expected time")]
    Timeout,
}
