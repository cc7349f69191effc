/*!
    automatic address assignment and liveness tracking for slaves sharing a multi-drop rs485 bus

    slaves (feeders, closed-loop motors, belt tensioners) only carry a factory unique identifier. The master discovers them with broadcast queries, hands them short bus addresses, persists the identifier to address mapping, and keeps polling them to notice disconnections, reboots and bootloader mode.

    - [packet] and [device] define the wire format and its typed content
    - [table] and [allocate] hold the address allocation state and its rules
    - [master] drives the bus: response interpretation, polling scheduler, transport and persistence
*/

mod utils;

pub mod packet;
pub mod device;
pub mod table;
pub mod allocate;
pub mod config;
pub mod master;

pub use utils::Hex;
