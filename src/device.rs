/*!
    typed content of bus packets

    every raw [Packet] received is decoded once into a [Response] variant, so the rest of the master never looks at raw function codes or payload offsets again. Requests are built the other way around from [Request] variants.
*/

use core::fmt;
use thiserror::Error;

use crate::{
    packet::{Packet, Function, Payload, BROADCAST, STATUS_OK},
    utils::Hex,
    };


/// maximum size of a device unique identifier
pub const MAX_UNIID: usize = 12;
/// recovery requests go to every device on the bus, whatever its class
pub const LOADER_BROADCAST: u8 = BROADCAST;


/// kind of device sharing the bus, each kind has its own addresses and broadcast address
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceClass {
    /// filament feeder box
    Feeder = 1,
    /// closed loop stepper motor
    ClosedLoopMotor = 2,
    /// belt tensioner motor
    BeltTensioner = 3,
}
impl DeviceClass {
    pub const ALL: [Self; 3] = [Self::Feeder, Self::ClosedLoopMotor, Self::BeltTensioner];

    /// name of the persisted record holding the identifiers of this class
    pub fn key(self) -> &'static str {
        match self {
            Self::Feeder => "mb_addr_table_uniids",
            Self::ClosedLoopMotor => "clm_addr_table_uniids",
            Self::BeltTensioner => "btm_addr_table_uniids",
        }
    }
    /// address answered by all unaddressed devices of this class
    pub fn broadcast(self) -> u8 {
        match self {
            Self::Feeder => 0xFE,
            Self::ClosedLoopMotor => 0xFD,
            Self::BeltTensioner => 0xFC,
        }
    }
    /// addresses provisioned for this class unless configured otherwise
    pub fn addresses(self) -> &'static [u8] {
        match self {
            Self::Feeder => &[0x01, 0x02, 0x03, 0x04],
            Self::ClosedLoopMotor => &[0x81, 0x82, 0x83, 0x84],
            Self::BeltTensioner => &[0x91, 0x92],
        }
    }
}
impl TryFrom<u8> for DeviceClass {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => Self::Feeder,
            2 => Self::ClosedLoopMotor,
            3 => Self::BeltTensioner,
            other => return Err(other),
        })
    }
}
impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Feeder => "feeder",
            Self::ClosedLoopMotor => "closed-loop-motor",
            Self::BeltTensioner => "belt-tensioner",
        })
    }
}

/// firmware currently running on a device
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    #[default]
    App = 0,
    Loader = 1,
}
impl TryFrom<u8> for Mode {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::App),
            1 => Ok(Self::Loader),
            other => Err(other),
        }
    }
}


/// factory unique identifier of a device, empty when unknown
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Uniid(heapless::Vec<u8, MAX_UNIID>);

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("identifier of {0} bytes is longer than allowed")]
pub struct UniidTooLong(pub usize);

impl Uniid {
    pub const fn empty() -> Self {
        Self(heapless::Vec::new())
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// true for the sentinels of a slot never bound to a device: no byte, or a leading zero
    pub fn is_unset(&self) -> bool {
        self.0.first().is_none_or(|&first| first == 0)
    }
}
impl TryFrom<&[u8]> for Uniid {
    type Error = UniidTooLong;
    fn try_from(bytes: &[u8]) -> Result<Self, UniidTooLong> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| UniidTooLong(bytes.len()))
    }
}
impl<const N: usize> TryFrom<[u8; N]> for Uniid {
    type Error = UniidTooLong;
    fn try_from(bytes: [u8; N]) -> Result<Self, UniidTooLong> {
        Self::try_from(&bytes[..])
    }
}
impl fmt::Display for Uniid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty()
            {f.write_str("-")}
        else
            {fmt::Display::fmt(&Hex(self.as_bytes()), f)}
    }
}
impl fmt::Debug for Uniid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uniid({})", self)
    }
}


/// reasons to drop a well framed response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("slave reported status {0:#04X}")]
    Status(u8),
    #[error("unknown function code {0:#04X}")]
    UnknownFunction(u8),
    #[error("unknown device class {0}")]
    DeviceClass(u8),
    #[error("unknown firmware mode {0}")]
    Mode(u8),
    #[error("payload of {0} bytes is too short for device info")]
    Short(usize),
    #[error(transparent)]
    Uniid(#[from] UniidTooLong),
    /// the identifier is empty or starts with zero, which is reserved for unbound slots
    #[error("device reported an unset identifier")]
    UnsetUniid,
}

/// what a device says about itself in every addressing answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub class: DeviceClass,
    pub mode: Mode,
    pub uniid: Uniid,
}
impl DeviceInfo {
    /// payload layout is `[class, mode, uniid...]`
    pub fn decode(payload: &[u8]) -> Result<Self, ResponseError> {
        let [class, mode, uniid @ ..] = payload
            else {return Err(ResponseError::Short(payload.len()))};
        let uniid = Uniid::try_from(uniid)?;
        if uniid.is_unset() {
            return Err(ResponseError::UnsetUniid);
        }
        Ok(Self {
            class: DeviceClass::try_from(*class).map_err(ResponseError::DeviceClass)?,
            mode: Mode::try_from(*mode).map_err(ResponseError::Mode)?,
            uniid,
        })
    }
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        // MAX_UNIID + 2 always fits in a payload
        let _ = payload.push(self.class as u8);
        let _ = payload.push(self.mode as u8);
        let _ = payload.extend_from_slice(self.uniid.as_bytes());
        payload
    }
}


/// requests the master sends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// discovery query sent to a class broadcast address
    GetSlaveInfo { broadcast: u8 },
    /// bind `address` to the device owning `uniid`, sent to a class broadcast address
    SetSlaveAddr { address: u8, uniid: Uniid },
    OnlineCheck,
    GetAddrTable,
    LoaderToApp,
}
impl Request {
    pub fn function(&self) -> Function {
        match self {
            Self::GetSlaveInfo {..} => Function::GetSlaveInfo,
            Self::SetSlaveAddr {..} => Function::SetSlaveAddr,
            Self::OnlineCheck => Function::OnlineCheck,
            Self::GetAddrTable => Function::GetAddrTable,
            Self::LoaderToApp => Function::LoaderToApp,
        }
    }
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        // all these fit far below MAX_DATA
        match self {
            Self::GetSlaveInfo {broadcast} => {
                let _ = payload.extend_from_slice(&[*broadcast, *broadcast]);
            },
            Self::SetSlaveAddr {address, uniid} => {
                let _ = payload.push(*address);
                let _ = payload.extend_from_slice(uniid.as_bytes());
            },
            Self::OnlineCheck | Self::GetAddrTable => {},
            Self::LoaderToApp => {
                let _ = payload.push(0x01);
            },
        }
        payload
    }
    /// build the packet for a given destination
    pub fn packet(&self, address: u8) -> Packet {
        Packet {
            address,
            status: STATUS_OK,
            function: self.function().into(),
            payload: self.payload(),
        }
    }
}

/// answers the master can receive, `address` is always the responder's
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    SlaveInfo { address: u8, info: DeviceInfo },
    SlaveAddr { address: u8, info: DeviceInfo },
    OnlineCheck { address: u8, info: DeviceInfo },
    AddrTable { address: u8, info: DeviceInfo },
    LoaderToApp { address: u8 },
}
impl Response {
    pub fn decode(packet: &Packet) -> Result<Self, ResponseError> {
        if packet.status != STATUS_OK {
            return Err(ResponseError::Status(packet.status));
        }
        let function = Function::try_from(packet.function)
            .map_err(ResponseError::UnknownFunction)?;
        let address = packet.address;
        Ok(match function {
            Function::LoaderToApp => Self::LoaderToApp {address},
            Function::GetSlaveInfo => Self::SlaveInfo {address, info: DeviceInfo::decode(&packet.payload)?},
            Function::SetSlaveAddr => Self::SlaveAddr {address, info: DeviceInfo::decode(&packet.payload)?},
            Function::OnlineCheck => Self::OnlineCheck {address, info: DeviceInfo::decode(&packet.payload)?},
            Function::GetAddrTable => Self::AddrTable {address, info: DeviceInfo::decode(&packet.payload)?},
        })
    }
    pub fn address(&self) -> u8 {
        match self {
            Self::SlaveInfo {address, ..}
            | Self::SlaveAddr {address, ..}
            | Self::OnlineCheck {address, ..}
            | Self::AddrTable {address, ..}
            | Self::LoaderToApp {address} => *address,
        }
    }
    pub fn info(&self) -> Option<&DeviceInfo> {
        match self {
            Self::SlaveInfo {info, ..}
            | Self::SlaveAddr {info, ..}
            | Self::OnlineCheck {info, ..}
            | Self::AddrTable {info, ..} => Some(info),
            Self::LoaderToApp {..} => None,
        }
    }
    pub fn function(&self) -> Function {
        match self {
            Self::SlaveInfo {..} => Function::GetSlaveInfo,
            Self::SlaveAddr {..} => Function::SetSlaveAddr,
            Self::OnlineCheck {..} => Function::OnlineCheck,
            Self::AddrTable {..} => Function::GetAddrTable,
            Self::LoaderToApp {..} => Function::LoaderToApp,
        }
    }
    /// packet a device would send for this answer
    pub fn packet(&self) -> Packet {
        Packet {
            address: self.address(),
            status: STATUS_OK,
            function: self.function().into(),
            payload: self.info().map(DeviceInfo::encode).unwrap_or_default(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;

    #[test]
    fn decodes_device_info() {
        let packet = packet::decode(&packet::encode(0x01, STATUS_OK, 0xA2, &[1, 1, 0xAA, 0xBB]).unwrap()).unwrap();
        let response = Response::decode(&packet).unwrap();
        assert_eq!(response, Response::OnlineCheck {
            address: 0x01,
            info: DeviceInfo {
                class: DeviceClass::Feeder,
                mode: Mode::Loader,
                uniid: Uniid::try_from([0xAA, 0xBB]).unwrap(),
            },
        });
        assert_eq!(response.packet(), packet);
    }

    #[test]
    fn rejects_bad_content() {
        let decode = |status, function, payload: &[u8]| Response::decode(&Packet::new(0x01, status, function, payload).unwrap());
        assert_eq!(decode(0x01, 0xA2, &[1, 0, 0xAA]), Err(ResponseError::Status(0x01)));
        assert_eq!(decode(0, 0x42, &[1, 0, 0xAA]), Err(ResponseError::UnknownFunction(0x42)));
        assert_eq!(decode(0, 0xA2, &[7, 0, 0xAA]), Err(ResponseError::DeviceClass(7)));
        assert_eq!(decode(0, 0xA2, &[1, 5, 0xAA]), Err(ResponseError::Mode(5)));
        assert_eq!(decode(0, 0xA2, &[1]), Err(ResponseError::Short(1)));
        assert_eq!(decode(0, 0xA2, &[1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]), Err(ResponseError::Uniid(UniidTooLong(13))));
        // identifiers of unbound slots never come from a device
        assert_eq!(decode(0, 0xA2, &[1, 0]), Err(ResponseError::UnsetUniid));
        assert_eq!(decode(0, 0xA1, &[1, 0, 0x00, 0xAA]), Err(ResponseError::UnsetUniid));
        // recovery answers carry nothing to check
        assert_eq!(decode(0, 0x0B, &[]), Ok(Response::LoaderToApp {address: 0x01}));
    }

    #[test]
    fn request_payloads() {
        assert_eq!(&Request::GetSlaveInfo {broadcast: 0xFE}.payload()[..], &[0xFE, 0xFE]);
        let uniid = Uniid::try_from([0xAA, 0xBB]).unwrap();
        assert_eq!(&Request::SetSlaveAddr {address: 3, uniid}.payload()[..], &[3, 0xAA, 0xBB]);
        assert_eq!(&Request::LoaderToApp.payload()[..], &[0x01]);
        assert!(Request::OnlineCheck.payload().is_empty());
        assert_eq!(Request::GetAddrTable.packet(0x02).encode()[.. 4], [0x02, 0x03, 0x00, 0xA3]);
    }

    #[test]
    fn uniid_sentinels() {
        assert!(Uniid::empty().is_unset());
        assert!(Uniid::try_from([0x00]).unwrap().is_unset());
        assert!(!Uniid::try_from([0x10, 0x00]).unwrap().is_unset());
        assert_eq!(Uniid::try_from([0xAA, 0x0B]).unwrap().to_string(), "0xAA 0x0B");
        assert!(Uniid::try_from(&[0u8; MAX_UNIID + 1][..]).is_err());
    }
}
