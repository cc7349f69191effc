/*!
    bus packet framing

    a frame on the wire is `[head, slave, length, status, function, payload..., crc]`. The head byte is handled by the transport only, so frames here always start at the slave address.

    - `length` counts status, function, payload and crc, hence `payload.len() + 3`
    - `crc` is a CRC8 (polynomial 0x07, initial 0, no reflection) of `[length, status, function, payload...]`
*/

use thiserror::Error;


/// first byte of every frame on the wire, never part of the frames handled here
pub const HEAD: u8 = 0xF7;
/// address every slave listens to, whatever its class
pub const BROADCAST: u8 = 0xFF;
/// maximum payload size of a packet
pub const MAX_DATA: usize = 100;
/// status of every request, and of every successful response
pub const STATUS_OK: u8 = 0x00;
/// CRC8 generator polynomial, x^8 + x^2 + x + 1
pub const POLY: u8 = 0x07;

/// bytes in a frame besides the payload: slave, length, status, function, crc
pub const OVERHEAD: usize = 5;
/// bytes counted by the length field besides the payload: status, function, crc
const LENGTH_OVERHEAD: usize = 3;

/// packet payload buffer
pub type Payload = heapless::Vec<u8, MAX_DATA>;


/// framing problems, a frame raising one of these is dropped
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than a packet header")]
    Truncated(usize),
    #[error("declared length {declared} does not match the {actual} bytes received")]
    BadLength { declared: u8, actual: usize },
    #[error("checksum {received:#04X} does not match computed {computed:#04X}")]
    BadChecksum { received: u8, computed: u8 },
    #[error("payload of {0} bytes exceeds the maximum packet size")]
    TooLong(usize),
}


/// bus commands, both requests and their answers share the same code
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Function {
    /// assign an address to the device with a given identifier
    SetSlaveAddr = 0xA0,
    /// broadcast query, answered by one unaddressed device with its identifier
    GetSlaveInfo = 0xA1,
    /// heartbeat to an addressed device
    OnlineCheck = 0xA2,
    /// ask which identifier currently sits at an address
    GetAddrTable = 0xA3,
    /// make devices stuck in their bootloader jump to their application
    LoaderToApp = 0x0B,
}
impl TryFrom<u8> for Function {
    type Error = u8;
    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0xA0 => Self::SetSlaveAddr,
            0xA1 => Self::GetSlaveInfo,
            0xA2 => Self::OnlineCheck,
            0xA3 => Self::GetAddrTable,
            0x0B => Self::LoaderToApp,
            other => return Err(other),
        })
    }
}
impl From<Function> for u8 {
    fn from(function: Function) -> u8 {
        function as u8
    }
}


/// a frame split in its fields, checksum already verified
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// destination of a request, or responder of an answer
    pub address: u8,
    pub status: u8,
    /// raw function code, typed decoding happens in [crate::device]
    pub function: u8,
    pub payload: Payload,
}
impl Packet {
    pub fn new(address: u8, status: u8, function: u8, payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            address,
            status,
            function,
            payload: Payload::from_slice(payload)
                .map_err(|_| FrameError::TooLong(payload.len()))?,
        })
    }
    /// serialize this packet, without the head byte
    pub fn encode(&self) -> Vec<u8> {
        let length = (self.payload.len() + LENGTH_OVERHEAD) as u8;
        let mut frame = Vec::with_capacity(self.payload.len() + OVERHEAD);
        frame.push(self.address);
        frame.push(length);
        frame.push(self.status);
        frame.push(self.function);
        frame.extend_from_slice(&self.payload);
        frame.push(crc8(&frame[1 ..]));
        frame
    }
}

/// CRC8 used by the bus, polynomial [POLY], initial value 0, no reflection
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0 .. 8 {
            crc = if crc & 0x80 != 0 {(crc << 1) ^ POLY} else {crc << 1};
        }
    }
    crc
}

/// frame the given fields, the head byte is left to the transport
pub fn encode(address: u8, status: u8, function: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Ok(Packet::new(address, status, function, payload)?.encode())
}

/// parse a frame starting at the slave address, checking its length field and checksum
pub fn decode(frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < OVERHEAD {
        return Err(FrameError::Truncated(frame.len()));
    }
    let declared = frame[1];
    if usize::from(declared) != frame.len() - 2 {
        return Err(FrameError::BadLength {declared, actual: frame.len() - 2});
    }
    let (covered, received) = frame[1 ..].split_at(frame.len() - 2);
    let computed = crc8(covered);
    if computed != received[0] {
        return Err(FrameError::BadChecksum {received: received[0], computed});
    }
    Packet::new(frame[0], frame[2], frame[3], &frame[4 .. frame.len() - 1])
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_reference_values() {
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8(&[0x00]), 0);
        assert_eq!(crc8(&[0x01]), 0x07);
    }

    #[test]
    fn layout() {
        let frame = encode(0x01, STATUS_OK, Function::OnlineCheck.into(), &[]).unwrap();
        assert_eq!(frame.len(), OVERHEAD);
        assert_eq!(&frame[.. 4], &[0x01, 0x03, 0x00, 0xA2]);
        assert_eq!(frame[4], crc8(&[0x03, 0x00, 0xA2]));

        let frame = encode(0xFE, STATUS_OK, Function::SetSlaveAddr.into(), &[0x01, 0xAA, 0xBB]).unwrap();
        assert_eq!(&frame[.. 7], &[0xFE, 0x06, 0x00, 0xA0, 0x01, 0xAA, 0xBB]);
    }

    #[test]
    fn payload_survives_framing() {
        let payload: Vec<u8> = (0 ..= 255u8).cycle().take(MAX_DATA).collect();
        for size in [0, 1, 2, 13, MAX_DATA] {
            let packet = decode(&encode(0x42, STATUS_OK, 0xA1, &payload[.. size]).unwrap()).unwrap();
            assert_eq!(packet.address, 0x42);
            assert_eq!(packet.function, 0xA1);
            assert_eq!(&packet.payload[..], &payload[.. size]);
        }
    }

    #[test]
    fn single_bit_errors_are_caught() {
        let frame = encode(0x02, STATUS_OK, 0xA2, &[1, 0xAA, 0xBB, 0xCC]).unwrap();
        for byte in 1 .. frame.len() {
            for bit in 0 .. 8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                match decode(&corrupted) {
                    // length byte
                    Err(FrameError::BadLength {..}) => assert_eq!(byte, 1),
                    Err(FrameError::BadChecksum {..}) => assert_ne!(byte, 1),
                    other => panic!("byte {} bit {} not detected: {:?}", byte, bit, other),
                }
            }
        }
        // the slave address is not covered by the checksum
        let mut readdressed = frame.clone();
        readdressed[0] = 0x03;
        assert_eq!(decode(&readdressed).unwrap().address, 0x03);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(decode(&[0x01, 0x03, 0x00]), Err(FrameError::Truncated(3)));
        let mut frame = encode(0x01, STATUS_OK, 0xA2, &[0x01]).unwrap();
        frame.pop();
        assert!(matches!(decode(&frame), Err(FrameError::BadLength {declared: 4, actual: 3})));
        assert_eq!(
            encode(0x01, STATUS_OK, 0xA2, &[0; MAX_DATA + 1]),
            Err(FrameError::TooLong(MAX_DATA + 1)),
            );
    }

    #[test]
    fn function_codes() {
        for function in [Function::SetSlaveAddr, Function::GetSlaveInfo, Function::OnlineCheck, Function::GetAddrTable, Function::LoaderToApp] {
            assert_eq!(Function::try_from(u8::from(function)), Ok(function));
        }
        assert_eq!(Function::try_from(0x42), Err(0x42));
    }
}
