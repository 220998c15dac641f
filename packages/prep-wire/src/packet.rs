//! The three packet layers: IP envelope, HARP routing, HOI2 command.
//!
//! Layout, all little-endian:
//!
//! ```text
//! IpPacket   size:u16 protocol:u8 version:u8 options_len:u16 options? payload
//! HarpPacket src:3xu16 dst:3xu16 seq:u8 rsvd:u8 protocol:u8 action:u8
//!            length:u16 options_len:u16 version:u8 rsvd:u8 options? payload
//! HoiPacket2 interface_id:u8 action:u8 action_id:u16 version:u8
//!            num_fragments:u8 fragments*
//! ```
//!
//! `IpPacket.size` counts everything after itself (total minus 2);
//! `HarpPacket.length` counts the whole HARP packet. The packed `version`
//! byte of the IP layer is `(major << 4) | minor`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::fragment::Fragment;
use crate::PrepWireError;

pub const IP_FIXED_SIZE: usize = 6;
pub const HARP_BASE_SIZE: usize = 22;
pub const HOI_BASE_SIZE: usize = 6;

/// HARP payload protocol id for HOI2.
pub const HARP_PROTOCOL_HOI2: u8 = 2;

// ── IP layer ──────────────────────────────────────────────────────────────────

/// Protocols an [`IpPacket`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    None = 0,
    Xml = 1,
    Bz = 4,
    Ml600 = 5,
    Harp2 = 6,
    Connection = 7,
    Serial = 8,
    Can = 9,
    MultiSerial = 10,
}

impl IpProtocol {
    pub fn from_u8(value: u8) -> Result<Self, PrepWireError> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Xml,
            4 => Self::Bz,
            5 => Self::Ml600,
            6 => Self::Harp2,
            7 => Self::Connection,
            8 => Self::Serial,
            9 => Self::Can,
            10 => Self::MultiSerial,
            other => return Err(PrepWireError::UnsupportedProtocol(other)),
        })
    }
}

/// Outermost envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct IpPacket {
    pub protocol: IpProtocol,
    /// (major, minor), packed into one byte on the wire.
    pub version: (u8, u8),
    pub options: Option<Bytes>,
    pub payload: Bytes,
}

impl IpPacket {
    pub fn new(protocol: IpProtocol, version: (u8, u8), payload: Bytes) -> Self {
        Self {
            protocol,
            version,
            options: None,
            payload,
        }
    }

    fn options_len(&self) -> usize {
        self.options.as_ref().map_or(0, |o| o.len())
    }

    /// Value of the size field: total encoded length minus its own two
    /// bytes.
    pub fn size(&self) -> usize {
        IP_FIXED_SIZE + self.options_len() + self.payload.len() - 2
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(2 + self.size());
        out.put_u16_le(self.size() as u16);
        out.put_u8(self.protocol as u8);
        out.put_u8((self.version.0 << 4) | (self.version.1 & 0x0F));
        out.put_u16_le(self.options_len() as u16);
        if let Some(options) = &self.options {
            out.put_slice(options);
        }
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PrepWireError> {
        if data.len() < IP_FIXED_SIZE {
            return Err(PrepWireError::Truncated {
                layer: "IpPacket",
                need: IP_FIXED_SIZE,
                got: data.len(),
            });
        }
        let size = u16::from_le_bytes([data[0], data[1]]) as usize;
        if data.len() - 2 != size {
            return Err(PrepWireError::LengthMismatch {
                layer: "IpPacket",
                field: size,
                actual: data.len() - 2,
            });
        }
        let protocol = IpProtocol::from_u8(data[2])?;
        let version = ((data[3] & 0xF0) >> 4, data[3] & 0x0F);
        let options_len = u16::from_le_bytes([data[4], data[5]]) as usize;
        if data.len() < IP_FIXED_SIZE + options_len {
            return Err(PrepWireError::Truncated {
                layer: "IpPacket",
                need: IP_FIXED_SIZE + options_len,
                got: data.len(),
            });
        }
        let options = (options_len > 0)
            .then(|| Bytes::copy_from_slice(&data[IP_FIXED_SIZE..IP_FIXED_SIZE + options_len]));
        let payload = Bytes::copy_from_slice(&data[IP_FIXED_SIZE + options_len..]);
        Ok(Self {
            protocol,
            version,
            options,
            payload,
        })
    }
}

// ── HARP layer ────────────────────────────────────────────────────────────────

/// A three-word HARP node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarpAddress(pub [u16; 3]);

impl HarpAddress {
    pub const fn new(a: u16, b: u16, c: u16) -> Self {
        Self([a, b, c])
    }
}

impl std::fmt::Display for HarpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}:{:04X}", self.0[0], self.0[1], self.0[2])
    }
}

/// What a HARP packet carries, the low nibble of the action byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadDescription {
    StatusRequest = 0,
    StatusResponse = 1,
    StatusException = 2,
    CommandRequest = 3,
    CommandResponse = 4,
    CommandException = 5,
    CommandAck = 6,
    UpStreamSystemEvent = 7,
    DownStreamSystemEvent = 8,
    Event = 9,
    InvalidActionResponse = 10,
    StatusWarning = 11,
    CommandWarning = 12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseRequired {
    No = 0,
    Yes = 1,
}

/// The HARP action byte: response-required flag in bit 4, payload
/// description in the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarpAction(pub u8);

impl HarpAction {
    pub fn create(response_required: ResponseRequired, description: PayloadDescription) -> Self {
        Self(((response_required as u8) << 4) | description as u8)
    }

    pub fn response_required(&self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn payload_description(&self) -> u8 {
        self.0 & 0x0F
    }
}

/// Routing layer between the IP envelope and the HOI2 command.
#[derive(Debug, Clone, PartialEq)]
pub struct HarpPacket {
    pub source: HarpAddress,
    pub destination: HarpAddress,
    pub sequence_number: u8,
    pub reserved_1: u8,
    pub protocol: u8,
    pub action: HarpAction,
    pub options: Bytes,
    pub version: u8,
    pub reserved_2: u8,
    pub payload: Bytes,
}

impl HarpPacket {
    /// A command-request packet with no options, the only shape this
    /// backend sends.
    pub fn command_request(
        source: HarpAddress,
        destination: HarpAddress,
        sequence_number: u8,
        payload: Bytes,
    ) -> Self {
        Self {
            source,
            destination,
            sequence_number,
            reserved_1: 0,
            protocol: HARP_PROTOCOL_HOI2,
            action: HarpAction::create(ResponseRequired::Yes, PayloadDescription::CommandRequest),
            options: Bytes::new(),
            version: 0,
            reserved_2: 0,
            payload,
        }
    }

    /// Value of the length field: the whole HARP packet.
    pub fn length(&self) -> usize {
        HARP_BASE_SIZE + self.options.len() + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.length());
        for &word in &self.source.0 {
            out.put_u16_le(word);
        }
        for &word in &self.destination.0 {
            out.put_u16_le(word);
        }
        out.put_u8(self.sequence_number);
        out.put_u8(self.reserved_1);
        out.put_u8(self.protocol);
        out.put_u8(self.action.0);
        out.put_u16_le(self.length() as u16);
        out.put_u16_le(self.options.len() as u16);
        out.put_u8(self.version);
        out.put_u8(self.reserved_2);
        out.put_slice(&self.options);
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PrepWireError> {
        if data.len() < HARP_BASE_SIZE {
            return Err(PrepWireError::Truncated {
                layer: "HarpPacket",
                need: HARP_BASE_SIZE,
                got: data.len(),
            });
        }
        let word = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        let source = HarpAddress([word(0), word(2), word(4)]);
        let destination = HarpAddress([word(6), word(8), word(10)]);
        let sequence_number = data[12];
        let reserved_1 = data[13];
        let protocol = data[14];
        let action = HarpAction(data[15]);
        let length = word(16) as usize;
        let options_len = word(18) as usize;
        let version = data[20];
        let reserved_2 = data[21];

        if data.len() < HARP_BASE_SIZE + options_len {
            return Err(PrepWireError::Truncated {
                layer: "HarpPacket",
                need: HARP_BASE_SIZE + options_len,
                got: data.len(),
            });
        }
        let options =
            Bytes::copy_from_slice(&data[HARP_BASE_SIZE..HARP_BASE_SIZE + options_len]);
        let payload = Bytes::copy_from_slice(&data[HARP_BASE_SIZE + options_len..]);
        if HARP_BASE_SIZE + options_len + payload.len() != length {
            return Err(PrepWireError::LengthMismatch {
                layer: "HarpPacket",
                field: length,
                actual: HARP_BASE_SIZE + options_len + payload.len(),
            });
        }
        Ok(Self {
            source,
            destination,
            sequence_number,
            reserved_1,
            protocol,
            action,
            options,
            version,
            reserved_2,
            payload,
        })
    }
}

// ── HOI2 layer ────────────────────────────────────────────────────────────────

/// HOI2 action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HoiAction {
    StatusRequest = 0,
    StatusResponse = 1,
    StatusException = 2,
    CommandRequest = 3,
    CommandResponse = 4,
    CommandException = 5,
    CommandAck = 6,
    UpStreamSystemEvent = 7,
    DownStreamSystemEvent = 8,
    Event = 9,
    InvalidActionResponse = 10,
    StatusWarning = 11,
    CommandWarning = 12,
}

impl HoiAction {
    pub fn from_u8(value: u8) -> Option<Self> {
        use HoiAction::*;
        Some(match value {
            0 => StatusRequest,
            1 => StatusResponse,
            2 => StatusException,
            3 => CommandRequest,
            4 => CommandResponse,
            5 => CommandException,
            6 => CommandAck,
            7 => UpStreamSystemEvent,
            8 => DownStreamSystemEvent,
            9 => Event,
            10 => InvalidActionResponse,
            11 => StatusWarning,
            12 => CommandWarning,
            _ => return None,
        })
    }
}

/// The command layer: an interface, an action, a command id, fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct HoiPacket2 {
    pub interface_id: u8,
    pub action: u8,
    /// For requests this is the firmware command id; responses echo it.
    pub action_id: u16,
    pub version: u8,
    pub fragments: Vec<Fragment>,
}

impl HoiPacket2 {
    pub fn command_request(action_id: u16, fragments: Vec<Fragment>) -> Self {
        Self {
            interface_id: 1,
            action: HoiAction::CommandRequest as u8,
            action_id,
            version: 0,
            fragments,
        }
    }

    pub fn hoi_action(&self) -> Option<HoiAction> {
        HoiAction::from_u8(self.action)
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(self.interface_id);
        out.put_u8(self.action);
        out.put_u16_le(self.action_id);
        out.put_u8(self.version);
        out.put_u8(self.fragments.len() as u8);
        for fragment in &self.fragments {
            fragment.encode_into(&mut out);
        }
        out.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PrepWireError> {
        if data.len() < HOI_BASE_SIZE {
            return Err(PrepWireError::Truncated {
                layer: "HoiPacket2",
                need: HOI_BASE_SIZE,
                got: data.len(),
            });
        }
        let interface_id = data[0];
        let action = data[1];
        let action_id = u16::from_le_bytes([data[2], data[3]]);
        let version = data[4];
        let number_of_fragments = data[5] as usize;

        let mut fragments = Vec::new();
        let mut offset = HOI_BASE_SIZE;
        while offset < data.len() {
            let (fragment, consumed) = Fragment::decode(&data[offset..])?;
            fragments.push(fragment);
            offset += consumed;
        }
        if fragments.len() != number_of_fragments {
            return Err(PrepWireError::FragmentCountMismatch {
                header: number_of_fragments,
                actual: fragments.len(),
            });
        }
        Ok(Self {
            interface_id,
            action,
            action_id,
            version,
            fragments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentValue;

    // A recorded instrument handshake: empty HOI status packet inside a
    // HARP packet inside the IP envelope.
    const IP_DATA: &str = "2000063000000200040001000100010004BF020002101C0000000000010001000000";
    const HARP_DATA: &str = "0200040001000100010004BF020002101C0000000000010001000000";
    const HOI_DATA: &str = "010001000000";

    #[test]
    fn decode_recorded_ip_packet() {
        let data = hex::decode(IP_DATA).unwrap();
        let packet = IpPacket::decode(&data).unwrap();
        assert_eq!(packet.size(), 32);
        assert_eq!(packet.protocol, IpProtocol::Harp2);
        assert_eq!(packet.version, (3, 0));
        assert_eq!(packet.options, None);
        assert_eq!(packet.payload, hex::decode(HARP_DATA).unwrap());
    }

    #[test]
    fn encode_recorded_ip_packet() {
        let packet = IpPacket::new(
            IpProtocol::Harp2,
            (3, 0),
            Bytes::from(hex::decode(HARP_DATA).unwrap()),
        );
        assert_eq!(hex::encode(packet.encode()), IP_DATA.to_lowercase());
    }

    #[test]
    fn decode_recorded_harp_packet() {
        let data = hex::decode(HARP_DATA).unwrap();
        let packet = HarpPacket::decode(&data).unwrap();
        assert_eq!(packet.source, HarpAddress::new(0x0002, 0x0004, 0x0001));
        assert_eq!(packet.destination, HarpAddress::new(0x0001, 0x0001, 0xBF04));
        assert_eq!(packet.sequence_number, 2);
        assert_eq!(packet.protocol, HARP_PROTOCOL_HOI2);
        assert_eq!(packet.action, HarpAction(0x10));
        assert!(packet.action.response_required());
        assert_eq!(packet.length(), 28);
        assert_eq!(packet.payload, hex::decode(HOI_DATA).unwrap());
    }

    #[test]
    fn encode_recorded_harp_packet() {
        let packet = HarpPacket {
            source: HarpAddress::new(0x0002, 0x0004, 0x0001),
            destination: HarpAddress::new(0x0001, 0x0001, 0xBF04),
            sequence_number: 2,
            reserved_1: 0,
            protocol: HARP_PROTOCOL_HOI2,
            action: HarpAction(0x10),
            options: Bytes::new(),
            version: 0,
            reserved_2: 0,
            payload: Bytes::from(hex::decode(HOI_DATA).unwrap()),
        };
        assert_eq!(hex::encode(packet.encode()), HARP_DATA.to_lowercase());
    }

    #[test]
    fn decode_recorded_hoi_packet() {
        let data = hex::decode(HOI_DATA).unwrap();
        let packet = HoiPacket2::decode(&data).unwrap();
        assert_eq!(packet.interface_id, 1);
        assert_eq!(packet.action, 0);
        assert_eq!(packet.hoi_action(), Some(HoiAction::StatusRequest));
        assert_eq!(packet.action_id, 1);
        assert_eq!(packet.version, 0);
        assert!(packet.fragments.is_empty());
    }

    #[test]
    fn encode_recorded_hoi_packet() {
        let packet = HoiPacket2 {
            interface_id: 1,
            action: 0,
            action_id: 1,
            version: 0,
            fragments: vec![],
        };
        assert_eq!(hex::encode(packet.encode()), HOI_DATA.to_lowercase());
    }

    #[test]
    fn full_stack_roundtrip_with_fragments() {
        let hoi = HoiPacket2::command_request(
            25,
            vec![
                Fragment::u8(255),
                Fragment::u8(0),
                Fragment::u8(0),
                Fragment::u8(0),
            ],
        );
        let harp = HarpPacket::command_request(
            HarpAddress::new(0x0002, 0x0005, 0x0002),
            HarpAddress::new(0x0001, 0x0001, 0x1500),
            7,
            hoi.encode(),
        );
        let ip = IpPacket::new(IpProtocol::Harp2, (3, 0), harp.encode());
        let bytes = ip.encode();

        let ip_back = IpPacket::decode(&bytes).unwrap();
        assert_eq!(ip_back.size() + 2, bytes.len());
        let harp_back = HarpPacket::decode(&ip_back.payload).unwrap();
        assert_eq!(harp_back.destination, HarpAddress::new(0x0001, 0x0001, 0x1500));
        let hoi_back = HoiPacket2::decode(&harp_back.payload).unwrap();
        assert_eq!(hoi_back.action_id, 25);
        assert_eq!(hoi_back.fragments.len(), 4);
        assert_eq!(hoi_back.fragments[0].value, FragmentValue::U8(255));
    }

    #[test]
    fn size_field_mismatch_is_rejected() {
        let mut data = hex::decode(IP_DATA).unwrap();
        data.push(0);
        assert!(matches!(
            IpPacket::decode(&data),
            Err(PrepWireError::LengthMismatch { .. })
        ));
    }
}
