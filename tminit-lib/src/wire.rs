//! Wire formats of the model query and the mode switch.
//!
//! Both commands are vendor requests on the default control pipe, addressed
//! to the interface. The query reply starts with a little-endian 16-bit tag
//! that selects one of two layouts. What the reserved fields hold is not
//! known; only the position of the model and attachment bytes has been
//! confirmed against real wheels.

use crate::error::TmError;
use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::mem::size_of;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// `bRequest` of the model query.
pub const REQUEST_MODEL: u8 = 73;

/// `bRequest` of the mode switch.
pub const REQUEST_CHANGE_MODE: u8 = 83;

/// `wLength` of the model query; also the size of the response buffer.
pub const MODEL_RESPONSE_LEN: u16 = 16;

const TAG_LEN: usize = size_of::<U16>();

/// Tag plus both layouts' common prefix, ending with the model byte.
const IDENTIFYING_LEN: usize = TAG_LEN + size_of::<ShortReply>();

/// The `bmRequestType` byte of a SETUP packet.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestType {
    pub recipient: B5,
    pub kind: B2,
    pub device_to_host: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    #[num_enum(catch_all)]
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    #[num_enum(catch_all)]
    Reserved(u8),
}

/// A control transfer as the host submits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub direction: Direction,
    pub kind: RequestKind,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct SetupPacket {
    request_type: u8,
    request: u8,
    value: U16,
    index: U16,
    length: U16,
}

impl ControlRequest {
    pub fn request_type(&self) -> RequestType {
        RequestType::new()
            .with_recipient(u8::from(self.recipient) & 0x1f)
            .with_kind(u8::from(self.kind) & 0x03)
            .with_device_to_host(self.direction == Direction::DeviceToHost)
    }

    /// The 8-byte SETUP stage of this request.
    pub fn to_setup_packet(&self) -> [u8; 8] {
        let packet = SetupPacket {
            request_type: self.request_type().into_bytes()[0],
            request: self.request,
            value: U16::new(self.value),
            index: U16::new(self.index),
            length: U16::new(self.length),
        };
        zerocopy::transmute!(packet)
    }

    pub fn from_setup_packet(bytes: [u8; 8]) -> Self {
        let packet: SetupPacket = zerocopy::transmute!(bytes);
        let request_type = RequestType::from_bytes([packet.request_type]);
        Self {
            direction: if request_type.device_to_host() {
                Direction::DeviceToHost
            } else {
                Direction::HostToDevice
            },
            kind: RequestKind::from_primitive(request_type.kind()),
            recipient: Recipient::from_primitive(request_type.recipient()),
            request: packet.request,
            value: packet.value.get(),
            index: packet.index.get(),
            length: packet.length.get(),
        }
    }
}

/// Ask the wheel which model it is (`c1 49 0000 0000 1000`).
pub fn encode_query_command() -> ControlRequest {
    ControlRequest {
        direction: Direction::DeviceToHost,
        kind: RequestKind::Vendor,
        recipient: Recipient::Interface,
        request: REQUEST_MODEL,
        value: 0,
        index: 0,
        length: MODEL_RESPONSE_LEN,
    }
}

/// Tell the wheel to re-enumerate in full-feature mode. Carries no data stage.
pub fn encode_switch_command(switch_value: u16) -> ControlRequest {
    ControlRequest {
        direction: Direction::HostToDevice,
        kind: RequestKind::Vendor,
        recipient: Recipient::Interface,
        request: REQUEST_CHANGE_MODE,
        value: switch_value,
        index: 0,
        length: 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum ResponseTag {
    Long = 0x0049,
    Short = 0x0047,
    #[num_enum(catch_all)]
    Unknown(u16),
}

/// Body of a reply tagged `0x0049`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LongReply {
    pub reserved0: U16,
    pub reserved1: U16,
    pub attachment: u8,
    pub model: u8,
    pub reserved2: U16,
    pub reserved3: U16,
    pub reserved4: U16,
    pub reserved5: U16,
}

/// Body of a reply tagged `0x0047`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ShortReply {
    pub reserved0: U16,
    pub reserved1: U16,
    pub attachment: u8,
    pub model: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResponse {
    Long(LongReply),
    Short(ShortReply),
}

impl ProbeResponse {
    pub fn tag(&self) -> ResponseTag {
        match self {
            ProbeResponse::Long(_) => ResponseTag::Long,
            ProbeResponse::Short(_) => ResponseTag::Short,
        }
    }

    pub fn model(&self) -> u8 {
        match self {
            ProbeResponse::Long(reply) => reply.model,
            ProbeResponse::Short(reply) => reply.model,
        }
    }

    pub fn attachment(&self) -> u8 {
        match self {
            ProbeResponse::Long(reply) => reply.attachment,
            ProbeResponse::Short(reply) => reply.attachment,
        }
    }

    /// Serialize the reply as the wheel sends it, tag first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MODEL_RESPONSE_LEN as usize);
        bytes.extend_from_slice(&u16::from(self.tag()).to_le_bytes());
        match self {
            ProbeResponse::Long(reply) => bytes.extend_from_slice(reply.as_bytes()),
            ProbeResponse::Short(reply) => bytes.extend_from_slice(reply.as_bytes()),
        }
        bytes
    }
}

/// Decode the reply to [`encode_query_command`].
///
/// A reply only has to reach the model byte. Reserved fields it does not
/// cover read as zero; bytes beyond the selected layout are ignored.
pub fn decode_probe_response(bytes: &[u8]) -> Result<ProbeResponse, TmError> {
    let (tag, body) = U16::read_from_prefix(bytes).map_err(|_| TmError::InsufficientData {
        expected: TAG_LEN,
        actual: bytes.len(),
    })?;

    let tag = ResponseTag::from_primitive(tag.get());
    if let ResponseTag::Unknown(tag) = tag {
        return Err(TmError::UnrecognizedResponse(tag));
    }
    if bytes.len() < IDENTIFYING_LEN {
        return Err(TmError::InsufficientData {
            expected: IDENTIFYING_LEN,
            actual: bytes.len(),
        });
    }

    Ok(match tag {
        ResponseTag::Short => ProbeResponse::Short(read_zero_padded(body)),
        _ => ProbeResponse::Long(read_zero_padded(body)),
    })
}

fn read_zero_padded<T: FromBytes + IntoBytes>(body: &[u8]) -> T {
    let mut reply = T::new_zeroed();
    let dst = reply.as_mut_bytes();
    let n = body.len().min(dst.len());
    dst[..n].copy_from_slice(&body[..n]);
    reply
}
