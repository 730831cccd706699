//! ICP packet codec
//!
//! Every datagram is an 8-byte header followed by at most 255 payload bytes:
//!
//! | Offset | Size | Field                               |
//! |--------|------|-------------------------------------|
//! | 0      | 4    | Magic `"UPEL"`                      |
//! | 4      | 1    | `spec_version << 4 \| packet_type`  |
//! | 5      | 1    | Control (bit 7 = response)          |
//! | 6      | 1    | Transaction identifier (0 = none)   |
//! | 7      | 1    | Payload length                      |
//! | 8      | N    | Payload                             |
//!
//! Encoding rebuilds the header from the packet's current fields, so a payload edited after
//! construction always encodes with the right length byte. Decoding is pure and never panics;
//! structural problems surface as [`IcpError::MalformedPacket`].

mod kind;

pub use kind::PacketKind;

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::time::Instant;

use crate::types::{DataType, DeviceState, Identity, RegisterKey, TransactionId, Value};
use crate::{DecodeFault, IcpError, Result};

/// Protocol magic.
pub const MAGIC: [u8; 4] = *b"UPEL";

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload the length byte can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Protocol revision written into outgoing headers.
pub const SPEC_VERSION: u8 = 1;

/// Control bit marking a response.
pub const CONTROL_RESPONSE: u8 = 0x80;

/// Code reported when an Error packet carries no readable code.
pub const UNKNOWN_ERROR_CODE: u32 = 0xFFFF_FFFF;

/// Local bookkeeping attached by the arbiter; never transmitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketMeta {
    /// Sender of an inbound packet
    pub source: Option<SocketAddr>,
    /// Target of an outbound packet
    pub destination: Option<SocketAddr>,
    /// Local time the packet was received or sent
    pub timestamp: Option<Instant>,
}

/// One ICP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub spec_version: u8,
    pub control: u8,
    pub transaction_id: TransactionId,
    pub payload: Bytes,
    pub meta: PacketMeta,
}

/// Body of an Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: u32,
    pub message: String,
}

impl Packet {
    /// Create a request packet with an unassigned transaction identifier.
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.normalized(),
            spec_version: SPEC_VERSION,
            control: 0,
            transaction_id: TransactionId::NONE,
            payload: payload.into(),
            meta: PacketMeta::default(),
        }
    }

    /// Create a response to `transaction_id`.
    pub fn response(kind: PacketKind, transaction_id: TransactionId, payload: impl Into<Bytes>) -> Self {
        Self { control: CONTROL_RESPONSE, transaction_id, ..Self::new(kind, payload) }
    }

    /// Discovery request; always broadcast or probed with identifier 0.
    pub fn discovery() -> Self {
        Self::new(PacketKind::Discovery, Bytes::new())
    }

    /// Discovery response carrying a device identity.
    pub fn discovery_response(identity: &Identity) -> Self {
        Self::response(PacketKind::Discovery, TransactionId::NONE, identity.to_payload())
    }

    /// Register read request.
    pub fn register_read(key: RegisterKey) -> Self {
        Self::new(PacketKind::RegisterRead, register_payload(key, &[]))
    }

    /// Register write request.
    pub fn register_write(key: RegisterKey, value: &Value) -> Self {
        Self::new(PacketKind::RegisterWrite, register_payload(key, &value.to_bytes()))
    }

    /// State query; an empty payload asks the device to report its state.
    pub fn state_query() -> Self {
        Self::new(PacketKind::StateChange, Bytes::new())
    }

    /// State change request.
    pub fn state_change(state: DeviceState) -> Self {
        Self::new(PacketKind::StateChange, vec![state.code()])
    }

    /// Error response with a code and message.
    pub fn error(transaction_id: TransactionId, code: u32, message: &str) -> Self {
        let mut payload = BytesMut::with_capacity(4 + message.len());
        payload.put_u32(code);
        payload.put_slice(message.as_bytes());
        Self::response(PacketKind::Error, transaction_id, payload.freeze())
    }

    /// Bit 7 of the control byte.
    pub fn is_response(&self) -> bool {
        self.control & CONTROL_RESPONSE != 0
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode into a datagram.
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(IcpError::PayloadTooLarge { size: self.payload.len(), max: MAX_PAYLOAD });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&MAGIC);
        buf.put_u8((self.spec_version & 0x0F) << 4 | self.kind.nibble());
        buf.put_u8(self.control);
        buf.put_u8(self.transaction_id.get());
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a datagram. Bytes beyond the declared payload length are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(IcpError::malformed(DecodeFault::TooShort { len: buf.len() }));
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != MAGIC {
            return Err(IcpError::malformed(DecodeFault::BadMagic { found: magic }));
        }

        let declared = buf[7] as usize;
        let available = buf.len() - HEADER_LEN;
        if declared > available {
            return Err(IcpError::malformed(DecodeFault::Truncated { declared, available }));
        }

        Ok(Self {
            kind: PacketKind::from_nibble(buf[4]),
            spec_version: buf[4] >> 4,
            control: buf[5],
            transaction_id: TransactionId::from_raw(buf[6]),
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + declared]),
            meta: PacketMeta::default(),
        })
    }

    /// Register key of a register packet's payload.
    pub fn register_key(&self) -> Option<RegisterKey> {
        match self.kind {
            PacketKind::RegisterRead | PacketKind::RegisterWrite if self.payload.len() >= 4 => {
                let address = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                Some(RegisterKey::new(address, self.payload[3]))
            }
            _ => None,
        }
    }

    /// Data bytes following the register header of a register packet.
    pub fn register_data(&self) -> Option<&[u8]> {
        self.register_key().map(|_| &self.payload[4..])
    }

    /// Interpret the whole payload as a value of `data_type`.
    pub fn value(&self, data_type: DataType) -> Result<Value> {
        data_type.decode(&self.payload)
    }

    /// Interpret the answer to a request for `key`.
    ///
    /// A payload that echoes the register header of `key` is decoded from the bytes after
    /// it; anything else is decoded whole.
    pub fn register_value(&self, key: RegisterKey, data_type: DataType) -> Result<Value> {
        match self.register_data() {
            Some(data) if self.register_key() == Some(key) => data_type.decode(data),
            _ => self.value(data_type),
        }
    }

    /// Identity carried by a Discovery response.
    pub fn identity(&self) -> Option<Identity> {
        (self.kind == PacketKind::Discovery).then(|| Identity::parse(&self.payload))
    }

    /// Code and message of an Error packet.
    ///
    /// Payloads too short to hold a code report [`UNKNOWN_ERROR_CODE`].
    pub fn error_report(&self) -> Option<ErrorReport> {
        if self.kind != PacketKind::Error {
            return None;
        }
        Some(match self.payload.get(..4) {
            Some(code) => ErrorReport {
                code: u32::from_be_bytes([code[0], code[1], code[2], code[3]]),
                message: String::from_utf8_lossy(&self.payload[4..]).trim_end_matches('\0').to_string(),
            },
            None => ErrorReport { code: UNKNOWN_ERROR_CODE, message: "Unknown Error".to_string() },
        })
    }

    /// Run state carried by a StateChange packet.
    pub fn state(&self) -> Option<DeviceState> {
        match self.kind {
            PacketKind::StateChange => self.payload.last().map(|&code| DeviceState::from_code(code)),
            _ => None,
        }
    }
}

fn register_payload(key: RegisterKey, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u16(key.address);
    buf.put_u8(0);
    buf.put_u8(key.subindex);
    buf.put_slice(data);
    buf.freeze()
}
