//! The `FlowMessage` record and its protobuf wire codec.
//!
//! The schema is the goflow flow message as enriched by bwNetFlow. Encoding
//! follows proto3: fields holding their zero value are omitted. Fields this
//! schema does not know are kept as raw bytes and written back on encode, so
//! relaying a payload from a producer with a newer schema loses nothing.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use protobuf::{CodedInputStream, CodedOutputStream};

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_FIXED32: u32 = 5;

// Field numbers of the flow schema
mod field {
    pub const TYPE: u32 = 1;
    pub const TIME_RECEIVED: u32 = 2;
    pub const SAMPLING_RATE: u32 = 3;
    pub const SEQUENCE_NUM: u32 = 4;
    pub const TIME_FLOW_END: u32 = 5;
    pub const SRC_ADDR: u32 = 6;
    pub const DST_ADDR: u32 = 7;
    pub const BYTES: u32 = 9;
    pub const PACKETS: u32 = 10;
    pub const SAMPLER_ADDRESS: u32 = 11;
    pub const NEXT_HOP: u32 = 12;
    pub const NEXT_HOP_AS: u32 = 13;
    pub const SRC_AS: u32 = 14;
    pub const DST_AS: u32 = 15;
    pub const SRC_NET: u32 = 16;
    pub const DST_NET: u32 = 17;
    pub const IN_IF: u32 = 18;
    pub const OUT_IF: u32 = 19;
    pub const PROTO: u32 = 20;
    pub const SRC_PORT: u32 = 21;
    pub const DST_PORT: u32 = 22;
    pub const IP_TOS: u32 = 23;
    pub const FORWARDING_STATUS: u32 = 24;
    pub const IP_TTL: u32 = 25;
    pub const TCP_FLAGS: u32 = 26;
    pub const SRC_MAC: u32 = 27;
    pub const DST_MAC: u32 = 28;
    pub const VLAN_ID: u32 = 29;
    pub const ETYPE: u32 = 30;
    pub const ICMP_TYPE: u32 = 31;
    pub const ICMP_CODE: u32 = 32;
    pub const TIME_FLOW_START: u32 = 38;
    pub const FLOW_DIRECTION: u32 = 42;
    pub const CID: u32 = 1000;
}

#[derive(Debug, thiserror::Error)]
pub enum FlowCodecError {
    #[error("protobuf stream error")]
    Protobuf(#[from] protobuf::Error),
    #[error("field {field} has wire type {actual}, expected {expected}")]
    WireTypeMismatch { field: u32, expected: u32, actual: u32 },
    #[error("invalid field number {0}")]
    InvalidField(u32),
    #[error("unsupported wire type {wire_type} for field {field}")]
    UnsupportedWireType { field: u32, wire_type: u32 },
}

/// Export protocol a flow was received with.
///
/// Values this schema does not name are kept as `Other` so that they are
/// re-encoded unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowType {
    #[default]
    FlowUnknown,
    Sflow5,
    NetflowV5,
    NetflowV9,
    Ipfix,
    Other(i32),
}

impl FlowType {
    pub fn as_i32(&self) -> i32 {
        match self {
            FlowType::FlowUnknown => 0,
            FlowType::Sflow5 => 1,
            FlowType::NetflowV5 => 2,
            FlowType::NetflowV9 => 3,
            FlowType::Ipfix => 4,
            FlowType::Other(value) => *value,
        }
    }
}

impl From<i32> for FlowType {
    fn from(value: i32) -> Self {
        match value {
            0 => FlowType::FlowUnknown,
            1 => FlowType::Sflow5,
            2 => FlowType::NetflowV5,
            3 => FlowType::NetflowV9,
            4 => FlowType::Ipfix,
            other => FlowType::Other(other),
        }
    }
}

/// A single flow record.
///
/// Timestamps are seconds since the Unix epoch. Addresses are raw network-order
/// bytes, 4 for IPv4 and 16 for IPv6.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowMessage {
    pub flow_type: FlowType,
    pub time_received: u64,
    pub sequence_num: u32,
    pub sampling_rate: u64,
    pub flow_direction: u32,
    pub sampler_address: Vec<u8>,
    pub time_flow_start: u64,
    pub time_flow_end: u64,
    pub bytes: u64,
    pub packets: u64,
    pub src_addr: Vec<u8>,
    pub dst_addr: Vec<u8>,
    pub etype: u32,
    pub proto: u32,
    pub src_port: u32,
    pub dst_port: u32,
    pub in_if: u32,
    pub out_if: u32,
    pub src_mac: u64,
    pub dst_mac: u64,
    pub vlan_id: u32,
    pub ip_tos: u32,
    pub forwarding_status: u32,
    pub ip_ttl: u32,
    pub tcp_flags: u32,
    pub icmp_type: u32,
    pub icmp_code: u32,
    pub src_as: u32,
    pub dst_as: u32,
    pub next_hop: Vec<u8>,
    pub next_hop_as: u32,
    pub src_net: u32,
    pub dst_net: u32,
    /// bwNetFlow customer id
    pub cid: u32,
    /// Raw tag and value bytes of fields not listed above, in wire order.
    /// They are written back unchanged by `encode`.
    pub unknown_fields: Vec<u8>,
}

fn expected_wire_type(number: u32) -> Option<u32> {
    match number {
        field::SRC_ADDR | field::DST_ADDR | field::SAMPLER_ADDRESS | field::NEXT_HOP => {
            Some(WIRE_LEN)
        }
        field::TYPE
        | field::TIME_RECEIVED
        | field::SAMPLING_RATE
        | field::SEQUENCE_NUM
        | field::TIME_FLOW_END
        | field::BYTES
        | field::PACKETS
        | field::NEXT_HOP_AS
        | field::SRC_AS
        | field::DST_AS
        | field::SRC_NET
        | field::DST_NET
        | field::IN_IF
        | field::OUT_IF
        | field::PROTO
        | field::SRC_PORT
        | field::DST_PORT
        | field::IP_TOS
        | field::FORWARDING_STATUS
        | field::IP_TTL
        | field::TCP_FLAGS
        | field::SRC_MAC
        | field::DST_MAC
        | field::VLAN_ID
        | field::ETYPE
        | field::ICMP_TYPE
        | field::ICMP_CODE
        | field::TIME_FLOW_START
        | field::FLOW_DIRECTION
        | field::CID => Some(WIRE_VARINT),
        _ => None,
    }
}

fn put_u64(
    stream: &mut CodedOutputStream,
    number: u32,
    value: u64,
) -> Result<(), protobuf::Error> {
    if value != 0 {
        stream.write_uint64(number, value)?;
    }
    Ok(())
}

fn put_u32(
    stream: &mut CodedOutputStream,
    number: u32,
    value: u32,
) -> Result<(), protobuf::Error> {
    if value != 0 {
        stream.write_uint32(number, value)?;
    }
    Ok(())
}

fn put_bytes(
    stream: &mut CodedOutputStream,
    number: u32,
    value: &[u8],
) -> Result<(), protobuf::Error> {
    if !value.is_empty() {
        stream.write_bytes(number, value)?;
    }
    Ok(())
}

fn skip_field(
    stream: &mut CodedInputStream,
    number: u32,
    wire_type: u32,
) -> Result<(), FlowCodecError> {
    match wire_type {
        WIRE_VARINT => {
            stream.read_raw_varint64()?;
        }
        WIRE_FIXED64 => {
            stream.read_raw_little_endian64()?;
        }
        WIRE_LEN => {
            let len = stream.read_raw_varint32()?;
            stream.read_raw_bytes(len)?;
        }
        WIRE_FIXED32 => {
            stream.read_raw_little_endian32()?;
        }
        // groups (3, 4) are deprecated and never produced by flow exporters
        _ => {
            return Err(FlowCodecError::UnsupportedWireType {
                field: number,
                wire_type,
            })
        }
    }
    Ok(())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

impl FlowMessage {
    /// Decode a flow from its protobuf wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FlowCodecError> {
        let mut flow = FlowMessage::default();
        let mut stream = CodedInputStream::from_bytes(data);

        while !stream.eof()? {
            let start = stream.pos() as usize;
            let tag = stream.read_raw_varint32()?;
            let number = tag >> 3;
            let wire_type = tag & 0x7;
            if number == 0 {
                return Err(FlowCodecError::InvalidField(number));
            }
            match expected_wire_type(number) {
                Some(expected) if expected != wire_type => {
                    return Err(FlowCodecError::WireTypeMismatch {
                        field: number,
                        expected,
                        actual: wire_type,
                    });
                }
                Some(_) => flow.read_field(number, &mut stream)?,
                None => {
                    skip_field(&mut stream, number, wire_type)?;
                    let end = stream.pos() as usize;
                    flow.unknown_fields.extend_from_slice(&data[start..end]);
                }
            }
        }

        Ok(flow)
    }

    fn read_field(
        &mut self,
        number: u32,
        stream: &mut CodedInputStream,
    ) -> Result<(), protobuf::Error> {
        match number {
            field::TYPE => self.flow_type = FlowType::from(stream.read_int32()?),
            field::TIME_RECEIVED => self.time_received = stream.read_uint64()?,
            field::SAMPLING_RATE => self.sampling_rate = stream.read_uint64()?,
            field::SEQUENCE_NUM => self.sequence_num = stream.read_uint32()?,
            field::TIME_FLOW_END => self.time_flow_end = stream.read_uint64()?,
            field::SRC_ADDR => self.src_addr = stream.read_bytes()?,
            field::DST_ADDR => self.dst_addr = stream.read_bytes()?,
            field::BYTES => self.bytes = stream.read_uint64()?,
            field::PACKETS => self.packets = stream.read_uint64()?,
            field::SAMPLER_ADDRESS => self.sampler_address = stream.read_bytes()?,
            field::NEXT_HOP => self.next_hop = stream.read_bytes()?,
            field::NEXT_HOP_AS => self.next_hop_as = stream.read_uint32()?,
            field::SRC_AS => self.src_as = stream.read_uint32()?,
            field::DST_AS => self.dst_as = stream.read_uint32()?,
            field::SRC_NET => self.src_net = stream.read_uint32()?,
            field::DST_NET => self.dst_net = stream.read_uint32()?,
            field::IN_IF => self.in_if = stream.read_uint32()?,
            field::OUT_IF => self.out_if = stream.read_uint32()?,
            field::PROTO => self.proto = stream.read_uint32()?,
            field::SRC_PORT => self.src_port = stream.read_uint32()?,
            field::DST_PORT => self.dst_port = stream.read_uint32()?,
            field::IP_TOS => self.ip_tos = stream.read_uint32()?,
            field::FORWARDING_STATUS => self.forwarding_status = stream.read_uint32()?,
            field::IP_TTL => self.ip_ttl = stream.read_uint32()?,
            field::TCP_FLAGS => self.tcp_flags = stream.read_uint32()?,
            field::SRC_MAC => self.src_mac = stream.read_uint64()?,
            field::DST_MAC => self.dst_mac = stream.read_uint64()?,
            field::VLAN_ID => self.vlan_id = stream.read_uint32()?,
            field::ETYPE => self.etype = stream.read_uint32()?,
            field::ICMP_TYPE => self.icmp_type = stream.read_uint32()?,
            field::ICMP_CODE => self.icmp_code = stream.read_uint32()?,
            field::TIME_FLOW_START => self.time_flow_start = stream.read_uint64()?,
            field::FLOW_DIRECTION => self.flow_direction = stream.read_uint32()?,
            field::CID => self.cid = stream.read_uint32()?,
            _ => {}
        }
        Ok(())
    }

    /// Encode this flow into protobuf wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FlowCodecError> {
        let mut buffer = Vec::new();
        {
            let mut stream = CodedOutputStream::vec(&mut buffer);
            let s = &mut stream;

            if self.flow_type.as_i32() != 0 {
                s.write_int32(field::TYPE, self.flow_type.as_i32())?;
            }
            put_u64(s, field::TIME_RECEIVED, self.time_received)?;
            put_u64(s, field::SAMPLING_RATE, self.sampling_rate)?;
            put_u32(s, field::SEQUENCE_NUM, self.sequence_num)?;
            put_u64(s, field::TIME_FLOW_END, self.time_flow_end)?;
            put_bytes(s, field::SRC_ADDR, &self.src_addr)?;
            put_bytes(s, field::DST_ADDR, &self.dst_addr)?;
            put_u64(s, field::BYTES, self.bytes)?;
            put_u64(s, field::PACKETS, self.packets)?;
            put_bytes(s, field::SAMPLER_ADDRESS, &self.sampler_address)?;
            put_bytes(s, field::NEXT_HOP, &self.next_hop)?;
            put_u32(s, field::NEXT_HOP_AS, self.next_hop_as)?;
            put_u32(s, field::SRC_AS, self.src_as)?;
            put_u32(s, field::DST_AS, self.dst_as)?;
            put_u32(s, field::SRC_NET, self.src_net)?;
            put_u32(s, field::DST_NET, self.dst_net)?;
            put_u32(s, field::IN_IF, self.in_if)?;
            put_u32(s, field::OUT_IF, self.out_if)?;
            put_u32(s, field::PROTO, self.proto)?;
            put_u32(s, field::SRC_PORT, self.src_port)?;
            put_u32(s, field::DST_PORT, self.dst_port)?;
            put_u32(s, field::IP_TOS, self.ip_tos)?;
            put_u32(s, field::FORWARDING_STATUS, self.forwarding_status)?;
            put_u32(s, field::IP_TTL, self.ip_ttl)?;
            put_u32(s, field::TCP_FLAGS, self.tcp_flags)?;
            put_u64(s, field::SRC_MAC, self.src_mac)?;
            put_u64(s, field::DST_MAC, self.dst_mac)?;
            put_u32(s, field::VLAN_ID, self.vlan_id)?;
            put_u32(s, field::ETYPE, self.etype)?;
            put_u32(s, field::ICMP_TYPE, self.icmp_type)?;
            put_u32(s, field::ICMP_CODE, self.icmp_code)?;
            put_u64(s, field::TIME_FLOW_START, self.time_flow_start)?;
            put_u32(s, field::FLOW_DIRECTION, self.flow_direction)?;
            put_u32(s, field::CID, self.cid)?;
            s.write_raw_bytes(&self.unknown_fields)?;

            stream.flush()?;
        }
        Ok(buffer)
    }

    pub fn src_ip(&self) -> Option<IpAddr> {
        ip_from_bytes(&self.src_addr)
    }

    pub fn dst_ip(&self) -> Option<IpAddr> {
        ip_from_bytes(&self.dst_addr)
    }
}
