//! Wire format of DSR packets: the fixed header followed by a chain of options, each laid out
//! as 1-byte type, 1-byte length and a type-specific body. Options are kept 4-byte aligned
//! with Pad1/PadN.
use crate::{DsrError, DsrErrorKind};
use byteorder::{BigEndian, ByteOrder};
use slog::{Record, Serializer, KV};
use std::net::Ipv4Addr;

// **************************************************
// ****************** Constants *********************
// **************************************************
pub const PAD1_TYPE: u8 = 224;
pub const PADN_TYPE: u8 = 0;
pub const RREQ_TYPE: u8 = 1;
pub const RREP_TYPE: u8 = 2;
pub const RERR_TYPE: u8 = 3;
pub const ACK_TYPE: u8 = 32;
pub const SR_TYPE: u8 = 96;
pub const ACK_REQ_TYPE: u8 = 160;

pub const ERROR_NODE_UNREACHABLE: u8 = 1;
pub const ERROR_OPTION_NOT_SUPPORTED: u8 = 3;

pub const MESSAGE_TYPE_CONTROL: u8 = 1;
pub const MESSAGE_TYPE_DATA: u8 = 2;
pub const FIXED_HEADER_SIZE: usize = 8;
pub const BROADCAST_NODE_ID: u16 = 255;

/// Most addresses an option can carry, bounded by the 1-byte length field.
pub const MAX_RREQ_ADDRESSES: usize = (255 - 6) / 4;
pub const MAX_ROUTE_ADDRESSES: usize = (255 - 2) / 4;

const OPTION_ALIGNMENT: usize = 4;
const RREQ_FIXED_LEN: usize = 6;
const ROUTE_FIXED_LEN: usize = 2;
const RERR_UNREACH_LEN: u8 = 18;
const RERR_UNSUPPORTED_LEN: u8 = 14;
const ACK_REQ_LEN: u8 = 2;
const ACK_LEN: u8 = 10;

/// Node identifier carried in the fixed header: the low 16 bits of the node's address.
pub fn node_id(address: Ipv4Addr) -> u16 {
    (u32::from(address) & 0xFFFF) as u16
}

/// Rebuilds the address of node `id` assuming it shares the upper 16 bits of `reference`.
pub fn address_from_id(reference: Ipv4Addr, id: u16) -> Ipv4Addr {
    Ipv4Addr::from((u32::from(reference) & 0xFFFF_0000) | u32::from(id))
}

fn malformed(msg: &str) -> DsrError {
    DsrError::from(DsrErrorKind::Serialization(msg.to_string()))
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    let mut bytes = [0u8; 2];
    BigEndian::write_u16(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

fn put_address(buf: &mut Vec<u8>, address: Ipv4Addr) {
    buf.extend_from_slice(&address.octets());
}

fn read_address(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(BigEndian::read_u32(data))
}

fn read_addresses(data: &[u8]) -> Vec<Ipv4Addr> {
    data.chunks(4).map(read_address).collect()
}

// **************************************************
// ******************  Options **********************
// **************************************************

/// Route Request. `addresses` starts with the initiator and grows one entry per hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub identification: u16,
    pub target: Ipv4Addr,
    pub addresses: Vec<Ipv4Addr>,
}

/// Route Reply carrying the complete route, initiator first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub addresses: Vec<Ipv4Addr>,
}

/// Source route. `addresses` holds the whole route, source first; `segments_left` is the
/// number of hops still to travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoute {
    pub salvage: u8,
    pub segments_left: u8,
    pub addresses: Vec<Ipv4Addr>,
}

impl SourceRoute {
    /// Source route for a packet about to leave the first node of `route`.
    pub fn new(route: Vec<Ipv4Addr>, salvage: u8) -> SourceRoute {
        let segments_left = route.len().saturating_sub(2).min(u8::MAX as usize) as u8;
        SourceRoute {
            salvage,
            segments_left,
            addresses: route,
        }
    }

    pub fn source(&self) -> Option<Ipv4Addr> {
        self.addresses.first().copied()
    }

    pub fn destination(&self) -> Option<Ipv4Addr> {
        self.addresses.last().copied()
    }

    /// The hop a node that just received this packet must relay it to.
    pub fn next_address(&self) -> Option<Ipv4Addr> {
        let n = self.addresses.len();
        let segs = self.segments_left as usize;
        if segs == 0 || segs > n {
            return None;
        }
        self.addresses.get(n - segs).copied()
    }
}

/// Route Error reporting an unreachable next hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteErrorUnreach {
    pub salvage: u8,
    pub error_source: Ipv4Addr,
    pub error_destination: Ipv4Addr,
    pub unreach_node: Ipv4Addr,
    pub original_destination: Ipv4Addr,
}

/// Route Error reporting an option type the sender did not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteErrorUnsupported {
    pub salvage: u8,
    pub error_source: Ipv4Addr,
    pub error_destination: Ipv4Addr,
    pub unsupported: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    pub ack_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub ack_id: u16,
    pub real_source: Ipv4Addr,
    pub real_destination: Ipv4Addr,
}

/// One entry of the option chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsrOption {
    Pad1,
    /// Padding with the given number of zero body bytes, after the type and length bytes.
    PadN(u8),
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    SourceRoute(SourceRoute),
    RouteErrorUnreach(RouteErrorUnreach),
    RouteErrorUnsupported(RouteErrorUnsupported),
    AckRequest(AckRequest),
    Ack(Ack),
    /// An option this node doesn't understand. Kept verbatim.
    Unknown { option_type: u8, data: Vec<u8> },
}

impl DsrOption {
    pub fn option_type(&self) -> u8 {
        match self {
            DsrOption::Pad1 => PAD1_TYPE,
            DsrOption::PadN(_) => PADN_TYPE,
            DsrOption::RouteRequest(_) => RREQ_TYPE,
            DsrOption::RouteReply(_) => RREP_TYPE,
            DsrOption::SourceRoute(_) => SR_TYPE,
            DsrOption::RouteErrorUnreach(_) | DsrOption::RouteErrorUnsupported(_) => RERR_TYPE,
            DsrOption::AckRequest(_) => ACK_REQ_TYPE,
            DsrOption::Ack(_) => ACK_TYPE,
            DsrOption::Unknown { option_type, .. } => *option_type,
        }
    }

    /// Value of the length field: body bytes, excluding type and length.
    /// Options whose body does not fit the 1-byte field are refused by `serialize`.
    pub fn length(&self) -> usize {
        match self {
            DsrOption::Pad1 => 0,
            DsrOption::PadN(size) => *size as usize,
            DsrOption::RouteRequest(m) => RREQ_FIXED_LEN + 4 * m.addresses.len(),
            DsrOption::RouteReply(m) => ROUTE_FIXED_LEN + 4 * m.addresses.len(),
            DsrOption::SourceRoute(m) => ROUTE_FIXED_LEN + 4 * m.addresses.len(),
            DsrOption::RouteErrorUnreach(_) => RERR_UNREACH_LEN as usize,
            DsrOption::RouteErrorUnsupported(_) => RERR_UNSUPPORTED_LEN as usize,
            DsrOption::AckRequest(_) => ACK_REQ_LEN as usize,
            DsrOption::Ack(_) => ACK_LEN as usize,
            DsrOption::Unknown { data, .. } => data.len(),
        }
    }

    pub fn serialized_size(&self) -> usize {
        match self {
            DsrOption::Pad1 => 1,
            _ => 2 + self.length(),
        }
    }

    /// Is this one of the route maintenance or discovery options?
    pub fn is_control(&self) -> bool {
        match self {
            DsrOption::RouteRequest(_)
            | DsrOption::RouteReply(_)
            | DsrOption::RouteErrorUnreach(_)
            | DsrOption::RouteErrorUnsupported(_)
            | DsrOption::Ack(_) => true,
            _ => false,
        }
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), DsrError> {
        let length = self.length();
        if length > u8::MAX as usize {
            let err_msg = format!(
                "Option of type {} is {} bytes long, more than its length field can carry",
                self.option_type(),
                length
            );
            return Err(DsrError::from(DsrErrorKind::Serialization(err_msg)));
        }
        buf.push(self.option_type());
        if let DsrOption::Pad1 = self {
            return Ok(());
        }
        buf.push(length as u8);
        match self {
            DsrOption::Pad1 => {}
            DsrOption::PadN(_) => {
                buf.extend(std::iter::repeat(0u8).take(length));
            }
            DsrOption::RouteRequest(m) => {
                put_u16(buf, m.identification);
                put_address(buf, m.target);
                for a in &m.addresses {
                    put_address(buf, *a);
                }
            }
            DsrOption::RouteReply(m) => {
                put_u16(buf, 0);
                for a in &m.addresses {
                    put_address(buf, *a);
                }
            }
            DsrOption::SourceRoute(m) => {
                buf.push(m.salvage);
                buf.push(m.segments_left);
                for a in &m.addresses {
                    put_address(buf, *a);
                }
            }
            DsrOption::RouteErrorUnreach(m) => {
                buf.push(ERROR_NODE_UNREACHABLE);
                buf.push(m.salvage);
                put_address(buf, m.error_source);
                put_address(buf, m.error_destination);
                put_address(buf, m.unreach_node);
                put_address(buf, m.original_destination);
            }
            DsrOption::RouteErrorUnsupported(m) => {
                buf.push(ERROR_OPTION_NOT_SUPPORTED);
                buf.push(m.salvage);
                put_address(buf, m.error_source);
                put_address(buf, m.error_destination);
                put_u16(buf, m.unsupported);
                //Reserved
                put_u16(buf, 0);
            }
            DsrOption::AckRequest(m) => put_u16(buf, m.ack_id),
            DsrOption::Ack(m) => {
                put_u16(buf, m.ack_id);
                put_address(buf, m.real_source);
                put_address(buf, m.real_destination);
            }
            DsrOption::Unknown { data, .. } => buf.extend_from_slice(data),
        }
        Ok(())
    }

    /// Parses one option from the start of `data`. Returns the option and the bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(DsrOption, usize), DsrError> {
        let option_type = *data
            .first()
            .ok_or_else(|| malformed("Empty option buffer"))?;
        if option_type == PAD1_TYPE {
            return Ok((DsrOption::Pad1, 1));
        }
        let len = *data
            .get(1)
            .ok_or_else(|| malformed("Option truncated before its length field"))?
            as usize;
        if data.len() < 2 + len {
            return Err(malformed("Option length exceeds the buffer"));
        }
        let body = &data[2..2 + len];

        let option = match option_type {
            PADN_TYPE => DsrOption::PadN(len as u8),
            RREQ_TYPE => {
                if len < RREQ_FIXED_LEN || (len - RREQ_FIXED_LEN) % 4 != 0 {
                    return Err(malformed("Route request with an invalid length"));
                }
                DsrOption::RouteRequest(RouteRequest {
                    identification: BigEndian::read_u16(&body[0..2]),
                    target: read_address(&body[2..6]),
                    addresses: read_addresses(&body[6..]),
                })
            }
            RREP_TYPE => {
                if len < ROUTE_FIXED_LEN || (len - ROUTE_FIXED_LEN) % 4 != 0 {
                    return Err(malformed("Route reply with an invalid length"));
                }
                DsrOption::RouteReply(RouteReply {
                    addresses: read_addresses(&body[2..]),
                })
            }
            SR_TYPE => {
                if len < ROUTE_FIXED_LEN || (len - ROUTE_FIXED_LEN) % 4 != 0 {
                    return Err(malformed("Source route with an invalid length"));
                }
                let sr = SourceRoute {
                    salvage: body[0],
                    segments_left: body[1],
                    addresses: read_addresses(&body[2..]),
                };
                if sr.segments_left as usize > sr.addresses.len() {
                    return Err(malformed("Segments left exceeds the number of addresses"));
                }
                DsrOption::SourceRoute(sr)
            }
            RERR_TYPE => {
                let error_type = *body
                    .first()
                    .ok_or_else(|| malformed("Route error without an error type"))?;
                match (error_type, len as u8) {
                    (ERROR_NODE_UNREACHABLE, RERR_UNREACH_LEN) => {
                        DsrOption::RouteErrorUnreach(RouteErrorUnreach {
                            salvage: body[1],
                            error_source: read_address(&body[2..6]),
                            error_destination: read_address(&body[6..10]),
                            unreach_node: read_address(&body[10..14]),
                            original_destination: read_address(&body[14..18]),
                        })
                    }
                    (ERROR_OPTION_NOT_SUPPORTED, RERR_UNSUPPORTED_LEN) => {
                        DsrOption::RouteErrorUnsupported(RouteErrorUnsupported {
                            salvage: body[1],
                            error_source: read_address(&body[2..6]),
                            error_destination: read_address(&body[6..10]),
                            unsupported: BigEndian::read_u16(&body[10..12]),
                        })
                    }
                    _ => return Err(malformed("Unknown route error type or length")),
                }
            }
            ACK_REQ_TYPE => {
                if len != ACK_REQ_LEN as usize {
                    return Err(malformed("Ack request with an invalid length"));
                }
                DsrOption::AckRequest(AckRequest {
                    ack_id: BigEndian::read_u16(&body[0..2]),
                })
            }
            ACK_TYPE => {
                if len != ACK_LEN as usize {
                    return Err(malformed("Ack with an invalid length"));
                }
                DsrOption::Ack(Ack {
                    ack_id: BigEndian::read_u16(&body[0..2]),
                    real_source: read_address(&body[2..6]),
                    real_destination: read_address(&body[6..10]),
                })
            }
            _ => DsrOption::Unknown {
                option_type,
                data: body.to_vec(),
            },
        };

        Ok((option, 2 + len))
    }
}

// **************************************************
// ****************** Packet ************************
// **************************************************

/// Fixed portion of the DSR header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub next_header: u8,
    pub message_type: u8,
    pub source_id: u16,
    pub destination_id: u16,
    /// Size of the option area that follows.
    pub payload_length: u16,
}

/// A DSR packet: fixed header, option chain and the upper-layer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsrPacket {
    pub header: FixedHeader,
    pub options: Vec<DsrOption>,
    pub payload: Vec<u8>,
}

impl DsrPacket {
    pub fn new(message_type: u8, source_id: u16, destination_id: u16, next_header: u8) -> DsrPacket {
        DsrPacket {
            header: FixedHeader {
                next_header,
                message_type,
                source_id,
                destination_id,
                payload_length: 0,
            },
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn control(source_id: u16, destination_id: u16) -> DsrPacket {
        DsrPacket::new(MESSAGE_TYPE_CONTROL, source_id, destination_id, 0)
    }

    pub fn is_data(&self) -> bool {
        self.header.message_type == MESSAGE_TYPE_DATA
    }

    /// Appends an option, inserting the padding needed to keep it 4-byte aligned.
    pub fn add_option(&mut self, option: DsrOption) {
        let offset = self.options_length();
        let pad = (OPTION_ALIGNMENT - offset % OPTION_ALIGNMENT) % OPTION_ALIGNMENT;
        match pad {
            0 => {}
            1 => self.options.push(DsrOption::Pad1),
            n => self.options.push(DsrOption::PadN((n - 2) as u8)),
        }
        self.options.push(option);
        self.header.payload_length = self.options_length() as u16;
    }

    /// Replaces the first source route option, if any.
    pub fn set_source_route(&mut self, sr: SourceRoute) {
        for opt in self.options.iter_mut() {
            if let DsrOption::SourceRoute(_) = opt {
                *opt = DsrOption::SourceRoute(sr);
                break;
            }
        }
        self.header.payload_length = self.options_length() as u16;
    }

    /// Drops every ack request so the packet can be re-armed by the next hop.
    pub fn remove_ack_request(&mut self) {
        self.options.retain(|o| match o {
            DsrOption::AckRequest(_) => false,
            _ => true,
        });
        self.header.payload_length = self.options_length() as u16;
    }

    pub fn options_length(&self) -> usize {
        self.options.iter().map(|o| o.serialized_size()).sum()
    }

    pub fn serialized_size(&self) -> usize {
        FIXED_HEADER_SIZE + self.options_length() + self.payload.len()
    }

    /// Encodes the packet. Fails if an option or the option area is too large for its
    /// length field.
    pub fn serialize(&self) -> Result<Vec<u8>, DsrError> {
        let options_length = self.options_length();
        if options_length > u16::MAX as usize {
            return Err(malformed("Option area too large for the fixed header"));
        }
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.push(self.header.next_header);
        buf.push(self.header.message_type);
        put_u16(&mut buf, self.header.source_id);
        put_u16(&mut buf, self.header.destination_id);
        put_u16(&mut buf, options_length as u16);
        for opt in &self.options {
            opt.serialize(&mut buf)?;
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn deserialize(data: &[u8]) -> Result<DsrPacket, DsrError> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(malformed("Packet shorter than the DSR fixed header"));
        }
        let header = FixedHeader {
            next_header: data[0],
            message_type: data[1],
            source_id: BigEndian::read_u16(&data[2..4]),
            destination_id: BigEndian::read_u16(&data[4..6]),
            payload_length: BigEndian::read_u16(&data[6..8]),
        };
        let options_end = FIXED_HEADER_SIZE + header.payload_length as usize;
        if data.len() < options_end {
            return Err(malformed("Option area exceeds the packet"));
        }

        let mut options = Vec::new();
        let mut offset = FIXED_HEADER_SIZE;
        while offset < options_end {
            let (option, consumed) = DsrOption::deserialize(&data[offset..options_end])?;
            options.push(option);
            offset += consumed;
        }

        Ok(DsrPacket {
            header,
            options,
            payload: data[options_end..].to_vec(),
        })
    }

    pub fn source_route(&self) -> Option<&SourceRoute> {
        self.options.iter().find_map(|o| match o {
            DsrOption::SourceRoute(sr) => Some(sr),
            _ => None,
        })
    }

    pub fn route_error(&self) -> Option<&RouteErrorUnreach> {
        self.options.iter().find_map(|o| match o {
            DsrOption::RouteErrorUnreach(e) => Some(e),
            _ => None,
        })
    }

    pub fn ack_request(&self) -> Option<AckRequest> {
        self.options.iter().find_map(|o| match o {
            DsrOption::AckRequest(a) => Some(*a),
            _ => None,
        })
    }

    /// Label of the packet for logging, taken from its first meaningful option.
    pub fn msg_type(&self) -> &'static str {
        for opt in &self.options {
            match opt {
                DsrOption::RouteRequest(_) => return "RREQ",
                DsrOption::RouteReply(_) => return "RREP",
                DsrOption::RouteErrorUnreach(_) | DsrOption::RouteErrorUnsupported(_) => {
                    return "RERR"
                }
                DsrOption::Ack(_) => return "ACK",
                DsrOption::Unknown { .. } => return "UNKNOWN",
                _ => {}
            }
        }
        if self.is_data() {
            "DATA"
        } else {
            "CONTROL"
        }
    }

    /// Hops travelled so far, as far as the option chain tells.
    pub fn hops(&self) -> usize {
        for opt in &self.options {
            match opt {
                DsrOption::RouteRequest(m) => return m.addresses.len(),
                DsrOption::SourceRoute(m) => {
                    let n = m.addresses.len();
                    return n.saturating_sub(1 + m.segments_left as usize);
                }
                _ => {}
            }
        }
        0
    }

    /// Stable identifier used for logging and passive-ack matching. Data packets are identified by
    /// their payload, so the id survives forwarding.
    pub fn msg_id(&self) -> String {
        if self.is_data() {
            return format!("{:x}", md5::compute(&self.payload));
        }
        match self.serialize() {
            Ok(bytes) => format!("{:x}", md5::compute(bytes)),
            Err(_) => format!("{:x}", md5::compute(format!("{:?}", self.options))),
        }
    }
}

impl KV for DsrPacket {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        for opt in &self.options {
            match opt {
                DsrOption::RouteRequest(m) => {
                    let _ = serializer.emit_u16("rreq_id", m.identification)?;
                    let _ = serializer.emit_str("target", &m.target.to_string())?;
                }
                DsrOption::RouteReply(m) => {
                    let _ = serializer.emit_usize("route_length", m.addresses.len())?;
                }
                DsrOption::SourceRoute(m) => {
                    let _ = serializer.emit_u8("segments_left", m.segments_left)?;
                    let _ = serializer.emit_u8("salvage", m.salvage)?;
                }
                DsrOption::RouteErrorUnreach(m) => {
                    let _ = serializer.emit_str("unreach_node", &m.unreach_node.to_string())?;
                }
                DsrOption::Ack(m) => {
                    let _ = serializer.emit_u16("ack_id", m.ack_id)?;
                }
                _ => {}
            }
        }
        serializer.emit_str("msg_type", self.msg_type())
    }
}
