//! DHCPv4 wire format (RFC 2131)
//!
//! [`Dhcp4`] is an accessor view over a caller-owned buffer. The marshaller
//! works in two modes on the same buffer layout: a fresh build from zeroed
//! memory, and an in-place transform of a received request into a reply that
//! keeps xid, chaddr and the flags word while overwriting op, yiaddr and the
//! options region.

use super::options::{self, Options};
use lanhound_core::{Error, MacAddr, Result};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Magic cookie preceding the options region
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed header size up to (not including) the magic cookie
pub const FIXED_HEADER_LEN: usize = 236;

/// Smallest parseable message: fixed header plus cookie
pub const MIN_PACKET_LEN: usize = FIXED_HEADER_LEN + 4;

/// BOOTP historically pads messages to 300 bytes; some clients drop less.
pub const MIN_WIRE_LEN: usize = 300;

pub const BOOT_REQUEST: u8 = 1;
pub const BOOT_REPLY: u8 = 2;

const BROADCAST_FLAG: u16 = 0x8000;

/// DHCP message types (RFC 2132 §9.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Discover),
            2 => Some(MessageType::Offer),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Decline),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Nak),
            7 => Some(MessageType::Release),
            8 => Some(MessageType::Inform),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Discover => "DISCOVER",
            MessageType::Offer => "OFFER",
            MessageType::Request => "REQUEST",
            MessageType::Decline => "DECLINE",
            MessageType::Ack => "ACK",
            MessageType::Nak => "NAK",
            MessageType::Release => "RELEASE",
            MessageType::Inform => "INFORM",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Accessor view over a DHCPv4 message.
#[derive(Debug, Clone, Copy)]
pub struct Dhcp4<'a> {
    buf: &'a [u8],
}

impl<'a> Dhcp4<'a> {
    /// Wrap `buf`, rejecting short messages, unknown opcodes and a missing
    /// magic cookie.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(Error::invalid_frame(format!(
                "dhcp message too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0] != BOOT_REQUEST && buf[0] != BOOT_REPLY {
            return Err(Error::invalid_frame(format!("dhcp bad opcode {}", buf[0])));
        }
        if buf[FIXED_HEADER_LEN..FIXED_HEADER_LEN + 4] != MAGIC_COOKIE {
            return Err(Error::invalid_frame("dhcp magic cookie missing"));
        }
        Ok(Self { buf })
    }

    pub fn op(&self) -> u8 {
        self.buf[0]
    }

    pub fn htype(&self) -> u8 {
        self.buf[1]
    }

    pub fn hlen(&self) -> u8 {
        self.buf[2]
    }

    pub fn xid(&self) -> [u8; 4] {
        [self.buf[4], self.buf[5], self.buf[6], self.buf[7]]
    }

    pub fn secs(&self) -> u16 {
        u16::from_be_bytes([self.buf[8], self.buf[9]])
    }

    pub fn flags(&self) -> u16 {
        u16::from_be_bytes([self.buf[10], self.buf[11]])
    }

    /// Only the broadcast bit of the flags word is honored.
    pub fn broadcast(&self) -> bool {
        self.flags() & BROADCAST_FLAG != 0
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        ip_at(self.buf, 12)
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        ip_at(self.buf, 16)
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        ip_at(self.buf, 20)
    }

    pub fn giaddr(&self) -> Ipv4Addr {
        ip_at(self.buf, 24)
    }

    /// Client hardware address (low 6 bytes of the 16-byte field).
    pub fn chaddr(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf[28..34]);
        MacAddr(mac)
    }

    /// Parse the options region into a code-to-value map. Duplicate codes
    /// keep the last value; a truncated option ends the scan.
    pub fn parse_options(&self) -> Options<'a> {
        let mut map: Options = HashMap::new();
        let data = &self.buf[MIN_PACKET_LEN..];
        let mut offset = 0;
        while offset < data.len() {
            let code = data[offset];
            offset += 1;
            match code {
                options::OPTION_PAD => continue,
                options::OPTION_END => break,
                _ => {}
            }
            if offset >= data.len() {
                break;
            }
            let len = data[offset] as usize;
            offset += 1;
            if offset + len > data.len() {
                break;
            }
            map.insert(code, &data[offset..offset + len]);
            offset += len;
        }
        map
    }

    pub fn message_type(&self) -> Option<MessageType> {
        let opts = self.parse_options();
        let value = opts.get(&options::OPTION_MESSAGE_TYPE)?;
        if value.len() != 1 {
            return None;
        }
        MessageType::from_u8(value[0])
    }
}

impl fmt::Display for Dhcp4<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op={} xid={:02x?} chaddr={} ciaddr={} yiaddr={} brd={}",
            self.op(),
            self.xid(),
            self.chaddr(),
            self.ciaddr(),
            self.yiaddr(),
            self.broadcast()
        )
    }
}

fn ip_at(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3])
}

/// Fields for [`marshal`]. `None` preserves whatever the buffer already
/// holds, which is what the reply transform relies on.
#[derive(Default)]
pub struct MarshalFields<'v> {
    pub chaddr: Option<MacAddr>,
    pub ciaddr: Option<Ipv4Addr>,
    pub yiaddr: Option<Ipv4Addr>,
    pub xid: Option<[u8; 4]>,
    pub secs: Option<u16>,
    pub broadcast: Option<bool>,
    pub options: &'v [(u8, &'v [u8])],
}

/// Write a DHCP message into `buf`.
///
/// Fresh build: pass a zeroed buffer and `Some` for every field. Transform:
/// pass the buffer holding the received request and `None` for the fields to
/// preserve; op, the message type and the options region are always
/// overwritten. Returns the wire length (at least [`MIN_WIRE_LEN`]).
pub fn marshal(buf: &mut [u8], op: u8, mt: MessageType, fields: MarshalFields) -> Result<usize> {
    let options_len: usize = fields.options.iter().map(|(_, v)| v.len() + 2).sum();
    // 3 bytes for the message type option, 1 for the end marker
    let needed = MIN_PACKET_LEN + 3 + options_len + 1;
    if buf.len() < needed.max(MIN_WIRE_LEN) {
        return Err(Error::invalid_frame("buffer too small for dhcp message"));
    }

    buf[0] = op;
    buf[1] = 1; // htype ethernet
    buf[2] = 6; // hlen
    buf[3] = 0; // hops
    if let Some(xid) = fields.xid {
        buf[4..8].copy_from_slice(&xid);
    }
    if let Some(secs) = fields.secs {
        buf[8..10].copy_from_slice(&secs.to_be_bytes());
    }
    if let Some(broadcast) = fields.broadcast {
        let mut flags = u16::from_be_bytes([buf[10], buf[11]]);
        if broadcast {
            flags |= BROADCAST_FLAG;
        } else {
            flags &= !BROADCAST_FLAG;
        }
        buf[10..12].copy_from_slice(&flags.to_be_bytes());
    }
    if let Some(ciaddr) = fields.ciaddr {
        buf[12..16].copy_from_slice(&ciaddr.octets());
    }
    if let Some(yiaddr) = fields.yiaddr {
        buf[16..20].copy_from_slice(&yiaddr.octets());
    }
    buf[20..24].fill(0); // siaddr
    buf[24..28].fill(0); // giaddr
    if let Some(chaddr) = fields.chaddr {
        buf[28..34].copy_from_slice(chaddr.as_bytes());
        buf[34..44].fill(0);
    }
    // sname and file stay zero on fresh builds; replies do not use them
    buf[FIXED_HEADER_LEN..FIXED_HEADER_LEN + 4].copy_from_slice(&MAGIC_COOKIE);

    let mut offset = MIN_PACKET_LEN;
    buf[offset] = options::OPTION_MESSAGE_TYPE;
    buf[offset + 1] = 1;
    buf[offset + 2] = mt as u8;
    offset += 3;
    for (code, value) in fields.options {
        if *code == options::OPTION_MESSAGE_TYPE {
            continue;
        }
        buf[offset] = *code;
        buf[offset + 1] = value.len() as u8;
        buf[offset + 2..offset + 2 + value.len()].copy_from_slice(value);
        offset += 2 + value.len();
    }
    buf[offset] = options::OPTION_END;
    offset += 1;

    if offset < MIN_WIRE_LEN {
        buf[offset..MIN_WIRE_LEN].fill(0);
        offset = MIN_WIRE_LEN;
    }
    Ok(offset)
}

/// Build a server reply from a received request, preserving xid, chaddr and
/// the flags word. `lease_secs` of zero omits the lease-time option (INFORM).
pub fn reply_packet(
    req: Dhcp4,
    mt: MessageType,
    server_id: Ipv4Addr,
    yiaddr: Ipv4Addr,
    lease_secs: u32,
    extra: &[(u8, &[u8])],
) -> Vec<u8> {
    let options_len: usize = extra.iter().map(|(_, v)| v.len() + 2).sum();
    let size = (MIN_PACKET_LEN + 3 + 6 + 6 + options_len + 1).max(MIN_WIRE_LEN);

    let mut buf = vec![0u8; size];
    // carry the request's fixed header, then transform it in place
    buf[..FIXED_HEADER_LEN].copy_from_slice(&req.buf[..FIXED_HEADER_LEN]);
    // replies never use the server-name and boot-file fields
    buf[44..FIXED_HEADER_LEN].fill(0);

    let server_bytes = server_id.octets();
    let lease_bytes = lease_secs.to_be_bytes();
    let mut opts: Vec<(u8, &[u8])> = Vec::with_capacity(extra.len() + 2);
    opts.push((options::OPTION_SERVER_ID, &server_bytes[..]));
    if lease_secs > 0 {
        opts.push((options::OPTION_LEASE_TIME, &lease_bytes[..]));
    }
    for (code, value) in extra {
        if *code == options::OPTION_SERVER_ID || *code == options::OPTION_LEASE_TIME {
            continue;
        }
        opts.push((*code, value));
    }

    let len = marshal(
        &mut buf,
        BOOT_REPLY,
        mt,
        MarshalFields {
            yiaddr: Some(yiaddr),
            ciaddr: Some(Ipv4Addr::UNSPECIFIED),
            secs: Some(0),
            options: &opts,
            ..Default::default()
        },
    )
    .expect("buffer sized for options");
    buf.truncate(len);
    buf
}

/// Build a client-side request from scratch (used by the attacker module).
pub fn request_packet(
    mt: MessageType,
    chaddr: MacAddr,
    ciaddr: Ipv4Addr,
    xid: [u8; 4],
    broadcast: bool,
    extra: &[(u8, &[u8])],
) -> Vec<u8> {
    let options_len: usize = extra.iter().map(|(_, v)| v.len() + 2).sum();
    let size = (MIN_PACKET_LEN + 3 + options_len + 1).max(MIN_WIRE_LEN);
    let mut buf = vec![0u8; size];
    let len = marshal(
        &mut buf,
        BOOT_REQUEST,
        mt,
        MarshalFields {
            chaddr: Some(chaddr),
            ciaddr: Some(ciaddr),
            yiaddr: Some(Ipv4Addr::UNSPECIFIED),
            xid: Some(xid),
            secs: Some(0),
            broadcast: Some(broadcast),
            options: extra,
        },
    )
    .expect("buffer sized for options");
    buf.truncate(len);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp4::options::*;

    const MAC1: MacAddr = MacAddr([0, 2, 3, 4, 5, 1]);

    fn discover(xid: [u8; 4]) -> Vec<u8> {
        request_packet(
            MessageType::Discover,
            MAC1,
            Ipv4Addr::UNSPECIFIED,
            xid,
            true,
            &[(OPTION_PARAMETER_REQUEST_LIST, &[1, 3, 6][..])],
        )
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(Dhcp4::new(&[0u8; 100]).is_err());

        let mut buf = discover([1, 1, 1, 1]);
        buf[0] = 3; // bad opcode
        assert!(Dhcp4::new(&buf).is_err());

        let mut buf = discover([1, 1, 1, 1]);
        buf[FIXED_HEADER_LEN] = 0; // break the cookie
        assert!(Dhcp4::new(&buf).is_err());
    }

    #[test]
    fn test_marshal_roundtrip() {
        let buf = discover([1, 1, 1, 1]);
        assert!(buf.len() >= MIN_WIRE_LEN);

        let dhcp = Dhcp4::new(&buf).unwrap();
        assert_eq!(dhcp.op(), BOOT_REQUEST);
        assert_eq!(dhcp.htype(), 1);
        assert_eq!(dhcp.hlen(), 6);
        assert_eq!(dhcp.xid(), [1, 1, 1, 1]);
        assert_eq!(dhcp.chaddr(), MAC1);
        assert!(dhcp.broadcast());
        assert_eq!(dhcp.message_type(), Some(MessageType::Discover));

        let opts = dhcp.parse_options();
        assert_eq!(opts[&OPTION_PARAMETER_REQUEST_LIST], &[1, 3, 6]);
    }

    #[test]
    fn test_reparse_equivalence() {
        // marshal(parse(b)) is structurally equivalent to b
        let original = discover([7, 7, 7, 7]);
        let parsed = Dhcp4::new(&original).unwrap();
        let opts = parsed.parse_options();
        let rebuilt_opts: Vec<(u8, &[u8])> = opts
            .iter()
            .filter(|(c, _)| **c != OPTION_MESSAGE_TYPE)
            .map(|(c, v)| (*c, *v))
            .collect();
        let rebuilt = request_packet(
            parsed.message_type().unwrap(),
            parsed.chaddr(),
            parsed.ciaddr(),
            parsed.xid(),
            parsed.broadcast(),
            &rebuilt_opts,
        );

        let reparsed = Dhcp4::new(&rebuilt).unwrap();
        assert_eq!(reparsed.op(), parsed.op());
        assert_eq!(reparsed.xid(), parsed.xid());
        assert_eq!(reparsed.chaddr(), parsed.chaddr());
        assert_eq!(reparsed.broadcast(), parsed.broadcast());
        assert_eq!(reparsed.parse_options(), parsed.parse_options());
    }

    #[test]
    fn test_duplicate_option_last_wins() {
        let buf = discover([1, 1, 1, 1]);
        // hand-build an options region with a duplicate code
        let mut raw = buf[..MIN_PACKET_LEN].to_vec();
        raw.extend_from_slice(&[OPTION_HOST_NAME, 1, b'a']);
        raw.extend_from_slice(&[OPTION_HOST_NAME, 1, b'b']);
        raw.push(OPTION_END);
        raw.resize(MIN_WIRE_LEN, 0);

        let opts = Dhcp4::new(&raw).unwrap().parse_options();
        assert_eq!(opts[&OPTION_HOST_NAME], b"b");
    }

    #[test]
    fn test_reply_transform_preserves_request_identity() {
        let mut req_bytes = discover([9, 9, 9, 9]);
        // give the request a nonzero secs to check the reply clears it
        req_bytes[8..10].copy_from_slice(&5u16.to_be_bytes());
        let req = Dhcp4::new(&req_bytes).unwrap();

        let server = Ipv4Addr::new(192, 168, 0, 129);
        let yiaddr = Ipv4Addr::new(192, 168, 0, 40);
        let mask: &[u8] = &[255, 255, 255, 0];
        let reply_bytes = reply_packet(
            req,
            MessageType::Offer,
            server,
            yiaddr,
            14400,
            &[(OPTION_SUBNET_MASK, mask)],
        );

        let reply = Dhcp4::new(&reply_bytes).unwrap();
        assert_eq!(reply.op(), BOOT_REPLY);
        assert_eq!(reply.xid(), req.xid());
        assert_eq!(reply.chaddr(), req.chaddr());
        assert_eq!(reply.broadcast(), req.broadcast());
        assert_eq!(reply.yiaddr(), yiaddr);
        assert_eq!(reply.secs(), 0);

        let opts = reply.parse_options();
        assert_eq!(opts[&OPTION_MESSAGE_TYPE], &[MessageType::Offer as u8]);
        assert_eq!(opts[&OPTION_SERVER_ID], &server.octets()[..]);
        assert_eq!(opts[&OPTION_LEASE_TIME], &14400u32.to_be_bytes()[..]);
        assert_eq!(opts[&OPTION_SUBNET_MASK], mask);
    }

    #[test]
    fn test_reply_without_lease_time() {
        let req_bytes = discover([2, 2, 2, 2]);
        let req = Dhcp4::new(&req_bytes).unwrap();
        let reply = reply_packet(
            req,
            MessageType::Ack,
            Ipv4Addr::new(192, 168, 0, 129),
            Ipv4Addr::UNSPECIFIED,
            0,
            &[],
        );
        let opts = Dhcp4::new(&reply).unwrap().parse_options();
        assert!(!opts.contains_key(&OPTION_LEASE_TIME));
        assert!(opts.contains_key(&OPTION_SERVER_ID));
    }

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Discover));
        assert_eq!(MessageType::from_u8(6), Some(MessageType::Nak));
        assert_eq!(MessageType::from_u8(99), None);
        assert_eq!(MessageType::Release.to_string(), "RELEASE");
    }
}
