//! BOOTP/DHCPv4 packet codec (RFC 2131).

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::options::{
    self, derived_times, DhcpOption, OPT_HOSTNAME, OPT_MSG_TYPE, OPT_REQUESTED_IP, OPT_SERVER_ID,
    DHCPACK, DHCPNAK, DHCPOFFER,
};

pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const MIN_PACKET_LEN: usize = 240;
const WIRE_MIN_LEN: usize = 300;

#[derive(Error, Debug)]
pub enum DhcpParseError {
    #[error("packet too short: {0} bytes (minimum {MIN_PACKET_LEN})")]
    TooShort(usize),
    #[error("invalid magic cookie")]
    InvalidMagic,
}

#[derive(Debug, Clone)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    pub fn parse(data: &[u8]) -> Result<Self, DhcpParseError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(DhcpParseError::TooShort(data.len()));
        }
        if data[236..240] != MAGIC_COOKIE {
            return Err(DhcpParseError::InvalidMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = if data.len() > MIN_PACKET_LEN {
            options::parse_options(&data[MIN_PACKET_LEN..])
        } else {
            vec![]
        };

        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(576);
        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&self.sname);
        buf.extend_from_slice(&self.file);
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(&options::encode_options(&self.options));

        while buf.len() < WIRE_MIN_LEN {
            buf.push(0);
        }
        buf
    }

    pub fn mac_str(&self) -> String {
        let len = self.hlen.min(16) as usize;
        tb_common::mac::format_mac(&self.chaddr[..len]).unwrap_or_default()
    }

    pub fn mac_bytes(&self) -> &[u8] {
        let len = self.hlen.min(16) as usize;
        &self.chaddr[..len]
    }

    pub fn get_option_value(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    /// DHCP message-type iff `op == BOOTREQUEST`, else `None`.
    pub fn request_type(&self) -> Option<u8> {
        if self.op != 1 {
            return None;
        }
        self.get_option_value(OPT_MSG_TYPE)?.as_u8()
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get_option_value(OPT_REQUESTED_IP)?.as_ipv4()
    }

    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.get_option_value(OPT_SERVER_ID)?.as_ipv4()
    }

    fn base_reply(&self, yiaddr: Ipv4Addr, siaddr: Ipv4Addr) -> DhcpPacket {
        DhcpPacket {
            op: 2, // BOOTREPLY
            htype: self.htype,
            hlen: self.hlen,
            hops: 0,
            xid: self.xid,
            secs: self.secs,
            flags: self.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr,
            siaddr,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![],
        }
    }

    /// Shared option order for OFFER/ACK: message-type, mask, router,
    /// renewal, rebinding, lease, server-id (= router_ip), router again,
    /// DNS list — the duplicated router option is intentional, for clients
    /// that only look at the first occurrence of each option code.
    fn lease_options(
        msg_type: u8,
        router_ip: Ipv4Addr,
        netmask: Ipv4Addr,
        lease_time: i32,
        dns_ips: &[Ipv4Addr],
    ) -> Vec<DhcpOption> {
        let (renew, rebind) = derived_times(lease_time);
        vec![
            DhcpOption::msg_type(msg_type),
            DhcpOption::subnet_mask(netmask),
            DhcpOption::router(router_ip),
            DhcpOption::renewal_time(renew),
            DhcpOption::rebinding_time(rebind),
            DhcpOption::lease_time(lease_time),
            DhcpOption::server_id(router_ip),
            DhcpOption::router(router_ip),
            DhcpOption::dns_servers(dns_ips),
        ]
    }

    /// Broadcast address for `ip`'s subnet under `netmask` (host bits set).
    fn broadcast_for(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
    }

    /// Appends the optional hostname (12) and broadcast-address (28)
    /// options after the core lease options: hostname is echoed back only
    /// if the client sent one, broadcast-address is always derivable from
    /// the assigned ip + netmask.
    fn push_optional_options(&self, options: &mut Vec<DhcpOption>, ip: Ipv4Addr, netmask: Ipv4Addr) {
        options.push(DhcpOption::broadcast_address(Self::broadcast_for(ip, netmask)));
        if let Some(hostname) = self.get_option_value(OPT_HOSTNAME) {
            options.push(DhcpOption::hostname(&hostname.data));
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn offer(
        &self,
        ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        router_ip: Ipv4Addr,
        netmask: Ipv4Addr,
        lease_time: i32,
        dns_ips: &[Ipv4Addr],
    ) -> DhcpPacket {
        let mut reply = self.base_reply(ip, server_ip);
        reply.options = Self::lease_options(DHCPOFFER, router_ip, netmask, lease_time, dns_ips);
        self.push_optional_options(&mut reply.options, ip, netmask);
        reply
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ack(
        &self,
        ip: Ipv4Addr,
        server_ip: Ipv4Addr,
        router_ip: Ipv4Addr,
        netmask: Ipv4Addr,
        lease_time: i32,
        dns_ips: &[Ipv4Addr],
    ) -> DhcpPacket {
        let mut reply = self.base_reply(ip, server_ip);
        reply.options = Self::lease_options(DHCPACK, router_ip, netmask, lease_time, dns_ips);
        self.push_optional_options(&mut reply.options, ip, netmask);
        reply
    }

    pub fn nak(&self) -> DhcpPacket {
        let mut reply = self.base_reply(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
        reply.options = vec![DhcpOption::msg_type(DHCPNAK)];
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_discover(msg_type: u8, xid: u32) -> Vec<u8> {
        let mut pkt = vec![0u8; 300];
        pkt[0] = 1;
        pkt[1] = 1;
        pkt[2] = 6;
        pkt[4..8].copy_from_slice(&xid.to_be_bytes());
        pkt[28..34].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        pkt[240] = 53;
        pkt[241] = 1;
        pkt[242] = msg_type;
        pkt[243] = 255;
        pkt
    }

    #[test]
    fn parses_discover() {
        let data = make_discover(1, 0xDEADBEEF);
        let pkt = DhcpPacket::parse(&data).unwrap();
        assert_eq!(pkt.xid, 0xDEADBEEF);
        assert_eq!(pkt.mac_str(), "00:11:22:33:44:55");
        assert_eq!(pkt.request_type(), Some(1));
    }

    #[test]
    fn offer_matches_expected_wire_values() {
        let data = make_discover(1, 0xDEADBEEF);
        let request = DhcpPacket::parse(&data).unwrap();
        let server_ip = Ipv4Addr::new(10, 11, 12, 254);
        let reply = request.offer(
            Ipv4Addr::new(10, 11, 12, 1),
            server_ip,
            server_ip,
            Ipv4Addr::new(255, 255, 255, 0),
            3600,
            &[Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
        );

        assert_eq!(reply.yiaddr, Ipv4Addr::new(10, 11, 12, 1));
        assert_eq!(reply.get_option_value(53).unwrap().as_u8(), Some(2));
        assert_eq!(
            reply.get_option_value(1).unwrap().as_ipv4(),
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(reply.get_option_value(3).unwrap().as_ipv4(), Some(server_ip));
        assert_eq!(reply.get_option_value(51).unwrap().data, vec![0x00, 0x00, 0x0E, 0x10]);
        assert_eq!(reply.get_option_value(58).unwrap().data, vec![0x00, 0x00, 0x07, 0x08]);
        assert_eq!(reply.get_option_value(59).unwrap().data, vec![0x00, 0x00, 0x0C, 0x4E]);
        assert_eq!(reply.get_option_value(54).unwrap().as_ipv4(), Some(server_ip));
        assert_eq!(
            reply.get_option_value(6).unwrap().data,
            vec![1, 1, 1, 1, 8, 8, 8, 8]
        );
    }

    #[test]
    fn roundtrips_through_wire_bytes() {
        let data = make_discover(1, 0xAABBCCDD);
        let pkt = DhcpPacket::parse(&data).unwrap();
        let bytes = pkt.to_bytes();
        let pkt2 = DhcpPacket::parse(&bytes).unwrap();
        assert_eq!(pkt2.xid, pkt.xid);
        assert_eq!(pkt2.mac_str(), pkt.mac_str());
    }

    #[test]
    fn offer_derives_broadcast_address_and_echoes_hostname() {
        let hostname = b"workstation";
        let mut data = vec![0u8; 240];
        data[0] = 1;
        data[1] = 1;
        data[2] = 6;
        data[4..8].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        data[28..34].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        data[236..240].copy_from_slice(&MAGIC_COOKIE);
        data.extend_from_slice(&[53, 1, 1]);
        data.extend_from_slice(&[12, hostname.len() as u8]);
        data.extend_from_slice(hostname);
        data.push(255);

        let request = DhcpPacket::parse(&data).unwrap();
        let server_ip = Ipv4Addr::new(10, 11, 12, 254);
        let reply = request.offer(
            Ipv4Addr::new(10, 11, 12, 1),
            server_ip,
            server_ip,
            Ipv4Addr::new(255, 255, 255, 0),
            3600,
            &[],
        );

        assert_eq!(
            reply.get_option_value(28).unwrap().as_ipv4(),
            Some(Ipv4Addr::new(10, 11, 12, 255))
        );
        assert_eq!(reply.get_option_value(12).unwrap().data, hostname);
    }

    #[test]
    fn nak_carries_only_message_type() {
        let data = make_discover(3, 1);
        let request = DhcpPacket::parse(&data).unwrap();
        let reply = request.nak();
        assert_eq!(reply.options.len(), 1);
        assert_eq!(reply.get_option_value(53).unwrap().as_u8(), Some(6));
    }
}
