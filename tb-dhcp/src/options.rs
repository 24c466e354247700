//! BOOTP/DHCP option TLVs (RFC 2132).

use std::net::Ipv4Addr;

pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_BROADCAST_ADDR: u8 = 28;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_END: u8 = 255;
pub const OPT_PAD: u8 = 0;

pub const DHCPDISCOVER: u8 = 1;
pub const DHCPOFFER: u8 = 2;
pub const DHCPREQUEST: u8 = 3;
pub const DHCPDECLINE: u8 = 4;
pub const DHCPACK: u8 = 5;
pub const DHCPNAK: u8 = 6;
pub const DHCPRELEASE: u8 = 7;
pub const DHCPINFORM: u8 = 8;

#[derive(Debug, Clone)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

/// 4-byte big-endian signed encoding; `-1` means infinite.
pub fn encode_i32_be(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_i32_be(data: &[u8]) -> Option<i32> {
    if data.len() == 4 {
        Some(i32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    } else {
        None
    }
}

/// `renew = lease_time * 0.5`, `rebind = lease_time * 0.875`; `-1` stays `-1`.
pub fn derived_times(lease_time: i32) -> (i32, i32) {
    if lease_time == -1 {
        (-1, -1)
    } else {
        (
            (lease_time as f64 * 0.5) as i32,
            (lease_time as f64 * 0.875) as i32,
        )
    }
}

impl DhcpOption {
    pub fn new(code: u8, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn msg_type(t: u8) -> Self {
        Self::new(OPT_MSG_TYPE, vec![t])
    }

    pub fn server_id(ip: Ipv4Addr) -> Self {
        Self::new(OPT_SERVER_ID, ip.octets().to_vec())
    }

    pub fn lease_time(secs: i32) -> Self {
        Self::new(OPT_LEASE_TIME, encode_i32_be(secs).to_vec())
    }

    pub fn renewal_time(secs: i32) -> Self {
        Self::new(OPT_RENEWAL_TIME, encode_i32_be(secs).to_vec())
    }

    pub fn rebinding_time(secs: i32) -> Self {
        Self::new(OPT_REBINDING_TIME, encode_i32_be(secs).to_vec())
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OPT_SUBNET_MASK, mask.octets().to_vec())
    }

    pub fn router(ip: Ipv4Addr) -> Self {
        Self::new(OPT_ROUTER, ip.octets().to_vec())
    }

    pub fn dns_servers(ips: &[Ipv4Addr]) -> Self {
        let mut data = Vec::with_capacity(ips.len() * 4);
        for ip in ips {
            data.extend_from_slice(&ip.octets());
        }
        Self::new(OPT_DNS_SERVER, data)
    }

    pub fn broadcast_address(ip: Ipv4Addr) -> Self {
        Self::new(OPT_BROADCAST_ADDR, ip.octets().to_vec())
    }

    pub fn hostname(name: &[u8]) -> Self {
        Self::new(OPT_HOSTNAME, name.to_vec())
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.data.len() == 4 {
            Some(Ipv4Addr::new(self.data[0], self.data[1], self.data[2], self.data[3]))
        } else {
            None
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// Parse options from bytes following the magic cookie.
pub fn parse_options(data: &[u8]) -> Vec<DhcpOption> {
    let mut options = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            i += 1;
            continue;
        }

        i += 1;
        if i >= data.len() {
            break;
        }

        let len = data[i] as usize;
        i += 1;

        if i + len > data.len() {
            break;
        }

        options.push(DhcpOption::new(code, data[i..i + len].to_vec()));
        i += len;
    }

    options
}

pub fn encode_options(options: &[DhcpOption]) -> Vec<u8> {
    let mut buf = Vec::new();
    for opt in options {
        buf.push(opt.code);
        buf.push(opt.data.len() as u8);
        buf.extend_from_slice(&opt.data);
    }
    buf.push(OPT_END);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_option_encoding() {
        assert_eq!(encode_i32_be(-1), [0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(encode_i32_be(3600), [0x00, 0x00, 0x0E, 0x10]);
    }

    #[test]
    fn derives_renewal_and_rebinding_times() {
        assert_eq!(derived_times(3600), (1800, 3150));
        assert_eq!(derived_times(-1), (-1, -1));
    }

    #[test]
    fn option_round_trips() {
        let opts = vec![
            DhcpOption::msg_type(DHCPOFFER),
            DhcpOption::subnet_mask(Ipv4Addr::new(255, 255, 255, 0)),
        ];
        let bytes = encode_options(&opts);
        let parsed = parse_options(&bytes);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].as_u8(), Some(DHCPOFFER));
        assert_eq!(parsed[1].as_ipv4(), Some(Ipv4Addr::new(255, 255, 255, 0)));
    }
}
