//! DHCP-specific server configuration, grounded on `hr-dhcp/src/config.rs`
//! and the original `dhcp/config.py::DHCPConfig`.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

#[derive(Debug, Clone)]
pub struct DhcpConfig {
    pub server_ip: Ipv4Addr,
    pub server_network: Ipv4Net,
    pub router_ip: Ipv4Addr,
    pub bind_interface: String,
    pub lease_time: i32,
    pub dns_ips: Vec<Ipv4Addr>,
}

impl DhcpConfig {
    pub fn netmask(&self) -> Ipv4Addr {
        self.server_network.netmask()
    }

    /// Addresses that must never be handed out.
    pub fn reserved(&self) -> Vec<Ipv4Addr> {
        let mut reserved = vec![
            self.server_ip,
            self.router_ip,
            self.server_network.network(),
            self.server_network.broadcast(),
        ];
        reserved.extend(self.dns_ips.iter().copied());
        reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_set_covers_network_and_broadcast() {
        let config = DhcpConfig {
            server_ip: Ipv4Addr::new(10, 11, 12, 254),
            server_network: "10.11.12.0/24".parse().unwrap(),
            router_ip: Ipv4Addr::new(10, 11, 12, 254),
            bind_interface: "tapx".into(),
            lease_time: 3600,
            dns_ips: vec![Ipv4Addr::new(1, 1, 1, 1)],
        };

        let reserved = config.reserved();
        assert!(reserved.contains(&Ipv4Addr::new(10, 11, 12, 0)));
        assert!(reserved.contains(&Ipv4Addr::new(10, 11, 12, 255)));
        assert!(reserved.contains(&Ipv4Addr::new(1, 1, 1, 1)));
    }
}
