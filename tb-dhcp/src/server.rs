//! The DHCP server: UDP socket lifecycle, pool allocation, and per-message
//! dispatch.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DhcpConfig;
use crate::lease::{Lease, LeaseDatabase};
use crate::options::{DHCPDECLINE, DHCPDISCOVER, DHCPINFORM, DHCPRELEASE, DHCPREQUEST};
use crate::packet::DhcpPacket;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;

#[derive(Debug, Error)]
pub enum DhcpServerError {
    #[error("address pool exhausted")]
    AddressPoolExhausted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DhcpServer {
    socket: Arc<UdpSocket>,
    config: DhcpConfig,
    db: Arc<Mutex<LeaseDatabase>>,
    recv_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl DhcpServer {
    /// Binds `0.0.0.0:67` with `SO_BROADCAST` and `SO_BINDTODEVICE` set to
    /// `config.bind_interface`.
    pub fn bind(config: DhcpConfig) -> Result<Self, DhcpServerError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind_device(Some(config.bind_interface.as_bytes()))?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SERVER_PORT)).into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        info!("DHCP listening on 0.0.0.0:{SERVER_PORT} via {}", config.bind_interface);

        Ok(Self {
            socket: Arc::new(socket),
            config,
            db: Arc::new(Mutex::new(LeaseDatabase::new())),
            recv_task: None,
            sweep_task: None,
        })
    }

    /// Begins the receive loop and the 60s expiry sweep.
    pub fn start(&mut self) {
        let socket = self.socket.clone();
        let config = self.config.clone();
        let db = self.db.clone();

        self.recv_task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                let n = match socket.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("DHCP socket recv error: {e}");
                        continue;
                    }
                };
                let data = buf[..n].to_vec();
                let socket = socket.clone();
                let config = config.clone();
                let db = db.clone();
                tokio::spawn(async move {
                    dispatch(&socket, &config, &db, &data).await;
                });
            }
        }));

        let db = self.db.clone();
        self.sweep_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let mut db = db.lock().await;
                let before = db.expired_leases().len();
                db.reap_expired();
                if before > 0 {
                    debug!("swept {before} expired lease(s)");
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

/// Ascending host-address scan skipping the reserved set.
fn get_available_ip(config: &DhcpConfig, db: &LeaseDatabase) -> Option<Ipv4Addr> {
    let reserved = config.reserved();
    for ip in config.server_network.hosts() {
        if reserved.contains(&ip) {
            continue;
        }
        if db.is_ip_available(ip) {
            return Some(ip);
        }
    }
    None
}

fn is_ip_available(config: &DhcpConfig, db: &LeaseDatabase, ip: Ipv4Addr, mac: Option<&[u8; 6]>) -> bool {
    if config.reserved().contains(&ip) {
        return false;
    }
    if let Some(mac) = mac
        && db.get(mac).map(|l| l.ip) == Some(ip) {
            return true;
        }
    db.is_ip_available(ip)
}

async fn send_broadcast_reply(socket: &UdpSocket, packet: &DhcpPacket) {
    let dest = SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT);
    if let Err(e) = socket.send_to(&packet.to_bytes(), dest).await {
        warn!("failed to broadcast DHCP reply: {e}");
    }
}

async fn dispatch(socket: &UdpSocket, config: &DhcpConfig, db: &Mutex<LeaseDatabase>, data: &[u8]) {
    let packet = match DhcpPacket::parse(data) {
        Ok(p) => p,
        Err(e) => {
            debug!("dropping malformed DHCP packet: {e}");
            return;
        }
    };

    let Some(msg_type) = packet.request_type() else {
        debug!("dropping non-request packet from {}", packet.mac_str());
        return;
    };

    match msg_type {
        DHCPDISCOVER => handle_discover(socket, config, db, &packet).await,
        DHCPREQUEST => handle_request(socket, config, db, &packet).await,
        DHCPRELEASE => handle_release(db, &packet).await,
        DHCPDECLINE => handle_decline(socket, config, db, &packet).await,
        DHCPINFORM => handle_inform(socket, config, &packet).await,
        other => debug!("dropping unsupported DHCP message type {other}"),
    }
}

fn mac_array(packet: &DhcpPacket) -> Option<[u8; 6]> {
    packet.mac_bytes().try_into().ok()
}

async fn handle_discover(socket: &UdpSocket, config: &DhcpConfig, db: &Mutex<LeaseDatabase>, packet: &DhcpPacket) {
    let ip = {
        let db = db.lock().await;
        get_available_ip(config, &db)
    };
    let Some(ip) = ip else {
        warn!("address pool exhausted for DISCOVER from {}", packet.mac_str());
        return;
    };

    let reply = packet.offer(ip, config.server_ip, config.router_ip, config.netmask(), config.lease_time, &config.dns_ips);
    send_broadcast_reply(socket, &reply).await;
}

async fn handle_request(socket: &UdpSocket, config: &DhcpConfig, db: &Mutex<LeaseDatabase>, packet: &DhcpPacket) {
    if let Some(server_id) = packet.server_id()
        && server_id != config.server_ip {
            debug!("ignoring REQUEST addressed to another server-id {server_id}");
            return;
        }

    let Some(mac) = mac_array(packet) else {
        debug!("dropping REQUEST with malformed chaddr");
        return;
    };

    // INIT-REBOOT (RFC 2131 §4.3.2): no server-id, a requested-ip, ciaddr
    // unset. If we have no record of this MAC, stay silent rather than NAK —
    // the client may be renewing a lease held by a server that rebooted
    // without persisting it elsewhere, not one we should actively reject.
    if packet.server_id().is_none()
        && packet.requested_ip().is_some()
        && packet.ciaddr == Ipv4Addr::UNSPECIFIED
        && db.lock().await.get(&mac).is_none()
    {
        debug!("silently ignoring INIT-REBOOT REQUEST from unknown {}", packet.mac_str());
        return;
    }

    let claimed = packet.requested_ip().or(Some(packet.ciaddr));
    let Some(claimed) = claimed else {
        send_broadcast_reply(socket, &packet.nak()).await;
        return;
    };

    let mut db_guard = db.lock().await;
    let has_existing = db_guard.get(&mac).is_some();

    if has_existing {
        db_guard.renew(&mac, config.lease_time);
    } else {
        if !is_ip_available(config, &db_guard, claimed, Some(&mac)) {
            warn!("requested ip {claimed} unavailable for {}; sending NAK", packet.mac_str());
            drop(db_guard);
            send_broadcast_reply(socket, &packet.nak()).await;
            return;
        }
        match Lease::new(mac, claimed, config.lease_time) {
            Ok(lease) => db_guard.add(lease),
            Err(e) => {
                warn!("refusing to create lease for {}: {e}", packet.mac_str());
                drop(db_guard);
                send_broadcast_reply(socket, &packet.nak()).await;
                return;
            }
        }
    }
    drop(db_guard);

    let reply = packet.ack(claimed, config.server_ip, config.router_ip, config.netmask(), config.lease_time, &config.dns_ips);
    send_broadcast_reply(socket, &reply).await;
}

async fn handle_release(db: &Mutex<LeaseDatabase>, packet: &DhcpPacket) {
    let Some(mac) = mac_array(packet) else { return };
    db.lock().await.remove(&mac);
}

async fn handle_decline(socket: &UdpSocket, config: &DhcpConfig, db: &Mutex<LeaseDatabase>, packet: &DhcpPacket) {
    if let Some(server_id) = packet.server_id()
        && server_id != config.server_ip {
            return;
        }
    let Some(mac) = mac_array(packet) else { return };

    {
        let mut db_guard = db.lock().await;
        if db_guard.get(&mac).map(|l| l.ip) == Some(packet.ciaddr) {
            db_guard.remove(&mac);
        }
    }

    handle_request(socket, config, db, packet).await;
}

/// Answers a host's configuration query without allocating or touching the
/// lease database.
async fn handle_inform(socket: &UdpSocket, config: &DhcpConfig, packet: &DhcpPacket) {
    let reply = packet.ack(
        packet.ciaddr,
        config.server_ip,
        config.router_ip,
        config.netmask(),
        config.lease_time,
        &config.dns_ips,
    );
    send_broadcast_reply(socket, &reply).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DhcpConfig {
        DhcpConfig {
            server_ip: Ipv4Addr::new(10, 11, 12, 254),
            server_network: "10.11.12.0/24".parse().unwrap(),
            router_ip: Ipv4Addr::new(10, 11, 12, 254),
            bind_interface: "tapx".into(),
            lease_time: 3600,
            dns_ips: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
        }
    }

    #[test]
    fn allocation_is_ascending_and_skips_reserved() {
        let config = config();
        let db = LeaseDatabase::new();
        let ip = get_available_ip(&config, &db).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 11, 12, 1));
    }

    #[test]
    fn allocation_skips_already_leased() {
        let config = config();
        let mut db = LeaseDatabase::new();
        db.add(Lease::new([1, 2, 3, 4, 5, 6], Ipv4Addr::new(10, 11, 12, 1), 3600).unwrap());
        let ip = get_available_ip(&config, &db).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 11, 12, 2));
    }

    #[test]
    fn reserved_address_never_available() {
        let config = config();
        let db = LeaseDatabase::new();
        assert!(!is_ip_available(&config, &db, config.server_ip, None));
    }

    #[test]
    fn owning_mac_can_reclaim_its_own_ip() {
        let config = config();
        let mut db = LeaseDatabase::new();
        let mac = [1, 2, 3, 4, 5, 6];
        let ip = Ipv4Addr::new(10, 11, 12, 5);
        db.add(Lease::new(mac, ip, 3600).unwrap());
        assert!(is_ip_available(&config, &db, ip, Some(&mac)));
        assert!(!is_ip_available(&config, &db, ip, Some(&[9, 9, 9, 9, 9, 9])));
    }

    fn init_reboot_request(mac: [u8; 6], requested_ip: Ipv4Addr) -> DhcpPacket {
        let mut data = vec![0u8; 240];
        data[0] = 1;
        data[1] = 1;
        data[2] = 6;
        data[28..34].copy_from_slice(&mac);
        data[236..240].copy_from_slice(&crate::packet::MAGIC_COOKIE);
        data.extend_from_slice(&[53, 1, DHCPREQUEST]);
        data.extend_from_slice(&[50, 4]);
        data.extend_from_slice(&requested_ip.octets());
        data.push(255);
        DhcpPacket::parse(&data).unwrap()
    }

    // INIT-REBOOT silence: unknown MAC, no server-id, a requested-ip,
    // ciaddr unset -> no reply or lease side effect at all. (The requested
    // ip is otherwise available, so if the early return didn't fire this
    // would create a lease via the normal REQUEST path.)
    #[tokio::test]
    async fn init_reboot_from_unknown_mac_gets_no_reply() {
        let config = config();
        let db = Mutex::new(LeaseDatabase::new());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mac = [9, 9, 9, 9, 9, 9];
        let packet = init_reboot_request(mac, Ipv4Addr::new(10, 11, 12, 7));
        handle_request(&socket, &config, &db, &packet).await;

        assert!(db.lock().await.get(&mac).is_none());
    }
}
