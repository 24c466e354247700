//! In-memory lease database. Enforces one lease per MAC and distinct IPs
//! across all leases.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease time must be positive to renew")]
    InvalidRenewal,
    #[error("mac address must not be all-zero")]
    InvalidMac,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lease {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    leased_at: u64,
    pub lease_time: i32,
}

/// Seconds since the Unix epoch. Wall-clock, matching the original
/// `Lease.leased_at` timestamp semantics.
fn wall_clock_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

impl Lease {
    pub fn new(mac: [u8; 6], ip: Ipv4Addr, lease_time: i32) -> Result<Self, LeaseError> {
        if mac == [0u8; 6] {
            return Err(LeaseError::InvalidMac);
        }
        Ok(Self {
            mac,
            ip,
            leased_at: wall_clock_now(),
            lease_time,
        })
    }

    pub fn expired(&self) -> bool {
        self.lease_time >= 0 && self.leased_at + (self.lease_time as u64) < wall_clock_now()
    }

    pub fn renew(&mut self, lease_time: i32) -> Result<(), LeaseError> {
        if lease_time <= 0 && lease_time != -1 {
            return Err(LeaseError::InvalidRenewal);
        }
        self.leased_at = wall_clock_now();
        self.lease_time = lease_time;
        Ok(())
    }
}

#[derive(Default)]
pub struct LeaseDatabase {
    leases: Vec<Lease>,
}

impl LeaseDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mac: &[u8; 6]) -> Option<&Lease> {
        self.leases.iter().find(|l| &l.mac == mac)
    }

    fn get_mut(&mut self, mac: &[u8; 6]) -> Option<&mut Lease> {
        self.leases.iter_mut().find(|l| &l.mac == mac)
    }

    /// Enforces one lease per MAC and distinct ips across leases at insertion.
    pub fn add(&mut self, lease: Lease) {
        self.leases.retain(|l| l.mac != lease.mac && l.ip != lease.ip);
        self.leases.push(lease);
    }

    pub fn remove(&mut self, mac: &[u8; 6]) {
        let before = self.leases.len();
        self.leases.retain(|l| &l.mac != mac);
        if self.leases.len() == before {
            warn!("lease for {mac:?} not found in database");
        }
    }

    pub fn renew(&mut self, mac: &[u8; 6], lease_time: i32) {
        match self.get_mut(mac) {
            Some(lease) => {
                if let Err(e) = lease.renew(lease_time) {
                    warn!("failed to renew lease for {mac:?}: {e}");
                }
            }
            None => warn!("lease for {mac:?} not found in database"),
        }
    }

    pub fn is_ip_available(&self, ip: Ipv4Addr) -> bool {
        !self.leases.iter().any(|l| l.ip == ip)
    }

    /// Snapshot of leases currently expired; tolerant of later removal.
    pub fn expired_leases(&self) -> Vec<Lease> {
        self.leases.iter().filter(|l| l.expired()).cloned().collect()
    }

    pub fn reap_expired(&mut self) {
        self.leases.retain(|l| !l.expired());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
