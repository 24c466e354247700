//! Environment-driven server configuration, grounded on the original
//! `ServerConfig.From_env` constructor.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnet::Ipv4Net;

use crate::error::AppError;

/// Fixed private interface name; never configurable.
pub const PRIVATE_INTERFACE: &str = "tapx";
/// Fixed tap MTU.
pub const TAP_MTU: u16 = 1500;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub private_interface: String,
    pub public_interface: Option<String>,
    pub intra_ip: Ipv4Addr,
    pub intra_network: Ipv4Net,
    pub router_ip: Ipv4Addr,
    pub dns_ips: Vec<Ipv4Addr>,
    pub enable_dhcp: bool,
    pub dhcp_lease_time: i32,
    pub tls: Option<TlsConfig>,
    pub log_level: String,
}

impl ServerConfig {
    /// Load from the process environment, applying the same defaults and
    /// validation as the bridge this replaces.
    pub fn from_env() -> Result<Self, AppError> {
        let host: Ipv4Addr = env_or("HOST", "0.0.0.0")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST: {e}")))?;

        let port: u16 = env_or("PORT", "8080")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid PORT: {e}")))?;

        let public_interface = std::env::var("PUBLIC_INTERFACE").ok();

        let intra_ip: Ipv4Addr = env_or("INTERFACE_IP", "10.11.12.254")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid INTERFACE_IP: {e}")))?;

        let interface_subnet: u8 = env_or("INTERFACE_SUBNET", "24")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid INTERFACE_SUBNET: {e}")))?;

        if interface_subnet > 31 {
            return Err(AppError::Config(
                "INTERFACE_SUBNET must be between 0 and 31, defaults set to 24".to_string(),
            ));
        }

        let intra_network = Ipv4Net::new(intra_ip, interface_subnet)
            .map_err(|e| AppError::Config(format!("invalid network: {e}")))?
            .trunc();

        let enable_dhcp = env_bool("WITH_DHCP", true);

        let dhcp_lease_time: i32 = env_or("DHCP_LEASE_TIME", "3600")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid DHCP_LEASE_TIME: {e}")))?;

        if dhcp_lease_time < -1 {
            return Err(AppError::Config(
                "DHCP_LEASE_TIME must be -1 or greater".to_string(),
            ));
        }

        let tls = if env_bool("WITH_SSL", false) {
            let cert_path = PathBuf::from(env_or("SSL_CERT_PATH", "/app/certs/fullchain.pem"));
            let key_path = PathBuf::from(env_or("SSL_KEY_PATH", "/app/certs/privkey.pem"));
            let passphrase = std::env::var("SSL_PASSPHRASE").ok();

            if !cert_path.is_file() || !key_path.is_file() {
                return Err(AppError::Config(
                    "SSL_CERT_PATH and SSL_KEY_PATH must be set to valid paths if WITH_SSL is set to True"
                        .to_string(),
                ));
            }

            Some(TlsConfig {
                cert_path,
                key_path,
                passphrase,
            })
        } else {
            None
        };

        let log_level = env_or("LOG_LEVEL", "ERROR");

        Ok(Self {
            host,
            port,
            private_interface: PRIVATE_INTERFACE.to_string(),
            public_interface,
            intra_ip,
            intra_network,
            router_ip: intra_ip,
            dns_ips: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
            enable_dhcp,
            dhcp_lease_time,
            tls,
            log_level,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}
