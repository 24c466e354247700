//! The tap device adapter: owns the kernel tap file descriptor, exposes a
//! non-blocking frame read, a best-effort write, and idempotent up/down.
//!
//! Interface configuration (address, netmask, mtu, link-up) is done by
//! shelling out to `ip`, since the underlying tap crate exposes only
//! open/read/write/fd, not interface configuration.

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, RawFd};
use std::process::Command;

use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tracing::warn;
use tun_tap::{Iface, Mode};

/// Matches the bridge's `read(1024 * 4)` — one Ethernet frame, well above MTU.
pub const READ_BUF_SIZE: usize = 1024 * 4;

#[derive(Debug, Error)]
pub enum TapError {
    #[error(
        "need root or CAP_NET_ADMIN to open the tap interface (if running in docker, add --privileged)"
    )]
    Privilege,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to configure interface: {0}")]
    Configure(String),
}

fn is_privilege_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound)
        || matches!(e.raw_os_error(), Some(1) | Some(2) | Some(13))
}

/// Number of leading one-bits in a netmask, e.g. 255.255.255.0 -> 24.
fn netmask_to_prefix(netmask: Ipv4Addr) -> u32 {
    u32::from(netmask).leading_ones()
}

fn run_ip(args: &[&str]) -> Result<(), TapError> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| TapError::Configure(format!("failed to spawn ip {args:?}: {e}")))?;
    if !output.status.success() {
        return Err(TapError::Configure(format!(
            "ip {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub struct TapDevice {
    iface: AsyncFd<Iface>,
    name: String,
    is_up: std::sync::atomic::AtomicBool,
}

impl TapDevice {
    /// Opens `ifname` in TAP + non-PI mode, assigns `addr`/`netmask`, sets
    /// `mtu`, and leaves the link down — call [`start`](Self::start) to
    /// bring it up.
    pub fn open(ifname: &str, addr: Ipv4Addr, netmask: Ipv4Addr, mtu: u16) -> Result<Self, TapError> {
        let iface = Iface::without_packet_info(ifname, Mode::Tap).map_err(|e| {
            if is_privilege_error(&e) {
                TapError::Privilege
            } else {
                TapError::Io(e)
            }
        })?;

        iface.set_non_blocking()?;

        let name = iface.name().to_string();
        let prefix = netmask_to_prefix(netmask);
        run_ip(&["addr", "add", &format!("{addr}/{prefix}"), "dev", &name])?;
        run_ip(&["link", "set", "dev", &name, "mtu", &mtu.to_string()])?;

        Ok(Self {
            iface: AsyncFd::new(iface)?,
            name,
            is_up: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fileno(&self) -> RawFd {
        self.iface.get_ref().as_raw_fd()
    }

    /// Brings the link up. Idempotent.
    pub fn start(&self) -> Result<(), TapError> {
        if self.is_up.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        run_ip(&["link", "set", "dev", &self.name, "up"])?;
        self.is_up.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Marks the device down. Idempotent; the fd itself closes on drop.
    pub fn stop(&self) {
        self.is_up.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// Reads one Ethernet frame, waiting for the fd to become readable.
    pub async fn read(&self) -> io::Result<Vec<u8>> {
        loop {
            let mut guard = self.iface.readable().await?;
            let mut buf = vec![0u8; READ_BUF_SIZE];
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf)) {
                Ok(Ok(n)) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Best-effort injection; failures are logged and dropped, not fatal.
    pub fn write(&self, frame: &[u8]) {
        if let Err(e) = self.iface.get_ref().send(frame) {
            warn!("tap write failed: {e}");
        }
    }
}
