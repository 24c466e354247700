//! Netfilter bootstrap: installs/removes the three rules that let bridged
//! private-interface clients reach a public interface via source-NAT.
//!
//! Configuration is applied by shelling out to `iptables`, the same
//! ambient-tool-invocation idiom `tb-tap` uses for `ip`.

use std::process::Command;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("failed to run {0:?}: {1}")]
    Spawn(Vec<String>, std::io::Error),
    #[error("{0:?} failed: {1}")]
    Failed(Vec<String>, String),
}

fn run_iptables(args: &[&str], table: Option<&str>) -> Result<(), FirewallError> {
    let mut full_args: Vec<&str> = Vec::new();
    if let Some(table) = table {
        full_args.push("-t");
        full_args.push(table);
    }
    full_args.extend_from_slice(args);

    let output = Command::new("iptables")
        .args(&full_args)
        .output()
        .map_err(|e| FirewallError::Spawn(full_args.iter().map(|s| s.to_string()).collect(), e))?;

    if !output.status.success() {
        return Err(FirewallError::Failed(
            full_args.iter().map(|s| s.to_string()).collect(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

/// Installs the FORWARD accept pair and the POSTROUTING MASQUERADE rule
/// bridging `private_interface` to `public_interface`.
pub struct Netfilter {
    public_interface: String,
    private_interface: String,
}

impl Netfilter {
    pub fn new(public_interface: impl Into<String>, private_interface: impl Into<String>) -> Self {
        Self {
            public_interface: public_interface.into(),
            private_interface: private_interface.into(),
        }
    }

    pub fn up(&self) -> Result<(), FirewallError> {
        info!("bootstrapping netfilter (iptables) rules");

        run_iptables(
            &[
                "-I", "FORWARD",
                "-i", &self.public_interface,
                "-o", &self.private_interface,
                "-m", "state", "--state", "RELATED,ESTABLISHED",
                "-j", "ACCEPT",
            ],
            None,
        )?;

        run_iptables(
            &[
                "-I", "FORWARD",
                "-i", &self.private_interface,
                "-o", &self.public_interface,
                "-j", "ACCEPT",
            ],
            None,
        )?;

        run_iptables(
            &["-I", "POSTROUTING", "-o", &self.public_interface, "-j", "MASQUERADE"],
            Some("nat"),
        )?;

        Ok(())
    }

    pub fn down(&self) -> Result<(), FirewallError> {
        info!("cleaning up netfilter (iptables) rules");
        run_iptables(&["-F", "FORWARD"], None)?;
        run_iptables(&["-F", "POSTROUTING"], Some("nat"))?;
        Ok(())
    }
}
