//! Composes the tap adapter, the WebSocket hub, and the auxiliary DHCP/
//! netfilter services into a single scoped lifetime.
//!
//! This is a deterministic, non-restarting lifecycle rather than a
//! supervised retry/backoff loop: this system has no redundant replicas to
//! fail over to, so an auto-restarting tap reader or hub accept loop would
//! just spin against the same missing capability or bind conflict.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tb_common::ServerConfig;
use tb_dhcp::{DhcpConfig, DhcpServer};
use tb_firewall::Netfilter;
use tb_tap::TapDevice;
use tb_ws::Hub;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Supervisor {
    tap: Arc<TapDevice>,
    hub: Arc<Hub>,
    dhcp: Option<DhcpServer>,
    netfilter: Option<Netfilter>,
    reader_task: Option<JoinHandle<()>>,
    host: Ipv4Addr,
    port: u16,
    tls: Option<Arc<rustls::ServerConfig>>,
    stopped: AtomicBool,
}

impl Supervisor {
    /// Builds the tap adapter (may fail, propagates) then the hub wired to
    /// `tap.write`.
    pub fn build(config: &ServerConfig, tls: Option<Arc<rustls::ServerConfig>>) -> Result<Self> {
        let tap = Arc::new(
            TapDevice::open(
                &config.private_interface,
                config.intra_ip,
                config.intra_network.netmask(),
                tb_common::config::TAP_MTU,
            )
            .context("opening tap device")?,
        );

        let tap_for_hub = tap.clone();
        let hub = Arc::new(Hub::new(move |frame| tap_for_hub.write(&frame)));

        let dhcp = if config.enable_dhcp {
            let dhcp_config = DhcpConfig {
                server_ip: config.intra_ip,
                server_network: config.intra_network,
                router_ip: config.router_ip,
                bind_interface: config.private_interface.clone(),
                lease_time: config.dhcp_lease_time,
                dns_ips: config.dns_ips.clone(),
            };
            Some(DhcpServer::bind(dhcp_config).context("binding DHCP socket")?)
        } else {
            None
        };

        let netfilter = config
            .public_interface
            .as_ref()
            .map(|public| Netfilter::new(public.clone(), config.private_interface.clone()));

        Ok(Self {
            tap,
            hub,
            dhcp,
            netfilter,
            reader_task: None,
            host: config.host,
            port: config.port,
            tls,
            stopped: AtomicBool::new(false),
        })
    }

    /// Registers the tap reader, then starts tap, hub, and every configured
    /// auxiliary service in order.
    pub async fn start(&mut self) -> Result<()> {
        let tap = self.tap.clone();
        let hub = self.hub.clone();
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                match tap.read().await {
                    Ok(frame) => hub.broadcast(&frame).await,
                    Err(e) => {
                        tracing::error!("tap read failed: {e}");
                        break;
                    }
                }
            }
        }));

        self.tap.start().context("bringing tap device up")?;

        self.hub
            .start(self.host, self.port, self.tls.clone())
            .await
            .context("starting websocket hub")?;

        if let Some(dhcp) = self.dhcp.as_mut() {
            dhcp.start();
            info!("DHCP server started");
        }

        if let Some(netfilter) = &self.netfilter {
            netfilter.up().context("bootstrapping netfilter rules")?;
            info!("netfilter rules installed");
        }

        Ok(())
    }

    /// Reverses `start()` exactly: fd reader, then services in reverse
    /// order, then the hub, then the tap. Idempotent under double-stop.
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(netfilter) = &self.netfilter
            && let Err(e) = netfilter.down() {
                tracing::warn!("failed to tear down netfilter rules: {e}");
            }

        if let Some(dhcp) = self.dhcp.as_mut() {
            dhcp.stop();
        }

        self.hub.stop().await;
        self.tap.stop();

        info!("supervisor stopped");
    }
}
