//! TLS context loading, grounded on the PEM-loading helpers used for the
//! QUIC relay and agent proxy's HTTPS listeners in this codebase.

use std::io::BufReader;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tb_common::config::TlsConfig;

pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    let cert_pem = std::fs::read(&tls.cert_path)
        .with_context(|| format!("reading {}", tls.cert_path.display()))?;
    let key_pem = std::fs::read(&tls.key_path)
        .with_context(|| format!("reading {}", tls.key_path.display()))?;

    if tls.passphrase.is_some() {
        bail!("encrypted private keys (SSL_PASSPHRASE) are not supported; provide a decrypted key");
    }

    let certs = load_certs(&cert_pem)?;
    let key = load_private_key(&key_pem)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS server config")?;

    Ok(Arc::new(config))
}

fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse PEM certificates")?;
    ensure!(!certs.is_empty(), "no certificates found in PEM");
    Ok(certs)
}

fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse PKCS#8 private keys")?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let mut reader = BufReader::new(pem);
    let keys: Vec<_> = rustls_pemfile::ec_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse EC private keys")?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKeyDer::Sec1(key));
    }

    bail!("no private key found in PEM")
}
