//! TLS termination for `wss://` clients.
//!
//! The certificate has to be valid for the hostname the readaloud client
//! dials (`speech.platform.bing.com`), so in practice it is issued by a
//! locally trusted CA.

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

/// Build the rustls server configuration from PEM files.
pub fn load_server_config(cert_path: &str, key_path: &str) -> Result<ServerConfig> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| format!("Certificate {} does not match key {}", cert_path, key_path))?;

    Ok(config)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("Failed to open certificate file {}", path))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read certificates from {}", path))?;

    if certs.is_empty() {
        return Err(anyhow!("No certificates found in {}", path));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("Failed to open private key file {}", path))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read private key from {}", path))?
        .ok_or_else(|| anyhow!("No private key found in {}", path))
}
