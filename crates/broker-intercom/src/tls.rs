//! Mutual-TLS material for Intercom2 connections.
//!
//! Both peers present certificates signed by a shared CA and verify the
//! other side against it. Certificate files live under the configured
//! directory:
//!
//! ```text
//! <config>/cert/CA.pem
//! <config>/cert/<sitename>/server.key
//! <config>/cert/<sitename>/server.pem
//! <config>/cert/<sitename>/client.key
//! <config>/cert/<sitename>/client.pem
//! ```
//!
//! Private keys may be passphrase-protected (encrypted PKCS#8).

use crate::{IntercomError, Result};
use pkcs8::{der::pem::PemLabel, EncryptedPrivateKeyInfo, SecretDocument};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

/// Loaded TLS material plus the derived rustls configs.
#[derive(Debug)]
pub struct TlsContext {
    client_config: Arc<ClientConfig>,
    server_config: Arc<ServerConfig>,
}

impl TlsContext {
    /// Load certificates and keys from the standard layout.
    ///
    /// `config_dir` is the directory containing `cert/`; `sitename` selects
    /// the per-site subdirectory. Failure here is fatal to startup.
    pub fn load(config_dir: &Path, sitename: &str, passphrase: Option<&str>) -> Result<Self> {
        // rustls needs a process-wide crypto provider before any config is built.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let cert_dir = config_dir.join("cert");
        let site_dir = cert_dir.join(sitename);

        let ca = load_certs(&cert_dir.join("CA.pem"))?;
        let mut roots = RootCertStore::empty();
        for cert in ca {
            roots
                .add(cert)
                .map_err(|e| IntercomError::Tls(format!("bad CA certificate: {e}")))?;
        }
        let roots = Arc::new(roots);

        let server_chain = load_certs(&site_dir.join("server.pem"))?;
        let server_key = load_private_key(&site_dir.join("server.key"), passphrase)?;
        let client_chain = load_certs(&site_dir.join("client.pem"))?;
        let client_key = load_private_key(&site_dir.join("client.key"), passphrase)?;

        let verifier = WebPkiClientVerifier::builder(roots.clone())
            .build()
            .map_err(|e| IntercomError::Tls(format!("client verifier: {e}")))?;

        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(server_chain, server_key)
            .map_err(|e| IntercomError::Tls(format!("server config: {e}")))?;

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots.as_ref().clone())
            .with_client_auth_cert(client_chain, client_key)
            .map_err(|e| IntercomError::Tls(format!("client config: {e}")))?;

        debug!(dir = %site_dir.display(), "loaded TLS material");

        Ok(Self {
            client_config: Arc::new(client_config),
            server_config: Arc::new(server_config),
        })
    }

    /// Connector for outbound connections.
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config.clone())
    }

    /// Acceptor for the local listener.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }

    /// SNI name for a remote host.
    pub fn server_name(host: &str) -> Result<ServerName<'static>> {
        ServerName::try_from(host.to_string())
            .map_err(|e| IntercomError::Tls(format!("invalid server name {host:?}: {e}")))
    }
}

/// Path of the certificate directory for a config root.
pub fn cert_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("cert")
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| IntercomError::Tls(format!("open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs.map_err(|e| IntercomError::Tls(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(IntercomError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load a PEM private key, decrypting passphrase-protected PKCS#8 if needed.
fn load_private_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| IntercomError::Tls(format!("open {}: {e}", path.display())))?;

    if pem.contains(EncryptedPrivateKeyInfo::PEM_LABEL) {
        let passphrase = passphrase.ok_or_else(|| {
            IntercomError::Tls(format!("{} is encrypted but no passphrase given", path.display()))
        })?;
        let (label, doc) = SecretDocument::from_pem(&pem)
            .map_err(|e| IntercomError::Tls(format!("parse {}: {e}", path.display())))?;
        if label != EncryptedPrivateKeyInfo::PEM_LABEL {
            return Err(IntercomError::Tls(format!(
                "unexpected PEM label {label:?} in {}",
                path.display()
            )));
        }
        let info = EncryptedPrivateKeyInfo::try_from(doc.as_bytes())
            .map_err(|e| IntercomError::Tls(format!("parse {}: {e}", path.display())))?;
        let plain = info
            .decrypt(passphrase)
            .map_err(|e| IntercomError::Tls(format!("decrypt {}: {e}", path.display())))?;
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            plain.as_bytes().to_vec(),
        )));
    }

    let file = File::open(path)
        .map_err(|e| IntercomError::Tls(format!("open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| IntercomError::Tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| IntercomError::Tls(format!("no private key in {}", path.display())))
}
