//! Loading the TLS acceptor from a certificate store.
//!
//! The store is a PKCS#12 file holding one private key and its
//! certificate chain, unlocked with a passphrase. Failing to load it is a
//! startup error; nothing here is retried.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, error};
use p12_keystore::KeyStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Why a certificate store could not be turned into a TLS acceptor.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Certificate store not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read certificate store {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Certificate store {} could not be opened, the passphrase may be wrong: {reason}",
        path.display()
    )]
    Keystore {
        path: PathBuf,
        reason: String,
    },

    #[error("Certificate store {} contains no private key", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("Certificate store {} contains no certificate chain", .0.display())]
    NoCertificate(PathBuf),

    #[error("Failed to create TLS server config: {0}")]
    Tls(#[from] rustls::Error),
}

/// Creates the TLS acceptor for the certificate store at `path`.
pub fn load(path: &Path, passphrase: &str) -> Result<TlsAcceptor, CertificateError> {
    create_server_config(path, passphrase).map(TlsAcceptor::from)
}

/// Creates the rustls server config for the certificate store at `path`.
///
/// Errors are logged before being returned so the diagnostic names the
/// file even if the caller only reports the error kind.
pub fn create_server_config(
    path: &Path, passphrase: &str
) -> Result<Arc<ServerConfig>, CertificateError> {
    let res = build(path, passphrase);
    if let Err(ref err) = res {
        error!("{err}");
    }
    res
}

fn build(
    path: &Path, passphrase: &str
) -> Result<Arc<ServerConfig>, CertificateError> {
    if !path.exists() {
        return Err(CertificateError::Missing(path.to_path_buf()))
    }

    let data = std::fs::read(path).map_err(|source| {
        CertificateError::Read { path: path.to_path_buf(), source }
    })?;

    let keystore = KeyStore::from_pkcs12(&data, passphrase).map_err(|err| {
        CertificateError::Keystore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    })?;

    let (alias, chain) = keystore.private_key_chain().ok_or_else(|| {
        CertificateError::NoPrivateKey(path.to_path_buf())
    })?;

    let certs: Vec<CertificateDer<'static>> = chain.chain().iter().map(|cert| {
        CertificateDer::from(cert.as_der().to_vec())
    }).collect();
    if certs.is_empty() {
        return Err(CertificateError::NoCertificate(path.to_path_buf()))
    }
    debug!(
        "Using key '{}' from {} with {} certificate(s)",
        alias, path.display(), certs.len()
    );

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}
