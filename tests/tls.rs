//! Serving over TLS with a PKCS#12 certificate store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use update_httpd::server::{tls, CertificateError};
use update_httpd::{AccessLogger, HttpServer, ServedRoot, ServerConfig};

const PASSPHRASE: &str = "changeit";

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    let ca = std::fs::read(fixture("ca.der")).unwrap();
    roots.add(CertificateDer::from(ca)).unwrap();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

#[tokio::test]
async fn serves_over_tls() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("current-version.txt"), "1.0.0").unwrap();

    let config = ServerConfig {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        certificate_file: fixture("server.p12").to_string_lossy().into_owned(),
        certificate_pass: PASSPHRASE.into(),
        ..ServerConfig::default()
    };
    let acceptor = tls::load(&fixture("server.p12"), PASSPHRASE).unwrap();
    let server = Arc::new(
        HttpServer::new(config, ServedRoot::new(root.path()).unwrap())
            .with_tls(acceptor)
            .with_access_logger(AccessLogger::new(std::io::sink())),
    );
    assert!(server.is_secure());

    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    let tcp = TcpStream::connect(addr).await.unwrap();
    let connector = TlsConnector::from(client_config());
    let mut stream = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    stream
        .write_all(b"GET /current-version.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\n1.0.0"));

    // A plain-text client gets no HTTP answer from a TLS port.
    let mut plain = TcpStream::connect(addr).await.unwrap();
    plain
        .write_all(b"GET /current-version.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    let _ = plain.read_to_end(&mut raw).await;
    assert!(!raw.starts_with(b"HTTP/1.1 200"));

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test]
fn wrong_passphrase_is_fatal() {
    let Err(err) = tls::load(&fixture("server.p12"), "wrong") else {
        panic!("store opened with the wrong passphrase");
    };
    assert!(matches!(err, CertificateError::Keystore { .. }));
}

#[test]
fn missing_store_is_fatal() {
    let Err(err) = tls::load(&fixture("nope.p12"), PASSPHRASE) else {
        panic!("missing store was loaded");
    };
    assert!(matches!(err, CertificateError::Missing(_)));
}
