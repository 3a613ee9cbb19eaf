//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use serde::Deserialize;

/// HTTP server configuration.
///
/// Keys are kebab-case in `config.yml`. Everything has a default, so an
/// empty document yields a plain-HTTP server on port 8850.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The port to listen on.
    pub port: u16,
    /// Path of the PKCS#12 certificate store. Empty means no TLS.
    #[serde(alias = "jks-certificate-file")]
    pub certificate_file: String,
    /// Passphrase that unlocks the certificate store.
    #[serde(alias = "jks-certificate-pass", alias = "certificate-passphrase")]
    pub certificate_pass: String,
    /// The address to bind to.
    pub host: IpAddr,
    /// The maximum number of concurrent connections.
    pub max_connections: usize,
    /// Upper bound on the size of a request head.
    pub read_buffer_size: usize,
    /// How long a client may take to send its request head.
    pub read_timeout_secs: u64,
    /// How long writing a single response may take.
    pub write_timeout_secs: u64,
    /// How long in-flight connections may run on after shutdown.
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8850;

    /// The socket address to bind.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// TLS is used only when both certificate settings are non-empty.
    pub fn tls_enabled(&self) -> bool {
        !self.certificate_file.is_empty() && !self.certificate_pass.is_empty()
    }

    /// The certificate store path, if TLS is enabled.
    pub fn certificate_path(&self) -> Option<PathBuf> {
        self.tls_enabled().then(|| PathBuf::from(&self.certificate_file))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            certificate_file: String::new(),
            certificate_pass: String::new(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: 1024,
            read_buffer_size: 8192,
            read_timeout_secs: 5,
            write_timeout_secs: 600,
            shutdown_grace_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_8850() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:8850".parse().unwrap());
        assert!(!config.tls_enabled());
        assert_eq!(config.certificate_path(), None);
    }

    #[test]
    fn tls_needs_both_file_and_pass() {
        let mut config = ServerConfig {
            certificate_file: "server.p12".into(),
            ..ServerConfig::default()
        };
        assert!(!config.tls_enabled());

        config.certificate_pass = "changeit".into();
        assert!(config.tls_enabled());
        assert_eq!(config.certificate_path(), Some(PathBuf::from("server.p12")));

        config.certificate_file.clear();
        assert!(!config.tls_enabled());
    }

    #[test]
    fn reads_yaml_with_legacy_keys() {
        let yaml = "port: 9000\njks-certificate-file: cert.p12\njks-certificate-pass: secret\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.certificate_file, "cert.p12");
        assert_eq!(config.certificate_pass, "secret");
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.write_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: Result<ServerConfig, _> = serde_yaml::from_str("prot: 9000\n");
        assert!(result.is_err());
    }
}
