//! Getting from a working directory to a ready server.
//!
//! The working directory holds `config.yml` and the `public` directory
//! that is served. `public/current-version.txt` must exist or the server
//! refuses to start. Every failure here is fatal for the process.

use std::io;
use std::path::{Path, PathBuf};
use log::info;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::server::{
    self, tls, CertificateError, HttpServer, ServedRoot, ServerConfig,
    ShutdownHandle,
};

/// Name of the configuration file inside the working directory.
pub const CONFIG_FILE: &str = "config.yml";

/// Name of the served directory inside the working directory.
pub const PUBLIC_DIR: &str = "public";

/// File that must exist in the served root before the server may start.
pub const SENTINEL_FILE: &str = "current-version.txt";

/// Written to the working directory when no configuration exists yet.
pub const DEFAULT_CONFIG: &str = include_str!("config.yml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write default configuration to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration file {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Everything that keeps the process from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Working directory not found: {}", .0.display())]
    MissingWorkdir(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Served directory not found: {}", .0.display())]
    MissingRoot(PathBuf),

    #[error("{} not found, check that this file exists", .0.display())]
    MissingSentinel(PathBuf),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Server(#[from] server::Error),
}

impl StartupError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// A source of server configuration.
pub trait ConfigProvider {
    fn load(&self) -> Result<ServerConfig, ConfigError>;
}

/// Configuration read from a YAML file.
///
/// If the file does not exist, [`DEFAULT_CONFIG`] is written in its place
/// first.
#[derive(Debug, Clone)]
pub struct YamlConfigFile {
    path: PathBuf,
}

impl YamlConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The `config.yml` of a working directory.
    pub fn in_dir(workdir: &Path) -> Self {
        Self::new(workdir.join(CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for YamlConfigFile {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        if !self.path.exists() {
            std::fs::write(&self.path, DEFAULT_CONFIG).map_err(|source| {
                ConfigError::Write { path: self.path.clone(), source }
            })?;
            info!("Created default configuration at {}", self.path.display());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| {
            ConfigError::Read { path: self.path.clone(), source }
        })?;
        parse_config(&text).map_err(|source| {
            ConfigError::Parse { path: self.path.clone(), source }
        })
    }
}

/// Parses YAML configuration text.
///
/// A document without any values yields the defaults.
pub fn parse_config(text: &str) -> Result<ServerConfig, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    if value.is_null() {
        return Ok(ServerConfig::default())
    }
    serde_yaml::from_value(value)
}

/// Checks the working directory and builds the server it describes.
///
/// Loads the configuration, opens `public` as the served root, insists on
/// the sentinel file, and loads the certificate store if TLS is
/// configured.
pub fn prepare_server(
    workdir: &Path, provider: &impl ConfigProvider
) -> Result<HttpServer, StartupError> {
    if !workdir.is_dir() {
        return Err(StartupError::MissingWorkdir(workdir.to_path_buf()))
    }

    let config = provider.load()?;

    let public = workdir.join(PUBLIC_DIR);
    let root = ServedRoot::new(&public).map_err(|_| {
        StartupError::MissingRoot(public.clone())
    })?;
    if !root.has_file(SENTINEL_FILE) {
        return Err(StartupError::MissingSentinel(public.join(SENTINEL_FILE)))
    }

    let tls = match config.certificate_path() {
        Some(path) => {
            let acceptor = tls::load(&workdir.join(path), &config.certificate_pass)?;
            info!("SSL certificate loaded");
            Some(acceptor)
        }
        None => None,
    };

    let server = HttpServer::new(config, root);
    Ok(match tls {
        Some(acceptor) => server.with_tls(acceptor),
        None => server,
    })
}

/// Whether a console line asks the process to stop.
pub fn is_stop_command(line: &str) -> bool {
    matches!(line.trim(), "stop" | "s")
}

/// Reads console lines until a stop command arrives.
///
/// Returns `true` after triggering `shutdown` for a stop command, and
/// `false` if the input ended first. Other lines are ignored.
pub async fn run_command_loop<R>(input: R, shutdown: ShutdownHandle) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if is_stop_command(&line) {
            shutdown.shutdown();
            return Ok(true)
        }
    }
    Ok(false)
}
