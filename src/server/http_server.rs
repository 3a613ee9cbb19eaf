//! The listening server.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tokio_rustls::TlsAcceptor;

use crate::parser::{find_head_end, parse_request};
use crate::server::access_log::{AccessLogger, LogEntry};
use crate::server::config::ServerConfig;
use crate::server::error::Error;
use crate::server::handler::{IncomingRequest, RequestHandler, ServedRoot};
use crate::server::response::{self, ResponseDescriptor, StatusCode};

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// Stops a running server from elsewhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Asks the server to stop accepting connections.
    ///
    /// A request made before the server starts serving stops it as soon
    /// as it does.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Resolves once shutdown has been requested.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return
        }
        // All senders gone means nobody can ask for a stop anymore.
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await
        }
    }
}

/// Bounds on reading a request and writing its response.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// A static file server for a single root directory.
pub struct HttpServer {
    /// The server configuration.
    pub config: ServerConfig,
    handler: RequestHandler,
    tls: Option<TlsAcceptor>,
    logger: Arc<AccessLogger>,
    state: watch::Sender<ServerState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("secure", &self.is_secure())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    /// Create a plain HTTP server for `root`.
    pub fn new(config: ServerConfig, root: ServedRoot) -> Self {
        Self {
            config,
            handler: RequestHandler::new(root),
            tls: None,
            logger: Arc::new(AccessLogger::stdout()),
            state: watch::channel(ServerState::Stopped).0,
            shutdown: Arc::new(watch::channel(false).0),
        }
    }

    /// Serve TLS through `acceptor` instead of plain HTTP.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Send access log lines to `logger` instead of standard output.
    pub fn with_access_logger(mut self, logger: AccessLogger) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn root(&self) -> &ServedRoot {
        self.handler.root()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown.clone() }
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.shutdown_handle().shutdown()
    }

    /// Binds the listening socket.
    ///
    /// On failure the server is back in [`ServerState::Stopped`] and no
    /// socket is left open.
    pub async fn bind(&self) -> Result<TcpListener, Error> {
        let addr = self.config.addr();
        self.state.send_replace(ServerState::Starting);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                self.state.send_replace(ServerState::Listening);
                Ok(listener)
            }
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                Err(Error::Bind { addr, source })
            }
        }
    }

    /// Logs the startup banner for a server bound to `addr`.
    pub fn display_server_info(&self, addr: SocketAddr) {
        let banner = include_str!("../banner.txt");
        info!("\n{banner}");

        let scheme = if self.is_secure() { "https" } else { "http" };
        info!("Serving files from {}", self.root().path().display());
        info!("Listening on: {port}", port = addr.port());
        info!("TLS: {}", if self.is_secure() { "enabled" } else { "disabled" });
        info!(
            "Update URL: {scheme}://localhost:{port}/current-version.txt",
            port = addr.port()
        );
    }

    /// Binds, then serves until shut down.
    pub async fn start(&self) -> Result<(), Error> {
        let listener = self.bind().await?;
        self.display_server_info(listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serves connections from `listener` until shut down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        self.state.send_replace(ServerState::Listening);

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("Shutting down server...");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((socket, addr)) => {
                            self.handle_new_connection(
                                socket, addr, &semaphore, &mut tasks
                            ).await;
                        }
                        Err(e) => {
                            if Self::handle_connection_error(e).await {
                                break;
                            }
                        }
                    }
                }
            }

            // Reap finished connection tasks.
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!("Connection task failed: {e}");
                }
            }
        }

        drop(listener);
        self.perform_shutdown(&mut tasks).await;
        self.state.send_replace(ServerState::Stopped);
        Ok(())
    }

    /// Handle a new connection.
    async fn handle_new_connection(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Connection limit reached, rejecting connection from {addr}");
                // A plain reply would be garbage on a TLS connection.
                if self.tls.is_none() {
                    self.reject_busy(&mut socket, addr).await;
                }
                return;
            }
        };

        let handler = self.handler.clone();
        let logger = self.logger.clone();
        let tls = self.tls.clone();
        let limits = ConnectionLimits::from(&self.config);

        tasks.spawn(async move {
            // The permit is dropped when the task completes.
            let _permit = permit;

            let res = match tls {
                Some(acceptor) => {
                    match time::timeout(limits.read_timeout, acceptor.accept(socket)).await {
                        Ok(Ok(mut stream)) => {
                            Self::handle_connection(
                                &mut stream, addr, &handler, &logger, limits
                            ).await
                        }
                        Ok(Err(e)) => {
                            debug!("TLS handshake with {addr} failed: {e}");
                            return;
                        }
                        Err(_) => {
                            debug!("TLS handshake with {addr} timed out");
                            return;
                        }
                    }
                }
                None => {
                    let mut socket = socket;
                    Self::handle_connection(
                        &mut socket, addr, &handler, &logger, limits
                    ).await
                }
            };

            if let Err(e) = res {
                debug!("Error handling connection from {addr}: {e}");
            }
        });
    }

    /// Answers a connection over the cap with 503 without reading from it.
    ///
    /// This runs on the accept loop, so the write gets the short read
    /// timeout rather than the response write timeout.
    async fn reject_busy(&self, socket: &mut TcpStream, addr: SocketAddr) {
        let entry = LogEntry {
            timestamp: Local::now(),
            status: StatusCode::ServiceUnavailable.as_u16(),
            remote_address: addr.ip().to_string(),
            path: "-".into(),
            elapsed: Duration::ZERO,
        };
        if let Err(e) = Self::respond(
            socket, response::service_unavailable(), true,
            &self.logger, entry, Instant::now(), self.config.read_timeout(),
        ).await {
            debug!("Failed to send 503 to {addr}: {e}");
        }
    }

    /// Handle connection errors.
    ///
    /// Returns whether the accept loop should stop.
    async fn handle_connection_error(e: std::io::Error) -> bool {
        error!("Error accepting connection: {e}");

        if e.kind() == std::io::ErrorKind::BrokenPipe {
            error!("Critical error accepting connection, shutting down");
            return true;
        }

        // Mostly file descriptor exhaustion; back off a little.
        time::sleep(Duration::from_millis(100)).await;
        false
    }

    /// Give in-flight connections the grace period, then abandon them.
    async fn perform_shutdown(&self, tasks: &mut JoinSet<()>) {
        info!("Waiting for {len} active connections to complete...", len = tasks.len());
        let drained = time::timeout(self.config.shutdown_grace(), async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    error!("Task failed during shutdown: {e}");
                }
            }
        }).await;

        if drained.is_err() {
            warn!("Abandoning {len} connections", len = tasks.len());
            tasks.abort_all();
        }
        info!("Server shutdown complete");
    }

    /// Handle a single connection: one request, one response, then close.
    ///
    /// Every request that gets a response also gets an access log line.
    /// Errors returned from here concern this connection only.
    pub async fn handle_connection<S>(
        socket: &mut S,
        peer: SocketAddr,
        handler: &RequestHandler,
        logger: &AccessLogger,
        limits: ConnectionLimits,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let received_at = Local::now();
        let remote_address = peer.ip().to_string();

        let head = match time::timeout(
            limits.read_timeout, Self::read_head(socket, limits.read_buffer_size)
        ).await {
            Err(_) => return Err(Error::ReadTimeout),
            Ok(Ok(Some(head))) => head,
            // Closed before sending anything.
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(Error::HeadTooLarge(size))) => {
                let response = response::bad_request(Error::HeadTooLarge(size));
                let entry = LogEntry {
                    timestamp: received_at,
                    status: response.status.as_u16(),
                    remote_address,
                    path: "-".into(),
                    elapsed: Duration::ZERO,
                };
                Self::respond(
                    socket, response, true, logger, entry, started, limits.write_timeout
                ).await?;
                return Err(Error::HeadTooLarge(size));
            }
            Ok(Err(e)) => return Err(e),
        };

        let request = match parse_request(&head) {
            Ok(request) => request,
            Err(e) => {
                let response = response::bad_request(&e);
                let entry = LogEntry {
                    timestamp: received_at,
                    status: response.status.as_u16(),
                    remote_address,
                    path: "-".into(),
                    elapsed: Duration::ZERO,
                };
                Self::respond(
                    socket, response, true, logger, entry, started, limits.write_timeout
                ).await?;
                return Err(Error::ParseError(e));
            }
        };

        let incoming = IncomingRequest {
            raw_uri: request.uri(),
            remote_address,
            received_at,
        };
        let response = response::build(handler.handle(&incoming.raw_uri).await);
        let entry = LogEntry {
            timestamp: incoming.received_at,
            status: response.status.as_u16(),
            remote_address: incoming.remote_address,
            path: request.path,
            elapsed: Duration::ZERO,
        };
        Self::respond(
            socket, response, request.method.expects_body(),
            logger, entry, started, limits.write_timeout,
        ).await
    }

    /// Reads until the end of the request head.
    ///
    /// Returns `None` if the client closed the connection without sending
    /// anything. If the client closes mid-head, what arrived is returned
    /// and left for the parser to judge.
    async fn read_head<S>(
        socket: &mut S, limit: usize
    ) -> Result<Option<Vec<u8>>, Error>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(limit.min(1024));
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok((!buf.is_empty()).then_some(buf));
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_head_end(&buf) {
                buf.truncate(end);
                return Ok(Some(buf));
            }
            if buf.len() >= limit {
                return Err(Error::HeadTooLarge(limit));
            }
        }
    }

    /// Writes `response`, logs the transaction and closes the stream.
    ///
    /// The log line is written even if the client went away mid-response
    /// or stopped reading for longer than `write_timeout`.
    async fn respond<S>(
        socket: &mut S,
        response: ResponseDescriptor,
        include_body: bool,
        logger: &AccessLogger,
        mut entry: LogEntry,
        started: Instant,
        write_timeout: Duration,
    ) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin,
    {
        let res = time::timeout(
            write_timeout, response.write_to(socket, include_body)
        ).await;
        entry.elapsed = started.elapsed();
        logger.log(&entry);
        match res {
            Err(_) => return Err(Error::WriteTimeout),
            Ok(res) => res?,
        }
        socket.shutdown().await?;
        Ok(())
    }
}
