use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::config::Config;
use super::worker::Worker;
use crate::tftp::core::{ErrorCode, FileAccess, MAX_DATAGRAM, Packet, RootedFiles, Session, Settings};

/// TFTP server
///
/// Listens on the well-known port and hands every request to a new
/// [`Worker`] on its own ephemeral socket. The listening socket never
/// carries transfer traffic.
pub struct Server {
    socket: UdpSocket,
    files: Arc<dyn FileAccess>,
    settings: Settings,
    allow_get: bool,
    allow_put: bool,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Stops a running [`Server::listen`] loop from another task
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

impl Server {
    /// Bind the listening socket and check the served directory.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        anyhow::ensure!(
            config.directory.is_dir(),
            "Directory does not exist: {}",
            config.directory.display()
        );

        let addr = SocketAddr::new(config.ip_address, config.port);
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        let settings = Settings {
            local: config.opt_local,
            overrides: config.opt_override,
            ..Settings::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            socket,
            files: Arc::new(RootedFiles::new(config.directory.clone())),
            settings,
            allow_get: config.allow_get,
            allow_put: config.allow_put,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Serve requests until shut down.
    ///
    /// Transfers already running are independent tasks and finish on their own.
    pub async fn listen(&mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while !*self.shutdown_rx.borrow() {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        if let Err(err) = self.dispatch(&buf[..len], peer).await {
                            log::error!("Failed to start transfer for {}: {:#}", peer, err);
                        }
                    }
                    Err(err) => log::error!("Receive on listening socket failed: {}", err),
                },
            }
        }

        log::info!("TFTP server stopped listening");
        Ok(())
    }

    async fn dispatch(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        let request = match Packet::deserialize(bytes) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("Dropping datagram from {}: {}", peer, err);
                return Ok(());
            }
        };
        let allowed = match &request {
            Packet::Rrq { .. } => self.allow_get,
            Packet::Wrq { .. } => self.allow_put,
            other => {
                log::debug!(
                    "Ignoring {:?} from {} on the listening port",
                    other.opcode(),
                    peer
                );
                return Ok(());
            }
        };

        let local = SocketAddr::new(self.socket.local_addr()?.ip(), 0);
        let socket = UdpSocket::bind(local)
            .await
            .context("Failed to bind transfer socket")?;

        if !allowed {
            log::warn!("Refusing {:?} from {}: mode disabled", request.opcode(), peer);
            let reply = Packet::error(ErrorCode::AccessViolation).serialize()?;
            socket.send_to(&reply, peer).await?;
            return Ok(());
        }

        let session = Session::serve(request, peer, self.files.clone(), &self.settings)?;
        log::info!("{}: transfer port {}", session.label(), socket.local_addr()?);
        tokio::spawn(Worker::new(socket, session).run());
        Ok(())
    }
}
