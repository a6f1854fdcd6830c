use std::time::Instant;

use tokio::net::UdpSocket;

use crate::tftp::core::{MAX_DATAGRAM, Outbound, Session, State, TftpError};

/// Drives one [`Session`] over its own socket until it closes.
///
/// The socket is never connected: replies go out with `send_to`, and
/// datagrams from any sender are handed to the session, which answers
/// foreign transfer ids itself.
///
/// Steps that touch the file (opening it, reading or writing a block) run
/// on tokio's blocking pool; timers only resend packets already in memory
/// and run inline.
pub struct Worker {
    socket: UdpSocket,
    session: Session,
}

impl Worker {
    pub fn new(socket: UdpSocket, session: Session) -> Self {
        Self { socket, session }
    }

    /// Run the transfer to completion and return the number of file bytes moved.
    pub async fn run(self) -> Result<u64, TftpError> {
        let Worker { socket, session } = self;
        let label = session.label().to_string();

        let (mut session, out) = offload(session, |s| s.start(Instant::now())).await?;
        send_all(&socket, &label, out).await;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        while let Some(deadline) = session.next_deadline() {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        let datagram = buf[..len].to_vec();
                        let (returned, out) = offload(session, move |s| {
                            s.on_datagram(from, &datagram, Instant::now())
                        })
                        .await?;
                        session = returned;
                        send_all(&socket, &label, out).await;
                    }
                    Err(err) => log::warn!("{}: receive failed: {}", label, err),
                },
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    let out = session.on_timer(Instant::now());
                    send_all(&socket, &label, out).await;
                }
            }
        }

        match session.state() {
            State::Closed(Ok(())) => {
                log::info!("{}: complete, {} bytes", label, session.transferred());
                Ok(session.transferred())
            }
            State::Closed(Err(err)) => {
                log::warn!("{}: failed: {}", label, err);
                Err(err.clone())
            }
            // next_deadline only returns None once closed
            _ => Err(TftpError::ProtocolViolation(
                "session stopped before closing".to_string(),
            )),
        }
    }
}

/// Run one session step on the blocking pool and hand the session back.
async fn offload<F>(mut session: Session, step: F) -> Result<(Session, Vec<Outbound>), TftpError>
where
    F: FnOnce(&mut Session) -> Vec<Outbound> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = step(&mut session);
        (session, out)
    })
    .await
    .map_err(|err| TftpError::Io(format!("transfer step failed: {err}")))
}

async fn send_all(socket: &UdpSocket, label: &str, out: Vec<Outbound>) {
    for Outbound { packet, to } in out {
        let bytes = match packet.serialize() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("{}: cannot encode {:?}: {}", label, packet.opcode(), err);
                continue;
            }
        };
        log::trace!("{}: sending {:?} to {}", label, packet.opcode(), to);
        if let Err(err) = socket.send_to(&bytes, to).await {
            log::warn!("{}: send to {} failed: {}", label, to, err);
        }
    }
}
