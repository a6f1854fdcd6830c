//! Transfer session state machine
//!
//! One [`Session`] is one file moving in one direction between this host and
//! one peer. It performs no socket I/O and reads no clock: the worker feeds
//! it datagrams and the current time, and sends whatever it returns. That
//! keeps every timer in one place ([`Session::next_deadline`]) and makes
//! teardown a single assignment that drops the file and all pending timers
//! together.
//!
//! ```text
//! Negotiating ──▶ Transferring ──▶ Closed(Ok)
//!      │               │
//!      └───────────────┴─────────▶ Closed(Err)
//! ```

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::convert::{NetasciiReader, NetasciiWriter};
use super::error::TftpError;
use super::fs::FileAccess;
use super::options::{self, OptionType, OptionsOverride, OptionsPrivate, OptionsProtocol};
use super::packet::{Packet, TransferMode};
use super::window::{Acknowledged, Block, Window};

/// Retransmit intervals that always fit inside the idle timeout
const IDLE_RETRANSMITS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Negotiating,
    Transferring,
    Closed(Result<(), TftpError>),
}

/// A packet to put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub packet: Packet,
    pub to: SocketAddr,
}

/// Server-wide knobs every session starts from
#[derive(Debug, Clone)]
pub struct Settings {
    pub local: OptionsPrivate,
    pub overrides: OptionsOverride,
    /// Options the server is willing to negotiate
    pub supported: Vec<OptionType>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local: OptionsPrivate::default(),
            overrides: OptionsOverride::default(),
            supported: OptionType::ALL.to_vec(),
        }
    }
}

/// State shared by both directions
#[derive(Debug)]
struct Shared {
    peer: SocketAddr,
    /// False only while a client waits for the server's first reply, which
    /// fixes the port the rest of the transfer must come from.
    tid_locked: bool,
    options: OptionsProtocol,
    local: OptionsPrivate,
    state: State,
    /// Set by `start`; the session reads no clock of its own.
    idle_deadline: Option<Instant>,
    /// Control packet (request, OACK or Ack) to send again at the deadline
    pending: Option<(Packet, Instant)>,
    bytes: u64,
}

impl Shared {
    /// Silence tolerated before the transfer is abandoned. Never shorter
    /// than a few negotiated retransmit intervals, so a peer that asked for
    /// a long `timeout` still sees retransmissions first.
    fn idle_timeout(&self) -> Duration {
        self.local
            .connection_timeout
            .max(self.options.timeout * IDLE_RETRANSMITS)
    }

    fn touch(&mut self, now: Instant) {
        self.idle_deadline = Some(now + self.idle_timeout());
    }

    fn send(&self, packet: Packet) -> Outbound {
        Outbound {
            packet,
            to: self.peer,
        }
    }

    /// Send now and again after every retransmit interval without progress.
    fn arm(&mut self, packet: Packet, now: Instant) -> Outbound {
        self.pending = Some((packet.clone(), now + self.options.timeout));
        self.send(packet)
    }

    fn finish(&mut self, outcome: Result<(), TftpError>) {
        self.pending = None;
        self.state = State::Closed(outcome);
    }

    /// Tell the peer why the transfer is over, then close.
    fn fail(&mut self, err: TftpError) -> Vec<Outbound> {
        let out = vec![self.send(err.to_packet())];
        self.finish(Err(err));
        out
    }

    fn violation(&mut self, packet: &Packet) {
        self.finish(Err(TftpError::ProtocolViolation(format!(
            "unexpected {:?} packet",
            packet.opcode()
        ))));
    }

    fn resend_pending(&mut self, now: Instant) -> Option<Outbound> {
        let timeout = self.options.timeout;
        let (packet, deadline) = self.pending.as_mut()?;
        if *deadline > now {
            return None;
        }
        *deadline = now + timeout;
        let packet = packet.clone();
        Some(self.send(packet))
    }
}

/// A request received by the server, not yet acted on
struct Serve {
    packet: Packet,
    files: Arc<dyn FileAccess>,
    overrides: OptionsOverride,
    supported: Vec<OptionType>,
}

enum Role {
    Serve(Serve),
    Send(Sender),
    Receive(Receiver),
    Finished,
}

pub struct Session {
    shared: Shared,
    role: Role,
    /// A client's RRQ/WRQ, sent by `start`
    request: Option<Packet>,
    label: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A server session for a decoded RRQ or WRQ from `peer`.
    pub fn serve(
        request: Packet,
        peer: SocketAddr,
        files: Arc<dyn FileAccess>,
        settings: &Settings,
    ) -> Result<Self, TftpError> {
        let label = match &request {
            Packet::Rrq { filename, .. } => format!("RRQ {filename:?} from {peer}"),
            Packet::Wrq { filename, .. } => format!("WRQ {filename:?} from {peer}"),
            other => {
                return Err(TftpError::ProtocolViolation(format!(
                    "{:?} is not a request",
                    other.opcode()
                )));
            }
        };
        Ok(Self {
            shared: Shared::new(peer, true, settings.local),
            role: Role::Serve(Serve {
                packet: request,
                files,
                overrides: settings.overrides,
                supported: settings.supported.clone(),
            }),
            request: None,
            label,
        })
    }

    /// A client download: send RRQ to `server` and write what arrives to `sink`.
    pub fn client_get(
        server: SocketAddr,
        filename: &str,
        mode: TransferMode,
        options: Vec<(String, String)>,
        sink: Box<dyn Write + Send>,
        local: OptionsPrivate,
    ) -> Self {
        let request = Packet::Rrq {
            filename: filename.to_string(),
            mode: mode.as_str().to_string(),
            options: options.clone(),
        };
        Self {
            shared: Shared::new(server, false, local),
            role: Role::Receive(Receiver::new(Sink::new(sink, mode), Some(options))),
            request: Some(request),
            label: format!("GET {filename:?} from {server}"),
        }
    }

    /// A client upload: send WRQ to `server` and stream `source` to it.
    pub fn client_put(
        server: SocketAddr,
        filename: &str,
        mode: TransferMode,
        options: Vec<(String, String)>,
        source: Box<dyn Read + Send>,
        local: OptionsPrivate,
    ) -> Self {
        let request = Packet::Wrq {
            filename: filename.to_string(),
            mode: mode.as_str().to_string(),
            options: options.clone(),
        };
        Self {
            shared: Shared::new(server, false, local),
            role: Role::Send(Sender::new(wrap_source(source, mode), Some(options))),
            request: Some(request),
            label: format!("PUT {filename:?} to {server}"),
        }
    }

    pub fn state(&self) -> &State {
        &self.shared.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.shared.state, State::Closed(_))
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn options(&self) -> &OptionsProtocol {
        &self.shared.options
    }

    /// File bytes sent or written so far.
    pub fn transferred(&self) -> u64 {
        self.shared.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Open the file and send the first packet.
    pub fn start(&mut self, now: Instant) -> Vec<Outbound> {
        self.shared.touch(now);

        let out = if let Some(request) = self.request.take() {
            vec![self.shared.arm(request, now)]
        } else if matches!(self.role, Role::Serve(_)) {
            match std::mem::replace(&mut self.role, Role::Finished) {
                Role::Serve(serve) => self.start_serving(serve, now),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        self.reap();
        out
    }

    /// Handle one datagram that arrived on the session's socket.
    pub fn on_datagram(&mut self, from: SocketAddr, bytes: &[u8], now: Instant) -> Vec<Outbound> {
        if self.is_closed() {
            return Vec::new();
        }
        if !self.accepts(from) {
            log::warn!("{}: datagram from unknown transfer id {}", self.label, from);
            return vec![Outbound {
                packet: TftpError::UnknownTransferId(from).to_packet(),
                to: from,
            }];
        }

        let packet = match Packet::deserialize(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("{}: {}", self.label, err);
                self.shared.finish(Err(err));
                self.reap();
                return Vec::new();
            }
        };
        log::trace!("{}: received {:?}", self.label, packet.opcode());
        self.shared.touch(now);

        let out = if let Packet::Error { code, msg } = packet {
            self.shared.finish(Err(TftpError::Peer { code, message: msg }));
            Vec::new()
        } else {
            match &mut self.role {
                Role::Send(sender) => sender.on_packet(&mut self.shared, packet, now),
                Role::Receive(receiver) => receiver.on_packet(&mut self.shared, packet, now),
                Role::Serve(_) | Role::Finished => Vec::new(),
            }
        };
        self.reap();
        out
    }

    /// Handle whatever deadlines have passed by `now`.
    pub fn on_timer(&mut self, now: Instant) -> Vec<Outbound> {
        if self.is_closed() {
            return Vec::new();
        }
        if self.shared.idle_deadline.is_some_and(|deadline| now >= deadline) {
            let idle = self.shared.idle_timeout();
            log::warn!("{}: no response for {:?}, giving up", self.label, idle);
            self.shared.finish(Err(TftpError::Timeout(idle)));
            self.reap();
            return Vec::new();
        }

        let mut out: Vec<Outbound> = Vec::new();
        match &mut self.role {
            Role::Send(sender) => {
                out.extend(self.shared.resend_pending(now));
                let deadline = now + self.shared.options.timeout;
                for packet in sender.window.rearm_expired(now, deadline) {
                    out.push(self.shared.send(packet));
                }
            }
            Role::Receive(receiver) => {
                if let Some(ack) = self.shared.resend_pending(now) {
                    receiver.unacked = 0;
                    out.push(ack);
                }
            }
            Role::Serve(_) | Role::Finished => {}
        }
        if !out.is_empty() {
            log::debug!("{}: retransmitting {} packet(s)", self.label, out.len());
        }
        out
    }

    /// The earliest moment [`Session::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }
        let window = match &self.role {
            Role::Send(sender) => sender.window.next_deadline(),
            _ => None,
        };
        [
            self.shared.idle_deadline,
            self.shared.pending.as_ref().map(|(_, deadline)| *deadline),
            window,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Abandon the transfer locally.
    pub fn close(&mut self, outcome: Result<(), TftpError>) {
        if !self.is_closed() {
            self.shared.finish(outcome);
        }
        self.reap();
    }

    fn accepts(&mut self, from: SocketAddr) -> bool {
        if self.shared.tid_locked {
            return from == self.shared.peer;
        }
        if from.ip() != self.shared.peer.ip() {
            return false;
        }
        log::debug!("{}: server transfer id is {}", self.label, from);
        self.shared.peer = from;
        self.shared.tid_locked = true;
        true
    }

    /// Release the file and window once closed.
    fn reap(&mut self) {
        if self.is_closed() {
            self.shared.pending = None;
            self.role = Role::Finished;
        }
    }

    fn start_serving(&mut self, serve: Serve, now: Instant) -> Vec<Outbound> {
        let shared = &mut self.shared;
        let (filename, mode, requested, reading) = match serve.packet {
            Packet::Rrq {
                filename,
                mode,
                options,
            } => (filename, mode, options, true),
            Packet::Wrq {
                filename,
                mode,
                options,
            } => (filename, mode, options, false),
            _ => return Vec::new(),
        };

        let mode = match TransferMode::parse(&mode) {
            Ok(mode) => mode,
            Err(err) => {
                log::warn!("{}: {}", self.label, err);
                return shared.fail(err);
            }
        };
        let mut accepted = options::negotiate(&requested, &serve.supported);
        serve.overrides.cap(&mut accepted);

        let role = if reading {
            match serve.files.open_read(&filename) {
                Ok(handle) => {
                    for opt in accepted.iter_mut() {
                        if opt.option == OptionType::TransferSize {
                            opt.value = handle.size;
                        }
                    }
                    Role::Send(Sender::new(wrap_source(handle.reader, mode), None))
                }
                Err(err) => {
                    log::warn!("{}: {}", self.label, err);
                    return shared.fail(TftpError::from_io(&err));
                }
            }
        } else {
            match serve.files.open_write(&filename) {
                Ok(writer) => Role::Receive(Receiver::new(Sink::new(writer, mode), None)),
                Err(err) => {
                    log::warn!("{}: {}", self.label, err);
                    return shared.fail(TftpError::from_io(&err));
                }
            }
        };

        shared.options = OptionsProtocol::merged(&shared.local, &serve.overrides, &accepted);
        shared.touch(now);
        log::info!(
            "{}: {} mode, blksize {}, windowsize {}",
            self.label,
            mode,
            shared.options.block_size,
            shared.options.window_size
        );
        self.role = role;

        if !accepted.is_empty() {
            return vec![shared.arm(Packet::Oack(options::to_pairs(&accepted)), now)];
        }
        match &mut self.role {
            Role::Send(sender) => sender.begin(shared, now),
            Role::Receive(_) => {
                shared.state = State::Transferring;
                vec![shared.arm(Packet::Ack(0), now)]
            }
            _ => Vec::new(),
        }
    }
}

impl Shared {
    fn new(peer: SocketAddr, tid_locked: bool, local: OptionsPrivate) -> Self {
        Self {
            peer,
            tid_locked,
            options: OptionsProtocol::with_timeout(local.retransmit_timeout),
            local,
            state: State::Negotiating,
            idle_deadline: None,
            pending: None,
            bytes: 0,
        }
    }
}

/// Adopt the options in a server's OACK, or fail the transfer.
fn adopt_oack(
    shared: &mut Shared,
    requested: &[(String, String)],
    acked: &[(String, String)],
) -> Result<(), Vec<Outbound>> {
    match shared.options.parse_acknowledged(requested, acked) {
        Ok(options) => {
            if let Some(size) = options.transfer_size {
                log::debug!("server reports a {size} byte file");
            }
            shared.options = options;
            Ok(())
        }
        Err(err) => Err(shared.fail(err)),
    }
}

fn wrap_source(source: Box<dyn Read + Send>, mode: TransferMode) -> Box<dyn Read + Send> {
    match mode {
        TransferMode::Octet => source,
        TransferMode::Netascii => Box::new(NetasciiReader::new(source)),
    }
}

/// Read up to `size` bytes, stopping short only at end of file.
fn read_block(source: &mut dyn Read, size: usize) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match source.read(&mut data[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    data.truncate(filled);
    Ok(data)
}

/// Sends a file as windows of Data blocks (serving RRQ, or a client PUT)
struct Sender {
    source: Box<dyn Read + Send>,
    window: Window,
    next_block: u16,
    /// The short final block has been read
    read_done: bool,
    /// A client's requested options, until the server first replies
    awaiting_reply: Option<Vec<(String, String)>>,
    client: bool,
}

impl Sender {
    fn new(source: Box<dyn Read + Send>, awaiting_reply: Option<Vec<(String, String)>>) -> Self {
        Self {
            source,
            window: Window::new(1),
            next_block: 1,
            read_done: false,
            client: awaiting_reply.is_some(),
            awaiting_reply,
        }
    }

    fn on_packet(&mut self, shared: &mut Shared, packet: Packet, now: Instant) -> Vec<Outbound> {
        let negotiating = shared.state == State::Negotiating;
        match packet {
            Packet::Oack(acked) if negotiating && self.awaiting_reply.is_some() => {
                let requested = self.awaiting_reply.take().unwrap_or_default();
                if let Err(out) = adopt_oack(shared, &requested, &acked) {
                    return out;
                }
                self.begin(shared, now)
            }
            // The server is repeating its OACK; our first window is on its way.
            Packet::Oack(_) if self.client => Vec::new(),
            Packet::Ack(0) if negotiating => {
                self.awaiting_reply = None;
                self.begin(shared, now)
            }
            // Anything else before the first window is a stray duplicate.
            Packet::Ack(_) if negotiating => Vec::new(),
            Packet::Ack(block_num) => self.on_ack(shared, block_num, now),
            other => {
                shared.violation(&other);
                Vec::new()
            }
        }
    }

    fn begin(&mut self, shared: &mut Shared, now: Instant) -> Vec<Outbound> {
        shared.pending = None;
        shared.state = State::Transferring;
        self.window = Window::new(shared.options.window_size);
        self.fill(shared, now)
    }

    /// Read and send blocks until the window is full or the file is exhausted.
    fn fill(&mut self, shared: &mut Shared, now: Instant) -> Vec<Outbound> {
        let block_size = usize::from(shared.options.block_size);
        let deadline = now + shared.options.timeout;
        let mut out = Vec::new();

        while !self.window.is_full() && !self.read_done {
            let data = match read_block(self.source.as_mut(), block_size) {
                Ok(data) => data,
                Err(err) => {
                    log::error!("Read failed mid-transfer: {}", err);
                    out.extend(shared.fail(TftpError::from_io(&err)));
                    return out;
                }
            };
            self.read_done = data.len() < block_size;
            shared.bytes += data.len() as u64;

            let block = Block {
                block_num: self.next_block,
                data,
                deadline,
            };
            self.next_block = self.next_block.wrapping_add(1);
            out.push(shared.send(block.to_packet()));
            self.window.push(block);
        }
        out
    }

    fn on_ack(&mut self, shared: &mut Shared, block_num: u16, now: Instant) -> Vec<Outbound> {
        match self.window.acknowledge(block_num) {
            Acknowledged::All if self.read_done => {
                log::debug!("Final block {} acknowledged", block_num);
                shared.finish(Ok(()));
                Vec::new()
            }
            Acknowledged::All => self.fill(shared, now),
            Acknowledged::Partial(remaining) => {
                log::debug!(
                    "Partial ack {}, resending {} block(s)",
                    block_num,
                    remaining
                );
                let deadline = now + shared.options.timeout;
                self.window
                    .rearm_all(deadline)
                    .into_iter()
                    .map(|packet| shared.send(packet))
                    .collect()
            }
            Acknowledged::Unknown => {
                log::trace!("Ignoring stale ack {}", block_num);
                Vec::new()
            }
        }
    }
}

/// Where received file bytes go
enum Sink {
    Octet(Box<dyn Write + Send>),
    Netascii(NetasciiWriter<Box<dyn Write + Send>>),
}

impl Sink {
    fn new(writer: Box<dyn Write + Send>, mode: TransferMode) -> Self {
        match mode {
            TransferMode::Octet => Sink::Octet(writer),
            TransferMode::Netascii => Sink::Netascii(NetasciiWriter::new(writer)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Sink::Octet(writer) => writer.write_all(data),
            Sink::Netascii(writer) => writer.write_all(data),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            Sink::Octet(writer) => writer.flush(),
            Sink::Netascii(writer) => writer.finish(),
        }
    }
}

/// Receives a file block by block (serving WRQ, or a client GET)
struct Receiver {
    sink: Sink,
    last_block: u16,
    /// In-sequence blocks received since the last Ack went out
    unacked: usize,
    awaiting_reply: Option<Vec<(String, String)>>,
    client: bool,
}

impl Receiver {
    fn new(sink: Sink, awaiting_reply: Option<Vec<(String, String)>>) -> Self {
        Self {
            sink,
            last_block: 0,
            unacked: 0,
            client: awaiting_reply.is_some(),
            awaiting_reply,
        }
    }

    fn on_packet(&mut self, shared: &mut Shared, packet: Packet, now: Instant) -> Vec<Outbound> {
        match packet {
            Packet::Oack(acked) if self.awaiting_reply.is_some() => {
                let requested = self.awaiting_reply.take().unwrap_or_default();
                if let Err(out) = adopt_oack(shared, &requested, &acked) {
                    return out;
                }
                shared.state = State::Transferring;
                vec![shared.arm(Packet::Ack(0), now)]
            }
            // The server is repeating its OACK; the pending Ack(0) covers it.
            Packet::Oack(_) if self.client && self.last_block == 0 => Vec::new(),
            Packet::Data { block_num, data } => self.on_data(shared, block_num, data, now),
            other => {
                shared.violation(&other);
                Vec::new()
            }
        }
    }

    fn on_data(
        &mut self,
        shared: &mut Shared,
        block_num: u16,
        data: Vec<u8>,
        now: Instant,
    ) -> Vec<Outbound> {
        // Data straight after the request means the server ignored our options.
        self.awaiting_reply = None;

        if block_num != self.last_block.wrapping_add(1) {
            log::trace!(
                "Ignoring block {}, expecting {}",
                block_num,
                self.last_block.wrapping_add(1)
            );
            return Vec::new();
        }
        let block_size = usize::from(shared.options.block_size);
        if data.len() > block_size {
            shared.finish(Err(TftpError::ProtocolViolation(format!(
                "block {} carries {} bytes, blksize is {}",
                block_num,
                data.len(),
                block_size
            ))));
            return Vec::new();
        }

        if let Err(err) = self.sink.write_all(&data) {
            log::error!("Write failed mid-transfer: {}", err);
            return shared.fail(write_error(&err));
        }
        self.last_block = block_num;
        self.unacked += 1;
        shared.bytes += data.len() as u64;
        shared.state = State::Transferring;

        if data.len() < block_size {
            if let Err(err) = self.sink.finish() {
                log::error!("Flush failed at end of transfer: {}", err);
                return shared.fail(write_error(&err));
            }
            let out = vec![shared.send(Packet::Ack(block_num))];
            shared.finish(Ok(()));
            return out;
        }

        if self.unacked >= usize::from(shared.options.window_size) {
            self.unacked = 0;
            vec![shared.arm(Packet::Ack(block_num), now)]
        } else {
            // Mid-window: acknowledge later if the rest of the window stalls.
            shared.pending = Some((Packet::Ack(block_num), now + shared.options.timeout));
            Vec::new()
        }
    }
}

/// Disk exhaustion gets its own code; other write failures are undefined errors.
fn write_error(err: &io::Error) -> TftpError {
    match TftpError::from_io(err) {
        TftpError::DiskFull => TftpError::DiskFull,
        _ => TftpError::Io(err.to_string()),
    }
}
