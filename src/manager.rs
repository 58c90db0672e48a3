//! Owns the one UDP socket for an endpoint (client or server), dispatches
//! inbound datagrams to the right `Connection` by id, drives the
//! flush/wait/retransmit loop, and injects loss on the way out.
//!
//! Grounded in `webrtc_sctp::endpoint::Endpoint`'s dispatch-by-handle shape
//! and `webrtc_sctp::udp::UdpSocket`'s socket wrapper, adapted from Tokio's
//! async poll_send/poll_recv to a blocking `std::net::UdpSocket` with
//! `set_read_timeout` — the protocol design calls for a single-threaded,
//! synchronously blocking cooperative loop, not an async runtime.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::Packet;
use crate::config::Config;
use crate::connection::Connection;
use crate::role::Role;

/// Maximum UDP datagram this endpoint will read; RFT never sends more than
/// `max_packet_size` (1452 by default) but a peer running a different
/// build could, so the receive buffer matches the theoretical UDP ceiling.
const RECV_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LossState {
    Success,
    Failure,
}

/// Two-state Markov channel: `p` is the success→failure transition
/// probability, `q` is failure→success. `p = q = 0` never drops.
#[derive(Debug)]
struct MarkovLoss {
    state: LossState,
    p: f64,
    q: f64,
    rng: StdRng,
}

impl MarkovLoss {
    fn new(p: f64, q: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MarkovLoss {
            state: LossState::Success,
            p,
            q,
            rng,
        }
    }

    /// Returns `true` if the datagram should be dropped, advancing the
    /// Markov state as a side effect.
    fn roll(&mut self) -> bool {
        match self.state {
            LossState::Success => {
                if self.rng.gen_bool(self.p.clamp(0.0, 1.0)) {
                    self.state = LossState::Failure;
                    true
                } else {
                    false
                }
            }
            LossState::Failure => {
                if self.rng.gen_bool(self.q.clamp(0.0, 1.0)) {
                    self.state = LossState::Success;
                    false
                } else {
                    true
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Server,
}

/// Builds a fresh `Role` for each inbound server connection. A plain
/// closure can't be `Debug`/named conveniently as a field type, so this is
/// expressed as a boxed `Fn` the caller supplies once at startup (the CLI
/// binary passes a closure that creates a new `ServerRole` over the
/// configured root directory).
pub type RoleFactory = Box<dyn Fn() -> Box<dyn Role>>;

pub struct ConnectionManager {
    socket: UdpSocket,
    connections: HashMap<u32, Connection>,
    loss: MarkovLoss,
    cfg: Config,
    endpoint: Endpoint,
    next_connection_id: u32,
    role_factory: Option<RoleFactory>,
}

impl ConnectionManager {
    pub fn new(socket: UdpSocket, endpoint: Endpoint, cfg: Config) -> io::Result<Self> {
        socket.set_read_timeout(None)?;
        let loss = MarkovLoss::new(cfg.loss_p, cfg.loss_q, cfg.loss_seed);
        Ok(ConnectionManager {
            socket,
            connections: HashMap::new(),
            loss,
            cfg,
            endpoint,
            next_connection_id: 0,
            role_factory: None,
        })
    }

    /// Required before `run_once` will accept new connections on a server
    /// endpoint; unused on a client endpoint.
    pub fn set_role_factory(&mut self, factory: RoleFactory) {
        self.role_factory = Some(factory);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Registers the client's single provisional connection under key 0.
    /// Only meaningful for `Endpoint::Client`.
    pub fn open_client_connection(&mut self, remote_addr: SocketAddr, role: Box<dyn Role>) {
        let now = Instant::now();
        let mut conn = Connection::new_client(remote_addr, now, &self.cfg, role);
        conn.start();
        self.connections.insert(0, conn);
    }

    pub fn is_idle(&self) -> bool {
        self.connections.is_empty()
    }

    /// Runs one iteration: flush every connection, remove finished/closed
    /// ones, wait for either a datagram or the next deadline, and handle
    /// whichever happens. On a client endpoint, returns `false` once every
    /// connection has drained (the caller's natural stop condition). A
    /// server endpoint keeps listening even with zero active connections,
    /// so it always returns `true` until the caller stops calling it.
    pub fn run_once(&mut self) -> io::Result<bool> {
        let now = Instant::now();
        self.flush_all(now);
        self.retire_finished(now);

        if self.endpoint == Endpoint::Client && self.connections.is_empty() {
            return Ok(false);
        }

        let timeout = self
            .connections
            .values()
            .map(|c| c.current_timeout(Instant::now()))
            .min()
            .unwrap_or(self.cfg.connection_timeout);

        self.socket
            .set_read_timeout(Some(timeout.max(std::time::Duration::from_millis(1))))?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((n, src)) => self.handle_datagram(&buf[..n], src),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                self.fire_timers(Instant::now());
            }
            Err(e) => return Err(e),
        }
        Ok(true)
    }

    fn flush_all(&mut self, now: Instant) {
        for (&id, conn) in self.connections.iter_mut() {
            if conn.closed {
                continue;
            }
            for datagram in conn.flush(now) {
                Self::lossy_send(&self.socket, &mut self.loss, &datagram, conn.remote_addr, id);
            }
        }
    }

    fn retire_finished(&mut self, now: Instant) {
        let to_close: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, c)| !c.closed && c.role_is_finished())
            .map(|(&id, _)| id)
            .collect();
        for id in to_close {
            if let Some(conn) = self.connections.get_mut(&id) {
                for datagram in conn.close(now) {
                    Self::lossy_send(&self.socket, &mut self.loss, &datagram, conn.remote_addr, id);
                }
            }
        }
        self.connections.retain(|&id, c| {
            let keep = !c.closed;
            if !keep {
                log::info!("connection {id} terminated");
            }
            keep
        });
    }

    fn fire_timers(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            if conn.current_timeout(now) == std::time::Duration::ZERO {
                conn.on_timer_fire(now);
            }
        }
    }

    fn handle_datagram(&mut self, raw: &[u8], src: SocketAddr) {
        let packet = match Packet::parse(raw) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("dropping unparseable datagram from {src}: {e}");
                return;
            }
        };

        if packet.connection_id == 0 {
            self.handle_zero_connection_id(packet, src);
            return;
        }

        if !self.connections.contains_key(&packet.connection_id) {
            self.handle_unknown_connection_id(packet, src);
            return;
        }

        let now = Instant::now();
        if let Some(conn) = self.connections.get_mut(&packet.connection_id) {
            conn.update(packet, src, now);
        }
    }

    /// Server-only: a fresh client handshake. Allocates the next id,
    /// creates the connection, and feeds it the packet that started it.
    fn handle_zero_connection_id(&mut self, packet: Packet, src: SocketAddr) {
        if self.endpoint != Endpoint::Server {
            log::debug!("ignoring connection-id-0 datagram from {src}: not a server endpoint");
            return;
        }
        let new_id = self.next_connection_id.max(
            self.connections
                .keys()
                .copied()
                .max()
                .unwrap_or(0),
        ) + 1;
        self.next_connection_id = new_id;
        log::info!("new connection {new_id} from {src}");

        let Some(factory) = self.role_factory.as_ref() else {
            log::error!("no role factory configured, dropping handshake from {src}");
            return;
        };
        let role = factory();
        let now = Instant::now();
        let mut conn = Connection::new_server(new_id, src, now, &self.cfg, role);
        conn.update(packet, src, now);
        self.connections.insert(new_id, conn);
    }

    /// Client-only: the server's first reply, carrying the assigned id.
    /// Re-keys the provisional connection from 0 to that id.
    fn handle_unknown_connection_id(&mut self, packet: Packet, src: SocketAddr) {
        if self.endpoint != Endpoint::Client || !self.connections.contains_key(&0) {
            log::debug!("dropping datagram for unknown connection {} from {src}", packet.connection_id);
            return;
        }
        let new_id = packet.connection_id;
        let mut conn = self.connections.remove(&0).expect("checked above");
        conn.establish(new_id);
        let now = Instant::now();
        conn.update(packet, src, now);
        self.connections.insert(new_id, conn);
    }

    fn lossy_send(socket: &UdpSocket, loss: &mut MarkovLoss, datagram: &[u8], addr: SocketAddr, conn_id: u32) {
        if loss.roll() {
            log::trace!("dropping outbound datagram for connection {conn_id} (loss injection)");
            return;
        }
        if let Err(e) = socket.send_to(datagram, addr) {
            log::warn!("sendto {addr} failed for connection {conn_id}: {e}");
        }
    }
}
