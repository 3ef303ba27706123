//! Master server engine
//!
//! A single task owns the public socket, the verification socket, the
//! server directory, the signer and the event log, and multiplexes socket
//! readiness with a one-second tick. Every handler is synchronous-in-effect
//! and runs to completion before the next datagram; no locking exists
//! anywhere because nothing else can touch the state.
//!
//! Registration runs through a two-socket handshake. An ADD opens (at most)
//! a NAT pinhole back to the public socket, so answering on that path
//! proves nothing. The master instead queries the server from the
//! verification socket, whose source address the server has never talked
//! to; an answer there proves global reachability. Servers that stay
//! silent get a hole-punch request after two seconds and are rejected
//! after five.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::banlist::BanList;
use crate::config::MasterConfig;
use crate::directory::{ServerDirectory, ServerMetadata};
use crate::error::MasterResult;
use crate::eventlog::EventLog;
use crate::protocol;
use crate::signer::DemoSigner;

/// Silence on the verification path before the master asks the server to
/// punch a hole back to the verification socket.
const HOLE_PUNCH_AFTER: Duration = Duration::from_secs(2);

/// Silence on the verification path before a registration is rejected.
const VERIFY_DEADLINE: Duration = Duration::from_secs(5);

/// Largest datagram either socket accepts.
const MAX_PACKET_LEN: usize = 2048;

/// The master daemon: directory, ban list, signer and both sockets.
pub struct MasterServer {
    public_socket: UdpSocket,
    query_socket: Option<UdpSocket>,
    /// Address the verification socket is advertised as in self-directed
    /// hole-punch requests
    query_public_addr: Option<SocketAddr>,
    directory: ServerDirectory,
    ban_list: BanList,
    signer: Option<DemoSigner>,
    log: EventLog,
    server_timeout: Duration,
    metadata_refresh: Duration,
}

enum Input {
    Tick,
    Public(usize, SocketAddr),
    Verification(usize, SocketAddr),
}

async fn recv_verification(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

impl MasterServer {
    /// Bind both sockets, open the event log and compile the ban list.
    /// Any failure here aborts startup.
    pub async fn new(config: &MasterConfig) -> MasterResult<MasterServer> {
        let bind = config.server_address.to_bind_addr()?;
        let public_socket = UdpSocket::bind(bind).await?;
        info!("master listening on {}", public_socket.local_addr()?);

        let mut query_socket = None;
        let mut query_public_addr = None;
        if let Some(listen) = &config.query_address {
            let bind = listen.to_bind_addr()?;
            let socket = UdpSocket::bind(bind).await?;
            let local = socket.local_addr()?;
            info!("verification socket on {}", local);
            // Advertise the configured host when there is one; a wildcard
            // bind address means nothing to a remote peer.
            query_public_addr = Some(if listen.host.is_some() {
                SocketAddr::new(bind.ip(), local.port())
            } else {
                local
            });
            query_socket = Some(socket);
        } else {
            warn!("no query address configured; verification of new servers is disabled");
        }

        let signer = match &config.signing_key {
            Some(seed) => Some(DemoSigner::from_hex_seed(seed)?),
            None => None,
        };

        let ban_list = BanList::new(&config.block_addresses)?;

        let mut log = EventLog::open(Path::new(&config.log_file)).await?;
        log.write(None, "master server started").await;

        Ok(MasterServer {
            public_socket,
            query_socket,
            query_public_addr,
            directory: ServerDirectory::new(),
            ban_list,
            signer,
            log,
            server_timeout: config.server_timeout(),
            metadata_refresh: config.metadata_refresh(),
        })
    }

    /// Address the public socket is bound to.
    pub fn public_addr(&self) -> MasterResult<SocketAddr> {
        Ok(self.public_socket.local_addr()?)
    }

    /// Advertised verification address, if verification is enabled.
    pub fn verification_addr(&self) -> Option<SocketAddr> {
        self.query_public_addr
    }

    /// Run the event loop until the task is cancelled.
    ///
    /// The aging sweep runs in the tick arm before the loop returns to the
    /// socket arms, so a record that just timed out cannot consume a
    /// straggling response.
    pub async fn run(&mut self) -> MasterResult<()> {
        let mut tick = interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut public_buf = [0u8; MAX_PACKET_LEN];
        let mut verification_buf = [0u8; MAX_PACKET_LEN];

        loop {
            let input = tokio::select! {
                _ = tick.tick() => Input::Tick,
                received = self.public_socket.recv_from(&mut public_buf) => match received {
                    Ok((len, from)) => Input::Public(len, from),
                    Err(e) => {
                        warn!("public socket receive error: {}", e);
                        continue;
                    }
                },
                received = recv_verification(self.query_socket.as_ref(), &mut verification_buf) => {
                    match received {
                        Ok((len, from)) => Input::Verification(len, from),
                        Err(e) => {
                            warn!("verification socket receive error: {}", e);
                            continue;
                        }
                    }
                }
            };

            match input {
                Input::Tick => self.age_servers(Instant::now()).await,
                Input::Public(len, from) => {
                    self.handle_public_packet(&public_buf[..len], from).await;
                }
                Input::Verification(len, from) => {
                    self.handle_verification_packet(&verification_buf[..len], from)
                        .await;
                }
            }
        }
    }

    /// Dispatch one datagram from the public socket. Malformed input is
    /// logged and dropped; nothing a peer sends can take the loop down.
    async fn handle_public_packet(&mut self, data: &[u8], from: SocketAddr) {
        let Some((packet_type, payload)) = protocol::split_packet(data) else {
            debug!("short packet from {}", from);
            return;
        };
        match packet_type {
            protocol::MASTER_PACKET_ADD => self.handle_add(from).await,
            protocol::MASTER_PACKET_QUERY => self.handle_query(from).await,
            protocol::MASTER_PACKET_GET_METADATA => self.handle_get_metadata(from).await,
            protocol::MASTER_PACKET_SIGN_START => self.handle_sign_start(from).await,
            protocol::MASTER_PACKET_SIGN_END => self.handle_sign_end(payload, from).await,
            protocol::MASTER_PACKET_NAT_HOLE_PUNCH => {
                self.handle_hole_punch(payload, from).await;
            }
            protocol::MASTER_PACKET_NAT_HOLE_PUNCH_ALL => {
                self.handle_hole_punch_all(from).await;
            }
            other => debug!("unexpected packet type {} from {}", other, from),
        }
    }

    /// Dispatch one datagram from the verification socket. Only game
    /// servers answering our queries talk to this socket.
    async fn handle_verification_packet(&mut self, data: &[u8], from: SocketAddr) {
        let Some((packet_type, payload)) = protocol::split_packet(data) else {
            debug!("short packet on verification socket from {}", from);
            return;
        };
        match packet_type {
            protocol::GAME_PACKET_QUERY_RESPONSE => self.handle_query_response(payload, from).await,
            protocol::GAME_PACKET_NAT_HOLE_PUNCH => self.handle_punch_acknowledged(from).await,
            other => debug!(
                "unexpected packet type {} on verification socket from {}",
                other, from
            ),
        }
    }

    async fn handle_add(&mut self, from: SocketAddr) {
        if self.ban_list.is_blocked(from) {
            self.log.write(Some(from), "add request from banned address").await;
            return;
        }

        let now = Instant::now();
        let is_new = !self.directory.contains(from);
        let metadata_refresh = self.metadata_refresh;
        let verified = {
            let record = self.directory.upsert(from, now);
            if record.verified && record.metadata_stale(now, metadata_refresh) {
                // Expose the server again only after a fresh query.
                record.verified = false;
                record.needs_hole_punch = false;
            }
            record.verified
        };

        if verified {
            self.send_add_response(from, true).await;
        } else {
            if is_new {
                self.log.write(Some(from), "add request from new server").await;
            }
            self.send_verification_query(from).await;
        }
    }

    async fn handle_query(&mut self, from: SocketAddr) {
        self.log.write(Some(from), "query").await;
        let strings: Vec<String> = self
            .directory
            .verified_snapshot()
            .map(|r| r.addr.to_string())
            .collect();
        for chunk in protocol::chunk_strings(&strings, protocol::MAX_RESPONSE_LEN) {
            let packet = protocol::build_packet(protocol::MASTER_PACKET_QUERY_RESPONSE, &chunk);
            self.send_public(&packet, from).await;
        }
    }

    async fn handle_get_metadata(&mut self, from: SocketAddr) {
        self.log.write(Some(from), "metadata query").await;
        let now = Instant::now();
        let strings: Vec<String> = self
            .directory
            .verified_snapshot()
            .filter_map(|r| r.metadata.as_ref().map(|m| m.to_json(r.age_secs(now))))
            .collect();
        for chunk in protocol::chunk_strings(&strings, protocol::MAX_RESPONSE_LEN) {
            let packet =
                protocol::build_packet(protocol::MASTER_PACKET_GET_METADATA_RESPONSE, &chunk);
            self.send_public(&packet, from).await;
        }
    }

    async fn handle_sign_start(&mut self, from: SocketAddr) {
        let result = match self.signer.as_mut() {
            Some(signer) => signer.sign_start(),
            None => {
                debug!("sign start from {} but signing is disabled", from);
                return;
            }
        };
        match result {
            Ok((nonce, message)) => {
                self.log
                    .write(
                        Some(from),
                        &format!("signed start message issued, nonce {}", hex::encode(nonce)),
                    )
                    .await;
                let mut payload = nonce.to_vec();
                payload.extend_from_slice(&message);
                let packet =
                    protocol::build_packet(protocol::MASTER_PACKET_SIGN_START_RESPONSE, &payload);
                self.send_public(&packet, from).await;
            }
            Err(e) => warn!("sign start failed: {}", e),
        }
    }

    async fn handle_sign_end(&mut self, payload: &[u8], from: SocketAddr) {
        if self.signer.is_none() {
            debug!("sign end from {} but signing is disabled", from);
            return;
        }
        if payload.len() < protocol::DEMO_HASH_LEN {
            self.log.write(Some(from), "sign end request too short").await;
            return;
        }
        let (demo_hash, start_message) = payload.split_at(protocol::DEMO_HASH_LEN);

        let signed = self
            .signer
            .as_mut()
            .and_then(|s| s.sign_end(start_message, demo_hash));
        match signed {
            Some(message) => {
                self.log.write(Some(from), "signed end message issued").await;
                let packet =
                    protocol::build_packet(protocol::MASTER_PACKET_SIGN_END_RESPONSE, &message);
                self.send_public(&packet, from).await;
            }
            None => {
                self.log
                    .write(Some(from), "sign end request with invalid start message")
                    .await;
            }
        }
    }

    async fn handle_hole_punch(&mut self, payload: &[u8], from: SocketAddr) {
        let Some((target, _)) = protocol::read_string(payload) else {
            debug!("unterminated hole punch target from {}", from);
            return;
        };
        let Some(target_addr) = protocol::parse_target_addr(target) else {
            self.log
                .write(Some(from), &format!("hole punch request for bad address '{}'", target))
                .await;
            return;
        };
        self.forward_hole_punch(target_addr, from).await;
    }

    async fn handle_hole_punch_all(&mut self, from: SocketAddr) {
        let targets: Vec<SocketAddr> = self
            .directory
            .all_snapshot()
            .filter(|r| r.needs_hole_punch)
            .map(|r| r.addr)
            .collect();
        for target in targets {
            self.send_hole_punch(target, from).await;
        }
    }

    /// Forward a client's address to a NAT-encumbered server so the server
    /// can open a pinhole back to the client. Nothing is sent back to the
    /// client; its next move is to contact the server directly.
    async fn forward_hole_punch(&mut self, target: SocketAddr, client: SocketAddr) {
        let needs_punch = match self.directory.get(target) {
            Some(record) => record.needs_hole_punch,
            None => {
                self.log
                    .write(Some(client), &format!("hole punch request for unknown server {}", target))
                    .await;
                return;
            }
        };
        if needs_punch {
            self.send_hole_punch(target, client).await;
        }
    }

    /// A QUERY_RESPONSE on the verification socket is the reachability
    /// proof: cache the metadata and promote the record.
    async fn handle_query_response(&mut self, payload: &[u8], from: SocketAddr) {
        if !self.directory.contains(from) {
            debug!("query response from unknown address {}", from);
            return;
        }
        let Some(info) = protocol::parse_query_info(payload) else {
            self.log.write(Some(from), "malformed query response").await;
            return;
        };

        let now = Instant::now();
        let newly_verified = {
            let Some(record) = self.directory.get_mut(from) else {
                return;
            };
            record.metadata = Some(ServerMetadata {
                version: info.version,
                max_players: info.max_players,
                name: info.name,
                address: from.ip().to_string(),
                port: from.port(),
            });
            record.metadata_time = Some(now);
            if record.verified {
                false
            } else {
                record.verified = true;
                true
            }
        };

        if newly_verified {
            self.log.write(Some(from), "server verified").await;
            self.send_add_response(from, true).await;
        }
    }

    /// The server acknowledged our hole-punch request; the pinhole back to
    /// the verification socket should now be open, so query again.
    async fn handle_punch_acknowledged(&mut self, from: SocketAddr) {
        let retry = self
            .directory
            .get(from)
            .map(|r| !r.verified && r.needs_hole_punch)
            .unwrap_or(false);
        if retry {
            self.send_verification_query(from).await;
        }
    }

    /// Sweep the directory once: drop servers whose heartbeat went silent,
    /// escalate unverified ones to hole punching after two seconds and
    /// reject them after five.
    pub(crate) async fn age_servers(&mut self, now: Instant) {
        for addr in self.directory.addrs() {
            let (refresh_time, verified, needs_hole_punch) = match self.directory.get(addr) {
                Some(r) => (r.refresh_time, r.verified, r.needs_hole_punch),
                None => continue,
            };
            let silent = now.saturating_duration_since(refresh_time);

            if silent > self.server_timeout {
                self.directory.remove(addr);
                self.log.write(Some(addr), "no heartbeat; removing").await;
                continue;
            }
            if verified {
                continue;
            }
            if let Some(advertised) = self.query_public_addr {
                if !needs_hole_punch && silent > HOLE_PUNCH_AFTER {
                    if let Some(record) = self.directory.get_mut(addr) {
                        record.needs_hole_punch = true;
                    }
                    self.log
                        .write(Some(addr), "no response to query; requesting hole punch")
                        .await;
                    self.send_hole_punch(addr, advertised).await;
                }
            }
            if silent > VERIFY_DEADLINE {
                self.send_add_response(addr, false).await;
                self.directory.remove(addr);
                self.log
                    .write(Some(addr), "failed to respond to query; removing")
                    .await;
            }
        }
    }

    /// Query the server from the verification socket. Answering proves the
    /// server is reachable from an address it has never talked to.
    async fn send_verification_query(&self, to: SocketAddr) {
        let Some(socket) = &self.query_socket else {
            return;
        };
        let packet = protocol::build_packet(protocol::GAME_PACKET_QUERY, &[]);
        if let Err(e) = socket.send_to(&packet, to).await {
            warn!("verification query to {} failed: {}", to, e);
        }
    }

    async fn send_add_response(&self, to: SocketAddr, success: bool) {
        let flag: u16 = success.into();
        let packet =
            protocol::build_packet(protocol::MASTER_PACKET_ADD_RESPONSE, &flag.to_be_bytes());
        self.send_public(&packet, to).await;
    }

    /// Tell `to` to send a datagram to `punch_target`, opening a return
    /// pinhole in its NAT.
    async fn send_hole_punch(&self, to: SocketAddr, punch_target: SocketAddr) {
        let mut payload = Vec::new();
        protocol::put_string(&mut payload, &punch_target.to_string());
        let packet = protocol::build_packet(protocol::MASTER_PACKET_NAT_HOLE_PUNCH, &payload);
        self.send_public(&packet, to).await;
    }

    async fn send_public(&self, packet: &[u8], to: SocketAddr) {
        if let Err(e) = self.public_socket.send_to(packet, to).await {
            warn!("send to {} failed: {}", to, e);
        }
    }
}
