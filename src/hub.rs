//! Server-side `{CID -> Session}` table, handshake intake, idle reaping, and
//! the `route_packet` dispatch entrypoint (spec §4.5).
//!
//! Generalizes the teacher's `PEMI` struct in `lib.rs`: a `HashMap` keyed by
//! connection identity plus a `BinaryHeap` of access times so the reaper
//! never scans the whole table. The teacher keys by 4-tuple and owns the
//! table single-threaded from one receive loop; this crate keys by CID
//! bytes and shares the table across tasks behind a `tokio::sync::RwLock`,
//! since `route_packet` must run concurrently with the reaper.

use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::crypto::{self, Keypair};
use crate::obfuscator::Obfuscator;
use crate::packet::{HandshakePayload, Kind, Packet};
use crate::scheduler::Scheduler;
use crate::session::{Session, State};

/// Minimum bytes any routable datagram must decode from, post-obfuscation
/// unwrap: the codec's own minimum header length (spec §4.5 step 1).
fn min_packet_size(cid_len: usize) -> usize {
    1 + 4 + cid_len + 4 + 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    ShortPacket,
    NotQuicLike,
    UnknownCid,
    BadPacket,
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for RouteError {}

/// Cumulative counters exposed read-only via `Hub::stats`. Matches the
/// teacher's own `Stats` struct shape (plain fields, a `snapshot` reader)
/// made safe for concurrent access with atomics instead of single-owner
/// mutation.
#[derive(Default)]
struct Counters {
    sessions_created: AtomicU64,
    sessions_reaped: AtomicU64,
    auth_failures: AtomicU64,
    inbound_full_drops: AtomicU64,
    active_sessions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub sessions_created: u64,
    pub sessions_reaped: u64,
    pub auth_failures: u64,
    pub inbound_full_drops: u64,
    pub active_sessions: u64,
}

/// Access time entry for the reaper's min-heap, mirroring the teacher's
/// `AccessTime(Instant, ConnId)` with a reversed `Ord` so the oldest entry
/// sits at the heap's top.
#[derive(Eq, PartialEq)]
struct AccessTime(Instant, Vec<u8>);

impl Ord for AccessTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for AccessTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Single process-wide per-listener state (spec §3, Hub).
pub struct Hub {
    config: Config,
    socket: Arc<UdpSocket>,
    obfuscator: Obfuscator,
    table: RwLock<HashMap<Vec<u8>, Arc<Session>>>,
    access_times: tokio::sync::Mutex<BinaryHeap<AccessTime>>,
    counters: Counters,
    on_new_session: Box<dyn Fn(Arc<Session>) + Send + Sync>,
    /// Priority-queued send side (spec §4.8). Application Data sent via
    /// `send_to_session` is classified and enqueued here; `run_send_loop`
    /// drains it to the socket in priority order.
    scheduler: Arc<Scheduler>,
}

impl Hub {
    pub fn new(
        config: Config,
        socket: Arc<UdpSocket>,
        on_new_session: Box<dyn Fn(Arc<Session>) + Send + Sync>,
    ) -> Arc<Hub> {
        let obfuscator = Obfuscator::from_config(config.obfuscation);
        let scheduler = Scheduler::new(config.priority);
        Arc::new(Hub {
            config,
            socket,
            obfuscator,
            table: RwLock::new(HashMap::new()),
            access_times: tokio::sync::Mutex::new(BinaryHeap::new()),
            counters: Counters::default(),
            on_new_session,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_created: self.counters.sessions_created.load(Ordering::Relaxed),
            sessions_reaped: self.counters.sessions_reaped.load(Ordering::Relaxed),
            auth_failures: self.counters.auth_failures.load(Ordering::Relaxed),
            inbound_full_drops: self.counters.inbound_full_drops.load(Ordering::Relaxed),
            active_sessions: self.counters.active_sessions.load(Ordering::Relaxed),
        }
    }

    async fn lookup(&self, cid: &[u8]) -> Option<Arc<Session>> {
        self.table.read().await.get(cid).cloned()
    }

    /// The single dispatch entrypoint for an inbound datagram (spec §4.5).
    pub async fn route_packet(&self, datagram: &[u8], remote: SocketAddr) {
        if let Err(e) = self.route_packet_inner(datagram, remote).await {
            trace!("route_packet dropped a datagram from {remote}: {e}");
        }
    }

    async fn route_packet_inner(
        &self,
        datagram: &[u8],
        remote: SocketAddr,
    ) -> Result<(), RouteError> {
        let cid_len = self.config.connection_id_length as usize;

        let encoded = self
            .obfuscator
            .unwrap(datagram, cid_len)
            .map_err(|_| RouteError::BadPacket)?;

        if encoded.len() < min_packet_size(cid_len) {
            return Err(RouteError::ShortPacket);
        }
        if !crate::packet::is_quic_like(encoded[0]) {
            return Err(RouteError::NotQuicLike);
        }

        let packet = Packet::decode(&encoded, cid_len).map_err(|_| RouteError::BadPacket)?;

        let now = Instant::now();
        let session = match self.lookup(&packet.cid).await {
            Some(s) => {
                if s.migrate_if_needed(remote, now) {
                    info!("session {} migrated to {remote}", hex::encode(&s.cid));
                } else {
                    s.touch(now);
                }
                s
            }
            None => {
                if packet.kind != Kind::Handshake {
                    return Err(RouteError::UnknownCid);
                }
                self.accept_handshake(&packet, remote, &encoded).await?
            }
        };

        self.dispatch(&packet, &encoded, session, remote).await;
        Ok(())
    }

    async fn accept_handshake(
        &self,
        packet: &Packet,
        remote: SocketAddr,
        encoded: &[u8],
    ) -> Result<Arc<Session>, RouteError> {
        let hello = HandshakePayload::decode(&packet.payload).map_err(|_| RouteError::BadPacket)?;

        let keypair = Keypair::generate();
        let shared = match keypair.diffie_hellman(&hello.public_key) {
            Ok(s) => s,
            Err(_) => {
                warn!("rejecting ClientHello from {remote}: low-order ECDH point");
                return Err(RouteError::BadPacket);
            }
        };
        let keys = crypto::derive_session_keys(&shared, &self.config.psk, false);

        let now = Instant::now();
        let session = Arc::new(Session::new(
            packet.cid.clone(),
            remote,
            now,
            keypair,
            keys.send,
            keys.recv,
        ));
        // ServerHello itself is sent with the hardcoded pn=1 below; seed the
        // counter to 2 so the first real send (Data/KeepAlive/Control) gets
        // pn=2, not a duplicate of the ServerHello's own number (spec §4.4).
        session.set_next_send_pkt_num(2);

        let server_hello = HandshakePayload::new(session.keypair.public_bytes());
        let reply = Packet::new(Kind::Handshake, packet.cid.clone(), 1, server_hello.encode().to_vec())
            .with_padding(true);
        let wire = reply
            .encode(
                self.config.connection_id_length as usize,
                self.config.enable_padding,
                self.config.padding_min,
                self.config.padding_max,
            )
            .map_err(|_| RouteError::BadPacket)?;
        session.store_server_hello(wire.clone());
        session.set_state(State::Active);

        self.table.write().await.insert(packet.cid.clone(), session.clone());
        self.access_times
            .lock()
            .await
            .push(AccessTime(now, packet.cid.clone()));

        self.counters.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
        info!("new session {} from {remote}", hex::encode(&packet.cid));

        self.send_wire(&wire, remote).await;
        let _ = encoded;
        (self.on_new_session)(session.clone());
        Ok(session)
    }

    async fn dispatch(
        &self,
        packet: &Packet,
        _encoded: &[u8],
        session: Arc<Session>,
        remote: SocketAddr,
    ) {
        session.note_received_pkt_num(packet.pkt_num);
        match packet.kind {
            Kind::Handshake => {
                if let Some(wire) = session.last_server_hello() {
                    debug!("retransmitting ServerHello to {remote}");
                    self.send_wire(&wire, remote).await;
                }
            }
            Kind::Data => {
                let cid_len = self.config.connection_id_length as usize;
                let wire_without_obfuscation = match packet.encode(
                    cid_len,
                    false,
                    self.config.padding_min,
                    self.config.padding_max,
                ) {
                    Ok(w) => w,
                    Err(_) => return,
                };
                let aad = Packet::aad(&wire_without_obfuscation, cid_len);
                match crypto::open(&session.recv_key, packet.pkt_num, aad, &packet.payload) {
                    Ok(plaintext) => {
                        if !session.push_inbound(plaintext) {
                            self.counters.inbound_full_drops.fetch_add(1, Ordering::Relaxed);
                            trace!("inbound queue full for session {}", hex::encode(&session.cid));
                        }
                    }
                    Err(_) => {
                        self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
                        trace!("AEAD auth failure from {remote}, session survives");
                    }
                }
            }
            Kind::KeepAlive => {
                if let Some(pn) = self.next_pkt_num_or_teardown(&session).await {
                    let reply = Packet::new(Kind::KeepAlive, session.cid.clone(), pn, vec![]);
                    if let Ok(wire) = self.encode_and_wrap(&reply) {
                        self.send_wire(&wire, remote).await;
                    }
                }
            }
            Kind::Control => {
                self.handle_control(&packet.payload, &session, remote).await;
            }
        }
    }

    async fn handle_control(&self, payload: &[u8], session: &Arc<Session>, remote: SocketAddr) {
        match payload.first() {
            Some(0x00) => {
                info!("closing session {} on peer request", hex::encode(&session.cid));
                self.remove_session(&session.cid).await;
            }
            Some(0x01) => {
                if let Some(pn) = self.next_pkt_num_or_teardown(session).await {
                    let reply = Packet::new(Kind::Control, session.cid.clone(), pn, vec![0x02]);
                    if let Ok(wire) = self.encode_and_wrap(&reply) {
                        self.send_wire(&wire, remote).await;
                    }
                }
            }
            _ => {
                // 0x02 (Pong) or anything unrecognized: an RTT sample point,
                // ignored at this layer.
            }
        }
    }

    /// Returns the session's next outgoing packet number, or tears the
    /// session down and returns `None` once the counter is exhausted at
    /// `u32::MAX` — a (key, nonce) pair must never be reused under the same
    /// session keys (spec §4.3, §9).
    async fn next_pkt_num_or_teardown(&self, session: &Arc<Session>) -> Option<u32> {
        match session.next_send_pkt_num() {
            Some(pn) => Some(pn),
            None => {
                warn!(
                    "packet-number counter exhausted for session {}, tearing down",
                    hex::encode(&session.cid)
                );
                self.remove_session(&session.cid).await;
                None
            }
        }
    }

    fn encode_and_wrap(&self, packet: &Packet) -> Result<Vec<u8>, RouteError> {
        let encoded = packet
            .encode(
                self.config.connection_id_length as usize,
                self.config.enable_padding,
                self.config.padding_min,
                self.config.padding_max,
            )
            .map_err(|_| RouteError::BadPacket)?;
        self.obfuscator.wrap(&encoded).map_err(|_| RouteError::BadPacket)
    }

    /// Encrypts and sends an application-data chunk to the session's current
    /// remote endpoint, advancing its packet-number counter (used by the
    /// server's writable session view).
    pub async fn send_to_session(&self, session: &Arc<Session>, chunk: &[u8]) -> std::io::Result<usize> {
        let cid_len = self.config.connection_id_length as usize;
        let Some(pn) = self.next_pkt_num_or_teardown(session).await else {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "packet-number counter exhausted"));
        };
        let packet = Packet::new(Kind::Data, session.cid.clone(), pn, vec![]);
        let header_only = packet
            .encode(cid_len, false, self.config.padding_min, self.config.padding_max)
            .expect("cid length matches configured length");
        let aad = Packet::aad(&header_only, cid_len);
        let ciphertext = crypto::seal(&session.send_key, pn, aad, chunk)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let packet = Packet::new(Kind::Data, session.cid.clone(), pn, ciphertext);
        let encoded = packet
            .encode(cid_len, self.config.enable_padding, self.config.padding_min, self.config.padding_max)
            .expect("cid length matches configured length");
        let wire = self
            .obfuscator
            .wrap(&encoded)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        // Classify by the plaintext chunk size (spec §4.8's bands), but
        // queue the already-wrapped wire bytes so `run_send_loop` only has
        // to hand them to the socket.
        let level = crate::scheduler::classify(self.config.priority, chunk.len());
        self.scheduler
            .enqueue_at(wire, session.clone(), level)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(chunk.len())
    }

    /// Drains the priority scheduler to the socket in the order it
    /// enforces — High first, then the starvation-guarded Medium/Low split
    /// (spec §4.8). Runs for the lifetime of the hub alongside the reaper.
    pub async fn run_send_loop(self: Arc<Self>) {
        loop {
            let packet = self.scheduler.dequeue().await;
            self.send_wire(&packet.payload, packet.session.remote()).await;
        }
    }

    /// Emits a Control-Close to the session's current remote and removes it
    /// from the table (used by the session view's `close`).
    pub async fn close_session(&self, session: &Arc<Session>) {
        session.set_state(State::Closing);
        if let Some(pn) = session.next_send_pkt_num() {
            let reply = Packet::new(Kind::Control, session.cid.clone(), pn, vec![0x00]);
            if let Ok(wire) = self.encode_and_wrap(&reply) {
                self.send_wire(&wire, session.remote()).await;
            }
        }
        self.remove_session(&session.cid).await;
    }

    async fn remove_session(&self, cid: &[u8]) {
        if self.table.write().await.remove(cid).is_some() {
            self.counters.sessions_reaped.fetch_add(1, Ordering::Relaxed);
            self.counters.active_sessions.fetch_sub(1, Ordering::Relaxed);
            info!("session {} removed", hex::encode(cid));
        }
    }

    async fn send_wire(&self, wire: &[u8], remote: SocketAddr) {
        if let Err(e) = self.socket.send_to(wire, remote).await {
            warn!("send_to {remote} failed: {e}");
        }
    }

    /// Runs forever at a fixed 30-second cadence, sweeping sessions idle
    /// past `config.idle_timeout()`. Mirrors the teacher's
    /// `remove_idle_conns`: peek the heap top, check if it's really idle
    /// (re-touched entries get pushed back with a fresh timestamp), pop and
    /// remove only when confirmed idle.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            self.reap_once().await;
        }
    }

    async fn reap_once(&self) {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        let mut to_remove = Vec::new();

        {
            let mut heap = self.access_times.lock().await;
            let table = self.table.read().await;
            loop {
                let Some(AccessTime(_, cid)) = heap.peek() else {
                    break;
                };
                let cid = cid.clone();
                match table.get(&cid) {
                    None => {
                        heap.pop();
                    }
                    Some(session) => {
                        if session.is_idle(now, idle_timeout) {
                            heap.pop();
                            to_remove.push(cid);
                        } else {
                            heap.pop();
                            let last_active = session.last_active();
                            heap.push(AccessTime(last_active, cid));
                            break;
                        }
                    }
                }
            }
        }

        for cid in to_remove {
            debug!("reaping idle session {}", hex::encode(&cid));
            self.remove_session(&cid).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::atomic::AtomicUsize;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    async fn hub_on(port: u16, config: Config) -> Arc<Hub> {
        let socket = Arc::new(UdpSocket::bind(addr(port)).await.unwrap());
        Hub::new(config, socket, Box::new(|_| {}))
    }

    #[tokio::test]
    async fn unknown_cid_data_packet_is_dropped() {
        let hub = hub_on(0, Config::default()).await;
        let pkt = Packet::new(Kind::Data, vec![0xAA; 8], 1, b"x".to_vec());
        let encoded = pkt.encode(8, false, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(9999)).await;
        assert_eq!(hub.stats().sessions_created, 0);
    }

    #[tokio::test]
    async fn handshake_creates_a_session_and_calls_callback() {
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        let socket = Arc::new(UdpSocket::bind(addr(0)).await.unwrap());
        let hub = Hub::new(
            Config::default(),
            socket,
            Box::new(move |_| {
                called2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![1; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();

        hub.route_packet(&wire, addr(5000)).await;
        assert_eq!(hub.stats().sessions_created, 1);
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn migration_updates_remote_without_dropping_session() {
        let hub = hub_on(0, Config::default()).await;
        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![2; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(5001)).await;

        let session = hub.lookup(&[2; 8]).await.unwrap();
        assert_eq!(session.remote(), addr(5001));

        // A KeepAlive from a new source address should migrate the session.
        let ka = Packet::new(Kind::KeepAlive, vec![2; 8], 5, vec![]);
        let encoded_ka = ka.encode(8, false, 40, 200).unwrap();
        let wire_ka = Obfuscator::QuicMimic.wrap(&encoded_ka).unwrap();
        hub.route_packet(&wire_ka, addr(6002)).await;

        assert_eq!(session.remote(), addr(6002));
        assert_eq!(hub.stats().sessions_created, 1);
    }

    #[tokio::test]
    async fn wrong_key_data_packet_bumps_auth_failure_counter() {
        let hub = hub_on(0, Config::default()).await;
        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![4; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(5003)).await;
        assert_eq!(hub.stats().auth_failures, 0);

        // A Data packet sealed under a key the server never derived: the AAD
        // and packet number are well-formed but the AEAD tag cannot verify.
        let bogus_key = [0xEEu8; 32];
        let header_only = Packet::new(Kind::Data, vec![4; 8], 2, vec![])
            .encode(8, false, 40, 200)
            .unwrap();
        let aad = Packet::aad(&header_only, 8);
        let ciphertext = crypto::seal(&bogus_key, 2, aad, b"payload").unwrap();
        let data_pkt = Packet::new(Kind::Data, vec![4; 8], 2, ciphertext);
        let data_encoded = data_pkt.encode(8, false, 40, 200).unwrap();
        let data_wire = Obfuscator::QuicMimic.wrap(&data_encoded).unwrap();
        hub.route_packet(&data_wire, addr(5003)).await;

        assert_eq!(hub.stats().auth_failures, 1);
    }

    #[tokio::test]
    async fn full_inbound_queue_bumps_drop_counter() {
        let hub = hub_on(0, Config::default()).await;
        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![5; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(5004)).await;

        let session = hub.lookup(&[5; 8]).await.unwrap();
        // Saturate the session's inbound queue directly so the next routed
        // Data packet finds it full.
        for i in 0..crate::session::INBOUND_QUEUE_CAPACITY {
            assert!(session.push_inbound(vec![i as u8]));
        }

        let pn = session.next_send_pkt_num().unwrap();
        let header_only = Packet::new(Kind::Data, vec![5; 8], pn, vec![])
            .encode(8, false, 40, 200)
            .unwrap();
        let aad = Packet::aad(&header_only, 8);
        let ciphertext = crypto::seal(&session.recv_key, pn, aad, b"overflow").unwrap();
        let data_pkt = Packet::new(Kind::Data, vec![5; 8], pn, ciphertext);
        let data_encoded = data_pkt.encode(8, false, 40, 200).unwrap();
        let data_wire = Obfuscator::QuicMimic.wrap(&data_encoded).unwrap();
        hub.route_packet(&data_wire, addr(5004)).await;

        assert_eq!(hub.stats().inbound_full_drops, 1);
    }

    #[tokio::test]
    async fn reaper_removes_idle_sessions() {
        let hub = hub_on(0, Config::default()).await;
        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![3; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(5002)).await;
        assert_eq!(hub.stats().active_sessions, 1);

        let session = hub.lookup(&[3; 8]).await.unwrap();
        let past = Instant::now() - hub.config.idle_timeout() - std::time::Duration::from_secs(1);
        session.touch(past);
        {
            let mut heap = hub.access_times.lock().await;
            heap.clear();
            heap.push(AccessTime(past, vec![3; 8]));
        }

        hub.reap_once().await;
        assert_eq!(hub.stats().active_sessions, 0);
        assert!(hub.lookup(&[3; 8]).await.is_none());
    }

    #[tokio::test]
    async fn exhausted_pkt_num_counter_tears_session_down_instead_of_wrapping() {
        let hub = hub_on(0, Config::default()).await;
        let client_kp = Keypair::generate();
        let hello = HandshakePayload::new(client_kp.public_bytes());
        let pkt = Packet::new(Kind::Handshake, vec![6; 8], 0, hello.encode().to_vec()).with_padding(true);
        let encoded = pkt.encode(8, true, 40, 200).unwrap();
        let wire = Obfuscator::QuicMimic.wrap(&encoded).unwrap();
        hub.route_packet(&wire, addr(5005)).await;

        let session = hub.lookup(&[6; 8]).await.unwrap();
        session.set_next_send_pkt_num(u32::MAX);

        // pn=u32::MAX itself is still a legal send; the session only tears
        // down once the *next* one would no longer fit the wire field.
        assert!(hub.send_to_session(&session, b"last legal send").await.is_ok());
        assert!(hub.lookup(&[6; 8]).await.is_some());

        let err = hub.send_to_session(&session, b"one byte too many").await;
        assert!(err.is_err());
        assert!(hub.lookup(&[6; 8]).await.is_none());
    }
}
