//! Client endpoint: dial, handshake, receive loop, keep-alive, chunked
//! write (spec §4.6).
//!
//! The receive loop's `tokio::select!` between socket readiness and a
//! keep-alive timer is the async generalization of the teacher's own
//! `select!` loop in `bin/main.rs` (there: socket-readable vs. an RTT
//! detector timer; here: socket recv vs. a keep-alive interval timer).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use socket2::Socket as Socket2;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::crypto::{self, Keypair};
use crate::error::Error;
use crate::obfuscator::Obfuscator;
use crate::packet::{HandshakePayload, Kind, Packet};
use crate::session::{Session, State};

/// Advisory socket buffer size requested on dial/listen (spec §4.6, §4.7).
/// The OS clamps this to its own maximum when 4 MiB exceeds it.
const SOCKET_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// One read-wake cadence for the receive loop, bounding how quickly the
/// loop notices a close request and ticks keep-alive (spec §5).
const READ_DEADLINE: Duration = Duration::from_secs(1);

fn generate_cid(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut cid = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut cid);
    cid
}

fn configure_socket_buffers(socket: &std::net::UdpSocket) {
    let sock2 = Socket2::from(socket.try_clone().expect("clone std socket for buffer tuning"));
    if let Err(e) = sock2.set_recv_buffer_size(SOCKET_BUFFER_BYTES) {
        warn!("could not raise recv buffer to {SOCKET_BUFFER_BYTES}: {e}");
    }
    if let Err(e) = sock2.set_send_buffer_size(SOCKET_BUFFER_BYTES) {
        warn!("could not raise send buffer to {SOCKET_BUFFER_BYTES}: {e}");
    }
    std::mem::forget(sock2); // the fd is shared with `socket`; don't close it here
}

/// A dialed client connection. Read/write/close mirror the server's
/// `ConnectionView` contract (spec §4.6, §6).
pub struct ClientEndpoint {
    config: Config,
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    session: Arc<Session>,
    obfuscator: Obfuscator,
    closed: AtomicBool,
    last_send: Mutex<Instant>,
}

impl ClientEndpoint {
    /// Opens a connected UDP socket, runs the one-round-trip handshake, and
    /// spawns the receive loop (spec §4.6).
    pub async fn dial(destination: SocketAddr, config: Config) -> Result<Arc<ClientEndpoint>, Error> {
        let config = config.validate();

        let std_socket = std::net::UdpSocket::bind(match destination {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        })
        .map_err(Error::Socket)?;
        configure_socket_buffers(&std_socket);
        std_socket.set_nonblocking(true).map_err(Error::Socket)?;
        std_socket.connect(destination).map_err(Error::Socket)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket).map_err(Error::Socket)?);

        let cid = generate_cid(config.connection_id_length as usize);
        let keypair = Keypair::generate();
        let obfuscator = Obfuscator::from_config(config.obfuscation);

        let hello = HandshakePayload::new(keypair.public_bytes());
        let hello_packet = Packet::new(Kind::Handshake, cid.clone(), 0, hello.encode().to_vec())
            .with_padding(true);
        let hello_encoded = hello_packet.encode(
            config.connection_id_length as usize,
            config.enable_padding,
            config.padding_min,
            config.padding_max,
        )?;
        let hello_wire = obfuscator.wrap(&hello_encoded).map_err(|_| Error::ConfigInvalid("obfuscator wrap failed"))?;

        socket.send(&hello_wire).await.map_err(Error::Socket)?;
        debug!("ClientHello sent, cid={}", hex::encode(&cid));

        let server_hello = tokio::time::timeout(config.handshake_timeout(), recv_server_hello(&socket, &obfuscator, &config, &cid))
            .await
            .map_err(|_| Error::HandshakeTimeout)??;

        let shared = keypair
            .diffie_hellman(&server_hello.public_key)
            .map_err(|_| Error::LowOrderPoint)?;
        let keys = crypto::derive_session_keys(&shared, &config.psk, true);

        let session = Arc::new(Session::new(
            cid,
            destination,
            Instant::now(),
            keypair,
            keys.send,
            keys.recv,
        ));
        session.set_next_send_pkt_num(1);
        session.set_state(State::Active);
        info!("handshake complete, session active");

        let endpoint = Arc::new(ClientEndpoint {
            config,
            socket,
            remote: destination,
            session,
            obfuscator,
            closed: AtomicBool::new(false),
            last_send: Mutex::new(Instant::now()),
        });

        tokio::spawn(endpoint.clone().run_receive_loop());

        Ok(endpoint)
    }

    /// Blocks until the next chunk of decrypted application bytes arrives,
    /// or `None` once the session is closed.
    pub async fn read(&self) -> Option<Vec<u8>> {
        self.session.recv_inbound().await
    }

    /// Chunks `data` into `max_payload`-sized windows, encrypts and sends
    /// each as its own datagram. On error, returns the number of plaintext
    /// bytes already handed to the socket (spec §4.6).
    pub async fn write(&self, data: &[u8]) -> Result<usize, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let max_payload = self.config.max_payload();
        let mut sent = 0;
        for chunk in data.chunks(max_payload.max(1)) {
            match self.send_chunk(chunk).await {
                Ok(()) => sent += chunk.len(),
                Err(e) => return if sent > 0 { Ok(sent) } else { Err(e) },
            }
        }
        *self.last_send.lock().await = Instant::now();
        Ok(sent)
    }

    /// Returns the next outgoing packet number, or tears the session down
    /// and returns `None` if the counter is exhausted at `u32::MAX` — a
    /// (key, nonce) pair must never be reused under the same session keys
    /// (spec §4.3, §9).
    fn next_pkt_num_or_teardown(&self) -> Option<u32> {
        match self.session.next_send_pkt_num() {
            Some(pn) => Some(pn),
            None => {
                warn!("packet-number counter exhausted, tearing down session");
                self.session.set_state(State::Closed);
                self.closed.store(true, Ordering::Release);
                None
            }
        }
    }

    async fn send_chunk(&self, chunk: &[u8]) -> Result<(), Error> {
        let cid_len = self.config.connection_id_length as usize;
        let Some(pn) = self.next_pkt_num_or_teardown() else {
            return Err(Error::Closed);
        };
        let header_only = Packet::new(Kind::Data, self.session.cid.clone(), pn, vec![])
            .encode(cid_len, false, self.config.padding_min, self.config.padding_max)?;
        let aad = Packet::aad(&header_only, cid_len);
        let ciphertext = crypto::seal(&self.session.send_key, pn, aad, chunk)?;
        let packet = Packet::new(Kind::Data, self.session.cid.clone(), pn, ciphertext);
        let encoded = packet.encode(
            cid_len,
            self.config.enable_padding,
            self.config.padding_min,
            self.config.padding_max,
        )?;
        let wire = self
            .obfuscator
            .wrap(&encoded)
            .map_err(|_| Error::ConfigInvalid("obfuscator wrap failed"))?;
        self.socket.send(&wire).await.map_err(Error::Socket)?;
        Ok(())
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Emits a Control-Close and marks the endpoint closed. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cid_len = self.config.connection_id_length as usize;
        if let Some(pn) = self.session.next_send_pkt_num() {
            let packet = Packet::new(Kind::Control, self.session.cid.clone(), pn, vec![0x00]);
            if let Ok(encoded) = packet.encode(cid_len, self.config.enable_padding, self.config.padding_min, self.config.padding_max) {
                if let Ok(wire) = self.obfuscator.wrap(&encoded) {
                    let _ = self.socket.send(&wire).await;
                }
            }
        }
        self.session.set_state(State::Closed);
    }

    async fn run_receive_loop(self: Arc<Self>) {
        let cid_len = self.config.connection_id_length as usize;
        let mut buf = vec![0u8; 65535];

        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }

            let keepalive = self.config.keepalive_interval();
            match tokio::time::timeout(READ_DEADLINE, self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) => {
                    self.handle_datagram(&buf[..n], cid_len).await;
                }
                Ok(Err(e)) => {
                    warn!("client recv error: {e}");
                }
                Err(_) => {
                    // read deadline elapsed: observe close, tick keep-alive.
                    if let Some(interval) = keepalive {
                        let elapsed = self.last_send.lock().await.elapsed();
                        if elapsed >= interval {
                            self.send_keepalive().await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], cid_len: usize) {
        let encoded = match self.obfuscator.unwrap(datagram, cid_len) {
            Ok(e) => e,
            Err(_) => return,
        };
        if encoded.is_empty() || !crate::packet::is_quic_like(encoded[0]) {
            return;
        }
        let packet = match Packet::decode(&encoded, cid_len) {
            Ok(p) => p,
            Err(_) => return,
        };

        self.session.touch(Instant::now());
        self.session.note_received_pkt_num(packet.pkt_num);

        match packet.kind {
            Kind::Data => {
                let header_only = match Packet::new(Kind::Data, packet.cid.clone(), packet.pkt_num, vec![])
                    .encode(cid_len, false, self.config.padding_min, self.config.padding_max)
                {
                    Ok(h) => h,
                    Err(_) => return,
                };
                let aad = Packet::aad(&header_only, cid_len);
                match crypto::open(&self.session.recv_key, packet.pkt_num, aad, &packet.payload) {
                    Ok(plaintext) => {
                        if !self.session.push_inbound(plaintext) {
                            trace!("client inbound queue full, dropping datagram");
                        }
                    }
                    Err(_) => trace!("client AEAD auth failure, dropping datagram"),
                }
            }
            Kind::KeepAlive => {
                trace!("keep-alive received");
            }
            Kind::Control => match packet.payload.first() {
                Some(0x00) => {
                    info!("server closed the session");
                    self.session.set_state(State::Closed);
                    self.closed.store(true, Ordering::Release);
                }
                Some(0x01) => {
                    if let Some(pn) = self.next_pkt_num_or_teardown() {
                        let pong = Packet::new(Kind::Control, self.session.cid.clone(), pn, vec![0x02]);
                        if let Ok(encoded) = pong.encode(cid_len, self.config.enable_padding, self.config.padding_min, self.config.padding_max) {
                            if let Ok(wire) = self.obfuscator.wrap(&encoded) {
                                let _ = self.socket.send(&wire).await;
                            }
                        }
                    }
                }
                _ => {
                    // 0x02 (Pong) or anything unrecognized: an RTT sample
                    // point, ignored at this layer (mirrors hub semantics).
                }
            },
            Kind::Handshake => {
                // Idempotent retransmit of a ServerHello the client already
                // processed; nothing further to do post-handshake.
            }
        }
    }

    async fn send_keepalive(&self) {
        let cid_len = self.config.connection_id_length as usize;
        let Some(pn) = self.next_pkt_num_or_teardown() else {
            return;
        };
        let packet = Packet::new(Kind::KeepAlive, self.session.cid.clone(), pn, vec![]);
        if let Ok(encoded) = packet.encode(cid_len, self.config.enable_padding, self.config.padding_min, self.config.padding_max) {
            if let Ok(wire) = self.obfuscator.wrap(&encoded) {
                if self.socket.send(&wire).await.is_ok() {
                    *self.last_send.lock().await = Instant::now();
                    trace!("keep-alive sent");
                }
            }
        }
    }
}

async fn recv_server_hello(
    socket: &UdpSocket,
    obfuscator: &Obfuscator,
    config: &Config,
    expected_cid: &[u8],
) -> Result<HandshakePayload, Error> {
    let cid_len = config.connection_id_length as usize;
    let mut buf = vec![0u8; 65535];
    loop {
        let n = socket.recv(&mut buf).await.map_err(Error::Socket)?;
        let encoded = match obfuscator.unwrap(&buf[..n], cid_len) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if encoded.is_empty() || !crate::packet::is_quic_like(encoded[0]) {
            continue;
        }
        let packet = match Packet::decode(&encoded, cid_len) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if packet.kind != Kind::Handshake || packet.cid != expected_cid {
            continue;
        }
        return HandshakePayload::decode(&packet.payload).map_err(Error::BadPacket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cid_has_configured_length() {
        let cid = generate_cid(8);
        assert_eq!(cid.len(), 8);
    }

    #[test]
    fn generated_cids_are_distinct() {
        let a = generate_cid(8);
        let b = generate_cid(8);
        assert_ne!(a, b);
    }
}
