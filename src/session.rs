//! Per-connection session state (spec §3, §4.4, §4.5).
//!
//! Mirrors the teacher's `Conn`: a last-access instant for the reaper,
//! mutable connection metadata behind one lock, and a monotonic counter for
//! outgoing sequence numbers. Unlike the teacher, this crate's atomic
//! counters are reachable from multiple tasks concurrently (hub dispatch,
//! a client/server receive loop, a writer), so `Session` is always held as
//! `Arc<Session>`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::crypto::Keypair;

/// Capacity of the per-session inbound queue (spec §5, Buffers).
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Connection state. Transitions only move forward through this list;
/// `set_state` silently ignores an attempt to move backward (spec §3:
/// "monotonic transitions only").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Handshake,
    Active,
    Closing,
    Closed,
}

struct Mutable {
    remote: SocketAddr,
    state: State,
    last_active: Instant,
}

/// Server-side (or client-side) per-connection state. One `Session` exists
/// per live CID; the hub looks sessions up by CID and the endpoint's
/// receive loop touches them on every valid inbound datagram.
pub struct Session {
    pub cid: Vec<u8>,
    mutable: Mutex<Mutable>,

    /// Outgoing packet-number counter. A single fetch-and-add per send, per
    /// spec §5's ordering guarantee. Widened to 64 bits so the fetch-add
    /// itself never wraps; `next_send_pkt_num` refuses once the value would
    /// no longer fit in the wire's 32-bit field (spec §4.3, §9).
    send_pkt_num: AtomicU64,
    /// Highest packet number seen from the peer. Advisory only — this
    /// transport tolerates loss and reorder and does not reject on it.
    highest_received_pkt_num: AtomicU32,

    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],

    /// Server-held keypair, retained so a retransmitted ClientHello gets an
    /// identical ServerHello reply instead of a fresh key agreement.
    pub keypair: Keypair,
    last_server_hello: Mutex<Option<Vec<u8>>>,

    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl Session {
    pub fn new(
        cid: Vec<u8>,
        remote: SocketAddr,
        now: Instant,
        keypair: Keypair,
        send_key: [u8; 32],
        recv_key: [u8; 32],
    ) -> Session {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        Session {
            cid,
            mutable: Mutex::new(Mutable {
                remote,
                state: State::Handshake,
                last_active: now,
            }),
            send_pkt_num: AtomicU64::new(0),
            highest_received_pkt_num: AtomicU32::new(0),
            send_key,
            recv_key,
            keypair,
            last_server_hello: Mutex::new(None),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.mutable.lock().expect("session mutex poisoned").remote
    }

    pub fn state(&self) -> State {
        self.mutable.lock().expect("session mutex poisoned").state
    }

    /// Moves to `new_state` if it is strictly further along than the
    /// current state; otherwise a no-op.
    pub fn set_state(&self, new_state: State) {
        let mut m = self.mutable.lock().expect("session mutex poisoned");
        if new_state > m.state {
            m.state = new_state;
        }
    }

    pub fn last_active(&self) -> Instant {
        self.mutable.lock().expect("session mutex poisoned").last_active
    }

    pub fn touch(&self, now: Instant) {
        self.mutable.lock().expect("session mutex poisoned").last_active = now;
    }

    /// Connection migration: if `addr` differs from the recorded remote,
    /// rebind and touch last-active; returns whether a rebind happened
    /// (spec §4.5 step 4).
    pub fn migrate_if_needed(&self, addr: SocketAddr, now: Instant) -> bool {
        let mut m = self.mutable.lock().expect("session mutex poisoned");
        m.last_active = now;
        if m.remote != addr {
            m.remote = addr;
            true
        } else {
            false
        }
    }

    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.duration_since(self.last_active()) >= idle_timeout
    }

    /// Fetch-and-add the outgoing packet-number counter. The counter itself
    /// is 64-bit so the underlying `fetch_add` never wraps; once the handed
    /// value would no longer fit in the wire's 32-bit packet-number field,
    /// this returns `None` instead of truncating. A (key, nonce) pair is
    /// never reused under the same session keys — callers must tear the
    /// session down rather than send (spec §4.3, §9).
    pub fn next_send_pkt_num(&self) -> Option<u32> {
        let prev = self.send_pkt_num.fetch_add(1, Ordering::SeqCst);
        u32::try_from(prev).ok()
    }

    /// Seed the counter's next value (used after ServerHello is sent at
    /// pn=1, so the first Data packet is pn=2; spec §4.4).
    pub fn set_next_send_pkt_num(&self, next: u32) {
        self.send_pkt_num.store(next as u64, Ordering::SeqCst);
    }

    pub fn note_received_pkt_num(&self, pn: u32) {
        self.highest_received_pkt_num.fetch_max(pn, Ordering::SeqCst);
    }

    pub fn highest_received_pkt_num(&self) -> u32 {
        self.highest_received_pkt_num.load(Ordering::SeqCst)
    }

    /// Push a decrypted chunk to the inbound queue. Non-blocking: drops and
    /// returns `false` if the queue is full (spec §4.5 step 5, Data).
    pub fn push_inbound(&self, data: Vec<u8>) -> bool {
        self.inbound_tx.try_send(data).is_ok()
    }

    /// Blocks until a chunk is available or the sender half is dropped
    /// (session closed), used by the session-scoped reader view.
    pub async fn recv_inbound(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().await.recv().await
    }

    pub fn store_server_hello(&self, wire: Vec<u8>) {
        *self.last_server_hello.lock().expect("session mutex poisoned") = Some(wire);
    }

    pub fn last_server_hello(&self) -> Option<Vec<u8>> {
        self.last_server_hello
            .lock()
            .expect("session mutex poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    fn sample_session() -> Session {
        Session::new(
            vec![1, 2, 3, 4, 5, 6, 7, 8],
            addr(1000),
            Instant::now(),
            Keypair::generate(),
            [1u8; 32],
            [2u8; 32],
        )
    }

    #[test]
    fn state_transitions_are_monotonic() {
        let s = sample_session();
        assert_eq!(s.state(), State::Handshake);
        s.set_state(State::Active);
        assert_eq!(s.state(), State::Active);
        s.set_state(State::Handshake); // attempted regression
        assert_eq!(s.state(), State::Active);
        s.set_state(State::Closed);
        assert_eq!(s.state(), State::Closed);
    }

    #[test]
    fn migration_rebinds_and_reports_change() {
        let s = sample_session();
        let now = Instant::now();
        assert!(!s.migrate_if_needed(addr(1000), now));
        assert!(s.migrate_if_needed(addr(2000), now));
        assert_eq!(s.remote(), addr(2000));
    }

    #[test]
    fn send_pkt_num_increments_monotonically() {
        let s = sample_session();
        assert_eq!(s.next_send_pkt_num(), Some(0));
        assert_eq!(s.next_send_pkt_num(), Some(1));
        s.set_next_send_pkt_num(10);
        assert_eq!(s.next_send_pkt_num(), Some(10));
        assert_eq!(s.next_send_pkt_num(), Some(11));
    }

    #[test]
    fn send_pkt_num_refuses_to_wrap_at_u32_max() {
        let s = sample_session();
        s.set_next_send_pkt_num(u32::MAX);
        assert_eq!(s.next_send_pkt_num(), Some(u32::MAX));
        assert_eq!(s.next_send_pkt_num(), None);
        // still None on subsequent calls; the counter never wraps to 0.
        assert_eq!(s.next_send_pkt_num(), None);
    }

    #[test]
    fn highest_received_tracks_the_max() {
        let s = sample_session();
        s.note_received_pkt_num(5);
        s.note_received_pkt_num(2);
        s.note_received_pkt_num(9);
        assert_eq!(s.highest_received_pkt_num(), 9);
    }

    #[tokio::test]
    async fn inbound_queue_drops_when_full() {
        let s = sample_session();
        for i in 0..INBOUND_QUEUE_CAPACITY {
            assert!(s.push_inbound(vec![i as u8]), "push {i} should succeed");
        }
        assert!(!s.push_inbound(vec![0xFF]), "queue should now be full");

        let first = s.recv_inbound().await.unwrap();
        assert_eq!(first, vec![0u8]);
    }

    #[test]
    fn server_hello_round_trips() {
        let s = sample_session();
        assert!(s.last_server_hello().is_none());
        s.store_server_hello(vec![9, 9, 9]);
        assert_eq!(s.last_server_hello(), Some(vec![9, 9, 9]));
    }

    #[test]
    fn is_idle_respects_timeout() {
        let s = sample_session();
        let now = s.last_active();
        assert!(!s.is_idle(now, Duration::from_secs(30)));
        let later = now + Duration::from_secs(31);
        assert!(s.is_idle(later, Duration::from_secs(30)));
    }
}
