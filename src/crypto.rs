//! X25519 key agreement, HKDF-SHA256 key schedule, and ChaCha20-Poly1305
//! AEAD (spec §4.3).
//!
//! Keypair handling follows the pack's `summit-core` crypto module:
//! `x25519-dalek`'s `StaticSecret`/`PublicKey` own the RFC 7748 clamp
//! internally, so this module never touches scalar bytes directly.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

const SALT_BASE: &[u8] = b"GameTunnel-v1-salt";
const INFO_CLIENT_TO_SERVER: &[u8] = b"gametunnel client-to-server";
const INFO_SERVER_TO_CLIENT: &[u8] = b"gametunnel server-to-client";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The ECDH result was the all-zero low-order point.
    LowOrderPoint,
    /// A public key byte slice was not exactly 32 bytes.
    BadPublicKeyLength,
    /// HKDF expand asked for more output than RFC 5869 allows (never
    /// happens at the 32-byte lengths this module uses; kept for
    /// completeness of the error type).
    HkdfExpand,
    /// AEAD tag verification failed, or the ciphertext was too short to
    /// contain a tag. Tampering, a wrong key, wrong packet number, and a
    /// wrong AAD all collapse to this single kind (spec §4.3).
    AuthFailed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::LowOrderPoint => write!(f, "ECDH produced an all-zero shared secret"),
            Error::BadPublicKeyLength => write!(f, "public key is not 32 bytes"),
            Error::HkdfExpand => write!(f, "HKDF expand output length is invalid"),
            Error::AuthFailed => write!(f, "AEAD authentication failed"),
        }
    }
}

impl std::error::Error for Error {}

/// A local X25519 keypair. Servers hold one of these for the lifetime of a
/// session so a retransmitted ClientHello gets an identical ServerHello
/// reply instead of a fresh key agreement (spec §3, §4.4).
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Keypair { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// ECDH against a peer's public key bytes. Rejects the all-zero
    /// low-order result (spec §4.3).
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> Result<[u8; 32], Error> {
        let their_public = PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        if !shared.was_contributory() || shared.as_bytes() == &[0u8; 32] {
            return Err(Error::LowOrderPoint);
        }
        Ok(*shared.as_bytes())
    }
}

/// The two directional keys a completed handshake yields. `send == recv`
/// never holds for a correctly derived pair; `client.send == server.recv`
/// and `client.recv == server.send` across the two endpoints (spec §3).
#[derive(Clone)]
pub struct SessionKeys {
    pub send: [u8; 32],
    pub recv: [u8; 32],
}

/// HKDF-SHA256 extract-then-expand over the ECDH shared secret (spec
/// §4.3). `is_client` selects which of the two expansions becomes `send`
/// versus `recv`.
pub fn derive_session_keys(shared_secret: &[u8; 32], psk: &str, is_client: bool) -> SessionKeys {
    let mut salt = SALT_BASE.to_vec();
    if !psk.is_empty() {
        salt.extend_from_slice(&Sha256::digest(psk.as_bytes()));
    }

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut client_to_server = [0u8; 32];
    hk.expand(INFO_CLIENT_TO_SERVER, &mut client_to_server)
        .expect("32 is a valid HKDF-SHA256 expand length");

    let mut server_to_client = [0u8; 32];
    hk.expand(INFO_SERVER_TO_CLIENT, &mut server_to_client)
        .expect("32 is a valid HKDF-SHA256 expand length");

    if is_client {
        SessionKeys {
            send: client_to_server,
            recv: server_to_client,
        }
    } else {
        SessionKeys {
            send: server_to_client,
            recv: client_to_server,
        }
    }
}

/// 12-byte nonce: eight zero bytes followed by the big-endian packet
/// number (spec §4.3).
fn nonce_for(pkt_num: u32) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[8..].copy_from_slice(&pkt_num.to_be_bytes());
    *Nonce::from_slice(&bytes)
}

/// Encrypt `plaintext` under `key`, binding `aad` and the packet-number
/// nonce. The returned buffer carries the 16-byte tag appended.
pub fn seal(key: &[u8; 32], pkt_num: u32, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_for(pkt_num);
    cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| Error::AuthFailed)
}

/// Decrypt `ciphertext` (tag included) under `key`. Any tag mismatch,
/// regardless of cause, is reported as `AuthFailed` (spec §4.3).
pub fn open(key: &[u8; 32], pkt_num: u32, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_for(pkt_num);
    cipher
        .decrypt(&nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| Error::AuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_agrees_both_directions() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let shared_a = a.diffie_hellman(&b.public_bytes()).unwrap();
        let shared_b = b.diffie_hellman(&a.public_bytes()).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn session_keys_cross_match_and_differ_within_endpoint() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let shared = a.diffie_hellman(&b.public_bytes()).unwrap();

        let client = derive_session_keys(&shared, "", true);
        let server = derive_session_keys(&shared, "", false);

        assert_eq!(client.send, server.recv);
        assert_eq!(client.recv, server.send);
        assert_ne!(client.send, client.recv);
        assert_ne!(server.send, server.recv);
    }

    #[test]
    fn distinct_psks_do_not_interoperate() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let shared = a.diffie_hellman(&b.public_bytes()).unwrap();

        let client_a = derive_session_keys(&shared, "a", true);
        let client_b = derive_session_keys(&shared, "b", true);
        assert_ne!(client_a.send, client_b.send);
    }

    #[test]
    fn empty_psk_matches_no_psk_mixin() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let shared = a.diffie_hellman(&b.public_bytes()).unwrap();

        let k1 = derive_session_keys(&shared, "", true);
        let k2 = derive_session_keys(&shared, "", true);
        assert_eq!(k1.send, k2.send);
    }

    #[test]
    fn aead_round_trip() {
        let key = [7u8; 32];
        let aad = b"header bytes";
        let ct = seal(&key, 42, aad, b"hello").unwrap();
        assert_eq!(ct.len(), 5 + 16);
        let pt = open(&key, 42, aad, &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn aead_rejects_tampered_ciphertext() {
        let key = [7u8; 32];
        let aad = b"header bytes";
        let mut ct = seal(&key, 1, aad, b"hello").unwrap();
        ct[0] ^= 0xFF;
        let err = open(&key, 1, aad, &ct).unwrap_err();
        assert_eq!(err, Error::AuthFailed);
    }

    #[test]
    fn aead_rejects_wrong_packet_number() {
        let key = [7u8; 32];
        let aad = b"header bytes";
        let ct = seal(&key, 1, aad, b"hello").unwrap();
        let err = open(&key, 2, aad, &ct).unwrap_err();
        assert_eq!(err, Error::AuthFailed);
    }

    #[test]
    fn aead_rejects_wrong_aad() {
        let key = [7u8; 32];
        let ct = seal(&key, 1, b"aad-one", b"hello").unwrap();
        let err = open(&key, 1, b"aad-two", &ct).unwrap_err();
        assert_eq!(err, Error::AuthFailed);
    }

    #[test]
    fn aead_rejects_wrong_key() {
        let ct = seal(&[1u8; 32], 1, b"aad", b"hello").unwrap();
        let err = open(&[2u8; 32], 1, b"aad", &ct).unwrap_err();
        assert_eq!(err, Error::AuthFailed);
    }
}
