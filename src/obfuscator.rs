//! Wraps an already-encoded packet (see `packet`) into an on-wire datagram
//! that mimics a different protocol, and unwraps it back (spec §4.2).
//!
//! Presented as a tagged enum with an exhaustive match rather than a trait
//! object — the teacher's codebase prefers concrete types to dynamic
//! dispatch, and the spec calls this an equally acceptable shape for the
//! three-variant obfuscator seam.

use octets::{Octets, OctetsMut};
use rand::Rng;

use crate::config::Obfuscation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferTooShort,
    BadContentType,
    BadDtlsVersion,
    Truncated,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

impl From<octets::BufferTooShortError> for Error {
    fn from(_: octets::BufferTooShortError) -> Self {
        Error::BufferTooShort
    }
}

/// The two QUIC v1 versions a quic-mimic datagram's outer header may carry.
/// The inner, logical version is always normalized back to `packet::VERSION`
/// on unwrap regardless of which of these was picked on wrap.
const QUIC_V1: u32 = 0x0000_0001;
const QUIC_V1_GREASE: u32 = 0x6B33_43CF;

const DTLS_CONTENT_APPLICATION_DATA: u8 = 0x17;
const DTLS_VERSION_1_2: [u8; 2] = [0xFE, 0xFD];

/// Obfuscator variant, selected by `Config::obfuscation`.
#[derive(Debug, Clone, Copy)]
pub enum Obfuscator {
    QuicMimic,
    WebrtcMimic,
    Raw,
}

impl Obfuscator {
    pub fn from_config(kind: Obfuscation) -> Self {
        match kind {
            Obfuscation::QuicMimic => Obfuscator::QuicMimic,
            Obfuscation::WebrtcMimic => Obfuscator::WebrtcMimic,
            Obfuscation::Raw => Obfuscator::Raw,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Obfuscator::QuicMimic => "quic-mimic",
            Obfuscator::WebrtcMimic => "webrtc-mimic",
            Obfuscator::Raw => "raw",
        }
    }

    pub fn wrap(&self, encoded: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Obfuscator::QuicMimic => quic_mimic_wrap(encoded),
            Obfuscator::WebrtcMimic => webrtc_mimic_wrap(encoded),
            Obfuscator::Raw => Ok(encoded.to_vec()),
        }
    }

    pub fn unwrap(&self, datagram: &[u8], cid_len: usize) -> Result<Vec<u8>, Error> {
        match self {
            Obfuscator::QuicMimic => quic_mimic_unwrap(datagram, cid_len),
            Obfuscator::WebrtcMimic => webrtc_mimic_unwrap(datagram),
            Obfuscator::Raw => Ok(datagram.to_vec()),
        }
    }
}

/// quic-mimic assumes `cid_len == 8` when extracting the DCID; deployments
/// that change `connection_id_length` away from 8 must use another
/// obfuscator (spec §9, Design Notes).
fn quic_mimic_wrap(encoded: &[u8]) -> Result<Vec<u8>, Error> {
    if encoded.len() < 1 + 8 {
        return Err(Error::Truncated);
    }
    let flags = encoded[0];
    let dcid = &encoded[1 + 4..1 + 4 + 8.min(encoded.len().saturating_sub(1 + 4))];
    // The spec assumes cid_len == 8; the dcid slice above only degrades
    // gracefully (shorter dcid) if the caller violates that assumption.
    let rest = &encoded[(1 + 4 + 8).min(encoded.len())..];

    let wire_version = if rand::thread_rng().gen_bool(0.5) {
        QUIC_V1
    } else {
        QUIC_V1_GREASE
    };

    let mut scid = [0u8; 8];
    rand::thread_rng().fill(&mut scid);

    let token_len_varint_len = octets::varint_len(0);
    let payload_len_varint_len = octets::varint_len(rest.len() as u64);

    let total = 1 // flags
        + 4 // version
        + 1 + dcid.len() // dcid_len + dcid
        + 1 + scid.len() // scid_len + scid
        + token_len_varint_len
        + payload_len_varint_len
        + rest.len();

    let mut buf = vec![0u8; total];
    let mut b = OctetsMut::with_slice(&mut buf);
    b.put_u8(flags)?;
    b.put_u32(wire_version)?;
    b.put_u8(dcid.len() as u8)?;
    b.put_bytes(dcid)?;
    b.put_u8(scid.len() as u8)?;
    b.put_bytes(&scid)?;
    b.put_varint(0)?;
    b.put_varint(rest.len() as u64)?;
    b.put_bytes(rest)?;

    Ok(buf)
}

fn quic_mimic_unwrap(datagram: &[u8], _cid_len: usize) -> Result<Vec<u8>, Error> {
    let mut b = Octets::with_slice(datagram);
    let flags = b.get_u8()?;
    let _version = b.get_u32()?;

    let dcid_len = b.get_u8()? as usize;
    let dcid = b.get_bytes(dcid_len)?.to_vec();

    let scid_len = b.get_u8()? as usize;
    b.get_bytes(scid_len)?; // scid, discarded

    let token_len = b.get_varint()?;
    if token_len > 0 {
        b.get_bytes(token_len as usize)?; // token, discarded
    }

    let payload_len = b.get_varint()? as usize;
    let rest = b.get_bytes(payload_len)?.to_vec();

    let mut inner = Vec::with_capacity(1 + 4 + dcid.len() + rest.len());
    inner.push(flags);
    inner.extend_from_slice(&crate::packet::VERSION.to_be_bytes());
    inner.extend_from_slice(&dcid);
    inner.extend_from_slice(&rest);
    Ok(inner)
}

fn webrtc_mimic_wrap(encoded: &[u8]) -> Result<Vec<u8>, Error> {
    if encoded.len() > u16::MAX as usize {
        return Err(Error::Truncated);
    }
    let seq48 = (nanos_now() & 0x0000_FFFF_FFFF_FFFF) as u64;
    let epoch: u16 = 0;

    let mut buf = Vec::with_capacity(1 + 2 + 2 + 6 + 2 + encoded.len());
    buf.push(DTLS_CONTENT_APPLICATION_DATA);
    buf.extend_from_slice(&DTLS_VERSION_1_2);
    buf.extend_from_slice(&epoch.to_be_bytes());
    buf.extend_from_slice(&seq48.to_be_bytes()[2..]); // low 48 bits, big-endian
    buf.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
    buf.extend_from_slice(encoded);
    Ok(buf)
}

fn webrtc_mimic_unwrap(datagram: &[u8]) -> Result<Vec<u8>, Error> {
    const HEADER_LEN: usize = 1 + 2 + 2 + 6 + 2;
    if datagram.len() < HEADER_LEN {
        return Err(Error::Truncated);
    }
    if datagram[0] != DTLS_CONTENT_APPLICATION_DATA {
        return Err(Error::BadContentType);
    }
    if datagram[1..3] != DTLS_VERSION_1_2 {
        return Err(Error::BadDtlsVersion);
    }
    let length = u16::from_be_bytes([datagram[11], datagram[12]]) as usize;
    if datagram.len() < HEADER_LEN + length {
        return Err(Error::Truncated);
    }
    Ok(datagram[HEADER_LEN..HEADER_LEN + length].to_vec())
}

fn nanos_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Optional helper (spec §4.2): a realistic QUIC-shaped padded size for a
/// given payload, banded so packet-length distributions resemble real QUIC
/// traffic. Using this is optional — packet-level padding from `packet`
/// always applies regardless.
pub fn quic_mimic_target_size(payload_size: usize, mtu: u16) -> usize {
    let mut rng = rand::thread_rng();
    let target = if payload_size < 100 {
        rng.gen_range(40..100)
    } else if payload_size < 500 {
        rng.gen_range(100..500)
    } else {
        rng.gen_range(1200..1280)
    };
    target.clamp(payload_size, mtu as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Kind, Packet};

    fn sample_encoded(cid_len: usize, payload: &[u8]) -> Vec<u8> {
        let p = Packet::new(Kind::Data, vec![0xAB; cid_len], 5, payload.to_vec());
        p.encode(cid_len, false, 40, 200).unwrap()
    }

    #[test]
    fn quic_mimic_round_trip_preserves_cid_and_payload() {
        let encoded = sample_encoded(8, b"hello world");
        let ob = Obfuscator::QuicMimic;
        let wire = ob.wrap(&encoded).unwrap();
        // outer long-header byte is the inner flags byte, preserved verbatim by the wrap.
        assert!(crate::packet::is_quic_like(wire[0]));
        let back = ob.unwrap(&wire, 8).unwrap();

        let original = Packet::decode(&encoded, 8).unwrap();
        let roundtripped = Packet::decode(&back, 8).unwrap();
        assert_eq!(original.cid, roundtripped.cid);
        assert_eq!(original.payload, roundtripped.payload);
        assert_eq!(original.pkt_num, roundtripped.pkt_num);
    }

    #[test]
    fn quic_mimic_normalizes_version() {
        let encoded = sample_encoded(8, b"x");
        let ob = Obfuscator::QuicMimic;
        let wire = ob.wrap(&encoded).unwrap();
        let back = ob.unwrap(&wire, 8).unwrap();
        let decoded = Packet::decode(&back, 8).unwrap();
        // decode() itself enforces VERSION, so a successful decode already
        // proves the version field was normalized back.
        assert_eq!(decoded.cid.len(), 8);
    }

    #[test]
    fn webrtc_mimic_round_trip_is_byte_exact() {
        let encoded = sample_encoded(8, b"byte exact please");
        let ob = Obfuscator::WebrtcMimic;
        let wire = ob.wrap(&encoded).unwrap();
        let back = ob.unwrap(&wire).unwrap();
        assert_eq!(back, encoded);
    }

    #[test]
    fn webrtc_mimic_header_shape() {
        let encoded = sample_encoded(8, b"x");
        let wire = Obfuscator::WebrtcMimic.wrap(&encoded).unwrap();
        assert_eq!(wire[0], DTLS_CONTENT_APPLICATION_DATA);
        assert_eq!(&wire[1..3], &DTLS_VERSION_1_2);
    }

    #[test]
    fn webrtc_mimic_rejects_bad_content_type() {
        let encoded = sample_encoded(8, b"x");
        let mut wire = Obfuscator::WebrtcMimic.wrap(&encoded).unwrap();
        wire[0] = 0x16;
        let err = Obfuscator::WebrtcMimic.unwrap(&wire).unwrap_err();
        assert_eq!(err, Error::BadContentType);
    }

    #[test]
    fn raw_round_trip_is_identity() {
        let encoded = sample_encoded(8, b"raw passthrough");
        let ob = Obfuscator::Raw;
        let wire = ob.wrap(&encoded).unwrap();
        assert_eq!(wire, encoded);
        let back = ob.unwrap(&wire, 8).unwrap();
        assert_eq!(back, encoded);
    }

    #[test]
    fn varint_round_trip_rfc9000_vectors() {
        for (v, expected_len) in [
            (0u64, 1),
            (63, 1),
            (64, 2),
            (16383, 2),
            (16384, 4),
            (1073741823, 4),
            (1073741824, 8),
        ] {
            assert_eq!(octets::varint_len(v), expected_len);
            let mut buf = vec![0u8; expected_len];
            let mut w = OctetsMut::with_slice(&mut buf);
            w.put_varint(v).unwrap();
            let mut r = Octets::with_slice(&buf);
            assert_eq!(r.get_varint().unwrap(), v);
        }
    }

    #[test]
    fn target_size_bands() {
        let small = quic_mimic_target_size(50, 1400);
        assert!((40..100).contains(&small) || small == 50);
        let medium = quic_mimic_target_size(300, 1400);
        assert!(medium >= 100 && medium <= 1400);
        let large = quic_mimic_target_size(1000, 1400);
        assert!(large >= 1000 && large <= 1400);
    }
}
