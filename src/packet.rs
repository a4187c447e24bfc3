//! Wire packet codec (spec §4.1).
//!
//! ```text
//! flags(1) | version(4) | connID(cidLen) | pktnum(4) | payloadLen(2) | payload(payloadLen)
//!   [ padding(padLen) | padLen(2) ] if flags.padding
//! ```
//!
//! Field-by-field reads mirror `quic_parse::Header::from_bytes` in the
//! teacher crate this was grounded on: an `octets::Octets` cursor pulled
//! apart one fixed-width field at a time.

use octets::{Octets, OctetsMut};
use rand::Rng;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wire version. Any other value on decode fails with `BadVersion`.
pub const VERSION: u32 = 0x0000_0001;

const FORM_BIT: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;
const KIND_MASK: u8 = 0x30;
const PADDING_BIT: u8 = 0x08;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Data,
    Handshake,
    KeepAlive,
    Control,
}

impl Kind {
    fn to_bits(self) -> u8 {
        match self {
            Kind::Data => 0b00,
            Kind::Handshake => 0b01,
            Kind::KeepAlive => 0b10,
            Kind::Control => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Kind {
        match bits & 0b11 {
            0b00 => Kind::Data,
            0b01 => Kind::Handshake,
            0b10 => Kind::KeepAlive,
            _ => Kind::Control,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Shorter than `1+4+cidLen+4+2`.
    ShortPacket,
    /// Form bit or fixed bit is zero.
    BadFlags,
    /// Version field is not `VERSION`.
    BadVersion,
    /// `Packet::cid` does not match the configured CID length.
    CidLengthMismatch,
    /// Payload does not fit in the 16-bit length field, or exceeds the
    /// bytes remaining in the buffer.
    PayloadLengthMismatch,
    BufferTooShort,
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

/// A decoded logical packet. `padding` records whether the wire form
/// carried a trailing padding region; it is not part of equality, since
/// padding content and length are never inspected (spec: "decoder yields
/// the Packet without parsing the trailing padding region").
#[derive(Clone, Debug)]
pub struct Packet {
    pub kind: Kind,
    pub cid: Vec<u8>,
    pub pkt_num: u32,
    pub payload: Vec<u8>,
    pub padding: bool,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.cid == other.cid
            && self.pkt_num == other.pkt_num
            && self.payload == other.payload
    }
}

impl Eq for Packet {}

/// `(first_byte & 0xC0) == 0xC0` — form bit and fixed bit both set.
#[inline]
pub fn is_quic_like(first_byte: u8) -> bool {
    (first_byte & 0xC0) == 0xC0
}

impl Packet {
    pub fn new(kind: Kind, cid: Vec<u8>, pkt_num: u32, payload: Vec<u8>) -> Self {
        Packet {
            kind,
            cid,
            pkt_num,
            payload,
            padding: false,
        }
    }

    pub fn with_padding(mut self, padding: bool) -> Self {
        self.padding = padding;
        self
    }

    /// Encode into the wire form. `padding_enabled`/`padding_min`/`padding_max`
    /// come from `Config`; padding is only written when both the packet
    /// requests it and the config allows it.
    pub fn encode(
        &self,
        cid_len: usize,
        padding_enabled: bool,
        padding_min: u16,
        padding_max: u16,
    ) -> Result<Vec<u8>, Error> {
        if self.cid.len() != cid_len {
            return Err(Error::CidLengthMismatch);
        }
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::PayloadLengthMismatch);
        }

        let should_pad = self.padding && padding_enabled;
        let pad_len: u16 = if should_pad {
            if padding_max == padding_min {
                padding_min
            } else {
                rand::thread_rng().gen_range(padding_min..padding_max)
            }
        } else {
            0
        };

        let mut flags = FORM_BIT | FIXED_BIT | (self.kind.to_bits() << 4);
        if should_pad {
            flags |= PADDING_BIT;
        }

        let header_len = 1 + 4 + cid_len + 4 + 2;
        let total_len = header_len
            + self.payload.len()
            + if should_pad { pad_len as usize + 2 } else { 0 };

        let mut buf = vec![0u8; total_len];
        let mut b = OctetsMut::with_slice(&mut buf);
        b.put_u8(flags)?;
        b.put_u32(VERSION)?;
        b.put_bytes(&self.cid)?;
        b.put_u32(self.pkt_num)?;
        b.put_u16(self.payload.len() as u16)?;
        b.put_bytes(&self.payload)?;

        if should_pad {
            let mut pad = vec![0u8; pad_len as usize];
            rand::thread_rng().fill(pad.as_mut_slice());
            b.put_bytes(&pad)?;
            b.put_u16(pad_len)?;
        }

        Ok(buf)
    }

    /// Decode the wire form. Padding, if present, is not parsed or
    /// validated — trailing bytes past the payload are simply ignored.
    pub fn decode(buf: &[u8], cid_len: usize) -> Result<Packet, Error> {
        let min_len = 1 + 4 + cid_len + 4 + 2;
        if buf.len() < min_len {
            return Err(Error::ShortPacket);
        }

        let mut b = Octets::with_slice(buf);
        let first = b.get_u8()?;
        if (first & FORM_BIT) == 0 || (first & FIXED_BIT) == 0 {
            return Err(Error::BadFlags);
        }

        let version = b.get_u32()?;
        if version != VERSION {
            return Err(Error::BadVersion);
        }

        let cid = b.get_bytes(cid_len)?.to_vec();
        let pkt_num = b.get_u32()?;
        let payload_len = b.get_u16()? as usize;
        if payload_len > b.cap() {
            return Err(Error::PayloadLengthMismatch);
        }
        let payload = b.get_bytes(payload_len)?.to_vec();

        let padding = (first & PADDING_BIT) != 0;
        let kind = Kind::from_bits((first & KIND_MASK) >> 4);

        Ok(Packet {
            kind,
            cid,
            pkt_num,
            payload,
            padding,
        })
    }

    /// The AAD covered by the AEAD tag: flags, version, and CID — the
    /// first `1 + 4 + cid_len` bytes of the encoded (pre-padding) packet.
    pub fn aad(encoded: &[u8], cid_len: usize) -> &[u8] {
        &encoded[..1 + 4 + cid_len]
    }
}

/// 72-byte Handshake body: 32-byte X25519 public key ‖ 8-byte big-endian
/// Unix-seconds timestamp ‖ 32 random bytes (spec §3).
pub const HANDSHAKE_PAYLOAD_LEN: usize = 32 + 8 + 32;

#[derive(Clone, Debug)]
pub struct HandshakePayload {
    pub public_key: [u8; 32],
    pub timestamp: u64,
    pub random: [u8; 32],
}

impl HandshakePayload {
    /// Build from a public key, stamping the current Unix time and filling
    /// the trailing 32 bytes with random padding-like filler.
    pub fn new(public_key: [u8; 32]) -> HandshakePayload {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut random = [0u8; 32];
        rand::thread_rng().fill(&mut random);
        HandshakePayload {
            public_key,
            timestamp,
            random,
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_PAYLOAD_LEN] {
        let mut buf = [0u8; HANDSHAKE_PAYLOAD_LEN];
        buf[..32].copy_from_slice(&self.public_key);
        buf[32..40].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[40..].copy_from_slice(&self.random);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<HandshakePayload, Error> {
        if buf.len() != HANDSHAKE_PAYLOAD_LEN {
            return Err(Error::PayloadLengthMismatch);
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[..32]);
        let timestamp = u64::from_be_bytes(buf[32..40].try_into().unwrap());
        let mut random = [0u8; 32];
        random.copy_from_slice(&buf[40..]);
        Ok(HandshakePayload {
            public_key,
            timestamp,
            random,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u8) -> Vec<u8> {
        vec![n; 8]
    }

    #[test]
    fn round_trip_basic() {
        let p = Packet::new(Kind::Data, cid(1), 42, b"hello".to_vec());
        let wire = p.encode(8, false, 40, 200).unwrap();
        let decoded = Packet::decode(&wire, 8).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn round_trip_all_kinds() {
        for kind in [Kind::Data, Kind::Handshake, Kind::KeepAlive, Kind::Control] {
            let p = Packet::new(kind, cid(2), 7, b"x".to_vec());
            let wire = p.encode(8, false, 40, 200).unwrap();
            let decoded = Packet::decode(&wire, 8).unwrap();
            assert_eq!(decoded.kind, kind);
        }
    }

    #[test]
    fn padding_is_ignored_on_decode() {
        let p = Packet::new(Kind::Handshake, cid(3), 1, b"payload".to_vec());
        let no_pad = p.clone().with_padding(false);
        let with_pad = p.clone().with_padding(true);

        let wire_no_pad = no_pad.encode(8, true, 40, 40).unwrap();
        let wire_with_pad = with_pad.encode(8, true, 40, 40).unwrap();
        assert!(wire_with_pad.len() > wire_no_pad.len());

        let decoded_no_pad = Packet::decode(&wire_no_pad, 8).unwrap();
        let decoded_with_pad = Packet::decode(&wire_with_pad, 8).unwrap();
        assert_eq!(decoded_no_pad, decoded_with_pad);
    }

    #[test]
    fn every_encoded_packet_is_quic_like() {
        let p = Packet::new(Kind::Data, cid(4), 1, b"z".to_vec());
        let wire = p.encode(8, true, 40, 200).unwrap();
        assert!(is_quic_like(wire[0]));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = Packet::decode(&[0u8; 3], 8).unwrap_err();
        assert_eq!(err, Error::ShortPacket);
    }

    #[test]
    fn decode_rejects_bad_flags() {
        let p = Packet::new(Kind::Data, cid(5), 1, b"a".to_vec());
        let mut wire = p.encode(8, false, 40, 200).unwrap();
        wire[0] = 0x00; // clear form + fixed bits
        let err = Packet::decode(&wire, 8).unwrap_err();
        assert_eq!(err, Error::BadFlags);
    }

    #[test]
    fn decode_rejects_bad_version() {
        let p = Packet::new(Kind::Data, cid(6), 1, b"a".to_vec());
        let mut wire = p.encode(8, false, 40, 200).unwrap();
        wire[1..5].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        let err = Packet::decode(&wire, 8).unwrap_err();
        assert_eq!(err, Error::BadVersion);
    }

    #[test]
    fn encode_rejects_wrong_cid_length() {
        let p = Packet::new(Kind::Data, vec![1, 2, 3], 1, b"a".to_vec());
        let err = p.encode(8, false, 40, 200).unwrap_err();
        assert_eq!(err, Error::CidLengthMismatch);
    }

    #[test]
    fn aad_covers_flags_version_cid() {
        let p = Packet::new(Kind::Data, cid(7), 9, b"payload-bytes".to_vec());
        let wire = p.encode(8, false, 40, 200).unwrap();
        let aad = Packet::aad(&wire, 8);
        assert_eq!(aad.len(), 1 + 4 + 8);
        assert_eq!(&aad[5..13], &cid(7)[..]);
    }

    #[test]
    fn handshake_payload_round_trip() {
        let payload = HandshakePayload::new([0x42; 32]);
        let wire = payload.encode();
        assert_eq!(wire.len(), HANDSHAKE_PAYLOAD_LEN);
        let decoded = HandshakePayload::decode(&wire).unwrap();
        assert_eq!(decoded.public_key, [0x42; 32]);
        assert_eq!(decoded.timestamp, payload.timestamp);
        assert_eq!(decoded.random, payload.random);
    }

    #[test]
    fn handshake_payload_rejects_wrong_length() {
        let err = HandshakePayload::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, Error::PayloadLengthMismatch);
    }
}
