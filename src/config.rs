//! Validated configuration shared by the codec, obfuscator, crypto, hub,
//! and both endpoints.

use std::time::Duration;

/// Which outer wrapper disguises the wire packet (see `obfuscator`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Obfuscation {
    QuicMimic,
    WebrtcMimic,
    Raw,
}

/// Which payload-size classifier the priority scheduler uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    None,
    Gaming,
    Streaming,
}

/// Recognized, validated options (spec §3). Unknown keys on the host side
/// are ignored before ever reaching this struct; out-of-range values here
/// are clamped to their default by `validate`, never rejected.
#[derive(Clone, Debug)]
pub struct Config {
    pub obfuscation: Obfuscation,
    pub priority: Priority,
    pub mtu: u16,
    pub connection_id_length: u8,
    pub enable_padding: bool,
    pub padding_min: u16,
    pub padding_max: u16,
    pub handshake_timeout_s: u64,
    pub keepalive_interval_s: u64,
    pub psk: String,
    pub max_streams: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            obfuscation: Obfuscation::QuicMimic,
            priority: Priority::Gaming,
            mtu: 1400,
            connection_id_length: 8,
            enable_padding: true,
            padding_min: 40,
            padding_max: 200,
            handshake_timeout_s: 5,
            keepalive_interval_s: 15,
            psk: String::new(),
            max_streams: 16,
        }
    }
}

impl Config {
    /// Clamp every field to its documented range, replacing out-of-range
    /// values with the default rather than erroring (spec §6).
    pub fn validate(mut self) -> Config {
        let default = Config::default();

        if !(576..=1500).contains(&self.mtu) {
            self.mtu = default.mtu;
        }
        if !(4..=20).contains(&self.connection_id_length) {
            self.connection_id_length = default.connection_id_length;
        }
        if self.padding_min > self.padding_max {
            self.padding_min = default.padding_min;
            self.padding_max = default.padding_max;
        }
        if self.handshake_timeout_s < 1 {
            self.handshake_timeout_s = default.handshake_timeout_s;
        }
        if !(1..=256).contains(&self.max_streams) {
            self.max_streams = default.max_streams;
        }
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_s)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        if self.keepalive_interval_s == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keepalive_interval_s))
        }
    }

    /// Idle timeout the hub's reaper uses: `keepalive_interval * 3`, or 5
    /// minutes if keep-alive is disabled (spec §3 Session lifecycle).
    pub fn idle_timeout(&self) -> Duration {
        match self.keepalive_interval() {
            Some(d) => d * 3,
            None => Duration::from_secs(5 * 60),
        }
    }

    /// Maximum application payload per chunk: MTU minus the largest
    /// possible wire overhead (packet header + AEAD tag), leaving room for
    /// the obfuscator's own framing.
    pub fn max_payload(&self) -> usize {
        let header = 1 + 4 + self.connection_id_length as usize + 4 + 2;
        let aead_tag = 16;
        // Leave slack for obfuscator framing (the largest is quic-mimic's
        // dcid/scid/token/length fields, well under 64 bytes).
        let overhead = header + aead_tag + 64;
        (self.mtu as usize).saturating_sub(overhead)
    }
}
