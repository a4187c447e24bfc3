//! UDP-based encrypted tunnel transport with QUIC-mimicry obfuscation.
//!
//! Module layout mirrors the teacher's flat `pemi` crate: one file per
//! concern, a thin `lib.rs` that wires them together and re-exports the
//! handful of types a host actually needs (`Config`, `dial`, `listen`).

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod host;
pub mod hub;
pub mod obfuscator;
pub mod packet;
pub mod scheduler;
pub mod server;
pub mod session;

pub use client::ClientEndpoint;
pub use config::{Config, Obfuscation, Priority};
pub use error::Error;
pub use server::{listen, ConnectionView, ServerHandle};

/// Dials `destination` and runs the handshake (spec §4.6).
pub async fn dial(
    destination: std::net::SocketAddr,
    config: Config,
) -> Result<std::sync::Arc<ClientEndpoint>, Error> {
    ClientEndpoint::dial(destination, config).await
}
