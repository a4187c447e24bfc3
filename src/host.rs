//! Host integration contract shapes (spec §6).
//!
//! This module has no callers inside this repo — the outer proxy framework
//! that would embed `gametunnel` as a named transport is out of scope (spec
//! §1). It exists to give that embedding point a concrete shape to target,
//! the way the teacher's `lib.rs` exposes `PEMI::process_packet` as the
//! single entry point an external `main` drives.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::client::ClientEndpoint;
use crate::config::Config;
use crate::error::Error;
use crate::server::{ConnectionView, ServerHandle};

/// The name this transport registers under with the host proxy framework.
pub const TRANSPORT_NAME: &str = "gametunnel";

/// Carries a `Config`; absent fields fall back to `Config::default()` (spec
/// §6: "when absent, defaults apply").
#[derive(Clone, Default)]
pub struct StreamSettings {
    pub config: Option<Config>,
}

impl StreamSettings {
    pub fn resolved(&self) -> Config {
        self.config.clone().unwrap_or_default()
    }
}

/// `(context, destination, stream_settings) -> connection` dial factory.
/// `context` is opaque to this crate — the host's own cancellation/tracing
/// context, threaded through unchanged.
pub async fn dial_factory<C>(
    _context: C,
    destination: SocketAddr,
    stream_settings: StreamSettings,
) -> Result<Arc<ClientEndpoint>, Error> {
    ClientEndpoint::dial(destination, stream_settings.resolved()).await
}

/// `(context, address, port, stream_settings, on_conn) -> listener` listen
/// factory. The host keeps `address` and `port` as separate fields; this
/// crate's own `listen` only needs the resolved `SocketAddr`, so `port` is
/// folded in here before delegating.
pub async fn listen_factory<C, F>(
    _context: C,
    address: std::net::IpAddr,
    port: u16,
    stream_settings: StreamSettings,
    on_conn: F,
) -> Result<Arc<ServerHandle>, Error>
where
    F: Fn(Arc<ConnectionView>) + Send + Sync + 'static,
{
    let address = SocketAddr::new(address, port);
    crate::server::listen(address, stream_settings.resolved(), on_conn).await
}
