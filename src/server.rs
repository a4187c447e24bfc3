//! Server endpoint: bind, receive loop via `Hub::route_packet`, and the
//! per-session `ConnectionView` duplex handed to the host (spec §4.7).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use socket2::Socket as Socket2;
use tokio::net::UdpSocket;

use crate::config::Config;
use crate::error::Error;
use crate::hub::Hub;
use crate::session::Session;

const SOCKET_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const READ_DEADLINE: Duration = Duration::from_secs(1);

fn configure_socket_buffers(socket: &std::net::UdpSocket) {
    let sock2 = Socket2::from(socket.try_clone().expect("clone std socket for buffer tuning"));
    if let Err(e) = sock2.set_recv_buffer_size(SOCKET_BUFFER_BYTES) {
        warn!("could not raise recv buffer to {SOCKET_BUFFER_BYTES}: {e}");
    }
    if let Err(e) = sock2.set_send_buffer_size(SOCKET_BUFFER_BYTES) {
        warn!("could not raise send buffer to {SOCKET_BUFFER_BYTES}: {e}");
    }
    std::mem::forget(sock2);
}

/// A session-scoped duplex view passed to the host's `on_conn` callback
/// (spec §4.7, §6). `read`/`write`/`close` are the host-facing contract;
/// internally they delegate to the owning `Hub` and `Session`.
pub struct ConnectionView {
    hub: Arc<Hub>,
    session: Arc<Session>,
    local_addr: SocketAddr,
    /// Bytes left over from a previous `read` call whose buffer was smaller
    /// than the queued record (spec §4.7: "chunks larger than the caller's
    /// buffer leave a remainder for the next read").
    remainder: tokio::sync::Mutex<Vec<u8>>,
}

impl ConnectionView {
    fn new(hub: Arc<Hub>, session: Arc<Session>, local_addr: SocketAddr) -> Arc<ConnectionView> {
        Arc::new(ConnectionView {
            hub,
            session,
            local_addr,
            remainder: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Blocks on the session's inbound queue; if `buf` is smaller than the
    /// next queued record, the remainder is held for the next call.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut remainder = self.remainder.lock().await;
        if remainder.is_empty() {
            match self.session.recv_inbound().await {
                Some(data) => *remainder = data,
                None => return Err(Error::Closed),
            }
        }
        let n = remainder.len().min(buf.len());
        buf[..n].copy_from_slice(&remainder[..n]);
        remainder.drain(..n);
        Ok(n)
    }

    /// Same chunking contract as the client writer (spec §4.6), routed
    /// through `Hub::send_to_session`.
    pub async fn write(&self, data: &[u8]) -> Result<usize, Error> {
        let max_payload = self.hub.config().max_payload();
        let mut sent = 0;
        for chunk in data.chunks(max_payload.max(1)) {
            let n = self
                .hub
                .send_to_session(&self.session, chunk)
                .await
                .map_err(Error::Socket)?;
            sent += n;
        }
        Ok(sent)
    }

    pub async fn close(&self) {
        self.hub.close_session(&self.session).await;
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote()
    }
}

/// Binds a UDP socket, creates a `Hub`, and runs the receive loop plus the
/// hub's idle reaper. `on_conn` fires once per newly accepted session (spec
/// §4.7).
pub async fn listen<F>(address: SocketAddr, config: Config, on_conn: F) -> Result<Arc<ServerHandle>, Error>
where
    F: Fn(Arc<ConnectionView>) + Send + Sync + 'static,
{
    let config = config.validate();

    let std_socket = std::net::UdpSocket::bind(address).map_err(Error::Socket)?;
    configure_socket_buffers(&std_socket);
    std_socket.set_nonblocking(true).map_err(Error::Socket)?;
    let socket = Arc::new(UdpSocket::from_std(std_socket).map_err(Error::Socket)?);
    let local_addr = socket.local_addr().map_err(Error::Socket)?;

    let hub_socket = socket.clone();
    let hub_for_callback_cell: Arc<tokio::sync::OnceCell<Arc<Hub>>> = Arc::new(tokio::sync::OnceCell::new());
    let hub_for_callback = hub_for_callback_cell.clone();
    let hub = Hub::new(
        config,
        hub_socket,
        Box::new(move |session: Arc<Session>| {
            if let Some(hub) = hub_for_callback.get() {
                let view = ConnectionView::new(hub.clone(), session, local_addr);
                on_conn(view);
            }
        }),
    );
    hub_for_callback_cell
        .set(hub.clone())
        .unwrap_or_else(|_| panic!("hub callback cell set exactly once"));

    let receive_hub = hub.clone();
    let receive_socket = socket.clone();
    let receive_task = tokio::spawn(run_receive_loop(receive_socket, receive_hub));
    let reaper_task = tokio::spawn(hub.clone().run_reaper());
    let send_task = tokio::spawn(hub.clone().run_send_loop());

    Ok(Arc::new(ServerHandle {
        hub,
        socket,
        local_addr,
        receive_task,
        reaper_task,
        send_task,
    }))
}

async fn run_receive_loop(socket: Arc<UdpSocket>, hub: Arc<Hub>) {
    let mut buf = vec![0u8; 65535];
    loop {
        match tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, remote))) => {
                hub.route_packet(&buf[..n], remote).await;
            }
            Ok(Err(e)) => {
                warn!("server recv error: {e}");
            }
            Err(_) => {
                // read deadline elapsed; loop back around so callers can
                // observe a close signal promptly (spec §5).
            }
        }
    }
}

/// Handle returned from `listen`. Dropping it does not stop the background
/// tasks; call `shutdown` for a clean stop.
pub struct ServerHandle {
    hub: Arc<Hub>,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    receive_task: tokio::task::JoinHandle<()>,
    reaper_task: tokio::task::JoinHandle<()>,
    send_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> crate::hub::StatsSnapshot {
        self.hub.stats()
    }

    pub fn shutdown(&self) {
        self.receive_task.abort();
        self.reaper_task.abort();
        self.send_task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientEndpoint;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[tokio::test]
    async fn handshake_and_echo_over_data() {
        let server_addr = loopback(0);
        let connections: Arc<StdMutex<Vec<Arc<ConnectionView>>>> = Arc::new(StdMutex::new(Vec::new()));
        let connections2 = connections.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();

        let handle = listen(server_addr, Config::default(), move |view| {
            connections2.lock().unwrap().push(view);
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let real_addr = handle.local_addr();
        let client = ClientEndpoint::dial(real_addr, Config::default()).await.unwrap();

        let msg = b"player_move:x=150.5 y=200.3 z=0 tick=42";
        client.write(msg).await.unwrap();

        // give the receive loop a moment to route the Data packet.
        let mut view = None;
        for _ in 0..50 {
            if let Some(v) = connections.lock().unwrap().first().cloned() {
                view = Some(v);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let view = view.expect("server should have accepted a session");

        let mut buf = [0u8; 256];
        let n = view.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], msg);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
