//! Minimal demo server: listens for gametunnel connections and echoes each
//! inbound chunk back to its sender. Argument parsing is hand-rolled since
//! CLI surface is out of scope for the core.

use std::io::Write;

use gametunnel::Config;

#[tokio::main]
async fn main() -> Result<(), String> {
    env_logger::builder()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "0.0.0.0:9443".to_string());
    let bind: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| format!("invalid address {addr}: {e}"))?;

    let handle = gametunnel::listen(bind, Config::default(), |view| {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                match view.read(&mut buf).await {
                    Ok(n) => {
                        if let Err(e) = view.write(&buf[..n]).await {
                            eprintln!("write to {} failed: {e}", view.remote_addr());
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    })
    .await
    .map_err(|e| format!("listen failed: {e}"))?;

    println!("listening on {}", handle.local_addr());
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("ctrl-c handler failed: {e}"))?;
    println!("stats: {:?}", handle.stats());
    Ok(())
}
