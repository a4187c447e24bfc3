//! Minimal demo client: dials a gametunnel server, writes one line from
//! stdin at a time, prints what comes back. Argument parsing is hand-rolled
//! (`std::env::args`) since CLI surface is out of scope for the core.

use std::io::{self, Write};

use gametunnel::Config;

#[tokio::main]
async fn main() -> Result<(), String> {
    env_logger::builder()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9443".to_string());
    let remote = addr
        .parse()
        .map_err(|e| format!("invalid address {addr}: {e}"))?;

    let client = gametunnel::dial(remote, Config::default())
        .await
        .map_err(|e| format!("dial failed: {e}"))?;

    println!("connected to {remote}, local {}", client.local_addr().map_err(|e| e.to_string())?);

    let reader = {
        let client = client.clone();
        tokio::spawn(async move {
            while let Some(chunk) = client.read().await {
                io::stdout().write_all(&chunk).ok();
                io::stdout().write_all(b"\n").ok();
            }
        })
    };

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if let Err(e) = client.write(trimmed.as_bytes()).await {
            eprintln!("write failed: {e}");
            break;
        }
    }

    client.close().await;
    reader.abort();
    Ok(())
}
