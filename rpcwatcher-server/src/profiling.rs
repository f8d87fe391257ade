//! Minimal debug HTTP server (§9.4), spawned only when `Debug` is set.
//! `original_source/cmd/rpcwatcher/main.go` starts Go's `net/http/pprof`
//! package here; there is no Rust equivalent worth a dependency for a single
//! unauthenticated debug endpoint, so this is a hand-rolled HTTP/1.0 listener
//! returning a static process snapshot, not a full framework mount.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serves `GET /debug/vars` with a small JSON process snapshot until the
/// process exits. Runs forever; callers spawn this as a background task.
pub async fn serve(listen_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "profiling server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            // We only need to drain the request line, not parse it properly.
            if socket.read(&mut buf).await.is_err() {
                return;
            }

            let body = serde_json::json!({
                "uptime_seconds": uptime_seconds(),
                "version": env!("CARGO_PKG_VERSION"),
            })
            .to_string();

            let response = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );

            if let Err(e) = socket.write_all(response.as_bytes()).await {
                warn!(error = %e, "failed to write profiling response");
            }
        });
    }
}

fn uptime_seconds() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}
