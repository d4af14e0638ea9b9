//! TCP reachability probing.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Attempt a single TCP connection to `127.0.0.1:port` within `timeout`.
///
/// Returns `true` if something accepted the connection. This is a
/// listener-level check only: it says nothing about application health
/// beyond "a process is accepting on that port".
pub async fn probe_port(port: u16, timeout: Duration) -> bool {
    let addr = (Ipv4Addr::LOCALHOST, port);

    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!(port = port, error = %e, "port probe refused");
            false
        }
        Err(_) => {
            debug!(port = port, timeout = ?timeout, "port probe timed out");
            false
        }
    }
}
