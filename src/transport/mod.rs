// Transport
// Sockets, TLS material and SSH tunnels shared by the network drivers

pub mod ssh;
pub mod tls;

use crate::db::error::DbError;
use crate::db::traits::ConnectTarget;
use std::time::Duration;
use tokio::net::TcpStream;

/// Open a TCP socket to `target`, bounded by `timeout`
pub async fn connect_tcp(target: &ConnectTarget, timeout: Duration) -> Result<TcpStream, DbError> {
    let connect = TcpStream::connect((target.host.as_str(), target.port));
    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| {
            DbError::ConnectionError(format!(
                "timed out connecting to {}:{}",
                target.host, target.port
            ))
        })?
        .map_err(|e| {
            DbError::ConnectionError(format!(
                "failed to connect to {}:{}: {}",
                target.host, target.port, e
            ))
        })?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}
