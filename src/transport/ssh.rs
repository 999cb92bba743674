// SSH tunnel
// Local port forwarding through a bastion host with ssh2

use crate::db::config::SshTunnelConfig;
use crate::db::error::DbError;
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(2);
const CHUNK: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Failed to connect to SSH server {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("SSH handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Failed to bind local tunnel port: {0}")]
    BindFailed(std::io::Error),
}

impl From<TunnelError> for DbError {
    fn from(err: TunnelError) -> Self {
        DbError::ConnectionError(err.to_string())
    }
}

/// A running SSH tunnel. Drivers connect to `127.0.0.1:local_port()`.
///
/// All forwarded connections are pumped by one thread that owns the session in
/// non-blocking mode. Dropping the tunnel stops the thread and disconnects.
pub struct SshTunnel {
    session: Session,
    local_port: u16,
    running: Arc<AtomicBool>,
    pump: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("local_port", &self.local_port)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SshTunnel {
    /// Blocking; call from `spawn_blocking`.
    pub fn open(
        config: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, TunnelError> {
        tracing::info!(
            ssh_host = %config.host,
            ssh_port = config.port,
            remote_host = %remote_host,
            remote_port,
            "opening SSH tunnel"
        );

        let connect_failed = |source: std::io::Error| TunnelError::ConnectionFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        };
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| connect_failed(std::io::Error::new(ErrorKind::NotFound, "host did not resolve")))?;
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(connect_failed)?;

        let mut session = Session::new().map_err(|e| TunnelError::HandshakeFailed(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(connect_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| TunnelError::HandshakeFailed(e.to_string()))?;

        authenticate(&session, config)?;
        // Forwarded streams are long-lived
        session.set_timeout(0);
        session.set_keepalive(true, 30);

        // Bound before the pump starts, so the port cannot be taken in between
        let listener = TcpListener::bind("127.0.0.1:0").map_err(TunnelError::BindFailed)?;
        listener.set_nonblocking(true).map_err(TunnelError::BindFailed)?;
        let local_port = listener
            .local_addr()
            .map_err(TunnelError::BindFailed)?
            .port();

        let running = Arc::new(AtomicBool::new(true));
        let pump = {
            let session = session.clone();
            let running = running.clone();
            let remote_host = remote_host.to_string();
            thread::Builder::new()
                .name(format!("ssh-tunnel-{}", local_port))
                .spawn(move || pump(session, listener, remote_host, remote_port, running))
                .map_err(TunnelError::BindFailed)?
        };

        tracing::info!(local_port, "SSH tunnel established");
        Ok(Self {
            session,
            local_port,
            running,
            pump: Some(pump),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        self.session.set_blocking(true);
        if let Err(e) = self.session.disconnect(None, "tunnel closed", None) {
            tracing::debug!(error = %e, "SSH disconnect failed");
        }
        tracing::info!(local_port = self.local_port, "SSH tunnel closed");
    }
}

/// Try key file, then password, then the agent
fn authenticate(session: &Session, config: &SshTunnelConfig) -> Result<(), TunnelError> {
    let mut failures = Vec::new();

    if let Some(key_path) = &config.key_path {
        match session.userauth_pubkey_file(&config.username, None, key_path, config.passphrase.as_deref()) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => failures.push("key: not accepted".to_string()),
            Err(e) => failures.push(format!("key {}: {}", key_path.display(), e)),
        }
    }

    if let Some(password) = &config.password {
        match session.userauth_password(&config.username, password) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => failures.push("password: not accepted".to_string()),
            Err(e) => failures.push(format!("password: {}", e)),
        }
    }

    match session.userauth_agent(&config.username) {
        Ok(()) if session.authenticated() => return Ok(()),
        Ok(()) => failures.push("agent: not accepted".to_string()),
        Err(e) => failures.push(format!("agent: {}", e)),
    }

    Err(TunnelError::AuthenticationFailed(failures.join("; ")))
}

/// One local client bridged to one SSH channel
struct Forward {
    local: TcpStream,
    channel: Channel,
    to_remote: Vec<u8>,
    to_local: Vec<u8>,
    local_eof: bool,
}

impl Forward {
    /// Move whatever bytes are ready in both directions. Returns (progressed, finished).
    fn step(&mut self, buf: &mut [u8]) -> (bool, bool) {
        let mut progressed = false;

        if self.to_remote.is_empty() && !self.local_eof {
            match self.local.read(buf) {
                Ok(0) => {
                    self.local_eof = true;
                    let _ = self.channel.send_eof();
                    progressed = true;
                }
                Ok(n) => {
                    self.to_remote.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => return (true, true),
            }
        }

        if !self.to_remote.is_empty() {
            match self.channel.write(&self.to_remote) {
                Ok(n) => {
                    self.to_remote.drain(..n);
                    progressed |= n > 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => return (true, true),
            }
        }

        if self.to_local.is_empty() {
            match self.channel.read(buf) {
                Ok(0) if self.channel.eof() => return (true, true),
                Ok(0) => {}
                Ok(n) => {
                    self.to_local.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => return (true, true),
            }
        }

        if !self.to_local.is_empty() {
            match self.local.write(&self.to_local) {
                Ok(n) => {
                    self.to_local.drain(..n);
                    progressed |= n > 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => return (true, true),
            }
        }

        (progressed, false)
    }
}

fn pump(
    session: Session,
    listener: TcpListener,
    remote_host: String,
    remote_port: u16,
    running: Arc<AtomicBool>,
) {
    let mut forwards: Vec<Forward> = Vec::new();
    let mut buf = vec![0u8; CHUNK];
    session.set_blocking(false);

    while running.load(Ordering::SeqCst) {
        let mut progressed = false;

        match listener.accept() {
            Ok((local, peer)) => {
                progressed = true;
                // Opening the channel is a short request/response exchange
                session.set_blocking(true);
                let channel = session.channel_direct_tcpip(&remote_host, remote_port, None);
                session.set_blocking(false);

                match (channel, local.set_nonblocking(true)) {
                    (Ok(channel), Ok(())) => {
                        tracing::debug!(peer = %peer, "tunnel client connected");
                        forwards.push(Forward {
                            local,
                            channel,
                            to_remote: Vec::new(),
                            to_local: Vec::new(),
                            local_eof: false,
                        });
                    }
                    (Err(e), _) => tracing::warn!(error = %e, "SSH port forward refused"),
                    (_, Err(e)) => tracing::warn!(error = %e, "tunnel client socket setup failed"),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::warn!(error = %e, "tunnel listener failed");
                break;
            }
        }

        forwards.retain_mut(|forward| {
            let (moved, finished) = forward.step(&mut buf);
            progressed |= moved;
            !finished
        });

        if !progressed {
            thread::sleep(IDLE_WAIT);
        }
    }

    session.set_blocking(true);
    for mut forward in forwards {
        let _ = forward.channel.close();
    }
    running.store(false, Ordering::SeqCst);
    tracing::debug!("SSH tunnel pump exiting");
}
