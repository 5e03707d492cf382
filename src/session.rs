//! Opening the connection and completing the TLS handshake.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection};

use crate::config::Config;
use crate::error::{self, Error, Result};
use crate::negotiate::{Negotiation, Script};
use crate::target::Target;
use crate::verification::BuilderVerifierExt;

/// How the TLS handshake is reached.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// TLS starts as soon as TCP is connected.
    Direct,
    /// A plaintext exchange has to ask for TLS first.
    Upgrade(&'static Script),
}

impl Mode {
    /// Picks the mode from the target's scheme.
    pub fn for_target(target: &Target) -> Self {
        match Script::for_scheme(target.scheme()) {
            Some(script) => Self::Upgrade(script),
            None => Self::Direct,
        }
    }
}

/// A completed TLS session with the target.
#[derive(Debug)]
pub struct Session {
    conn: ClientConnection,
    sock: TcpStream,
    negotiation: Option<Negotiation>,
}

impl Session {
    /// Connects to `target` and runs the handshake, upgrading from plaintext
    /// first when the scheme requires it.
    pub fn establish(target: &Target, config: &Config) -> Result<Self> {
        let server_name = ServerName::try_from(target.host().to_owned()).map_err(|e| {
            Error::TargetResolution {
                target: target.to_string(),
                reason: format!("`{}` is not a valid server name: {e}", target.host()),
            }
        })?;
        let tls_config = client_config(config).map_err(|e| Error::handshake(target.host(), e))?;

        let mut sock = connect(target, config.timeout())?;

        let negotiation = match Mode::for_target(target) {
            Mode::Direct => None,
            Mode::Upgrade(script) => Some(script.run(&mut sock)?),
        };

        let mut conn = ClientConnection::new(tls_config, server_name)
            .map_err(|e| Error::handshake(target.host(), e))?;
        handshake(&mut conn, &mut sock, config.timeout()).map_err(|e| {
            // A peer that stops answering is a connection problem, not a TLS one.
            if error::is_timeout(&e) {
                Error::Connection {
                    host: target.host().to_owned(),
                    port: target.port(),
                    source: e,
                }
            } else {
                Error::handshake(target.host(), describe_io(&e))
            }
        })?;

        log::debug!(
            "handshake with {} complete: {:?} {:?}",
            target,
            conn.protocol_version(),
            conn.negotiated_cipher_suite().map(|suite| suite.suite())
        );

        Ok(Self {
            conn,
            sock,
            negotiation,
        })
    }

    /// The certificates the peer presented, exactly as received.
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }

    /// The plaintext exchange that preceded the handshake, if there was one.
    pub fn negotiation(&self) -> Option<&Negotiation> {
        self.negotiation.as_ref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.conn.send_close_notify();
        // Best effort: the peer may already be gone.
        let _ = self.conn.write_tls(&mut self.sock);
    }
}

fn client_config(config: &Config) -> Result<Arc<ClientConfig>, rustls::Error> {
    Ok(Arc::new(
        ClientConfig::builder_with_provider(config.provider())
            .with_safe_default_protocol_versions()?
            .with_fetch_verifier(config)
            .with_no_client_auth(),
    ))
}

/// Opens a TCP connection to the first address of `target` that accepts one.
///
/// `timeout` bounds all connection attempts together.
fn connect(target: &Target, timeout: Duration) -> Result<TcpStream> {
    let connection_error = |source| Error::Connection {
        host: target.host().to_owned(),
        port: target.port(),
        source,
    };

    let addrs: Vec<SocketAddr> = (target.host(), target.port())
        .to_socket_addrs()
        .map_err(connection_error)?
        .collect();

    let sock = connect_any(&addrs, timeout).map_err(connection_error)?;
    sock.set_read_timeout(Some(timeout))
        .and_then(|()| sock.set_write_timeout(Some(timeout)))
        .map_err(connection_error)?;
    Ok(sock)
}

/// Tries each of `addrs` in turn until one connects or `timeout` has elapsed.
pub(crate) fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out before an address accepted the connection",
            ));
        }
        log::debug!("connecting to {addr}");
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                log::debug!("connecting to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

/// Drives `conn` until the handshake is finished or `timeout` has elapsed.
///
/// The socket read timeout shrinks with the time left, so the whole handshake
/// is bounded rather than each individual read.
fn handshake(
    conn: &mut ClientConnection,
    sock: &mut TcpStream,
    timeout: Duration,
) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    while conn.is_handshaking() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        sock.set_read_timeout(Some(remaining))?;
        let (read, wrote) = conn.complete_io(sock)?;
        if read == 0 && wrote == 0 && conn.is_handshaking() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
    // Our final handshake flight may still be queued.
    while conn.wants_write() {
        conn.write_tls(sock)?;
    }
    sock.set_read_timeout(Some(timeout))
}

fn describe_io(err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        "connection closed during handshake".to_owned()
    } else {
        err.to_string()
    }
}
