//! TCP connection to the management controller.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Port of the redirection service when TLS is not used.
pub const DEFAULT_PORT: u16 = 16994;

/// Upper bound for a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{host} has no usable address")]
    NoAddress { host: String },

    #[error("cannot connect to {host} port {port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Resolve `host` and connect to the first address that accepts.
///
/// Every resolved address is tried in order; the error of the last attempt
/// is reported when none succeeds.
pub fn connect(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();
    debug!(host, port, candidates = addrs.len(), "resolved controller address");

    let mut last_err = None;
    for addr in addrs {
        info!(%addr, "trying");
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                // Frames are small and latency sensitive.
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("failed to disable nagle: {}", e);
                }
                info!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                warn!(%addr, "connect failed: {}", e);
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(source) => Err(ConnectError::Connect {
            host: host.to_string(),
            port,
            source,
        }),
        None => Err(ConnectError::NoAddress {
            host: host.to_string(),
        }),
    }
}
