//! The seams between a [Session](crate::session::Session) and the outside
//! world: how a stream to the device is opened, and how the pause between
//! commands is taken.
//!
//! Both are traits so that tests can swap the TCP socket for a scripted link
//! and the sleep for a recorder, the same way the rest of the crate only ever
//! talks to a device through a [Dialer].

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::debug;

use crate::command::{TRACKING_PORT, TUNING_PORT};

/// Default connect and I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Where a device lives. Fixed for the lifetime of a session; reconnecting
/// reuses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// IPv4 address or resolvable name.
    pub host: String,
    pub port: u16,
    /// Used for connecting and for every read and write afterwards.
    pub timeout: Duration,
}

impl Endpoint {
    /// An endpoint with an explicit port and timeout.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// The tracking server of `host` on its default port.
    pub fn tracking(host: impl Into<String>) -> Self {
        Self::new(host, TRACKING_PORT, DEFAULT_TIMEOUT)
    }

    /// The tuning server of `host` on its default port.
    pub fn tuning(host: impl Into<String>) -> Self {
        Self::new(host, TUNING_PORT, DEFAULT_TIMEOUT)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens streams to an [Endpoint].
pub trait Dialer {
    /// The open stream.
    type Link: Read + Write;

    /// Opens a new stream, honoring the endpoint's timeout.
    fn dial(&mut self, endpoint: &Endpoint) -> io::Result<Self::Link>;
}

/// Dials plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Link = TcpStream;

    fn dial(&mut self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let timeout = Some(endpoint.timeout).filter(|t| !t.is_zero());
        let mut last_error = None;

        for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} via {}", endpoint, addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Could not reach {} via {}: {}", endpoint, addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} resolved to no addresses", endpoint.host),
            )
        }))
    }
}

/// Takes the pause that follows an exchange.
pub trait Pacer {
    /// Blocks for `interval`. Not cancellable.
    fn pause(&mut self, interval: Duration);
}

/// Sleeps with [spin_sleep], which stays accurate at the tens of
/// milliseconds the device needs between commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinPacer;

impl Pacer for SpinPacer {
    fn pause(&mut self, interval: Duration) {
        spin_sleep::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn default_ports() {
        assert_eq!(Endpoint::tracking("192.168.42.1").port, 2005);
        assert_eq!(Endpoint::tuning("192.168.42.1").port, 6666);
        assert_eq!(Endpoint::tracking("kit").to_string(), "kit:2005");
    }

    #[test]
    fn dial_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port, Duration::from_millis(500));

        let stream = TcpDialer.dial(&endpoint).unwrap();
        assert_eq!(
            stream.read_timeout().unwrap(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn dial_refused() {
        // bind then drop, so nothing listens on the port
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let endpoint = Endpoint::new("127.0.0.1", port, Duration::from_millis(500));
        assert!(TcpDialer.dial(&endpoint).is_err());
    }

    #[test]
    fn spin_pacer_waits() {
        let start = Instant::now();
        SpinPacer.pause(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
