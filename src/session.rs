//! A single connection to one device endpoint.
//!
//! The session knows nothing about what the bytes mean. It sends a request,
//! reads the answer in one of the two shapes the device uses, and then takes
//! the configured pause so the device's embedded server is not flooded.
//!
//! A failed or timed-out exchange leaves the session in
//! [SessionState::Connected]. Recovering from it takes an explicit
//! [Session::disconnect] followed by [Session::reconnect].

use crate::command::ERROR_SENTINEL;
use crate::error::{KinseiError, Result};
use crate::transport::{Dialer, Endpoint, Pacer, SpinPacer, TcpDialer};

use log::{debug, info, warn};
use std::{
    io::{self, Read, Write},
    time::Duration,
};

/// Size of the buffer a fixed-shape response is read into. Responses are not
/// length-delimited, so this just needs to be larger than any of them.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Pause taken after each exchange unless changed.
pub const DEFAULT_PACING: Duration = Duration::from_millis(150);

/// Whether a session currently holds an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[allow(missing_docs)]
    Disconnected,
    #[allow(missing_docs)]
    Connected,
}

/// Owns the stream to one [Endpoint]. Not synchronized: share it between
/// threads only behind your own lock.
pub struct Session<D: Dialer = TcpDialer, P: Pacer = SpinPacer> {
    endpoint: Endpoint,
    dialer: D,
    pacer: P,
    link: Option<D::Link>,
    pacing: Duration,
}

impl Session {
    /// Opens a TCP session to `endpoint`. A failed connection is logged and
    /// leaves the session disconnected rather than failing construction.
    pub fn open(endpoint: Endpoint, pacing: Duration) -> Self {
        let mut session = Session::with_parts(endpoint, TcpDialer, SpinPacer, pacing);
        if let Err(e) = session.connect() {
            warn!("{}", e);
        }
        session
    }
}

impl<D: Dialer, P: Pacer> Session<D, P> {
    /// Assembles a disconnected session from its parts.
    pub fn with_parts(endpoint: Endpoint, dialer: D, pacer: P, pacing: Duration) -> Self {
        Self {
            endpoint,
            dialer,
            pacer,
            link: None,
            pacing,
        }
    }

    /// The endpoint this session (re)connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        if self.link.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Shorthand for `state() == SessionState::Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// The pause taken after an exchange when the caller asks to wait.
    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Changes the pause taken after an exchange. Takes effect from the next
    /// exchange on.
    pub fn set_pacing(&mut self, pacing: Duration) {
        self.pacing = pacing;
    }

    /// Opens the stream. Does nothing if it is already open.
    pub fn connect(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        match self.dialer.dial(&self.endpoint) {
            Ok(link) => {
                info!("Connected to {}", self.endpoint);
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                self.link = None;
                Err(KinseiError::Connection(e))
            }
        }
    }

    /// Closes the stream if it is open. Always leaves the session
    /// disconnected, and reports whether it was connected before the call.
    pub fn disconnect(&mut self) -> bool {
        let was_connected = self.link.take().is_some();
        if was_connected {
            info!("Disconnected from {}", self.endpoint);
        }
        was_connected
    }

    /// Reopens the stream with the original endpoint, but only when the
    /// session is disconnected. Returns whether it is connected afterwards.
    pub fn reconnect(&mut self) -> bool {
        if !self.is_connected() {
            if let Err(e) = self.connect() {
                warn!("Reconnecting: {}", e);
            }
        }
        self.is_connected()
    }

    fn send(&mut self, request: &[u8]) -> Result<&mut D::Link> {
        let link = self.link.as_mut().ok_or(KinseiError::NotConnected)?;
        link.write_all(request)?;
        link.flush()?;
        Ok(link)
    }

    fn pace(&mut self, wait: bool) {
        if wait {
            self.pacer.pause(self.pacing);
        }
    }

    /// Sends `request` and returns whatever the device answers with in a
    /// single read of at most `max_size` bytes. The caller's decoder knows
    /// how much of it to look at.
    pub fn exchange_fixed(&mut self, request: &[u8], max_size: usize, wait: bool) -> Result<Vec<u8>> {
        let link = self.send(request)?;
        let mut buffer = vec![0; max_size];
        let n = link.read(&mut buffer)?;
        if n == 0 {
            return Err(KinseiError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device closed the connection",
            )));
        }
        buffer.truncate(n);
        debug!("{:02X?} -> {} bytes", request, n);
        self.pace(wait);
        Ok(buffer)
    }

    /// Sends `request` and reads a length-prefixed answer: a 3 byte header
    /// whose bytes 1-2 hold a big-endian element count, followed by exactly
    /// `count * element_width` bytes. The header is kept in the result.
    ///
    /// If the first byte is the error sentinel, only that byte is returned.
    pub fn exchange_variable(
        &mut self,
        request: &[u8],
        element_width: usize,
        wait: bool,
    ) -> Result<Vec<u8>> {
        let link = self.send(request)?;
        let mut frame = vec![0; 3];
        link.read_exact(&mut frame[..1])?;
        if frame[0] == ERROR_SENTINEL {
            frame.truncate(1);
            return Ok(frame);
        }
        link.read_exact(&mut frame[1..])?;
        let n_elements = u16::from_be_bytes([frame[1], frame[2]]) as usize;
        frame.resize(3 + n_elements * element_width, 0);
        link.read_exact(&mut frame[3..])?;
        debug!("{:02X?} -> {} elements", request, n_elements);
        self.pace(wait);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted_link::{RecordingPacer, Reply, ScriptedDialer};

    fn scripted() -> (Session<ScriptedDialer, RecordingPacer>, ScriptedDialer, RecordingPacer) {
        let dialer = ScriptedDialer::new();
        let pacer = RecordingPacer::new();
        let mut session = Session::with_parts(
            Endpoint::tracking("scripted"),
            dialer.clone(),
            pacer.clone(),
            DEFAULT_PACING,
        );
        session.connect().unwrap();
        (session, dialer, pacer)
    }

    #[test]
    fn disconnected_fails_fast() {
        let (mut session, dialer, pacer) = scripted();
        session.disconnect();
        assert!(matches!(
            session.exchange_fixed(&[0x74], RECEIVE_BUFFER_SIZE, true),
            Err(KinseiError::NotConnected)
        ));
        assert!(dialer.written().is_empty());
        assert!(pacer.pauses().is_empty());
    }

    #[test]
    fn idempotent_disconnect() {
        let (mut session, _, _) = scripted();
        assert!(session.disconnect());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.disconnect());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn reconnect_only_when_disconnected() {
        let (mut session, dialer, _) = scripted();
        assert!(session.reconnect());
        assert_eq!(dialer.dial_count(), 1);

        session.disconnect();
        assert!(session.reconnect());
        assert_eq!(dialer.dial_count(), 2);

        session.disconnect();
        dialer.refuse_next_dials(1);
        assert!(!session.reconnect());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn connect_failure_leaves_disconnected() {
        let dialer = ScriptedDialer::new();
        dialer.refuse_next_dials(1);
        let mut session = Session::with_parts(
            Endpoint::tracking("scripted"),
            dialer,
            RecordingPacer::new(),
            DEFAULT_PACING,
        );
        assert!(matches!(session.connect(), Err(KinseiError::Connection(_))));
        assert!(!session.is_connected());
    }

    #[test]
    fn pacing_only_when_waiting() {
        let (mut session, dialer, pacer) = scripted();
        dialer.push_frame([0x74, 1]).push_frame([0x74, 1]);

        session.exchange_fixed(&[0x74], RECEIVE_BUFFER_SIZE, false).unwrap();
        assert!(pacer.pauses().is_empty());

        session.set_pacing(Duration::from_millis(55));
        session.exchange_fixed(&[0x74], RECEIVE_BUFFER_SIZE, true).unwrap();
        assert_eq!(pacer.pauses(), vec![Duration::from_millis(55)]);
    }

    #[test]
    fn variable_exchange_reads_declared_elements() {
        let (mut session, dialer, pacer) = scripted();
        dialer.push_frame([0x1B, 0x00, 0x02, 0x0B, 0xB8, 0x0B, 0xC2]);

        let frame = session.exchange_variable(&[0x1B], 2, true).unwrap();
        assert_eq!(frame, vec![0x1B, 0x00, 0x02, 0x0B, 0xB8, 0x0B, 0xC2]);
        assert_eq!(pacer.pauses().len(), 1);

        dialer.push_frame([0x1B, 0x00, 0x01, 0x0B, 0xB8]);
        session.exchange_variable(&[0x1B], 2, false).unwrap();
        assert_eq!(pacer.pauses().len(), 1);
    }

    #[test]
    fn variable_exchange_passes_sentinel_through() {
        let (mut session, dialer, _) = scripted();
        dialer.push_frame([ERROR_SENTINEL]);
        assert_eq!(
            session.exchange_variable(&[0x1B], 2, true).unwrap(),
            vec![ERROR_SENTINEL]
        );
    }

    #[test]
    fn timeout_does_not_disconnect() {
        let (mut session, dialer, pacer) = scripted();
        dialer.push(Reply::Silence);
        assert!(matches!(
            session.exchange_fixed(&[0x64], RECEIVE_BUFFER_SIZE, true),
            Err(KinseiError::Transport(_))
        ));
        assert!(session.is_connected());
        assert!(pacer.pauses().is_empty());
    }
}
