//! An in-memory stand-in for the device socket, and a pacer that records
//! instead of sleeping. Useful for tests and for replaying captured frames.
//!
//! Every request written to a [ScriptedLink] consumes the next [Reply] from
//! the shared script, the same way the real device answers exactly one
//! command at a time.

use crate::transport::{Dialer, Endpoint, Pacer};

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// What the scripted device does in answer to the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer with these bytes.
    Frame(Vec<u8>),
    /// Say nothing, so the next read times out.
    Silence,
    /// Fail the next read with this kind of error.
    Error(io::ErrorKind),
}

/// Locks `mutex`, still handing out the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    written: Vec<Vec<u8>>,
    refuse_dials: usize,
    dials: usize,
}

/// Hands out [ScriptedLink]s that all follow one script. Clones share the
/// script, so a test can keep one to inspect what was sent.
#[derive(Debug, Default, Clone)]
pub struct ScriptedDialer {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDialer {
    /// A dialer with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply.
    pub fn push(&self, reply: Reply) -> &Self {
        lock(&self.script).replies.push_back(reply);
        self
    }

    /// Queues a reply frame.
    pub fn push_frame(&self, frame: impl Into<Vec<u8>>) -> &Self {
        self.push(Reply::Frame(frame.into()))
    }

    /// Makes the next `n` dials fail with a refused connection.
    pub fn refuse_next_dials(&self, n: usize) {
        lock(&self.script).refuse_dials = n;
    }

    /// Every request written so far, one entry per write.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.script).written.clone()
    }

    /// How many times a link was requested, refused or not.
    pub fn dial_count(&self) -> usize {
        lock(&self.script).dials
    }

    /// How many replies have not been consumed yet.
    pub fn pending_replies(&self) -> usize {
        lock(&self.script).replies.len()
    }
}

impl Dialer for ScriptedDialer {
    type Link = ScriptedLink;

    fn dial(&mut self, _endpoint: &Endpoint) -> io::Result<ScriptedLink> {
        let mut script = lock(&self.script);
        script.dials += 1;
        if script.refuse_dials > 0 {
            script.refuse_dials -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(ScriptedLink {
            script: Arc::clone(&self.script),
            pending: VecDeque::new(),
            pending_error: None,
        })
    }
}

/// One connection to the scripted device.
#[derive(Debug)]
pub struct ScriptedLink {
    script: Arc<Mutex<Script>>,
    pending: VecDeque<u8>,
    pending_error: Option<io::ErrorKind>,
}

impl Write for ScriptedLink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut script = lock(&self.script);
        script.written.push(data.to_vec());
        match script.replies.pop_front() {
            Some(Reply::Frame(frame)) => self.pending.extend(frame),
            Some(Reply::Error(kind)) => self.pending_error = Some(kind),
            Some(Reply::Silence) | None => {}
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.pending_error.take() {
            return Err(io::Error::from(kind));
        }
        if self.pending.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let available = self.pending.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }
}

/// A [Pacer] that writes down every pause it is asked to take and returns
/// immediately.
#[derive(Debug, Default, Clone)]
pub struct RecordingPacer {
    pauses: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPacer {
    /// A pacer with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pauses taken so far, oldest first.
    pub fn pauses(&self) -> Vec<Duration> {
        lock(&self.pauses).clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, interval: Duration) {
        lock(&self.pauses).push(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::tracking("scripted")
    }

    #[test]
    fn replies_follow_writes() {
        let mut dialer = ScriptedDialer::new();
        dialer.push_frame([0x74, 1]).push(Reply::Silence);
        let mut link = dialer.dial(&endpoint()).unwrap();

        let mut buf = [0; 16];
        link.write_all(&[0x74]).unwrap();
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0x74, 1]);

        link.write_all(&[0x74]).unwrap();
        assert_eq!(
            link.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
        assert_eq!(dialer.written(), vec![vec![0x74], vec![0x74]]);
    }

    #[test]
    fn refused_dials_are_counted() {
        let mut dialer = ScriptedDialer::new();
        dialer.refuse_next_dials(1);
        assert!(dialer.dial(&endpoint()).is_err());
        assert!(dialer.dial(&endpoint()).is_ok());
        assert_eq!(dialer.dial_count(), 2);
    }

    #[test]
    fn script_survives_a_panicking_holder() {
        let dialer = ScriptedDialer::new();
        let shared = dialer.clone();
        let _ = std::thread::spawn(move || {
            let _held = shared.script.lock().unwrap();
            panic!("poisons the script");
        })
        .join();
        assert!(dialer.script.is_poisoned());

        dialer.push_frame([0x74, 1]);
        assert_eq!(dialer.pending_replies(), 1);
    }

    #[test]
    fn recording_pacer_records() {
        let recorder = RecordingPacer::new();
        let mut pacer = recorder.clone();
        pacer.pause(Duration::from_millis(150));
        assert_eq!(recorder.pauses(), vec![Duration::from_millis(150)]);
    }
}
