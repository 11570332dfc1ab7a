//! A simulated tracking server, for trying the client out without a device
//! and for end-to-end tests over a real socket.
//!
//! The device runs on a background thread and serves one connection at a
//! time on a local port. Its people stand on a circle around the middle of a
//! rectangular room, and every positions request jitters them by up to the
//! configured noise.

use crate::command::{TrackingCommand, ERROR_SENTINEL};
use crate::device_data::{Point, Position, RoomGeometry, ThermalResolution, Zone};
use crate::transport::{Endpoint, DEFAULT_TIMEOUT};

use log::{debug, warn};
use rand::prelude::*;
use std::{
    f64::consts::PI,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread,
    time::Duration,
};

/// How long the device thread waits on its socket before checking for
/// control signals.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The device always reports at least this many slots, absent or not.
const MIN_SLOTS: usize = 4;

const ROOM_WIDTH: u16 = 6000;
const ROOM_HEIGHT: u16 = 4000;

/// Encoders for response frames, the inverse of
/// [message_decoder](crate::message_decoder). The simulated device answers
/// with these, and tests use them to script responses.
pub mod frames {
    use super::*;

    fn push16(frame: &mut Vec<u8>, value: u16) {
        frame.extend_from_slice(&value.to_be_bytes());
    }

    fn count(n: usize) -> u8 {
        n.min(u8::MAX as usize) as u8
    }

    #[allow(missing_docs)]
    pub fn online(flag: bool) -> Vec<u8> {
        vec![TrackingCommand::CheckOnline.opcode(), flag as u8]
    }

    /// Bounding box, corner count, then the corners.
    pub fn room(width: u16, height: u16, corners: &[Point]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::RoomSize.opcode()];
        push16(&mut frame, width);
        push16(&mut frame, height);
        frame.push(count(corners.len()));
        for corner in corners {
            push16(&mut frame, corner.x);
            push16(&mut frame, corner.y);
        }
        frame
    }

    /// One six byte entry per slot, starting with two zero bytes.
    pub fn positions(slots: &[Position]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::PersonsPosition.opcode(), count(slots.len())];
        for slot in slots {
            frame.extend_from_slice(&[0, 0]);
            push16(&mut frame, slot.x);
            push16(&mut frame, slot.y);
        }
        frame
    }

    #[allow(missing_docs)]
    pub fn persons_fixed(n: u8) -> Vec<u8> {
        vec![TrackingCommand::NumberPersonsFixed.opcode(), n]
    }

    /// `n` is rounded to tenths.
    pub fn persons_float(n: f64) -> Vec<u8> {
        let tenths = (n * 10.0).round().clamp(0.0, u8::MAX as f64) as u8;
        vec![TrackingCommand::NumberPersonsFloat.opcode(), tenths]
    }

    /// Candidate detections. The device carries the confidence in the low
    /// byte of y, so only the points are needed.
    pub fn fusion(points: &[Point]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::FusionValues.opcode(), count(points.len())];
        for point in points {
            frame.extend_from_slice(&[0, 0]);
            push16(&mut frame, point.x);
            push16(&mut frame, point.y);
            frame.push(0);
        }
        frame
    }

    /// Zones laid out the way the device walks them: the zone after a
    /// polygon starts `4n + 1` bytes past the polygon's type byte, on top of
    /// the low byte of its last corner.
    pub fn zones(zones: &[Zone]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::Zones.opcode(), count(zones.len())];
        for (i, zone) in zones.iter().enumerate() {
            match zone {
                Zone::Circular { center, radius } => {
                    frame.push(0);
                    push16(&mut frame, center.x);
                    push16(&mut frame, center.y);
                    push16(&mut frame, *radius);
                }
                Zone::Polygonal { corners } => {
                    let start = frame.len();
                    frame.push(1);
                    frame.push(count(corners.len()));
                    for corner in corners {
                        push16(&mut frame, corner.x);
                        push16(&mut frame, corner.y);
                    }
                    if i + 1 < zones.len() {
                        frame.truncate(start + 4 * corners.len() + 1);
                    }
                }
            }
        }
        frame
    }

    /// Volts, sent as hundredths.
    pub fn battery_levels(volts: &[f64]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::BatteryLevels.opcode(), count(volts.len())];
        for v in volts {
            push16(&mut frame, (v * 100.0).round() as u16);
        }
        frame
    }

    /// Five bytes per sensor: the status, then four bytes the client skips.
    pub fn sensors_online(online: &[bool]) -> Vec<u8> {
        let mut frame = vec![
            TrackingCommand::CheckSensorsOnline.opcode(),
            count(online.len()),
        ];
        for &flag in online {
            frame.extend_from_slice(&[flag as u8, 0, 0, 0, 0]);
        }
        frame
    }

    #[allow(missing_docs)]
    pub fn thermal_resolution(resolution: ThermalResolution) -> Vec<u8> {
        vec![
            TrackingCommand::ThermalMapResolution.opcode(),
            resolution.cols,
            resolution.rows,
            resolution.pixel_size_mm,
        ]
    }

    /// The only length-prefixed response: a 16 bit pixel count, then the
    /// pixels.
    pub fn thermal_pixels(pixels: &[u16]) -> Vec<u8> {
        let mut frame = vec![TrackingCommand::ThermalMapPixels.opcode()];
        push16(&mut frame, pixels.len().min(u16::MAX as usize) as u16);
        for &p in pixels {
            push16(&mut frame, p);
        }
        frame
    }
}

enum Signal {
    Persons(usize),
    Noise(u16),
    Stop,
}

/// The state of the simulated room.
struct SimulatedRoom {
    room: RoomGeometry,
    persons: usize,
    noise: u16,
    thermal: ThermalResolution,
    rng: StdRng,
}

impl SimulatedRoom {
    fn new() -> Self {
        let corners = vec![
            Point::new(0, 0),
            Point::new(ROOM_WIDTH, 0),
            Point::new(ROOM_WIDTH, ROOM_HEIGHT),
            Point::new(0, ROOM_HEIGHT),
        ];
        SimulatedRoom {
            room: RoomGeometry {
                width: ROOM_WIDTH,
                height: ROOM_HEIGHT,
                corners,
            },
            persons: 0,
            noise: 0,
            thermal: ThermalResolution {
                cols: 16,
                rows: 12,
                pixel_size_mm: 250,
            },
            rng: StdRng::from_entropy(),
        }
    }

    fn apply(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Persons(n) => self.persons = n,
            Signal::Noise(mm) => self.noise = mm,
            Signal::Stop => return false,
        }
        true
    }

    fn center(&self) -> Point {
        Point::new(self.room.width / 2, self.room.height / 2)
    }

    /// Where each person stands when there is no noise.
    fn home_positions(&self) -> Vec<Position> {
        let center = self.center();
        let range = (self.room.width.min(self.room.height) / 4) as f64;
        (0..self.persons)
            .map(|i| (i as f64 / self.persons as f64) * 2.0 * PI)
            .map(|angle| Position {
                x: (center.x as f64 + angle.cos() * range).round() as u16,
                y: (center.y as f64 + angle.sin() * range).round() as u16,
            })
            .collect()
    }

    fn jitter(&mut self, value: u16) -> u16 {
        if self.noise == 0 {
            return value;
        }
        let noise = self.noise as i32;
        (value as i32 + self.rng.gen_range(-noise..=noise)).max(1) as u16
    }

    fn positions(&mut self) -> Vec<Position> {
        let mut slots: Vec<Position> = self
            .home_positions()
            .into_iter()
            .map(|p| Position {
                x: self.jitter(p.x),
                y: self.jitter(p.y),
            })
            .collect();
        slots.resize(slots.len().max(MIN_SLOTS), Position::ABSENT);
        slots
    }

    fn thermal_pixels(&mut self) -> Vec<u16> {
        let noise = self.noise.min(50);
        (0..self.thermal.pixel_count())
            .map(|_| 2900 + self.rng.gen_range(0..=noise))
            .collect()
    }

    /// The frame the device answers `opcode` with.
    fn respond(&mut self, opcode: u8) -> Vec<u8> {
        use TrackingCommand as TC;
        let Some(command) = TrackingCommand::from_opcode(opcode) else {
            return vec![ERROR_SENTINEL];
        };
        match command {
            TC::CheckOnline => frames::online(true),
            TC::RoomSize => frames::room(self.room.width, self.room.height, &self.room.corners),
            TC::PersonsPosition => {
                let slots = self.positions();
                frames::positions(&slots)
            }
            TC::NumberPersonsFixed => frames::persons_fixed(self.persons.min(255) as u8),
            TC::NumberPersonsFloat => frames::persons_float(self.persons as f64),
            TC::FusionValues => {
                let points: Vec<Point> = self
                    .positions()
                    .into_iter()
                    .filter(|p| !p.is_absent())
                    .map(|p| Point::new(p.x, p.y))
                    .collect();
                frames::fusion(&points)
            }
            TC::Zones => frames::zones(&[Zone::Circular {
                center: self.center(),
                radius: 500,
            }]),
            TC::BatteryLevels => frames::battery_levels(&[3.7, 0.0, 3.55, 0.0]),
            TC::CheckSensorsOnline => frames::sensors_online(&[true; 4]),
            TC::ThermalMapResolution => frames::thermal_resolution(self.thermal),
            TC::ThermalMapPixels => {
                let pixels = self.thermal_pixels();
                frames::thermal_pixels(&pixels)
            }
        }
    }
}

/// A simulated device listening on a local port.
pub struct DummyDevice {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    addr: SocketAddr,
}

impl DummyDevice {
    /// Starts a device on a free port of the loopback interface, with nobody
    /// in the room.
    pub fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel::<Signal>();

        let handle = thread::spawn(move || serve(listener, rx, SimulatedRoom::new()));
        debug!("Simulated device listening on {}", addr);

        Ok(DummyDevice {
            handle: Some(handle),
            tx,
            addr,
        })
    }

    /// Where the device's tracking server can be reached.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port(), DEFAULT_TIMEOUT)
    }

    /// Changes how many people are in the room.
    pub fn set_persons(&self, n: usize) {
        // a stopped device has nothing left to change
        let _ = self.tx.send(Signal::Persons(n));
    }

    /// Changes how far, per axis and in millimeters, reported positions
    /// stray from where people stand.
    pub fn set_noise(&self, mm: u16) {
        let _ = self.tx.send(Signal::Noise(mm));
    }

    /// Stops serving and waits for the device thread to finish.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("Simulated device thread panicked");
            }
        }
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Applies pending signals. Returns false once told to stop.
fn drain(rx: &mpsc::Receiver<Signal>, room: &mut SimulatedRoom) -> bool {
    while let Ok(signal) = rx.try_recv() {
        if !room.apply(signal) {
            return false;
        }
    }
    true
}

fn serve(listener: TcpListener, rx: mpsc::Receiver<Signal>, mut room: SimulatedRoom) {
    let mut client: Option<TcpStream> = None;
    loop {
        if !drain(&rx, &mut room) {
            return;
        }

        if client.is_none() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let ready = stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_read_timeout(Some(POLL_INTERVAL)));
                    match ready {
                        Ok(()) => {
                            debug!("Simulated device serving {}", peer);
                            client = Some(stream);
                        }
                        Err(e) => warn!("Simulated device dropping {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!("Simulated device stopped accepting: {}", e);
                    return;
                }
            }
            continue;
        }
        let Some(stream) = client.as_mut() else {
            continue;
        };

        let mut request = [0; 3];
        let hang_up = match stream.read(&mut request) {
            Ok(0) => true,
            Ok(_) => {
                // signals sent before this request must be visible in its answer
                if !drain(&rx, &mut room) {
                    return;
                }
                let reply = room.respond(request[0]);
                stream.write_all(&reply).is_err()
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                false
            }
            Err(_) => true,
        };
        if hang_up {
            debug!("Simulated device lost its client");
            client = None;
        }
    }
}
