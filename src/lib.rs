//! A client for the Kinsei people-tracking sensor system.
//!
//! A Kinsei device watches a room with thermal sensors and serves what it
//! sees over two small binary TCP protocols: a tracking server (port 2005)
//! that answers questions about the room and the people in it, and a tuning
//! server (port 6666) that exposes the detection parameters.
//!
//! The crate is layered the way the bytes flow:
//!
//! - [command] and [message_decoder] are the wire codec: opcodes out,
//!   typed [device_data] values in.
//! - [session] owns one connection and performs request/response exchanges,
//!   pacing them so the device is not flooded. It reaches the network only
//!   through the [transport] traits, which [scripted_link] replaces in tests.
//! - [client] and [tuner] offer one method per device question. Failures come
//!   back as `None`, `false` or an empty list, so polling loops can skip a
//!   bad tick.
//! - [stability] turns noisy positions into settled ones.
//!
//! [dummy_device] simulates a tracking server for offline use, and [config],
//! [args] and [gui] back the `monitor` and `tuner` binaries.

#![warn(missing_docs)]
pub mod args;
pub mod client;
pub mod command;
pub mod config;
pub mod device_data;
pub mod dummy_device;
pub mod error;
pub mod gui;
pub mod message_decoder;
pub mod scripted_link;
pub mod session;
pub mod stability;
pub mod transport;
pub mod tuner;

pub use client::KinseiClient;
pub use command::{TrackingCommand, TuningParameter};
pub use config::{ClientConfig, RonFile};
pub use device_data::{count_present, Point, Position};
pub use error::{KinseiError, Result};
pub use tuner::{KinseiTuner, TuningConfiguration};
