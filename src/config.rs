//! Where a device lives and how to talk to it, kept as a [ron] file so a
//! deployment can be described once and shared between the binaries.
//!
//! A file only needs the fields that differ from the defaults:
//!
//! ```text
//! (tracking_host: "10.0.0.17", stability_radius: 250)
//! ```

use crate::command::{TRACKING_PORT, TUNING_PORT};
use crate::error::{KinseiError, Result};
use crate::session::DEFAULT_PACING;
use crate::stability::{DEFAULT_REQUIRED_FRAMES, DEFAULT_STABILITY_RADIUS};
use crate::transport::{Endpoint, DEFAULT_TIMEOUT};
use crate::tuner::DEFAULT_TUNING_PACING;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

/// Address of the tracking server while the device runs as an access point.
pub const DEFAULT_TRACKING_HOST: &str = "192.168.42.1";

/// Address of the tuning server while the device runs as an access point.
pub const DEFAULT_TUNING_HOST: &str = "192.168.76.1";

/// Settings kept as pretty [ron] text.
pub trait RonFile: Serialize + DeserializeOwned {
    /// Write out `self` to the path provided.
    fn to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut handle = File::create(path).map_err(KinseiError::ConfigIo)?;
        self.to_file(&mut handle)
    }

    /// Write out `self` to the [Write]able object provided.
    fn to_file(&self, file: &mut impl Write) -> Result<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(KinseiError::ConfigRon)?;
        file.write_all(text.as_bytes())
            .map_err(KinseiError::ConfigIo)
    }

    /// Read a value from the path provided.
    fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut handle = File::open(path).map_err(KinseiError::ConfigIo)?;
        Self::from_file(&mut handle)
    }

    /// Read a value from the [Read]able object provided.
    fn from_file(file: &mut impl Read) -> Result<Self> {
        let mut raw_text = Vec::new();
        file.read_to_end(&mut raw_text)
            .map_err(KinseiError::ConfigIo)?;
        ron::de::from_bytes(&raw_text).map_err(KinseiError::ConfigRonSpanned)
    }
}

/// Connection and tracking settings for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub tracking_host: String,
    pub tuning_host: String,
    pub tracking_port: u16,
    pub tuning_port: u16,
    /// Connect and I/O timeout. 0 blocks forever.
    pub timeout_ms: u64,
    /// Pause after each tracking exchange.
    pub tracking_pacing_ms: u64,
    /// Pause after each tuning exchange.
    pub tuning_pacing_ms: u64,
    /// Per-axis distance, in millimeters, within which a position counts as
    /// holding still.
    pub stability_radius: u16,
    /// Frames a position must hold before the continuous filter fires.
    pub required_frames: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracking_host: DEFAULT_TRACKING_HOST.to_owned(),
            tuning_host: DEFAULT_TUNING_HOST.to_owned(),
            tracking_port: TRACKING_PORT,
            tuning_port: TUNING_PORT,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            tracking_pacing_ms: DEFAULT_PACING.as_millis() as u64,
            tuning_pacing_ms: DEFAULT_TUNING_PACING.as_millis() as u64,
            stability_radius: DEFAULT_STABILITY_RADIUS,
            required_frames: DEFAULT_REQUIRED_FRAMES,
        }
    }
}

impl ClientConfig {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[allow(missing_docs)]
    pub fn tracking_endpoint(&self) -> Endpoint {
        Endpoint::new(self.tracking_host.clone(), self.tracking_port, self.timeout())
    }

    #[allow(missing_docs)]
    pub fn tuning_endpoint(&self) -> Endpoint {
        Endpoint::new(self.tuning_host.clone(), self.tuning_port, self.timeout())
    }

    #[allow(missing_docs)]
    pub fn tracking_pacing(&self) -> Duration {
        Duration::from_millis(self.tracking_pacing_ms)
    }

    #[allow(missing_docs)]
    pub fn tuning_pacing(&self) -> Duration {
        Duration::from_millis(self.tuning_pacing_ms)
    }
}

/// Missing fields take their defaults.
impl RonFile for ClientConfig {}
