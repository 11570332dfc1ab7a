// Commandline argument parser using clap for the monitor and tuner binaries

use crate::command::TuningParameter;
use crate::config::{ClientConfig, RonFile};
use crate::error::Result;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// How to reach the device. Shared by both binaries.
#[derive(Debug, Args, Clone)]
pub struct ConnectionArgs {
    /// RON file with connection settings. Flags given here override it
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address of the device, for whichever server is used
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the server to talk to, if not the default one
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Pause between commands, in milliseconds
    #[arg(short = 'i', long = "interval")]
    pub interval_ms: Option<u64>,
}

impl ConnectionArgs {
    fn base(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_path(path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.tracking_host = host.clone();
            config.tuning_host = host.clone();
        }
        Ok(config)
    }

    /// The configuration for the tracking server, with `port` and `interval`
    /// applied to it.
    pub fn tracking_config(&self) -> Result<ClientConfig> {
        let mut config = self.base()?;
        if let Some(port) = self.port {
            config.tracking_port = port;
        }
        if let Some(ms) = self.interval_ms {
            config.tracking_pacing_ms = ms;
        }
        Ok(config)
    }

    /// The configuration for the tuning server, with `port` and `interval`
    /// applied to it.
    pub fn tuning_config(&self) -> Result<ClientConfig> {
        let mut config = self.base()?;
        if let Some(port) = self.port {
            config.tuning_port = port;
        }
        if let Some(ms) = self.interval_ms {
            config.tuning_pacing_ms = ms;
        }
        Ok(config)
    }
}

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Watch the people a Kinsei device tracks
pub struct MonitorArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Stability radius, in millimeters
    #[arg(short = 'r', long = "radius")]
    pub radius: Option<u16>,

    /// Frames a position must hold to count as settled
    #[arg(short = 'f', long = "frames")]
    pub required_frames: Option<u32>,

    /// Monitor a simulated device with this many people instead of a real one
    #[arg(long = "dummy")]
    pub dummy: Option<usize>,

    /// How far the simulated people wander, in millimeters
    #[arg(long = "noise", default_value_t = 40)]
    pub noise: u16,

    /// Print readings as text instead of plotting the room
    #[arg(long = "text")]
    pub text: bool,
}

impl MonitorArgs {
    /// The tracking configuration with every flag applied.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = self.connection.tracking_config()?;
        if let Some(radius) = self.radius {
            config.stability_radius = radius;
        }
        if let Some(frames) = self.required_frames {
            config.required_frames = frames;
        }
        Ok(config)
    }
}

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Read and change the tuning parameters of a Kinsei device
pub struct TunerArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: TunerTask,
}

/// What the tuner should do.
#[derive(Debug, Subcommand, Clone)]
pub enum TunerTask {
    /// Print one parameter, or all of them
    Get(GetCommand),

    /// Change one parameter
    Set(SetCommand),

    /// Make the device learn its background again
    ResetBackground,

    /// Reset the sensor offsets
    ResetOffset,

    /// Keep the current parameters across reboots
    SaveOverride,

    /// Go back to the factory parameters after the next reboot
    RemoveOverride,

    /// Save every parameter to a RON file
    Dump(FileCommand),

    /// Write every parameter from a RON file to the device
    Load(FileCommand),
}

/// Arguments of `get`.
#[derive(Debug, Args, Clone)]
pub struct GetCommand {
    /// Parameter to read. Reads all of them if left out
    pub param: Option<ParameterName>,
}

/// Arguments of `set`.
#[derive(Debug, Args, Clone)]
pub struct SetCommand {
    /// Parameter to write
    pub param: ParameterName,

    /// New value, with at most two decimals
    #[arg(allow_hyphen_values = true)]
    pub value: f64,
}

/// Arguments of `dump` and `load`.
#[derive(Debug, Args, Clone)]
pub struct FileCommand {
    /// Path of the configuration file
    pub file: PathBuf,
}

/// The commandline names of the tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParameterName {
    #[allow(missing_docs)]
    BackgroundAlpha,
    #[allow(missing_docs)]
    BackgroundThreshold,
    #[allow(missing_docs)]
    TemperatureThreshold,
    #[allow(missing_docs)]
    FusionBackgroundThreshold,
    #[allow(missing_docs)]
    FusionConsensusFactor,
    #[allow(missing_docs)]
    FusionThreshold,
}

impl From<ParameterName> for TuningParameter {
    fn from(name: ParameterName) -> Self {
        use ParameterName as PN;
        use TuningParameter as TP;
        match name {
            PN::BackgroundAlpha => TP::BackgroundAlpha,
            PN::BackgroundThreshold => TP::BackgroundThreshold,
            PN::TemperatureThreshold => TP::TemperatureThreshold,
            PN::FusionBackgroundThreshold => TP::FusionBackgroundThreshold,
            PN::FusionConsensusFactor => TP::FusionConsensusFactor,
            PN::FusionThreshold => TP::FusionThreshold,
        }
    }
}
