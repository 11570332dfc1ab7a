//! The tuning client, for the device's second server.
//!
//! Tuning answers are always three bytes: the opcode echoed back, then a
//! 16 bit value scaled by 100. Control commands (background reset and the
//! override file) are answered by echoing the opcode alone.

use crate::command::{encode_fixed_point_argument, TuningCommand, TuningParameter};
use crate::config::{ClientConfig, RonFile};
use crate::error::{KinseiError, Result};
use crate::message_decoder::{decode_echo, decode_tuning_value};
use crate::session::Session;
use crate::transport::{Dialer, Endpoint, Pacer, SpinPacer, TcpDialer};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of every tuning answer.
pub const TUNING_RESPONSE_SIZE: usize = 3;

/// Pause taken after each tuning exchange unless changed. The tuning server
/// is slower to settle than the tracking one.
pub const DEFAULT_TUNING_PACING: Duration = Duration::from_millis(350);

/// Every tunable parameter at once, in a form that can be kept in a file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningConfiguration {
    pub background_alpha: f64,
    pub background_threshold: f64,
    pub temperature_threshold: f64,
    pub fusion_background_threshold: f64,
    pub fusion_consensus_factor: f64,
    pub fusion_threshold: f64,
}

impl TuningConfiguration {
    /// The value of one parameter.
    pub fn get(&self, param: TuningParameter) -> f64 {
        use TuningParameter as TP;
        match param {
            TP::BackgroundAlpha => self.background_alpha,
            TP::BackgroundThreshold => self.background_threshold,
            TP::TemperatureThreshold => self.temperature_threshold,
            TP::FusionBackgroundThreshold => self.fusion_background_threshold,
            TP::FusionConsensusFactor => self.fusion_consensus_factor,
            TP::FusionThreshold => self.fusion_threshold,
        }
    }

    /// Builds a configuration from values in [TuningParameter::ALL] order.
    pub fn from_values(values: [f64; 6]) -> Self {
        Self {
            background_alpha: values[0],
            background_threshold: values[1],
            temperature_threshold: values[2],
            fusion_background_threshold: values[3],
            fusion_consensus_factor: values[4],
            fusion_threshold: values[5],
        }
    }
}

impl RonFile for TuningConfiguration {}

/// A client for the tuning server of one device.
pub struct KinseiTuner<D: Dialer = TcpDialer, P: Pacer = SpinPacer> {
    session: Session<D, P>,
    last_error: Option<KinseiError>,
}

impl KinseiTuner {
    /// Connects to the tuning server at `endpoint` over TCP. Like the
    /// tracking client, a failed connection only leaves the tuner
    /// disconnected.
    pub fn connect(endpoint: Endpoint, pacing: Duration) -> Self {
        Self::from_session(Session::open(endpoint, pacing))
    }

    /// Connects using the tuning settings of `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::connect(config.tuning_endpoint(), config.tuning_pacing())
    }
}

impl<D: Dialer, P: Pacer> KinseiTuner<D, P> {
    /// Wraps an existing session, connected or not.
    pub fn from_session(session: Session<D, P>) -> Self {
        Self {
            session,
            last_error: None,
        }
    }

    #[allow(missing_docs)]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Why the most recent command failed, cleared by the next success.
    pub fn last_error(&self) -> Option<&KinseiError> {
        self.last_error.as_ref()
    }

    /// Closes the connection. Returns whether it was open.
    pub fn disconnect(&mut self) -> bool {
        self.session.disconnect()
    }

    /// Reopens the connection if it is closed, and returns whether it is
    /// open afterwards.
    pub fn reconnect(&mut self) -> bool {
        self.session.reconnect()
    }

    /// Sets the pause taken after each exchange that waits, in milliseconds.
    pub fn set_time_interval_ms(&mut self, ms: u64) {
        self.session.set_pacing(Duration::from_millis(ms));
    }

    /// The pause taken after each exchange that waits, in milliseconds.
    pub fn time_interval_ms(&self) -> u64 {
        self.session.pacing().as_millis() as u64
    }

    fn exchange(&mut self, command: TuningCommand, wait: bool) -> Result<Vec<u8>> {
        let request = command.encode()?;
        self.session
            .exchange_fixed(&request, TUNING_RESPONSE_SIZE, wait)
    }

    fn settle<T>(&mut self, command: TuningCommand, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(e) => {
                warn!("{:?} failed: {}", command, e);
                self.last_error = Some(e);
                None
            }
        }
    }

    /// Reads one parameter.
    pub fn get(&mut self, param: TuningParameter, wait: bool) -> Option<f64> {
        let command = TuningCommand::Get(param);
        let result = self
            .exchange(command, wait)
            .and_then(|frame| decode_tuning_value(param, &frame));
        self.settle(command, result)
    }

    /// Writes one parameter and reports whether the device echoed the value
    /// back unchanged.
    ///
    /// A value that cannot be encoded is refused before anything is sent,
    /// with [KinseiError::ArgumentOutOfRange].
    pub fn set(&mut self, param: TuningParameter, value: f64, wait: bool) -> Result<bool> {
        let argument = encode_fixed_point_argument(value)?;
        let command = TuningCommand::Set(param, value);
        let result = self.exchange(command, wait).and_then(|frame| {
            decode_tuning_value(param, &frame)?;
            Ok(frame[1..] == argument)
        });
        Ok(self.settle(command, result).unwrap_or(false))
    }

    fn control(&mut self, command: TuningCommand, wait: bool) -> bool {
        let result = self
            .exchange(command, wait)
            .and_then(|frame| decode_echo(command.opcode(), &frame));
        self.settle(command, result).unwrap_or(false)
    }

    /// Makes the tracking and fusion servers learn their background again.
    pub fn reset_background(&mut self, wait: bool) -> bool {
        self.control(TuningCommand::ResetBackground, wait)
    }

    /// Resets the sensor offsets.
    pub fn reset_offset(&mut self, wait: bool) -> bool {
        self.control(TuningCommand::ResetOffset, wait)
    }

    /// Stores the current parameters on the device so they survive a reboot.
    pub fn save_override(&mut self) -> bool {
        self.control(TuningCommand::SaveOverride, true)
    }

    /// Deletes the stored parameters, so the factory ones apply after a
    /// reboot.
    pub fn remove_override(&mut self) -> bool {
        self.control(TuningCommand::RemoveOverride, true)
    }

    /// Reads every parameter back to back, without pausing in between.
    pub fn read_full_configuration(&mut self) -> Option<TuningConfiguration> {
        let mut values = [0.0; 6];
        for (value, param) in values.iter_mut().zip(TuningParameter::ALL) {
            *value = self.get(param, false)?;
        }
        Some(TuningConfiguration::from_values(values))
    }

    /// Writes every parameter, pausing after each. Returns whether all of
    /// them were encodable; a parameter the device did not echo back is only
    /// logged.
    pub fn write_full_configuration(&mut self, config: &TuningConfiguration) -> bool {
        TuningParameter::ALL.iter().all(|&param| {
            match self.set(param, config.get(param), true) {
                Ok(true) => true,
                Ok(false) => {
                    debug!("{:?} was not echoed back", param);
                    true
                }
                Err(e) => {
                    warn!("{:?}: {}", param, e);
                    self.last_error = Some(e);
                    false
                }
            }
        })
    }
}
