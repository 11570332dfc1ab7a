//! Opcodes for the two device protocols and their request frames.
//!
//! The tracking protocol (port 2005 by default) only ever sends a single
//! opcode byte. The tuning protocol (port 6666) appends a big-endian fixed
//! point argument to its "set" commands. The two opcode sets overlap
//! numerically, so they are kept in separate types and never mixed.

use crate::error::{KinseiError, Result};

/// Returned verbatim by either protocol when the device cannot answer.
pub const ERROR_SENTINEL: u8 = 0x65;

/// Default TCP port of the tracking server.
pub const TRACKING_PORT: u16 = 2005;

/// Default TCP port of the tuning server.
pub const TUNING_PORT: u16 = 6666;

/// Commands understood by the tracking server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingCommand {
    /// Room bounding box and floor corners.
    RoomSize,
    /// Configured zones of interest.
    Zones,
    /// Occupancy count, fixed point ×10.
    NumberPersonsFloat,
    /// Occupancy count as an integer.
    NumberPersonsFixed,
    /// Positions of every tracked slot.
    PersonsPosition,
    /// Whether the tracking server is up.
    CheckOnline,
    /// Online flag per sensor.
    CheckSensorsOnline,
    /// Battery voltage per sensor.
    BatteryLevels,
    /// Raw candidate detections with confidence.
    FusionValues,
    /// Columns, rows and pixel size of the thermal map.
    ThermalMapResolution,
    /// Every pixel of the thermal map.
    ThermalMapPixels,
}

impl TrackingCommand {
    /// The single byte identifying this command on the wire.
    pub fn opcode(self) -> u8 {
        use TrackingCommand as TC;
        match self {
            TC::RoomSize => 0x73,
            TC::Zones => 0x78,
            TC::NumberPersonsFloat => 0x6E,
            TC::NumberPersonsFixed => 0x6D,
            TC::PersonsPosition => 0x64,
            TC::CheckOnline => 0x74,
            TC::CheckSensorsOnline => 0x7A,
            TC::BatteryLevels => 0x76,
            TC::FusionValues => 0x66,
            TC::ThermalMapResolution => 0x1A,
            TC::ThermalMapPixels => 0x1B,
        }
    }

    /// Looks a command up by its opcode.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        use TrackingCommand as TC;
        [
            TC::RoomSize,
            TC::Zones,
            TC::NumberPersonsFloat,
            TC::NumberPersonsFixed,
            TC::PersonsPosition,
            TC::CheckOnline,
            TC::CheckSensorsOnline,
            TC::BatteryLevels,
            TC::FusionValues,
            TC::ThermalMapResolution,
            TC::ThermalMapPixels,
        ]
        .into_iter()
        .find(|c| c.opcode() == opcode)
    }

    /// The request frame for this command.
    pub fn encode(self) -> Vec<u8> {
        vec![self.opcode()]
    }
}

/// The tunable parameters of the tracking and fusion server. Each one has a
/// get opcode and a set opcode one above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuningParameter {
    #[allow(missing_docs)]
    BackgroundAlpha,
    #[allow(missing_docs)]
    BackgroundThreshold,
    /// The only signed parameter.
    TemperatureThreshold,
    #[allow(missing_docs)]
    FusionBackgroundThreshold,
    #[allow(missing_docs)]
    FusionConsensusFactor,
    #[allow(missing_docs)]
    FusionThreshold,
}

impl TuningParameter {
    /// All parameters, in the order a full configuration is read and written.
    pub const ALL: [TuningParameter; 6] = [
        TuningParameter::BackgroundAlpha,
        TuningParameter::BackgroundThreshold,
        TuningParameter::TemperatureThreshold,
        TuningParameter::FusionBackgroundThreshold,
        TuningParameter::FusionConsensusFactor,
        TuningParameter::FusionThreshold,
    ];

    /// Opcode that reads the parameter.
    pub fn get_opcode(self) -> u8 {
        use TuningParameter as TP;
        match self {
            TP::BackgroundAlpha => 0x01,
            TP::BackgroundThreshold => 0x03,
            TP::TemperatureThreshold => 0x05,
            TP::FusionBackgroundThreshold => 0x07,
            TP::FusionConsensusFactor => 0x09,
            TP::FusionThreshold => 0x0b,
        }
    }

    /// Opcode that writes the parameter.
    pub fn set_opcode(self) -> u8 {
        self.get_opcode() + 1
    }

    /// Whether the device reports this parameter as two's complement.
    pub fn is_signed(self) -> bool {
        self == TuningParameter::TemperatureThreshold
    }
}

/// Commands understood by the tuning server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningCommand {
    /// Read a parameter.
    Get(TuningParameter),
    /// Write a parameter. The value is sent scaled by 100.
    Set(TuningParameter, f64),
    /// Reset the learned background.
    ResetBackground,
    /// Reset the sensor offsets.
    ResetOffset,
    /// Persist the current configuration as an override.
    SaveOverride,
    /// Delete the persisted override.
    RemoveOverride,
}

impl TuningCommand {
    /// The first byte of the request frame.
    pub fn opcode(self) -> u8 {
        use TuningCommand as TC;
        match self {
            TC::Get(param) => param.get_opcode(),
            TC::Set(param, _) => param.set_opcode(),
            TC::ResetBackground => 0x00,
            TC::ResetOffset => 0xFD,
            TC::SaveOverride => 0xFE,
            TC::RemoveOverride => 0xFF,
        }
    }

    /// The request frame for this command. Only [TuningCommand::Set] can
    /// fail, when its argument is out of range.
    pub fn encode(self) -> Result<Vec<u8>> {
        let mut frame = vec![self.opcode()];
        if let TuningCommand::Set(_, value) = self {
            frame.extend_from_slice(&encode_fixed_point_argument(value)?);
        }
        Ok(frame)
    }
}

/// Scales `value` by 100, truncating toward zero, and encodes it as a signed
/// big-endian 16 bit integer.
pub fn encode_fixed_point_argument(value: f64) -> Result<[u8; 2]> {
    let scaled = (value * 100.0).trunc();
    if !scaled.is_finite() || scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
        return Err(KinseiError::ArgumentOutOfRange(value));
    }
    Ok((scaled as i16).to_be_bytes())
}
