//! The error type shared by the session, the codec and the clients.
//!
//! Most callers never see these: the device clients turn them into `None`,
//! `false` or an empty list and keep the last one around for inspection.

use std::{borrow::Cow, error::Error, fmt, io};

/// Shorthand for results carrying a [KinseiError].
pub type Result<T> = std::result::Result<T, KinseiError>;

/// Everything that can go wrong while talking to a Kinsei device.
#[derive(Debug)]
pub enum KinseiError {
    /// Opening the stream to the device failed, or the host could not be
    /// resolved.
    Connection(io::Error),

    /// Sending a request or receiving a response failed mid-exchange. A read
    /// timeout lands here too.
    Transport(io::Error),

    /// A command was issued while the session was disconnected. No I/O was
    /// attempted.
    NotConnected,

    /// The device answered with the error sentinel instead of a response.
    DeviceRejected,

    /// The response was shorter than its layout requires, or its internal
    /// structure did not make sense.
    ProtocolDecode(String),

    /// A tuning value does not fit the signed 16 bit fixed point encoding
    /// once scaled by 100.
    ArgumentOutOfRange(f64),

    /// Reading or writing a configuration file failed.
    ConfigIo(io::Error),

    /// Serializing a configuration failed.
    ConfigRon(ron::Error),

    /// Deserializing a configuration failed.
    ConfigRonSpanned(ron::de::SpannedError),
}

impl KinseiError {
    /// Whether this error came from the stream itself, meaning the session
    /// may need an explicit disconnect and reconnect to recover.
    pub fn is_transport_class(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NotConnected)
    }
}

impl fmt::Display for KinseiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use KinseiError as KE;
        let msg = match self {
            KE::Connection(error) => Cow::from(format!("connection error: {}", error)),
            KE::Transport(error) => Cow::from(format!("transport error: {}", error)),
            KE::NotConnected => Cow::from("session is not connected"),
            KE::DeviceRejected => Cow::from("device answered with the error sentinel"),
            KE::ProtocolDecode(why) => Cow::from(format!("malformed response: {}", why)),
            KE::ArgumentOutOfRange(value) => {
                Cow::from(format!("{} does not fit the fixed point encoding", value))
            }
            KE::ConfigIo(error) => Cow::from(format!("config io error: {}", error)),
            KE::ConfigRon(error) => Cow::from(format!("config ron error: {}", error)),
            KE::ConfigRonSpanned(error) => Cow::from(format!("config ron error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl Error for KinseiError {}

impl From<io::Error> for KinseiError {
    fn from(value: io::Error) -> Self {
        Self::Transport(value)
    }
}
