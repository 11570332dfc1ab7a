use std::{error::Error, fmt::Display, io, sync::mpsc};

/// Ways the text view can fail.
#[derive(Debug)]
pub enum MonitorGuiError {
    /// Drawing to or reading from the terminal failed.
    Terminal(io::Error),
    /// The polling thread stopped before the view asked it to.
    PollerGone,
    /// The polling thread panicked, so its last state is lost.
    PollerPanicked,
}

impl Display for MonitorGuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal(e) => write!(f, "terminal error: {}", e),
            Self::PollerGone => write!(f, "the polling thread stopped early"),
            Self::PollerPanicked => write!(f, "the polling thread panicked"),
        }
    }
}

impl Error for MonitorGuiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Terminal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MonitorGuiError {
    fn from(value: io::Error) -> Self {
        Self::Terminal(value)
    }
}

impl<T> From<mpsc::SendError<T>> for MonitorGuiError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::PollerGone
    }
}

impl From<mpsc::RecvError> for MonitorGuiError {
    fn from(_: mpsc::RecvError) -> Self {
        Self::PollerGone
    }
}
