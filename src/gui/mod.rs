//! Terminal views shared by the binaries.

mod error;
mod fold_until_stop;

pub use error::MonitorGuiError;
pub use fold_until_stop::fold_until_stop;
