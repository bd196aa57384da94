use thiserror::Error;

/// Result type returned from functions that can have our `Error`s.
pub type Result<T, E = LumenError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LumenError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidRegex(#[from] regex::Error),

    #[cfg(feature = "ambient")]
    #[error("{0}")]
    Notify(#[from] notify::Error),

    #[error("{0}")]
    DBus(#[from] zbus::Error),

    #[error("{0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No matching devices exist")]
    NoDevices,

    #[error("Invalid scale parameters: {low} > {high}")]
    InvalidScaleParameters { low: f64, high: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}
