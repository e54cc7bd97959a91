//! Error types for waybeacon

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaybeaconError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Spatialization error: {0}")]
    Spatialization(String),
}

pub type Result<T> = std::result::Result<T, WaybeaconError>;
