use thiserror::Error;

/// The primary error type for the `pwrmon-lib` library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PMError {
    #[error("Invalid length")]
    InvalidLength,

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid {field} code: {value:#04x}")]
    InvalidConfig { field: &'static str, value: u8 },

    #[error("Bad report signature: {0:#010x}")]
    BadSignature(u32),

    #[error("Unknown command code: {0:#04x}")]
    UnknownCommand(u8),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Operation timed out")]
    Timeout,
}
