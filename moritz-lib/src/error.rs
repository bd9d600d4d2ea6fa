use std::io;
use thiserror::Error;

/// The primary error type for the `moritz-lib` library.
#[derive(Error, Debug)]
pub enum MoritzError {
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessage(u8),

    #[error("frame carries {actual} bytes but indicates {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("missing payload parameter: {0}")]
    MissingPayloadParameter(&'static str),

    #[error("malformed payload: {0}")]
    DecodeFormat(String),

    #[error("airtime budget exhausted: need {needed} ms, have {available} ms")]
    BudgetExhausted { needed: u32, available: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("transceiver initialization failed: {0}")]
    TransceiverInit(String),
}

impl From<hex::FromHexError> for MoritzError {
    fn from(err: hex::FromHexError) -> Self {
        MoritzError::DecodeFormat(format!("invalid hex: {err}"))
    }
}
