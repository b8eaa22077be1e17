use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("CRC mismatch: received {received:?}, computed {computed:?} for {payload:?}")]
    BadCrc {
        payload: String,
        received: String,
        computed: String,
    },

    #[error("expected {expected:?}, received {received:?}")]
    Unexpected { expected: String, received: String },

    #[error("response exceeded the {0} byte buffer")]
    ResponseOverflow(usize),

    #[error("malformed reply: {0}")]
    Protocol(#[from] ndi::ParseError),

    #[error("unsupported firmware revision {0:?}")]
    UnsupportedFirmware(String),

    #[error("unknown tool main type {0:?}")]
    UnknownToolType(String),

    #[error("tool definition {}: {source}", .path.display())]
    Definition {
        path: PathBuf,
        source: ndi::RomError,
    },

    #[error("no tracker found on any serial port")]
    NoDevice,

    #[error("a tool named {0:?} already exists")]
    DuplicateName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("driver task has stopped")]
    TaskStopped,

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
