//! Error handling for mini-scada
//!
//! Each component has its own closed error set so callers can match on the
//! exact failure kind:
//!
//! - [`ConnectError`] - establishing a controller session
//! - [`ReadError`] / [`WriteError`] - raw block transfers
//! - [`DecodeError`] - turning raw bytes into typed values
//! - [`StoreError`] - durable sample storage
//! - [`TagSpecError`] - invalid tag definitions
//! - [`ServiceError`] - control calls on the polling service
//!
//! [`ScadaError`] wraps all of them for code that just wants to propagate.

use crate::types::{Area, DataType, SampleErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Failure to establish a controller session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Host refused or could not be reached
    #[error("Controller unreachable at {address}: {message}")]
    Unreachable { address: String, message: String },

    /// Controller rejected the session (wrong rack/slot, access protection)
    #[error("Connection rejected by controller: {0}")]
    AuthRejected(String),

    /// Peer answered but does not speak the expected protocol
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// No answer within the connect timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to read a raw block from the controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// No session is open
    #[error("Driver is not connected")]
    NotConnected,

    /// Requested range lies outside the addressable region
    #[error("Address out of range: {area} block {block} offset {offset} length {length}")]
    AddressOutOfRange {
        area: Area,
        block: u16,
        offset: usize,
        length: usize,
    },

    /// No response within the I/O timeout
    #[error("Read timed out")]
    Timeout,

    /// Malformed or negative response
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

/// Failure to write a raw block to the controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// No session is open
    #[error("Driver is not connected")]
    NotConnected,

    /// Target range lies outside the addressable region
    #[error("Address out of range: {area} block {block} offset {offset} length {length}")]
    AddressOutOfRange {
        area: Area,
        block: u16,
        offset: usize,
        length: usize,
    },

    /// No response within the I/O timeout
    #[error("Write timed out")]
    Timeout,

    /// Malformed or negative response
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl From<ReadError> for WriteError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::NotConnected => WriteError::NotConnected,
            ReadError::AddressOutOfRange {
                area,
                block,
                offset,
                length,
            } => WriteError::AddressOutOfRange {
                area,
                block,
                offset,
                length,
            },
            ReadError::Timeout => WriteError::Timeout,
            ReadError::ProtocolError(msg) => WriteError::ProtocolError(msg),
        }
    }
}

/// Failure to decode raw bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the data type needs
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Type has no scalar interpretation
    #[error("Unsupported data type {0}")]
    UnsupportedType(DataType),
}

/// Failure in the sample store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Failed to encode record: {0}")]
    Encode(String),

    /// Sample is older than the last stored sample for the same tag
    #[error("Out-of-order sample for '{tag}': {attempted} < last stored {last}")]
    OutOfOrder {
        tag: String,
        last: f64,
        attempted: f64,
    },

    /// Log contains a malformed record
    #[error("Corrupt sample log at line {line}: {message}")]
    Corrupt { line: usize, message: String },
}

/// Invalid tag definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagSpecError {
    #[error("Tag name must not be empty")]
    EmptyName,

    #[error("Bit offset {0} is out of range (0-7)")]
    BitOffsetOutOfRange(u8),

    #[error("Tag '{name}': bit offset {bit} is only valid for BOOL, not {data_type}")]
    BitOffsetOnNonBool {
        name: String,
        data_type: DataType,
        bit: u8,
    },

    #[error("Tag '{0}' has a zero-width data type")]
    ZeroWidth(String),

    #[error("Duplicate tag name '{0}'")]
    DuplicateName(String),

    #[error("Unknown memory area '{0}'")]
    UnknownArea(String),

    #[error("Unknown data type '{0}'")]
    UnknownDataType(String),

    #[error("Line {line}: {message}")]
    Import { line: usize, message: String },
}

/// Failure of a control call on the polling service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Operation needs an open session
    #[error("Not connected to a controller")]
    NotConnected,

    /// A session to another target is open; disconnect first
    #[error("Already connected to {current}")]
    AlreadyConnected { current: String },

    /// Operation is not allowed while polling
    #[error("Operation '{0}' is not allowed while polling")]
    Busy(&'static str),

    /// No tag with that name is configured
    #[error("Unknown tag '{0}'")]
    UnknownTag(String),

    /// Value cannot be written to the tag's type
    #[error("Cannot write {value} to tag '{tag}'")]
    IncompatibleValue { tag: String, value: String },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    TagSpec(#[from] TagSpecError),

    /// The worker thread is gone (shut down or panicked)
    #[error("Polling worker is not running")]
    WorkerGone,

    /// The worker did not answer in time
    #[error("Timed out waiting for the polling worker")]
    ReplyTimeout,
}

/// Main error type for mini-scada operations
#[derive(Error, Debug)]
pub enum ScadaError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to tag definitions
    #[error("Tag error: {0}")]
    TagSpec(#[from] TagSpecError),

    /// Errors from the polling service
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Errors from the sample store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Errors related to network discovery
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScadaError>,
    },
}

impl ScadaError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ScadaError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for mini-scada operations
pub type Result<T> = std::result::Result<T, ScadaError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ScadaError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: ScadaError = e.into();
            err.with_context(context)
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: ScadaError = e.into();
            err.with_context(f())
        })
    }
}

impl From<&ReadError> for SampleErrorKind {
    fn from(err: &ReadError) -> Self {
        match err {
            ReadError::NotConnected => SampleErrorKind::NotConnected,
            ReadError::AddressOutOfRange { .. } => SampleErrorKind::AddressOutOfRange,
            ReadError::Timeout => SampleErrorKind::Timeout,
            ReadError::ProtocolError(_) => SampleErrorKind::ProtocolError,
        }
    }
}

impl From<&DecodeError> for SampleErrorKind {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::BufferTooShort { .. } => SampleErrorKind::BufferTooShort,
            DecodeError::UnsupportedType(_) => SampleErrorKind::UnsupportedType,
        }
    }
}
