//! Centralized error types for the driver
//!
//! All driver errors are represented by the `CecError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, CecError>`.
//!
//! Every error maps onto one of the driver status codes through
//! [`CecError::status`], so callers that speak the numeric contract can
//! convert without matching on variants.

use std::fmt;
use std::path::PathBuf;

/// Status codes returned by every mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    SentAndAcked = 1,
    SentButNotAcked = 2,
    SentFailed = 3,
    InvalidState = 4,
    InvalidArgument = 5,
    LogicalAddressUnavailable = 6,
    GeneralError = 7,
}

impl Status {
    /// Numeric status code
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::SentAndAcked => "sent and acknowledged",
            Self::SentButNotAcked => "sent but not acknowledged",
            Self::SentFailed => "send failed",
            Self::InvalidState => "invalid state",
            Self::InvalidArgument => "invalid argument",
            Self::LogicalAddressUnavailable => "logical address unavailable",
            Self::GeneralError => "general error",
        };
        f.write_str(name)
    }
}

/// All driver errors
#[derive(Debug)]
pub enum CecError {
    // === Usage ===
    /// Operation not allowed in the current session state
    InvalidState { reason: &'static str },
    /// Caller passed a bad parameter
    InvalidArgument { reason: String },

    // === Bus outcomes ===
    /// POLL for the address was acknowledged by another device
    LogicalAddressUnavailable { address: u8 },
    /// The transceiver could not put the frame on the bus
    SendFailed,

    // === Adapter ===
    /// Failed to open serial port
    SerialOpen {
        port: String,
        source: std::io::Error,
    },
    /// Serial read or write failed
    SerialIo { source: std::io::Error },
    /// Transceiver did not answer in time
    AdapterTimeout { waited_ms: u64 },
    /// Transceiver sent something the driver does not understand
    AdapterProtocol { message: String },
    /// Transceiver is gone
    AdapterDisconnected,

    // === Detection ===
    /// No transceiver found matching configuration
    NoDeviceFound,
    /// Multiple transceivers found matching configuration
    MultipleDevicesFound { count: usize },

    // === Config ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    /// Driver thread could not be started
    Runtime { source: std::io::Error },
}

impl CecError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Status code reported for this error
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidState { .. } => Status::InvalidState,
            Self::InvalidArgument { .. } => Status::InvalidArgument,
            Self::LogicalAddressUnavailable { .. } => Status::LogicalAddressUnavailable,
            Self::SendFailed => Status::SentFailed,
            _ => Status::GeneralError,
        }
    }
}

impl std::error::Error for CecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SerialOpen { source, .. }
            | Self::SerialIo { source }
            | Self::Io { source, .. }
            | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for CecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { reason } => write!(f, "Invalid state: {}", reason),
            Self::InvalidArgument { reason } => write!(f, "Invalid argument: {}", reason),
            Self::LogicalAddressUnavailable { address } => {
                write!(f, "Logical address {:X} is held by another device", address)
            }
            Self::SendFailed => write!(f, "Frame could not be sent"),
            Self::SerialOpen { port, .. } => write!(f, "Cannot open serial port: {}", port),
            Self::SerialIo { source } => write!(f, "Serial I/O error: {}", source),
            Self::AdapterTimeout { waited_ms } => {
                write!(f, "Transceiver did not answer within {} ms", waited_ms)
            }
            Self::AdapterProtocol { message } => {
                write!(f, "Transceiver protocol error: {}", message)
            }
            Self::AdapterDisconnected => write!(f, "Transceiver disconnected"),
            Self::NoDeviceFound => write!(f, "No device found"),
            Self::MultipleDevicesFound { count } => {
                write!(f, "Multiple devices found ({})", count)
            }
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Runtime { .. } => write!(f, "Failed to start driver thread"),
        }
    }
}

/// Alias for Result with CecError
pub type Result<T> = std::result::Result<T, CecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::SentAndAcked.code(), 1);
        assert_eq!(Status::SentButNotAcked.code(), 2);
        assert_eq!(Status::SentFailed.code(), 3);
        assert_eq!(Status::InvalidState.code(), 4);
        assert_eq!(Status::InvalidArgument.code(), 5);
        assert_eq!(Status::LogicalAddressUnavailable.code(), 6);
        assert_eq!(Status::GeneralError.code(), 7);
    }

    #[test]
    fn test_platform_errors_are_general() {
        assert_eq!(CecError::AdapterDisconnected.status(), Status::GeneralError);
        assert_eq!(
            CecError::AdapterTimeout { waited_ms: 10 }.status(),
            Status::GeneralError
        );
        assert_eq!(CecError::SendFailed.status(), Status::SentFailed);
        assert_eq!(
            CecError::invalid_argument("x").status(),
            Status::InvalidArgument
        );
    }

    #[test]
    fn test_display_mentions_address() {
        let err = CecError::LogicalAddressUnavailable { address: 0 };
        assert_eq!(err.to_string(), "Logical address 0 is held by another device");
    }
}
