// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types and the application-facing status-code taxonomy.
//!
//! This module layers a `thiserror`-based error hierarchy ([`ClientError`])
//! on top of the status-code space ([`StatusCode`]) that the cloud wire
//! protocol speaks natively. Internal plumbing returns [`ClientError`] via
//! `?`; anything that crosses into a reply, an action result, or a file
//! transfer's `status` field is a [`StatusCode`].

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Error occurred while resolving or validating configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurred during protocol communication (MQTT/HTTP transport).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred registering or invoking an action.
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// Error occurred during a file transfer.
    #[error("file transfer error: {0}")]
    FileTransfer(#[from] FileTransferError),

    /// Error occurred parsing an inbound reply/notify payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Session is not connected to the broker.
    #[error("session is not connected")]
    NotConnected,

    /// A status/message pair surfaced from the wire protocol or an action
    /// handler, for call sites that need the raw status code rather than a
    /// typed variant.
    #[error("{code}: {message}")]
    Status {
        /// The status code.
        code: StatusCode,
        /// Human-readable detail.
        message: String,
    },
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The derived thing key exceeds the 64-byte limit.
    #[error("thing key \"{key}\" is {len} bytes, exceeding the 64-byte limit")]
    ThingKeyTooLong {
        /// The offending thing key.
        key: String,
        /// Its length in bytes.
        len: usize,
    },

    /// A required configuration field was not supplied.
    #[error("missing required configuration field: {0}")]
    MissingField(&'static str),

    /// The configured trust-bundle path does not exist.
    #[error("trust bundle not found: {0}")]
    BundleNotFound(String),

    /// Reading or writing the persisted device-id file failed.
    #[error("device id persistence failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to protocol communication (MQTT/HTTP transport).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT connection or communication failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker address or malformed configuration.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// TLS context could not be built from the configured policy.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// The configured proxy type has no backend available.
    #[error("proxy type not supported: {0}")]
    ProxyUnsupported(String),

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to action registration and invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    /// An action with this name is already registered.
    #[error("action \"{0}\" already has a handler")]
    Exists(String),

    /// No action is registered under this name.
    #[error("action \"{0}\" has no handler")]
    NotFound(String),

    /// The handler returned an invalid status code.
    #[error("action \"{name}\" returned an invalid status: {detail}")]
    InvalidResult {
        /// The action name.
        name: String,
        /// Description of what was wrong.
        detail: String,
    },
}

/// Errors related to file transfers.
#[derive(Debug, Error)]
pub enum FileTransferError {
    /// An upload was requested with a non-absolute or missing local path.
    #[error("upload path \"{0}\" must be an existing absolute path")]
    NotAbsolutePath(String),

    /// The downloaded content's CRC-32 did not match the server-supplied
    /// checksum.
    #[error("CRC mismatch: expected {expected:08x}, computed {actual:08x}")]
    CrcMismatch {
        /// Checksum supplied by the cloud in the `file.get` reply.
        expected: u32,
        /// Checksum computed while streaming the downloaded bytes.
        actual: u32,
    },

    /// Local filesystem I/O failed.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP transfer itself failed (non-2xx status or transport error).
    #[error("transfer failed: {0}")]
    Transport(String),
}

/// Errors related to parsing inbound reply/notify payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload was valid JSON but not in the shape expected here.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// The core's internal status space, exposed at every application-facing
/// boundary (blocking-call returns, action results, file-transfer status)
/// instead of raw exception types.
///
/// Values map identity-wise onto the cloud's numeric error codes, with
/// `Success` mapping to `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Operation succeeded.
    Success = 0,
    /// Action was successfully invoked (fire-and-forget, result pending).
    Invoked = 1,
    /// An invalid parameter was passed.
    BadParameter = 2,
    /// The request itself was malformed.
    BadRequest = 3,
    /// An error occurred executing the requested action.
    ExecutionError = 4,
    /// The named resource already exists.
    Exists = 5,
    /// A file could not be opened.
    FileOpenFailed = 6,
    /// Storage is full.
    Full = 7,
    /// An input/output error occurred.
    IoError = 8,
    /// Out of memory.
    NoMemory = 9,
    /// The caller lacks permission.
    NoPermission = 10,
    /// The requested command is not executable.
    NotExecutable = 11,
    /// The named resource was not found.
    NotFound = 12,
    /// The component has not been initialized.
    NotInitialized = 13,
    /// A parameter is out of its valid range.
    OutOfRange = 14,
    /// Failed to parse a message.
    ParseError = 15,
    /// The operation timed out.
    TimedOut = 16,
    /// The caller should try again.
    TryAgain = 17,
    /// This operation is not supported.
    NotSupported = 18,
    /// General failure.
    Failure = 19,
}

impl StatusCode {
    /// Translates this status to the cloud's numeric error code.
    ///
    /// The mapping is the identity mapping, with `Success` at `0`.
    #[must_use]
    pub const fn as_cloud_code(self) -> i32 {
        self as i32
    }

    /// Maps a cloud-supplied numeric error code back to a `StatusCode`.
    ///
    /// Unrecognized codes (including the file-service sentinel `-90008`,
    /// which the cloud uses for "file not found") fall back to sensible
    /// defaults: `-90008` becomes [`StatusCode::NotFound`], anything else
    /// unrecognized becomes [`StatusCode::Failure`].
    #[must_use]
    pub const fn from_cloud_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Invoked,
            2 => Self::BadParameter,
            3 => Self::BadRequest,
            4 => Self::ExecutionError,
            5 => Self::Exists,
            6 => Self::FileOpenFailed,
            7 => Self::Full,
            8 => Self::IoError,
            9 => Self::NoMemory,
            10 => Self::NoPermission,
            11 => Self::NotExecutable,
            12 => Self::NotFound,
            13 => Self::NotInitialized,
            14 => Self::OutOfRange,
            15 => Self::ParseError,
            16 => Self::TimedOut,
            17 => Self::TryAgain,
            18 => Self::NotSupported,
            -90008 => Self::NotFound,
            _ => Self::Failure,
        }
    }

    /// Returns true if this status represents success (including the
    /// fire-and-forget `Invoked` acknowledgement).
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success | Self::Invoked)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::Invoked => "Invoked",
            Self::BadParameter => "Bad Parameter",
            Self::BadRequest => "Bad Request",
            Self::ExecutionError => "Execution Error",
            Self::Exists => "Already Exists",
            Self::FileOpenFailed => "File Open Failed",
            Self::Full => "Full",
            Self::IoError => "I/O Error",
            Self::NoMemory => "Out of Memory",
            Self::NoPermission => "No Permission",
            Self::NotExecutable => "Not Executable",
            Self::NotFound => "Not Found",
            Self::NotInitialized => "Not Initialized",
            Self::OutOfRange => "Out of Range",
            Self::ParseError => "Parsing Error",
            Self::TimedOut => "Timed Out",
            Self::TryAgain => "Try Again",
            Self::NotSupported => "Not Supported",
            Self::Failure => "Failure",
        };
        f.write_str(s)
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips_through_cloud_code() {
        for code in [
            StatusCode::Success,
            StatusCode::Invoked,
            StatusCode::NotFound,
            StatusCode::Failure,
        ] {
            assert_eq!(StatusCode::from_cloud_code(code.as_cloud_code()), code);
        }
    }

    #[test]
    fn success_maps_to_zero() {
        assert_eq!(StatusCode::Success.as_cloud_code(), 0);
    }

    #[test]
    fn file_sentinel_maps_to_not_found() {
        assert_eq!(StatusCode::from_cloud_code(-90_008), StatusCode::NotFound);
    }

    #[test]
    fn unrecognized_code_maps_to_failure() {
        assert_eq!(StatusCode::from_cloud_code(9999), StatusCode::Failure);
    }

    #[test]
    fn is_ok_covers_success_and_invoked() {
        assert!(StatusCode::Success.is_ok());
        assert!(StatusCode::Invoked.is_ok());
        assert!(!StatusCode::Failure.is_ok());
    }

    #[test]
    fn display_matches_status_strings() {
        assert_eq!(StatusCode::BadParameter.to_string(), "Bad Parameter");
        assert_eq!(StatusCode::IoError.to_string(), "I/O Error");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::ThingKeyTooLong {
            key: "x".repeat(65),
            len: 65,
        };
        assert!(err.to_string().contains("65 bytes"));
    }
}
