//! Error types for the damage-capture library

use thiserror::Error;

/// Main error type for capture and event-source operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Could not open the display connection
    #[error("Failed to connect to display: {0}")]
    DisplayConnectionFailed(String),

    /// A required windowing-system extension is missing
    #[error("Required extension not available: {0}")]
    ExtensionMissing(String),

    /// The change-event connection broke while running
    #[error("Event connection lost: {0}")]
    ConnectionLost(String),

    /// A still-frame grab failed
    #[error("Grab failed: {0}")]
    GrabFailed(String),

    /// Region is empty or malformed
    #[error("Invalid region: {width}x{height} at ({left}, {top})")]
    InvalidRegion {
        left: i32,
        top: i32,
        width: u32,
        height: u32,
    },

    /// Cursor query failed
    #[error("Cursor query failed: {0}")]
    CursorQueryFailed(String),

    /// Platform-specific error
    #[error("Platform error: {0}")]
    PlatformError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Encoder error surfaced through a capture call
    #[error("Encoder error: {0}")]
    EncoderError(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error type for hardware stream encoder operations
#[derive(Error, Debug)]
pub enum EncoderError {
    /// No usable encoder backend on this system
    #[error("Encoder unavailable: {0}")]
    Unavailable(String),

    /// Session allocation failed (no device, session limit reached, ...)
    #[error("Encoder session creation failed: {0}")]
    SessionCreateFailed(String),

    /// No frame arrived within the configured timeout
    #[error("Timed out waiting for an encoded frame after {timeout_ms}ms")]
    FrameTimeout { timeout_ms: u64 },

    /// Grab-and-encode call failed
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Invalid encoder configuration
    #[error("Invalid encoder configuration: {0}")]
    InvalidConfiguration(String),

    /// Other encoder errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Combined result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Combined result type for encoder operations
pub type EncoderResult<T> = Result<T, EncoderError>;

impl CaptureError {
    /// Recoverable errors skip a single tick; the rest end the capture session
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::GrabFailed(_)
                | CaptureError::InvalidRegion { .. }
                | CaptureError::CursorQueryFailed(_)
                | CaptureError::EncoderError(_)
        )
    }

    /// Stable numeric code for logs
    pub fn to_error_code(&self) -> i32 {
        match self {
            CaptureError::DisplayConnectionFailed(_) => -1001,
            CaptureError::ExtensionMissing(_) => -1002,
            CaptureError::ConnectionLost(_) => -1003,
            CaptureError::GrabFailed(_) => -1004,
            CaptureError::InvalidRegion { .. } => -1005,
            CaptureError::CursorQueryFailed(_) => -1006,
            CaptureError::PlatformError(_) => -1007,
            CaptureError::InvalidConfiguration(_) => -1008,
            CaptureError::IoError(_) => -1009,
            CaptureError::EncoderError(_) => -1010,
            CaptureError::Other(_) => -1999,
        }
    }
}

impl EncoderError {
    /// Everything except a bad configuration is worth another attempt later
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EncoderError::InvalidConfiguration(_))
    }

    pub fn to_error_code(&self) -> i32 {
        match self {
            EncoderError::Unavailable(_) => -2001,
            EncoderError::SessionCreateFailed(_) => -2002,
            EncoderError::FrameTimeout { .. } => -2003,
            EncoderError::EncodeFailed(_) => -2004,
            EncoderError::InvalidConfiguration(_) => -2005,
            EncoderError::Other(_) => -2999,
        }
    }
}

impl From<EncoderError> for CaptureError {
    fn from(err: EncoderError) -> Self {
        CaptureError::EncoderError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::ExtensionMissing("DAMAGE".to_string());
        assert_eq!(err.to_string(), "Required extension not available: DAMAGE");
    }

    #[test]
    fn test_encoder_error_display() {
        let err = EncoderError::FrameTimeout { timeout_ms: 250 };
        assert_eq!(
            err.to_string(),
            "Timed out waiting for an encoded frame after 250ms"
        );
    }

    #[test]
    fn test_error_code_conversion() {
        let err = CaptureError::ConnectionLost("broken pipe".to_string());
        assert_eq!(err.to_error_code(), -1003);
        assert_eq!(EncoderError::Unavailable("x".into()).to_error_code(), -2001);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(CaptureError::GrabFailed("BadMatch".to_string()).is_recoverable());
        assert!(!CaptureError::DisplayConnectionFailed(":0".to_string()).is_recoverable());

        assert!(EncoderError::SessionCreateFailed("busy".into()).is_recoverable());
        assert!(!EncoderError::InvalidConfiguration("fps=0".into()).is_recoverable());
    }

    #[test]
    fn test_encoder_error_into_capture_error() {
        let err: CaptureError = EncoderError::EncodeFailed("no buffer".into()).into();
        assert!(matches!(err, CaptureError::EncoderError(_)));
        assert!(err.to_string().contains("no buffer"));
    }
}
