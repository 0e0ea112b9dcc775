//! Error types for confero sessions.
//!
//! Only unrecoverable session failures get a variant here; recoverable
//! per-channel degradations (queue overflow, a dropped encoder block, a
//! recognizer crash mid-stream) are logged and counted where they happen
//! and never propagate past the component that observed them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// A capture source delivered a format the adapter cannot convert,
    /// or the sample-rate converter could not be constructed for it.
    #[error("unsupported audio format: {0}")]
    AudioFormatUnsupported(String),

    /// The stereo encoder sink could not be constructed (output path not
    /// writable, invalid encoder configuration).
    #[error("failed to initialize audio encoder: {0}")]
    EncoderInit(String),

    /// Encoding the accumulated session audio failed at finish time.
    #[error("audio encoding failed: {0}")]
    Encode(String),

    /// The recognizer does not support the requested locale.
    #[error("locale not supported by recognizer: {0}")]
    LocaleUnsupported(String),

    /// The recognizer's speech model is not installed or not downloadable.
    #[error("recognition model unavailable: {0}")]
    ModelUnavailable(String),

    /// A capture source failed to start.
    #[error("capture source failed: {0}")]
    Capture(String),

    /// `start` after the session was consumed, or `stop` before `start`.
    #[error("session is not active")]
    NotActive,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SessionError::AudioFormatUnsupported("96kHz 7.1 surround".to_string());
        assert_eq!(
            err.to_string(),
            "unsupported audio format: 96kHz 7.1 surround"
        );

        let err = SessionError::ModelUnavailable("en-US streaming model".to_string());
        assert_eq!(
            err.to_string(),
            "recognition model unavailable: en-US streaming model"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SessionError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SessionError>();
        assert_sync::<SessionError>();
    }
}
