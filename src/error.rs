use thiserror::Error;

/// Error taxonomy for the core. Every variant is returned as a value across
/// the operation surface so the shell can render a specific remediation
/// (permission prompt, key setup, etc.) instead of a generic failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("screen capture permission not granted")]
    PermissionDenied,

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("unsupported image type: {0} (only JPEG captures are accepted)")]
    UnsupportedImageType(String),

    #[error("no recent captures available to analyze")]
    NoImages,

    #[error("classification API key is not configured")]
    MissingApiKey,

    #[error("classification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classification response violated the expected schema: {0}")]
    MalformedResponse(String),

    #[error("a session is already active")]
    AlreadyActive,
}

pub type CoreResult<T> = Result<T, CoreError>;
