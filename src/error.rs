use std::path::PathBuf;

/// Message shown when the service reports a failure without saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "Analysis failed";

/// Rejection raised locally before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("no image selected")]
    NoImageSelected,
}

/// Failure of a submitted analysis.
///
/// The `Display` output is the message surfaced to the user.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request never produced a response.
    #[error("failed to reach analysis service: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response arrived but could not be understood.
    #[error("malformed response from analysis service: {0}")]
    Malformed(String),

    /// The service answered with `success: false`.
    #[error("{0}")]
    Reported(String),
}

impl ServiceError {
    /// Builds a reported failure, falling back to a generic message.
    pub fn reported(message: Option<String>) -> Self {
        match message {
            Some(message) if !message.trim().is_empty() => ServiceError::Reported(message),
            _ => ServiceError::Reported(GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }

    /// Whether the service itself reported the failure.
    pub fn is_reported(&self) -> bool {
        matches!(self, ServiceError::Reported(_))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Malformed(err.to_string())
    }
}

impl From<base64::DecodeError> for ServiceError {
    fn from(err: base64::DecodeError) -> Self {
        ServiceError::Malformed(format!("annotated image is not valid base64: {err}"))
    }
}

/// Errors surfaced by the command-line front end.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}
