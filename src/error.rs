use thiserror::Error;

/// Rejected before anything leaves the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please type a question or upload an image first.")]
    EmptySubmission,
    #[error("A request is already in progress.")]
    InFlight,
}

/// Rejected image attachment. The current attachment is left untouched.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("Image size too large. Max 5MB allowed.")]
    TooLarge { size: u64 },
    #[error("That file is not a supported image.")]
    NotAnImage,
    #[error("Could not read the image: {0}")]
    Io(String),
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e.to_string())
    }
}

/// Terminal outcome of a failed provider call. `Display` is the message shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("API Configuration issue. Please ensure your key is valid.")]
    InvalidCredential,
    #[error("Too many requests. Please wait a moment.")]
    RateLimited,
    #[error("I couldn't generate an answer. Please try rephrasing your question.")]
    EmptyAnswer,
    #[error("Connection error. Please try again.")]
    Connection,
}

/// What the transport boundary reports before classification.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no API key configured")]
    MissingCredential,
    #[error("provider returned {status}: {message}")]
    Status {
        status: u16,
        /// Provider status string such as `RESOURCE_EXHAUSTED`, when the body carried one.
        code: Option<String>,
        message: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Untyped(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            ValidationError::EmptySubmission.to_string(),
            "Please type a question or upload an image first."
        );
        assert_eq!(
            UploadError::TooLarge { size: 6 * 1024 * 1024 }.to_string(),
            "Image size too large. Max 5MB allowed."
        );
        assert_eq!(ProviderError::RateLimited.to_string(), "Too many requests. Please wait a moment.");
    }
}
