use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("AI provider returned no content")]
    EmptyResponse,

    #[error("Invalid AI configuration: {0}")]
    Config(String),
}

impl AiError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors other than 408/429 will fail again with the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::EmptyResponse => true,
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Config(_) => false,
        }
    }
}
