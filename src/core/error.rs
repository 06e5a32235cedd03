use thiserror::Error;

/// Failure kinds surfaced by the generation engine.
///
/// The Request Client only produces [`GenerationError::TransientServiceFailure`]
/// and [`GenerationError::RejectedRequest`], the Response Normalizer only
/// [`GenerationError::MalformedResponse`], and the Workflow Controller raises
/// [`GenerationError::PreconditionViolation`] before the gateway is ever called.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("service unavailable after {attempts} attempt(s): {reason}")]
    TransientServiceFailure { attempts: u32, reason: String },

    #[error("request rejected with HTTP {status}: {body}")]
    RejectedRequest { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    PreconditionViolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl GenerationError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }

    pub fn precondition(detail: impl Into<String>) -> Self {
        Self::PreconditionViolation(detail.into())
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    /// Text shown to the user in place of the raw error.
    pub fn user_message(&self) -> String {
        match self {
            Self::TransientServiceFailure { .. } => {
                "The AI service is busy or unreachable right now. Please try again in a moment."
                    .to_string()
            }
            Self::RejectedRequest { status, .. } => {
                format!("The AI service rejected the request (HTTP {}).", status)
            }
            Self::MalformedResponse(_) => {
                "The model returned an unexpected format. Please try again.".to_string()
            }
            Self::PreconditionViolation(detail) => detail.clone(),
            Self::Storage(detail) => format!("Could not save your project: {}", detail),
        }
    }
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;
