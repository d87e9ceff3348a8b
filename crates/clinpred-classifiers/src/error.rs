use thiserror::Error;

/// Why a raw record (or a schema) was rejected by the feature pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}` must be {expected}")]
    WrongType { field: String, expected: &'static str },
    #[error("field `{field}` is out of range: {message}")]
    OutOfRange { field: String, message: String },
    #[error("field `{field}` has unknown code `{code}`")]
    UnknownCode { field: String, code: String },
    #[error("invalid feature schema: {0}")]
    InvalidSchema(String),
}

/// Errors raised by the training, evaluation and explanation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown model variant `{0}`")]
    UnknownVariant(String),
    #[error("model is not fitted")]
    NotFitted,
    #[error("model `{0}` does not support exact attribution; enable the model-agnostic fallback")]
    UnsupportedModel(String),
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("training failed: {0}")]
    Training(String),
}

impl PipelineError {
    /// Only validation failures can be corrected by the user re-submitting input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_is_recoverable() {
        let err: PipelineError = ValidationError::MissingField("Age".into()).into();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "missing required field `Age`");
        assert!(!PipelineError::NotFitted.is_recoverable());
        assert!(!PipelineError::UnknownVariant("svm".into()).is_recoverable());
    }
}
