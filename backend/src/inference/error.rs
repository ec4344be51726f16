#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Bad client input. The message is safe to return to the caller.
    #[error("{0}")]
    Validation(String),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InferenceError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, InferenceError::Validation(_))
    }
}
