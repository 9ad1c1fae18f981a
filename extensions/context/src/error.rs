use thiserror::Error;
use topicflow_core::FlowError;

#[derive(Error, Debug, Clone)]
pub enum ContextError {
    #[error("unknown context group `{group}`")]
    UnknownGroup { group: String },

    #[error("unknown function `{name}` in context group `{group}`")]
    UnknownFunction { group: String, name: String },

    #[error("context dropped before `{group}.{name}` was called")]
    Dropped { group: String, name: String },

    /// The function itself failed.
    #[error(transparent)]
    Call(#[from] FlowError),
}

impl From<ContextError> for FlowError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Call(err) => err,
            lookup => FlowError::from(anyhow::Error::new(lookup)),
        }
    }
}
