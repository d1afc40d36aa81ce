use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstancingError {
    #[error("dispatcher \"{0}\" is already registered")]
    DuplicateDispatcher(String),

    #[error("no dispatcher named \"{0}\" is registered")]
    MissingDispatcher(String),

    #[error("unknown instance token")]
    UnknownToken,

    #[error("unknown dispatcher")]
    UnknownDispatcher,
}
