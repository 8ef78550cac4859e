use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("policy engine error: {0}")]
    Engine(#[from] casbin::Error),
    #[error("invalid policy row: {0}")]
    InvalidRow(String),
    #[error("invalid principal id: {0}")]
    InvalidPrincipal(String),
    #[error("label encoding failed: {0}")]
    Labels(#[from] serde_json::Error),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
