use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid target id '{0}': {1}")]
    InvalidTargetId(String, uuid::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
