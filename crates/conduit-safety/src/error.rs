use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("invalid detection pattern: {0}")]
    PatternCompile(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, SafetyError>;
