pub mod analyzer;
pub mod error;

pub use analyzer::SafetyAnalyzer;
pub use error::{Result, SafetyError};
