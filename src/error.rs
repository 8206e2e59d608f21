//! Error types for tag resolution and image publishing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolverError>;

#[derive(Error, Debug)]
pub enum ResolverError {
    /// The string is not a syntactically valid image tag.
    #[error("Invalid image reference: {0}")]
    Reference(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    /// The manifest is absent under every schema that was tried.
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Invalid argument: {0}")]
    Argument(String),
    #[error("Image references not found in template: {}", .0.join(", "))]
    Unreferenced(Vec<String>),
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ResolverError {
    /// Whether this error only means "not an image tag" and the input can be
    /// kept as it was.
    pub fn is_reference(&self) -> bool {
        matches!(self, ResolverError::Reference(_))
    }
}

impl From<serde_json::Error> for ResolverError {
    fn from(err: serde_json::Error) -> Self {
        ResolverError::Parse(err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for ResolverError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ResolverError::Parse(format!("YAML: {}", err))
    }
}

impl From<url::ParseError> for ResolverError {
    fn from(err: url::ParseError) -> Self {
        ResolverError::Validation(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ResolverError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ResolverError::Parse(format!("UTF-8 conversion error: {}", err))
    }
}
