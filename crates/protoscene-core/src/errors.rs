//! Error types for the protoscene core library.

/// Top-level error enum for the protoscene core library.
///
/// Only the loader and configuration layers return these. The prototype
/// core turns failures into diagnostics and degrades instead.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("USE of undefined node: {0}")]
    UnresolvedUse(String),

    #[error("Could not fetch template {name}: {reason}")]
    Fetch { name: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
