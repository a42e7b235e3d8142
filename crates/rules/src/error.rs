//! Errors raised while resolving or walking condition trees.

/// Errors from the condition model, analyzer and deriver.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    /// A node names a condition type the registry does not know.
    #[error("unresolved condition type '{type_id}' at {path}")]
    UnresolvedType { type_id: String, path: String },

    /// A required parameter of a known type is absent.
    #[error("condition '{type_id}' at {path} is missing required parameter '{parameter}'")]
    MissingParameter {
        type_id: String,
        parameter: String,
        path: String,
    },

    /// A parameter is present but has the wrong shape.
    #[error("condition '{type_id}' parameter '{parameter}': {reason}")]
    InvalidParameter {
        type_id: String,
        parameter: String,
        reason: String,
    },

    /// The tree nests deeper than the configured bound.
    #[error("condition tree exceeds maximum depth of {max_depth}")]
    TooDeep { max_depth: usize },

    /// Canonical serialization for key derivation failed.
    #[error("failed to canonicalize condition: {0}")]
    Canonicalize(#[from] serde_json::Error),

    /// A condition-type catalogue could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A condition-type catalogue could not be parsed.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias for condition operations.
pub type Result<T> = std::result::Result<T, ConditionError>;
