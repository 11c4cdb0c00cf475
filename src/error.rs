//! Error types for the residual classifiers

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// A dimension that must be positive was zero
    #[error("Invalid dimension for {name}: {value}. Must be positive.")]
    InvalidDimension { name: &'static str, value: usize },

    /// Two shapes that must agree did not
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// A layer would produce an output with a zero-sized axis
    #[error("Layer {layer} produces an empty output for input shape {input}")]
    EmptyOutput { layer: String, input: String },

    /// Reshape failure inside a layer
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Failed to parse configuration: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to write configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a shape mismatch between two debug-printable shapes
    pub fn shape_mismatch<E: std::fmt::Debug, G: std::fmt::Debug>(expected: E, got: G) -> Self {
        Error::ShapeMismatch {
            expected: format!("{:?}", expected),
            got: format!("{:?}", got),
        }
    }

    /// Whether the error comes from shape inference rather than I/O
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidDimension { .. }
                | Error::ShapeMismatch { .. }
                | Error::EmptyOutput { .. }
                | Error::Shape(_)
        )
    }
}

/// Reject zero-valued dimensions
pub(crate) fn ensure_positive(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        Err(Error::InvalidDimension { name, value })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive() {
        assert_eq!(ensure_positive("filters", 3).unwrap(), 3);
        let err = ensure_positive("filters", 0).unwrap_err();
        assert!(err.is_shape_error());
        assert_eq!(
            err.to_string(),
            "Invalid dimension for filters: 0. Must be positive."
        );
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::shape_mismatch((100, 1), (99, 1));
        assert_eq!(
            err.to_string(),
            "Shape mismatch: expected (100, 1), got (99, 1)"
        );
    }
}
