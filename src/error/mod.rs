//! Error types and reporting

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, LowerError>;

/// Lowering pipeline error
#[derive(Debug, Error)]
pub enum LowerError {
    /// IO failure or malformed JSON
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Well-formed JSON that does not encode a Cflat AST
    #[error("malformed AST: {message}")]
    MalformedAst { message: String },

    /// A variable name resolved to neither a local, a funptr, nor an extern
    #[error("unknown identifier: {name}")]
    UnknownIdentifier { name: String },

    #[error("break statement outside of loop")]
    BreakOutsideLoop,

    #[error("continue statement outside of loop")]
    ContinueOutsideLoop,

    /// An operand's type did not have the shape an operation requires
    #[error("type shape mismatch: {message}")]
    TypeShapeMismatch { message: String },

    /// The CFG builder produced a block without a terminator
    #[error("malformed block: {label} has no terminator")]
    MalformedBlock { label: String },
}

impl LowerError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn malformed_ast(message: impl Into<String>) -> Self {
        Self::MalformedAst {
            message: message.into(),
        }
    }

    pub fn unknown_identifier(name: impl Into<String>) -> Self {
        Self::UnknownIdentifier { name: name.into() }
    }

    pub fn type_shape_mismatch(message: impl Into<String>) -> Self {
        Self::TypeShapeMismatch {
            message: message.into(),
        }
    }

    pub fn malformed_block(label: impl Into<String>) -> Self {
        Self::MalformedBlock {
            label: label.into(),
        }
    }
}
