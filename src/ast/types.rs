//! Type AST nodes

use serde::{Deserialize, Serialize};

/// Cflat type representation
///
/// The wire format is externally tagged: `"Int"`, `"Nil"`, `{"Ptr": T}`,
/// `{"Array": T}`, `{"Struct": name}`, `{"Fn": [[P, ...], R]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// Integer
    Int,
    /// The type of the nil literal
    Nil,
    /// Pointer to a value of the inner type
    Ptr(Box<Type>),
    /// Array of elements of the inner type
    Array(Box<Type>),
    /// Named struct type
    Struct(String),
    /// Function type: parameter types and return type
    Fn(Vec<Type>, Box<Type>),
}
