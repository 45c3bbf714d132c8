//! Cflat Compiler Backend
//!
//! Lowers a type-checked Cflat AST (read from JSON) into LIR, a
//! three-address intermediate representation organized as a control-flow
//! graph of basic blocks.

pub mod ast;
pub mod error;
pub mod lir;

pub use error::{LowerError, Result};
