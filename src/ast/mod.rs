//! Abstract Syntax Tree definitions
//!
//! The AST mirrors the JSON produced by the Cflat frontend after type
//! checking. It is consumed read-only by the lowerer.

mod expr;
mod types;

pub use expr::*;
pub use types::*;

use crate::error::{LowerError, Result};
use serde::{Deserialize, Serialize};

/// A complete Cflat program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub structs: Vec<StructDef>,
    pub externs: Vec<Extern>,
    pub functions: Vec<FunctionDef>,
}

/// A named declaration: parameter, local, or struct field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decl {
    pub name: String,
    #[serde(rename = "typ")]
    pub ty: Type,
}

/// Struct definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Decl>,
}

/// External function declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extern {
    pub name: String,
    #[serde(rename = "prms")]
    pub params: Vec<Type>,
    #[serde(rename = "rettyp")]
    pub ret_ty: Type,
}

/// Function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(rename = "prms")]
    pub params: Vec<Decl>,
    #[serde(rename = "rettyp")]
    pub ret_ty: Type,
    pub locals: Vec<Decl>,
    #[serde(rename = "stmts")]
    pub body: Vec<Stmt>,
}

/// Parse a JSON-serialized AST.
///
/// Parsing happens in two stages so that malformed JSON and a well-formed
/// JSON document of the wrong shape report as distinct errors.
pub fn parse_program(source: &str) -> Result<Program> {
    let value: serde_json::Value =
        serde_json::from_str(source).map_err(|e| LowerError::invalid_input(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| LowerError::malformed_ast(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_minimal() {
        let prog = parse_program(
            r#"{
                "structs": [],
                "externs": [],
                "functions": [{
                    "name": "main",
                    "prms": [],
                    "rettyp": "Int",
                    "locals": [],
                    "stmts": [{"Return": {"Num": 0}}]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(prog.functions.len(), 1);
        assert_eq!(prog.functions[0].name, "main");
        assert_eq!(prog.functions[0].ret_ty, Type::Int);
    }

    #[test]
    fn test_parse_program_full_shape() {
        let prog = parse_program(
            r#"{
                "structs": [{"name": "S", "fields": [{"name": "f", "typ": "Int"}]}],
                "externs": [{"name": "getc", "prms": [], "rettyp": "Int"}],
                "functions": [{
                    "name": "id",
                    "prms": [{"name": "x", "typ": "Int"}],
                    "rettyp": "Int",
                    "locals": [{"name": "y", "typ": {"Ptr": {"Struct": "S"}}}],
                    "stmts": [{"Return": {"Val": {"Id": "x"}}}]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(prog.structs[0].fields[0].name, "f");
        assert_eq!(prog.externs[0].name, "getc");
        assert_eq!(
            prog.functions[0].locals[0].ty,
            Type::Ptr(Box::new(Type::Struct("S".to_string())))
        );
    }

    #[test]
    fn test_parse_program_bad_json_is_invalid_input() {
        match parse_program("{not json") {
            Err(LowerError::InvalidInput { .. }) => {}
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_program_wrong_shape_is_malformed_ast() {
        match parse_program(r#"{"structs": [], "externs": []}"#) {
            Err(LowerError::MalformedAst { .. }) => {}
            other => panic!("expected MalformedAst, got {other:?}"),
        }
    }
}
