//! Expression, place, and statement AST nodes

use super::Type;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Exp {
    /// Integer literal
    Num(i64),
    /// The nil literal (accepted as the bare string `"Nil"` too)
    Nil,
    /// Read from a place
    Val(Place),
    /// Unary operation
    UnOp(UnOpNode),
    /// Binary operation
    BinOp(BinOpNode),
    /// Conditional expression: guard ? tt : ff
    Select {
        guard: Box<Exp>,
        tt: Box<Exp>,
        ff: Box<Exp>,
    },
    /// Function call in expression position
    Call(FunCall),
    /// Heap-allocate a single value
    NewSingle(Type),
    /// Heap-allocate an array with a computed element count
    NewArray(Type, Box<Exp>),
}

/// A place: something that designates a storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Place {
    /// A named variable
    Id(String),
    /// Pointer dereference
    Deref(Box<Exp>),
    /// Array element
    ArrayAccess { array: Box<Exp>, idx: Box<Exp> },
    /// Struct field through a pointer
    FieldAccess(Box<Exp>, String),
}

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// Assignment to a place
    Assign(Place, Exp),
    /// Function call in statement position (result discarded)
    Call(FunCall),
    /// Conditional statement; `ff` may be absent
    If {
        guard: Exp,
        tt: Vec<Stmt>,
        #[serde(default)]
        ff: Option<Vec<Stmt>>,
    },
    /// While loop
    While(Exp, Vec<Stmt>),
    /// Return, with an optional value
    Return(Option<Exp>),
    /// Exit the innermost loop (accepted as the bare string `"Break"`)
    Break,
    /// Re-test the innermost loop guard (bare string `"Continue"` accepted)
    Continue,
    /// Statement sequence
    Stmts(Vec<Stmt>),
}

/// A function call: callee expression plus arguments.
///
/// Wire form is a two-element list `[callee, [args...]]`.
#[derive(Debug, Clone)]
pub struct FunCall {
    pub callee: Box<Exp>,
    pub args: Vec<Exp>,
}

impl Serialize for FunCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.callee, &self.args).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunCall {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (callee, args) = <(Box<Exp>, Vec<Exp>)>::deserialize(deserializer)?;
        Ok(FunCall { callee, args })
    }
}

/// Unary operation payload.
///
/// Accepted in both list form `["Neg", e]` and object form
/// `{"op": "Neg", "exp": e}`.
#[derive(Debug, Clone, Serialize)]
pub struct UnOpNode {
    pub op: UnaryOp,
    pub exp: Box<Exp>,
}

impl<'de> Deserialize<'de> for UnOpNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(UnaryOp, Box<Exp>),
            Obj { op: UnaryOp, exp: Box<Exp> },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(op, exp) | Repr::Obj { op, exp } => UnOpNode { op, exp },
        })
    }
}

/// Binary operation payload.
///
/// Accepted in both list form `["Add", l, r]` and object form
/// `{"op": "Add", "left": l, "right": r}`.
#[derive(Debug, Clone, Serialize)]
pub struct BinOpNode {
    pub op: BinaryOp,
    pub left: Box<Exp>,
    pub right: Box<Exp>,
}

impl<'de> Deserialize<'de> for BinOpNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(BinaryOp, Box<Exp>, Box<Exp>),
            Obj {
                op: BinaryOp,
                left: Box<Exp>,
                right: Box<Exp>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(op, left, right) | Repr::Obj { op, left, right } => {
                BinOpNode { op, left, right }
            }
        })
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,

    // Short-circuit logical
    And,
    Or,
}
