//! Low-level Intermediate Representation (LIR)
//!
//! LIR is a three-address, CFG-based representation. Every computation
//! targets a named local, loads and stores are explicit, and each function
//! body is a map of labeled basic blocks terminated by a jump, branch, or
//! return.

mod lower;
mod output;

pub use lower::lower_program;

use std::collections::BTreeMap;

pub type VarId = String;
pub type BbId = String;
pub type FuncId = String;
pub type StructId = String;
pub type FieldId = String;

/// The distinguished name of the null pointer/array value. It is referenced
/// by lowered code but defined by code generation downstream.
pub const NULL_VAR: &str = "__NULL";

/// LIR type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int,
    Nil,
    /// Named struct type; bodies live in [`Program::structs`]
    Struct(StructId),
    Ptr(Box<Type>),
    Array(Box<Type>),
    Fn {
        params: Vec<Type>,
        ret: Box<Type>,
    },
}

impl Type {
    /// Type equality as the Cflat type system defines it: structural, except
    /// that `Nil` is interchangeable with any pointer or array type.
    ///
    /// This relation is not transitive (`&int` and `&S` both equal `nil`
    /// without equaling each other), so it is deliberately not the
    /// `PartialEq` instance.
    pub fn equals(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Nil, Type::Nil | Type::Ptr(_) | Type::Array(_)) => true,
            (Type::Ptr(_) | Type::Array(_), Type::Nil) => true,
            (Type::Int, Type::Int) => true,
            (Type::Struct(a), Type::Struct(b)) => a == b,
            (Type::Ptr(a), Type::Ptr(b)) => a.equals(b),
            (Type::Array(a), Type::Array(b)) => a.equals(b),
            (
                Type::Fn { params: p1, ret: r1 },
                Type::Fn { params: p2, ret: r2 },
            ) => {
                p1.len() == p2.len()
                    && r1.equals(r2)
                    && p1.iter().zip(p2).all(|(a, b)| a.equals(b))
            }
            _ => false,
        }
    }
}

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// LIR instruction (non-terminating)
#[derive(Debug, Clone)]
pub enum Inst {
    /// lhs = $const value
    Const { lhs: VarId, value: i64 },
    /// lhs = $copy src
    Copy { lhs: VarId, src: VarId },
    /// lhs = $arith op left right
    Arith {
        lhs: VarId,
        op: ArithOp,
        left: VarId,
        right: VarId,
    },
    /// lhs = $cmp op left right
    Cmp {
        lhs: VarId,
        op: RelOp,
        left: VarId,
        right: VarId,
    },
    /// lhs = $load src
    Load { lhs: VarId, src: VarId },
    /// $store dst src
    Store { dst: VarId, src: VarId },
    /// lhs = $gfp src, struct_id, field — address of a struct field
    Gfp {
        lhs: VarId,
        src: VarId,
        struct_id: StructId,
        field: FieldId,
    },
    /// lhs = $gep src idx [checked] — address of an array element
    Gep {
        lhs: VarId,
        src: VarId,
        idx: VarId,
        checked: bool,
    },
    /// lhs = $alloc_single ty
    AllocSingle { lhs: VarId, ty: Type },
    /// lhs = $alloc_array amount ty
    AllocArray {
        lhs: VarId,
        amount: VarId,
        ty: Type,
    },
    /// [lhs =] $call callee, args...
    Call {
        lhs: Option<VarId>,
        callee: VarId,
        args: Vec<VarId>,
    },
}

/// Block terminator (control flow)
#[derive(Debug, Clone)]
pub enum Terminator {
    /// $jump target
    Jump(BbId),
    /// $branch guard tt ff
    Branch { guard: VarId, tt: BbId, ff: BbId },
    /// $ret [value]
    Ret(Option<VarId>),
}

/// A basic block: label, instructions, and exactly one terminator
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: BbId,
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

/// A lowered function
#[derive(Debug, Clone)]
pub struct Function {
    pub name: FuncId,
    /// Parameters in declaration order
    pub params: Vec<(VarId, Type)>,
    pub ret_ty: Type,
    /// Every variable the body mentions: parameters, user locals, fresh
    /// temporaries, and constant holders. Append-only during lowering.
    pub locals: BTreeMap<VarId, Type>,
    /// Basic blocks keyed by label
    pub body: BTreeMap<BbId, BasicBlock>,
}

impl Function {
    /// The label of this function's entry block.
    pub fn entry_label(&self) -> BbId {
        format!("{}_entry", self.name)
    }
}

/// Struct type definition
#[derive(Debug, Clone)]
pub struct Struct {
    pub name: StructId,
    pub fields: BTreeMap<FieldId, Type>,
}

/// A complete LIR program.
///
/// All four tables are keyed by name; `BTreeMap` iteration gives the
/// lexicographic order the serializer requires.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub structs: BTreeMap<StructId, Struct>,
    /// Extern name -> `Fn` type
    pub externs: BTreeMap<FuncId, Type>,
    /// Every internal function except `main` -> `Ptr(Fn)` type
    pub funptrs: BTreeMap<FuncId, Type>,
    pub functions: BTreeMap<FuncId, Function>,
}
