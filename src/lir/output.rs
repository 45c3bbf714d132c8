//! LIR text output
//!
//! Deterministic emission of a lowered program: structs, externs, funptrs,
//! then functions, each section in lexicographic name order. Within a
//! function, locals print on one `let` line and blocks print entry first,
//! then the rest lexicographically.

use std::fmt;

use super::{ArithOp, BasicBlock, Function, Inst, Program, RelOp, Terminator, Type};

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Nil => write!(f, "nil"),
            Type::Struct(name) => write!(f, "struct {name}"),
            Type::Array(elem) => write!(f, "[{elem}]"),
            Type::Ptr(inner) => write!(f, "&{inner}"),
            Type::Fn { params, ret } => {
                write!(f, "fn (")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "add"),
            ArithOp::Sub => write!(f, "sub"),
            ArithOp::Mul => write!(f, "mul"),
            ArithOp::Div => write!(f, "div"),
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelOp::Eq => write!(f, "eq"),
            RelOp::NotEq => write!(f, "ne"),
            RelOp::Lt => write!(f, "lt"),
            RelOp::Lte => write!(f, "lte"),
            RelOp::Gt => write!(f, "gt"),
            RelOp::Gte => write!(f, "gte"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Const { lhs, value } => write!(f, "{lhs} = $const {value}"),
            Inst::Copy { lhs, src } => write!(f, "{lhs} = $copy {src}"),
            Inst::Arith {
                lhs,
                op,
                left,
                right,
            } => write!(f, "{lhs} = $arith {op} {left} {right}"),
            Inst::Cmp {
                lhs,
                op,
                left,
                right,
            } => write!(f, "{lhs} = $cmp {op} {left} {right}"),
            Inst::Load { lhs, src } => write!(f, "{lhs} = $load {src}"),
            Inst::Store { dst, src } => write!(f, "$store {dst} {src}"),
            Inst::Gfp {
                lhs,
                src,
                struct_id,
                field,
            } => write!(f, "{lhs} = $gfp {src}, {struct_id}, {field}"),
            Inst::Gep {
                lhs,
                src,
                idx,
                checked,
            } => write!(f, "{lhs} = $gep {src} {idx} [{checked}]"),
            Inst::AllocSingle { lhs, ty } => write!(f, "{lhs} = $alloc_single {ty}"),
            Inst::AllocArray { lhs, amount, ty } => {
                write!(f, "{lhs} = $alloc_array {amount} {ty}")
            }
            Inst::Call { lhs, callee, args } => {
                if let Some(lhs) = lhs {
                    write!(f, "{lhs} = ")?;
                }
                write!(f, "$call {callee}")?;
                for arg in args {
                    write!(f, ", {arg}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "$jump {target}"),
            Terminator::Branch { guard, tt, ff } => write!(f, "$branch {guard} {tt} {ff}"),
            Terminator::Ret(None) => write!(f, "$ret"),
            Terminator::Ret(Some(value)) => write!(f, "$ret {value}"),
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &BasicBlock) -> fmt::Result {
    writeln!(f, "\n{}:", block.label)?;
    for inst in &block.insts {
        writeln!(f, "  {inst}")?;
    }
    writeln!(f, "  {}", block.term)
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, (name, ty)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        writeln!(f, ") -> {} {{", self.ret_ty)?;

        if !self.locals.is_empty() {
            write!(f, "let ")?;
            for (i, (name, ty)) in self.locals.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}:{ty}")?;
            }
            writeln!(f)?;
        }

        // Entry block first, then the rest in label order.
        let entry = self.entry_label();
        if let Some(block) = self.body.get(&entry) {
            write_block(f, block)?;
        }
        for (label, block) in &self.body {
            if *label != entry {
                write_block(f, block)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in self.structs.values() {
            writeln!(f, "struct {} {{", s.name)?;
            for (name, ty) in &s.fields {
                writeln!(f, "  {name}: {ty};")?;
            }
            writeln!(f, "}}")?;
            writeln!(f)?;
        }

        for (name, ty) in &self.externs {
            writeln!(f, "extern {name} : {ty}")?;
        }
        if !self.externs.is_empty() {
            writeln!(f)?;
        }

        for (name, ty) in &self.funptrs {
            writeln!(f, "funptr {name} : {ty}")?;
        }
        if !self.funptrs.is_empty() {
            writeln!(f)?;
        }

        for fun in self.functions.values() {
            write!(f, "{fun}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}
