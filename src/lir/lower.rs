//! AST to LIR lowering
//!
//! Lowering happens in two passes per function. The first pass walks the
//! statement tree and appends labels, instructions, and terminators to a
//! flat translation vector; the second pass slices that vector into labeled
//! basic blocks and prunes blocks unreachable from the entry block.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::ast;
use crate::error::{LowerError, Result};

use super::{
    ArithOp, BasicBlock, BbId, Function, Inst, Program, RelOp, Struct, Terminator, Type, VarId,
    NULL_VAR,
};

/// One item of the translation vector.
#[derive(Debug, Clone)]
enum TvItem {
    Label(BbId),
    Inst(Inst),
    Term(Terminator),
}

/// Lower an entire program to LIR.
///
/// The program shell (structs, externs, function signatures, funptrs) is
/// built first so that `typeof` lookups during body lowering can see every
/// function, then each body is lowered in turn.
pub fn lower_program(ast_prog: &ast::Program) -> Result<Program> {
    let mut prog = Program::default();

    for s in &ast_prog.structs {
        let fields = s
            .fields
            .iter()
            .map(|f| (f.name.clone(), convert_type(&f.ty)))
            .collect();
        prog.structs.insert(
            s.name.clone(),
            Struct {
                name: s.name.clone(),
                fields,
            },
        );
    }

    for e in &ast_prog.externs {
        let ty = Type::Fn {
            params: e.params.iter().map(convert_type).collect(),
            ret: Box::new(convert_type(&e.ret_ty)),
        };
        prog.externs.insert(e.name.clone(), ty);
    }

    // Function shells: signature and locals only, bodies still empty.
    let mut shells = Vec::with_capacity(ast_prog.functions.len());
    for f in &ast_prog.functions {
        let mut locals = BTreeMap::new();
        let mut params = Vec::with_capacity(f.params.len());
        let mut param_types = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let ty = convert_type(&p.ty);
            params.push((p.name.clone(), ty.clone()));
            param_types.push(ty.clone());
            locals.insert(p.name.clone(), ty);
        }
        for l in &f.locals {
            locals.insert(l.name.clone(), convert_type(&l.ty));
        }
        let ret_ty = convert_type(&f.ret_ty);

        // Every internal function except main gets a funptr entry.
        if f.name != "main" {
            let fn_ty = Type::Fn {
                params: param_types,
                ret: Box::new(ret_ty.clone()),
            };
            prog.funptrs
                .insert(f.name.clone(), Type::Ptr(Box::new(fn_ty)));
        }

        shells.push(Function {
            name: f.name.clone(),
            params,
            ret_ty,
            locals,
            body: BTreeMap::new(),
        });
    }

    for (mut fun, ast_fun) in shells.into_iter().zip(&ast_prog.functions) {
        FunctionLowerer::new(&mut fun, &prog).lower(ast_fun)?;
        prog.functions.insert(fun.name.clone(), fun);
    }

    Ok(prog)
}

/// Map an AST type onto its LIR counterpart.
fn convert_type(ty: &ast::Type) -> Type {
    match ty {
        ast::Type::Int => Type::Int,
        ast::Type::Nil => Type::Nil,
        ast::Type::Struct(name) => Type::Struct(name.clone()),
        ast::Type::Ptr(inner) => Type::Ptr(Box::new(convert_type(inner))),
        ast::Type::Array(elem) => Type::Array(Box::new(convert_type(elem))),
        ast::Type::Fn(params, ret) => Type::Fn {
            params: params.iter().map(convert_type).collect(),
            ret: Box::new(convert_type(ret)),
        },
    }
}

fn arith_op(op: ast::BinaryOp) -> Option<ArithOp> {
    match op {
        ast::BinaryOp::Add => Some(ArithOp::Add),
        ast::BinaryOp::Sub => Some(ArithOp::Sub),
        ast::BinaryOp::Mul => Some(ArithOp::Mul),
        ast::BinaryOp::Div => Some(ArithOp::Div),
        _ => None,
    }
}

fn rel_op(op: ast::BinaryOp) -> Option<RelOp> {
    match op {
        ast::BinaryOp::Eq => Some(RelOp::Eq),
        ast::BinaryOp::NotEq => Some(RelOp::NotEq),
        ast::BinaryOp::Lt => Some(RelOp::Lt),
        ast::BinaryOp::Lte => Some(RelOp::Lte),
        ast::BinaryOp::Gt => Some(RelOp::Gt),
        ast::BinaryOp::Gte => Some(RelOp::Gte),
        _ => None,
    }
}

/// The pointee of a pointer type.
fn pointee_type(ty: Type) -> Result<Type> {
    match ty {
        Type::Ptr(inner) => Ok(*inner),
        other => Err(LowerError::type_shape_mismatch(format!(
            "expected a pointer type, found {other}"
        ))),
    }
}

/// The return type of a function or function-pointer type.
fn func_ret_type(ty: Type) -> Result<Type> {
    match ty {
        Type::Fn { ret, .. } => Ok(*ret),
        Type::Ptr(inner) => match *inner {
            Type::Fn { ret, .. } => Ok(*ret),
            other => Err(LowerError::type_shape_mismatch(format!(
                "called a non-function pointer of type &{other}"
            ))),
        },
        other => Err(LowerError::type_shape_mismatch(format!(
            "called a non-function of type {other}"
        ))),
    }
}

/// Per-function lowering state.
struct FunctionLowerer<'a> {
    fun: &'a mut Function,
    prog: &'a Program,
    /// The translation vector
    tv: Vec<TvItem>,
    label_counter: usize,
    tmp_counter: usize,
    /// Index in `tv` where the next on-demand `Const` is inserted.
    /// Starts right after the entry label so constants cluster at the top
    /// of the entry block in first-use order.
    const_insert_pos: usize,
    loop_hdr_stack: Vec<BbId>,
    loop_end_stack: Vec<BbId>,
}

impl<'a> FunctionLowerer<'a> {
    fn new(fun: &'a mut Function, prog: &'a Program) -> Self {
        Self {
            fun,
            prog,
            tv: Vec::new(),
            label_counter: 0,
            tmp_counter: 0,
            const_insert_pos: 1,
            loop_hdr_stack: Vec::new(),
            loop_end_stack: Vec::new(),
        }
    }

    fn lower(mut self, ast_fun: &ast::FunctionDef) -> Result<()> {
        let entry = self.fun.entry_label();
        self.label(entry);

        for stmt in &ast_fun.body {
            self.lower_stmt(stmt)?;
        }

        if !self.ends_with_ret() {
            self.terminate(Terminator::Ret(None));
        }

        self.build_cfg()
    }

    // --- Translation vector primitives ---

    fn emit(&mut self, inst: Inst) {
        self.tv.push(TvItem::Inst(inst));
    }

    fn terminate(&mut self, term: Terminator) {
        self.tv.push(TvItem::Term(term));
    }

    fn label(&mut self, label: BbId) {
        self.tv.push(TvItem::Label(label));
    }

    fn new_label(&mut self, prefix: &str) -> BbId {
        let label = format!("{}{}", prefix, self.label_counter);
        self.label_counter += 1;
        label
    }

    fn fresh_tmp(&mut self, prefix: &str, ty: Type) -> VarId {
        let name = format!("{}{}", prefix, self.tmp_counter);
        self.tmp_counter += 1;
        self.fun.locals.insert(name.clone(), ty);
        name
    }

    /// Fresh temporary for an interior pointer (result of `Gfp`/`Gep`).
    fn fresh_inner(&mut self, ty: Type) -> VarId {
        self.fresh_tmp("_inner", ty)
    }

    /// Fresh temporary for any other intermediate result.
    fn fresh_non_inner(&mut self, ty: Type) -> VarId {
        self.fresh_tmp("_tmp", ty)
    }

    /// Liveness hint. Temporaries are minted monotonically and never
    /// reused; packing is left to downstream register allocation.
    fn release(&mut self, _vars: &[VarId]) {}

    /// The dedicated local holding integer literal `value`, creating it and
    /// its defining `Const` on first use.
    fn const_var(&mut self, value: i64) -> VarId {
        let name = if value < 0 {
            format!("_const_n{}", value.unsigned_abs())
        } else {
            format!("_const_{value}")
        };
        if !self.fun.locals.contains_key(&name) {
            self.fun.locals.insert(name.clone(), Type::Int);
            self.tv.insert(
                self.const_insert_pos,
                TvItem::Inst(Inst::Const {
                    lhs: name.clone(),
                    value,
                }),
            );
            self.const_insert_pos += 1;
        }
        name
    }

    /// Resolve the type of a variable: locals, then funptrs, then externs.
    fn typeof_var(&self, id: &str) -> Result<Type> {
        if let Some(ty) = self.fun.locals.get(id) {
            return Ok(ty.clone());
        }
        if let Some(ty) = self.prog.funptrs.get(id) {
            return Ok(ty.clone());
        }
        if let Some(ty) = self.prog.externs.get(id) {
            return Ok(ty.clone());
        }
        if id == NULL_VAR {
            return Ok(Type::Nil);
        }
        Err(LowerError::unknown_identifier(id))
    }

    fn field_type(&self, struct_id: &str, field: &str) -> Result<Type> {
        self.prog
            .structs
            .get(struct_id)
            .and_then(|s| s.fields.get(field))
            .cloned()
            .ok_or_else(|| {
                LowerError::type_shape_mismatch(format!(
                    "no field {field} in struct {struct_id}"
                ))
            })
    }

    // --- Statements ---

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> Result<()> {
        match stmt {
            ast::Stmt::Stmts(stmts) => {
                for s in stmts {
                    self.lower_stmt(s)?;
                }
            }

            ast::Stmt::Assign(ast::Place::Id(name), exp) => {
                let x = self.lower_exp(exp)?;
                self.emit(Inst::Copy {
                    lhs: name.clone(),
                    src: x.clone(),
                });
                self.release(&[x]);
            }

            ast::Stmt::Assign(place, exp) => {
                let dst = self.lower_place(place)?;
                let src = self.lower_exp(exp)?;
                self.emit(Inst::Store {
                    dst: dst.clone(),
                    src: src.clone(),
                });
                self.release(&[dst, src]);
            }

            ast::Stmt::Call(call) => {
                let (args, callee) = self.lower_call_operands(call)?;
                self.emit(Inst::Call {
                    lhs: None,
                    callee: callee.clone(),
                    args: args.clone(),
                });
                let mut released = args;
                released.push(callee);
                self.release(&released);
            }

            ast::Stmt::If { guard, tt, ff } => {
                let tt_label = self.new_label("if_true");
                let ff_label = self.new_label("if_false");
                let end_label = self.new_label("if_end");

                let g = self.lower_exp(guard)?;
                self.terminate(Terminator::Branch {
                    guard: g.clone(),
                    tt: tt_label.clone(),
                    ff: ff_label.clone(),
                });
                self.label(tt_label);
                self.release(&[g]);

                for s in tt {
                    self.lower_stmt(s)?;
                }
                // Emitted even when the branch already returned; the CFG
                // pass drops a terminator that has no open block.
                self.terminate(Terminator::Jump(end_label.clone()));
                self.label(ff_label);

                if let Some(ff) = ff {
                    for s in ff {
                        self.lower_stmt(s)?;
                    }
                }
                self.terminate(Terminator::Jump(end_label.clone()));
                self.label(end_label);
            }

            ast::Stmt::While(guard, body) => {
                let hdr_label = self.new_label("loop_hdr");
                let body_label = self.new_label("loop_body");
                let end_label = self.new_label("loop_end");

                self.loop_hdr_stack.push(hdr_label.clone());
                self.loop_end_stack.push(end_label.clone());

                self.terminate(Terminator::Jump(hdr_label.clone()));
                self.label(hdr_label.clone());
                let g = self.lower_exp(guard)?;
                self.terminate(Terminator::Branch {
                    guard: g.clone(),
                    tt: body_label.clone(),
                    ff: end_label.clone(),
                });
                self.release(&[g]);
                self.label(body_label);

                for s in body {
                    self.lower_stmt(s)?;
                }
                self.terminate(Terminator::Jump(hdr_label));
                self.label(end_label);

                self.loop_hdr_stack.pop();
                self.loop_end_stack.pop();
            }

            ast::Stmt::Break => {
                let target = self
                    .loop_end_stack
                    .last()
                    .cloned()
                    .ok_or(LowerError::BreakOutsideLoop)?;
                self.terminate(Terminator::Jump(target));
            }

            ast::Stmt::Continue => {
                let target = self
                    .loop_hdr_stack
                    .last()
                    .cloned()
                    .ok_or(LowerError::ContinueOutsideLoop)?;
                self.terminate(Terminator::Jump(target));
            }

            ast::Stmt::Return(Some(exp)) => {
                let x = self.lower_exp(exp)?;
                self.terminate(Terminator::Ret(Some(x.clone())));
                self.release(&[x]);
            }

            ast::Stmt::Return(None) => {
                self.terminate(Terminator::Ret(None));
            }
        }
        Ok(())
    }

    // --- Expressions ---

    /// Lower an expression, returning the variable holding its result.
    fn lower_exp(&mut self, exp: &ast::Exp) -> Result<VarId> {
        match exp {
            ast::Exp::Num(n) => Ok(self.const_var(*n)),

            ast::Exp::Nil => Ok(NULL_VAR.to_string()),

            ast::Exp::Val(ast::Place::Id(name)) => Ok(name.clone()),

            ast::Exp::Val(place) => {
                let src = self.lower_place(place)?;
                let val_ty = pointee_type(self.typeof_var(&src)?)?;
                let lhs = self.fresh_non_inner(val_ty);
                self.emit(Inst::Load {
                    lhs: lhs.clone(),
                    src: src.clone(),
                });
                self.release(&[src]);
                Ok(lhs)
            }

            ast::Exp::UnOp(node) => match node.op {
                ast::UnaryOp::Neg => {
                    // Negated literals fold directly into a constant.
                    if let ast::Exp::Num(n) = *node.exp {
                        return Ok(self.const_var(n.wrapping_neg()));
                    }
                    let lhs = self.fresh_non_inner(Type::Int);
                    let zero = self.const_var(0);
                    let x = self.lower_exp(&node.exp)?;
                    self.emit(Inst::Arith {
                        lhs: lhs.clone(),
                        op: ArithOp::Sub,
                        left: zero,
                        right: x.clone(),
                    });
                    self.release(&[x]);
                    Ok(lhs)
                }
                ast::UnaryOp::Not => {
                    // !e is e == 0
                    let left = self.lower_exp(&node.exp)?;
                    let right = self.const_var(0);
                    let lhs = self.fresh_non_inner(Type::Int);
                    self.emit(Inst::Cmp {
                        lhs: lhs.clone(),
                        op: RelOp::Eq,
                        left: left.clone(),
                        right: right.clone(),
                    });
                    self.release(&[left, right]);
                    Ok(lhs)
                }
            },

            ast::Exp::BinOp(node) => {
                if let Some(op) = arith_op(node.op) {
                    let left = self.lower_exp(&node.left)?;
                    let right = self.lower_exp(&node.right)?;
                    let lhs = self.fresh_non_inner(Type::Int);
                    self.emit(Inst::Arith {
                        lhs: lhs.clone(),
                        op,
                        left: left.clone(),
                        right: right.clone(),
                    });
                    self.release(&[left, right]);
                    Ok(lhs)
                } else if let Some(op) = rel_op(node.op) {
                    let left = self.lower_exp(&node.left)?;
                    let right = self.lower_exp(&node.right)?;
                    let lhs = self.fresh_non_inner(Type::Int);
                    self.emit(Inst::Cmp {
                        lhs: lhs.clone(),
                        op,
                        left: left.clone(),
                        right: right.clone(),
                    });
                    self.release(&[left, right]);
                    Ok(lhs)
                } else if node.op == ast::BinaryOp::And {
                    // l && r short-circuits to 0: a conditional expression
                    // whose false branch is the literal 0.
                    let zero = ast::Exp::Num(0);
                    self.lower_select(
                        &node.left,
                        &node.right,
                        &zero,
                        ["and_true", "and_false", "and_end"],
                    )
                } else {
                    self.lower_or(&node.left, &node.right)
                }
            }

            ast::Exp::Select { guard, tt, ff } => {
                self.lower_select(guard, tt, ff, ["if_true", "if_false", "if_end"])
            }

            ast::Exp::NewSingle(ty) => {
                let ty = convert_type(ty);
                let lhs = self.fresh_non_inner(Type::Ptr(Box::new(ty.clone())));
                self.emit(Inst::AllocSingle {
                    lhs: lhs.clone(),
                    ty,
                });
                Ok(lhs)
            }

            ast::Exp::NewArray(ty, amount) => {
                let ty = convert_type(ty);
                let lhs = self.fresh_non_inner(Type::Array(Box::new(ty.clone())));
                let amt = self.lower_exp(amount)?;
                self.emit(Inst::AllocArray {
                    lhs: lhs.clone(),
                    amount: amt.clone(),
                    ty,
                });
                self.release(&[amt]);
                Ok(lhs)
            }

            ast::Exp::Call(call) => {
                let (args, callee) = self.lower_call_operands(call)?;
                let ret_ty = func_ret_type(self.typeof_var(&callee)?)?;
                let lhs = self.fresh_non_inner(ret_ty);
                self.emit(Inst::Call {
                    lhs: Some(lhs.clone()),
                    callee: callee.clone(),
                    args: args.clone(),
                });
                let mut released = args;
                released.push(callee);
                self.release(&released);
                Ok(lhs)
            }
        }
    }

    /// Lower call arguments and callee. Arguments are evaluated
    /// right-to-left; the returned list is in source order, which is how
    /// the emitted `Call` must carry them.
    fn lower_call_operands(&mut self, call: &ast::FunCall) -> Result<(Vec<VarId>, VarId)> {
        let mut args = Vec::with_capacity(call.args.len());
        for arg in call.args.iter().rev() {
            args.push(self.lower_exp(arg)?);
        }
        args.reverse();
        let callee = self.lower_exp(&call.callee)?;
        Ok((args, callee))
    }

    /// Lower a conditional expression. Both branches may evaluate to the
    /// nil literal, whose type is unusable for the result temporary; the
    /// result stays `__NULL` until a branch produces a non-nil value, and
    /// is typed by whichever branch does so first. A branch that stays nil
    /// emits no copy: declared pointer locals default to null anyway.
    fn lower_select(
        &mut self,
        guard: &ast::Exp,
        tt: &ast::Exp,
        ff: &ast::Exp,
        prefixes: [&str; 3],
    ) -> Result<VarId> {
        let tt_label = self.new_label(prefixes[0]);
        let ff_label = self.new_label(prefixes[1]);
        let end_label = self.new_label(prefixes[2]);

        let mut result: VarId = NULL_VAR.to_string();

        let g = self.lower_exp(guard)?;
        self.terminate(Terminator::Branch {
            guard: g.clone(),
            tt: tt_label.clone(),
            ff: ff_label.clone(),
        });
        self.label(tt_label);
        self.release(&[g]);

        let z = self.lower_exp(tt)?;
        if z != NULL_VAR {
            let ty = self.typeof_var(&z)?;
            result = self.fresh_non_inner(ty);
            self.emit(Inst::Copy {
                lhs: result.clone(),
                src: z.clone(),
            });
        }
        self.release(&[z]);
        self.terminate(Terminator::Jump(end_label.clone()));
        self.label(ff_label);

        let w = self.lower_exp(ff)?;
        if w != NULL_VAR {
            if result == NULL_VAR {
                let ty = self.typeof_var(&w)?;
                result = self.fresh_non_inner(ty);
            }
            self.emit(Inst::Copy {
                lhs: result.clone(),
                src: w.clone(),
            });
        }
        self.release(&[w]);
        self.terminate(Terminator::Jump(end_label.clone()));
        self.label(end_label);

        Ok(result)
    }

    /// Short-circuit `l || r`: the result temporary is written before the
    /// branch so the true path needs no second block.
    fn lower_or(&mut self, left: &ast::Exp, right: &ast::Exp) -> Result<VarId> {
        let ff_label = self.new_label("or_false");
        let end_label = self.new_label("or_end");

        let x = self.lower_exp(left)?;
        let y = self.fresh_non_inner(Type::Int);
        self.emit(Inst::Copy {
            lhs: y.clone(),
            src: x.clone(),
        });
        self.terminate(Terminator::Branch {
            guard: y.clone(),
            tt: end_label.clone(),
            ff: ff_label.clone(),
        });
        self.label(ff_label);
        self.release(&[x]);

        let z = self.lower_exp(right)?;
        self.emit(Inst::Copy {
            lhs: y.clone(),
            src: z.clone(),
        });
        self.release(&[z]);
        self.terminate(Terminator::Jump(end_label.clone()));
        self.label(end_label);

        Ok(y)
    }

    // --- Places ---

    /// Lower a place, returning the variable holding its address.
    fn lower_place(&mut self, place: &ast::Place) -> Result<VarId> {
        match place {
            // Plain variables are handled directly by assignment and value
            // reads; Cflat has no address-of operator.
            ast::Place::Id(name) => Err(LowerError::type_shape_mismatch(format!(
                "cannot take the address of plain variable {name}"
            ))),

            ast::Place::Deref(exp) => self.lower_exp(exp),

            ast::Place::ArrayAccess { array, idx } => {
                let src = self.lower_exp(array)?;
                let idx = self.lower_exp(idx)?;
                let elem_ty = match self.typeof_var(&src)? {
                    Type::Array(elem) => *elem,
                    other => {
                        return Err(LowerError::type_shape_mismatch(format!(
                            "array access on non-array type {other}"
                        )))
                    }
                };
                let lhs = self.fresh_inner(Type::Ptr(Box::new(elem_ty)));
                self.emit(Inst::Gep {
                    lhs: lhs.clone(),
                    src: src.clone(),
                    idx: idx.clone(),
                    checked: true,
                });
                self.release(&[src, idx]);
                Ok(lhs)
            }

            ast::Place::FieldAccess(ptr, field) => {
                let src = self.lower_exp(ptr)?;
                let struct_id = match self.typeof_var(&src)? {
                    Type::Ptr(inner) => match *inner {
                        Type::Struct(id) => id,
                        other => {
                            return Err(LowerError::type_shape_mismatch(format!(
                                "field access through pointer to non-struct type {other}"
                            )))
                        }
                    },
                    other => {
                        return Err(LowerError::type_shape_mismatch(format!(
                            "field access on non-pointer type {other}"
                        )))
                    }
                };
                let field_ty = self.field_type(&struct_id, field)?;
                let lhs = self.fresh_inner(Type::Ptr(Box::new(field_ty)));
                self.emit(Inst::Gfp {
                    lhs: lhs.clone(),
                    src: src.clone(),
                    struct_id,
                    field: field.clone(),
                });
                self.release(&[src]);
                Ok(lhs)
            }
        }
    }

    // --- Pass 2: translation vector -> CFG ---

    /// True when the last non-label item of the translation vector is a
    /// `Ret` terminator.
    fn ends_with_ret(&self) -> bool {
        for item in self.tv.iter().rev() {
            match item {
                TvItem::Label(_) => continue,
                TvItem::Term(t) => return matches!(t, Terminator::Ret(_)),
                TvItem::Inst(_) => return false,
            }
        }
        false
    }

    /// Slice the translation vector into basic blocks and prune blocks
    /// unreachable from the entry block.
    fn build_cfg(self) -> Result<()> {
        #[derive(Default)]
        struct PartialBlock {
            insts: Vec<Inst>,
            term: Option<Terminator>,
        }

        let Self { fun, tv, .. } = self;
        let entry = fun.entry_label();

        let mut blocks: BTreeMap<BbId, PartialBlock> = BTreeMap::new();
        let mut current: Option<BbId> = None;

        for item in tv {
            match item {
                TvItem::Label(label) => {
                    blocks.entry(label.clone()).or_default();
                    current = Some(label);
                }
                TvItem::Inst(inst) => {
                    // Only constants inserted ahead of the first label can
                    // arrive without an open block; they belong to entry.
                    let label = current.clone().unwrap_or_else(|| entry.clone());
                    blocks.entry(label).or_default().insts.push(inst);
                }
                TvItem::Term(term) => {
                    // A terminator with no open block is the redundant jump
                    // emitted after a branch arm that already terminated.
                    if let Some(label) = current.take() {
                        if let Some(block) = blocks.get_mut(&label) {
                            block.term = Some(term);
                        }
                    }
                }
            }
        }

        for (label, block) in blocks {
            let term = block
                .term
                .ok_or_else(|| LowerError::malformed_block(label.as_str()))?;
            fun.body.insert(
                label.clone(),
                BasicBlock {
                    label,
                    insts: block.insts,
                    term,
                },
            );
        }

        prune_unreachable(fun);
        Ok(())
    }
}

/// Delete every block not reachable from the entry block by following
/// jump and branch targets.
fn prune_unreachable(fun: &mut Function) {
    let entry = fun.entry_label();
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();

    if fun.body.contains_key(&entry) {
        reachable.insert(entry.clone());
        queue.push_back(entry);
    }

    while let Some(label) = queue.pop_front() {
        let Some(block) = fun.body.get(&label) else {
            continue;
        };
        let targets = match &block.term {
            Terminator::Jump(target) => vec![target.clone()],
            Terminator::Branch { tt, ff, .. } => vec![tt.clone(), ff.clone()],
            Terminator::Ret(_) => Vec::new(),
        };
        for target in targets {
            if reachable.insert(target.clone()) {
                queue.push_back(target);
            }
        }
    }

    fun.body.retain(|label, _| reachable.contains(label));
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lower a `main` with the given locals and statements (both JSON
    /// fragments) and return the finished function.
    fn lower_main(locals: &str, stmts: &str) -> Function {
        let prog = lower_main_program(locals, stmts);
        prog.functions.get("main").cloned().unwrap()
    }

    fn lower_main_program(locals: &str, stmts: &str) -> Program {
        let source = format!(
            r#"{{
                "structs": [{{"name": "S", "fields": [{{"name": "f", "typ": "Int"}}]}}],
                "externs": [],
                "functions": [{{
                    "name": "main", "prms": [], "rettyp": "Int",
                    "locals": {locals}, "stmts": {stmts}
                }}]
            }}"#
        );
        let ast = crate::ast::parse_program(&source).unwrap();
        lower_program(&ast).unwrap()
    }

    fn entry(fun: &Function) -> &BasicBlock {
        fun.body.get("main_entry").unwrap()
    }

    #[test]
    fn test_return_constant() {
        let fun = lower_main("[]", r#"[{"Return": {"Num": 7}}]"#);
        assert_eq!(fun.body.len(), 1);
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [Inst::Const { lhs, value: 7 }] if lhs == "_const_7"
        ));
        assert!(matches!(&bb.term, Terminator::Ret(Some(v)) if v == "_const_7"));
    }

    #[test]
    fn test_constants_dedup_and_cluster_in_first_use_order() {
        let fun = lower_main(
            r#"[{"name": "a", "typ": "Int"}]"#,
            r#"[
                {"Assign": [{"Id": "a"}, {"Num": 3}]},
                {"Assign": [{"Id": "a"}, {"Num": 2}]},
                {"Assign": [{"Id": "a"}, {"Num": 3}]}
            ]"#,
        );
        let bb = entry(&fun);
        // One Const per distinct literal, ordered by first use, before any
        // other instruction.
        assert!(matches!(&bb.insts[0], Inst::Const { value: 3, .. }));
        assert!(matches!(&bb.insts[1], Inst::Const { value: 2, .. }));
        let consts = bb
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Const { .. }))
            .count();
        assert_eq!(consts, 2);
        assert!(matches!(&bb.insts[2], Inst::Copy { .. }));
    }

    #[test]
    fn test_negative_literal_constant_name() {
        let fun = lower_main("[]", r#"[{"Return": {"UnOp": ["Neg", {"Num": 12}]}}]"#);
        assert!(fun.locals.contains_key("_const_n12"));
        let bb = entry(&fun);
        assert!(matches!(&bb.insts[..], [Inst::Const { value: -12, .. }]));
    }

    #[test]
    fn test_neg_of_non_literal_subtracts_from_zero() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}]"#,
            r#"[{"Return": {"UnOp": ["Neg", {"Val": {"Id": "x"}}]}}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 0, .. },
                Inst::Arith { lhs, op: ArithOp::Sub, left, right }
            ] if lhs == "_tmp0" && left == "_const_0" && right == "x"
        ));
    }

    #[test]
    fn test_not_lowered_as_compare_with_zero() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}]"#,
            r#"[{"Return": {"UnOp": ["Not", {"Val": {"Id": "x"}}]}}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 0, .. },
                Inst::Cmp { op: RelOp::Eq, left, right, .. }
            ] if left == "x" && right == "_const_0"
        ));
    }

    #[test]
    fn test_implicit_return_appended() {
        let fun = lower_main("[]", "[]");
        assert!(matches!(entry(&fun).term, Terminator::Ret(None)));
    }

    #[test]
    fn test_explicit_return_not_duplicated() {
        let fun = lower_main("[]", r#"[{"Return": null}]"#);
        let bb = entry(&fun);
        assert!(bb.insts.is_empty());
        assert!(matches!(bb.term, Terminator::Ret(None)));
    }

    #[test]
    fn test_funptrs_exclude_main() {
        let source = r#"{
            "structs": [], "externs": [],
            "functions": [
                {"name": "main", "prms": [], "rettyp": "Int", "locals": [], "stmts": []},
                {"name": "f", "prms": [{"name": "x", "typ": "Int"}], "rettyp": "Nil",
                 "locals": [], "stmts": []}
            ]
        }"#;
        let ast = crate::ast::parse_program(source).unwrap();
        let prog = lower_program(&ast).unwrap();
        assert!(!prog.funptrs.contains_key("main"));
        let expected = Type::Ptr(Box::new(Type::Fn {
            params: vec![Type::Int],
            ret: Box::new(Type::Nil),
        }));
        assert_eq!(prog.funptrs.get("f"), Some(&expected));
    }

    #[test]
    fn test_if_labels_and_structure() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}, {"name": "y", "typ": "Int"}]"#,
            r#"[{"If": {
                "guard": {"Val": {"Id": "x"}},
                "tt": [{"Assign": [{"Id": "y"}, {"Num": 1}]}],
                "ff": [{"Assign": [{"Id": "y"}, {"Num": 2}]}]
            }}]"#,
        );
        assert!(matches!(
            &entry(&fun).term,
            Terminator::Branch { guard, tt, ff }
                if guard == "x" && tt == "if_true0" && ff == "if_false1"
        ));
        let tt = fun.body.get("if_true0").unwrap();
        assert!(matches!(&tt.term, Terminator::Jump(l) if l == "if_end2"));
        let ff = fun.body.get("if_false1").unwrap();
        assert!(matches!(&ff.term, Terminator::Jump(l) if l == "if_end2"));
        assert!(fun.body.contains_key("if_end2"));
    }

    #[test]
    fn test_while_with_break_and_continue_targets() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}, {"name": "y", "typ": "Int"}]"#,
            r#"[{"While": [{"Val": {"Id": "x"}}, [
                {"If": {"guard": {"Val": {"Id": "y"}}, "tt": ["Break"]}},
                "Continue"
            ]]}]"#,
        );
        for label in ["loop_hdr0", "loop_body1", "loop_end2"] {
            assert!(fun.body.contains_key(label), "missing {label}");
        }
        assert!(matches!(
            &entry(&fun).term,
            Terminator::Jump(l) if l == "loop_hdr0"
        ));
        assert!(matches!(
            &fun.body.get("loop_hdr0").unwrap().term,
            Terminator::Branch { tt, ff, .. } if tt == "loop_body1" && ff == "loop_end2"
        ));
        // break path
        assert!(matches!(
            &fun.body.get("if_true3").unwrap().term,
            Terminator::Jump(l) if l == "loop_end2"
        ));
        // continue at the end of the body
        assert!(matches!(
            &fun.body.get("if_end5").unwrap().term,
            Terminator::Jump(l) if l == "loop_hdr0"
        ));
    }

    #[test]
    fn test_break_outside_loop_fails() {
        let ast = crate::ast::parse_program(
            r#"{"structs": [], "externs": [], "functions": [
                {"name": "main", "prms": [], "rettyp": "Int", "locals": [],
                 "stmts": ["Break"]}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            lower_program(&ast),
            Err(LowerError::BreakOutsideLoop)
        ));
    }

    #[test]
    fn test_continue_outside_loop_fails() {
        let ast = crate::ast::parse_program(
            r#"{"structs": [], "externs": [], "functions": [
                {"name": "main", "prms": [], "rettyp": "Int", "locals": [],
                 "stmts": ["Continue"]}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            lower_program(&ast),
            Err(LowerError::ContinueOutsideLoop)
        ));
    }

    #[test]
    fn test_unknown_identifier_fails() {
        let ast = crate::ast::parse_program(
            r#"{"structs": [], "externs": [], "functions": [
                {"name": "main", "prms": [], "rettyp": "Int", "locals": [],
                 "stmts": [{"Return": {"BinOp": ["Add", {"Val": {"Id": "ghost"}},
                                                 {"Val": {"Id": "ghost"}}]}}]}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            lower_program(&ast),
            Err(LowerError::UnknownIdentifier { name }) if name == "ghost"
        ));
    }

    #[test]
    fn test_call_args_evaluated_right_to_left_emitted_in_order() {
        let source = r#"{
            "structs": [], "externs": [],
            "functions": [
                {"name": "main", "prms": [], "rettyp": "Int", "locals": [],
                 "stmts": [{"Call": [{"Val": {"Id": "h"}},
                                     [{"Call": [{"Val": {"Id": "f"}}, []]},
                                      {"Call": [{"Val": {"Id": "g"}}, []]}]]}]},
                {"name": "f", "prms": [], "rettyp": "Int", "locals": [], "stmts": []},
                {"name": "g", "prms": [], "rettyp": "Int", "locals": [], "stmts": []},
                {"name": "h", "prms": [{"name": "a", "typ": "Int"}, {"name": "b", "typ": "Int"}],
                 "rettyp": "Nil", "locals": [], "stmts": []}
            ]
        }"#;
        let ast = crate::ast::parse_program(source).unwrap();
        let prog = lower_program(&ast).unwrap();
        let fun = prog.functions.get("main").unwrap();
        let bb = fun.body.get("main_entry").unwrap();
        // g is evaluated first (right-to-left), so its result is _tmp0; the
        // emitted argument list is still in source order.
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Call { lhs: Some(t0), callee: c0, .. },
                Inst::Call { lhs: Some(t1), callee: c1, .. },
                Inst::Call { lhs: None, callee, args },
            ] if t0 == "_tmp0" && c0 == "g" && t1 == "_tmp1" && c1 == "f"
                && callee == "h" && args[..] == ["_tmp1".to_string(), "_tmp0".to_string()]
        ));
    }

    #[test]
    fn test_call_exp_result_typed_from_funptr_return() {
        let source = r#"{
            "structs": [], "externs": [],
            "functions": [
                {"name": "main", "prms": [], "rettyp": "Int",
                 "locals": [{"name": "p", "typ": {"Ptr": "Int"}}],
                 "stmts": [{"Assign": [{"Id": "p"}, {"Call": [{"Val": {"Id": "mk"}}, []]}]}]},
                {"name": "mk", "prms": [], "rettyp": {"Ptr": "Int"}, "locals": [], "stmts": []}
            ]
        }"#;
        let ast = crate::ast::parse_program(source).unwrap();
        let prog = lower_program(&ast).unwrap();
        let fun = prog.functions.get("main").unwrap();
        assert_eq!(
            fun.locals.get("_tmp0"),
            Some(&Type::Ptr(Box::new(Type::Int)))
        );
    }

    #[test]
    fn test_extern_call_typed_from_extern_table() {
        let source = r#"{
            "structs": [],
            "externs": [{"name": "getnum", "prms": [], "rettyp": "Int"}],
            "functions": [
                {"name": "main", "prms": [], "rettyp": "Int",
                 "locals": [{"name": "x", "typ": "Int"}],
                 "stmts": [{"Assign": [{"Id": "x"}, {"Call": [{"Val": {"Id": "getnum"}}, []]}]}]}
            ]
        }"#;
        let ast = crate::ast::parse_program(source).unwrap();
        let prog = lower_program(&ast).unwrap();
        let fun = prog.functions.get("main").unwrap();
        assert_eq!(fun.locals.get("_tmp0"), Some(&Type::Int));
    }

    #[test]
    fn test_select_nil_branch_emits_no_copy_and_types_result() {
        let fun = lower_main(
            r#"[{"name": "c", "typ": "Int"}, {"name": "q", "typ": {"Ptr": "Int"}},
                {"name": "p", "typ": {"Ptr": "Int"}}]"#,
            r#"[{"Assign": [{"Id": "p"}, {"Select": {
                "guard": {"Val": {"Id": "c"}}, "tt": "Nil", "ff": {"Val": {"Id": "q"}}
            }}]}]"#,
        );
        // Result temp typed from the false branch.
        assert_eq!(
            fun.locals.get("_tmp0"),
            Some(&Type::Ptr(Box::new(Type::Int)))
        );
        // True branch: no copy.
        assert!(fun.body.get("if_true0").unwrap().insts.is_empty());
        // False branch: copy from q into the result.
        assert!(matches!(
            &fun.body.get("if_false1").unwrap().insts[..],
            [Inst::Copy { lhs, src }] if lhs == "_tmp0" && src == "q"
        ));
    }

    #[test]
    fn test_select_both_nil_yields_null_result() {
        let fun = lower_main(
            r#"[{"name": "c", "typ": "Int"}, {"name": "p", "typ": {"Ptr": "Int"}}]"#,
            r#"[{"Assign": [{"Id": "p"}, {"Select": {
                "guard": {"Val": {"Id": "c"}}, "tt": "Nil", "ff": "Nil"
            }}]}]"#,
        );
        let end = fun.body.get("if_end2").unwrap();
        assert!(matches!(
            &end.insts[..],
            [Inst::Copy { lhs, src }] if lhs == "p" && src == NULL_VAR
        ));
        // No temporary was minted for the select.
        assert!(!fun.locals.contains_key("_tmp0"));
    }

    #[test]
    fn test_and_lowered_as_select_with_zero() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}, {"name": "y", "typ": "Int"}]"#,
            r#"[{"Return": {"BinOp": ["And", {"Val": {"Id": "x"}}, {"Val": {"Id": "y"}}]}}]"#,
        );
        for label in ["and_true0", "and_false1", "and_end2"] {
            assert!(fun.body.contains_key(label), "missing {label}");
        }
        // True branch copies the right operand; false branch copies 0.
        assert!(matches!(
            &fun.body.get("and_true0").unwrap().insts[..],
            [Inst::Copy { lhs, src }] if lhs == "_tmp0" && src == "y"
        ));
        assert!(matches!(
            &fun.body.get("and_false1").unwrap().insts[..],
            [Inst::Copy { lhs, src }] if lhs == "_tmp0" && src == "_const_0"
        ));
    }

    #[test]
    fn test_or_short_circuit_shape() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}, {"name": "y", "typ": "Int"}]"#,
            r#"[{"Return": {"BinOp": ["Or", {"Val": {"Id": "x"}}, {"Val": {"Id": "y"}}]}}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [Inst::Copy { lhs, src }] if lhs == "_tmp0" && src == "x"
        ));
        // On a truthy left operand control skips straight to the end block.
        assert!(matches!(
            &bb.term,
            Terminator::Branch { guard, tt, ff }
                if guard == "_tmp0" && tt == "or_end1" && ff == "or_false0"
        ));
        assert!(matches!(
            &fun.body.get("or_false0").unwrap().insts[..],
            [Inst::Copy { lhs, src }] if lhs == "_tmp0" && src == "y"
        ));
        assert!(matches!(
            &fun.body.get("or_end1").unwrap().term,
            Terminator::Ret(Some(v)) if v == "_tmp0"
        ));
    }

    #[test]
    fn test_field_assignment_through_pointer() {
        let fun = lower_main(
            r#"[{"name": "s", "typ": {"Ptr": {"Struct": "S"}}}]"#,
            r#"[{"Assign": [{"FieldAccess": [{"Val": {"Id": "s"}}, "f"]}, {"Num": 5}]}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 5, .. },
                Inst::Gfp { lhs, src, struct_id, field },
                Inst::Store { dst, src: stored },
            ] if lhs == "_inner0" && src == "s" && struct_id == "S" && field == "f"
                && dst == "_inner0" && stored == "_const_5"
        ));
        assert_eq!(
            fun.locals.get("_inner0"),
            Some(&Type::Ptr(Box::new(Type::Int)))
        );
    }

    #[test]
    fn test_array_access_gep_checked_and_load() {
        let fun = lower_main(
            r#"[{"name": "a", "typ": {"Array": "Int"}}, {"name": "x", "typ": "Int"}]"#,
            r#"[{"Assign": [{"Id": "x"},
                {"Val": {"ArrayAccess": {"array": {"Val": {"Id": "a"}}, "idx": {"Num": 3}}}}]}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 3, .. },
                Inst::Gep { lhs, src, idx, checked: true },
                Inst::Load { lhs: loaded, src: from },
                Inst::Copy { .. },
            ] if lhs == "_inner0" && src == "a" && idx == "_const_3"
                && loaded == "_tmp1" && from == "_inner0"
        ));
        assert_eq!(fun.locals.get("_tmp1"), Some(&Type::Int));
    }

    #[test]
    fn test_deref_store() {
        let fun = lower_main(
            r#"[{"name": "p", "typ": {"Ptr": "Int"}}]"#,
            r#"[{"Assign": [{"Deref": {"Val": {"Id": "p"}}}, {"Num": 1}]}]"#,
        );
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 1, .. },
                Inst::Store { dst, src },
            ] if dst == "p" && src == "_const_1"
        ));
    }

    #[test]
    fn test_new_single_and_new_array() {
        let fun = lower_main(
            r#"[{"name": "p", "typ": {"Ptr": {"Struct": "S"}}},
                {"name": "a", "typ": {"Array": "Int"}}]"#,
            r#"[
                {"Assign": [{"Id": "p"}, {"NewSingle": {"Struct": "S"}}]},
                {"Assign": [{"Id": "a"}, {"NewArray": ["Int", {"Num": 8}]}]}
            ]"#,
        );
        assert_eq!(
            fun.locals.get("_tmp0"),
            Some(&Type::Ptr(Box::new(Type::Struct("S".to_string()))))
        );
        assert_eq!(
            fun.locals.get("_tmp1"),
            Some(&Type::Array(Box::new(Type::Int)))
        );
        // The count constant is hoisted to the top of the entry block.
        let bb = entry(&fun);
        assert!(matches!(
            &bb.insts[..],
            [
                Inst::Const { value: 8, .. },
                Inst::AllocSingle { lhs, ty: Type::Struct(_) },
                Inst::Copy { .. },
                Inst::AllocArray { lhs: arr, amount, ty: Type::Int },
                Inst::Copy { .. },
            ] if lhs == "_tmp0" && arr == "_tmp1" && amount == "_const_8"
        ));
    }

    #[test]
    fn test_unreachable_if_end_pruned_when_both_branches_return() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}]"#,
            r#"[{"If": {
                "guard": {"Val": {"Id": "x"}},
                "tt": [{"Return": {"Num": 1}}],
                "ff": [{"Return": {"Num": 2}}]
            }}]"#,
        );
        assert!(!fun.body.contains_key("if_end2"));
        assert_eq!(fun.body.len(), 3);
    }

    #[test]
    fn test_statements_after_return_route_to_entry() {
        let fun = lower_main(
            r#"[{"name": "a", "typ": "Int"}]"#,
            r#"[{"Return": {"Num": 1}}, {"Assign": [{"Id": "a"}, {"Num": 2}]}]"#,
        );
        // The dead copy lands in the entry block's instruction list; its
        // terminator is still the return.
        let bb = entry(&fun);
        assert!(matches!(&bb.term, Terminator::Ret(Some(v)) if v == "_const_1"));
        assert!(bb
            .insts
            .iter()
            .any(|i| matches!(i, Inst::Copy { lhs, .. } if lhs == "a")));
    }

    #[test]
    fn test_label_counter_resets_per_function() {
        let source = r#"{
            "structs": [], "externs": [],
            "functions": [
                {"name": "a", "prms": [{"name": "x", "typ": "Int"}], "rettyp": "Int",
                 "locals": [],
                 "stmts": [{"If": {"guard": {"Val": {"Id": "x"}}, "tt": []}}]},
                {"name": "b", "prms": [{"name": "x", "typ": "Int"}], "rettyp": "Int",
                 "locals": [],
                 "stmts": [{"If": {"guard": {"Val": {"Id": "x"}}, "tt": []}}]}
            ]
        }"#;
        let ast = crate::ast::parse_program(source).unwrap();
        let prog = lower_program(&ast).unwrap();
        for name in ["a", "b"] {
            let fun = prog.functions.get(name).unwrap();
            assert!(fun.body.contains_key("if_true0"), "{name} lost its labels");
        }
    }

    #[test]
    fn test_nested_loop_break_targets_innermost() {
        let fun = lower_main(
            r#"[{"name": "x", "typ": "Int"}]"#,
            r#"[{"While": [{"Val": {"Id": "x"}}, [
                {"While": [{"Val": {"Id": "x"}}, ["Break"]]}
            ]]}]"#,
        );
        // Inner loop labels are loop_hdr3/loop_body4/loop_end5.
        assert!(matches!(
            &fun.body.get("loop_body4").unwrap().term,
            Terminator::Jump(l) if l == "loop_end5"
        ));
    }
}
