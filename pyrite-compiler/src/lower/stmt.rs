// Statement lowering: declarations, assignment, if with path-based
// linear-state reconciliation, return, break/continue, effect contexts.

use pyrite_ast::{Expr, ExprKind, Span, Stmt, StmtKind};
use pyrite_diagnostics::{codes, Category, Diagnostic};

use crate::effects::EffectFrame;
use crate::ir::{Constant, Val};
use crate::linear::{self, LinearMap};
use crate::types::{PcType, PyValue};
use crate::value::{ValueKind, ValueRef};

use super::FunctionLowerer;

impl<'u> FunctionLowerer<'u> {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        // A terminated block is never appended to; code after return in
        // the same block is unreachable and silently skipped.
        if self.unit.builder.is_terminated() {
            return Ok(());
        }

        match &stmt.kind {
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => self.lower_ann_assign(target, annotation, value.as_ref(), stmt.span),
            StmtKind::Assign { target, value } => self.lower_assign(target, value, stmt.span),
            StmtKind::AugAssign { target, op, value } => {
                let combined = Expr::new(
                    ExprKind::BinOp {
                        left: Box::new(target.clone()),
                        op: *op,
                        right: Box::new(value.clone()),
                    },
                    stmt.span,
                );
                self.lower_assign(target, &combined, stmt.span)
            }
            StmtKind::Expr(expr) => self.lower_expr_stmt(expr),
            StmtKind::If { test, body, orelse } => self.lower_if(test, body, orelse, stmt.span),
            StmtKind::While { test, body, orelse } => {
                self.lower_while(test, body, orelse, stmt.span)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.lower_for(target, iter, body, orelse, stmt.span),
            StmtKind::Match { subject, cases } => self.lower_match(subject, cases, stmt.span),
            StmtKind::Return(value) => self.lower_return(value.as_ref(), stmt.span),
            StmtKind::Break => self.lower_break(stmt.span),
            StmtKind::Continue => self.lower_continue(stmt.span),
            StmtKind::Pass => Ok(()),
            StmtKind::With { items, body } => self.lower_with(items, body),
            StmtKind::FuncDef(_) | StmtKind::ClassDef(_) => Ok(()),
            StmtKind::ImportFrom { .. } | StmtKind::Import { .. } => Ok(()),
        }
    }

    /// `x: T = e`: declaration with annotation. `static[T]` allocates a
    /// module global with internal linkage and a zero initializer;
    /// `const[T]` forbids later reassignment.
    fn lower_ann_assign(
        &mut self,
        target: &Expr,
        annotation: &Expr,
        value: Option<&Expr>,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let ExprKind::Name(name) = &target.kind else {
            return Err(self.type_error(
                "annotated declaration target must be a name".into(),
                span,
            ));
        };
        let ty = self.resolver().resolve(annotation, Some(&self.vars))?;

        if ty.is_static() {
            return self.declare_static(name, &ty, value, span);
        }

        // pyconst bindings occupy no storage
        if let PcType::PyConst(const_value) = ty.unqualified() {
            self.vars.declare(
                name,
                ValueRef {
                    kind: ValueKind::PyConst(const_value.clone()),
                    ty: ty.clone(),
                    span,
                    origin: None,
                },
                LinearMap::new(),
            );
            return Ok(());
        }

        let llvm_ty = self.lower_ty(&ty);
        let slot = self.unit.builder.entry_alloca(llvm_ty);

        let mut linear_map = LinearMap::new();
        if let Some(value_expr) = value {
            let value = self.lower_expr(value_expr)?;
            let converted = self.convert_to(&value, &ty, span)?;
            self.consume_linear_origin(&value, span)?;
            self.unit.builder.store(converted, slot.clone());
            if ty.is_linear(&self.unit.registry) {
                // Assignment transfers the token to the new binding.
                linear_map = linear::fresh(span);
            }
        }
        // A bare declaration of a linear type holds no token until the
        // first assignment.

        self.vars
            .declare(name, ValueRef::address(slot, ty, span), linear_map);
        Ok(())
    }

    /// `static[T]` module-global: zero (or constant) initializer,
    /// internal linkage; the binding flips to refer to the global.
    fn declare_static(
        &mut self,
        name: &str,
        ty: &PcType,
        value: Option<&Expr>,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let inner = match ty {
            PcType::Static(boxed) => (**boxed).clone(),
            _ => ty.unqualified().clone(),
        };
        let llvm_ty = self.lower_ty(&inner);

        let init = match value {
            Some(expr) => {
                let lowered = self.lower_expr(expr)?;
                match lowered.python_value() {
                    Some(PyValue::Int(i)) => {
                        let (width, signed) = inner.int_info().unwrap_or((64, true));
                        Constant::Int(
                            llvm_ty.clone(),
                            super::convert::wrap_const(*i, width, signed),
                        )
                    }
                    Some(PyValue::Float(f)) => Constant::Float(llvm_ty.clone(), *f),
                    _ => {
                        return Err(self.type_error(
                            "static initializer must be a compile-time constant".into(),
                            span,
                        ))
                    }
                }
            }
            None => {
                // zero bit pattern of the type
                if inner.is_integer() {
                    Constant::Int(llvm_ty.clone(), 0)
                } else if inner.is_float() {
                    Constant::Float(llvm_ty.clone(), 0.0)
                } else {
                    Constant::Zero(llvm_ty.clone())
                }
            }
        };

        let global_name = format!("{}.{}", self.info.mangled, name);
        self.unit.builder.module.add_global(crate::ir::Global {
            name: global_name.clone(),
            ty: llvm_ty.clone(),
            init,
            internal: true,
        });
        let ptr = Val::Const(Constant::Global(global_name, llvm_ty.ptr_to()));
        self.vars
            .declare(name, ValueRef::address(ptr, inner, span), LinearMap::new());
        Ok(())
    }

    /// `x = e` without annotation: the slot's existing type drives the
    /// conversion. Assigning to `const[T]` after declaration is an error.
    fn lower_assign(&mut self, target: &Expr, value: &Expr, span: Span) -> Result<(), Diagnostic> {
        if let ExprKind::Name(name) = &target.kind {
            let Some(var) = self.vars.lookup(name) else {
                return Err(self.error(
                    Category::Typing,
                    codes::UNDEFINED_NAME,
                    format!("cannot assign to undeclared variable `{}`; annotate it first", name),
                    span,
                ));
            };
            let var_ty = var.value.ty.clone();
            if var_ty.is_const() {
                return Err(self.error(
                    Category::Typing,
                    codes::ASSIGN_TO_CONST,
                    format!("cannot assign to `{}`: declared const", name),
                    span,
                ));
            }
            let ValueKind::Address(slot) = var.value.kind.clone() else {
                return Err(self.type_error(format!("`{}` is not assignable", name), span));
            };

            let lowered = self.lower_expr(value)?;
            let converted = self.convert_to(&lowered, &var_ty, span)?;
            self.consume_linear_origin(&lowered, span)?;
            self.unit.builder.store(converted, slot);

            if var_ty.is_linear(&self.unit.registry) {
                if let Some(var) = self.vars.lookup_mut(name) {
                    var.linear = linear::fresh(span);
                }
            }
            return Ok(());
        }

        // Attribute / subscript target
        let (ptr, slot_ty) = self.lower_lvalue(target)?;
        if slot_ty.is_const() {
            return Err(self.error(
                Category::Typing,
                codes::ASSIGN_TO_CONST,
                "cannot assign through a const location".into(),
                span,
            ));
        }
        let lowered = self.lower_expr(value)?;
        let converted = self.convert_to(&lowered, &slot_ty, span)?;
        self.consume_linear_origin(&lowered, span)?;
        self.unit.builder.store(converted, ptr);
        Ok(())
    }

    /// Expression statement: evaluate and check for dangling linear
    /// rvalues (a linear value must be bound, passed, or returned).
    fn lower_expr_stmt(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        // `yield` statements route to the generator frame
        if let ExprKind::Yield(value) = &expr.kind {
            return self.lower_yield(value.as_deref(), expr.span);
        }

        let result = self.lower_expr(expr)?;
        if result.origin.is_none()
            && matches!(result.kind, ValueKind::RValue(_))
            && result.ty.is_linear(&self.unit.registry)
        {
            return Err(self.error(
                Category::Linear,
                codes::LINEAR_DANGLING_EXPR,
                "linear value is dropped without being consumed".into(),
                expr.span,
            )
            .with_help(
                "assign it to a variable, pass it to a function, or return it".to_string(),
            ));
        }
        Ok(())
    }

    /// If statement with path-based linear reconciliation. Compile-time
    /// constant conditions evaluate exactly one arm.
    fn lower_if(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let condition = self.lower_expr(test)?;

        // Python-constant condition: compile-time selection
        if let Some(value) = condition.python_value() {
            let arm = if value.truthy() { body } else { orelse };
            self.vars.enter_scope();
            let mut result = Ok(());
            for stmt in arm {
                result = self.lower_stmt(stmt);
                if result.is_err() {
                    break;
                }
            }
            let scope_check = self.exit_scope_checked();
            result?;
            return scope_check;
        }

        let cond = self.to_boolean(&condition)?;
        let before = self.linear_snapshot();

        let then_block = self.append_block("then");
        let merge_block = self.append_block("merge");
        let else_block = if orelse.is_empty() {
            merge_block
        } else {
            self.append_block("else")
        };
        self.unit.builder.cond_branch(cond, then_block, else_block);

        // then arm
        self.position_at(then_block);
        self.vars.enter_scope();
        let mut arm_result = Ok(());
        for stmt in body {
            arm_result = self.lower_stmt(stmt);
            if arm_result.is_err() {
                break;
            }
        }
        let scope_check = self.exit_scope_checked();
        arm_result?;
        scope_check?;
        let then_states = self.linear_snapshot();
        let then_terminated = self.unit.builder.is_terminated();
        if !then_terminated {
            self.unit.builder.branch(merge_block);
        }

        if orelse.is_empty() {
            // Simple if: no path may flip from active to consumed.
            for (name, after) in &then_states {
                if let Some(before_map) = before.get(name) {
                    linear::check_no_else_consumption(
                        name,
                        before_map,
                        after,
                        &self.unit.file,
                        span,
                    )?;
                }
            }
            self.position_at(merge_block);
            return Ok(());
        }

        // else arm starts from the pre-if linear states
        self.restore_linear_snapshot(&before);
        self.position_at(else_block);
        self.vars.enter_scope();
        let mut arm_result = Ok(());
        for stmt in orelse {
            arm_result = self.lower_stmt(stmt);
            if arm_result.is_err() {
                break;
            }
        }
        let scope_check = self.exit_scope_checked();
        arm_result?;
        scope_check?;
        let else_states = self.linear_snapshot();
        let else_terminated = self.unit.builder.is_terminated();
        let else_end = orelse.last().map(|s| s.span).unwrap_or(span);
        if !else_terminated {
            self.unit.builder.branch(merge_block);
        }

        // Reconcile the two captures path-by-path. A terminated arm's
        // states are vacuous (control never reaches the merge from it).
        let names: Vec<String> = before.keys().cloned().collect();
        for name in names {
            let then_map = then_states.get(&name).cloned().unwrap_or_default();
            let else_map = else_states.get(&name).cloned().unwrap_or_default();
            let merged = if then_terminated && !else_terminated {
                else_map
            } else if else_terminated && !then_terminated {
                then_map
            } else {
                linear::reconcile_branches(
                    &name,
                    &then_map,
                    &else_map,
                    &self.unit.file,
                    else_end,
                )?
            };
            if let Some(var) = self.vars.lookup_mut(&name) {
                var.linear = merged;
            }
        }

        self.position_at(merge_block);
        Ok(())
    }

    /// Return: convert to the declared type, consume linear tokens in the
    /// returned value, and let the builder handle ABI (coerce or sret).
    /// Inside inline expansion a return becomes store + branch; inside a
    /// generator body it ends the iteration.
    fn lower_return(&mut self, value: Option<&Expr>, span: Span) -> Result<(), Diagnostic> {
        // Innermost expansion frame wins.
        let gen_seq = self.gen_frames.last().map(|f| f.seq);
        let inline_seq = self.inline_frames.last().map(|f| f.seq);

        if let (Some(gs), is) = (gen_seq, inline_seq) {
            if is.map(|i| gs > i).unwrap_or(true) {
                // return ends the generator: jump to exhaustion
                let done = self.gen_frames.last().map(|f| f.done_block);
                if let Some(done) = done {
                    self.unit.builder.branch(done);
                }
                return Ok(());
            }
        }

        if inline_seq.is_some() {
            let (exit_block, result_slot, result_ty) = match self.inline_frames.last() {
                Some(frame) => (
                    frame.exit_block,
                    frame.result_slot.clone(),
                    frame.result_ty.clone(),
                ),
                None => return Ok(()),
            };
            if let Some(expr) = value {
                let lowered = self.lower_expr(expr)?;
                let converted = self.convert_to(&lowered, &result_ty, span)?;
                self.consume_linear_origin(&lowered, span)?;
                if let Some(slot) = result_slot {
                    self.unit.builder.store(converted, slot);
                }
            }
            self.unit.builder.branch(exit_block);
            return Ok(());
        }

        let return_type = self.info.return_type.clone();
        match value {
            Some(expr) => {
                let lowered = self.lower_expr(expr)?;
                // Active linear sub-paths in the returned value flow out
                // of the function.
                self.consume_linear_origin(&lowered, span)?;
                if return_type.is_void() {
                    self.unit.builder.ret_void();
                } else {
                    let converted = self.convert_to(&lowered, &return_type, span)?;
                    self.unit.builder.ret(converted);
                }
            }
            None => {
                self.unit.builder.ret_void();
            }
        }
        Ok(())
    }

    fn lower_break(&mut self, span: Span) -> Result<(), Diagnostic> {
        let Some(&(_, break_block)) = self.loop_stack.last() else {
            return Err(self.error(
                Category::ControlFlow,
                codes::BREAK_OUTSIDE_LOOP,
                "`break` outside loop".into(),
                span,
            ));
        };
        // for/while-else: any break edge sets the flag
        if let Some(Some(flag)) = self.break_flag_stack.last() {
            self.unit
                .builder
                .store(Val::const_bool(true), flag.clone());
        }
        self.unit.builder.branch(break_block);
        Ok(())
    }

    fn lower_continue(&mut self, span: Span) -> Result<(), Diagnostic> {
        let Some(&(continue_block, _)) = self.loop_stack.last() else {
            return Err(self.error(
                Category::ControlFlow,
                codes::CONTINUE_OUTSIDE_LOOP,
                "`continue` outside loop".into(),
                span,
            ));
        };
        self.unit.builder.branch(continue_block);
        Ok(())
    }

    /// `with effect(...)` inside a function body pushes override frames
    /// around the nested statements, popping on the way out even when
    /// lowering fails.
    fn lower_with(
        &mut self,
        items: &[pyrite_ast::WithItem],
        body: &[Stmt],
    ) -> Result<(), Diagnostic> {
        let mut pushed = 0usize;
        let mut result = Ok(());

        for item in items {
            if let ExprKind::Call { func, keywords, .. } = &item.context.kind {
                if func.dotted_path().as_deref() == Some("effect") {
                    let mut frame = EffectFrame::default();
                    for kw in keywords {
                        if kw.name == "suffix" {
                            if let ExprKind::Str(s) = &kw.value.kind {
                                frame.suffix = s.clone();
                            }
                        } else if let Some(impl_name) = kw.value.dotted_path() {
                            frame.overrides.insert(kw.name.clone(), impl_name);
                        }
                    }
                    match self.unit.effects.push_context(frame) {
                        Ok(()) => pushed += 1,
                        Err(mut diag) => {
                            diag.span = self.dspan(item.context.span);
                            result = Err(diag);
                            break;
                        }
                    }
                }
            }
        }

        if result.is_ok() {
            for stmt in body {
                result = self.lower_stmt(stmt);
                if result.is_err() {
                    break;
                }
            }
        }

        for _ in 0..pushed {
            self.unit.effects.pop_context();
        }
        result
    }
}
