// Loop lowering: while/else, the four for-iterator forms (seq counted
// loops, compile-time unrolled iterables, inlined generators, and
// refine), plus yield handling for generator inlining.

use pyrite_ast::{Expr, ExprKind, Span, Stmt};
use pyrite_diagnostics::{codes, Category, Diagnostic};

use crate::ir::{BlockId, IntPredicate, IrType, Val};
use crate::linear::{self, LinearMap};
use crate::registry::FunctionKind;
use crate::types::{PcType, PyValue};
use crate::value::ValueRef;

use super::{FunctionLowerer, GenFrame};

impl<'u> FunctionLowerer<'u> {
    pub(crate) fn lower_while(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let header = self.append_block("while.cond");
        let body_block = self.append_block("while.body");
        let exit_join = self.append_block("while.join");
        let end = self.append_block("while.end");

        // for/while-else: a single i1 flag, set on any break edge
        let break_flag = if orelse.is_empty() {
            None
        } else {
            let flag = self.unit.builder.entry_alloca(IrType::Int(1));
            self.unit
                .builder
                .store(Val::const_bool(false), flag.clone());
            Some(flag)
        };

        let entry_states = self.linear_snapshot();

        self.unit.builder.branch(header);
        self.position_at(header);
        let condition = self.lower_expr(test)?;
        let cond = self.to_boolean(&condition)?;
        self.unit.builder.cond_branch(cond, body_block, exit_join);

        self.position_at(body_block);
        self.loop_stack.push((header, exit_join));
        self.break_flag_stack.push(break_flag.clone());
        self.vars.enter_scope();
        let mut result = Ok(());
        for stmt in body {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        let scope_check = self.exit_scope_checked();
        self.break_flag_stack.pop();
        self.loop_stack.pop();
        result?;
        scope_check?;

        // Tokens active at loop entry must still be active at the
        // back-edge.
        let backedge_states = self.linear_snapshot();
        for (name, entry_map) in &entry_states {
            if let Some(back_map) = backedge_states.get(name) {
                linear::check_loop_body(name, entry_map, back_map, &self.unit.file, span)?;
            }
        }

        if !self.unit.builder.is_terminated() {
            self.unit.builder.branch(header);
        }

        self.position_at(exit_join);
        self.finish_loop_else(break_flag, orelse, end)?;
        Ok(())
    }

    /// Shared tail: at the loop join, run the else clause iff no break
    /// edge set the flag, then continue at `end`.
    fn finish_loop_else(
        &mut self,
        break_flag: Option<Val>,
        orelse: &[Stmt],
        end: BlockId,
    ) -> Result<(), Diagnostic> {
        match break_flag {
            None => {
                self.unit.builder.branch(end);
                self.position_at(end);
            }
            Some(flag) => {
                let else_block = self.append_block("loop.else");
                let broke = self.unit.builder.load(IrType::Int(1), flag);
                self.unit.builder.cond_branch(broke, end, else_block);

                self.position_at(else_block);
                self.vars.enter_scope();
                let mut result = Ok(());
                for stmt in orelse {
                    result = self.lower_stmt(stmt);
                    if result.is_err() {
                        break;
                    }
                }
                let scope_check = self.exit_scope_checked();
                result?;
                scope_check?;
                if !self.unit.builder.is_terminated() {
                    self.unit.builder.branch(end);
                }
                self.position_at(end);
            }
        }
        Ok(())
    }

    /// `for x in it:` dispatches over the four iterator forms.
    pub(crate) fn lower_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let ExprKind::Name(var_name) = &target.kind else {
            return Err(self.type_error("for-loop target must be a name".into(), span));
        };

        if let ExprKind::Call { func, args, .. } = &iter.kind {
            if let ExprKind::Name(callee) = &func.kind {
                if callee == "seq" {
                    return self.lower_seq_loop(var_name, args, body, orelse, span);
                }
                if callee == "refine" {
                    return self.lower_refine(var_name, args, body, orelse, span);
                }
                // Invocation of a registered generator instance
                if let Some(mangled) = self.generator_instance(callee) {
                    return self.lower_generator_loop(
                        var_name, &mangled, args, body, orelse, span,
                    );
                }
            }
        }

        // Compile-time constant iterable: unrolled
        let iterable = self.lower_expr(iter)?;
        if let Some(PyValue::Tuple(items)) = iterable.python_value() {
            let items = items.clone();
            return self.lower_unrolled_loop(var_name, &items, body, orelse, span);
        }

        Err(self.type_error(
            "for-loop iterator must be seq(...), refine(...), a generator call, \
             or a compile-time constant iterable"
                .into(),
            span,
        ))
    }

    fn generator_instance(&self, name: &str) -> Option<String> {
        let resolved = self
            .unit
            .import_aliases
            .get(name)
            .cloned()
            .or_else(|| {
                if self.unit.registry.has_function(name) {
                    Some(name.to_string())
                } else {
                    self.unit.registry.instances_of(name).first().cloned()
                }
            })?;
        let info = self.unit.registry.function(&resolved)?;
        (info.kind == FunctionKind::Generator).then_some(resolved)
    }

    /// `for i in seq(stop)` / `seq(start, stop)` / `seq(start, stop,
    /// step)`: a counted loop over i64.
    fn lower_seq_loop(
        &mut self,
        var_name: &str,
        args: &[Expr],
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let i64_ty = PcType::int(64, true);
        let (start, stop, step) = match args {
            [stop] => (None, stop, None),
            [start, stop] => (Some(start), stop, None),
            [start, stop, step] => (Some(start), stop, Some(step)),
            _ => {
                return Err(self.error(
                    Category::Typing,
                    codes::BAD_ARGUMENT_COUNT,
                    "seq() takes 1 to 3 arguments".into(),
                    span,
                ))
            }
        };

        let start_val = match start {
            Some(expr) => {
                let v = self.lower_expr(expr)?;
                self.convert_to(&v, &i64_ty, span)?
            }
            None => Val::const_int(IrType::Int(64), 0),
        };
        let stop_val = {
            let v = self.lower_expr(stop)?;
            self.convert_to(&v, &i64_ty, span)?
        };
        // The step must be a compile-time constant so the comparison
        // direction is known.
        let step_const = match step {
            Some(expr) => {
                let v = self.lower_expr(expr)?;
                v.python_value().and_then(PyValue::as_int).ok_or_else(|| {
                    self.type_error("seq() step must be a constant integer".into(), span)
                })?
            }
            None => 1,
        };
        if step_const == 0 {
            return Err(self.type_error("seq() step must be non-zero".into(), span));
        }

        let slot = self.unit.builder.entry_alloca(IrType::Int(64));
        self.unit.builder.store(start_val, slot.clone());

        let header = self.append_block("for.cond");
        let body_block = self.append_block("for.body");
        let step_block = self.append_block("for.step");
        let exit_join = self.append_block("for.join");
        let end = self.append_block("for.end");

        let break_flag = if orelse.is_empty() {
            None
        } else {
            let flag = self.unit.builder.entry_alloca(IrType::Int(1));
            self.unit
                .builder
                .store(Val::const_bool(false), flag.clone());
            Some(flag)
        };

        let entry_states = self.linear_snapshot();

        self.unit.builder.branch(header);
        self.position_at(header);
        let current = self.unit.builder.load(IrType::Int(64), slot.clone());
        let pred = if step_const > 0 {
            IntPredicate::Slt
        } else {
            IntPredicate::Sgt
        };
        let cond = self.unit.builder.icmp(pred, current.clone(), stop_val);
        self.unit.builder.cond_branch(cond, body_block, exit_join);

        self.position_at(body_block);
        self.vars.enter_scope();
        self.vars.declare(
            var_name,
            ValueRef::address(slot.clone(), i64_ty, span),
            LinearMap::new(),
        );
        // continue advances the induction variable
        self.loop_stack.push((step_block, exit_join));
        self.break_flag_stack.push(break_flag.clone());
        let mut result = Ok(());
        for stmt in body {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        self.break_flag_stack.pop();
        self.loop_stack.pop();
        let scope_check = self.exit_scope_checked();
        result?;
        scope_check?;

        let backedge_states = self.linear_snapshot();
        for (name, entry_map) in &entry_states {
            if let Some(back_map) = backedge_states.get(name) {
                linear::check_loop_body(name, entry_map, back_map, &self.unit.file, span)?;
            }
        }

        if !self.unit.builder.is_terminated() {
            self.unit.builder.branch(step_block);
        }
        self.position_at(step_block);
        let current = self.unit.builder.load(IrType::Int(64), slot.clone());
        let stepped = self.unit.builder.binary(
            crate::ir::BinOp::Add,
            current,
            Val::const_int(IrType::Int(64), step_const),
        );
        self.unit.builder.store(stepped, slot);
        self.unit.builder.branch(header);

        self.position_at(exit_join);
        self.finish_loop_else(break_flag, orelse, end)
    }

    /// Compile-time constant iterable: the body is unrolled, each
    /// iteration inlined with the variable bound to that constant.
    fn lower_unrolled_loop(
        &mut self,
        var_name: &str,
        items: &[PyValue],
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let exit_join = self.append_block("for.join");
        let end = self.append_block("for.end");

        let break_flag = if orelse.is_empty() {
            None
        } else {
            let flag = self.unit.builder.entry_alloca(IrType::Int(1));
            self.unit
                .builder
                .store(Val::const_bool(false), flag.clone());
            Some(flag)
        };

        // One block per unrolled iteration; continue jumps to the next
        // iteration, break to the join.
        let iter_blocks: Vec<BlockId> = (0..items.len())
            .map(|_| self.append_block("for.iter"))
            .collect();

        for (i, item) in items.iter().enumerate() {
            let next = iter_blocks.get(i + 1).copied().unwrap_or(exit_join);
            if !self.unit.builder.is_terminated() {
                self.unit.builder.branch(iter_blocks[i]);
            }
            self.position_at(iter_blocks[i]);

            self.vars.enter_scope();
            self.vars.declare(
                var_name,
                ValueRef::constant(item.clone(), span),
                LinearMap::new(),
            );
            self.loop_stack.push((next, exit_join));
            self.break_flag_stack.push(break_flag.clone());
            let mut result = Ok(());
            for stmt in body {
                result = self.lower_stmt(stmt);
                if result.is_err() {
                    break;
                }
            }
            self.break_flag_stack.pop();
            self.loop_stack.pop();
            let scope_check = self.exit_scope_checked();
            result?;
            scope_check?;

            if !self.unit.builder.is_terminated() {
                self.unit.builder.branch(next);
            }
        }

        if items.is_empty() && !self.unit.builder.is_terminated() {
            self.unit.builder.branch(exit_join);
        }

        self.position_at(exit_join);
        self.finish_loop_else(break_flag, orelse, end)
    }

    /// `for x in gen(args)`: inline the generator body into the caller.
    /// Iteration state is an integer tag dispatched in the loop header;
    /// each `yield` stores the current value and its resume tag. No heap
    /// frames, no scheduler.
    fn lower_generator_loop(
        &mut self,
        var_name: &str,
        mangled: &str,
        args: &[Expr],
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let Some(info) = self.unit.registry.function(mangled).cloned() else {
            return Err(self.type_error(format!("unknown generator `{}`", mangled), span));
        };
        let Some(source) = info.source.clone() else {
            return Err(self.type_error(
                format!("generator `{}` has no body", info.unmangled),
                span,
            ));
        };

        // The yielded value type: the generator's annotated return type.
        let value_ty = if info.return_type.is_void() {
            PcType::int(64, true)
        } else {
            info.return_type.clone()
        };
        let value_llvm = self.lower_ty(&value_ty);
        let value_slot = self.unit.builder.entry_alloca(value_llvm);
        let state_ptr = self.unit.builder.entry_alloca(IrType::Int(32));
        self.unit
            .builder
            .store(Val::const_int(IrType::Int(32), 0), state_ptr.clone());

        let header = self.append_block("gen.header");
        let gen_entry = self.append_block("gen.entry");
        let body_block = self.append_block("gen.fbody");
        let done_block = self.append_block("gen.done");
        let end = self.append_block("gen.end");

        // Bind generator parameters as caller locals (evaluated once,
        // before the first dispatch).
        self.vars.enter_scope();
        if args.len() != info.param_types.len() {
            self.vars.exit_scope();
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                format!(
                    "`{}` takes {} argument(s), {} given",
                    info.unmangled,
                    info.param_types.len(),
                    args.len()
                ),
                span,
            ));
        }
        for ((name, param_ty), arg_expr) in info
            .param_names
            .iter()
            .zip(info.param_types.iter())
            .zip(args.iter())
        {
            let arg = self.lower_expr(arg_expr)?;
            let converted = self.convert_to(&arg, param_ty, span)?;
            self.consume_linear_origin(&arg, span)?;
            let llvm_ty = self.lower_ty(param_ty);
            let slot = self.unit.builder.entry_alloca(llvm_ty);
            self.unit.builder.store(converted, slot.clone());
            self.vars.declare(
                name,
                ValueRef::address(slot, param_ty.clone(), span),
                LinearMap::new(),
            );
        }
        self.unit.builder.branch(header);

        // Emit the generator body; yields populate the resume table.
        self.position_at(gen_entry);
        let seq = self.next_frame_seq();
        self.gen_frames.push(GenFrame {
            value_slot: value_slot.clone(),
            value_ty: value_ty.clone(),
            state_ptr: state_ptr.clone(),
            body_block,
            done_block,
            resume_blocks: Vec::new(),
            seq,
        });
        let mut result = Ok(());
        for stmt in &source.body {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() && !self.unit.builder.is_terminated() {
            self.unit.builder.branch(done_block);
        }
        let frame = self.gen_frames.pop();
        let scope_check = self.exit_scope_checked();
        result?;
        scope_check?;
        let resume_blocks = frame.map(|f| f.resume_blocks).unwrap_or_default();

        // Caller's loop body: runs once per yielded value.
        self.position_at(body_block);
        self.vars.enter_scope();
        self.vars.declare(
            var_name,
            ValueRef::address(value_slot, value_ty, span),
            LinearMap::new(),
        );
        // break/continue here refer to the caller's loop; break jumps
        // straight to `end`, which skips the else clause without needing
        // a flag.
        self.loop_stack.push((header, end));
        self.break_flag_stack.push(None);
        let mut result = Ok(());
        for stmt in body {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        self.break_flag_stack.pop();
        self.loop_stack.pop();
        let scope_check = self.exit_scope_checked();
        result?;
        scope_check?;
        if !self.unit.builder.is_terminated() {
            self.unit.builder.branch(header);
        }

        // Loop header: dispatch on the state tag. State 0 enters the
        // generator; state k resumes after yield k.
        self.position_at(header);
        let state = self.unit.builder.load(IrType::Int(32), state_ptr);
        let mut cases = vec![(0i128, gen_entry)];
        for (i, resume) in resume_blocks.iter().enumerate() {
            cases.push(((i + 1) as i128, *resume));
        }
        self.unit.builder.switch(state, done_block, cases);

        // Normal exhaustion: the else clause runs (an empty generator
        // reaches here without ever entering the loop body). A break
        // never lands here, so the clause is unconditional.
        self.position_at(done_block);
        if orelse.is_empty() {
            self.unit.builder.branch(end);
        } else {
            self.vars.enter_scope();
            let mut result = Ok(());
            for stmt in orelse {
                result = self.lower_stmt(stmt);
                if result.is_err() {
                    break;
                }
            }
            let scope_check = self.exit_scope_checked();
            result?;
            scope_check?;
            if !self.unit.builder.is_terminated() {
                self.unit.builder.branch(end);
            }
        }

        self.position_at(end);
        Ok(())
    }

    /// `yield e` inside a generator body being inlined.
    pub(crate) fn lower_yield(
        &mut self,
        value: Option<&Expr>,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let Some(frame_info) = self.gen_frames.last().map(|f| {
            (
                f.value_slot.clone(),
                f.value_ty.clone(),
                f.state_ptr.clone(),
                f.body_block,
            )
        }) else {
            return Err(self.error(
                Category::ControlFlow,
                codes::SYNTAX_ERROR,
                "`yield` outside a generator body".into(),
                span,
            ));
        };
        let (value_slot, value_ty, state_ptr, body_block) = frame_info;

        if let Some(expr) = value {
            let lowered = self.lower_expr(expr)?;
            let converted = self.convert_to(&lowered, &value_ty, span)?;
            self.unit.builder.store(converted, value_slot);
        }

        let resume = self.append_block("gen.resume");
        let tag = self
            .gen_frames
            .last()
            .map(|f| f.resume_blocks.len() as i128 + 1)
            .unwrap_or(1);
        self.unit
            .builder
            .store(Val::const_int(IrType::Int(32), tag), state_ptr);
        self.unit.builder.branch(body_block);

        if let Some(frame) = self.gen_frames.last_mut() {
            frame.resume_blocks.push(resume);
        }
        self.position_at(resume);
        Ok(())
    }

    /// `for x in refine(value, pred)`: evaluate the predicate; on true
    /// bind a refined-typed value and run the body once; on false run the
    /// else branch.
    fn lower_refine(
        &mut self,
        var_name: &str,
        args: &[Expr],
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let [value_expr, pred_expr] = args else {
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                "refine(value, predicate) takes two arguments".into(),
                span,
            ));
        };

        let value = self.lower_expr(value_expr)?;
        let pred = self.lower_expr(pred_expr)?;
        let pred_name = self.predicate_name(&pred, span)?;

        let verdict = self.call_function_instance(&pred_name, vec![value.clone()], span)?;
        let cond = self.to_boolean(&verdict)?;

        let then_block = self.append_block("refine.ok");
        let merge = self.append_block("refine.end");
        let else_block = if orelse.is_empty() {
            merge
        } else {
            self.append_block("refine.else")
        };
        self.unit.builder.cond_branch(cond, then_block, else_block);

        self.position_at(then_block);
        self.vars.enter_scope();
        let base_ty = value.ty.unqualified().clone();
        let refined_ty = PcType::Refined {
            base: Box::new(base_ty.clone()),
            pred: pred_name,
        };
        let llvm_ty = self.lower_ty(&base_ty);
        let slot = self.unit.builder.entry_alloca(llvm_ty);
        let materialized = self.materialize(&value)?;
        self.unit.builder.store(materialized, slot.clone());
        self.vars.declare(
            var_name,
            ValueRef::address(slot, refined_ty, span),
            LinearMap::new(),
        );
        self.loop_stack.push((merge, merge));
        self.break_flag_stack.push(None);
        let mut result = Ok(());
        for stmt in body {
            result = self.lower_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        self.break_flag_stack.pop();
        self.loop_stack.pop();
        let scope_check = self.exit_scope_checked();
        result?;
        scope_check?;
        if !self.unit.builder.is_terminated() {
            self.unit.builder.branch(merge);
        }

        if !orelse.is_empty() {
            self.position_at(else_block);
            self.vars.enter_scope();
            let mut result = Ok(());
            for stmt in orelse {
                result = self.lower_stmt(stmt);
                if result.is_err() {
                    break;
                }
            }
            let scope_check = self.exit_scope_checked();
            result?;
            scope_check?;
            if !self.unit.builder.is_terminated() {
                self.unit.builder.branch(merge);
            }
        }

        self.position_at(merge);
        Ok(())
    }
}
