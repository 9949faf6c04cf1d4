// Expression lowering: literals, names, operators, attribute access,
// subscripts. Every expression lowers to a ValueRef.

use pyrite_ast::{BinOpKind, BoolOpKind, CmpOpKind, Expr, ExprKind, Span, UnaryOpKind};
use pyrite_diagnostics::{codes, Category, Diagnostic};

use crate::ir::{BinOp, Constant, FloatPredicate, IntPredicate, IrType, Val};
use crate::registry::AggregateKind;
use crate::types::{builtin_scalar, PcType, PyValue};
use crate::value::{CallableRef, ValueKind, ValueRef};

use super::FunctionLowerer;

/// Names of compiler builtins callable in expression position
const BUILTIN_CALLABLES: &[&str] = &[
    "sizeof", "seq", "refine", "assume", "getptr", "char", "typeof",
];

impl<'u> FunctionLowerer<'u> {
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<ValueRef, Diagnostic> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(ValueRef::constant(PyValue::Int(*v), expr.span)),
            ExprKind::Float(v) => Ok(ValueRef::constant(PyValue::Float(*v), expr.span)),
            ExprKind::Str(s) => Ok(ValueRef::constant(PyValue::Str(s.clone()), expr.span)),
            ExprKind::Bool(b) => Ok(ValueRef::constant(PyValue::Bool(*b), expr.span)),
            ExprKind::NoneLit => Ok(ValueRef::constant(PyValue::None, expr.span)),
            ExprKind::Name(name) => self.lookup_name(name, expr.span),
            ExprKind::UnaryOp { op, operand } => self.lower_unary(*op, operand, expr.span),
            ExprKind::BinOp { left, op, right } => self.lower_binop(left, *op, right, expr.span),
            ExprKind::BoolOp { op, values } => self.lower_boolop(*op, values, expr.span),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.lower_compare(left, ops, comparators, expr.span),
            ExprKind::Call { .. } => self.lower_call(expr),
            ExprKind::Attribute { value, attr } => self.lower_attribute(value, attr, expr.span),
            ExprKind::Subscript { value, index } => self.lower_subscript(value, index, expr.span),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let mut values = Vec::new();
                for item in items {
                    let lowered = self.lower_expr(item)?;
                    match lowered.python_value() {
                        Some(v) => values.push(v.clone()),
                        None => {
                            return Err(self.type_error(
                                "tuple and list literals must be compile-time constants here"
                                    .into(),
                                expr.span,
                            ))
                        }
                    }
                }
                Ok(ValueRef::constant(PyValue::Tuple(values), expr.span))
            }
            ExprKind::Starred(_) => Err(self.type_error(
                "starred unpacking is only valid in call arguments".into(),
                expr.span,
            )),
            ExprKind::Yield(_) => Err(self.error(
                Category::ControlFlow,
                codes::SYNTAX_ERROR,
                "yield is only valid as a statement in a generator".into(),
                expr.span,
            )),
            ExprKind::Slice { .. } => Err(self.type_error(
                "slice syntax is only valid inside type annotations".into(),
                expr.span,
            )),
        }
    }

    /// Resolve a bare name: variables, import aliases, function
    /// instances, aggregates, builtin types, builtin callables.
    pub(crate) fn lookup_name(&mut self, name: &str, span: Span) -> Result<ValueRef, Diagnostic> {
        if let Some(var) = self.vars.lookup(name) {
            return Ok(ValueRef {
                kind: var.value.kind.clone(),
                ty: var.value.ty.clone(),
                span,
                origin: Some((name.to_string(), vec![])),
            });
        }

        if let Some(target) = self.unit.import_aliases.get(name) {
            return Ok(ValueRef::callable(CallableRef::Function(target.clone()), span));
        }

        if self.unit.registry.has_function(name) {
            return Ok(ValueRef::callable(
                CallableRef::Function(name.to_string()),
                span,
            ));
        }
        if !self.unit.registry.instances_of(name).is_empty() {
            return Ok(ValueRef::callable(
                CallableRef::Unresolved(name.to_string()),
                span,
            ));
        }

        if self.unit.registry.has_aggregate(name) {
            return Ok(ValueRef::type_class(PcType::Named(name.to_string()), span));
        }

        if let Some(ty) = builtin_scalar(name) {
            return Ok(ValueRef::type_class(ty, span));
        }
        if matches!(name, "ptr" | "array" | "struct" | "union" | "func" | "const" | "volatile"
            | "static" | "refined" | "pyconst")
        {
            // Bare parameterized type heads appear as subscript bases;
            // resolve through the annotation path at the subscript.
            return Ok(ValueRef::callable(CallableRef::Builtin(name.to_string()), span));
        }

        if BUILTIN_CALLABLES.contains(&name) {
            return Ok(ValueRef::callable(CallableRef::Builtin(name.to_string()), span));
        }

        let mut candidates: Vec<String> = self.vars.names();
        candidates.extend(self.unit.registry.function_names().map(|s| s.to_string()));
        candidates.extend(self.unit.registry.aggregate_names().map(|s| s.to_string()));
        let refs: Vec<&str> = candidates.iter().map(|s| s.as_str()).collect();
        let mut diag = self.error(
            Category::Typing,
            codes::UNDEFINED_NAME,
            format!("cannot find `{}` in this scope", name),
            span,
        );
        if let Some(best) = pyrite_diagnostics::closest_matches(name, refs, 1).first() {
            diag = diag.with_help(format!("did you mean `{}`?", best));
        }
        Err(diag)
    }

    fn lower_unary(
        &mut self,
        op: UnaryOpKind,
        operand: &Expr,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let value = self.lower_expr(operand)?;

        // Constant folding
        if let Some(pv) = value.python_value() {
            let folded = match (op, pv) {
                (UnaryOpKind::Neg, PyValue::Int(i)) => Some(PyValue::Int(-i)),
                (UnaryOpKind::Neg, PyValue::Float(f)) => Some(PyValue::Float(-f)),
                (UnaryOpKind::Pos, v) => Some(v.clone()),
                (UnaryOpKind::Not, v) => Some(PyValue::Bool(!v.truthy())),
                (UnaryOpKind::BitNot, PyValue::Int(i)) => Some(PyValue::Int(!i)),
                _ => None,
            };
            if let Some(folded) = folded {
                return Ok(ValueRef::constant(folded, span));
            }
        }

        match op {
            UnaryOpKind::Pos => Ok(value),
            UnaryOpKind::Not => {
                let cond = self.to_boolean(&value)?;
                let negated = self.unit.builder.binary(
                    BinOp::Xor,
                    cond,
                    Val::const_bool(true),
                );
                Ok(ValueRef::rvalue(negated, PcType::Bool, span))
            }
            UnaryOpKind::Neg => {
                let ty = value.ty.unqualified().clone();
                let val = self.materialize(&value)?;
                let result = if ty.is_float() {
                    let zero = Val::Const(Constant::Float(val.ty(), 0.0));
                    self.unit.builder.binary(BinOp::FSub, zero, val)
                } else {
                    let zero = Val::const_int(val.ty(), 0);
                    self.unit.builder.binary(BinOp::Sub, zero, val)
                };
                Ok(ValueRef::rvalue(result, ty, span))
            }
            UnaryOpKind::BitNot => {
                let ty = value.ty.unqualified().clone();
                let val = self.materialize(&value)?;
                let ones = Val::const_int(val.ty(), -1);
                let result = self.unit.builder.binary(BinOp::Xor, val, ones);
                Ok(ValueRef::rvalue(result, ty, span))
            }
        }
    }

    fn lower_binop(
        &mut self,
        left: &Expr,
        op: BinOpKind,
        right: &Expr,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let lhs = self.lower_expr(left)?;
        let rhs = self.lower_expr(right)?;

        // Any expression whose operands are all python constants is
        // evaluated at lowering time.
        if let (Some(l), Some(r)) = (lhs.python_value(), rhs.python_value()) {
            if let Some(folded) = fold_binop(op, l, r) {
                return Ok(ValueRef::constant(folded, span));
            }
        }

        if op == BinOpKind::Pow {
            return self.lower_pow(&lhs, &rhs, span);
        }

        let (lv, rv, ty) = self.unify_binary(&lhs, &rhs, span)?;
        let is_float = ty.is_float();
        let signed = ty.is_signed();

        let ir_op = match op {
            BinOpKind::Add => {
                if is_float {
                    BinOp::FAdd
                } else {
                    BinOp::Add
                }
            }
            BinOpKind::Sub => {
                if is_float {
                    BinOp::FSub
                } else {
                    BinOp::Sub
                }
            }
            BinOpKind::Mul => {
                if is_float {
                    BinOp::FMul
                } else {
                    BinOp::Mul
                }
            }
            BinOpKind::Div | BinOpKind::FloorDiv => {
                if is_float {
                    BinOp::FDiv
                } else if signed {
                    BinOp::SDiv
                } else {
                    BinOp::UDiv
                }
            }
            BinOpKind::Mod => {
                if is_float {
                    BinOp::FRem
                } else if signed {
                    BinOp::SRem
                } else {
                    BinOp::URem
                }
            }
            BinOpKind::BitAnd => BinOp::And,
            BinOpKind::BitOr => BinOp::Or,
            BinOpKind::BitXor => BinOp::Xor,
            BinOpKind::Shl => BinOp::Shl,
            BinOpKind::Shr => {
                if signed {
                    BinOp::AShr
                } else {
                    BinOp::LShr
                }
            }
            BinOpKind::Pow => unreachable!("handled above"),
        };

        let result = self.unit.builder.binary(ir_op, lv, rv);
        Ok(ValueRef::rvalue(result, ty, span))
    }

    /// Integer power with a constant non-negative exponent unrolls to
    /// repeated multiplication; anything else is rejected.
    fn lower_pow(
        &mut self,
        lhs: &ValueRef,
        rhs: &ValueRef,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let Some(exp) = rhs.python_value().and_then(PyValue::as_int) else {
            return Err(self.type_error(
                "`**` requires a compile-time constant exponent".into(),
                span,
            ));
        };
        if exp < 0 {
            return Err(self.type_error("`**` exponent must be non-negative".into(), span));
        }
        let ty = lhs.ty.unqualified().clone();
        let base = self.materialize(lhs)?;
        let mut result = Val::const_int(base.ty(), 1);
        for _ in 0..exp {
            result = self.unit.builder.binary(BinOp::Mul, result, base.clone());
        }
        Ok(ValueRef::rvalue(result, ty, span))
    }

    fn lower_boolop(
        &mut self,
        op: BoolOpKind,
        values: &[Expr],
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        // Short-circuit evaluation through a result slot
        let slot = self.unit.builder.entry_alloca(IrType::Int(1));
        let done = self.append_block("bool.done");

        for (i, value_expr) in values.iter().enumerate() {
            let value = self.lower_expr(value_expr)?;
            let cond = self.to_boolean(&value)?;
            self.unit.builder.store(cond.clone(), slot.clone());
            if i + 1 == values.len() {
                self.unit.builder.branch(done);
            } else {
                let next = self.append_block("bool.next");
                match op {
                    // and: keep evaluating while true
                    BoolOpKind::And => self.unit.builder.cond_branch(cond, next, done),
                    // or: keep evaluating while false
                    BoolOpKind::Or => self.unit.builder.cond_branch(cond, done, next),
                }
                self.position_at(next);
            }
        }

        self.position_at(done);
        let result = self.unit.builder.load(IrType::Int(1), slot);
        Ok(ValueRef::rvalue(result, PcType::Bool, span))
    }

    /// Chained comparisons: every operand is evaluated exactly once, the
    /// pairwise results are AND-ed.
    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOpKind],
        comparators: &[Expr],
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let mut operands = vec![self.lower_expr(left)?];
        for comparator in comparators {
            operands.push(self.lower_expr(comparator)?);
        }

        // Full constant chains fold
        if operands.iter().all(|o| o.python_value().is_some()) {
            let mut result = true;
            for (i, op) in ops.iter().enumerate() {
                let l = operands[i].python_value().cloned().unwrap_or(PyValue::None);
                let r = operands[i + 1]
                    .python_value()
                    .cloned()
                    .unwrap_or(PyValue::None);
                result &= fold_compare(*op, &l, &r).ok_or_else(|| {
                    self.type_error("cannot compare these constants".into(), span)
                })?;
            }
            return Ok(ValueRef::constant(PyValue::Bool(result), span));
        }

        let mut combined: Option<Val> = None;
        for (i, op) in ops.iter().enumerate() {
            let cmp = self.lower_single_compare(*op, &operands[i], &operands[i + 1], span)?;
            combined = Some(match combined {
                Some(prev) => self.unit.builder.binary(BinOp::And, prev, cmp),
                None => cmp,
            });
        }
        let result = combined.unwrap_or_else(|| Val::const_bool(true));
        Ok(ValueRef::rvalue(result, PcType::Bool, span))
    }

    pub(crate) fn lower_single_compare(
        &mut self,
        op: CmpOpKind,
        left: &ValueRef,
        right: &ValueRef,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        let (lv, rv, ty) = self.unify_binary(left, right, span)?;
        if ty.is_float() {
            let pred = match op {
                CmpOpKind::Eq => FloatPredicate::Oeq,
                CmpOpKind::NotEq => FloatPredicate::One,
                CmpOpKind::Lt => FloatPredicate::Olt,
                CmpOpKind::LtE => FloatPredicate::Ole,
                CmpOpKind::Gt => FloatPredicate::Ogt,
                CmpOpKind::GtE => FloatPredicate::Oge,
            };
            Ok(self.unit.builder.fcmp(pred, lv, rv))
        } else {
            let signed = ty.is_signed();
            let pred = match op {
                CmpOpKind::Eq => IntPredicate::Eq,
                CmpOpKind::NotEq => IntPredicate::Ne,
                CmpOpKind::Lt => {
                    if signed {
                        IntPredicate::Slt
                    } else {
                        IntPredicate::Ult
                    }
                }
                CmpOpKind::LtE => {
                    if signed {
                        IntPredicate::Sle
                    } else {
                        IntPredicate::Ule
                    }
                }
                CmpOpKind::Gt => {
                    if signed {
                        IntPredicate::Sgt
                    } else {
                        IntPredicate::Ugt
                    }
                }
                CmpOpKind::GtE => {
                    if signed {
                        IntPredicate::Sge
                    } else {
                        IntPredicate::Uge
                    }
                }
            };
            Ok(self.unit.builder.icmp(pred, lv, rv))
        }
    }

    /// Attribute access: effect references, enum variants, struct fields.
    fn lower_attribute(
        &mut self,
        base: &Expr,
        attr: &str,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        // effect.<capability>.<operation>
        if let ExprKind::Attribute {
            value: inner,
            attr: capability,
        } = &base.kind
        {
            if matches!(&inner.kind, ExprKind::Name(n) if n == "effect") {
                return Ok(ValueRef::callable(
                    CallableRef::Effect {
                        capability: capability.clone(),
                        operation: attr.to_string(),
                    },
                    span,
                ));
            }
        }

        let base_value = self.lower_expr(base)?;

        // Enum.Variant on a type class
        if let ValueKind::TypeClass(PcType::Named(enum_name)) = &base_value.kind {
            let Some(info) = self.unit.registry.aggregate(enum_name) else {
                return Err(self.type_error(format!("unknown aggregate `{}`", enum_name), span));
            };
            if matches!(info.kind, AggregateKind::Enum { .. }) {
                if info.variant(attr).is_none() {
                    return Err(self.type_error(
                        format!("enum `{}` has no variant `{}`", enum_name, attr),
                        span,
                    ));
                }
                return Ok(ValueRef {
                    kind: ValueKind::Callable(CallableRef::EnumVariant {
                        enum_name: enum_name.clone(),
                        variant: attr.to_string(),
                    }),
                    ty: PcType::Named(enum_name.clone()),
                    span,
                    origin: None,
                });
            }
        }

        self.lower_field_access(&base_value, attr, span)
    }

    /// Struct/union field access by name through the registry's
    /// field-name index. `pyconst` fields return their stored value
    /// without emitting a load.
    pub(crate) fn lower_field_access(
        &mut self,
        base: &ValueRef,
        attr: &str,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let base_ty = base.ty.unqualified().clone();

        // Pointer base: auto-dereference one level
        if let PcType::Ptr { pointee, .. } = &base_ty {
            let ptr = self.materialize(base)?;
            let deref = ValueRef::address(ptr, (**pointee).clone(), span);
            return self.lower_field_access(&deref, attr, span);
        }

        let (fields, is_union, agg_name) = match &base_ty {
            PcType::Named(name) => {
                let Some(info) = self.unit.registry.aggregate(name) else {
                    return Err(self.type_error(format!("unknown aggregate `{}`", name), span));
                };
                (
                    info.fields.clone(),
                    matches!(info.kind, AggregateKind::Union),
                    Some(name.clone()),
                )
            }
            PcType::Struct { fields, union } => (fields.clone(), *union, None),
            other => {
                return Err(self.type_error(
                    format!("`{}` has no fields", other.canonical_name()),
                    span,
                ))
            }
        };

        let Some(index) = fields
            .iter()
            .position(|f| f.name.as_deref() == Some(attr))
        else {
            return Err(self.type_error(
                format!(
                    "no field `{}` on `{}`",
                    attr,
                    agg_name.unwrap_or_else(|| base_ty.canonical_name())
                ),
                span,
            ));
        };
        let field_ty = fields[index].ty.clone();

        // pyconst fields: stored compile-time value, no load emitted
        if let PcType::PyConst(value) = field_ty.unqualified() {
            return Ok(ValueRef::constant(value.clone(), span));
        }

        let llvm_index = fields
            .iter()
            .take(index)
            .filter(|f| !f.ty.is_zero_sized())
            .count() as u32;

        // Linear provenance: the field path extends the parent's path.
        let origin = base.origin.clone().map(|(name, mut path)| {
            path.push(index);
            (name, path)
        });

        match &base.kind {
            ValueKind::Address(ptr) => {
                let field_llvm = self.lower_ty(&field_ty);
                let field_ptr = if is_union {
                    // union: reinterpret the storage as the member type
                    self.unit.builder.cast(
                        crate::ir::CastOp::Bitcast,
                        ptr.clone(),
                        field_llvm.clone().ptr_to(),
                    )
                } else {
                    self.unit
                        .builder
                        .struct_gep(ptr.clone(), llvm_index, field_llvm)
                };
                let mut value = ValueRef::address(field_ptr, field_ty, span);
                value.origin = origin;
                Ok(value)
            }
            ValueKind::RValue(val) => {
                if is_union {
                    return Err(self.type_error(
                        "union field access requires an addressable value".into(),
                        span,
                    ));
                }
                let field_llvm = self.lower_ty(&field_ty);
                let extracted =
                    self.unit
                        .builder
                        .extract_value(val.clone(), vec![llvm_index], field_llvm);
                let mut value = ValueRef::rvalue(extracted, field_ty, span);
                value.origin = origin;
                Ok(value)
            }
            _ => Err(self.type_error("field access needs a struct value".into(), span)),
        }
    }

    /// Subscript: type parameterization on type classes, element access
    /// on arrays and pointers (tuple-style multi-dimension supported).
    fn lower_subscript(
        &mut self,
        base: &Expr,
        index: &Expr,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        // Type subscripts (ptr[i32], array[T, 3], struct[...]) go through
        // the annotation resolver.
        if let ExprKind::Name(head) = &base.kind {
            let is_type_head = matches!(
                head.as_str(),
                "ptr" | "array"
                    | "struct"
                    | "union"
                    | "func"
                    | "const"
                    | "volatile"
                    | "static"
                    | "refined"
                    | "pyconst"
                    | "typeof"
            );
            if is_type_head {
                let whole = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(base.clone()),
                        index: Box::new(index.clone()),
                    },
                    span,
                );
                let ty = self.resolver().resolve(&whole, Some(&self.vars))?;
                return Ok(ValueRef::type_class(ty, span));
            }
        }

        let base_value = self.lower_expr(base)?;
        let indices: Vec<Expr> = match &index.kind {
            ExprKind::Tuple(items) => items.clone(),
            _ => vec![index.clone()],
        };

        let mut current = base_value;
        for idx_expr in &indices {
            current = self.index_once(&current, idx_expr, span)?;
        }
        Ok(current)
    }

    /// One level of indexing; `a[i, j]` applies this twice.
    fn index_once(
        &mut self,
        base: &ValueRef,
        index: &Expr,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let idx_value = self.lower_expr(index)?;
        let idx = self.convert_to(&idx_value, &PcType::int(64, true), span)?;

        let base_ty = base.ty.unqualified().clone();
        match base_ty {
            PcType::Array { elem, dims } => {
                let ValueKind::Address(ptr) = &base.kind else {
                    return Err(self.type_error(
                        "array subscript requires an addressable value".into(),
                        span,
                    ));
                };
                let elem_ty: PcType = if dims.len() > 1 {
                    PcType::Array {
                        elem: elem.clone(),
                        dims: dims[1..].to_vec(),
                    }
                } else {
                    (*elem).clone()
                };
                let array_llvm = self.lower_ty(&base.ty);
                let elem_llvm = self.lower_ty(&elem_ty);
                let element_ptr = self.unit.builder.gep(
                    array_llvm,
                    ptr.clone(),
                    vec![Val::const_int(IrType::Int(32), 0), idx],
                    elem_llvm,
                );
                Ok(ValueRef::address(element_ptr, elem_ty, span))
            }
            PcType::Ptr { pointee, dims } => {
                let ptr = self.materialize(base)?;
                let elem_ty: PcType = if dims.len() > 1 {
                    PcType::Array {
                        elem: pointee.clone(),
                        dims: dims[1..].to_vec(),
                    }
                } else {
                    (*pointee).clone()
                };
                let elem_llvm = self.lower_ty(&elem_ty);
                let element_ptr =
                    self.unit
                        .builder
                        .gep(elem_llvm.clone(), ptr, vec![idx], elem_llvm);
                Ok(ValueRef::address(element_ptr, elem_ty, span))
            }
            other => Err(self.type_error(
                format!("`{}` is not subscriptable", other.canonical_name()),
                span,
            )),
        }
    }

    /// Lower an assignment target to (address, type).
    pub(crate) fn lower_lvalue(&mut self, target: &Expr) -> Result<(Val, PcType), Diagnostic> {
        let value = self.lower_expr(target)?;
        match &value.kind {
            ValueKind::Address(ptr) => Ok((ptr.clone(), value.ty.clone())),
            _ => Err(self.type_error("expression is not assignable".into(), target.span)),
        }
    }
}

/// Fold a binary operation over two compile-time constants.
pub(crate) fn fold_binop(op: BinOpKind, l: &PyValue, r: &PyValue) -> Option<PyValue> {
    use PyValue::*;
    match (l, r) {
        (Int(a), Int(b)) => {
            let v = match op {
                BinOpKind::Add => Int(a + b),
                BinOpKind::Sub => Int(a - b),
                BinOpKind::Mul => Int(a * b),
                // Folded division must agree with the runtime sdiv/srem
                // lowering: truncate toward zero, remainder takes the
                // dividend's sign.
                BinOpKind::Div | BinOpKind::FloorDiv => {
                    if *b == 0 {
                        return Option::None;
                    }
                    Int(a.checked_div(*b)?)
                }
                BinOpKind::Mod => {
                    if *b == 0 {
                        return Option::None;
                    }
                    Int(a.checked_rem(*b)?)
                }
                BinOpKind::Pow => {
                    if *b < 0 || *b > 127 {
                        return Option::None;
                    }
                    Int(a.checked_pow(*b as u32)?)
                }
                BinOpKind::BitAnd => Int(a & b),
                BinOpKind::BitOr => Int(a | b),
                BinOpKind::BitXor => Int(a ^ b),
                BinOpKind::Shl => Int(a.checked_shl(*b as u32)?),
                BinOpKind::Shr => Int(a >> b),
            };
            Some(v)
        }
        (Float(a), Float(b)) => fold_float(op, *a, *b),
        (Int(a), Float(b)) => fold_float(op, *a as f64, *b),
        (Float(a), Int(b)) => fold_float(op, *a, *b as f64),
        _ => Option::None,
    }
}

fn fold_float(op: BinOpKind, a: f64, b: f64) -> Option<PyValue> {
    let v = match op {
        BinOpKind::Add => a + b,
        BinOpKind::Sub => a - b,
        BinOpKind::Mul => a * b,
        // Both division forms lower to fdiv on floats; the fold matches.
        BinOpKind::Div | BinOpKind::FloorDiv => a / b,
        BinOpKind::Mod => a % b,
        BinOpKind::Pow => a.powf(b),
        _ => return None,
    };
    Some(PyValue::Float(v))
}

pub(crate) fn fold_compare(op: CmpOpKind, l: &PyValue, r: &PyValue) -> Option<bool> {
    let cmp = match (l, r) {
        (PyValue::Int(a), PyValue::Int(b)) => a.partial_cmp(b),
        (PyValue::Float(a), PyValue::Float(b)) => a.partial_cmp(b),
        (PyValue::Int(a), PyValue::Float(b)) => (*a as f64).partial_cmp(b),
        (PyValue::Float(a), PyValue::Int(b)) => a.partial_cmp(&(*b as f64)),
        (PyValue::Str(a), PyValue::Str(b)) => a.partial_cmp(b),
        (PyValue::Bool(a), PyValue::Bool(b)) => a.partial_cmp(b),
        _ => None,
    }?;
    let result = match op {
        CmpOpKind::Eq => cmp == std::cmp::Ordering::Equal,
        CmpOpKind::NotEq => cmp != std::cmp::Ordering::Equal,
        CmpOpKind::Lt => cmp == std::cmp::Ordering::Less,
        CmpOpKind::LtE => cmp != std::cmp::Ordering::Greater,
        CmpOpKind::Gt => cmp == std::cmp::Ordering::Greater,
        CmpOpKind::GtE => cmp != std::cmp::Ordering::Less,
    };
    Some(result)
}
