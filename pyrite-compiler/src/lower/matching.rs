// Match lowering: each case compiles to a guard-test tree in source
// order; on success the pattern variables bind before the body runs, on
// failure control falls to the next case. An unmatched subject falls
// through the whole statement with no effect.

use pyrite_ast::{Expr, ExprKind, MatchCase, Pattern, Span};
use pyrite_diagnostics::Diagnostic;

use crate::ir::{BinOp, CastOp, FloatPredicate, IntPredicate, IrType, Val};
use crate::linear::LinearMap;
use crate::registry::{AggregateKind, VariantInfo};
use crate::types::PcType;
use crate::value::{ValueKind, ValueRef};

use super::FunctionLowerer;

impl<'u> FunctionLowerer<'u> {
    pub(crate) fn lower_match(
        &mut self,
        subject_expr: &Expr,
        cases: &[MatchCase],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let subject = self.lower_expr(subject_expr)?;
        // Keep the subject addressable so nested destructuring reuses
        // one evaluation.
        let subject = self.spill(&subject, span)?;

        let end = self.append_block("match.end");

        for case in cases {
            let bind_block = self.append_block("case.bind");
            let body_block = self.append_block("case.body");
            let next_block = self.append_block("case.next");

            let matched = self.pattern_check(&case.pattern, &subject, case.span)?;
            self.unit
                .builder
                .cond_branch(matched, bind_block, next_block);

            // Success: bind pattern variables, then test the guard.
            self.position_at(bind_block);
            self.vars.enter_scope();
            let mut result = self.bind_pattern(&case.pattern, &subject, case.span);
            if result.is_ok() {
                match &case.guard {
                    Some(guard) => {
                        result = (|| {
                            let guard_value = self.lower_expr(guard)?;
                            let cond = self.to_boolean(&guard_value)?;
                            self.unit.builder.cond_branch(cond, body_block, next_block);
                            Ok(())
                        })();
                    }
                    None => self.unit.builder.branch(body_block),
                }
            }

            if result.is_ok() {
                self.position_at(body_block);
                for stmt in &case.body {
                    result = self.lower_stmt(stmt);
                    if result.is_err() {
                        break;
                    }
                }
            }
            let scope_check = self.exit_scope_checked();
            result?;
            scope_check?;

            if !self.unit.builder.is_terminated() {
                self.unit.builder.branch(end);
            }
            self.position_at(next_block);
        }

        // No case matched: fall through with no effect.
        self.unit.builder.branch(end);
        self.position_at(end);
        Ok(())
    }

    fn spill(&mut self, value: &ValueRef, span: Span) -> Result<ValueRef, Diagnostic> {
        match &value.kind {
            ValueKind::Address(_) | ValueKind::PyConst(_) => Ok(value.clone()),
            ValueKind::RValue(val) => {
                let llvm_ty = self.lower_ty(&value.ty);
                let slot = self.unit.builder.entry_alloca(llvm_ty);
                self.unit.builder.store(val.clone(), slot.clone());
                let mut spilled = ValueRef::address(slot, value.ty.clone(), span);
                spilled.origin = value.origin.clone();
                Ok(spilled)
            }
            _ => Err(self.type_error("match subject must be a value".into(), span)),
        }
    }

    /// Predicate IR for one pattern, without side effects.
    fn pattern_check(
        &mut self,
        pattern: &Pattern,
        subject: &ValueRef,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        match pattern {
            Pattern::Wildcard | Pattern::Capture(_) => Ok(Val::const_bool(true)),
            Pattern::Literal(literal) => {
                let lit_value = self.lower_expr(literal)?;
                self.equality_check(subject, &lit_value, span)
            }
            Pattern::Value(path) => {
                let (_, variant) = self.variant_of_path(path, span)?;
                self.tag_check(subject, &variant, span)
            }
            Pattern::Constructor { path, args } => {
                let (enum_name, variant) = self.variant_of_path(path, span)?;
                let tag_ok = self.tag_check(subject, &variant, span)?;
                let mut combined = tag_ok;
                if let (Some(payload_ty), Some(arg)) = (&variant.payload, args.first()) {
                    let payload =
                        self.enum_payload(subject, &enum_name, payload_ty.clone(), span)?;
                    let payload_ok = self.pattern_check(arg, &payload, span)?;
                    combined = self.unit.builder.binary(BinOp::And, combined, payload_ok);
                }
                Ok(combined)
            }
            Pattern::Or(alternatives) => {
                let mut combined: Option<Val> = None;
                for alternative in alternatives {
                    let check = self.pattern_check(alternative, subject, span)?;
                    combined = Some(match combined {
                        Some(prev) => self.unit.builder.binary(BinOp::Or, prev, check),
                        None => check,
                    });
                }
                Ok(combined.unwrap_or_else(|| Val::const_bool(false)))
            }
            Pattern::Tuple(patterns) => self.tuple_check(patterns, subject, span),
            Pattern::List(patterns) => {
                let PcType::Array { dims, .. } = subject.ty.unqualified().clone() else {
                    return Ok(Val::const_bool(false));
                };
                if dims.first().copied() != Some(patterns.len() as u64) {
                    // Length mismatch is decided at compile time.
                    return Ok(Val::const_bool(false));
                }
                let mut combined = Val::const_bool(true);
                for (i, element_pattern) in patterns.iter().enumerate() {
                    let element = self.subject_element(subject, i, span)?;
                    let check = self.pattern_check(element_pattern, &element, span)?;
                    combined = self.unit.builder.binary(BinOp::And, combined, check);
                }
                Ok(combined)
            }
        }
    }

    /// Tuple pattern: destructures struct fields, or an enum as
    /// `(Tag, payload_pattern)`.
    fn tuple_check(
        &mut self,
        patterns: &[Pattern],
        subject: &ValueRef,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        if self.subject_is_enum(subject) {
            // tag-only form: (Status.Ok, _)
            let [tag_pattern, payload_pattern] = patterns else {
                return Ok(Val::const_bool(false));
            };
            let Pattern::Value(path) = tag_pattern else {
                return Err(self.type_error(
                    "enum tuple pattern needs a variant in first position".into(),
                    span,
                ));
            };
            let (enum_name, variant) = self.variant_of_path(path, span)?;
            let tag_ok = self.tag_check(subject, &variant, span)?;
            let mut combined = tag_ok;
            if let Some(payload_ty) = &variant.payload {
                if !matches!(payload_pattern, Pattern::Wildcard) {
                    let payload =
                        self.enum_payload(subject, &enum_name, payload_ty.clone(), span)?;
                    let payload_ok = self.pattern_check(payload_pattern, &payload, span)?;
                    combined = self.unit.builder.binary(BinOp::And, combined, payload_ok);
                }
            }
            return Ok(combined);
        }

        let field_count = self.field_count(subject)?;
        if field_count != patterns.len() {
            return Ok(Val::const_bool(false));
        }
        let mut combined = Val::const_bool(true);
        for (i, field_pattern) in patterns.iter().enumerate() {
            let field = self.subject_field(subject, i, span)?;
            let check = self.pattern_check(field_pattern, &field, span)?;
            combined = self.unit.builder.binary(BinOp::And, combined, check);
        }
        Ok(combined)
    }

    /// Bind pattern variables against the (already matched) subject.
    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        subject: &ValueRef,
        span: Span,
    ) -> Result<(), Diagnostic> {
        match pattern {
            Pattern::Capture(name) => {
                let mut bound = subject.clone();
                bound.origin = None;
                self.vars.declare(name, bound, LinearMap::new());
                Ok(())
            }
            Pattern::Tuple(patterns) => {
                if self.subject_is_enum(subject) {
                    let [Pattern::Value(path), payload_pattern] = &patterns[..] else {
                        return Ok(());
                    };
                    let (enum_name, variant) = self.variant_of_path(path, span)?;
                    if let Some(payload_ty) = &variant.payload {
                        let payload =
                            self.enum_payload(subject, &enum_name, payload_ty.clone(), span)?;
                        return self.bind_pattern(payload_pattern, &payload, span);
                    }
                    return Ok(());
                }
                for (i, field_pattern) in patterns.iter().enumerate() {
                    let field = self.subject_field(subject, i, span)?;
                    self.bind_pattern(field_pattern, &field, span)?;
                }
                Ok(())
            }
            Pattern::List(patterns) => {
                for (i, element_pattern) in patterns.iter().enumerate() {
                    let element = self.subject_element(subject, i, span)?;
                    self.bind_pattern(element_pattern, &element, span)?;
                }
                Ok(())
            }
            Pattern::Constructor { path, args } => {
                let (enum_name, variant) = self.variant_of_path(path, span)?;
                if let (Some(payload_ty), Some(arg)) = (&variant.payload, args.first()) {
                    let payload =
                        self.enum_payload(subject, &enum_name, payload_ty.clone(), span)?;
                    self.bind_pattern(arg, &payload, span)?;
                }
                Ok(())
            }
            Pattern::Or(alternatives) => {
                // All alternatives bind the same names; bind the first.
                if let Some(first) = alternatives.first() {
                    self.bind_pattern(first, subject, span)?;
                }
                Ok(())
            }
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Value(_) => Ok(()),
        }
    }

    // ----- subject access helpers -----

    fn subject_is_enum(&self, subject: &ValueRef) -> bool {
        match subject.ty.unqualified() {
            PcType::Named(name) => self
                .unit
                .registry
                .aggregate(name)
                .map(|info| matches!(info.kind, AggregateKind::Enum { .. }))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn field_count(&mut self, subject: &ValueRef) -> Result<usize, Diagnostic> {
        match subject.ty.unqualified() {
            PcType::Named(name) => Ok(self
                .unit
                .registry
                .aggregate(name)
                .map(|info| {
                    info.fields
                        .iter()
                        .filter(|f| !f.ty.is_zero_sized())
                        .count()
                })
                .unwrap_or(0)),
            PcType::Struct { fields, .. } => {
                Ok(fields.iter().filter(|f| !f.ty.is_zero_sized()).count())
            }
            _ => Ok(0),
        }
    }

    fn subject_field(
        &mut self,
        subject: &ValueRef,
        index: usize,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let fields = match subject.ty.unqualified() {
            PcType::Named(name) => self
                .unit
                .registry
                .aggregate(name)
                .map(|info| info.fields.clone())
                .unwrap_or_default(),
            PcType::Struct { fields, .. } => fields.clone(),
            other => {
                return Err(self.type_error(
                    format!("`{}` cannot be destructured", other.canonical_name()),
                    span,
                ))
            }
        };
        let runtime_fields: Vec<&crate::types::Field> = fields
            .iter()
            .filter(|f| !f.ty.is_zero_sized())
            .collect();
        let Some(field) = runtime_fields.get(index) else {
            return Err(self.type_error("pattern has too many elements".into(), span));
        };
        let field_ty = field.ty.clone();
        let llvm_ty = self.lower_ty(&field_ty);

        match &subject.kind {
            ValueKind::Address(ptr) => {
                let field_ptr = self
                    .unit
                    .builder
                    .struct_gep(ptr.clone(), index as u32, llvm_ty);
                Ok(ValueRef::address(field_ptr, field_ty, span))
            }
            _ => Err(self.type_error("match subject must be addressable".into(), span)),
        }
    }

    fn subject_element(
        &mut self,
        subject: &ValueRef,
        index: usize,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let PcType::Array { elem, dims } = subject.ty.unqualified().clone() else {
            return Err(self.type_error("array pattern needs an array subject".into(), span));
        };
        let elem_ty = if dims.len() > 1 {
            PcType::Array {
                elem,
                dims: dims[1..].to_vec(),
            }
        } else {
            (*elem).clone()
        };
        let ValueKind::Address(ptr) = &subject.kind else {
            return Err(self.type_error("match subject must be addressable".into(), span));
        };
        let array_llvm = self.lower_ty(&subject.ty);
        let elem_llvm = self.lower_ty(&elem_ty);
        let element_ptr = self.unit.builder.gep(
            array_llvm,
            ptr.clone(),
            vec![
                Val::const_int(IrType::Int(32), 0),
                Val::const_int(IrType::Int(64), index as i128),
            ],
            elem_llvm,
        );
        Ok(ValueRef::address(element_ptr, elem_ty, span))
    }

    fn equality_check(
        &mut self,
        subject: &ValueRef,
        literal: &ValueRef,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        let ty = subject.ty.unqualified().clone();
        if ty.is_float() {
            let lv = self.materialize(subject)?;
            let rv = self.convert_to(literal, &ty, span)?;
            return Ok(self.unit.builder.fcmp(FloatPredicate::Oeq, lv, rv));
        }
        if ty.is_integer() {
            let lv = self.materialize(subject)?;
            let rv = self.convert_to(literal, &ty, span)?;
            return Ok(self.unit.builder.icmp(IntPredicate::Eq, lv, rv));
        }
        Err(self.type_error(
            format!(
                "literal patterns cannot match `{}`",
                ty.canonical_name()
            ),
            span,
        ))
    }

    /// Resolve `Status.Ok` (or a bare variant name) to its enum and
    /// variant info.
    fn variant_of_path(
        &mut self,
        path: &Expr,
        span: Span,
    ) -> Result<(String, VariantInfo), Diagnostic> {
        if let ExprKind::Attribute { value, attr } = &path.kind {
            if let Some(enum_name) = value.dotted_path() {
                if let Some(info) = self.unit.registry.aggregate(&enum_name) {
                    if let Some(variant) = info.variant(attr) {
                        return Ok((enum_name, variant.clone()));
                    }
                    return Err(self.type_error(
                        format!("enum `{}` has no variant `{}`", enum_name, attr),
                        span,
                    ));
                }
            }
        }
        Err(self.type_error(
            "expected an enum variant path like `Status.Ok`".into(),
            span,
        ))
    }

    fn tag_check(
        &mut self,
        subject: &ValueRef,
        variant: &VariantInfo,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        let tag = self.enum_tag(subject, span)?;
        let expected = Val::const_int(tag.ty(), variant.tag);
        Ok(self.unit.builder.icmp(IntPredicate::Eq, tag, expected))
    }

    fn enum_tag(&mut self, subject: &ValueRef, span: Span) -> Result<Val, Diagnostic> {
        let PcType::Named(name) = subject.ty.unqualified().clone() else {
            return Err(self.type_error("enum pattern needs an enum subject".into(), span));
        };
        let Some(info) = self.unit.registry.aggregate(&name).cloned() else {
            return Err(self.type_error(format!("unknown enum `{}`", name), span));
        };
        let AggregateKind::Enum { tag } = &info.kind else {
            return Err(self.type_error(format!("`{}` is not an enum", name), span));
        };
        let tag_llvm = self.lower_ty(tag);
        match &subject.kind {
            ValueKind::Address(ptr) => {
                let tag_ptr = self
                    .unit
                    .builder
                    .struct_gep(ptr.clone(), 0, tag_llvm.clone());
                Ok(self.unit.builder.load(tag_llvm, tag_ptr))
            }
            _ => Err(self.type_error("match subject must be addressable".into(), span)),
        }
    }

    fn enum_payload(
        &mut self,
        subject: &ValueRef,
        enum_name: &str,
        payload_ty: PcType,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let Some(info) = self.unit.registry.aggregate(enum_name).cloned() else {
            return Err(self.type_error(format!("unknown enum `{}`", enum_name), span));
        };
        let ValueKind::Address(ptr) = &subject.kind else {
            return Err(self.type_error("match subject must be addressable".into(), span));
        };
        let bytes_ty = IrType::Array(
            info.payload_size(&self.unit.registry),
            Box::new(IrType::Int(8)),
        );
        let payload_ptr = self.unit.builder.struct_gep(ptr.clone(), 1, bytes_ty);
        let payload_llvm = self.lower_ty(&payload_ty);
        let typed_ptr =
            self.unit
                .builder
                .cast(CastOp::Bitcast, payload_ptr, payload_llvm.ptr_to());
        Ok(ValueRef::address(typed_ptr, payload_ty, span))
    }
}

