// Call lowering: the unified dispatch over function wrappers, type
// classes (casts and constructors), enum variants, effect references,
// builtins, function pointers, and inline expansion.

use pyrite_ast::{Expr, ExprKind, Span};
use pyrite_diagnostics::{codes, Category, Diagnostic};

use crate::builder::FunctionWrapper;
use crate::ir::{CastOp, Constant, IrType, Val};
use crate::linear;
use crate::registry::{AggregateKind, FunctionInfo, FunctionKind};
use crate::types::{PcType, PyValue};
use crate::value::{CallableRef, ValueKind, ValueRef};

use super::{FunctionLowerer, InlineFrame};

impl<'u> FunctionLowerer<'u> {
    pub(crate) fn lower_call(&mut self, expr: &Expr) -> Result<ValueRef, Diagnostic> {
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = &expr.kind
        else {
            return Err(self.type_error("not a call expression".into(), expr.span));
        };
        let span = expr.span;
        let callee = self.lower_expr(func)?;

        // Expand `*s` struct unpacking into positional arguments
        let arg_values = self.expand_arguments(args)?;

        match callee.kind.clone() {
            ValueKind::Callable(CallableRef::Function(mangled)) => {
                self.call_function_instance(&mangled, arg_values, span)
            }
            ValueKind::Callable(CallableRef::Unresolved(unmangled)) => {
                let mangled = self.resolve_instance(&unmangled, &arg_values, span)?;
                self.call_function_instance(&mangled, arg_values, span)
            }
            ValueKind::Callable(CallableRef::Effect {
                capability,
                operation,
            }) => {
                let mangled = self.resolve_effect_call(&capability, &operation, span)?;
                self.call_function_instance(&mangled, arg_values, span)
            }
            ValueKind::Callable(CallableRef::EnumVariant { enum_name, variant }) => {
                self.construct_enum(&enum_name, &variant, arg_values, span)
            }
            ValueKind::Callable(CallableRef::Builtin(name)) => {
                let _ = keywords;
                self.call_builtin(&name, args, arg_values, span)
            }
            ValueKind::TypeClass(ty) => self.call_type_class(&ty, arg_values, span),
            ValueKind::RValue(_) | ValueKind::Address(_) => {
                // Call through a function-pointer-typed variable
                self.call_function_pointer(&callee, arg_values, span)
            }
            ValueKind::PyConst(_) => Err(self.error(
                Category::Typing,
                codes::NOT_CALLABLE,
                "compile-time constant is not callable".into(),
                span,
            )),
        }
    }

    /// Evaluate call arguments; `*s` of a struct expands to its field
    /// values in order.
    fn expand_arguments(&mut self, args: &[Expr]) -> Result<Vec<ValueRef>, Diagnostic> {
        let mut out = Vec::new();
        for arg in args {
            if let ExprKind::Starred(inner) = &arg.kind {
                let value = self.lower_expr(inner)?;
                let PcType::Named(name) = value.ty.unqualified().clone() else {
                    return Err(self.type_error(
                        "`*` unpacking requires a struct value".into(),
                        arg.span,
                    ));
                };
                let Some(info) = self.unit.registry.aggregate(&name) else {
                    return Err(
                        self.type_error(format!("unknown aggregate `{}`", name), arg.span)
                    );
                };
                let field_names: Vec<String> = info
                    .fields
                    .iter()
                    .filter_map(|f| f.name.clone())
                    .collect();
                for field in field_names {
                    out.push(self.lower_field_access(&value, &field, arg.span)?);
                }
            } else {
                out.push(self.lower_expr(arg)?);
            }
        }
        Ok(out)
    }

    /// Resolve an unmangled callee name against the caller's effect
    /// suffix, the plain instance, or the overload table.
    fn resolve_instance(
        &mut self,
        unmangled: &str,
        args: &[ValueRef],
        span: Span,
    ) -> Result<String, Diagnostic> {
        // Caller compiled under an effect suffix calls the sibling
        // instance compiled under the same suffix.
        if let Some((_, caller_suffix)) = self.info.mangled.split_once('.') {
            let candidate = format!("{}.{}", unmangled, caller_suffix);
            if self.unit.registry.has_function(&candidate) {
                return Ok(candidate);
            }
        }
        if self.unit.registry.has_function(unmangled) {
            return Ok(unmangled.to_string());
        }

        // Overloaded instances: mangle from the evaluated argument types
        let instances = self.unit.registry.instances_of(unmangled).to_vec();
        let overloaded = instances.iter().any(|m| {
            self.unit
                .registry
                .function(m)
                .map(|i| i.overload_enabled)
                .unwrap_or(false)
        });
        if overloaded {
            let mut fragments = Vec::new();
            for arg in args {
                if arg.python_value().is_some() {
                    return Err(self.error(
                        Category::Typing,
                        codes::OVERLOAD_NEEDS_HINTS,
                        format!(
                            "call to overloaded `{}` needs typed arguments, found an untyped constant",
                            unmangled
                        ),
                        span,
                    ));
                }
                fragments.push(arg.ty.clone());
            }
            let candidate = crate::functions::mangle_overload(unmangled, &fragments);
            if self.unit.registry.has_function(&candidate) {
                return Ok(candidate);
            }
            return Err(self.type_error(
                format!("no overload of `{}` matches these argument types", unmangled),
                span,
            ));
        }

        if let Some(first) = instances.first() {
            return Ok(first.clone());
        }
        Err(self.error(
            Category::Typing,
            codes::UNDEFINED_NAME,
            format!("no function instance named `{}`", unmangled),
            span,
        ))
    }

    /// Resolve `effect.<capability>.<operation>()` to a concrete
    /// instance: the caller's collection-time binding wins over the
    /// resolver's sealed/default lookup.
    fn resolve_effect_call(
        &mut self,
        capability: &str,
        operation: &str,
        span: Span,
    ) -> Result<String, Diagnostic> {
        let implementation = match self.info.effect_bindings.get(capability) {
            Some(bound) => bound.clone(),
            None => self.unit.effects.resolve(capability).map_err(|mut diag| {
                diag.span = self.dspan(span);
                diag
            })?,
        };
        let op_fn = crate::effects::EffectResolver::operation_function(&implementation, operation);
        if self.unit.registry.has_function(&op_fn) {
            return Ok(op_fn);
        }
        if let Some(first) = self.unit.registry.instances_of(&op_fn).first() {
            return Ok(first.clone());
        }
        Err(self.error(
            Category::External,
            codes::EFFECT_UNRESOLVED,
            format!(
                "capability `{}` resolved to `{}`, but no operation `{}` is registered",
                capability, implementation, op_fn
            ),
            span,
        ))
    }

    /// Call a registered function instance by mangled name.
    pub(crate) fn call_function_instance(
        &mut self,
        mangled: &str,
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let Some(info) = self.unit.registry.function(mangled).cloned() else {
            return Err(self.error(
                Category::Typing,
                codes::UNDEFINED_NAME,
                format!("no function instance named `{}`", mangled),
                span,
            ));
        };

        match info.kind {
            FunctionKind::Inline => return self.expand_inline(&info, args, span),
            FunctionKind::Generator => {
                return Err(self.type_error(
                    format!("generator `{}` can only be iterated with `for`", info.unmangled),
                    span,
                ))
            }
            FunctionKind::Compile | FunctionKind::Extern => {}
        }

        let runtime_params: Vec<(String, PcType)> = info
            .param_names
            .iter()
            .cloned()
            .zip(info.param_types.iter().cloned())
            .filter(|(_, ty)| !ty.is_zero_sized())
            .collect();

        let count_ok = if info.var_arg {
            args.len() >= runtime_params.len()
        } else {
            args.len() == runtime_params.len()
        };
        if !count_ok {
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                format!(
                    "`{}` takes {} argument(s), {} given",
                    info.unmangled,
                    runtime_params.len(),
                    args.len()
                ),
                span,
            ));
        }

        let mut lowered = Vec::with_capacity(args.len());
        for (arg, (_, param_ty)) in args.iter().zip(runtime_params.iter()) {
            let converted = self.convert_to(arg, param_ty, span)?;
            // A function boundary consumes the corresponding path.
            self.consume_linear_origin(arg, span)?;
            lowered.push(converted);
        }
        // Variadic tail arguments pass with their default machine types.
        for arg in args.iter().skip(runtime_params.len()) {
            let value = self.materialize(arg)?;
            self.consume_linear_origin(arg, span)?;
            lowered.push(value);
        }

        let wrapper = self.ensure_wrapper(&info)?;
        let result = self.unit.builder.call(&wrapper, lowered);

        match result {
            Some(val) => Ok(ValueRef::rvalue(val, info.return_type.clone(), span)),
            None => Ok(ValueRef {
                kind: ValueKind::PyConst(PyValue::None),
                ty: PcType::Void,
                span,
                origin: None,
            }),
        }
    }

    /// Wrapper lookup, declaring on first use (extern instances
    /// registered after pass 1, e.g. by cimport).
    pub(crate) fn ensure_wrapper(
        &mut self,
        info: &FunctionInfo,
    ) -> Result<FunctionWrapper, Diagnostic> {
        if let Some(wrapper) = self.unit.wrappers.get(&info.mangled) {
            return Ok(wrapper.clone());
        }
        let mut param_tys = Vec::new();
        for ty in &info.param_types {
            if ty.is_zero_sized() {
                continue;
            }
            param_tys.push(self.lower_ty(ty));
        }
        let ret_ty = self.lower_ty(&info.return_type);
        let wrapper = self.unit.builder.declare_function(
            &info.mangled,
            &param_tys,
            ret_ty,
            info.var_arg,
            true,
        );
        self.unit
            .wrappers
            .insert(info.mangled.clone(), wrapper.clone());
        Ok(wrapper)
    }

    /// Consume the linear token behind an argument or returned value.
    pub(crate) fn consume_linear_origin(
        &mut self,
        value: &ValueRef,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let Some((name, path)) = value.origin.clone() else {
            return Ok(());
        };
        let file = self.unit.file.clone();
        let Some(var) = self.vars.lookup_mut(&name) else {
            return Ok(());
        };
        if var.linear.is_empty() {
            return Ok(());
        }
        let already_consumed = var
            .linear
            .iter()
            .any(|(k, s)| {
                (k.starts_with(&path) || path.starts_with(k.as_slice()))
                    && s.state == linear::TokenState::Consumed
            });
        if already_consumed {
            return Err(Diagnostic::error(
                Category::Linear,
                codes::LINEAR_ALREADY_CONSUMED,
                format!("linear token `{}` is already consumed", name),
                pyrite_diagnostics::Span::new(file, span.line, span.column, span.length.max(1)),
            ));
        }
        linear::consume(&mut var.linear, &path, span);
        Ok(())
    }

    /// Inline expansion: parameters become locals, nested `return`s
    /// become stores to a result slot plus a branch to the exit block.
    /// This is how closures compile, including closures containing loops.
    fn expand_inline(
        &mut self,
        info: &FunctionInfo,
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let Some(source) = info.source.clone() else {
            return Err(self.type_error(
                format!("inline function `{}` has no body", info.unmangled),
                span,
            ));
        };

        if args.len() != info.param_types.len() {
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

        self.vars.enter_scope();
        for ((name, param_ty), arg) in info
            .param_names
            .iter()
            .zip(info.param_types.iter())
            .zip(args.iter())
        {
            let converted = self.convert_to(arg, param_ty, span)?;
            let llvm_ty = self.lower_ty(param_ty);
            let slot = self.unit.builder.entry_alloca(llvm_ty);
            self.unit.builder.store(converted, slot.clone());
            self.vars.declare(
                name,
                ValueRef::address(slot, param_ty.clone(), span),
                crate::linear::LinearMap::new(),
            );
        }

        let result_ty = info.return_type.clone();
        let result_slot = if result_ty.is_void() {
            None
        } else {
            let llvm_ty = self.lower_ty(&result_ty);
            Some(self.unit.builder.entry_alloca(llvm_ty))
        };
        let exit_block = self.append_block("inline.exit");
        let seq = self.next_frame_seq();
        self.inline_frames.push(InlineFrame {
            exit_block,
            result_slot: result_slot.clone(),
            result_ty: result_ty.clone(),
            seq,
        });

        let mut result = Ok(());
        for stmt in &source.body {
            result = self.lower_stmt(stmt).map(|_| ());
            if result.is_err() {
                break;
            }
        }

        self.inline_frames.pop();
        let scope_check = self.exit_scope_checked();
        result?;
        scope_check?;

        if !self.unit.builder.is_terminated() {
            self.unit.builder.branch(exit_block);
        }
        self.position_at(exit_block);

        match result_slot {
            Some(slot) => {
                let llvm_ty = self.lower_ty(&result_ty);
                let value = self.unit.builder.load(llvm_ty, slot);
                Ok(ValueRef::rvalue(value, result_ty, span))
            }
            None => Ok(ValueRef {
                kind: ValueKind::PyConst(PyValue::None),
                ty: PcType::Void,
                span,
                origin: None,
            }),
        }
    }

    /// Enum construction: `Status.Ok(v)` or `Status.Empty()`.
    fn construct_enum(
        &mut self,
        enum_name: &str,
        variant_name: &str,
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let Some(info) = self.unit.registry.aggregate(enum_name).cloned() else {
            return Err(self.type_error(format!("unknown enum `{}`", enum_name), span));
        };
        let AggregateKind::Enum { tag } = &info.kind else {
            return Err(self.type_error(format!("`{}` is not an enum", enum_name), span));
        };
        let Some(variant) = info.variant(variant_name).cloned() else {
            return Err(self.type_error(
                format!("enum `{}` has no variant `{}`", enum_name, variant_name),
                span,
            ));
        };

        match (&variant.payload, args.len()) {
            (None, 0) | (Some(_), 1) => {}
            (None, n) => {
                return Err(self.error(
                    Category::Typing,
                    codes::BAD_ARGUMENT_COUNT,
                    format!(
                        "variant `{}.{}` carries no payload, {} argument(s) given",
                        enum_name, variant_name, n
                    ),
                    span,
                ))
            }
            (Some(_), n) => {
                return Err(self.error(
                    Category::Typing,
                    codes::BAD_ARGUMENT_COUNT,
                    format!(
                        "variant `{}.{}` takes exactly one payload argument, {} given",
                        enum_name, variant_name, n
                    ),
                    span,
                ))
            }
        }

        let enum_ty = PcType::Named(enum_name.to_string());
        let enum_llvm = self.lower_ty(&enum_ty);
        let slot = self.unit.builder.entry_alloca(enum_llvm.clone());

        // tag field
        let tag_llvm = self.lower_ty(tag);
        let tag_ptr = self.unit.builder.struct_gep(slot.clone(), 0, tag_llvm.clone());
        self.unit
            .builder
            .store(Val::const_int(tag_llvm, variant.tag), tag_ptr);

        // payload through the byte-array storage
        if let (Some(payload_ty), Some(arg)) = (&variant.payload, args.first()) {
            let payload_llvm = self.lower_ty(payload_ty);
            let converted = self.convert_to(arg, payload_ty, span)?;
            self.consume_linear_origin(arg, span)?;
            let bytes_ty = IrType::Array(
                info.payload_size(&self.unit.registry),
                Box::new(IrType::Int(8)),
            );
            let payload_ptr = self.unit.builder.struct_gep(slot.clone(), 1, bytes_ty);
            let typed_ptr = self.unit.builder.cast(
                CastOp::Bitcast,
                payload_ptr,
                payload_llvm.clone().ptr_to(),
            );
            self.unit.builder.store(converted, typed_ptr);
        }

        let value = self.unit.builder.load(enum_llvm, slot);
        Ok(ValueRef::rvalue(value, enum_ty, span))
    }

    /// Type classes called as functions: casts for scalars and pointers,
    /// constructors for named structs.
    fn call_type_class(
        &mut self,
        ty: &PcType,
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        if let PcType::Named(name) = ty.unqualified() {
            let Some(info) = self.unit.registry.aggregate(name).cloned() else {
                return Err(self.type_error(format!("unknown aggregate `{}`", name), span));
            };
            return match info.kind {
                AggregateKind::Struct => self.construct_struct(name, &info.fields, args, span),
                AggregateKind::Union => Err(self.type_error(
                    "unions are built by assigning exactly one field".into(),
                    span,
                )),
                AggregateKind::Enum { .. } => Err(self.type_error(
                    format!("construct enum `{}` through a variant", name),
                    span,
                )),
            };
        }

        // Scalar and pointer casts: i32(x), f64(x), ptr[i8](x)
        let [arg] = args.as_slice() else {
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                format!(
                    "cast to `{}` takes exactly one argument",
                    ty.canonical_name()
                ),
                span,
            ));
        };
        let value = self.cast_explicit(arg, ty, span)?;
        Ok(ValueRef::rvalue(value, ty.clone(), span))
    }

    /// Struct construction from a tuple literal or positional arguments:
    /// an insertvalue chain over an undef aggregate.
    fn construct_struct(
        &mut self,
        name: &str,
        fields: &[crate::types::Field],
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        // `Point((3, 4))` passes one tuple; flatten it
        let values: Vec<ValueRef> = if args.len() == 1 {
            match args[0].python_value() {
                Some(PyValue::Tuple(items)) => items
                    .iter()
                    .map(|v| ValueRef::constant(v.clone(), span))
                    .collect(),
                _ => args,
            }
        } else {
            args
        };

        let runtime_fields: Vec<&crate::types::Field> = fields
            .iter()
            .filter(|f| !f.ty.is_zero_sized())
            .collect();
        if values.len() != runtime_fields.len() {
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                format!(
                    "`{}` has {} field(s), {} initializer(s) given",
                    name,
                    runtime_fields.len(),
                    values.len()
                ),
                span,
            ));
        }

        let struct_ty = PcType::Named(name.to_string());
        let struct_llvm = self.lower_ty(&struct_ty);
        let mut aggregate = Val::Const(Constant::Undef(struct_llvm));
        for (i, (value, field)) in values.iter().zip(runtime_fields.iter()).enumerate() {
            let converted = self.convert_to(value, &field.ty, span)?;
            self.consume_linear_origin(value, span)?;
            aggregate = self
                .unit
                .builder
                .insert_value(aggregate, converted, vec![i as u32]);
        }
        Ok(ValueRef::rvalue(aggregate, struct_ty, span))
    }

    /// Call through a function-pointer-typed variable.
    fn call_function_pointer(
        &mut self,
        callee: &ValueRef,
        args: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        let PcType::Func { params, ret } = callee.ty.unqualified().clone() else {
            return Err(self.error(
                Category::Typing,
                codes::NOT_CALLABLE,
                format!(
                    "`{}` is not a function type and cannot be called",
                    callee.ty.canonical_name()
                ),
                span,
            ));
        };
        if args.len() != params.len() {
            return Err(self.error(
                Category::Typing,
                codes::BAD_ARGUMENT_COUNT,
                format!("expected {} argument(s), {} given", params.len(), args.len()),
                span,
            ));
        }
        let mut lowered = Vec::new();
        for (arg, param_ty) in args.iter().zip(params.iter()) {
            lowered.push(self.convert_to(arg, param_ty, span)?);
        }
        let fn_val = self.materialize(callee)?;
        let ret_llvm = self.lower_ty(&ret);
        let result = self.unit.builder.call_indirect(fn_val, lowered, ret_llvm);
        match result {
            Some(val) => Ok(ValueRef::rvalue(val, (*ret).clone(), span)),
            None => Ok(ValueRef {
                kind: ValueKind::PyConst(PyValue::None),
                ty: PcType::Void,
                span,
                origin: None,
            }),
        }
    }

    /// Compiler builtins callable in expression position.
    fn call_builtin(
        &mut self,
        name: &str,
        raw_args: &[Expr],
        arg_values: Vec<ValueRef>,
        span: Span,
    ) -> Result<ValueRef, Diagnostic> {
        match name {
            "sizeof" => {
                let [arg] = raw_args else {
                    return Err(self.error(
                        Category::Typing,
                        codes::BAD_ARGUMENT_COUNT,
                        "sizeof() takes exactly one argument".into(),
                        span,
                    ));
                };
                let ty = self.resolver().resolve(arg, Some(&self.vars))?;
                let size = ty.size_bytes(&self.unit.registry);
                Ok(ValueRef::constant(PyValue::Int(size as i128), span))
            }
            "char" => {
                let [arg] = arg_values.as_slice() else {
                    return Err(self.error(
                        Category::Typing,
                        codes::BAD_ARGUMENT_COUNT,
                        "char() takes exactly one argument".into(),
                        span,
                    ));
                };
                match arg.python_value() {
                    Some(PyValue::Str(s)) if s.len() == 1 => Ok(ValueRef::rvalue(
                        Val::const_int(IrType::Int(8), s.as_bytes()[0] as i128),
                        PcType::Char,
                        span,
                    )),
                    Some(PyValue::Int(i)) => Ok(ValueRef::rvalue(
                        Val::const_int(IrType::Int(8), super::convert::wrap_const(*i, 8, true)),
                        PcType::Char,
                        span,
                    )),
                    _ => {
                        let value = self.cast_explicit(arg, &PcType::Char, span)?;
                        Ok(ValueRef::rvalue(value, PcType::Char, span))
                    }
                }
            }
            "getptr" => {
                let [arg] = raw_args else {
                    return Err(self.error(
                        Category::Typing,
                        codes::BAD_ARGUMENT_COUNT,
                        "getptr() takes exactly one argument".into(),
                        span,
                    ));
                };
                let (ptr, ty) = self.lower_lvalue(arg)?;
                Ok(ValueRef::rvalue(ptr, PcType::ptr(ty), span))
            }
            "assume" => {
                // Unchecked refinement constructor: assume(args, pred)
                let [value, pred] = arg_values.as_slice() else {
                    return Err(self.error(
                        Category::Typing,
                        codes::BAD_ARGUMENT_COUNT,
                        "assume(value, predicate) takes two arguments".into(),
                        span,
                    ));
                };
                let pred_name = self.predicate_name(pred, span)?;
                let base = value.ty.unqualified().clone();
                let mut refined = value.clone();
                refined.ty = PcType::Refined {
                    base: Box::new(base),
                    pred: pred_name,
                };
                Ok(refined)
            }
            "seq" | "refine" => Err(self.type_error(
                format!("`{}` is only valid as a for-loop iterator", name),
                span,
            )),
            "typeof" => {
                let [arg] = raw_args else {
                    return Err(self.error(
                        Category::Typing,
                        codes::BAD_ARGUMENT_COUNT,
                        "typeof() takes exactly one argument".into(),
                        span,
                    ));
                };
                let value = self.lower_expr(arg)?;
                Ok(ValueRef::type_class(value.ty.unqualified().clone(), span))
            }
            other => Err(self.error(
                Category::Typing,
                codes::NOT_CALLABLE,
                format!("`{}` cannot be called here", other),
                span,
            )),
        }
    }

    /// The predicate argument of refine/assume: a registered compiled
    /// function.
    pub(crate) fn predicate_name(
        &self,
        pred: &ValueRef,
        span: Span,
    ) -> Result<String, Diagnostic> {
        match &pred.kind {
            ValueKind::Callable(CallableRef::Function(mangled)) => Ok(mangled.clone()),
            ValueKind::Callable(CallableRef::Unresolved(unmangled)) => self
                .unit
                .registry
                .instances_of(unmangled)
                .first()
                .cloned()
                .ok_or_else(|| {
                    self.type_error(format!("unknown predicate `{}`", unmangled), span)
                }),
            _ => Err(self.type_error(
                "refinement predicate must be a compiled function".into(),
                span,
            )),
        }
    }
}
