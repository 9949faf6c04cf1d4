// The type converter: implicit conversion rules, binary-operand
// unification, boolean tests, and explicit type-class casts.

use pyrite_ast::Span;
use pyrite_diagnostics::Diagnostic;

use crate::ir::{CastOp, Constant, FloatPredicate, IntPredicate, IrType, Val};
use crate::types::{FloatKind, PcType, PyValue};
use crate::value::{ValueKind, ValueRef};

use super::FunctionLowerer;

/// Mask an integer constant to its storage width, reinterpreting the top
/// bit for signed types (two's complement wrap).
pub fn wrap_const(value: i128, width: u32, signed: bool) -> i128 {
    if width >= 128 {
        return value;
    }
    let mask = (1i128 << width) - 1;
    let wrapped = value & mask;
    if signed && width > 0 && (wrapped >> (width - 1)) & 1 == 1 {
        wrapped - (1i128 << width)
    } else {
        wrapped
    }
}

impl<'u> FunctionLowerer<'u> {
    /// Materialize a ValueRef as an IR value. Addresses load; python
    /// constants adopt their default machine types (i64 / f64).
    pub(crate) fn materialize(&mut self, v: &ValueRef) -> Result<Val, Diagnostic> {
        match &v.kind {
            ValueKind::RValue(val) => Ok(val.clone()),
            ValueKind::Address(ptr) => {
                let llvm_ty = self.lower_ty(&v.ty);
                Ok(self.unit.builder.load(llvm_ty, ptr.clone()))
            }
            ValueKind::PyConst(value) => match value {
                PyValue::Int(i) => Ok(Val::const_int(IrType::Int(64), *i)),
                PyValue::Float(f) => Ok(Val::Const(Constant::Float(IrType::Double, *f))),
                PyValue::Bool(b) => Ok(Val::const_bool(*b)),
                PyValue::Str(s) => {
                    let s = s.clone();
                    Ok(self.str_constant(&s))
                }
                _ => Err(self.type_error(
                    "compile-time value has no runtime representation".into(),
                    v.span,
                )),
            },
            ValueKind::TypeClass(_) | ValueKind::Callable(_) => Err(self.type_error(
                "expected a value, found a type or callable".into(),
                v.span,
            )),
        }
    }

    /// A NUL-terminated string constant; yields an `i8*`.
    pub(crate) fn str_constant(&mut self, s: &str) -> Val {
        let mut bytes: Vec<Constant> = s
            .bytes()
            .map(|b| Constant::Int(IrType::Int(8), b as i128))
            .collect();
        bytes.push(Constant::Int(IrType::Int(8), 0));
        let array_ty = IrType::Array(bytes.len() as u64, Box::new(IrType::Int(8)));
        let name = format!("str.{}", self.unit.builder.module.globals.len());
        self.unit.builder.module.add_global(crate::ir::Global {
            name: name.clone(),
            ty: array_ty.clone(),
            init: Constant::Array(array_ty.clone(), bytes),
            internal: true,
        });
        let global = Val::Const(Constant::Global(name, array_ty.clone().ptr_to()));
        self.unit.builder.gep(
            array_ty,
            global,
            vec![
                Val::const_int(IrType::Int(32), 0),
                Val::const_int(IrType::Int(32), 0),
            ],
            IrType::Int(8),
        )
    }

    /// Convert a value to a target type under the implicit-conversion
    /// rules: widening only, signedness preserved, int<->float through
    /// sitofp/uitofp.
    pub(crate) fn convert_to(
        &mut self,
        v: &ValueRef,
        target: &PcType,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        let target = target.unqualified().clone();

        if let ValueKind::PyConst(value) = &v.kind {
            return self.constant_to(value.clone(), &target, span);
        }

        let source = v.ty.unqualified().clone();
        if source.canonical_name() == target.canonical_name() {
            return self.materialize(v);
        }

        // refined[pred] shares storage with its base tuple
        if let PcType::Refined { base, .. } = &source {
            let mut unrefined = v.clone();
            unrefined.ty = (**base).clone();
            return self.convert_to(&unrefined, &target, span);
        }
        if let PcType::Refined { base, .. } = &target {
            return self.convert_to(v, base, span);
        }

        // array lvalue decays to a pointer to its first element
        if let (PcType::Array { elem, .. }, PcType::Ptr { pointee, .. }) = (&source, &target) {
            if elem.canonical_name() == pointee.canonical_name() && v.is_address() {
                if let ValueKind::Address(ptr) = &v.kind {
                    let array_ty = self.lower_ty(&source);
                    let elem_ty = self.lower_ty(elem);
                    return Ok(self.unit.builder.gep(
                        array_ty,
                        ptr.clone(),
                        vec![
                            Val::const_int(IrType::Int(32), 0),
                            Val::const_int(IrType::Int(32), 0),
                        ],
                        elem_ty,
                    ));
                }
            }
        }

        match (source.int_info(), target.int_info()) {
            (Some((src_w, src_signed)), Some((dst_w, _))) => {
                let val = self.materialize(v)?;
                if dst_w == src_w {
                    // same width, signedness reinterpreted
                    return Ok(val);
                }
                if dst_w > src_w {
                    let op = if src_signed { CastOp::SExt } else { CastOp::ZExt };
                    let to = self.lower_ty(&target);
                    return Ok(self.unit.builder.cast(op, val, to));
                }
                if matches!(target, PcType::Bool) {
                    let zero = Val::const_int(val.ty(), 0);
                    return Ok(self.unit.builder.icmp(IntPredicate::Ne, val, zero));
                }
                return Err(self.type_error(
                    format!(
                        "implicit narrowing from `{}` to `{}` is not permitted",
                        source.canonical_name(),
                        target.canonical_name()
                    ),
                    span,
                ));
            }
            _ => {}
        }

        if source.is_integer() && target.is_float() {
            let val = self.materialize(v)?;
            let op = if source.is_signed() {
                CastOp::SiToFp
            } else {
                CastOp::UiToFp
            };
            let to = self.lower_ty(&target);
            return Ok(self.unit.builder.cast(op, val, to));
        }

        if let (PcType::Float(src), PcType::Float(dst)) = (&source, &target) {
            let val = self.materialize(v)?;
            if dst.rank() > src.rank() {
                let to = self.lower_ty(&target);
                return Ok(self.unit.builder.cast(CastOp::FpExt, val, to));
            }
            return Err(self.type_error(
                format!(
                    "implicit narrowing from `{}` to `{}` is not permitted",
                    source.canonical_name(),
                    target.canonical_name()
                ),
                span,
            ));
        }

        if let (PcType::Ptr { pointee: sp, .. }, PcType::Ptr { pointee: tp, .. }) =
            (&source, &target)
        {
            let val = self.materialize(v)?;
            if sp.canonical_name() == tp.canonical_name() || sp.is_void() || tp.is_void() {
                let to = self.lower_ty(&target);
                return Ok(self.unit.builder.cast(CastOp::Bitcast, val, to));
            }
        }

        Err(self.type_error(
            format!(
                "cannot implicitly convert `{}` to `{}`",
                source.canonical_name(),
                target.canonical_name()
            ),
            span,
        ))
    }

    /// Convert a compile-time constant to a concrete typed value.
    fn constant_to(
        &mut self,
        value: PyValue,
        target: &PcType,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        match (&value, target.unqualified()) {
            (PyValue::Int(i), t) if t.is_integer() => {
                let (width, signed) = t.int_info().unwrap_or((64, true));
                let wrapped = wrap_const(*i, width, signed);
                let llvm_ty = self.lower_ty(target);
                Ok(Val::const_int(llvm_ty, wrapped))
            }
            (PyValue::Int(i), PcType::Float(_)) => {
                let llvm_ty = self.lower_ty(target);
                Ok(Val::Const(Constant::Float(llvm_ty, *i as f64)))
            }
            (PyValue::Float(f), PcType::Float(_)) => {
                let llvm_ty = self.lower_ty(target);
                Ok(Val::Const(Constant::Float(llvm_ty, *f)))
            }
            (PyValue::Bool(b), t) if t.is_integer() => {
                let llvm_ty = self.lower_ty(target);
                Ok(Val::const_int(llvm_ty, *b as i128))
            }
            (PyValue::Str(s), PcType::Ptr { pointee, .. })
                if matches!(pointee.unqualified(), PcType::Char)
                    || pointee.int_info() == Some((8, true))
                    || pointee.int_info() == Some((8, false)) =>
            {
                let s = s.clone();
                Ok(self.str_constant(&s))
            }
            (PyValue::Str(s), PcType::Char) if s.len() == 1 => {
                Ok(Val::const_int(IrType::Int(8), s.as_bytes()[0] as i128))
            }
            _ => Err(self.type_error(
                format!(
                    "cannot convert compile-time value to `{}`",
                    target.canonical_name()
                ),
                span,
            )),
        }
    }

    /// Unify the operands of an arithmetic binary operation. Returns the
    /// converted values and the unified result type.
    pub(crate) fn unify_binary(
        &mut self,
        left: &ValueRef,
        right: &ValueRef,
        span: Span,
    ) -> Result<(Val, Val, PcType), Diagnostic> {
        let lt = self.operand_type(left);
        let rt = self.operand_type(right);

        let result = match (&lt, &rt) {
            (None, None) => {
                return Err(self.type_error(
                    "cannot type untyped operands; add an annotation".into(),
                    span,
                ))
            }
            (Some(t), None) | (None, Some(t)) => t.clone(),
            (Some(l), Some(r)) => unify_types(l, r).ok_or_else(|| {
                self.type_error(
                    format!(
                        "incompatible operand types `{}` and `{}`",
                        l.canonical_name(),
                        r.canonical_name()
                    ),
                    span,
                )
            })?,
        };

        let lv = self.convert_to(left, &result, span)?;
        let rv = self.convert_to(right, &result, span)?;
        Ok((lv, rv, result))
    }

    fn operand_type(&self, v: &ValueRef) -> Option<PcType> {
        match &v.kind {
            ValueKind::PyConst(_) => None,
            _ => Some(v.ty.unqualified().clone()),
        }
    }

    /// Boolean test of any value (Python truthiness for constants).
    pub(crate) fn to_boolean(&mut self, v: &ValueRef) -> Result<Val, Diagnostic> {
        if let Some(value) = v.python_value() {
            return Ok(Val::const_bool(value.truthy()));
        }
        let ty = v.ty.unqualified().clone();
        let val = self.materialize(v)?;
        match &ty {
            PcType::Bool => Ok(val),
            t if t.is_integer() => {
                let zero = Val::const_int(val.ty(), 0);
                Ok(self.unit.builder.icmp(IntPredicate::Ne, val, zero))
            }
            PcType::Float(_) => {
                let zero = Val::Const(Constant::Float(val.ty(), 0.0));
                Ok(self.unit.builder.fcmp(FloatPredicate::One, val, zero))
            }
            PcType::Ptr { .. } => {
                let null = Val::Const(Constant::Null(val.ty()));
                Ok(self.unit.builder.icmp(IntPredicate::Ne, val, null))
            }
            other => Err(self.type_error(
                format!("`{}` has no boolean interpretation", other.canonical_name()),
                v.span,
            )),
        }
    }

    /// Explicit cast through a type class call like `i32(x)`. Narrowing
    /// wraps (two's complement); float-to-int truncates toward zero.
    pub(crate) fn cast_explicit(
        &mut self,
        v: &ValueRef,
        target: &PcType,
        span: Span,
    ) -> Result<Val, Diagnostic> {
        if let ValueKind::PyConst(value) = &v.kind {
            if let (PyValue::Int(i), Some((width, signed))) = (value, target.int_info()) {
                let llvm_ty = self.lower_ty(target);
                return Ok(Val::const_int(llvm_ty, wrap_const(*i, width, signed)));
            }
            return self.constant_to(value.clone(), target, span);
        }

        let source = v.ty.unqualified().clone();
        let val = self.materialize(v)?;
        let to = self.lower_ty(target);

        match (&source, target.unqualified()) {
            (s, t) if s.is_integer() && t.is_integer() => {
                let (sw, ss) = s.int_info().unwrap_or((64, true));
                let (tw, _) = t.int_info().unwrap_or((64, true));
                let op = if tw < sw {
                    CastOp::Trunc
                } else if tw == sw {
                    return Ok(val);
                } else if ss {
                    CastOp::SExt
                } else {
                    CastOp::ZExt
                };
                Ok(self.unit.builder.cast(op, val, to))
            }
            (s, PcType::Float(_)) if s.is_integer() => {
                let op = if s.is_signed() {
                    CastOp::SiToFp
                } else {
                    CastOp::UiToFp
                };
                Ok(self.unit.builder.cast(op, val, to))
            }
            (PcType::Float(_), t) if t.is_integer() => {
                let op = if t.is_signed() {
                    CastOp::FpToSi
                } else {
                    CastOp::FpToUi
                };
                Ok(self.unit.builder.cast(op, val, to))
            }
            (PcType::Float(s), PcType::Float(t)) => {
                let op = if t.rank() < s.rank() {
                    CastOp::FpTrunc
                } else if t.rank() == s.rank() {
                    return Ok(val);
                } else {
                    CastOp::FpExt
                };
                Ok(self.unit.builder.cast(op, val, to))
            }
            (PcType::Ptr { .. }, t) if t.is_integer() => {
                Ok(self.unit.builder.cast(CastOp::PtrToInt, val, to))
            }
            (s, PcType::Ptr { .. }) if s.is_integer() => {
                Ok(self.unit.builder.cast(CastOp::IntToPtr, val, to))
            }
            (PcType::Ptr { .. }, PcType::Ptr { .. }) => {
                Ok(self.unit.builder.cast(CastOp::Bitcast, val, to))
            }
            (s, t) => Err(self.type_error(
                format!(
                    "no cast from `{}` to `{}`",
                    s.canonical_name(),
                    t.canonical_name()
                ),
                span,
            )),
        }
    }
}

/// Unify two concrete operand types. Integer promotion keeps the wider
/// width and preserves signedness; equal widths with mixed signedness
/// resolve unsigned; mixed int/float converts the integer side.
pub fn unify_types(l: &PcType, r: &PcType) -> Option<PcType> {
    if l.canonical_name() == r.canonical_name() {
        return Some(l.clone());
    }
    match (l.int_info(), r.int_info()) {
        (Some((lw, ls)), Some((rw, rs))) => {
            let ty = if lw > rw {
                PcType::int(lw, ls)
            } else if rw > lw {
                PcType::int(rw, rs)
            } else {
                PcType::int(lw, ls && rs)
            };
            return Some(ty);
        }
        _ => {}
    }
    match (l.unqualified(), r.unqualified()) {
        (PcType::Float(lf), PcType::Float(rf)) => {
            Some(if lf.rank() >= rf.rank() {
                PcType::Float(*lf)
            } else {
                PcType::Float(*rf)
            })
        }
        (PcType::Float(f), other) if other.is_integer() => Some(PcType::Float(*f)),
        (other, PcType::Float(f)) if other.is_integer() => Some(PcType::Float(*f)),
        (PcType::Ptr { .. }, other) if other.is_integer() => Some(l.clone()),
        (other, PcType::Ptr { .. }) if other.is_integer() => Some(r.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_const_two_complement() {
        assert_eq!(wrap_const(300, 8, false), 44);
        assert_eq!(wrap_const(300, 8, true), 44);
        assert_eq!(wrap_const(200, 8, true), -56);
        assert_eq!(wrap_const(-1, 8, false), 255);
        assert_eq!(wrap_const(65536, 16, false), 0);
    }

    #[test]
    fn unify_prefers_wider_width() {
        let t = unify_types(&PcType::int(8, true), &PcType::int(32, true));
        assert_eq!(t, Some(PcType::int(32, true)));
    }

    #[test]
    fn unify_equal_width_mixed_sign_is_unsigned() {
        let t = unify_types(&PcType::int(32, true), &PcType::int(32, false));
        assert_eq!(t, Some(PcType::int(32, false)));
    }

    #[test]
    fn unify_int_float_is_float() {
        let t = unify_types(&PcType::int(32, true), &PcType::Float(FloatKind::F64));
        assert_eq!(t, Some(PcType::Float(FloatKind::F64)));
    }

    #[test]
    fn unify_float_widths() {
        let t = unify_types(
            &PcType::Float(FloatKind::F32),
            &PcType::Float(FloatKind::F64),
        );
        assert_eq!(t, Some(PcType::Float(FloatKind::F64)));
    }
}
