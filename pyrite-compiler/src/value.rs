// ValueRef: the tagged union every expression lowers to. Carries the
// underlying IR handle, the PC-type hint, and the source node that
// produced it.

use pyrite_ast::Span;

use crate::ir::Val;
use crate::types::{PcType, PyValue};

/// How a callable value is addressed at a call site
#[derive(Debug, Clone, PartialEq)]
pub enum CallableRef {
    /// A registered function instance, by mangled name
    Function(String),
    /// An unmangled name requiring suffix resolution at the call
    /// (overloaded or effect-suffixed instances)
    Unresolved(String),
    /// A compiler builtin (sizeof, seq, refine, assume, getptr, char)
    Builtin(String),
    /// `effect.<capability>.<operation>` reference, resolved by the
    /// effect resolver at lowering time
    Effect { capability: String, operation: String },
    /// `Enum.Variant` used as a constructor
    EnumVariant { enum_name: String, variant: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Materialized IR value
    RValue(Val),
    /// Address of storage; loads and stores go through this pointer
    Address(Val),
    /// Compile-time constant, not yet typed
    PyConst(PyValue),
    /// A type used as a value (casts, constructors, annotations)
    TypeClass(PcType),
    /// Something callable
    Callable(CallableRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub kind: ValueKind,
    /// PC-type hint; `PcType::PythonValue` until a typed context fixes it
    pub ty: PcType,
    pub span: Span,
    /// Provenance for the linear checker: the variable binding this value
    /// was read from, plus the sub-path of field/element indices
    pub origin: Option<(String, Vec<usize>)>,
}

impl ValueRef {
    pub fn rvalue(val: Val, ty: PcType, span: Span) -> Self {
        Self {
            kind: ValueKind::RValue(val),
            ty,
            span,
            origin: None,
        }
    }

    pub fn address(ptr: Val, ty: PcType, span: Span) -> Self {
        Self {
            kind: ValueKind::Address(ptr),
            ty,
            span,
            origin: None,
        }
    }

    pub fn constant(value: PyValue, span: Span) -> Self {
        Self {
            kind: ValueKind::PyConst(value),
            ty: PcType::PythonValue,
            span,
            origin: None,
        }
    }

    pub fn type_class(ty: PcType, span: Span) -> Self {
        Self {
            kind: ValueKind::TypeClass(ty.clone()),
            ty,
            span,
            origin: None,
        }
    }

    pub fn callable(callable: CallableRef, span: Span) -> Self {
        Self {
            kind: ValueKind::Callable(callable),
            ty: PcType::PythonValue,
            span,
            origin: None,
        }
    }

    pub fn is_python_value(&self) -> bool {
        matches!(self.kind, ValueKind::PyConst(_))
    }

    pub fn python_value(&self) -> Option<&PyValue> {
        match &self.kind {
            ValueKind::PyConst(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_address(&self) -> bool {
        matches!(self.kind, ValueKind::Address(_))
    }

    pub fn as_type(&self) -> Option<&PcType> {
        match &self.kind {
            ValueKind::TypeClass(ty) => Some(ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_constants_start_untyped() {
        let v = ValueRef::constant(PyValue::Int(42), Span::unknown());
        assert!(v.is_python_value());
        assert_eq!(v.ty, PcType::PythonValue);
        assert_eq!(v.python_value().and_then(PyValue::as_int), Some(42));
    }

    #[test]
    fn type_class_carries_the_type() {
        let v = ValueRef::type_class(PcType::int(32, true), Span::unknown());
        assert_eq!(v.as_type(), Some(&PcType::int(32, true)));
    }
}
