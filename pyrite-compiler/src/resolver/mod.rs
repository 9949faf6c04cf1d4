// Annotation resolver: turns annotation expression trees into type
// lattice entries. Resolution is pure and idempotent; resolving the same
// subtree twice yields the same entry.

use pyrite_ast::{Expr, ExprKind};
use pyrite_diagnostics::{codes, Category, Diagnostic, Span as DiagSpan};

use crate::registry::{Registry, VarRegistry};
use crate::types::{builtin_scalar, Field, FloatKind, PcType, PyValue};

pub struct TypeResolver<'a> {
    registry: &'a Registry,
    file: &'a str,
}

impl<'a> TypeResolver<'a> {
    pub fn new(registry: &'a Registry, file: &'a str) -> Self {
        Self { registry, file }
    }

    fn bad(&self, message: String, expr: &Expr) -> Diagnostic {
        Diagnostic::error(
            Category::Annotation,
            codes::BAD_ANNOTATION,
            message,
            DiagSpan::new(
                self.file.to_string(),
                expr.span.line,
                expr.span.column,
                expr.span.length.max(1),
            ),
        )
    }

    /// Resolve an annotation expression into a lattice entry.
    /// `vars` enables `typeof(name)` against the active scopes.
    pub fn resolve(&self, expr: &Expr, vars: Option<&VarRegistry>) -> Result<PcType, Diagnostic> {
        match &expr.kind {
            ExprKind::Name(name) => self.resolve_name(name, expr),
            ExprKind::Subscript { value, index } => self.resolve_subscript(value, index, vars, expr),
            ExprKind::Call { func, args, .. } => {
                if func.dotted_path().as_deref() == Some("typeof") {
                    return self.resolve_typeof(args, vars, expr);
                }
                Err(self.bad("only typeof(...) calls are allowed in annotations".into(), expr))
            }
            ExprKind::NoneLit => Ok(PcType::Void),
            _ => Err(self.bad("malformed type annotation".into(), expr)),
        }
    }

    fn resolve_name(&self, name: &str, expr: &Expr) -> Result<PcType, Diagnostic> {
        if let Some(ty) = builtin_scalar(name) {
            return Ok(ty);
        }
        if self.registry.has_aggregate(name) {
            return Ok(PcType::Named(name.to_string()));
        }
        let candidates: Vec<String> = [
            "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f16", "bf16", "f32", "f64",
            "f128", "bool", "char", "void",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(self.registry.aggregate_names().map(|s| s.to_string()))
        .collect();
        let refs: Vec<&str> = candidates.iter().map(|s| s.as_str()).collect();
        let mut diag = self.bad(format!("unknown type name `{}`", name), expr);
        diag.code = codes::UNKNOWN_TYPE.to_string();
        if let Some(best) = pyrite_diagnostics::closest_matches(name, refs, 1).first() {
            diag = diag.with_help(format!("did you mean `{}`?", best));
        }
        Err(diag)
    }

    fn resolve_subscript(
        &self,
        value: &Expr,
        index: &Expr,
        vars: Option<&VarRegistry>,
        whole: &Expr,
    ) -> Result<PcType, Diagnostic> {
        let Some(head) = value.dotted_path() else {
            return Err(self.bad("malformed subscript annotation".into(), whole));
        };

        let items = subscript_items(index);

        match head.as_str() {
            "ptr" => {
                if items.is_empty() {
                    return Err(self.bad("ptr[...] needs a pointee type".into(), whole));
                }
                let pointee = self.resolve(items[0], vars)?;
                let dims = self.int_dims(&items[1..], whole)?;
                Ok(PcType::Ptr {
                    pointee: Box::new(pointee),
                    dims,
                })
            }
            "array" => {
                if items.len() < 2 {
                    return Err(
                        self.bad("array[T, dims...] needs at least one dimension".into(), whole)
                    );
                }
                let elem = self.resolve(items[0], vars)?;
                let dims = self.int_dims(&items[1..], whole)?;
                Ok(PcType::Array {
                    elem: Box::new(elem),
                    dims,
                })
            }
            "struct" | "union" => {
                let fields = self.resolve_fields(&items, vars, whole)?;
                Ok(PcType::Struct {
                    fields,
                    union: head == "union",
                })
            }
            "func" => {
                if items.len() != 2 {
                    return Err(
                        self.bad("func[(params...), return_type] takes two arguments".into(), whole)
                    );
                }
                let params = match &items[0].kind {
                    ExprKind::Tuple(elts) => elts
                        .iter()
                        .map(|e| self.resolve(e, vars))
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => vec![self.resolve(items[0], vars)?],
                };
                let ret = self.resolve(items[1], vars)?;
                Ok(PcType::Func {
                    params,
                    ret: Box::new(ret),
                })
            }
            "const" => Ok(PcType::Const(Box::new(self.one_arg(&items, vars, whole)?))),
            "volatile" => Ok(PcType::Volatile(Box::new(self.one_arg(&items, vars, whole)?))),
            "static" => Ok(PcType::Static(Box::new(self.one_arg(&items, vars, whole)?))),
            "refined" => {
                if items.len() != 2 {
                    return Err(self.bad("refined[T, predicate] takes two arguments".into(), whole));
                }
                let base = self.resolve(items[0], vars)?;
                let pred = items[1]
                    .dotted_path()
                    .ok_or_else(|| self.bad("refinement predicate must be a name".into(), whole))?;
                Ok(PcType::Refined {
                    base: Box::new(base),
                    pred,
                })
            }
            "pyconst" => {
                if items.len() != 1 {
                    return Err(self.bad("pyconst[value] takes one argument".into(), whole));
                }
                let value = self.const_value(items[0], whole)?;
                Ok(PcType::PyConst(value))
            }
            "typeof" => {
                if items.len() != 1 {
                    return Err(self.bad("typeof[expr] takes one argument".into(), whole));
                }
                self.resolve_typeof(std::slice::from_ref(items[0]), vars, whole)
            }
            _ => Err(self.bad(format!("`{}` is not subscriptable in annotations", head), whole)),
        }
    }

    fn one_arg(
        &self,
        items: &[&Expr],
        vars: Option<&VarRegistry>,
        whole: &Expr,
    ) -> Result<PcType, Diagnostic> {
        if items.len() != 1 {
            return Err(self.bad("qualifier takes exactly one type argument".into(), whole));
        }
        self.resolve(items[0], vars)
    }

    fn resolve_typeof(
        &self,
        args: &[impl std::borrow::Borrow<Expr>],
        vars: Option<&VarRegistry>,
        whole: &Expr,
    ) -> Result<PcType, Diagnostic> {
        let [arg] = args else {
            return Err(self.bad("typeof takes exactly one argument".into(), whole));
        };
        let arg = arg.borrow();
        if let ExprKind::Name(name) = &arg.kind {
            if let Some(info) = vars.and_then(|v| v.lookup(name)) {
                return Ok(info.value.ty.clone());
            }
        }
        Err(self.bad("typeof argument must be a variable in scope".into(), whole))
    }

    /// Resolve struct/union field items. Both positional and `name: T`
    /// forms are recognized; mixing is allowed; duplicate names are a
    /// diagnostic.
    fn resolve_fields(
        &self,
        items: &[&Expr],
        vars: Option<&VarRegistry>,
        whole: &Expr,
    ) -> Result<Vec<Field>, Diagnostic> {
        let mut fields = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for item in items {
            match &item.kind {
                ExprKind::Slice {
                    lower: Some(lower),
                    upper: Some(upper),
                } => {
                    let name = match &lower.kind {
                        ExprKind::Name(n) => n.clone(),
                        ExprKind::Str(s) => s.clone(),
                        _ => {
                            return Err(self.bad(
                                "field name must be an identifier or string".into(),
                                whole,
                            ))
                        }
                    };
                    if !seen.insert(name.clone()) {
                        let mut diag =
                            self.bad(format!("duplicate field name `{}`", name), whole);
                        diag.code = codes::DUPLICATE_FIELD.to_string();
                        return Err(diag);
                    }
                    let ty = self.resolve(upper, vars)?;
                    fields.push(Field {
                        name: Some(name),
                        ty,
                    });
                }
                _ => {
                    let ty = self.resolve(item, vars)?;
                    fields.push(Field { name: None, ty });
                }
            }
        }
        Ok(fields)
    }

    fn int_dims(&self, items: &[&Expr], whole: &Expr) -> Result<Vec<u64>, Diagnostic> {
        items
            .iter()
            .map(|item| match &item.kind {
                ExprKind::Int(v) if *v >= 0 => Ok(*v as u64),
                _ => Err(self.bad("dimensions must be non-negative integer literals".into(), whole)),
            })
            .collect()
    }

    /// A compile-time constant inside an annotation.
    fn const_value(&self, expr: &Expr, whole: &Expr) -> Result<PyValue, Diagnostic> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(PyValue::Int(*v)),
            ExprKind::Float(v) => Ok(PyValue::Float(*v)),
            ExprKind::Str(s) => Ok(PyValue::Str(s.clone())),
            ExprKind::Bool(b) => Ok(PyValue::Bool(*b)),
            ExprKind::Tuple(items) => Ok(PyValue::Tuple(
                items
                    .iter()
                    .map(|i| self.const_value(i, whole))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ExprKind::Name(_) | ExprKind::Subscript { .. } => {
                let ty = self.resolve(expr, None)?;
                Ok(PyValue::Type(Box::new(ty)))
            }
            _ => Err(self.bad("pyconst value must be a literal".into(), whole)),
        }
    }
}

/// Items of a subscript index: a tuple flattens to its elements, anything
/// else is a single item.
pub fn subscript_items(index: &Expr) -> Vec<&Expr> {
    match &index.kind {
        ExprKind::Tuple(items) => items.iter().collect(),
        _ => vec![index],
    }
}

/// Convenience alias used by sizeof() and the collection pass.
pub fn float_kind_of(ty: &PcType) -> Option<FloatKind> {
    match ty.unqualified() {
        PcType::Float(kind) => Some(*kind),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_parser::parse_module;

    fn annotation_of(source: &str) -> Expr {
        // parse `x: <annotation>` and pull the annotation back out
        let module = parse_module("t.pyr", &format!("x: {}\n", source)).expect("parse");
        match &module.body[0].kind {
            pyrite_ast::StmtKind::AnnAssign { annotation, .. } => annotation.clone(),
            _ => panic!("expected annotated declaration"),
        }
    }

    fn resolve(source: &str) -> PcType {
        let registry = Registry::new();
        let resolver = TypeResolver::new(&registry, "t.pyr");
        resolver
            .resolve(&annotation_of(source), None)
            .expect("resolve failed")
    }

    #[test]
    fn scalars() {
        assert_eq!(resolve("i32"), PcType::int(32, true));
        assert_eq!(resolve("u8"), PcType::int(8, false));
        assert_eq!(resolve("f64"), PcType::Float(FloatKind::F64));
    }

    #[test]
    fn nested_subscripts() {
        let ty = resolve("ptr[array[i32, 3, 4]]");
        assert_eq!(ty.canonical_name(), "ptr[array[i32, 3, 4]]");
    }

    #[test]
    fn named_and_positional_fields_mix() {
        let ty = resolve("struct[i32, y: f64]");
        let PcType::Struct { fields, union } = ty else {
            panic!("expected struct");
        };
        assert!(!union);
        assert_eq!(fields[0].name, None);
        assert_eq!(fields[1].name.as_deref(), Some("y"));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let registry = Registry::new();
        let resolver = TypeResolver::new(&registry, "t.pyr");
        let err = resolver
            .resolve(&annotation_of("struct[x: i32, x: i32]"), None)
            .unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE_FIELD);
    }

    #[test]
    fn func_type_with_params() {
        let ty = resolve("func[(i32, i32), i32]");
        assert_eq!(ty.canonical_name(), "func[(i32, i32), i32]");
    }

    #[test]
    fn pyconst_values() {
        assert_eq!(resolve("pyconst[7]"), PcType::PyConst(PyValue::Int(7)));
        let ty = resolve("pyconst[(i32, 4)]");
        assert_eq!(
            ty,
            PcType::PyConst(PyValue::Tuple(vec![
                PyValue::Type(Box::new(PcType::int(32, true))),
                PyValue::Int(4),
            ]))
        );
    }

    #[test]
    fn unknown_name_suggests_close_match() {
        let registry = Registry::new();
        let resolver = TypeResolver::new(&registry, "t.pyr");
        let err = resolver.resolve(&annotation_of("i33"), None).unwrap_err();
        assert_eq!(err.code, codes::UNKNOWN_TYPE);
    }

    #[test]
    fn resolution_is_idempotent() {
        let expr = annotation_of("ptr[struct[x: i32, y: f64], 4]");
        let registry = Registry::new();
        let resolver = TypeResolver::new(&registry, "t.pyr");
        let a = resolver.resolve(&expr, None).expect("first");
        let b = resolver.resolve(&expr, None).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn qualifiers() {
        assert_eq!(resolve("const[i32]").canonical_name(), "const[i32]");
        assert_eq!(resolve("static[u64]").canonical_name(), "static[u64]");
    }
}
