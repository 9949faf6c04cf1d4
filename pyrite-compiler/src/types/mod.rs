// The surface type lattice: every type a compiled program can mention.
// Provides canonical names, mangling fragments, size/alignment, signedness,
// and linearity. LLVM lowering lives in `lower` and consults the registry
// for named aggregates.

mod lower;

pub use lower::lower_type;

use crate::registry::Registry;

/// Floating-point kinds supported by the lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F16,
    BF16,
    F32,
    F64,
    F128,
}

impl FloatKind {
    pub fn name(self) -> &'static str {
        match self {
            FloatKind::F16 => "f16",
            FloatKind::BF16 => "bf16",
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
            FloatKind::F128 => "f128",
        }
    }

    pub fn size_bytes(self) -> u64 {
        match self {
            FloatKind::F16 | FloatKind::BF16 => 2,
            FloatKind::F32 => 4,
            FloatKind::F64 => 8,
            FloatKind::F128 => 16,
        }
    }

    /// Rank used for float-to-float promotion
    pub fn rank(self) -> u32 {
        match self {
            FloatKind::F16 => 0,
            FloatKind::BF16 => 1,
            FloatKind::F32 => 2,
            FloatKind::F64 => 3,
            FloatKind::F128 => 4,
        }
    }
}

/// A compile-time value, as stored in `pyconst` types and suffixes
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    Int(i128),
    Float(f64),
    Str(String),
    Bool(bool),
    Tuple(Vec<PyValue>),
    Type(Box<PcType>),
    None,
}

impl PyValue {
    /// Symbol-safe fragment contributed to a mangled name: a type
    /// contributes its canonical name, a tuple its elements joined by `_`,
    /// an integer its decimal representation.
    pub fn mangle_fragment(&self) -> String {
        match self {
            PyValue::Int(v) => format!("{}", v),
            PyValue::Float(v) => format!("{}", v).replace(['.', '-'], "_"),
            PyValue::Str(s) => s.clone(),
            PyValue::Bool(b) => format!("{}", b),
            PyValue::Tuple(items) => items
                .iter()
                .map(PyValue::mangle_fragment)
                .collect::<Vec<_>>()
                .join("_"),
            PyValue::Type(ty) => ty.mangle_fragment(),
            PyValue::None => String::new(),
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            PyValue::Int(v) => Some(*v),
            PyValue::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            PyValue::Int(v) => *v != 0,
            PyValue::Float(v) => *v != 0.0,
            PyValue::Str(s) => !s.is_empty(),
            PyValue::Bool(b) => *b,
            PyValue::Tuple(items) => !items.is_empty(),
            PyValue::Type(_) => true,
            PyValue::None => false,
        }
    }
}

/// One field of a struct or union: `(field_name_or_None, field_type)`
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Option<String>,
    pub ty: PcType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PcType {
    Void,
    Bool,
    Char,
    Int {
        width: u32,
        signed: bool,
    },
    Float(FloatKind),
    /// `ptr[T]` or `ptr[T, d1, ..., dk]`; the dimensioned form decays
    /// equivalently to `ptr[array[T, d2...]]`
    Ptr {
        pointee: Box<PcType>,
        dims: Vec<u64>,
    },
    /// `array[T, d1, ..., dk]` with insertion-order dimensions
    Array {
        elem: Box<PcType>,
        dims: Vec<u64>,
    },
    /// Anonymous aggregate from `struct[...]` / `union[...]` annotations
    Struct {
        fields: Vec<Field>,
        union: bool,
    },
    /// User-registered aggregate (struct, union, or enum) by name;
    /// field lists live in the registry
    Named(String),
    Func {
        params: Vec<PcType>,
        ret: Box<PcType>,
    },
    Const(Box<PcType>),
    Volatile(Box<PcType>),
    Static(Box<PcType>),
    /// Tuple type paired with an established pure predicate; shares
    /// storage with `base`
    Refined {
        base: Box<PcType>,
        pred: String,
    },
    /// Zero-sized compile-time constant; participates in type identity
    /// but not in storage layout
    PyConst(PyValue),
    /// Hint for not-yet-typed literal values
    PythonValue,
}

impl PcType {
    pub fn int(width: u32, signed: bool) -> PcType {
        PcType::Int { width, signed }
    }

    pub fn ptr(pointee: PcType) -> PcType {
        PcType::Ptr {
            pointee: Box::new(pointee),
            dims: vec![],
        }
    }

    /// Strip qualifier wrappers (`const`, `volatile`, `static`), which do
    /// not change representation.
    pub fn unqualified(&self) -> &PcType {
        match self {
            PcType::Const(inner) | PcType::Volatile(inner) | PcType::Static(inner) => {
                inner.unqualified()
            }
            _ => self,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, PcType::Const(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self, PcType::Static(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.unqualified(), PcType::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.unqualified(),
            PcType::Int { .. } | PcType::Bool | PcType::Char
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.unqualified(), PcType::Float(_))
    }

    pub fn is_zero_sized(&self) -> bool {
        matches!(self.unqualified(), PcType::PyConst(_))
    }

    /// (width, signed) of an integer-like type
    pub fn int_info(&self) -> Option<(u32, bool)> {
        match self.unqualified() {
            PcType::Int { width, signed } => Some((*width, *signed)),
            PcType::Bool => Some((1, false)),
            PcType::Char => Some((8, true)),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.int_info().map(|(_, s)| s).unwrap_or(false)
    }

    /// Canonical textual name. Two types with equal canonical names are
    /// interchangeable, so every identity-relevant component appears here.
    pub fn canonical_name(&self) -> String {
        match self {
            PcType::Void => "void".into(),
            PcType::Bool => "bool".into(),
            PcType::Char => "char".into(),
            PcType::Int { width, signed } => {
                format!("{}{}", if *signed { "i" } else { "u" }, width)
            }
            PcType::Float(kind) => kind.name().into(),
            PcType::Ptr { pointee, dims } => {
                if dims.is_empty() {
                    format!("ptr[{}]", pointee.canonical_name())
                } else {
                    let d: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                    format!("ptr[{}, {}]", pointee.canonical_name(), d.join(", "))
                }
            }
            PcType::Array { elem, dims } => {
                let d: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                format!("array[{}, {}]", elem.canonical_name(), d.join(", "))
            }
            PcType::Struct { fields, union } => {
                let keyword = if *union { "union" } else { "struct" };
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|f| match &f.name {
                        Some(name) => format!("{}: {}", name, f.ty.canonical_name()),
                        None => f.ty.canonical_name(),
                    })
                    .collect();
                format!("{}[{}]", keyword, rendered.join(", "))
            }
            PcType::Named(name) => name.clone(),
            PcType::Func { params, ret } => {
                let p: Vec<String> = params.iter().map(|t| t.canonical_name()).collect();
                format!("func[({}), {}]", p.join(", "), ret.canonical_name())
            }
            PcType::Const(inner) => format!("const[{}]", inner.canonical_name()),
            PcType::Volatile(inner) => format!("volatile[{}]", inner.canonical_name()),
            PcType::Static(inner) => format!("static[{}]", inner.canonical_name()),
            PcType::Refined { base, pred } => {
                format!("refined[{}, {}]", base.canonical_name(), pred)
            }
            PcType::PyConst(value) => format!("pyconst[{}]", value.mangle_fragment()),
            PcType::PythonValue => "pyvalue".into(),
        }
    }

    /// Symbol-safe fragment for mangled names.
    pub fn mangle_fragment(&self) -> String {
        match self {
            PcType::Ptr { pointee, .. } => format!("ptr_{}", pointee.mangle_fragment()),
            PcType::Array { elem, dims } => {
                let d: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                format!("arr{}_{}", d.join("x"), elem.mangle_fragment())
            }
            PcType::Struct { fields, union } => {
                let keyword = if *union { "union" } else { "struct" };
                let rendered: Vec<String> =
                    fields.iter().map(|f| f.ty.mangle_fragment()).collect();
                format!("{}_{}", keyword, rendered.join("_"))
            }
            PcType::Func { params, ret } => {
                let p: Vec<String> = params.iter().map(|t| t.mangle_fragment()).collect();
                format!("fn_{}_{}", p.join("_"), ret.mangle_fragment())
            }
            PcType::Const(inner) | PcType::Volatile(inner) | PcType::Static(inner) => {
                inner.mangle_fragment()
            }
            PcType::Refined { base, .. } => base.mangle_fragment(),
            PcType::PyConst(value) => value.mangle_fragment(),
            _ => self.canonical_name(),
        }
    }

    /// Whether values of this type carry a linear token. Named aggregates
    /// consult their registry entry.
    pub fn is_linear(&self, registry: &Registry) -> bool {
        match self.unqualified() {
            PcType::Named(name) => registry
                .aggregate(name)
                .map(|info| info.linear)
                .unwrap_or(false),
            PcType::Refined { base, .. } => base.is_linear(registry),
            _ => false,
        }
    }

    /// Natural C size in bytes, ignoring `pyconst` fields.
    pub fn size_bytes(&self, registry: &Registry) -> u64 {
        match self.unqualified() {
            PcType::Void => 0,
            PcType::Bool | PcType::Char => 1,
            PcType::Int { width, .. } => ((*width as u64) + 7) / 8,
            PcType::Float(kind) => kind.size_bytes(),
            PcType::Ptr { .. } | PcType::Func { .. } => 8,
            PcType::Array { elem, dims } => {
                let count: u64 = dims.iter().product();
                let stride = crate::ir::types::align_to(
                    elem.size_bytes(registry),
                    elem.align_bytes(registry),
                );
                stride * count
            }
            PcType::Struct { fields, union } => {
                aggregate_layout(fields, *union, registry).0
            }
            PcType::Named(name) => registry
                .aggregate(name)
                .map(|info| info.size_bytes(registry))
                .unwrap_or(0),
            PcType::Refined { base, .. } => base.size_bytes(registry),
            PcType::PyConst(_) => 0,
            PcType::PythonValue => 0,
            PcType::Const(_) | PcType::Volatile(_) | PcType::Static(_) => 0,
        }
    }

    pub fn align_bytes(&self, registry: &Registry) -> u64 {
        match self.unqualified() {
            PcType::Void | PcType::PyConst(_) | PcType::PythonValue => 1,
            PcType::Bool | PcType::Char => 1,
            PcType::Int { width, .. } => {
                (((*width as u64) + 7) / 8).next_power_of_two().min(16).max(1)
            }
            PcType::Float(kind) => kind.size_bytes(),
            PcType::Ptr { .. } | PcType::Func { .. } => 8,
            PcType::Array { elem, .. } => elem.align_bytes(registry),
            PcType::Struct { fields, union } => {
                aggregate_layout(fields, *union, registry).1
            }
            PcType::Named(name) => registry
                .aggregate(name)
                .map(|info| info.align_bytes(registry))
                .unwrap_or(1),
            PcType::Refined { base, .. } => base.align_bytes(registry),
            PcType::Const(_) | PcType::Volatile(_) | PcType::Static(_) => 1,
        }
    }
}

/// (size, align) of a struct or union body with natural C layout,
/// skipping zero-sized `pyconst` fields.
pub fn aggregate_layout(fields: &[Field], union: bool, registry: &Registry) -> (u64, u64) {
    let mut size = 0u64;
    let mut max_align = 1u64;
    for field in fields {
        if field.ty.is_zero_sized() {
            continue;
        }
        let align = field.ty.align_bytes(registry);
        let field_size = field.ty.size_bytes(registry);
        max_align = max_align.max(align);
        if union {
            size = size.max(field_size);
        } else {
            size = crate::ir::types::align_to(size, align) + field_size;
        }
    }
    (crate::ir::types::align_to(size, max_align), max_align)
}

/// Lookup table for the builtin scalar type names.
pub fn builtin_scalar(name: &str) -> Option<PcType> {
    let ty = match name {
        "void" => PcType::Void,
        "bool" => PcType::Bool,
        "char" => PcType::Char,
        "i8" => PcType::int(8, true),
        "i16" => PcType::int(16, true),
        "i32" => PcType::int(32, true),
        "i64" => PcType::int(64, true),
        "u8" => PcType::int(8, false),
        "u16" => PcType::int(16, false),
        "u32" => PcType::int(32, false),
        "u64" => PcType::int(64, false),
        "f16" => PcType::Float(FloatKind::F16),
        "bf16" => PcType::Float(FloatKind::BF16),
        "f32" => PcType::Float(FloatKind::F32),
        "f64" => PcType::Float(FloatKind::F64),
        "f128" => PcType::Float(FloatKind::F128),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn canonical_names_are_stable() {
        assert_eq!(PcType::int(32, true).canonical_name(), "i32");
        assert_eq!(PcType::int(64, false).canonical_name(), "u64");
        assert_eq!(
            PcType::ptr(PcType::int(32, true)).canonical_name(),
            "ptr[i32]"
        );
        let arr = PcType::Array {
            elem: Box::new(PcType::int(8, false)),
            dims: vec![3, 4],
        };
        assert_eq!(arr.canonical_name(), "array[u8, 3, 4]");
    }

    #[test]
    fn named_field_struct_identity() {
        let a = PcType::Struct {
            fields: vec![
                Field {
                    name: Some("x".into()),
                    ty: PcType::int(32, true),
                },
                Field {
                    name: Some("y".into()),
                    ty: PcType::Float(FloatKind::F64),
                },
            ],
            union: false,
        };
        assert_eq!(a.canonical_name(), "struct[x: i32, y: f64]");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn sizes_match_c_layout() {
        let registry = Registry::new();
        let s = PcType::Struct {
            fields: vec![
                Field {
                    name: Some("a".into()),
                    ty: PcType::int(8, true),
                },
                Field {
                    name: Some("b".into()),
                    ty: PcType::int(32, true),
                },
            ],
            union: false,
        };
        assert_eq!(s.size_bytes(&registry), 8);
        assert_eq!(s.align_bytes(&registry), 4);
    }

    #[test]
    fn pyconst_fields_are_elided_from_layout() {
        let registry = Registry::new();
        let s = PcType::Struct {
            fields: vec![
                Field {
                    name: Some("n".into()),
                    ty: PcType::PyConst(PyValue::Int(7)),
                },
                Field {
                    name: Some("v".into()),
                    ty: PcType::int(64, true),
                },
            ],
            union: false,
        };
        assert_eq!(s.size_bytes(&registry), 8);
        // but pyconst participates in identity
        assert!(s.canonical_name().contains("pyconst[7]"));
    }

    #[test]
    fn union_size_is_max_member() {
        let registry = Registry::new();
        let u = PcType::Struct {
            fields: vec![
                Field {
                    name: Some("i".into()),
                    ty: PcType::int(32, true),
                },
                Field {
                    name: Some("d".into()),
                    ty: PcType::Float(FloatKind::F64),
                },
            ],
            union: true,
        };
        assert_eq!(u.size_bytes(&registry), 8);
        assert_eq!(u.align_bytes(&registry), 8);
    }

    #[test]
    fn mangle_fragments_are_symbol_safe() {
        let ty = PcType::ptr(PcType::int(8, false));
        assert_eq!(ty.mangle_fragment(), "ptr_u8");
        let tup = PyValue::Tuple(vec![
            PyValue::Type(Box::new(PcType::int(32, true))),
            PyValue::Int(4),
        ]);
        assert_eq!(tup.mangle_fragment(), "i32_4");
    }

    #[test]
    fn qualifier_wrappers_share_representation() {
        let inner = PcType::int(32, true);
        let c = PcType::Const(Box::new(inner.clone()));
        assert_eq!(c.unqualified(), &inner);
        assert!(c.is_const());
        assert_eq!(c.canonical_name(), "const[i32]");
    }
}
