// C ABI classification for aggregate passing and returning.
// The builder consults this at every function declaration, return, and
// call; the lowering layers above never see sret or coerced types.

mod aarch64;
mod x86_64;

use crate::ir::types::TypeTable;
use crate::ir::IrType;

/// How a value crosses a call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassingKind {
    /// Pass or return the value as-is
    Direct,
    /// Bitcast to the coerced type on the boundary, unpack on the
    /// receiving side
    Coerce,
    /// Caller allocates; callee writes through an sret/byval pointer
    Indirect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: PassingKind,
    /// The register-friendly representation for `Coerce`; for a `Direct`
    /// empty-aggregate return this holds `void`
    pub coerced: Option<IrType>,
}

impl Classification {
    pub fn direct() -> Self {
        Self {
            kind: PassingKind::Direct,
            coerced: None,
        }
    }

    pub fn coerce(to: IrType) -> Self {
        Self {
            kind: PassingKind::Coerce,
            coerced: Some(to),
        }
    }

    pub fn indirect() -> Self {
        Self {
            kind: PassingKind::Indirect,
            coerced: None,
        }
    }
}

/// Supported target ABIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAbi {
    X86_64SysV,
    Aarch64Aapcs,
}

impl TargetAbi {
    /// The ABI of the machine the compiler itself runs on.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            TargetAbi::Aarch64Aapcs
        } else {
            TargetAbi::X86_64SysV
        }
    }

    pub fn triple(self) -> &'static str {
        match self {
            TargetAbi::X86_64SysV => "x86_64-unknown-linux-gnu",
            TargetAbi::Aarch64Aapcs => "aarch64-unknown-linux-gnu",
        }
    }

    pub fn classify_return(self, ty: &IrType, table: &dyn TypeTable) -> Classification {
        if !ty.is_aggregate() {
            return Classification::direct();
        }
        match self {
            TargetAbi::X86_64SysV => x86_64::classify(ty, table),
            TargetAbi::Aarch64Aapcs => aarch64::classify(ty, table),
        }
    }

    pub fn classify_argument(self, ty: &IrType, table: &dyn TypeTable) -> Classification {
        // Argument classification matches return classification on both
        // targets; Indirect means byval for arguments and sret for returns.
        self.classify_return(ty, table)
    }
}

/// Flatten an aggregate into (byte_offset, leaf_type) pairs, resolving
/// identified structs through the type table. Used by both classifiers.
pub(crate) fn flatten_leaves(
    ty: &IrType,
    table: &dyn TypeTable,
    offset: u64,
    out: &mut Vec<(u64, IrType)>,
) {
    match ty {
        IrType::Struct(fields) => {
            for (i, field) in fields.iter().enumerate() {
                let field_off = crate::ir::field_offset(fields, i, table);
                flatten_leaves(field, table, offset + field_off, out);
            }
        }
        IrType::Named(name) => {
            if let Some(fields) = table.struct_fields(name) {
                let owned: Vec<IrType> = fields.to_vec();
                for (i, field) in owned.iter().enumerate() {
                    let field_off = crate::ir::field_offset(&owned, i, table);
                    flatten_leaves(field, table, offset + field_off, out);
                }
            }
        }
        IrType::Array(n, elem) => {
            let stride = crate::ir::types::align_to(
                crate::ir::size_of(elem, table),
                crate::ir::align_of(elem, table),
            );
            for i in 0..*n {
                flatten_leaves(elem, table, offset + i * stride, out);
            }
        }
        other => out.push((offset, other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::NoNamedTypes;

    fn s(fields: Vec<IrType>) -> IrType {
        IrType::Struct(fields)
    }

    #[test]
    fn non_aggregates_are_direct() {
        let abi = TargetAbi::X86_64SysV;
        let t = NoNamedTypes;
        assert_eq!(
            abi.classify_return(&IrType::Int(32), &t),
            Classification::direct()
        );
        assert_eq!(
            abi.classify_return(&IrType::Double, &t),
            Classification::direct()
        );
        assert_eq!(
            abi.classify_return(&IrType::Int(8).ptr_to(), &t),
            Classification::direct()
        );
    }

    #[test]
    fn sysv_small_int_struct_coerces_to_i64() {
        // struct Point2D { i32 a; i32 b; } -> i64
        let t = NoNamedTypes;
        let c = TargetAbi::X86_64SysV.classify_return(&s(vec![IrType::Int(32); 2]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(c.coerced, Some(IrType::Int(64)));
    }

    #[test]
    fn sysv_two_eightbyte_int_struct() {
        let t = NoNamedTypes;
        let c = TargetAbi::X86_64SysV.classify_return(&s(vec![IrType::Int(64); 2]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(
            c.coerced,
            Some(IrType::Struct(vec![IrType::Int(64), IrType::Int(64)]))
        );
    }

    #[test]
    fn sysv_large_struct_is_indirect() {
        let t = NoNamedTypes;
        let c = TargetAbi::X86_64SysV.classify_return(&s(vec![IrType::Int(64); 3]), &t);
        assert_eq!(c.kind, PassingKind::Indirect);
    }

    #[test]
    fn sysv_float_pair_coerces_to_double() {
        let t = NoNamedTypes;
        let c = TargetAbi::X86_64SysV.classify_return(&s(vec![IrType::Float; 2]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(c.coerced, Some(IrType::Double));
    }

    #[test]
    fn sysv_double_pair_coerces_to_double_pair() {
        let t = NoNamedTypes;
        let c = TargetAbi::X86_64SysV.classify_return(&s(vec![IrType::Double; 2]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(
            c.coerced,
            Some(IrType::Struct(vec![IrType::Double, IrType::Double]))
        );
    }

    #[test]
    fn aarch64_hfa_returns_in_simd_registers() {
        let t = NoNamedTypes;
        for n in 1..=4u64 {
            let c = TargetAbi::Aarch64Aapcs
                .classify_return(&s(vec![IrType::Float; n as usize]), &t);
            assert_eq!(c.kind, PassingKind::Coerce, "HFA of {} floats", n);
            let expected = if n == 1 {
                IrType::Float
            } else {
                IrType::Array(n, Box::new(IrType::Float))
            };
            assert_eq!(c.coerced, Some(expected));
        }
    }

    #[test]
    fn aarch64_hfa_through_nested_structs() {
        // 2 x { float, float } = 4 floats, 16 bytes
        let t = NoNamedTypes;
        let inner = s(vec![IrType::Float; 2]);
        let outer = s(vec![inner.clone(), inner]);
        let c = TargetAbi::Aarch64Aapcs.classify_return(&outer, &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(c.coerced, Some(IrType::Array(4, Box::new(IrType::Float))));
    }

    #[test]
    fn aarch64_large_float_aggregate_is_indirect() {
        // 4 doubles are homogeneous, but 32 bytes exceeds the 16-byte
        // threshold, which is checked before the HFA test
        let t = NoNamedTypes;
        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![IrType::Double; 4]), &t);
        assert_eq!(c.kind, PassingKind::Indirect);
    }

    #[test]
    fn aarch64_five_floats_is_not_hfa() {
        let t = NoNamedTypes;
        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![IrType::Float; 5]), &t);
        // 20 bytes > 16 -> indirect
        assert_eq!(c.kind, PassingKind::Indirect);
    }

    #[test]
    fn aarch64_small_int_struct() {
        let t = NoNamedTypes;
        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![IrType::Int(32); 2]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(c.coerced, Some(IrType::Int(64)));

        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![IrType::Int(64), IrType::Int(32)]), &t);
        assert_eq!(c.kind, PassingKind::Coerce);
        assert_eq!(
            c.coerced,
            Some(IrType::Struct(vec![IrType::Int(64), IrType::Int(32)]))
        );
    }

    #[test]
    fn aarch64_empty_struct_returns_void() {
        let t = NoNamedTypes;
        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![]), &t);
        assert_eq!(c.kind, PassingKind::Direct);
        assert_eq!(c.coerced, Some(IrType::Void));
    }

    #[test]
    fn aarch64_large_struct_is_indirect() {
        let t = NoNamedTypes;
        let c = TargetAbi::Aarch64Aapcs.classify_return(&s(vec![IrType::Int(64); 3]), &t);
        assert_eq!(c.kind, PassingKind::Indirect);
    }
}
