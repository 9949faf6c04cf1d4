// PC type -> LLVM type lowering. Named aggregates are installed into the
// module's identified-struct table with a two-stage strategy so cyclic
// references (struct Node { next: ptr[Node] }) terminate.

use super::{FloatKind, PcType};
use crate::ir::{self, IrType};
use crate::registry::{AggregateKind, Registry};

pub fn lower_type(ty: &PcType, registry: &Registry, module: &mut ir::Module) -> IrType {
    match ty.unqualified() {
        PcType::Void => IrType::Void,
        PcType::Bool => IrType::Int(1),
        PcType::Char => IrType::Int(8),
        PcType::Int { width, .. } => IrType::Int(*width),
        PcType::Float(kind) => lower_float(*kind),
        PcType::Ptr { pointee, dims } => {
            if pointee.is_void() {
                // void* is modeled as i8*
                return IrType::Int(8).ptr_to();
            }
            let elem = lower_type(pointee, registry, module);
            if dims.len() > 1 {
                // ptr[T, d1, d2...] decays to ptr[array[T, d2...]]
                let inner = dims[1..]
                    .iter()
                    .rev()
                    .fold(elem, |acc, &d| IrType::Array(d, Box::new(acc)));
                inner.ptr_to()
            } else {
                elem.ptr_to()
            }
        }
        PcType::Array { elem, dims } => {
            let elem_ty = lower_type(elem, registry, module);
            dims.iter()
                .rev()
                .fold(elem_ty, |acc, &d| IrType::Array(d, Box::new(acc)))
        }
        PcType::Struct { fields, union } => {
            if *union {
                lower_union_body(fields, registry, module)
            } else {
                let lowered: Vec<IrType> = fields
                    .iter()
                    .filter(|f| !f.ty.is_zero_sized())
                    .map(|f| lower_type(&f.ty, registry, module))
                    .collect();
                IrType::Struct(lowered)
            }
        }
        PcType::Named(name) => lower_named(name, registry, module),
        PcType::Func { params, ret } => {
            let param_tys: Vec<IrType> = params
                .iter()
                .map(|p| lower_type(p, registry, module))
                .collect();
            let ret_ty = lower_type(ret, registry, module);
            IrType::Func {
                params: param_tys,
                ret: Box::new(ret_ty),
                var_arg: false,
            }
            .ptr_to()
        }
        PcType::Refined { base, .. } => lower_type(base, registry, module),
        // Zero-sized compile-time values have no runtime representation;
        // callers must elide them before lowering.
        PcType::PyConst(_) | PcType::PythonValue => IrType::Void,
        PcType::Const(_) | PcType::Volatile(_) | PcType::Static(_) => IrType::Void,
    }
}

fn lower_float(kind: FloatKind) -> IrType {
    match kind {
        FloatKind::F16 => IrType::Half,
        FloatKind::BF16 => IrType::BFloat,
        FloatKind::F32 => IrType::Float,
        FloatKind::F64 => IrType::Double,
        FloatKind::F128 => IrType::Fp128,
    }
}

/// A union is represented as its largest member plus trailing padding
/// bytes, which keeps the member's natural alignment.
fn lower_union_body(
    fields: &[super::Field],
    registry: &Registry,
    module: &mut ir::Module,
) -> IrType {
    let mut largest: Option<(&super::Field, u64)> = None;
    for field in fields {
        if field.ty.is_zero_sized() {
            continue;
        }
        let size = field.ty.size_bytes(registry);
        if largest.map(|(_, s)| size > s).unwrap_or(true) {
            largest = Some((field, size));
        }
    }
    match largest {
        Some((field, size)) => {
            let member = lower_type(&field.ty, registry, module);
            let (layout_size, _) = super::aggregate_layout(fields, true, registry);
            let pad = layout_size.saturating_sub(size);
            if pad == 0 {
                IrType::Struct(vec![member])
            } else {
                IrType::Struct(vec![member, IrType::Array(pad, Box::new(IrType::Int(8)))])
            }
        }
        None => IrType::Struct(vec![]),
    }
}

fn lower_named(name: &str, registry: &Registry, module: &mut ir::Module) -> IrType {
    use crate::ir::types::TypeTable;
    if module.struct_fields(name).is_some() {
        return IrType::Named(name.to_string());
    }
    // Opaque handle already installed: definition is in progress higher up
    // the stack (cyclic reference); the Named handle is enough.
    if module.struct_types.iter().any(|(n, _)| n == name) {
        return IrType::Named(name.to_string());
    }

    module.declare_struct(name);

    let Some(info) = registry.aggregate(name) else {
        return IrType::Named(name.to_string());
    };

    let body = match &info.kind {
        AggregateKind::Struct => {
            let lowered: Vec<IrType> = info
                .fields
                .iter()
                .filter(|f| !f.ty.is_zero_sized())
                .map(|f| lower_type(&f.ty, registry, module))
                .collect();
            lowered
        }
        AggregateKind::Union => {
            match lower_union_body(&info.fields, registry, module) {
                IrType::Struct(fields) => fields,
                other => vec![other],
            }
        }
        AggregateKind::Enum { tag } => {
            let tag_ty = lower_type(tag, registry, module);
            let payload_size = info.payload_size(registry);
            if payload_size == 0 {
                vec![tag_ty]
            } else {
                vec![tag_ty, IrType::Array(payload_size, Box::new(IrType::Int(8)))]
            }
        }
    };

    module.define_struct(name, body);
    IrType::Named(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AggregateInfo, AggregateKind};
    use crate::types::Field;
    use crate::ir::types::TypeTable;

    #[test]
    fn scalar_lowering() {
        let registry = Registry::new();
        let mut module = ir::Module::new("t", "");
        assert_eq!(
            lower_type(&PcType::int(32, true), &registry, &mut module),
            IrType::Int(32)
        );
        assert_eq!(
            lower_type(&PcType::Bool, &registry, &mut module),
            IrType::Int(1)
        );
        assert_eq!(
            lower_type(&PcType::Float(FloatKind::F32), &registry, &mut module),
            IrType::Float
        );
    }

    #[test]
    fn multidim_array_nests_rightmost_inner() {
        let registry = Registry::new();
        let mut module = ir::Module::new("t", "");
        let ty = PcType::Array {
            elem: Box::new(PcType::int(32, true)),
            dims: vec![3, 4],
        };
        assert_eq!(
            lower_type(&ty, &registry, &mut module).to_string(),
            "[3 x [4 x i32]]"
        );
    }

    #[test]
    fn dimensioned_pointer_decays() {
        let registry = Registry::new();
        let mut module = ir::Module::new("t", "");
        let ty = PcType::Ptr {
            pointee: Box::new(PcType::int(8, false)),
            dims: vec![5, 7],
        };
        assert_eq!(
            lower_type(&ty, &registry, &mut module).to_string(),
            "[7 x i8]*"
        );
    }

    #[test]
    fn cyclic_struct_terminates() {
        let mut registry = Registry::new();
        registry.install_aggregate(AggregateInfo {
            name: "Node".into(),
            kind: AggregateKind::Struct,
            fields: vec![
                Field {
                    name: Some("value".into()),
                    ty: PcType::int(32, true),
                },
                Field {
                    name: Some("next".into()),
                    ty: PcType::ptr(PcType::Named("Node".into())),
                },
            ],
            variants: vec![],
            linear: false,
        });
        let mut module = ir::Module::new("t", "");
        let lowered = lower_type(&PcType::Named("Node".into()), &registry, &mut module);
        assert_eq!(lowered, IrType::Named("Node".into()));
        assert_eq!(
            module.struct_fields("Node"),
            Some(&[IrType::Int(32), IrType::Named("Node".into()).ptr_to()][..])
        );
    }

    #[test]
    fn enum_lowers_to_tag_plus_payload_bytes() {
        let mut registry = Registry::new();
        registry.install_aggregate(AggregateInfo {
            name: "Status".into(),
            kind: AggregateKind::Enum {
                tag: PcType::int(8, true),
            },
            fields: vec![],
            variants: vec![
                crate::registry::VariantInfo {
                    name: "Ok".into(),
                    payload: Some(PcType::int(32, true)),
                    tag: 0,
                },
                crate::registry::VariantInfo {
                    name: "Empty".into(),
                    payload: None,
                    tag: 1,
                },
            ],
            linear: false,
        });
        let mut module = ir::Module::new("t", "");
        lower_type(&PcType::Named("Status".into()), &registry, &mut module);
        assert_eq!(
            module.struct_fields("Status"),
            Some(&[IrType::Int(8), IrType::Array(4, Box::new(IrType::Int(8)))][..])
        );
    }
}
