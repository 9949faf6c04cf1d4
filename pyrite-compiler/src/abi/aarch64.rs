// AArch64 AAPCS64 classification.
//
// Key rules for aggregates, in order:
// - empty struct: nothing to return
// - > 16 bytes: indirect via sret/byval pointer
// - HFA (homogeneous floating-point aggregate) of up to 4 same-type
//   floats, counted through nested structs: SIMD registers
// - otherwise coerce to iN or { i64, iM }

use super::Classification;
use crate::ir::types::TypeTable;
use crate::ir::{size_of, IrType};

pub(super) fn classify(ty: &IrType, table: &dyn TypeTable) -> Classification {
    let size = size_of(ty, table);

    if size == 0 {
        return Classification {
            kind: super::PassingKind::Direct,
            coerced: Some(IrType::Void),
        };
    }

    // > 16 bytes: always indirect; the HFA test only applies below this
    // threshold.
    if size > 16 {
        return Classification::indirect();
    }

    if let Some((base, count)) = check_hfa(ty, table) {
        if count <= 4 {
            return hfa_coercion(base, count);
        }
    }

    if size <= 8 {
        Classification::coerce(IrType::Int((size * 8) as u32))
    } else {
        Classification::coerce(IrType::Struct(vec![
            IrType::Int(64),
            IrType::Int(((size - 8) * 8) as u32),
        ]))
    }
}

fn hfa_coercion(base: IrType, count: u64) -> Classification {
    if count == 1 {
        Classification::coerce(base)
    } else {
        Classification::coerce(IrType::Array(count, Box::new(base)))
    }
}

/// Check whether a type is a homogeneous floating-point aggregate:
/// all leaves are the same float type, counted recursively through
/// nested structs. Returns (base_type, leaf_count).
fn check_hfa(ty: &IrType, table: &dyn TypeTable) -> Option<(IrType, u64)> {
    let fields: Vec<IrType> = match ty {
        IrType::Struct(fields) => fields.clone(),
        IrType::Named(name) => table.struct_fields(name)?.to_vec(),
        _ => return None,
    };
    if fields.is_empty() {
        return None;
    }

    let mut base: Option<IrType> = None;
    let mut count = 0u64;

    for field in &fields {
        match field {
            IrType::Float | IrType::Double => {
                match &base {
                    None => base = Some(field.clone()),
                    Some(b) if b == field => {}
                    Some(_) => return None,
                }
                count += 1;
            }
            IrType::Struct(_) | IrType::Named(_) => {
                let (nested_base, nested_count) = check_hfa(field, table)?;
                match &base {
                    None => base = Some(nested_base),
                    Some(b) if *b == nested_base => {}
                    Some(_) => return None,
                }
                count += nested_count;
            }
            // Any non-float element breaks the HFA
            _ => return None,
        }
    }

    base.map(|b| (b, count))
}
