// x86-64 System V classification: walk the aggregate in 8-byte
// eightbytes, classify each as INTEGER, SSE, or MEMORY, then pick the
// register representation.

use super::{flatten_leaves, Classification};
use crate::ir::types::TypeTable;
use crate::ir::{size_of, IrType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    None,
    Integer,
    Sse,
    Memory,
}

impl Class {
    /// Merge rule from the SysV spec: INTEGER wins over SSE, MEMORY wins
    /// over everything.
    fn merge(self, other: Class) -> Class {
        use Class::*;
        match (self, other) {
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            (Sse, _) | (_, Sse) => Sse,
            (None, c) => c,
        }
    }
}

pub(super) fn classify(ty: &IrType, table: &dyn TypeTable) -> Classification {
    let size = size_of(ty, table);
    if size == 0 {
        return Classification {
            kind: super::PassingKind::Direct,
            coerced: Some(IrType::Void),
        };
    }
    if size > 16 {
        return Classification::indirect();
    }

    let mut leaves = Vec::new();
    flatten_leaves(ty, table, 0, &mut leaves);

    let eightbyte_count = ((size + 7) / 8) as usize;
    let mut classes = vec![Class::None; eightbyte_count];

    for (offset, leaf) in &leaves {
        let leaf_size = size_of(leaf, table);
        if leaf_size == 0 {
            continue;
        }
        let leaf_class = match leaf {
            IrType::Float | IrType::Double | IrType::Half | IrType::BFloat => Class::Sse,
            IrType::Fp128 => Class::Memory,
            IrType::Int(_) | IrType::Ptr(_) | IrType::Func { .. } => Class::Integer,
            _ => Class::Memory,
        };
        let first = (offset / 8) as usize;
        let last = ((offset + leaf_size - 1) / 8) as usize;
        for idx in first..=last.min(eightbyte_count - 1) {
            classes[idx] = classes[idx].merge(leaf_class);
        }
    }

    if classes.iter().any(|c| *c == Class::Memory) {
        return Classification::indirect();
    }

    let repr = |class: Class, bytes: u64| match class {
        Class::Sse => IrType::Double,
        _ => IrType::Int((bytes * 8) as u32),
    };

    if eightbyte_count == 1 {
        let coerced = repr(classes[0], size);
        return Classification::coerce(coerced);
    }

    let first = repr(classes[0], 8);
    let second = repr(classes[1], size - 8);
    // Pure SSE pairs collapse into two doubles; pure INTEGER pairs keep
    // the exact trailing width.
    Classification::coerce(IrType::Struct(vec![first, second]))
}
