// Unified registry: user aggregates, function instances by mangled name,
// link objects, and the variable scope stack. One registry per
// compilation unit; nothing here is process-global.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use pyrite_ast::FuncDef;

use crate::linear::LinearMap;
use crate::types::{Field, PcType};
use crate::value::ValueRef;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateKind {
    Struct,
    Union,
    Enum { tag: PcType },
}

/// One `(variant_name, payload_type_or_void, tag_value)` triple of an enum
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub name: String,
    pub payload: Option<PcType>,
    pub tag: i128,
}

/// A user-registered struct, union, or enum
#[derive(Debug, Clone)]
pub struct AggregateInfo {
    pub name: String,
    pub kind: AggregateKind,
    pub fields: Vec<Field>,
    pub variants: Vec<VariantInfo>,
    pub linear: bool,
}

impl AggregateInfo {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    /// LLVM field index: `pyconst` fields occupy no storage, so indices
    /// shift past them.
    pub fn llvm_field_index(&self, name: &str) -> Option<u32> {
        let mut llvm_index = 0u32;
        for field in &self.fields {
            if field.name.as_deref() == Some(name) {
                return if field.ty.is_zero_sized() {
                    None
                } else {
                    Some(llvm_index)
                };
            }
            if !field.ty.is_zero_sized() {
                llvm_index += 1;
            }
        }
        None
    }

    pub fn variant(&self, name: &str) -> Option<&VariantInfo> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn size_bytes(&self, registry: &Registry) -> u64 {
        match &self.kind {
            AggregateKind::Struct => {
                crate::types::aggregate_layout(&self.fields, false, registry).0
            }
            AggregateKind::Union => {
                crate::types::aggregate_layout(&self.fields, true, registry).0
            }
            AggregateKind::Enum { tag } => {
                let tag_size = tag.size_bytes(registry);
                let payload = self.payload_size(registry);
                let align = self.align_bytes(registry);
                crate::ir::types::align_to(tag_size + payload, align)
            }
        }
    }

    pub fn align_bytes(&self, registry: &Registry) -> u64 {
        match &self.kind {
            AggregateKind::Struct | AggregateKind::Union => {
                crate::types::aggregate_layout(
                    &self.fields,
                    matches!(self.kind, AggregateKind::Union),
                    registry,
                )
                .1
            }
            AggregateKind::Enum { tag } => tag.align_bytes(registry).max(1),
        }
    }

    /// Max payload size across enum variants.
    pub fn payload_size(&self, registry: &Registry) -> u64 {
        self.variants
            .iter()
            .filter_map(|v| v.payload.as_ref())
            .map(|p| p.size_bytes(registry))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Emits a real function
    Compile,
    /// Body inlined at each call site
    Inline,
    /// Declaration only; symbol comes from a library or linked object
    Extern,
    /// Yield function, inlined as a state machine at for sites
    Generator,
}

/// Everything known about one function instance (one mangled name)
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub unmangled: String,
    pub mangled: String,
    pub param_names: Vec<String>,
    pub param_types: Vec<PcType>,
    pub return_type: PcType,
    pub kind: FunctionKind,
    /// Capability name -> implementation mangled name, fixed at lowering
    pub effect_bindings: HashMap<String, String>,
    /// Library for extern functions (`Some("")` means directly linked
    /// objects)
    pub lib: Option<String>,
    /// Source definition, kept for pass 2 and for inline/generator
    /// expansion
    pub source: Option<FuncDef>,
    pub overload_enabled: bool,
    /// Variadic extern (e.g. printf-style prototypes from cimport)
    pub var_arg: bool,
    /// Whether this instance owns a compiled object file
    pub owns_object: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    aggregates: HashMap<String, AggregateInfo>,
    functions: HashMap<String, FunctionInfo>,
    /// unmangled name -> mangled instances, in registration order
    unmangled_index: HashMap<String, Vec<String>>,
    /// emission order is registration order
    registration_order: Vec<String>,
    link_objects: Vec<PathBuf>,
    link_object_hashes: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- aggregates -----

    pub fn install_aggregate(&mut self, info: AggregateInfo) {
        self.aggregates.insert(info.name.clone(), info);
    }

    pub fn aggregate(&self, name: &str) -> Option<&AggregateInfo> {
        self.aggregates.get(name)
    }

    pub fn has_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains_key(name)
    }

    pub fn aggregate_names(&self) -> impl Iterator<Item = &str> {
        self.aggregates.keys().map(|s| s.as_str())
    }

    // ----- functions -----

    pub fn install_function(&mut self, info: FunctionInfo) {
        self.unmangled_index
            .entry(info.unmangled.clone())
            .or_default()
            .push(info.mangled.clone());
        self.registration_order.push(info.mangled.clone());
        self.functions.insert(info.mangled.clone(), info);
    }

    pub fn function(&self, mangled: &str) -> Option<&FunctionInfo> {
        self.functions.get(mangled)
    }

    pub fn function_mut(&mut self, mangled: &str) -> Option<&mut FunctionInfo> {
        self.functions.get_mut(mangled)
    }

    pub fn has_function(&self, mangled: &str) -> bool {
        self.functions.contains_key(mangled)
    }

    /// Instances registered for an unmangled name.
    pub fn instances_of(&self, unmangled: &str) -> &[String] {
        self.unmangled_index
            .get(unmangled)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Mangled names in registration (and therefore emission) order.
    pub fn emission_order(&self) -> &[String] {
        &self.registration_order
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }

    // ----- link objects -----

    /// Register an object file for the link step, deduplicating by
    /// content hash.
    pub fn register_link_object(&mut self, path: PathBuf, content_hash: String) -> bool {
        if self.link_object_hashes.contains(&content_hash) {
            return false;
        }
        self.link_object_hashes.insert(content_hash);
        self.link_objects.push(path);
        true
    }

    pub fn link_objects(&self) -> &[PathBuf] {
        &self.link_objects
    }

    /// Extern libraries needed at link time, deduplicated, skipping the
    /// empty pseudo-library.
    pub fn extern_libs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut libs = Vec::new();
        for mangled in &self.registration_order {
            if let Some(info) = self.functions.get(mangled) {
                if let Some(lib) = &info.lib {
                    if !lib.is_empty() && seen.insert(lib.clone()) {
                        libs.push(lib.clone());
                    }
                }
            }
        }
        libs
    }

    /// Test hook: drop all user entries, keeping nothing but builtins.
    pub fn clear(&mut self) {
        self.aggregates.clear();
        self.functions.clear();
        self.unmangled_index.clear();
        self.registration_order.clear();
        self.link_objects.clear();
        self.link_object_hashes.clear();
    }
}

/// One variable binding: a ValueRef plus per-path linear ownership state
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub value: ValueRef,
    pub linear: LinearMap,
    pub depth: usize,
}

/// Stack of lexical scopes. Pushed on function entry and on each block;
/// exiting a scope discards entries declared at that depth but keeps
/// linear-state changes made to outer entries.
#[derive(Debug, Default)]
pub struct VarRegistry {
    vars: Vec<VarInfo>,
    depth: usize,
}

impl VarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_scope(&mut self) {
        self.depth += 1;
    }

    pub fn exit_scope(&mut self) {
        let depth = self.depth;
        self.vars.retain(|v| v.depth < depth);
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn declare(&mut self, name: &str, value: ValueRef, linear: LinearMap) {
        self.vars.push(VarInfo {
            name: name.to_string(),
            value,
            linear,
            depth: self.depth,
        });
    }

    /// Innermost binding with the given name.
    pub fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.vars.iter().rev().find(|v| v.name == name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.vars.iter_mut().rev().find(|v| v.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.iter().map(|v| v.name.clone()).collect()
    }

    /// All bindings carrying linear state, innermost shadowing applied.
    pub fn linear_bindings(&self) -> Vec<&VarInfo> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for var in self.vars.iter().rev() {
            if !var.linear.is_empty() && seen.insert(var.name.clone()) {
                out.push(var);
            }
        }
        out.reverse();
        out
    }

    pub fn clear(&mut self) {
        self.vars.clear();
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PcType;
    use crate::value::{ValueKind, ValueRef};
    use pyrite_ast::Span;

    fn dummy_value() -> ValueRef {
        ValueRef {
            kind: ValueKind::PyConst(crate::types::PyValue::Int(0)),
            ty: PcType::PythonValue,
            span: Span::unknown(),
            origin: None,
        }
    }

    #[test]
    fn scope_exit_discards_inner_bindings() {
        let mut vars = VarRegistry::new();
        vars.declare("outer", dummy_value(), LinearMap::new());
        vars.enter_scope();
        vars.declare("inner", dummy_value(), LinearMap::new());
        assert!(vars.lookup("inner").is_some());
        vars.exit_scope();
        assert!(vars.lookup("inner").is_none());
        assert!(vars.lookup("outer").is_some());
    }

    #[test]
    fn shadowing_resolves_to_innermost() {
        let mut vars = VarRegistry::new();
        vars.declare("x", dummy_value(), LinearMap::new());
        vars.enter_scope();
        let mut shadowed = dummy_value();
        shadowed.ty = PcType::int(64, true);
        vars.declare("x", shadowed, LinearMap::new());
        assert_eq!(
            vars.lookup("x").map(|v| v.value.ty.clone()),
            Some(PcType::int(64, true))
        );
    }

    #[test]
    fn link_objects_dedupe_by_content_hash() {
        let mut registry = Registry::new();
        assert!(registry.register_link_object("a.o".into(), "hash1".into()));
        assert!(!registry.register_link_object("b.o".into(), "hash1".into()));
        assert!(registry.register_link_object("c.o".into(), "hash2".into()));
        assert_eq!(registry.link_objects().len(), 2);
    }

    #[test]
    fn instances_share_unmangled_name() {
        let mut registry = Registry::new();
        for suffix in ["ident.i32", "ident.i64"] {
            registry.install_function(FunctionInfo {
                unmangled: "ident".into(),
                mangled: suffix.into(),
                param_names: vec![],
                param_types: vec![],
                return_type: PcType::Void,
                kind: FunctionKind::Compile,
                effect_bindings: HashMap::new(),
                lib: None,
                source: None,
                overload_enabled: false,
                var_arg: false,
                owns_object: false,
            });
        }
        assert_eq!(registry.instances_of("ident").len(), 2);
        assert_eq!(registry.emission_order().len(), 2);
    }
}
