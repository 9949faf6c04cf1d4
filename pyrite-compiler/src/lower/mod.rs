// Lowering engine: walks the surface AST of one function and emits IR
// through the ABI-aware builder. Split into expression, call, statement,
// loop, and match components.

mod calls;
mod convert;
mod expr;
mod loops;
mod matching;
mod stmt;

use std::collections::HashMap;

use pyrite_ast::Span;
use pyrite_diagnostics::{codes, Category, Diagnostic, Span as DiagSpan};

use crate::abi::TargetAbi;
use crate::builder::{FunctionWrapper, PcBuilder};
use crate::effects::EffectResolver;
use crate::ir::{BlockId, Constant, IrType, Val};
use crate::linear::{self, LinearMap};
use crate::registry::{FunctionInfo, Registry, VarRegistry};
use crate::types::{lower_type, PcType};
use crate::value::{ValueKind, ValueRef};

/// Per-compilation-unit context: registry, builder, effect resolver, and
/// the declared-function table shared between the two passes. Passed
/// explicitly through every lowering function; nothing is process-global.
#[derive(Debug)]
pub struct Unit {
    pub registry: Registry,
    pub builder: PcBuilder,
    pub effects: EffectResolver,
    pub wrappers: HashMap<String, FunctionWrapper>,
    /// import alias -> mangled instance (set by the collection pass for
    /// imports under effect contexts)
    pub import_aliases: HashMap<String, String>,
    pub file: String,
    pub source: String,
}

impl Unit {
    pub fn new(file: &str, source: &str, abi: TargetAbi) -> Self {
        let module_name = std::path::Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module");
        Self {
            registry: Registry::new(),
            builder: PcBuilder::new(module_name, abi),
            effects: EffectResolver::new(),
            wrappers: HashMap::new(),
            import_aliases: HashMap::new(),
            file: file.to_string(),
            source: source.to_string(),
        }
    }

    pub fn diag_span(&self, span: Span) -> DiagSpan {
        DiagSpan::new(self.file.clone(), span.line, span.column, span.length.max(1))
    }
}

/// An in-progress inline expansion: `return` in the inlined body becomes
/// a store to the result slot plus a branch to the exit block.
pub struct InlineFrame {
    pub exit_block: BlockId,
    pub result_slot: Option<Val>,
    pub result_ty: PcType,
    /// Push-order marker; the innermost of the inline/generator frame
    /// stacks decides what `return` means
    pub seq: usize,
}

/// An in-progress generator inlining at a `for` site. `yield e` stores
/// the value and the resume tag, then branches to the caller's loop body.
pub struct GenFrame {
    pub value_slot: Val,
    pub value_ty: PcType,
    pub state_ptr: Val,
    pub body_block: BlockId,
    pub done_block: BlockId,
    /// Resume blocks, one per yield; index + 1 is the state tag
    pub resume_blocks: Vec<BlockId>,
    pub seq: usize,
}

/// Lowers one function body. Created per `compile` instance in pass 2.
pub struct FunctionLowerer<'u> {
    pub unit: &'u mut Unit,
    pub info: FunctionInfo,
    pub wrapper: FunctionWrapper,
    pub vars: VarRegistry,
    /// (continue target, break target) pairs, innermost last
    pub loop_stack: Vec<(BlockId, BlockId)>,
    /// Break flag per enclosing loop; Some only for loops with an else
    /// clause
    pub break_flag_stack: Vec<Option<Val>>,
    pub inline_frames: Vec<InlineFrame>,
    pub gen_frames: Vec<GenFrame>,
    frame_seq: usize,
}

impl<'u> FunctionLowerer<'u> {
    pub fn new(unit: &'u mut Unit, info: FunctionInfo) -> Result<Self, Diagnostic> {
        let wrapper = unit
            .wrappers
            .get(&info.mangled)
            .cloned()
            .ok_or_else(|| {
                Diagnostic::error(
                    Category::Internal,
                    codes::SRET_UNRESOLVED,
                    format!("no declaration installed for `{}`", info.mangled),
                    DiagSpan::unknown(),
                )
            })?;
        Ok(Self {
            unit,
            info,
            wrapper,
            vars: VarRegistry::new(),
            loop_stack: Vec::new(),
            break_flag_stack: Vec::new(),
            inline_frames: Vec::new(),
            gen_frames: Vec::new(),
            frame_seq: 0,
        })
    }

    /// Emit the function body: entry block, parameter spill, statements,
    /// implicit return, and the end-of-function linear check.
    pub fn emit_body(&mut self) -> Result<(), Diagnostic> {
        let func_index = self.wrapper.index;
        let entry = self.unit.builder.append_block(func_index, "entry");
        self.unit.builder.position_at_end(func_index, entry);
        let wrapper = self.wrapper.clone();
        self.unit.builder.set_return_abi_context(&wrapper);

        self.vars.enter_scope();
        self.bind_parameters()?;

        let body = self
            .info
            .source
            .as_ref()
            .map(|s| s.body.clone())
            .unwrap_or_default();
        for stmt in &body {
            self.lower_stmt(stmt)?;
        }

        if !self.unit.builder.is_terminated() {
            self.emit_implicit_return()?;
        }

        // P1: no linear sub-path of any reachable local may still be
        // active at function exit.
        for var in self.vars.linear_bindings() {
            if let Some(diag) =
                linear::tokens_not_consumed(&var.name, &var.linear, &self.unit.file)
            {
                return Err(diag);
            }
        }

        self.vars.exit_scope();
        self.unit.builder.clear_return_abi_context();
        Ok(())
    }

    fn bind_parameters(&mut self) -> Result<(), Diagnostic> {
        let wrapper = self.wrapper.clone();
        let mut llvm_index = 0usize;
        let span = self
            .info
            .source
            .as_ref()
            .map(|s| s.span)
            .unwrap_or_else(Span::unknown);

        let params: Vec<(String, PcType)> = self
            .info
            .param_names
            .iter()
            .cloned()
            .zip(self.info.param_types.iter().cloned())
            .collect();

        for (name, ty) in params {
            if let PcType::PyConst(value) = ty.unqualified() {
                // pyconst parameters occupy no storage; bind the value
                self.vars.declare(
                    &name,
                    ValueRef {
                        kind: ValueKind::PyConst(value.clone()),
                        ty: ty.clone(),
                        span,
                        origin: None,
                    },
                    LinearMap::new(),
                );
                continue;
            }

            let value = wrapper.get_user_arg_unpacked(&mut self.unit.builder, llvm_index);
            llvm_index += 1;

            let llvm_ty = self.lower_ty(&ty);
            let slot = self.unit.builder.entry_alloca(llvm_ty);
            self.unit.builder.store(value, slot.clone());

            // A linear argument transfers its token into the callee.
            let linear_map = if ty.is_linear(&self.unit.registry) {
                linear::fresh(span)
            } else {
                LinearMap::new()
            };
            self.vars
                .declare(&name, ValueRef::address(slot, ty, span), linear_map);
        }
        Ok(())
    }

    fn emit_implicit_return(&mut self) -> Result<(), Diagnostic> {
        if self.info.return_type.is_void() {
            self.unit.builder.ret_void();
        } else {
            // Fall-through in a value-returning function produces the
            // zero bit pattern of the return type.
            let llvm_ty = self.lower_ty(&self.info.return_type.clone());
            self.unit
                .builder
                .ret(Val::Const(Constant::Zero(llvm_ty)));
        }
        Ok(())
    }

    // ----- shared helpers -----

    pub(crate) fn lower_ty(&mut self, ty: &PcType) -> IrType {
        lower_type(ty, &self.unit.registry, &mut self.unit.builder.module)
    }

    pub(crate) fn dspan(&self, span: Span) -> DiagSpan {
        self.unit.diag_span(span)
    }

    pub(crate) fn error(
        &self,
        category: Category,
        code: &str,
        message: String,
        span: Span,
    ) -> Diagnostic {
        Diagnostic::error(category, code, message, self.dspan(span))
    }

    pub(crate) fn type_error(&self, message: String, span: Span) -> Diagnostic {
        self.error(Category::Typing, codes::TYPE_MISMATCH, message, span)
    }

    pub(crate) fn resolver(&self) -> crate::resolver::TypeResolver<'_> {
        crate::resolver::TypeResolver::new(&self.unit.registry, &self.unit.file)
    }

    /// Append a block to the current function.
    pub(crate) fn append_block(&mut self, name: &str) -> BlockId {
        let func = self.wrapper.index;
        self.unit.builder.append_block(func, name)
    }

    pub(crate) fn position_at(&mut self, block: BlockId) {
        let func = self.wrapper.index;
        self.unit.builder.position_at_end(func, block);
    }

    pub(crate) fn next_frame_seq(&mut self) -> usize {
        self.frame_seq += 1;
        self.frame_seq
    }

    /// Leave a lexical scope, first checking that no linear token
    /// declared at this depth is still active: a token created inside a
    /// block must be consumed before the block ends.
    pub(crate) fn exit_scope_checked(&mut self) -> Result<(), Diagnostic> {
        let depth = self.vars.depth();
        let mut leaked = None;
        for var in self.vars.linear_bindings() {
            if var.depth == depth && linear::any_active(&var.linear) {
                leaked = linear::tokens_not_consumed(&var.name, &var.linear, &self.unit.file);
                break;
            }
        }
        self.vars.exit_scope();
        match leaked {
            Some(diag) => Err(diag),
            None => Ok(()),
        }
    }

    /// Snapshot linear states of all visible bindings.
    pub(crate) fn linear_snapshot(&self) -> HashMap<String, LinearMap> {
        let mut out = HashMap::new();
        for var in self.vars.linear_bindings() {
            out.insert(var.name.clone(), var.linear.clone());
        }
        out
    }

    /// Restore a previously taken snapshot (used between if arms).
    pub(crate) fn restore_linear_snapshot(&mut self, snapshot: &HashMap<String, LinearMap>) {
        let names: Vec<String> = snapshot.keys().cloned().collect();
        for name in names {
            if let Some(var) = self.vars.lookup_mut(&name) {
                if let Some(map) = snapshot.get(&name) {
                    var.linear = map.clone();
                }
            }
        }
    }
}
