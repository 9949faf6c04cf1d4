// ABI-aware IR builder.
//
// Wraps the in-memory IR module behind semantic emission methods and
// handles C ABI coercion for aggregate returns and calls transparently:
// the lowering layers call `ret(value)` and `call(wrapper, args)` and
// never see sret pointers or coerced register types.

use crate::abi::{Classification, PassingKind, TargetAbi};
use crate::ir::{
    self, BinOp, BlockId, CastOp, Constant, FloatPredicate, Inst, IntPredicate, IrType,
    ParamAttrs, Val,
};

/// Coercion applied to one user-visible parameter
#[derive(Debug, Clone)]
pub struct ParamCoercion {
    pub original: IrType,
    pub coerced: IrType,
    pub byval: bool,
}

/// Wrapper around an emitted function that hides ABI-inserted parameters.
/// Upper layers address user parameters by logical index; the sret offset
/// and per-parameter coercions stay internal.
#[derive(Debug, Clone)]
pub struct FunctionWrapper {
    pub index: usize,
    pub name: String,
    pub apply_c_abi: bool,
    /// Original aggregate return type when the return goes through sret
    sret_type: Option<IrType>,
    /// Return coercion (register representation) when applicable
    ret_coercion: Option<IrType>,
    /// User-visible return type before ABI lowering
    pub user_ret_ty: IrType,
    param_coercions: Vec<Option<ParamCoercion>>,
    user_param_tys: Vec<IrType>,
    var_arg: bool,
}

impl FunctionWrapper {
    pub fn user_arg_count(&self) -> usize {
        self.user_param_tys.len()
    }

    fn arg_offset(&self) -> usize {
        usize::from(self.sret_type.is_some())
    }

    pub fn uses_sret(&self) -> bool {
        self.sret_type.is_some()
    }

    pub fn sret_type(&self) -> Option<&IrType> {
        self.sret_type.as_ref()
    }

    /// Raw argument as declared (coerced form for coerced parameters).
    pub fn get_user_arg(&self, builder: &PcBuilder, index: usize) -> Val {
        builder.module.functions[self.index].arg(index + self.arg_offset())
    }

    pub fn get_param_coercion(&self, index: usize) -> Option<&ParamCoercion> {
        self.param_coercions.get(index).and_then(|c| c.as_ref())
    }

    /// Argument in its original user type, generating unpack code for
    /// coerced or indirect parameters.
    pub fn get_user_arg_unpacked(&self, builder: &mut PcBuilder, index: usize) -> Val {
        let arg = self.get_user_arg(builder, index);
        let Some(coercion) = self.get_param_coercion(index).cloned() else {
            return arg;
        };
        if coercion.byval {
            // Pointer to the original aggregate: load it
            return builder.load(coercion.original.clone(), arg);
        }
        // Register coercion: spill the coerced value, reinterpret, reload
        let slot = builder.alloca(coercion.original.clone());
        let cast = builder.cast(
            CastOp::Bitcast,
            slot.clone(),
            coercion.coerced.clone().ptr_to(),
        );
        builder.store(arg, cast);
        builder.load(coercion.original.clone(), slot)
    }

    pub fn as_callee(&self) -> Val {
        Val::Const(Constant::Global(
            self.name.clone(),
            self.fn_ptr_type(),
        ))
    }

    fn fn_ptr_type(&self) -> IrType {
        IrType::Func {
            params: self.declared_param_tys(),
            ret: Box::new(self.declared_ret_ty()),
            var_arg: self.var_arg,
        }
        .ptr_to()
    }

    fn declared_ret_ty(&self) -> IrType {
        if self.sret_type.is_some() {
            IrType::Void
        } else if let Some(coerced) = &self.ret_coercion {
            coerced.clone()
        } else {
            self.user_ret_ty.clone()
        }
    }

    fn declared_param_tys(&self) -> Vec<IrType> {
        let mut tys = Vec::new();
        if let Some(sret) = &self.sret_type {
            tys.push(sret.clone().ptr_to());
        }
        for (i, user_ty) in self.user_param_tys.iter().enumerate() {
            match &self.param_coercions[i] {
                Some(c) if c.byval => tys.push(c.original.clone().ptr_to()),
                Some(c) => tys.push(c.coerced.clone()),
                None => tys.push(user_ty.clone()),
            }
        }
        tys
    }
}

/// Return-ABI context for the function currently being emitted
#[derive(Debug, Clone)]
struct RetContext {
    func: usize,
    sret_type: Option<IrType>,
    ret_coercion: Option<IrType>,
    apply_c_abi: bool,
}

/// The builder: owns the module, a cursor (current function + block), and
/// the return-ABI context.
#[derive(Debug)]
pub struct PcBuilder {
    pub module: ir::Module,
    pub abi: TargetAbi,
    cursor: Option<(usize, usize)>,
    ret_ctx: Option<RetContext>,
}

impl PcBuilder {
    pub fn new(module_name: &str, abi: TargetAbi) -> Self {
        Self {
            module: ir::Module::new(module_name, abi.triple()),
            abi,
            cursor: None,
            ret_ctx: None,
        }
    }

    // ========== Function declaration ==========

    /// Declare a function, applying C ABI lowering to its signature when
    /// requested. Returns the wrapper that hides ABI details.
    pub fn declare_function(
        &mut self,
        name: &str,
        param_types: &[IrType],
        return_type: IrType,
        var_arg: bool,
        apply_c_abi: bool,
    ) -> FunctionWrapper {
        let mut sret_type = None;
        let mut ret_coercion = None;
        let mut declared_ret = return_type.clone();

        if apply_c_abi {
            let classification = self.abi.classify_return(&return_type, &self.module);
            match classification.kind {
                PassingKind::Indirect => {
                    sret_type = Some(return_type.clone());
                    declared_ret = IrType::Void;
                }
                PassingKind::Coerce => {
                    let coerced = classification
                        .coerced
                        .clone()
                        .unwrap_or_else(|| return_type.clone());
                    declared_ret = coerced.clone();
                    ret_coercion = Some(coerced);
                }
                PassingKind::Direct => {
                    if let Some(IrType::Void) = classification.coerced {
                        // empty aggregate: nothing comes back
                        declared_ret = IrType::Void;
                        ret_coercion = Some(IrType::Void);
                    }
                }
            }
        }

        let mut params: Vec<(IrType, ParamAttrs)> = Vec::new();
        if let Some(sret) = &sret_type {
            params.push((
                sret.clone().ptr_to(),
                ParamAttrs {
                    sret: Some(sret.clone()),
                    byval: None,
                },
            ));
        }

        let mut param_coercions = Vec::with_capacity(param_types.len());
        for ty in param_types {
            if !apply_c_abi {
                param_coercions.push(None);
                params.push((ty.clone(), ParamAttrs::default()));
                continue;
            }
            let classification = self.abi.classify_argument(ty, &self.module);
            match classification.kind {
                PassingKind::Direct => {
                    param_coercions.push(None);
                    params.push((ty.clone(), ParamAttrs::default()));
                }
                PassingKind::Coerce => {
                    let coerced = classification
                        .coerced
                        .clone()
                        .unwrap_or_else(|| ty.clone());
                    param_coercions.push(Some(ParamCoercion {
                        original: ty.clone(),
                        coerced: coerced.clone(),
                        byval: false,
                    }));
                    params.push((coerced, ParamAttrs::default()));
                }
                PassingKind::Indirect => {
                    param_coercions.push(Some(ParamCoercion {
                        original: ty.clone(),
                        coerced: ty.clone().ptr_to(),
                        byval: true,
                    }));
                    params.push((
                        ty.clone().ptr_to(),
                        ParamAttrs {
                            sret: None,
                            byval: Some(ty.clone()),
                        },
                    ));
                }
            }
        }

        let index = match self.module.function_idx(name) {
            Some(existing) => existing,
            None => {
                let function = ir::Function::new(name, declared_ret, params, var_arg);
                self.module.add_function(function)
            }
        };

        FunctionWrapper {
            index,
            name: name.to_string(),
            apply_c_abi,
            sret_type,
            ret_coercion,
            user_ret_ty: return_type,
            param_coercions,
            user_param_tys: param_types.to_vec(),
            var_arg,
        }
    }

    pub fn mark_internal(&mut self, wrapper: &FunctionWrapper) {
        self.module.functions[wrapper.index].internal = true;
    }

    // ========== ABI context management ==========

    /// Install the return-ABI context for the function being emitted.
    /// Call after creating the entry block; `ret()` consults it.
    pub fn set_return_abi_context(&mut self, wrapper: &FunctionWrapper) {
        self.ret_ctx = Some(RetContext {
            func: wrapper.index,
            sret_type: wrapper.sret_type.clone(),
            ret_coercion: wrapper.ret_coercion.clone(),
            apply_c_abi: wrapper.apply_c_abi,
        });
    }

    pub fn clear_return_abi_context(&mut self) {
        self.ret_ctx = None;
    }

    // ========== Cursor management ==========

    pub fn position_at_end(&mut self, func: usize, block: BlockId) {
        self.cursor = Some((func, block.0));
    }

    pub fn current_function(&self) -> Option<usize> {
        self.cursor.map(|(f, _)| f)
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.cursor.map(|(_, b)| BlockId(b))
    }

    pub fn append_block(&mut self, func: usize, name: &str) -> BlockId {
        self.module.functions[func].append_block(name)
    }

    pub fn is_terminated(&self) -> bool {
        match self.cursor {
            Some((f, b)) => self.module.functions[f].blocks[b].is_terminated(),
            None => true,
        }
    }

    fn push(&mut self, inst: Inst) {
        let Some((f, b)) = self.cursor else {
            return;
        };
        // A terminated block is never appended to again.
        if self.module.functions[f].blocks[b].is_terminated() {
            return;
        }
        self.module.functions[f].blocks[b].insts.push(inst);
    }

    fn fresh(&mut self) -> u32 {
        let Some((f, _)) = self.cursor else {
            return 0;
        };
        self.module.functions[f].fresh_value()
    }

    // ========== Primitive operations ==========

    pub fn binary(&mut self, op: BinOp, lhs: Val, rhs: Val) -> Val {
        let ty = lhs.ty();
        let result = self.fresh();
        self.push(Inst::Binary {
            op,
            result,
            lhs,
            rhs,
        });
        Val::Temp(result, ty)
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Val, rhs: Val) -> Val {
        let result = self.fresh();
        self.push(Inst::ICmp {
            pred,
            result,
            lhs,
            rhs,
        });
        Val::Temp(result, IrType::Int(1))
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Val, rhs: Val) -> Val {
        let result = self.fresh();
        self.push(Inst::FCmp {
            pred,
            result,
            lhs,
            rhs,
        });
        Val::Temp(result, IrType::Int(1))
    }

    pub fn alloca(&mut self, ty: IrType) -> Val {
        let result = self.fresh();
        self.push(Inst::Alloca {
            result,
            ty: ty.clone(),
        });
        Val::Temp(result, ty.ptr_to())
    }

    /// Alloca placed in the entry block so every local slot dominates its
    /// uses regardless of control flow.
    pub fn entry_alloca(&mut self, ty: IrType) -> Val {
        let Some((f, _)) = self.cursor else {
            return self.alloca(ty);
        };
        let result = self.module.functions[f].fresh_value();
        if let Some(entry) = self.module.functions[f].blocks.first_mut() {
            // Insert before the terminator if the entry block has one.
            let at = entry
                .insts
                .iter()
                .position(Inst::is_terminator)
                .unwrap_or(entry.insts.len());
            entry.insts.insert(
                at,
                Inst::Alloca {
                    result,
                    ty: ty.clone(),
                },
            );
        }
        Val::Temp(result, ty.ptr_to())
    }

    pub fn load(&mut self, ty: IrType, ptr: Val) -> Val {
        let result = self.fresh();
        self.push(Inst::Load {
            result,
            ty: ty.clone(),
            ptr,
        });
        Val::Temp(result, ty)
    }

    pub fn store(&mut self, value: Val, ptr: Val) {
        self.push(Inst::Store { value, ptr });
    }

    pub fn gep(&mut self, base_ty: IrType, ptr: Val, indices: Vec<Val>, result_ty: IrType) -> Val {
        let result = self.fresh();
        self.push(Inst::Gep {
            result,
            base_ty,
            ptr,
            indices,
        });
        Val::Temp(result, result_ty.ptr_to())
    }

    /// GEP to a struct field by index.
    pub fn struct_gep(&mut self, ptr: Val, field: u32, field_ty: IrType) -> Val {
        let base_ty = match ptr.ty() {
            IrType::Ptr(inner) => *inner,
            other => other,
        };
        self.gep(
            base_ty,
            ptr,
            vec![
                Val::const_int(IrType::Int(32), 0),
                Val::const_int(IrType::Int(32), field as i128),
            ],
            field_ty,
        )
    }

    pub fn cast(&mut self, op: CastOp, value: Val, to: IrType) -> Val {
        let result = self.fresh();
        self.push(Inst::Cast {
            op,
            result,
            value,
            to: to.clone(),
        });
        Val::Temp(result, to)
    }

    pub fn extract_value(&mut self, agg: Val, indices: Vec<u32>, result_ty: IrType) -> Val {
        let result = self.fresh();
        self.push(Inst::ExtractValue {
            result,
            agg,
            indices,
        });
        Val::Temp(result, result_ty)
    }

    pub fn insert_value(&mut self, agg: Val, value: Val, indices: Vec<u32>) -> Val {
        let ty = agg.ty();
        let result = self.fresh();
        self.push(Inst::InsertValue {
            result,
            agg,
            value,
            indices,
        });
        Val::Temp(result, ty)
    }

    pub fn select(&mut self, cond: Val, then_val: Val, else_val: Val) -> Val {
        let ty = then_val.ty();
        let result = self.fresh();
        self.push(Inst::Select {
            result,
            cond,
            then_val,
            else_val,
        });
        Val::Temp(result, ty)
    }

    // ========== Control flow ==========

    pub fn branch(&mut self, dest: BlockId) {
        self.push(Inst::Br { dest });
    }

    pub fn cond_branch(&mut self, cond: Val, then_dest: BlockId, else_dest: BlockId) {
        self.push(Inst::CondBr {
            cond,
            then_dest,
            else_dest,
        });
    }

    pub fn switch(&mut self, value: Val, default: BlockId, cases: Vec<(i128, BlockId)>) {
        self.push(Inst::Switch {
            value,
            default,
            cases,
        });
    }

    pub fn unreachable(&mut self) {
        self.push(Inst::Unreachable);
    }

    pub fn ret_void(&mut self) {
        self.push(Inst::Ret { value: None });
    }

    /// ABI-aware return: stores through the sret pointer or coerces to
    /// the register representation according to the current context.
    pub fn ret(&mut self, value: Val) {
        let Some(ctx) = self.ret_ctx.clone() else {
            self.push(Inst::Ret { value: Some(value) });
            return;
        };

        if ctx.sret_type.is_some() {
            let sret_ptr = self.module.functions[ctx.func].arg(0);
            self.store(value, sret_ptr);
            self.push(Inst::Ret { value: None });
            return;
        }

        if ctx.apply_c_abi {
            if let Some(coerced) = &ctx.ret_coercion {
                if *coerced == IrType::Void {
                    self.push(Inst::Ret { value: None });
                    return;
                }
                if *coerced != value.ty() {
                    let slot = self.alloca(value.ty());
                    self.store(value, slot.clone());
                    let cast = self.cast(CastOp::Bitcast, slot, coerced.clone().ptr_to());
                    let reg = self.load(coerced.clone(), cast);
                    self.push(Inst::Ret { value: Some(reg) });
                    return;
                }
            }
        }

        self.push(Inst::Ret { value: Some(value) });
    }

    // ========== Calls ==========

    /// ABI-aware call. Packs coerced arguments, allocates sret buffers,
    /// and unpacks coerced returns; the caller passes and receives values
    /// in their original user types.
    pub fn call(&mut self, wrapper: &FunctionWrapper, args: Vec<Val>) -> Option<Val> {
        let mut lowered_args: Vec<Val> = Vec::with_capacity(args.len() + 1);
        let mut sret_slot = None;

        if let Some(sret_ty) = wrapper.sret_type.clone() {
            let slot = self.alloca(sret_ty);
            lowered_args.push(slot.clone());
            sret_slot = Some(slot);
        }

        for (i, arg) in args.into_iter().enumerate() {
            match wrapper.get_param_coercion(i).cloned() {
                None => lowered_args.push(arg),
                Some(c) if c.byval => {
                    let slot = self.alloca(c.original.clone());
                    self.store(arg, slot.clone());
                    lowered_args.push(slot);
                }
                Some(c) => {
                    let slot = self.alloca(c.original.clone());
                    self.store(arg, slot.clone());
                    let cast = self.cast(CastOp::Bitcast, slot, c.coerced.clone().ptr_to());
                    let reg = self.load(c.coerced.clone(), cast);
                    lowered_args.push(reg);
                }
            }
        }

        let declared_ret = wrapper.declared_ret_ty();
        let produces_value = declared_ret != IrType::Void;
        let result_id = if produces_value { Some(self.fresh()) } else { None };
        self.push(Inst::Call {
            result: result_id,
            ret_ty: declared_ret.clone(),
            callee: wrapper.as_callee(),
            args: lowered_args,
            sret: wrapper.sret_type.clone(),
            var_arg: wrapper.var_arg,
        });

        if let Some(slot) = sret_slot {
            let original = wrapper.user_ret_ty.clone();
            return Some(self.load(original, slot));
        }

        let result = result_id.map(|id| Val::Temp(id, declared_ret.clone()));

        if let (Some(result), Some(coerced)) = (&result, &wrapper.ret_coercion) {
            if *coerced != wrapper.user_ret_ty && *coerced != IrType::Void {
                // Reinterpret the register representation as the original
                let slot = self.alloca(coerced.clone());
                self.store(result.clone(), slot.clone());
                let cast = self.cast(
                    CastOp::Bitcast,
                    slot,
                    wrapper.user_ret_ty.clone().ptr_to(),
                );
                return Some(self.load(wrapper.user_ret_ty.clone(), cast));
            }
        }

        if wrapper.ret_coercion == Some(IrType::Void) && wrapper.user_ret_ty.is_aggregate() {
            // Empty aggregate return: materialize a zero value
            return Some(Val::Const(Constant::Zero(wrapper.user_ret_ty.clone())));
        }

        result
    }

    /// Direct call through a function-pointer value; no ABI lowering is
    /// applied (function-pointer signatures carry non-aggregate types).
    pub fn call_indirect(&mut self, callee: Val, args: Vec<Val>, ret_ty: IrType) -> Option<Val> {
        let produces_value = ret_ty != IrType::Void;
        let result_id = if produces_value { Some(self.fresh()) } else { None };
        self.push(Inst::Call {
            result: result_id,
            ret_ty: ret_ty.clone(),
            callee,
            args,
            sret: None,
            var_arg: false,
        });
        result_id.map(|id| Val::Temp(id, ret_ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PcBuilder {
        PcBuilder::new("test", TargetAbi::X86_64SysV)
    }

    #[test]
    fn small_struct_return_is_coerced() {
        let mut b = builder();
        let point = IrType::Struct(vec![IrType::Int(32), IrType::Int(32)]);
        let wrapper = b.declare_function("make_point", &[], point.clone(), false, true);
        assert!(!wrapper.uses_sret());

        let entry = b.append_block(wrapper.index, "entry");
        b.position_at_end(wrapper.index, entry);
        b.set_return_abi_context(&wrapper);
        b.ret(Val::Const(Constant::Zero(point)));
        b.clear_return_abi_context();

        let text = b.module.render();
        assert!(text.contains("define i64 @make_point()"), "{}", text);
        assert!(text.contains("ret i64"), "{}", text);
    }

    #[test]
    fn large_struct_return_uses_sret() {
        let mut b = builder();
        let big = IrType::Struct(vec![IrType::Int(64); 3]);
        let wrapper = b.declare_function("make_big", &[], big.clone(), false, true);
        assert!(wrapper.uses_sret());

        let entry = b.append_block(wrapper.index, "entry");
        b.position_at_end(wrapper.index, entry);
        b.set_return_abi_context(&wrapper);
        b.ret(Val::Const(Constant::Zero(big)));
        b.clear_return_abi_context();

        let text = b.module.render();
        assert!(
            text.contains("define void @make_big({ i64, i64, i64 }* sret({ i64, i64, i64 }) %a0)"),
            "{}",
            text
        );
        assert!(text.contains("ret void"), "{}", text);
    }

    #[test]
    fn caller_allocates_sret_buffer_and_loads_result() {
        let mut b = builder();
        let big = IrType::Struct(vec![IrType::Int(64); 3]);
        let callee = b.declare_function("make_big", &[], big.clone(), false, true);

        let caller = b.declare_function("caller", &[], IrType::Void, false, true);
        let entry = b.append_block(caller.index, "entry");
        b.position_at_end(caller.index, entry);
        let result = b.call(&callee, vec![]);
        assert!(result.is_some());
        assert_eq!(result.map(|v| v.ty()), Some(big));
        b.ret_void();

        let text = b.module.render();
        assert!(text.contains("alloca { i64, i64, i64 }"), "{}", text);
        assert!(
            text.contains("call void @make_big({ i64, i64, i64 }* sret"),
            "{}",
            text
        );
    }

    #[test]
    fn coerced_argument_packs_at_call_site() {
        let mut b = builder();
        let point = IrType::Struct(vec![IrType::Int(32), IrType::Int(32)]);
        let callee = b.declare_function(
            "take_point",
            &[point.clone()],
            IrType::Void,
            false,
            true,
        );

        let caller = b.declare_function("caller", &[], IrType::Void, false, true);
        let entry = b.append_block(caller.index, "entry");
        b.position_at_end(caller.index, entry);
        b.call(&callee, vec![Val::Const(Constant::Zero(point))]);
        b.ret_void();

        let text = b.module.render();
        assert!(text.contains("call void @take_point(i64"), "{}", text);
    }

    #[test]
    fn unpacked_parameter_roundtrips_through_memory() {
        let mut b = builder();
        let point = IrType::Struct(vec![IrType::Int(32), IrType::Int(32)]);
        let wrapper = b.declare_function(
            "use_point",
            &[point.clone()],
            IrType::Void,
            false,
            true,
        );
        let entry = b.append_block(wrapper.index, "entry");
        b.position_at_end(wrapper.index, entry);
        let unpacked = wrapper.get_user_arg_unpacked(&mut b, 0);
        assert_eq!(unpacked.ty(), point);
        b.ret_void();
    }

    #[test]
    fn terminated_block_is_never_appended() {
        let mut b = builder();
        let wrapper = b.declare_function("f", &[], IrType::Void, false, true);
        let entry = b.append_block(wrapper.index, "entry");
        b.position_at_end(wrapper.index, entry);
        b.ret_void();
        b.ret_void();
        assert_eq!(b.module.functions[wrapper.index].blocks[0].insts.len(), 1);
    }

    #[test]
    fn void_function_call_has_no_result() {
        let mut b = builder();
        let callee = b.declare_function("noop", &[], IrType::Void, false, true);
        let caller = b.declare_function("caller", &[], IrType::Void, false, true);
        let entry = b.append_block(caller.index, "entry");
        b.position_at_end(caller.index, entry);
        assert!(b.call(&callee, vec![]).is_none());
    }
}
