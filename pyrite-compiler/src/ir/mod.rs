// In-memory LLVM IR: module, functions, blocks, instructions, and the
// textual rendering handed to the system toolchain.

pub mod types;

pub use types::{align_of, field_offset, size_of, IrType, TypeTable};

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

/// Integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntPredicate {
    fn name(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        }
    }
}

/// Float comparison predicates (ordered forms)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

impl FloatPredicate {
    fn name(self) -> &'static str {
        match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::One => "one",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinOp {
    fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::SRem => "srem",
            BinOp::URem => "urem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

impl CastOp {
    fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::FpToSi => "fptosi",
            CastOp::FpToUi => "fptoui",
            CastOp::SiToFp => "sitofp",
            CastOp::UiToFp => "uitofp",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::Bitcast => "bitcast",
        }
    }
}

/// Compile-time constant
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(IrType, i128),
    Float(IrType, f64),
    Null(IrType),
    Undef(IrType),
    /// zeroinitializer for aggregates
    Zero(IrType),
    Array(IrType, Vec<Constant>),
    Struct(IrType, Vec<Constant>),
    /// Address of a global or function symbol
    Global(String, IrType),
}

impl Constant {
    pub fn ty(&self) -> IrType {
        match self {
            Constant::Int(ty, _)
            | Constant::Float(ty, _)
            | Constant::Null(ty)
            | Constant::Undef(ty)
            | Constant::Zero(ty)
            | Constant::Array(ty, _)
            | Constant::Struct(ty, _)
            | Constant::Global(_, ty) => ty.clone(),
        }
    }

    fn render_value(&self) -> String {
        match self {
            Constant::Int(ty, v) => {
                if *ty == IrType::Int(1) {
                    if *v != 0 { "true".into() } else { "false".into() }
                } else {
                    format!("{}", v)
                }
            }
            Constant::Float(_, v) => render_float(*v),
            Constant::Null(_) => "null".into(),
            Constant::Undef(_) => "undef".into(),
            Constant::Zero(_) => "zeroinitializer".into(),
            Constant::Array(_, elems) => {
                let inner: Vec<String> = elems
                    .iter()
                    .map(|e| format!("{} {}", e.ty(), e.render_value()))
                    .collect();
                format!("[{}]", inner.join(", "))
            }
            Constant::Struct(_, elems) => {
                let inner: Vec<String> = elems
                    .iter()
                    .map(|e| format!("{} {}", e.ty(), e.render_value()))
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
            Constant::Global(name, _) => format!("@{}", name),
        }
    }
}

/// LLVM requires float constants in hex or exact decimal form; hex of the
/// IEEE-754 double bits is always exact.
fn render_float(v: f64) -> String {
    format!("0x{:016X}", v.to_bits())
}

/// SSA value reference: a temporary, a function argument, or a constant.
/// Carries its own type so instructions render without context lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Temp(u32, IrType),
    Arg(u32, IrType),
    Const(Constant),
}

impl Val {
    pub fn ty(&self) -> IrType {
        match self {
            Val::Temp(_, ty) | Val::Arg(_, ty) => ty.clone(),
            Val::Const(c) => c.ty(),
        }
    }

    pub fn const_int(ty: IrType, v: i128) -> Val {
        Val::Const(Constant::Int(ty, v))
    }

    pub fn const_bool(v: bool) -> Val {
        Val::Const(Constant::Int(IrType::Int(1), v as i128))
    }

    fn render(&self) -> String {
        match self {
            Val::Temp(id, _) => format!("%t{}", id),
            Val::Arg(i, _) => format!("%a{}", i),
            Val::Const(c) => c.render_value(),
        }
    }

    fn render_typed(&self) -> String {
        format!("{} {}", self.ty(), self.render())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone)]
pub enum Inst {
    Binary {
        op: BinOp,
        result: u32,
        lhs: Val,
        rhs: Val,
    },
    ICmp {
        pred: IntPredicate,
        result: u32,
        lhs: Val,
        rhs: Val,
    },
    FCmp {
        pred: FloatPredicate,
        result: u32,
        lhs: Val,
        rhs: Val,
    },
    Alloca {
        result: u32,
        ty: IrType,
    },
    Load {
        result: u32,
        ty: IrType,
        ptr: Val,
    },
    Store {
        value: Val,
        ptr: Val,
    },
    Gep {
        result: u32,
        base_ty: IrType,
        ptr: Val,
        indices: Vec<Val>,
    },
    Cast {
        op: CastOp,
        result: u32,
        value: Val,
        to: IrType,
    },
    Call {
        /// None for void calls
        result: Option<u32>,
        ret_ty: IrType,
        callee: Val,
        args: Vec<Val>,
        /// sret attribute on the first argument
        sret: Option<IrType>,
        var_arg: bool,
    },
    ExtractValue {
        result: u32,
        agg: Val,
        indices: Vec<u32>,
    },
    InsertValue {
        result: u32,
        agg: Val,
        value: Val,
        indices: Vec<u32>,
    },
    Select {
        result: u32,
        cond: Val,
        then_val: Val,
        else_val: Val,
    },
    // Terminators
    Br {
        dest: BlockId,
    },
    CondBr {
        cond: Val,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Switch {
        value: Val,
        default: BlockId,
        cases: Vec<(i128, BlockId)>,
    },
    Ret {
        value: Option<Val>,
    },
    Unreachable,
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br { .. }
                | Inst::CondBr { .. }
                | Inst::Switch { .. }
                | Inst::Ret { .. }
                | Inst::Unreachable
        )
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
}

impl Block {
    pub fn is_terminated(&self) -> bool {
        self.insts.last().map(Inst::is_terminator).unwrap_or(false)
    }
}

/// Parameter attributes that matter for the C ABI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAttrs {
    pub sret: Option<IrType>,
    pub byval: Option<IrType>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret_ty: IrType,
    pub params: Vec<(IrType, ParamAttrs)>,
    pub var_arg: bool,
    pub blocks: Vec<Block>,
    pub internal: bool,
    next_value: u32,
    next_label: u32,
}

impl Function {
    pub fn new(name: &str, ret_ty: IrType, params: Vec<(IrType, ParamAttrs)>, var_arg: bool) -> Self {
        Self {
            name: name.to_string(),
            ret_ty,
            params,
            var_arg,
            blocks: Vec::new(),
            internal: false,
            next_value: 0,
            next_label: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn arg(&self, index: usize) -> Val {
        let ty = self
            .params
            .get(index)
            .map(|(ty, _)| ty.clone())
            .unwrap_or(IrType::Void);
        Val::Arg(index as u32, ty)
    }

    pub fn append_block(&mut self, name: &str) -> BlockId {
        let label = format!("{}{}", name, self.next_label);
        self.next_label += 1;
        self.blocks.push(Block {
            label,
            insts: Vec::new(),
        });
        BlockId(self.blocks.len() - 1)
    }

    pub fn fresh_value(&mut self) -> u32 {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    pub fn fn_type(&self) -> IrType {
        IrType::Func {
            params: self.params.iter().map(|(ty, _)| ty.clone()).collect(),
            ret: Box::new(self.ret_ty.clone()),
            var_arg: self.var_arg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
    pub init: Constant,
    pub internal: bool,
}

/// A complete IR module. Identified struct types live in `struct_types`;
/// an entry with `None` fields is opaque (used during two-stage cyclic
/// aggregate resolution).
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub triple: String,
    pub struct_types: Vec<(String, Option<Vec<IrType>>)>,
    struct_index: HashMap<String, usize>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    function_index: HashMap<String, usize>,
}

impl Module {
    pub fn new(name: &str, triple: &str) -> Self {
        Self {
            name: name.to_string(),
            triple: triple.to_string(),
            ..Default::default()
        }
    }

    /// Install an opaque identified struct; returns the `Named` reference.
    pub fn declare_struct(&mut self, name: &str) -> IrType {
        if !self.struct_index.contains_key(name) {
            self.struct_index
                .insert(name.to_string(), self.struct_types.len());
            self.struct_types.push((name.to_string(), None));
        }
        IrType::Named(name.to_string())
    }

    /// Fill in the field list of a previously declared struct.
    pub fn define_struct(&mut self, name: &str, fields: Vec<IrType>) {
        match self.struct_index.get(name) {
            Some(&idx) => self.struct_types[idx].1 = Some(fields),
            None => {
                self.struct_index
                    .insert(name.to_string(), self.struct_types.len());
                self.struct_types.push((name.to_string(), Some(fields)));
            }
        }
    }

    pub fn add_function(&mut self, function: Function) -> usize {
        let idx = self.functions.len();
        self.function_index.insert(function.name.clone(), idx);
        self.functions.push(function);
        idx
    }

    pub fn function_named(&self, name: &str) -> Option<&Function> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    pub fn function_idx(&self, name: &str) -> Option<usize> {
        self.function_index.get(name).copied()
    }

    pub fn add_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    /// Render the whole module as textual LLVM IR.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; ModuleID = '{}'", self.name);
        if !self.triple.is_empty() {
            let _ = writeln!(out, "target triple = \"{}\"", self.triple);
        }
        out.push('\n');

        for (name, fields) in &self.struct_types {
            match fields {
                Some(fields) => {
                    let rendered: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
                    let _ = writeln!(out, "%{} = type {{ {} }}", name, rendered.join(", "));
                }
                None => {
                    let _ = writeln!(out, "%{} = type opaque", name);
                }
            }
        }
        if !self.struct_types.is_empty() {
            out.push('\n');
        }

        for global in &self.globals {
            let linkage = if global.internal { "internal " } else { "" };
            let _ = writeln!(
                out,
                "@{} = {}global {} {}",
                global.name,
                linkage,
                global.ty,
                global.init.render_value()
            );
        }
        if !self.globals.is_empty() {
            out.push('\n');
        }

        for function in &self.functions {
            out.push_str(&self.render_function(function));
            out.push('\n');
        }

        out
    }

    fn render_params(&self, function: &Function, with_names: bool) -> String {
        let mut parts: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, (ty, attrs))| {
                let mut s = ty.to_string();
                if let Some(sret_ty) = &attrs.sret {
                    let _ = write!(s, " sret({})", sret_ty);
                }
                if let Some(byval_ty) = &attrs.byval {
                    let _ = write!(s, " byval({})", byval_ty);
                }
                if with_names {
                    let _ = write!(s, " %a{}", i);
                }
                s
            })
            .collect();
        if function.var_arg {
            parts.push("...".to_string());
        }
        parts.join(", ")
    }

    fn render_function(&self, function: &Function) -> String {
        let mut out = String::new();
        if function.is_declaration() {
            let _ = writeln!(
                out,
                "declare {} @{}({})",
                function.ret_ty,
                function.name,
                self.render_params(function, false)
            );
            return out;
        }

        let linkage = if function.internal { "internal " } else { "" };
        let _ = writeln!(
            out,
            "define {}{} @{}({}) {{",
            linkage,
            function.ret_ty,
            function.name,
            self.render_params(function, true)
        );
        for block in &function.blocks {
            let _ = writeln!(out, "{}:", block.label);
            for inst in &block.insts {
                let _ = writeln!(out, "  {}", self.render_inst(function, inst));
            }
        }
        out.push_str("}\n");
        out
    }

    fn block_label<'f>(&self, function: &'f Function, id: BlockId) -> &'f str {
        function
            .blocks
            .get(id.0)
            .map(|b| b.label.as_str())
            .unwrap_or("badblock")
    }

    fn render_inst(&self, function: &Function, inst: &Inst) -> String {
        match inst {
            Inst::Binary {
                op,
                result,
                lhs,
                rhs,
            } => format!(
                "%t{} = {} {} {}, {}",
                result,
                op.name(),
                lhs.ty(),
                lhs.render(),
                rhs.render()
            ),
            Inst::ICmp {
                pred,
                result,
                lhs,
                rhs,
            } => format!(
                "%t{} = icmp {} {} {}, {}",
                result,
                pred.name(),
                lhs.ty(),
                lhs.render(),
                rhs.render()
            ),
            Inst::FCmp {
                pred,
                result,
                lhs,
                rhs,
            } => format!(
                "%t{} = fcmp {} {} {}, {}",
                result,
                pred.name(),
                lhs.ty(),
                lhs.render(),
                rhs.render()
            ),
            Inst::Alloca { result, ty } => format!("%t{} = alloca {}", result, ty),
            Inst::Load { result, ty, ptr } => format!(
                "%t{} = load {}, {} {}",
                result,
                ty,
                ptr.ty(),
                ptr.render()
            ),
            Inst::Store { value, ptr } => format!(
                "store {}, {} {}",
                value.render_typed(),
                ptr.ty(),
                ptr.render()
            ),
            Inst::Gep {
                result,
                base_ty,
                ptr,
                indices,
            } => {
                let idx: Vec<String> = indices.iter().map(|v| v.render_typed()).collect();
                format!(
                    "%t{} = getelementptr {}, {} {}, {}",
                    result,
                    base_ty,
                    ptr.ty(),
                    ptr.render(),
                    idx.join(", ")
                )
            }
            Inst::Cast {
                op,
                result,
                value,
                to,
            } => format!(
                "%t{} = {} {} to {}",
                result,
                op.name(),
                value.render_typed(),
                to
            ),
            Inst::Call {
                result,
                ret_ty,
                callee,
                args,
                sret,
                var_arg,
            } => {
                let rendered_args: Vec<String> = args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        if i == 0 {
                            if let Some(sret_ty) = sret {
                                return format!(
                                    "{} sret({}) {}",
                                    a.ty(),
                                    sret_ty,
                                    a.render()
                                );
                            }
                        }
                        a.render_typed()
                    })
                    .collect();
                // varargs calls must spell the full function type
                let ty_str = if *var_arg {
                    let param_tys: Vec<String> = args.iter().map(|a| a.ty().to_string()).collect();
                    format!("{} ({}, ...)", ret_ty, param_tys.join(", "))
                } else {
                    ret_ty.to_string()
                };
                match result {
                    Some(r) => format!(
                        "%t{} = call {} {}({})",
                        r,
                        ty_str,
                        callee.render(),
                        rendered_args.join(", ")
                    ),
                    None => format!(
                        "call {} {}({})",
                        ty_str,
                        callee.render(),
                        rendered_args.join(", ")
                    ),
                }
            }
            Inst::ExtractValue {
                result,
                agg,
                indices,
            } => {
                let idx: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                format!(
                    "%t{} = extractvalue {}, {}",
                    result,
                    agg.render_typed(),
                    idx.join(", ")
                )
            }
            Inst::InsertValue {
                result,
                agg,
                value,
                indices,
            } => {
                let idx: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                format!(
                    "%t{} = insertvalue {}, {}, {}",
                    result,
                    agg.render_typed(),
                    value.render_typed(),
                    idx.join(", ")
                )
            }
            Inst::Select {
                result,
                cond,
                then_val,
                else_val,
            } => format!(
                "%t{} = select {}, {}, {}",
                result,
                cond.render_typed(),
                then_val.render_typed(),
                else_val.render_typed()
            ),
            Inst::Br { dest } => format!("br label %{}", self.block_label(function, *dest)),
            Inst::CondBr {
                cond,
                then_dest,
                else_dest,
            } => format!(
                "br {}, label %{}, label %{}",
                cond.render_typed(),
                self.block_label(function, *then_dest),
                self.block_label(function, *else_dest)
            ),
            Inst::Switch {
                value,
                default,
                cases,
            } => {
                let mut s = format!(
                    "switch {}, label %{} [ ",
                    value.render_typed(),
                    self.block_label(function, *default)
                );
                for (case_val, dest) in cases {
                    let _ = write!(
                        s,
                        "{} {}, label %{} ",
                        value.ty(),
                        case_val,
                        self.block_label(function, *dest)
                    );
                }
                s.push(']');
                s
            }
            Inst::Ret { value } => match value {
                Some(v) => format!("ret {}", v.render_typed()),
                None => "ret void".to_string(),
            },
            Inst::Unreachable => "unreachable".to_string(),
        }
    }
}

impl TypeTable for Module {
    fn struct_fields(&self, name: &str) -> Option<&[IrType]> {
        self.struct_index
            .get(name)
            .and_then(|&i| self.struct_types[i].1.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_function() {
        let mut module = Module::new("test", "x86_64-unknown-linux-gnu");
        let mut func = Function::new(
            "add",
            IrType::Int(32),
            vec![
                (IrType::Int(32), ParamAttrs::default()),
                (IrType::Int(32), ParamAttrs::default()),
            ],
            false,
        );
        let entry = func.append_block("entry");
        let result = func.fresh_value();
        let lhs = func.arg(0);
        let rhs = func.arg(1);
        func.blocks[entry.0].insts.push(Inst::Binary {
            op: BinOp::Add,
            result,
            lhs,
            rhs,
        });
        func.blocks[entry.0].insts.push(Inst::Ret {
            value: Some(Val::Temp(result, IrType::Int(32))),
        });
        module.add_function(func);

        let text = module.render();
        assert!(text.contains("define i32 @add(i32 %a0, i32 %a1) {"));
        assert!(text.contains("%t0 = add i32 %a0, %a1"));
        assert!(text.contains("ret i32 %t0"));
    }

    #[test]
    fn render_identified_struct_and_opaque() {
        let mut module = Module::new("test", "");
        module.declare_struct("Node");
        module.define_struct(
            "Node",
            vec![
                IrType::Int(32),
                IrType::Named("Node".into()).ptr_to(),
            ],
        );
        module.declare_struct("Opaque");
        let text = module.render();
        assert!(text.contains("%Node = type { i32, %Node* }"));
        assert!(text.contains("%Opaque = type opaque"));
    }

    #[test]
    fn render_sret_call_and_declaration() {
        let mut module = Module::new("test", "");
        let big = IrType::Struct(vec![IrType::Int(64); 3]);
        let func = Function::new(
            "make_big",
            IrType::Void,
            vec![(
                big.clone().ptr_to(),
                ParamAttrs {
                    sret: Some(big.clone()),
                    byval: None,
                },
            )],
            false,
        );
        module.add_function(func);
        let text = module.render();
        assert!(text.contains(
            "declare void @make_big({ i64, i64, i64 }* sret({ i64, i64, i64 }))"
        ));
    }

    #[test]
    fn terminated_block_detection() {
        let mut func = Function::new("f", IrType::Void, vec![], false);
        let entry = func.append_block("entry");
        assert!(!func.blocks[entry.0].is_terminated());
        func.blocks[entry.0].insts.push(Inst::Ret { value: None });
        assert!(func.blocks[entry.0].is_terminated());
    }

    #[test]
    fn float_constants_render_as_bit_patterns() {
        let c = Constant::Float(IrType::Double, 1.5);
        assert_eq!(c.render_value(), "0x3FF8000000000000");
    }

    #[test]
    fn switch_renders_all_cases() {
        let mut module = Module::new("test", "");
        let mut func = Function::new("dispatch", IrType::Void, vec![(IrType::Int(32), ParamAttrs::default())], false);
        let entry = func.append_block("entry");
        let a = func.append_block("state");
        let b = func.append_block("state");
        for block in [a, b] {
            func.blocks[block.0].insts.push(Inst::Ret { value: None });
        }
        let value = func.arg(0);
        func.blocks[entry.0].insts.push(Inst::Switch {
            value,
            default: a,
            cases: vec![(0, a), (1, b)],
        });
        module.add_function(func);
        let text = module.render();
        assert!(text.contains("switch i32 %a0, label %state1 [ i32 0, label %state1 i32 1, label %state2 ]"));
    }
}
