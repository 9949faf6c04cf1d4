// Function manager: decorator-driven collection, deterministic name
// mangling, and the two-pass declare/emit pipeline that makes mutual
// recursion work regardless of definition order.

use std::collections::{HashMap, HashSet};

use pyrite_ast::{ClassDef, Decorator, Expr, ExprKind, FuncDef, Module, Stmt, StmtKind};
use pyrite_diagnostics::{codes, Category, Diagnostic, Span as DiagSpan};

use crate::effects::EffectFrame;
use crate::lower::{FunctionLowerer, Unit};
use crate::registry::{
    AggregateInfo, AggregateKind, FunctionInfo, FunctionKind, VariantInfo,
};
use crate::resolver::TypeResolver;
use crate::types::{PcType, PyValue};

/// Build the mangled name: `unmangled + '.' + suffix_fragment`, with the
/// effect suffix appended after the user suffix. No suffix means the
/// mangled name equals the unmangled name.
pub fn mangle(unmangled: &str, suffix: Option<&PyValue>, effect_suffix: &str) -> String {
    let mut name = unmangled.to_string();
    if let Some(suffix) = suffix {
        let fragment = suffix.mangle_fragment();
        if !fragment.is_empty() {
            name.push('.');
            name.push_str(&fragment);
        }
    }
    if !effect_suffix.is_empty() {
        name.push('.');
        name.push_str(effect_suffix);
    }
    name
}

/// Mangled name of an overloaded call: argument type fragments joined
/// into the suffix position.
pub fn mangle_overload(unmangled: &str, arg_types: &[PcType]) -> String {
    let fragments: Vec<String> = arg_types.iter().map(|t| t.mangle_fragment()).collect();
    format!("{}.{}", unmangled, fragments.join("_"))
}

fn diag_span(file: &str, span: pyrite_ast::Span) -> DiagSpan {
    DiagSpan::new(file.to_string(), span.line, span.column, span.length.max(1))
}

/// Interpreted decorator set of one definition
#[derive(Debug, Default)]
struct DecoratorInfo {
    kind: Option<&'static str>, // compile | inline | extern | struct | union | enum
    suffix: Option<PyValue>,
    anonymous: bool,
    overload: bool,
    linear: bool,
    lib: Option<String>,
    sources: Vec<String>,
    objects: Vec<String>,
    enum_tag: Option<Expr>,
}

/// The decorator-driven collection pass. Walks parsed modules, interprets
/// decorators, resolves annotations, and installs registry entries.
/// Import statements inside `with effect(...)` load sibling modules under
/// the active context, which is how suffix overrides propagate
/// transitively.
pub struct Collector<'u> {
    pub unit: &'u mut Unit,
    /// module name -> already collected (import cycle guard)
    loaded: HashSet<String>,
    /// per-module transitive effect users, innermost module last
    effect_users: Vec<HashSet<String>>,
    anon_counter: usize,
}

impl<'u> Collector<'u> {
    pub fn new(unit: &'u mut Unit) -> Self {
        Self {
            unit,
            loaded: HashSet::new(),
            effect_users: Vec::new(),
            anon_counter: 0,
        }
    }

    /// Collect every compiled definition of a module, in file order.
    /// The set of functions that (transitively) touch overridable effects
    /// is computed up front so the active context suffix lands on every
    /// one of them.
    pub fn collect_module(
        &mut self,
        module: &Module,
        loader: &mut dyn FnMut(&str) -> Option<Module>,
    ) -> Result<(), Diagnostic> {
        self.effect_users
            .push(transitive_effect_users(&module.body));
        let mut result = Ok(());
        for stmt in &module.body {
            result = self.collect_stmt(stmt, loader);
            if result.is_err() {
                break;
            }
        }
        self.effect_users.pop();
        result
    }

    fn collect_stmt(
        &mut self,
        stmt: &Stmt,
        loader: &mut dyn FnMut(&str) -> Option<Module>,
    ) -> Result<(), Diagnostic> {
        match &stmt.kind {
            StmtKind::FuncDef(func) => self.collect_function(func),
            StmtKind::ClassDef(class) => self.collect_class(class),
            StmtKind::With { items, body } => self.collect_with(items, body, loader),
            StmtKind::ImportFrom { module, names } => self.collect_import(module, names, loader),
            StmtKind::Expr(expr) => self.collect_effect_call(expr),
            StmtKind::Assign { target, value } => self.collect_effect_seal(target, value),
            _ => Ok(()),
        }
    }

    /// `with effect(C=impl, suffix=s):` at module level: push the frame,
    /// collect the body (usually imports), pop on the way out even when
    /// collection fails.
    fn collect_with(
        &mut self,
        items: &[pyrite_ast::WithItem],
        body: &[Stmt],
        loader: &mut dyn FnMut(&str) -> Option<Module>,
    ) -> Result<(), Diagnostic> {
        let mut pushed = 0usize;
        let mut result = Ok(());

        for item in items {
            match self.effect_frame_of(&item.context) {
                Ok(Some(frame)) => match self.unit.effects.push_context(frame) {
                    Ok(()) => pushed += 1,
                    Err(diag) => {
                        result = Err(diag);
                        break;
                    }
                },
                Ok(None) => {}
                Err(diag) => {
                    result = Err(diag);
                    break;
                }
            }
        }

        if result.is_ok() {
            for stmt in body {
                result = self.collect_stmt(stmt, loader);
                if result.is_err() {
                    break;
                }
            }
        }

        for _ in 0..pushed {
            self.unit.effects.pop_context();
        }
        result
    }

    /// Interpret `effect(C=impl, suffix="s")` into a context frame.
    fn effect_frame_of(&self, context: &Expr) -> Result<Option<EffectFrame>, Diagnostic> {
        let ExprKind::Call { func, keywords, .. } = &context.kind else {
            return Ok(None);
        };
        if func.dotted_path().as_deref() != Some("effect") {
            return Ok(None);
        }
        let mut frame = EffectFrame::default();
        for kw in keywords {
            if kw.name == "suffix" {
                if let ExprKind::Str(s) = &kw.value.kind {
                    frame.suffix = s.clone();
                }
                continue;
            }
            let Some(impl_name) = kw.value.dotted_path() else {
                return Err(Diagnostic::error(
                    Category::External,
                    codes::EFFECT_UNRESOLVED,
                    format!("effect implementation for `{}` must be a name", kw.name),
                    diag_span(&self.unit.file, kw.value.span),
                ));
            };
            frame.overrides.insert(kw.name.clone(), impl_name);
        }
        Ok(Some(frame))
    }

    /// `effect.default(C=impl)` expression statements.
    fn collect_effect_call(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        let ExprKind::Call { func, keywords, .. } = &expr.kind else {
            return Ok(());
        };
        if func.dotted_path().as_deref() != Some("effect.default") {
            return Ok(());
        }
        for kw in keywords {
            if let Some(impl_name) = kw.value.dotted_path() {
                self.unit.effects.set_default(&kw.name, &impl_name);
            }
        }
        Ok(())
    }

    /// `effect.C = impl` assignment statements: sealed direct bindings.
    fn collect_effect_seal(&mut self, target: &Expr, value: &Expr) -> Result<(), Diagnostic> {
        let ExprKind::Attribute { value: base, attr } = &target.kind else {
            return Ok(());
        };
        if base.dotted_path().as_deref() != Some("effect") {
            return Ok(());
        }
        let Some(impl_name) = value.dotted_path() else {
            return Ok(());
        };
        self.unit.effects.seal(attr, &impl_name)
    }

    /// `from module import name [as alias]`: load and collect the module
    /// under the current effect context, then record call aliases for the
    /// imported (possibly suffixed) instances.
    fn collect_import(
        &mut self,
        module: &str,
        names: &[(String, Option<String>)],
        loader: &mut dyn FnMut(&str) -> Option<Module>,
    ) -> Result<(), Diagnostic> {
        let snapshot = self.unit.effects.suffix_snapshot();
        let load_key = format!("{}::{}", module, snapshot);
        if self.loaded.insert(load_key) {
            if let Some(parsed) = loader(module) {
                self.collect_module(&parsed, loader)?;
            }
        }

        for (name, alias) in names {
            let visible = alias.clone().unwrap_or_else(|| name.clone());
            // Prefer the instance compiled under the active suffix.
            let suffixed = mangle(name, None, &snapshot);
            let target = if self.unit.registry.has_function(&suffixed) {
                suffixed
            } else {
                name.clone()
            };
            self.unit.import_aliases.insert(visible, target);
        }
        Ok(())
    }

    // ----- definitions -----

    fn decorator_info(&mut self, decorators: &[Decorator]) -> Result<DecoratorInfo, Diagnostic> {
        let mut info = DecoratorInfo::default();
        for dec in decorators {
            match dec.name.as_str() {
                "compile" | "inline" | "extern" | "struct" | "union" | "enum" => {
                    info.kind = Some(match dec.name.as_str() {
                        "compile" => "compile",
                        "inline" => "inline",
                        "extern" => "extern",
                        "struct" => "struct",
                        "union" => "union",
                        _ => "enum",
                    });
                }
                _ => continue,
            }
            if dec.name == "enum" {
                info.enum_tag = dec.args.first().cloned();
            }
            for kw in &dec.keywords {
                match kw.name.as_str() {
                    "suffix" => info.suffix = Some(self.const_eval(&kw.value)?),
                    "anonymous" => info.anonymous = matches!(kw.value.kind, ExprKind::Bool(true)),
                    "overload" => info.overload = matches!(kw.value.kind, ExprKind::Bool(true)),
                    "linear" => info.linear = matches!(kw.value.kind, ExprKind::Bool(true)),
                    "lib" => {
                        if let ExprKind::Str(s) = &kw.value.kind {
                            info.lib = Some(s.clone());
                        }
                    }
                    "sources" => info.sources = string_list(&kw.value),
                    "objects" => info.objects = string_list(&kw.value),
                    _ => {}
                }
            }
        }
        Ok(info)
    }

    /// Evaluate a suffix expression into a compile-time value: a type, an
    /// integer, or a tuple of those.
    fn const_eval(&self, expr: &Expr) -> Result<PyValue, Diagnostic> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(PyValue::Int(*v)),
            ExprKind::Str(s) => Ok(PyValue::Str(s.clone())),
            ExprKind::Tuple(items) => Ok(PyValue::Tuple(
                items
                    .iter()
                    .map(|i| self.const_eval(i))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            _ => {
                let resolver = TypeResolver::new(&self.unit.registry, &self.unit.file);
                let ty = resolver.resolve(expr, None)?;
                Ok(PyValue::Type(Box::new(ty)))
            }
        }
    }

    fn collect_function(&mut self, func: &FuncDef) -> Result<(), Diagnostic> {
        let info = self.decorator_info(&func.decorators)?;
        let Some(kind_name) = info.kind else {
            // Undecorated definitions stay interpreted; nothing to collect.
            return Ok(());
        };

        let kind = match kind_name {
            "compile" if func.is_generator() => FunctionKind::Generator,
            "compile" => FunctionKind::Compile,
            "inline" => FunctionKind::Inline,
            "extern" => FunctionKind::Extern,
            other => {
                return Err(Diagnostic::error(
                    Category::Annotation,
                    codes::BAD_ANNOTATION,
                    format!("decorator `@{}` cannot be applied to a function", other),
                    diag_span(&self.unit.file, func.span),
                ))
            }
        };

        let resolver = TypeResolver::new(&self.unit.registry, &self.unit.file);
        let mut param_names = Vec::new();
        let mut param_types = Vec::new();
        for param in &func.params {
            let Some(annotation) = &param.annotation else {
                return Err(Diagnostic::error(
                    Category::Annotation,
                    codes::BAD_ANNOTATION,
                    format!(
                        "parameter `{}` of compiled function `{}` needs a type annotation",
                        param.name, func.name
                    ),
                    diag_span(&self.unit.file, param.span),
                ));
            };
            param_names.push(param.name.clone());
            param_types.push(resolver.resolve(annotation, None)?);
        }
        let return_type = match &func.returns {
            Some(annotation) => resolver.resolve(annotation, None)?,
            None => PcType::Void,
        };

        let touches_effects = module_uses_effects(&func.body)
            || self
                .effect_users
                .last()
                .map(|users| users.contains(&func.name))
                .unwrap_or(false);
        let effect_suffix = if touches_effects {
            self.unit.effects.suffix_snapshot()
        } else {
            String::new()
        };

        let mut mangled = mangle(&func.name, info.suffix.as_ref(), &effect_suffix);
        if info.anonymous {
            mangled = format!("{}.anon{}", mangled, self.anon_counter);
            self.anon_counter += 1;
        }

        // Same unmangled name + same suffix -> same FunctionInfo.
        if self.unit.registry.has_function(&mangled) {
            return Ok(());
        }

        let mut effect_bindings = HashMap::new();
        for frame_cap in self.unit.effects.active_overrides() {
            effect_bindings.insert(frame_cap.0, frame_cap.1);
        }

        // Extern declarations may bring C sources or objects with them.
        let mut owns_object = false;
        if kind == FunctionKind::Extern && (!info.sources.is_empty() || !info.objects.is_empty()) {
            let options = crate::cimport::CImportOptions {
                lib: info.lib.clone(),
                sources: info.sources.iter().map(std::path::PathBuf::from).collect(),
                objects: info.objects.iter().map(std::path::PathBuf::from).collect(),
                compile_sources: !info.sources.is_empty(),
                ..Default::default()
            };
            crate::cimport::compile_and_register(self.unit, &options)?;
            owns_object = !info.sources.is_empty();
        }

        log::debug!("collected {} as {} ({:?})", func.name, mangled, kind);
        self.unit.registry.install_function(FunctionInfo {
            unmangled: func.name.clone(),
            mangled,
            param_names,
            param_types,
            return_type,
            kind,
            effect_bindings,
            lib: if kind == FunctionKind::Extern {
                Some(info.lib.unwrap_or_default())
            } else {
                None
            },
            source: Some(func.clone()),
            overload_enabled: info.overload,
            var_arg: false,
            owns_object,
        });
        Ok(())
    }

    fn collect_class(&mut self, class: &ClassDef) -> Result<(), Diagnostic> {
        let info = self.decorator_info(&class.decorators)?;
        let Some(kind_name) = info.kind else {
            return Ok(());
        };

        let effect_suffix = String::new();
        let name = mangle(&class.name, info.suffix.as_ref(), &effect_suffix);
        let resolver = TypeResolver::new(&self.unit.registry, &self.unit.file);

        match kind_name {
            "struct" | "union" => {
                let mut fields = Vec::new();
                for field in &class.fields {
                    let ty = resolver.resolve(&field.annotation, None)?;
                    fields.push(crate::types::Field {
                        name: Some(field.name.clone()),
                        ty,
                    });
                }
                self.unit.registry.install_aggregate(AggregateInfo {
                    name,
                    kind: if kind_name == "union" {
                        AggregateKind::Union
                    } else {
                        AggregateKind::Struct
                    },
                    fields,
                    variants: vec![],
                    linear: info.linear,
                });
            }
            "enum" => {
                let tag = match &info.enum_tag {
                    Some(expr) => resolver.resolve(expr, None)?,
                    None => PcType::int(32, true),
                };
                let variants = self.collect_variants(class, &resolver)?;
                self.unit.registry.install_aggregate(AggregateInfo {
                    name,
                    kind: AggregateKind::Enum { tag },
                    fields: vec![],
                    variants,
                    linear: info.linear,
                });
            }
            other => {
                return Err(Diagnostic::error(
                    Category::Annotation,
                    codes::BAD_ANNOTATION,
                    format!("decorator `@{}` cannot be applied to a class", other),
                    diag_span(&self.unit.file, class.span),
                ))
            }
        }
        Ok(())
    }

    /// Enum variants: `Name: payload`, `Name: (payload, tag)` with an
    /// explicit tag, or `Name: void`. Tags auto-number from 0 or last+1;
    /// explicit tags must not collide.
    fn collect_variants(
        &self,
        class: &ClassDef,
        resolver: &TypeResolver,
    ) -> Result<Vec<VariantInfo>, Diagnostic> {
        let mut variants: Vec<VariantInfo> = Vec::new();
        let mut used_tags = HashSet::new();
        let mut next_tag = 0i128;

        for field in &class.fields {
            let (payload_expr, explicit_tag) = match &field.annotation.kind {
                ExprKind::Tuple(items) if items.len() == 2 => {
                    let tag = match &items[1].kind {
                        ExprKind::Int(v) => Some(*v),
                        _ => None,
                    };
                    (Some(&items[0]), tag)
                }
                _ => (Some(&field.annotation), None),
            };

            let payload = match payload_expr {
                Some(expr) => {
                    let ty = resolver.resolve(expr, None)?;
                    if ty.is_void() {
                        None
                    } else {
                        Some(ty)
                    }
                }
                None => None,
            };

            let tag = explicit_tag.unwrap_or(next_tag);
            if !used_tags.insert(tag) {
                return Err(Diagnostic::error(
                    Category::Annotation,
                    codes::ENUM_TAG_COLLISION,
                    format!(
                        "enum `{}` variant `{}` reuses tag value {}",
                        class.name, field.name, tag
                    ),
                    diag_span(&self.unit.file, field.span),
                ));
            }
            next_tag = tag + 1;

            variants.push(VariantInfo {
                name: field.name.clone(),
                payload,
                tag,
            });
        }
        Ok(variants)
    }
}

fn string_list(expr: &Expr) -> Vec<String> {
    match &expr.kind {
        ExprKind::Str(s) => vec![s.clone()],
        ExprKind::List(items) | ExprKind::Tuple(items) => items
            .iter()
            .filter_map(|i| match &i.kind {
                ExprKind::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

/// Whether a statement list references `effect.<...>` anywhere.
pub fn module_uses_effects(body: &[Stmt]) -> bool {
    fn stmt_uses(stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => expr_uses(e),
            StmtKind::Assign { target, value } => expr_uses(target) || expr_uses(value),
            StmtKind::AnnAssign { value, .. } => value.as_ref().map(expr_uses).unwrap_or(false),
            StmtKind::AugAssign { target, value, .. } => expr_uses(target) || expr_uses(value),
            StmtKind::If { test, body, orelse } => {
                expr_uses(test) || body.iter().any(stmt_uses) || orelse.iter().any(stmt_uses)
            }
            StmtKind::While { test, body, orelse } => {
                expr_uses(test) || body.iter().any(stmt_uses) || orelse.iter().any(stmt_uses)
            }
            StmtKind::For {
                iter, body, orelse, ..
            } => expr_uses(iter) || body.iter().any(stmt_uses) || orelse.iter().any(stmt_uses),
            StmtKind::Match { subject, cases } => {
                expr_uses(subject)
                    || cases.iter().any(|c| {
                        c.guard.as_ref().map(expr_uses).unwrap_or(false)
                            || c.body.iter().any(stmt_uses)
                    })
            }
            StmtKind::With { body, .. } => body.iter().any(stmt_uses),
            _ => false,
        }
    }
    fn expr_uses(expr: &Expr) -> bool {
        if let Some(path) = expr.dotted_path() {
            if path.starts_with("effect.") {
                return true;
            }
        }
        match &expr.kind {
            ExprKind::Call { func, args, keywords } => {
                expr_uses(func)
                    || args.iter().any(expr_uses)
                    || keywords.iter().any(|k| expr_uses(&k.value))
            }
            ExprKind::BinOp { left, right, .. } => expr_uses(left) || expr_uses(right),
            ExprKind::UnaryOp { operand, .. } => expr_uses(operand),
            ExprKind::BoolOp { values, .. } => values.iter().any(expr_uses),
            ExprKind::Compare {
                left, comparators, ..
            } => expr_uses(left) || comparators.iter().any(expr_uses),
            ExprKind::Attribute { value, .. } => expr_uses(value),
            ExprKind::Subscript { value, index } => expr_uses(value) || expr_uses(index),
            ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().any(expr_uses),
            ExprKind::Starred(inner) => expr_uses(inner),
            ExprKind::Yield(Some(inner)) => expr_uses(inner),
            _ => false,
        }
    }
    body.iter().any(stmt_uses)
}

/// Fixpoint over one module's definitions: a function transitively
/// touches effects if its body references `effect.` or calls (by name)
/// another definition that does.
pub fn transitive_effect_users(body: &[Stmt]) -> HashSet<String> {
    let mut defs: Vec<&FuncDef> = Vec::new();
    collect_func_defs(body, &mut defs);

    let mut users: HashSet<String> = defs
        .iter()
        .filter(|f| module_uses_effects(&f.body))
        .map(|f| f.name.clone())
        .collect();

    loop {
        let mut changed = false;
        for def in &defs {
            if users.contains(&def.name) {
                continue;
            }
            let callees = called_names(&def.body);
            if callees.iter().any(|c| users.contains(c)) {
                users.insert(def.name.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    users
}

fn collect_func_defs<'a>(body: &'a [Stmt], out: &mut Vec<&'a FuncDef>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FuncDef(func) => out.push(func),
            StmtKind::With { body, .. } => collect_func_defs(body, out),
            _ => {}
        }
    }
}

/// Unqualified names called anywhere in a statement list.
pub fn called_names(body: &[Stmt]) -> HashSet<String> {
    let mut out = HashSet::new();
    fn walk_stmt(stmt: &Stmt, out: &mut HashSet<String>) {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => walk_expr(e, out),
            StmtKind::Assign { value, .. } => walk_expr(value, out),
            StmtKind::AnnAssign { value: Some(e), .. } => walk_expr(e, out),
            StmtKind::AugAssign { value, .. } => walk_expr(value, out),
            StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
                walk_expr(test, out);
                body.iter().for_each(|s| walk_stmt(s, out));
                orelse.iter().for_each(|s| walk_stmt(s, out));
            }
            StmtKind::For {
                iter, body, orelse, ..
            } => {
                walk_expr(iter, out);
                body.iter().for_each(|s| walk_stmt(s, out));
                orelse.iter().for_each(|s| walk_stmt(s, out));
            }
            StmtKind::Match { subject, cases } => {
                walk_expr(subject, out);
                for case in cases {
                    case.body.iter().for_each(|s| walk_stmt(s, out));
                }
            }
            StmtKind::With { body, .. } => body.iter().for_each(|s| walk_stmt(s, out)),
            _ => {}
        }
    }
    fn walk_expr(expr: &Expr, out: &mut HashSet<String>) {
        match &expr.kind {
            ExprKind::Call { func, args, keywords } => {
                if let ExprKind::Name(name) = &func.kind {
                    out.insert(name.clone());
                }
                walk_expr(func, out);
                args.iter().for_each(|a| walk_expr(a, out));
                keywords.iter().for_each(|k| walk_expr(&k.value, out));
            }
            ExprKind::BinOp { left, right, .. } => {
                walk_expr(left, out);
                walk_expr(right, out);
            }
            ExprKind::UnaryOp { operand, .. } => walk_expr(operand, out),
            ExprKind::BoolOp { values, .. } => values.iter().for_each(|v| walk_expr(v, out)),
            ExprKind::Compare {
                left, comparators, ..
            } => {
                walk_expr(left, out);
                comparators.iter().for_each(|c| walk_expr(c, out));
            }
            ExprKind::Attribute { value, .. } => walk_expr(value, out),
            ExprKind::Subscript { value, index } => {
                walk_expr(value, out);
                walk_expr(index, out);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().for_each(|i| walk_expr(i, out))
            }
            ExprKind::Starred(inner) => walk_expr(inner, out),
            ExprKind::Yield(Some(inner)) => walk_expr(inner, out),
            _ => {}
        }
    }
    body.iter().for_each(|s| walk_stmt(s, &mut out));
    out
}

/// The two-pass compiler. Pass 1 installs a forward declaration for every
/// collected `compile`/`extern` instance; pass 2 emits bodies. Because
/// every signature exists before any body, direct and mutual recursion
/// (including definition after first use) resolve by mangled-name lookup.
pub struct FunctionManager;

impl FunctionManager {
    /// Pass 1: declare every instance in registration order.
    pub fn declare_all(unit: &mut Unit) -> Result<(), Diagnostic> {
        for mangled in unit.registry.emission_order().to_vec() {
            let Some(info) = unit.registry.function(&mangled).cloned() else {
                continue;
            };
            match info.kind {
                FunctionKind::Compile | FunctionKind::Extern => {
                    Self::declare_one(unit, &info)?;
                }
                // Inline and generator kinds leave no artifact of their
                // own; their bodies expand at call/for sites.
                FunctionKind::Inline | FunctionKind::Generator => {}
            }
        }
        Ok(())
    }

    fn declare_one(unit: &mut Unit, info: &FunctionInfo) -> Result<(), Diagnostic> {
        if unit.wrappers.contains_key(&info.mangled) {
            return Ok(());
        }
        let mut param_tys = Vec::new();
        for ty in &info.param_types {
            if ty.is_zero_sized() {
                continue;
            }
            let lowered =
                crate::types::lower_type(ty, &unit.registry, &mut unit.builder.module);
            param_tys.push(lowered);
        }
        let ret_ty = crate::types::lower_type(
            &info.return_type,
            &unit.registry,
            &mut unit.builder.module,
        );
        let wrapper = unit.builder.declare_function(
            &info.mangled,
            &param_tys,
            ret_ty,
            info.var_arg,
            true,
        );
        unit.wrappers.insert(info.mangled.clone(), wrapper);
        Ok(())
    }

    /// Pass 2: emit bodies for `compile` instances, in registration order.
    pub fn emit_all(unit: &mut Unit) -> Result<(), Diagnostic> {
        for mangled in unit.registry.emission_order().to_vec() {
            let Some(info) = unit.registry.function(&mangled).cloned() else {
                continue;
            };
            if info.kind != FunctionKind::Compile {
                continue;
            }
            let mut lowerer = FunctionLowerer::new(unit, info)?;
            lowerer.emit_body()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PcType, PyValue};

    #[test]
    fn mangling_without_suffix_is_identity() {
        assert_eq!(mangle("random", None, ""), "random");
    }

    #[test]
    fn type_suffix_contributes_canonical_name() {
        let suffix = PyValue::Type(Box::new(PcType::int(64, true)));
        assert_eq!(mangle("ident", Some(&suffix), ""), "ident.i64");
    }

    #[test]
    fn tuple_suffix_joins_elements() {
        let suffix = PyValue::Tuple(vec![
            PyValue::Type(Box::new(PcType::int(32, true))),
            PyValue::Int(4),
        ]);
        assert_eq!(mangle("make", Some(&suffix), ""), "make.i32_4");
    }

    #[test]
    fn effect_suffix_appends_after_user_suffix() {
        let suffix = PyValue::Type(Box::new(PcType::int(32, true)));
        assert_eq!(mangle("random", Some(&suffix), "crypto"), "random.i32.crypto");
        assert_eq!(mangle("random", None, "crypto"), "random.crypto");
    }

    #[test]
    fn overload_mangling_uses_argument_fragments() {
        assert_eq!(
            mangle_overload("add", &[PcType::int(32, true), PcType::int(32, true)]),
            "add.i32_i32"
        );
    }

    #[test]
    fn mangling_is_deterministic() {
        let suffix = PyValue::Tuple(vec![PyValue::Int(1), PyValue::Int(2)]);
        assert_eq!(
            mangle("f", Some(&suffix), "s"),
            mangle("f", Some(&suffix), "s")
        );
    }
}
