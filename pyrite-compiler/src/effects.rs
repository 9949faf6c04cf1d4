// Effect resolver: compile-time capabilities. A program writes
// `effect.rng.next()` and lowering substitutes a concrete function at
// compile time. Resolution priority: sealed direct binding > innermost
// caller override > library default.
//
// An implementation is identified by a name; operation `op` of
// implementation `X` resolves to the function instance with unmangled
// name `X_<op>`.

use std::collections::HashMap;

use pyrite_diagnostics::{codes, Category, Diagnostic, Span};

/// One `with effect(...)` context frame
#[derive(Debug, Clone, Default)]
pub struct EffectFrame {
    /// capability -> implementation name
    pub overrides: HashMap<String, String>,
    /// mandatory when overrides are present; pushed even when empty so a
    /// context can exist purely to add a suffix
    pub suffix: String,
}

#[derive(Debug, Default)]
pub struct EffectResolver {
    /// `effect.C = impl` bindings; sealed, cannot be overridden
    sealed: HashMap<String, String>,
    /// `effect.default(C=impl)` library defaults
    defaults: HashMap<String, String>,
    /// active `with effect(...)` contexts, innermost last
    stack: Vec<EffectFrame>,
    /// (capability, suffix snapshot) -> resolved implementation
    cache: HashMap<(String, String), String>,
}

impl EffectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `effect.C = impl`: direct binding, wins over everything and cannot
    /// be rebound.
    pub fn seal(&mut self, capability: &str, implementation: &str) -> Result<(), Diagnostic> {
        if let Some(existing) = self.sealed.get(capability) {
            if existing != implementation {
                return Err(Diagnostic::error(
                    Category::External,
                    codes::EFFECT_SEALED,
                    format!(
                        "capability `{}` is already sealed to `{}`",
                        capability, existing
                    ),
                    Span::unknown(),
                ));
            }
            return Ok(());
        }
        self.sealed
            .insert(capability.to_string(), implementation.to_string());
        Ok(())
    }

    /// `effect.default(C=impl)`: library default, lowest priority.
    pub fn set_default(&mut self, capability: &str, implementation: &str) {
        self.defaults
            .entry(capability.to_string())
            .or_insert_with(|| implementation.to_string());
    }

    /// Enter a `with effect(...)` context. A suffix is mandatory when
    /// overrides are specified; a context with no overrides may be
    /// entered purely to push a suffix.
    pub fn push_context(&mut self, frame: EffectFrame) -> Result<(), Diagnostic> {
        if !frame.overrides.is_empty() && frame.suffix.is_empty() {
            return Err(Diagnostic::error(
                Category::External,
                codes::EFFECT_SUFFIX_REQUIRED,
                "effect overrides require a suffix".to_string(),
                Span::unknown(),
            )
            .with_help("write `with effect(..., suffix=\"name\"):`".to_string()));
        }
        self.stack.push(frame);
        Ok(())
    }

    /// Leave the innermost context. Callers pop in a `finally` position so
    /// the stack unwinds even on failure.
    pub fn pop_context(&mut self) {
        self.stack.pop();
    }

    pub fn context_depth(&self) -> usize {
        self.stack.len()
    }

    /// Concatenated suffix of the active context stack, outermost first.
    pub fn suffix_snapshot(&self) -> String {
        let parts: Vec<&str> = self
            .stack
            .iter()
            .filter(|f| !f.suffix.is_empty())
            .map(|f| f.suffix.as_str())
            .collect();
        parts.join(".")
    }

    /// Resolve a capability to an implementation name, caching by
    /// (capability, suffix snapshot).
    pub fn resolve(&mut self, capability: &str) -> Result<String, Diagnostic> {
        let key = (capability.to_string(), self.suffix_snapshot());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(capability).ok_or_else(|| {
            Diagnostic::error(
                Category::External,
                codes::EFFECT_UNRESOLVED,
                format!("no implementation bound for capability `{}`", capability),
                Span::unknown(),
            )
            .with_help(format!(
                "bind it with `effect.{0} = impl`, `with effect({0}=impl, suffix=...)`, or `effect.default({0}=impl)`",
                capability
            ))
        })?;

        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Flattened view of the active override stack, innermost winning.
    /// Snapshotted into `FunctionInfo.effect_bindings` at collection time.
    pub fn active_overrides(&self) -> Vec<(String, String)> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for frame in self.stack.iter().rev() {
            for (cap, implementation) in &frame.overrides {
                if seen.insert(cap.clone()) {
                    out.push((cap.clone(), implementation.clone()));
                }
            }
        }
        out
    }

    fn resolve_uncached(&self, capability: &str) -> Option<String> {
        if let Some(sealed) = self.sealed.get(capability) {
            return Some(sealed.clone());
        }
        for frame in self.stack.iter().rev() {
            if let Some(hit) = frame.overrides.get(capability) {
                return Some(hit.clone());
            }
        }
        self.defaults.get(capability).cloned()
    }

    /// Unmangled function name implementing one operation of a capability
    /// implementation.
    pub fn operation_function(implementation: &str, operation: &str) -> String {
        format!("{}_{}", implementation, operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(cap: &str, implementation: &str, suffix: &str) -> EffectFrame {
        let mut overrides = HashMap::new();
        overrides.insert(cap.to_string(), implementation.to_string());
        EffectFrame {
            overrides,
            suffix: suffix.to_string(),
        }
    }

    #[test]
    fn default_is_lowest_priority() {
        let mut r = EffectResolver::new();
        r.set_default("rng", "default_rng");
        assert_eq!(r.resolve("rng").expect("resolve"), "default_rng");

        r.push_context(frame("rng", "crypto_rng", "crypto"))
            .expect("push");
        assert_eq!(r.resolve("rng").expect("resolve"), "crypto_rng");
        r.pop_context();
        assert_eq!(r.resolve("rng").expect("resolve"), "default_rng");
    }

    #[test]
    fn sealed_binding_wins_over_override() {
        let mut r = EffectResolver::new();
        r.seal("rng", "hw_rng").expect("seal");
        r.push_context(frame("rng", "crypto_rng", "crypto"))
            .expect("push");
        assert_eq!(r.resolve("rng").expect("resolve"), "hw_rng");
    }

    #[test]
    fn sealing_twice_with_different_impl_fails() {
        let mut r = EffectResolver::new();
        r.seal("rng", "a").expect("first seal");
        assert!(r.seal("rng", "b").is_err());
        assert!(r.seal("rng", "a").is_ok());
    }

    #[test]
    fn overrides_require_suffix() {
        let mut r = EffectResolver::new();
        let mut overrides = HashMap::new();
        overrides.insert("rng".to_string(), "x".to_string());
        let err = r
            .push_context(EffectFrame {
                overrides,
                suffix: String::new(),
            })
            .unwrap_err();
        assert_eq!(err.code, codes::EFFECT_SUFFIX_REQUIRED);
    }

    #[test]
    fn suffix_only_context_is_allowed() {
        let mut r = EffectResolver::new();
        r.push_context(EffectFrame {
            overrides: HashMap::new(),
            suffix: "variant".to_string(),
        })
        .expect("push");
        assert_eq!(r.suffix_snapshot(), "variant");
    }

    #[test]
    fn nested_contexts_stack_suffixes() {
        let mut r = EffectResolver::new();
        r.push_context(frame("rng", "a", "outer")).expect("push");
        r.push_context(frame("clock", "b", "inner")).expect("push");
        assert_eq!(r.suffix_snapshot(), "outer.inner");
        // innermost override wins for its capability
        assert_eq!(r.resolve("rng").expect("resolve"), "a");
        assert_eq!(r.resolve("clock").expect("resolve"), "b");
        r.pop_context();
        assert_eq!(r.suffix_snapshot(), "outer");
    }

    #[test]
    fn cache_distinguishes_suffix_snapshots() {
        let mut r = EffectResolver::new();
        r.set_default("rng", "default_rng");
        assert_eq!(r.resolve("rng").expect("resolve"), "default_rng");
        r.push_context(frame("rng", "crypto_rng", "crypto"))
            .expect("push");
        // same capability, different snapshot -> fresh resolution
        assert_eq!(r.resolve("rng").expect("resolve"), "crypto_rng");
    }

    #[test]
    fn unresolved_capability_reports() {
        let mut r = EffectResolver::new();
        let err = r.resolve("rng").unwrap_err();
        assert_eq!(err.code, codes::EFFECT_UNRESOLVED);
    }

    #[test]
    fn operation_function_naming() {
        assert_eq!(
            EffectResolver::operation_function("crypto_rng", "next"),
            "crypto_rng_next"
        );
    }
}
