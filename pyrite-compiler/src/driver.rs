// Driver: collect -> declare -> emit -> verify -> optimise -> object ->
// link. Object emission is cached by content hash of the IR plus the
// target triple; failures surface as formatted diagnostics, never as a
// host backtrace, and no partial object files are written.

use std::path::{Path, PathBuf};

use pyrite_diagnostics::{codes, Category, Diagnostic, Span};
use sha2::{Digest, Sha256};

use crate::abi::TargetAbi;
use crate::functions::{Collector, FunctionManager};
use crate::lower::Unit;

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// LLVM optimisation level 0..3; the `PYRITE_OPT_LEVEL` environment
    /// variable supplies the default
    pub opt_level: u8,
    pub build_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub target: TargetAbi,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            opt_level: opt_level_from_env(),
            build_dir: PathBuf::from("build"),
            output: None,
            target: TargetAbi::host(),
        }
    }
}

/// `PYRITE_OPT_LEVEL` clamped to 0..=3, defaulting to 0.
pub fn opt_level_from_env() -> u8 {
    std::env::var("PYRITE_OPT_LEVEL")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .map(|v| v.min(3))
        .unwrap_or(0)
}

fn external_error(code: &str, message: String) -> Diagnostic {
    Diagnostic::error(Category::External, code, message, Span::unknown())
}

/// Run the front half of the pipeline on in-memory source: collect,
/// declare, emit, verify. Returns the populated unit; the textual IR is
/// `unit.builder.module.render()`.
pub fn compile_source(
    file: &str,
    source: &str,
    target: TargetAbi,
    loader: &mut dyn FnMut(&str) -> Option<pyrite_ast::Module>,
) -> Result<Unit, Diagnostic> {
    let module = pyrite_parser::parse_module(file, source).map_err(|e| {
        let (line, column) = match &e {
            pyrite_parser::ParseError::UnexpectedToken { line, column, .. } => (*line, *column),
            _ => (0, 0),
        };
        Diagnostic::error(
            Category::Parse,
            codes::SYNTAX_ERROR,
            e.to_string(),
            Span::new(file.to_string(), line, column, 1),
        )
    })?;

    let mut unit = Unit::new(file, source, target);
    {
        let mut collector = Collector::new(&mut unit);
        collector.collect_module(&module, loader)?;
    }

    FunctionManager::declare_all(&mut unit)?;
    FunctionManager::emit_all(&mut unit)?;

    verify_module(&unit.builder.module)?;
    Ok(unit)
}

/// Structural IR verification: every defined function has an entry block
/// and every block ends in a terminator.
pub fn verify_module(module: &crate::ir::Module) -> Result<(), Diagnostic> {
    for function in &module.functions {
        if function.is_declaration() {
            continue;
        }
        if function.blocks.is_empty() {
            return Err(external_error(
                codes::VERIFY_FAILED,
                format!("function `{}` has no entry block", function.name),
            ));
        }
        for block in &function.blocks {
            if !block.is_terminated() {
                return Err(external_error(
                    codes::VERIFY_FAILED,
                    format!(
                        "block `{}` of `{}` has no terminator",
                        block.label, function.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// A file loader resolving `from m import ...` to sibling `.pyr` files.
pub fn sibling_loader(source_dir: PathBuf) -> impl FnMut(&str) -> Option<pyrite_ast::Module> {
    move |module_name: &str| {
        let path = source_dir.join(format!("{}.pyr", module_name.replace('.', "/")));
        let text = std::fs::read_to_string(&path).ok()?;
        match pyrite_parser::parse_module(&path.display().to_string(), &text) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("failed to parse imported module {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Content hash of the rendered IR plus the target triple; the object
/// cache key.
pub fn ir_cache_key(ir_text: &str, triple: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ir_text.as_bytes());
    hasher.update(triple.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Emit a native object from textual IR through the system toolchain,
/// cached by IR content hash. The object lands at
/// `<build>/<source-stem>.<triple>.o`.
pub fn emit_object(
    unit: &Unit,
    options: &DriverOptions,
) -> Result<PathBuf, Diagnostic> {
    let ir_text = unit.builder.module.render();
    let triple = options.target.triple();
    let key = ir_cache_key(&ir_text, triple);

    let stem = Path::new(&unit.file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    std::fs::create_dir_all(&options.build_dir).map_err(|e| {
        external_error(
            codes::CC_FAILED,
            format!("cannot create {}: {}", options.build_dir.display(), e),
        )
    })?;

    let ll_path = options.build_dir.join(format!("{}.ll", stem));
    let obj_path = options.build_dir.join(format!("{}.{}.o", stem, triple));
    let stamp_path = options.build_dir.join(format!("{}.{}.hash", stem, triple));

    // Cache hit: object exists and was produced from identical IR.
    let cached = std::fs::read_to_string(&stamp_path)
        .map(|stamp| stamp == key && obj_path.exists())
        .unwrap_or(false);
    if cached {
        log::info!("object cache hit for {}", obj_path.display());
        return Ok(obj_path);
    }

    std::fs::write(&ll_path, &ir_text).map_err(|e| {
        external_error(
            codes::CC_FAILED,
            format!("cannot write {}: {}", ll_path.display(), e),
        )
    })?;

    let cc = crate::cimport::find_cc(None).ok_or_else(|| {
        external_error(
            codes::CC_FAILED,
            "no C compiler found (tried $CC, cc, clang, gcc)".to_string(),
        )
    })?;

    // Write to a temp path first so a failed run leaves no partial
    // object behind.
    let tmp_obj = obj_path.with_extension("o.tmp");
    let output = std::process::Command::new(&cc)
        .arg("-c")
        .arg(&ll_path)
        .arg("-o")
        .arg(&tmp_obj)
        .arg(format!("-O{}", options.opt_level))
        .output()
        .map_err(|e| {
            external_error(codes::CC_FAILED, format!("failed to run {}: {}", cc, e))
        })?;
    if !output.status.success() {
        let _ = std::fs::remove_file(&tmp_obj);
        return Err(external_error(
            codes::CC_FAILED,
            format!(
                "object emission failed:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    std::fs::rename(&tmp_obj, &obj_path).map_err(|e| {
        external_error(
            codes::CC_FAILED,
            format!("cannot move object into place: {}", e),
        )
    })?;
    let _ = std::fs::write(&stamp_path, &key);
    Ok(obj_path)
}

/// Link the unit's object plus every registered link object into an
/// executable.
pub fn link_executable(
    unit: &Unit,
    main_object: &Path,
    options: &DriverOptions,
) -> Result<PathBuf, Diagnostic> {
    let output = options.output.clone().unwrap_or_else(|| {
        let stem = Path::new(&unit.file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("a.out");
        options.build_dir.join(stem)
    });

    let cc = crate::cimport::find_cc(None).ok_or_else(|| {
        external_error(
            codes::LINK_FAILED,
            "no linker driver found (tried $CC, cc, clang, gcc)".to_string(),
        )
    })?;

    let mut command = std::process::Command::new(&cc);
    command.arg(main_object);
    for object in unit.registry.link_objects() {
        command.arg(object);
    }
    for lib in unit.registry.extern_libs() {
        command.arg(format!("-l{}", lib));
    }
    command.arg("-o").arg(&output);

    log::info!("linking {}", output.display());
    let result = command.output().map_err(|e| {
        external_error(codes::LINK_FAILED, format!("failed to run {}: {}", cc, e))
    })?;
    if !result.status.success() {
        return Err(external_error(
            codes::LINK_FAILED,
            format!(
                "link failed:\n{}",
                String::from_utf8_lossy(&result.stderr)
            ),
        ));
    }
    Ok(output)
}

/// The full eager pipeline over a source file, producing an executable.
pub fn compile_to_executable(
    path: &Path,
    options: &DriverOptions,
) -> Result<PathBuf, Diagnostic> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        external_error(
            codes::CIMPORT_NOT_FOUND,
            format!("cannot read {}: {}", path.display(), e),
        )
    })?;
    let source_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut loader = sibling_loader(source_dir);

    let unit = compile_source(
        &path.display().to_string(),
        &source,
        options.target,
        &mut loader,
    )?;
    let object = emit_object(&unit, options)?;
    link_executable(&unit, &object, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_cache_key_tracks_content_and_triple() {
        let a = ir_cache_key("define i32 @f()", "x86_64-unknown-linux-gnu");
        let b = ir_cache_key("define i32 @f()", "x86_64-unknown-linux-gnu");
        let c = ir_cache_key("define i32 @f()", "aarch64-unknown-linux-gnu");
        let d = ir_cache_key("define i64 @f()", "x86_64-unknown-linux-gnu");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn verify_rejects_unterminated_blocks() {
        let mut module = crate::ir::Module::new("t", "");
        let mut func = crate::ir::Function::new("f", crate::ir::IrType::Void, vec![], false);
        func.append_block("entry");
        module.add_function(func);
        let err = verify_module(&module).unwrap_err();
        assert_eq!(err.code, codes::VERIFY_FAILED);
    }

    #[test]
    fn opt_level_defaults_to_zero() {
        // The variable is unset in the test environment.
        if std::env::var("PYRITE_OPT_LEVEL").is_err() {
            assert_eq!(opt_level_from_env(), 0);
        }
    }
}
