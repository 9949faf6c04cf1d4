// C import: parse a C header or source into extern declarations,
// optionally compile the sources with the host C compiler, and register
// the resulting objects for the final link.

mod cparse;

pub use cparse::{parse_declarations, CFunction};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pyrite_diagnostics::{codes, Category, Diagnostic, Span};
use sha2::{Digest, Sha256};

use crate::lower::Unit;
use crate::registry::{FunctionInfo, FunctionKind};

#[derive(Debug, Clone, Default)]
pub struct CImportOptions {
    /// Library name for the linker; `Some("")` means symbols come from
    /// directly linked objects; `None` derives from the file name (or ""
    /// when sources are compiled).
    pub lib: Option<String>,
    pub sources: Vec<PathBuf>,
    pub objects: Vec<PathBuf>,
    pub compile_sources: bool,
    /// C compiler override; discovered from PATH when absent
    pub cc: Option<String>,
    pub cflags: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    /// Build directory root; defaults to `build/`
    pub build_root: Option<PathBuf>,
}

fn external_error(message: String) -> Diagnostic {
    Diagnostic::error(Category::External, codes::CC_FAILED, message, Span::unknown())
}

/// Content hash of a file, hex-encoded. Used to deduplicate link objects
/// supplied from different paths.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Cache key over the import inputs: path, mtime, lib, sources, objects.
pub fn cache_key(path: &Path, lib: &str, sources: &[PathBuf], objects: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    if let Ok(meta) = std::fs::metadata(path) {
        if let Ok(mtime) = meta.modified() {
            hasher.update(format!("{:?}", mtime).as_bytes());
        }
    }
    hasher.update(lib.as_bytes());
    let mut sorted_sources: Vec<&PathBuf> = sources.iter().collect();
    sorted_sources.sort();
    for src in sorted_sources {
        hasher.update(src.to_string_lossy().as_bytes());
        if let Ok(meta) = std::fs::metadata(src) {
            if let Ok(mtime) = meta.modified() {
                hasher.update(format!("{:?}", mtime).as_bytes());
            }
        }
    }
    let mut sorted_objects: Vec<&PathBuf> = objects.iter().collect();
    sorted_objects.sort();
    for obj in sorted_objects {
        hasher.update(obj.to_string_lossy().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Discover the host C compiler: $CC, then cc, clang, gcc on PATH.
pub fn find_cc(override_cc: Option<&str>) -> Option<String> {
    if let Some(cc) = override_cc {
        return Some(cc.to_string());
    }
    if let Ok(cc) = std::env::var("CC") {
        if !cc.is_empty() {
            return Some(cc);
        }
    }
    for candidate in ["cc", "clang", "gcc"] {
        if which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// The cache directory for one imported file, mirroring its path under
/// `build/cimport/`. Backslashes are normalized to forward slashes so
/// generated artifacts never embed escape-hazard paths.
pub fn cache_dir_for(build_root: &Path, path: &Path) -> PathBuf {
    let normalized = path
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string();
    let relative = normalized
        .split_once(':')
        .map(|(_, rest)| rest.trim_start_matches('/').to_string())
        .unwrap_or(normalized);
    build_root.join("cimport").join(relative)
}

/// Import a C header or source file. Registers `@extern`-style function
/// instances for every supported prototype, compiles sources when asked,
/// and records the object files for the link step. Returns the names of
/// the registered externs.
pub fn cimport(
    unit: &mut Unit,
    path: &Path,
    options: &CImportOptions,
) -> Result<Vec<String>, Diagnostic> {
    if !path.exists() {
        return Err(Diagnostic::error(
            Category::External,
            codes::CIMPORT_NOT_FOUND,
            format!("C file not found: {}", path.display()),
            Span::from_path(path),
        ));
    }

    let is_source = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("c"))
        .unwrap_or(false);

    // lib='' when sources are compiled: symbols resolve from the objects
    let lib = match &options.lib {
        Some(lib) => lib.clone(),
        None if options.compile_sources => String::new(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
    };

    let mut sources = options.sources.clone();
    if is_source && options.compile_sources && !sources.contains(&path.to_path_buf()) {
        sources.insert(0, path.to_path_buf());
    }

    let build_root = options
        .build_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("build"));
    let cache_dir = cache_dir_for(&build_root, path);
    let key = cache_key(path, &lib, &sources, &options.objects);

    // Bindings manifest: regenerated when the cache key moves.
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bindings");
    let manifest_path = cache_dir
        .parent()
        .unwrap_or(&cache_dir)
        .join(format!("bindings_{}.json", base));

    let source_text = std::fs::read_to_string(path)
        .map_err(|e| external_error(format!("cannot read {}: {}", path.display(), e)))?;
    let functions = parse_declarations(&source_text);

    if let Some(parent) = manifest_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let fresh = std::fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|text| serde_json::from_str::<BindingsManifest>(&text).ok())
        .map(|m| m.cache_key == key)
        .unwrap_or(false);
    if !fresh {
        let manifest = BindingsManifest {
            cache_key: key.clone(),
            lib: lib.clone(),
            functions: functions
                .iter()
                .map(|f| (f.name.clone(), f.params.len()))
                .collect(),
        };
        let rendered = serde_json::to_string_pretty(&manifest)
            .map_err(|e| external_error(format!("manifest encoding failed: {}", e)))?;
        let _ = std::fs::write(&manifest_path, rendered);
    }

    // Register extern instances
    let mut registered = Vec::new();
    for function in &functions {
        if unit.registry.has_function(&function.name) {
            continue;
        }
        unit.registry.install_function(FunctionInfo {
            unmangled: function.name.clone(),
            mangled: function.name.clone(),
            param_names: function
                .params
                .iter()
                .enumerate()
                .map(|(i, (name, _))| name.clone().unwrap_or_else(|| format!("arg{}", i)))
                .collect(),
            param_types: function.params.iter().map(|(_, ty)| ty.clone()).collect(),
            return_type: function.ret.clone(),
            kind: FunctionKind::Extern,
            effect_bindings: HashMap::new(),
            lib: Some(lib.clone()),
            source: None,
            overload_enabled: false,
            var_arg: function.var_arg,
            owns_object: false,
        });
        registered.push(function.name.clone());
    }

    let mut effective = options.clone();
    effective.sources = sources;
    compile_and_register(unit, &effective)?;

    Ok(registered)
}

/// Compile the listed C sources (when asked) and register every
/// resulting or pre-built object for the link step. Also the backing for
/// `@extern(sources=..., objects=...)` declarations.
pub fn compile_and_register(
    unit: &mut Unit,
    options: &CImportOptions,
) -> Result<(), Diagnostic> {
    let build_root = options
        .build_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("build"));

    if options.compile_sources && !options.sources.is_empty() {
        let cc = find_cc(options.cc.as_deref()).ok_or_else(|| {
            external_error("no C compiler found (tried $CC, cc, clang, gcc)".to_string())
        })?;
        for src in &options.sources {
            let object = object_path_for(&build_root, src);
            compile_c_source(&cc, src, &object, &options.cflags, &options.include_dirs)?;
            register_object(unit, &object)?;
        }
    }

    for object in &options.objects {
        register_object(unit, object)?;
    }
    Ok(())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct BindingsManifest {
    cache_key: String,
    lib: String,
    functions: Vec<(String, usize)>,
}

/// Object cache path for a C source: `build/<source-path>.o`.
pub fn object_path_for(build_root: &Path, source: &Path) -> PathBuf {
    let normalized = source
        .to_string_lossy()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string();
    build_root.join(format!("{}.o", normalized))
}

/// Compile one C source, reusing a cached object when the source has not
/// changed since.
fn compile_c_source(
    cc: &str,
    source: &Path,
    object: &Path,
    cflags: &[String],
    include_dirs: &[PathBuf],
) -> Result<(), Diagnostic> {
    let fresh = match (std::fs::metadata(object), std::fs::metadata(source)) {
        (Ok(obj_meta), Ok(src_meta)) => match (obj_meta.modified(), src_meta.modified()) {
            (Ok(obj_time), Ok(src_time)) => src_time <= obj_time,
            _ => false,
        },
        _ => false,
    };
    if fresh {
        log::debug!("cimport: reusing cached object {}", object.display());
        return Ok(());
    }

    if let Some(parent) = object.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| external_error(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    let mut command = std::process::Command::new(cc);
    command.arg("-c").arg(source).arg("-o").arg(object);
    for flag in cflags {
        command.arg(flag);
    }
    for dir in include_dirs {
        command.arg("-I").arg(dir);
    }

    log::info!("cimport: {} -c {}", cc, source.display());
    let output = command
        .output()
        .map_err(|e| external_error(format!("failed to run {}: {}", cc, e)))?;
    if !output.status.success() {
        return Err(external_error(format!(
            "C compilation of {} failed:\n{}",
            source.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn register_object(unit: &mut Unit, object: &Path) -> Result<(), Diagnostic> {
    let hash = content_hash(object)
        .map_err(|e| external_error(format!("cannot read {}: {}", object.display(), e)))?;
    if unit
        .registry
        .register_link_object(object.to_path_buf(), hash)
    {
        log::debug!("cimport: registered link object {}", object.display());
    } else {
        log::debug!(
            "cimport: duplicate object content, skipping {}",
            object.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::TargetAbi;
    use std::io::Write;

    #[test]
    fn cache_key_is_stable_and_input_sensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let header = dir.path().join("lib.h");
        std::fs::write(&header, "int f(void);").expect("write");

        let a = cache_key(&header, "m", &[], &[]);
        let b = cache_key(&header, "m", &[], &[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let c = cache_key(&header, "other", &[], &[]);
        assert_ne!(a, c);
    }

    #[test]
    fn missing_file_is_a_cimport_diagnostic() {
        let mut unit = Unit::new("t.pyr", "", TargetAbi::X86_64SysV);
        let err = cimport(
            &mut unit,
            Path::new("/nonexistent/helper.c"),
            &CImportOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::CIMPORT_NOT_FOUND);
    }

    #[test]
    fn header_import_registers_externs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let header = dir.path().join("mathx.h");
        let mut f = std::fs::File::create(&header).expect("create");
        writeln!(f, "int add(int a, int b);").expect("write");
        writeln!(f, "double halve(double x);").expect("write");
        drop(f);

        let mut unit = Unit::new("t.pyr", "", TargetAbi::X86_64SysV);
        let build = tempfile::tempdir().expect("tempdir");
        let options = CImportOptions {
            build_root: Some(build.path().to_path_buf()),
            ..CImportOptions::default()
        };
        let registered = cimport(&mut unit, &header, &options).expect("cimport");

        assert_eq!(registered, vec!["add".to_string(), "halve".to_string()]);
        let info = unit.registry.function("add").expect("registered");
        assert_eq!(info.kind, FunctionKind::Extern);
        assert_eq!(info.lib.as_deref(), Some("mathx"));
    }

    #[test]
    fn object_paths_mirror_source_paths() {
        let p = object_path_for(Path::new("build"), Path::new("/tmp/helper.c"));
        assert_eq!(p, PathBuf::from("build/tmp/helper.c.o"));
    }

    #[test]
    fn cache_dir_normalizes_separators() {
        let d = cache_dir_for(Path::new("build"), Path::new("C:\\src\\lib.h"));
        assert!(!d.to_string_lossy().contains('\\'));
    }
}
