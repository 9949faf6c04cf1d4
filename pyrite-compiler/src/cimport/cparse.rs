// Minimal C declaration parser: extracts function prototypes from a
// header or source file and maps C types onto the lattice. Anything it
// cannot express (aggregate parameters, function pointers in arguments)
// is skipped with a log message rather than failing the import.

use crate::types::{FloatKind, PcType};

#[derive(Debug, Clone, PartialEq)]
pub struct CFunction {
    pub name: String,
    pub params: Vec<(Option<String>, PcType)>,
    pub ret: PcType,
    pub var_arg: bool,
}

/// Strip comments and preprocessor lines; the remainder is a sequence of
/// declarations.
fn strip_noise(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            }
            '#' => {
                // preprocessor directive: skip to unescaped newline
                let mut prev = '#';
                for n in chars.by_ref() {
                    if n == '\n' && prev != '\\' {
                        out.push('\n');
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Split the cleaned source into top-level statements, skipping brace
/// bodies (function definitions count as declarations of their
/// prototype).
fn top_level_chunks(source: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in source.chars() {
        match c {
            '{' => {
                depth += 1;
                if depth == 1 {
                    // The prototype before a definition body ends here.
                    chunks.push(current.trim().to_string());
                    current.clear();
                }
            }
            '}' => {
                depth = depth.saturating_sub(1);
            }
            ';' if depth == 0 => {
                chunks.push(current.trim().to_string());
                current.clear();
            }
            _ if depth == 0 => current.push(c),
            _ => {}
        }
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Map a C type spelling (tokens before the declarator name) to a PC
/// type. Returns None for shapes outside the supported subset.
fn c_type(tokens: &[&str]) -> Option<PcType> {
    let mut unsigned = false;
    let mut signed = false;
    let mut longs = 0usize;
    let mut base: Option<&str> = None;
    let mut pointers = 0usize;

    for token in tokens {
        match *token {
            "const" | "extern" | "static" | "inline" | "register" | "volatile" | "restrict" => {}
            "unsigned" => unsigned = true,
            "signed" => signed = true,
            "long" => longs += 1,
            "*" => pointers += 1,
            "void" | "char" | "short" | "int" | "float" | "double" | "size_t" | "int8_t"
            | "int16_t" | "int32_t" | "int64_t" | "uint8_t" | "uint16_t" | "uint32_t"
            | "uint64_t" | "_Bool" | "bool" => base = Some(token),
            _ => return None,
        }
    }
    let _ = signed;

    let scalar = match (base, longs) {
        (Some("void"), _) => PcType::Void,
        (Some("char"), _) => {
            if unsigned {
                PcType::int(8, false)
            } else {
                PcType::Char
            }
        }
        (Some("short"), _) => PcType::int(16, !unsigned),
        (Some("int"), 0) | (None, 1) | (None, 2) => {
            let width = match longs {
                0 => 32,
                _ => 64,
            };
            PcType::int(width, !unsigned)
        }
        (Some("int"), _) => PcType::int(64, !unsigned),
        (Some("float"), _) => PcType::Float(FloatKind::F32),
        (Some("double"), 0) => PcType::Float(FloatKind::F64),
        (Some("double"), _) => PcType::Float(FloatKind::F128),
        (Some("size_t"), _) => PcType::int(64, false),
        (Some("int8_t"), _) => PcType::int(8, true),
        (Some("int16_t"), _) => PcType::int(16, true),
        (Some("int32_t"), _) => PcType::int(32, true),
        (Some("int64_t"), _) => PcType::int(64, true),
        (Some("uint8_t"), _) => PcType::int(8, false),
        (Some("uint16_t"), _) => PcType::int(16, false),
        (Some("uint32_t"), _) => PcType::int(32, false),
        (Some("uint64_t"), _) => PcType::int(64, false),
        (Some("_Bool"), _) | (Some("bool"), _) => PcType::Bool,
        (None, 0) => return None,
        _ => return None,
    };

    let mut ty = scalar;
    for _ in 0..pointers {
        ty = PcType::ptr(ty);
    }
    Some(ty)
}

fn tokenize(decl: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in decl.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.push(c);
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if c == '*' {
                tokens.push("*".to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_param(param: &str) -> Option<(Option<String>, PcType)> {
    let trimmed = param.trim();
    if trimmed.is_empty() || trimmed == "void" {
        return None;
    }
    let tokens = tokenize(trimmed);
    let token_refs: Vec<&str> = tokens.iter().map(|s| s.as_str()).collect();

    // If the last token is not a type keyword or `*`, it is the name.
    let (type_tokens, name) = match token_refs.split_last() {
        Some((last, rest))
            if !rest.is_empty()
                && c_type(std::slice::from_ref(last)).is_none()
                && *last != "*" =>
        {
            (rest.to_vec(), Some((*last).to_string()))
        }
        _ => (token_refs.clone(), None),
    };

    c_type(&type_tokens).map(|ty| (name, ty))
}

/// Parse every supported extern prototype in a header/source text.
pub fn parse_declarations(source: &str) -> Vec<CFunction> {
    let cleaned = strip_noise(source);
    let mut functions = Vec::new();

    for chunk in top_level_chunks(&cleaned) {
        let Some(open) = chunk.find('(') else { continue };
        let Some(close) = chunk.rfind(')') else { continue };
        if close < open {
            continue;
        }

        let head = &chunk[..open];
        let head_tokens = tokenize(head);
        let Some((name, ret_tokens)) = head_tokens.split_last() else {
            continue;
        };
        if ret_tokens.is_empty() || name.is_empty() {
            continue;
        }
        let ret_refs: Vec<&str> = ret_tokens.iter().map(|s| s.as_str()).collect();
        let Some(ret) = c_type(&ret_refs) else {
            log::debug!("cimport: skipping `{}` (unsupported return type)", name);
            continue;
        };

        let params_text = &chunk[open + 1..close];
        let mut params = Vec::new();
        let mut var_arg = false;
        let mut supported = true;
        for piece in params_text.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if piece == "..." {
                var_arg = true;
                continue;
            }
            if piece == "void" {
                continue;
            }
            match parse_param(piece) {
                Some(param) => params.push(param),
                None => {
                    log::debug!(
                        "cimport: skipping `{}` (unsupported parameter `{}`)",
                        name,
                        piece
                    );
                    supported = false;
                    break;
                }
            }
        }
        if !supported {
            continue;
        }

        functions.push(CFunction {
            name: name.clone(),
            params,
            ret,
            var_arg,
        });
    }

    functions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_prototypes() {
        let header = "int add(int a, int b);\ndouble scale(double x);\n";
        let fns = parse_declarations(header);
        assert_eq!(fns.len(), 2);
        assert_eq!(fns[0].name, "add");
        assert_eq!(fns[0].params.len(), 2);
        assert_eq!(fns[0].ret, PcType::int(32, true));
        assert_eq!(fns[1].ret, PcType::Float(FloatKind::F64));
    }

    #[test]
    fn pointers_and_unsigned() {
        let header = "unsigned long hash(const char *s, size_t n);";
        let fns = parse_declarations(header);
        assert_eq!(fns.len(), 1);
        assert_eq!(fns[0].ret, PcType::int(64, false));
        assert_eq!(fns[0].params[0].1, PcType::ptr(PcType::Char));
        assert_eq!(fns[0].params[1].1, PcType::int(64, false));
    }

    #[test]
    fn comments_and_preprocessor_are_ignored() {
        let header = "#include <stdint.h>\n/* block */\n// line\nint32_t get(void);\n";
        let fns = parse_declarations(header);
        assert_eq!(fns.len(), 1);
        assert_eq!(fns[0].name, "get");
        assert!(fns[0].params.is_empty());
    }

    #[test]
    fn definitions_yield_their_prototype() {
        let source = "int helper(int x) { return x * 2; }\nint other(void) { return 1; }";
        let fns = parse_declarations(source);
        assert_eq!(fns.len(), 2);
        assert_eq!(fns[0].name, "helper");
        assert_eq!(fns[1].name, "other");
    }

    #[test]
    fn varargs_and_unsupported_params() {
        let header = "int printf(const char *fmt, ...);\nvoid take_struct(struct Foo f);";
        let fns = parse_declarations(header);
        assert_eq!(fns.len(), 1);
        assert!(fns[0].var_arg);
    }

    #[test]
    fn param_names_are_optional() {
        let header = "float mix(float, float b);";
        let fns = parse_declarations(header);
        assert_eq!(fns[0].params[0].0, None);
        assert_eq!(fns[0].params[1].0.as_deref(), Some("b"));
    }
}
