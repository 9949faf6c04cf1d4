// Diagnostic system for the Pyrite compiler
// Structured errors with spans, categories, colors, and suggestions

use colored::Colorize;
use std::fmt;
use std::path::Path;

pub mod codes;

/// Source code location (line, column, file)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(file: String, line: usize, column: usize, length: usize) -> Self {
        Self {
            file,
            line,
            column,
            length,
        }
    }

    /// Derive line/column from a byte range into `source`.
    pub fn from_byte_range(file: &str, source: &str, range: std::ops::Range<usize>) -> Self {
        let before = &source[..range.start.min(source.len())];
        let line = before.chars().filter(|&c| c == '\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.len() + 1, |pos| before.len() - pos);
        let length = range.end.saturating_sub(range.start).max(1);

        Self {
            file: file.to_string(),
            line,
            column,
            length,
        }
    }

    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            file: path.display().to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Note,
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Error => write!(f, "{}", "error".red().bold()),
            Level::Warning => write!(f, "{}", "warning".yellow().bold()),
            Level::Note => write!(f, "{}", "note".cyan().bold()),
            Level::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// Category of a compilation failure. Printed with the diagnostic so that
/// callers (and test drivers) can match on the broad class of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Parse,
    Annotation,
    Typing,
    Abi,
    Linear,
    ControlFlow,
    External,
    Internal,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Category::Parse => "parse",
            Category::Annotation => "annotation",
            Category::Typing => "typing",
            Category::Abi => "abi",
            Category::Linear => "linear",
            Category::ControlFlow => "control-flow",
            Category::External => "external",
            Category::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Structured diagnostic message
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub category: Category,
    pub code: String, // e.g. "P0301" for a linear-token error
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(level: Level, category: Category, code: &str, message: String, span: Span) -> Self {
        Self {
            level,
            category,
            code: code.to_string(),
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(category: Category, code: &str, message: String, span: Span) -> Self {
        Self::new(Level::Error, category, code, message, span)
    }

    pub fn warning(category: Category, code: &str, message: String, span: Span) -> Self {
        Self::new(Level::Warning, category, code, message, span)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render with a source snippet and caret underline.
    pub fn format(&self, source_code: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{}[{}]: {} ({})\n",
            self.level,
            self.code,
            self.message.bold(),
            self.category
        ));

        output.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            self.span.file,
            self.span.line,
            self.span.column
        ));

        if let Some(snippet) = self.source_snippet(source_code) {
            output.push_str(&snippet);
        }

        for note in &self.notes {
            output.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }

        if let Some(help) = &self.help {
            output.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        output
    }

    fn format_simple(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{}[{}]: {} ({})\n",
            self.level,
            self.code,
            self.message.bold(),
            self.category
        ));
        output.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            self.span.file,
            self.span.line,
            self.span.column
        ));

        for note in &self.notes {
            output.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }
        if let Some(help) = &self.help {
            output.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }

        output
    }

    fn source_snippet(&self, source_code: &str) -> Option<String> {
        let lines: Vec<&str> = source_code.lines().collect();

        if self.span.line == 0 || self.span.line > lines.len() {
            return None;
        }

        let line = lines[self.span.line - 1];
        let line_num_width = self.span.line.to_string().len().max(2);

        let mut snippet = String::new();
        snippet.push_str(&format!(" {}\n", " ".repeat(line_num_width + 1)));
        snippet.push_str(&format!(
            " {} {} {}\n",
            format!("{:>width$}", self.span.line, width = line_num_width)
                .cyan()
                .bold(),
            "|".cyan().bold(),
            line
        ));

        let padding = " ".repeat(line_num_width + 3 + self.span.column.saturating_sub(1));
        let underline = "^".repeat(self.span.length.max(1));
        snippet.push_str(&format!(
            " {} {}{}\n",
            " ".repeat(line_num_width + 1),
            padding,
            underline.red().bold()
        ));

        Some(snippet)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for Diagnostic {}

/// Propose close name matches for "did you mean?" notes.
pub fn closest_matches<'a, I>(name: &str, candidates: I, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .map(|c| (strsim::jaro_winkler(name, c), c))
        .filter(|(score, _)| *score > 0.85)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(max)
        .map(|(_, c)| c.to_string())
        .collect()
}

/// Diagnostic collection engine. One per compilation unit.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            Level::Error => self.error_count += 1,
            Level::Warning => self.warning_count += 1,
            _ => {}
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Print all collected diagnostics to stderr, with source snippets.
    pub fn print_all(&self, source_code: &str) {
        for diag in &self.diagnostics {
            eprintln!("{}", diag.format(source_code));
        }
    }

    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "\n{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }
        if self.warning_count > 0 {
            eprintln!(
                "{}: {} warning{} emitted",
                "warning".yellow().bold(),
                self.warning_count,
                if self.warning_count == 1 { "" } else { "s" }
            );
        }
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.error_count = 0;
        self.warning_count = 0;
    }
}

/// Helpers for common diagnostic patterns
impl DiagnosticEngine {
    pub fn type_mismatch(&mut self, expected: &str, found: &str, span: Span) {
        self.emit(
            Diagnostic::error(
                Category::Typing,
                codes::TYPE_MISMATCH,
                "mismatched types".to_string(),
                span,
            )
            .with_note(format!("expected `{}`, found `{}`", expected, found)),
        );
    }

    pub fn unknown_name(&mut self, name: &str, span: Span, candidates: Vec<String>) {
        let mut diag = Diagnostic::error(
            Category::Typing,
            codes::UNDEFINED_NAME,
            format!("cannot find `{}` in this scope", name),
            span,
        );
        let refs: Vec<&str> = candidates.iter().map(|s| s.as_str()).collect();
        let matches = closest_matches(name, refs, 3);
        if let Some(best) = matches.first() {
            diag = diag.with_help(format!("did you mean `{}`?", best));
        }
        self.emit(diag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_from_byte_range() {
        let source = "line one\nline two\nline three";
        let span = Span::from_byte_range("t.pyr", source, 9..13);
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 1);
        assert_eq!(span.length, 4);
    }

    #[test]
    fn engine_counts_errors() {
        let mut engine = DiagnosticEngine::new();
        engine.type_mismatch("i32", "f64", Span::unknown());
        engine.emit(Diagnostic::warning(
            Category::Typing,
            "P0000",
            "test".into(),
            Span::unknown(),
        ));
        assert!(engine.has_errors());
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 1);
    }

    #[test]
    fn closest_match_finds_near_names() {
        let names = vec!["counter", "count", "pointer"];
        let matches = closest_matches("countr", names.iter().map(|s| &**s), 2);
        assert_eq!(matches.first().map(|s| s.as_str()), Some("counter"));
    }

    #[test]
    fn format_includes_category() {
        colored::control::set_override(false);
        let diag = Diagnostic::error(
            Category::Linear,
            codes::LINEAR_NOT_CONSUMED,
            "linear token not consumed".into(),
            Span::new("t.pyr".into(), 1, 1, 3),
        );
        let rendered = diag.format("tok = make()\n");
        assert!(rendered.contains("linear"));
        assert!(rendered.contains(codes::LINEAR_NOT_CONSUMED));
        colored::control::unset_override();
    }
}
