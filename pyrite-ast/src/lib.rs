use serde::{Deserialize, Serialize};

/// Position of a node in its source file. Line and column are 1-based;
/// `line == 0` means the position is unknown (synthesized nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Self {
            line,
            column,
            length,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Root of a parsed source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub path: String,
    pub body: Vec<Stmt>,
}

/// A decorator application above a `def` or `class`.
/// `@compile`, `@compile(suffix=i64)`, `@extern(lib="m")`, `@struct`, ...
/// The collection pass interprets the name and arguments; the parser keeps
/// them as ordinary expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub span: Span,
}

/// A keyword argument `name=value` in a call or decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

/// Function parameter with its (required for compiled code) annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub span: Span,
}

/// `def name(params) -> returns: body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Decorator>,
    pub span: Span,
}

impl FuncDef {
    /// A function containing any `yield` is compiled as a generator.
    pub fn is_generator(&self) -> bool {
        fn stmt_has_yield(stmt: &Stmt) -> bool {
            match &stmt.kind {
                StmtKind::Expr(e) => expr_has_yield(e),
                StmtKind::If { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::For { body, orelse, .. } => {
                    body.iter().any(stmt_has_yield) || orelse.iter().any(stmt_has_yield)
                }
                StmtKind::Match { cases, .. } => cases
                    .iter()
                    .any(|case| case.body.iter().any(stmt_has_yield)),
                StmtKind::With { body, .. } => body.iter().any(stmt_has_yield),
                _ => false,
            }
        }
        fn expr_has_yield(expr: &Expr) -> bool {
            matches!(expr.kind, ExprKind::Yield(_))
        }
        self.body.iter().any(stmt_has_yield)
    }
}

/// A field declaration inside an aggregate class body: `name: annotation`.
/// Enum variants may carry an explicit tag: `Name: (payload, tag)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub annotation: Expr,
    pub span: Span,
}

/// `class Name:` with field declarations, marked by an aggregate decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub decorators: Vec<Decorator>,
    pub span: Span,
}

/// One `case pattern [if guard]:` clause of a match statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// One `ctx [as alias]` item of a with statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    FuncDef(FuncDef),
    ClassDef(ClassDef),
    /// `target: annotation [= value]`
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    /// `target = value`
    Assign {
        target: Expr,
        value: Expr,
    },
    /// `target op= value`
    AugAssign {
        target: Expr,
        op: BinOpKind,
        value: Expr,
    },
    Expr(Expr),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    /// `from module import name [as alias], ...`
    ImportFrom {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    /// `import module [as alias]`
    Import {
        module: String,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// `a.b.c` chains rendered back to a dotted path, if the expression
    /// is such a chain.
    pub fn dotted_path(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(name) => Some(name.clone()),
            ExprKind::Attribute { value, attr } => {
                value.dotted_path().map(|base| format!("{}.{}", base, attr))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i128),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name(String),
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOpKind,
        right: Box<Expr>,
    },
    /// `and` / `or` with short-circuit evaluation
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    /// Chained comparison: `left op0 comparators[0] op1 comparators[1] ...`
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOpKind>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    /// `value[index]`; `index` may be a Tuple for multi-dimensional
    /// subscripts or a Slice for named-field annotation syntax
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    /// `lower: upper` inside a subscript (annotation field syntax)
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// `*value` argument unpacking
    Starred(Box<Expr>),
    Yield(Option<Box<Expr>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl std::fmt::Display for BinOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::FloorDiv => "//",
            BinOpKind::Mod => "%",
            BinOpKind::Pow => "**",
            BinOpKind::BitAnd => "&",
            BinOpKind::BitOr => "|",
            BinOpKind::BitXor => "^",
            BinOpKind::Shl => "<<",
            BinOpKind::Shr => ">>",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Neg,
    Pos,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl std::fmt::Display for CmpOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOpKind::Eq => "==",
            CmpOpKind::NotEq => "!=",
            CmpOpKind::Lt => "<",
            CmpOpKind::LtE => "<=",
            CmpOpKind::Gt => ">",
            CmpOpKind::GtE => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Patterns in `case` clauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// Integer or other literal value
    Literal(Expr),
    /// `_`
    Wildcard,
    /// Bare name that binds the subject
    Capture(String),
    /// Dotted value pattern like `Status.Ok` (tag-only enum match)
    Value(Expr),
    /// Constructor form `Status.Ok(x)`
    Constructor { path: Expr, args: Vec<Pattern> },
    /// `a | b | c`
    Or(Vec<Pattern>),
    /// `(p1, p2, ...)`
    Tuple(Vec<Pattern>),
    /// `[p1, p2, ...]`
    List(Vec<Pattern>),
}

impl Pattern {
    /// Names bound by this pattern, in source order.
    pub fn bound_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_bound_names(&mut names);
        names
    }

    fn collect_bound_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Capture(name) => out.push(name.clone()),
            Pattern::Constructor { args, .. } => {
                for arg in args {
                    arg.collect_bound_names(out);
                }
            }
            Pattern::Or(alts) => {
                // All alternatives bind the same names; take the first.
                if let Some(first) = alts.first() {
                    first.collect_bound_names(out);
                }
            }
            Pattern::Tuple(items) | Pattern::List(items) => {
                for item in items {
                    item.collect_bound_names(out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Expr {
        Expr::new(ExprKind::Name(s.to_string()), Span::unknown())
    }

    #[test]
    fn dotted_path_roundtrip() {
        let expr = Expr::new(
            ExprKind::Attribute {
                value: Box::new(Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(name("effect")),
                        attr: "rng".to_string(),
                    },
                    Span::unknown(),
                )),
                attr: "next".to_string(),
            },
            Span::unknown(),
        );
        assert_eq!(expr.dotted_path().as_deref(), Some("effect.rng.next"));
    }

    #[test]
    fn generator_detection_sees_nested_yield() {
        let yield_stmt = Stmt {
            kind: StmtKind::Expr(Expr::new(ExprKind::Yield(None), Span::unknown())),
            span: Span::unknown(),
        };
        let func = FuncDef {
            name: "gen".to_string(),
            params: vec![],
            returns: None,
            body: vec![Stmt {
                kind: StmtKind::While {
                    test: name("running"),
                    body: vec![yield_stmt],
                    orelse: vec![],
                },
                span: Span::unknown(),
            }],
            decorators: vec![],
            span: Span::unknown(),
        };
        assert!(func.is_generator());
    }

    #[test]
    fn pattern_bound_names_in_order() {
        let pattern = Pattern::Tuple(vec![
            Pattern::Capture("x".to_string()),
            Pattern::Wildcard,
            Pattern::Capture("y".to_string()),
        ]);
        assert_eq!(pattern.bound_names(), vec!["x", "y"]);
    }
}
