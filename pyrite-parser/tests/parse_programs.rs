// End-to-end parser tests over realistic dialect programs

use pyrite_ast::*;
use pyrite_parser::parse_module;

fn parse(source: &str) -> Module {
    parse_module("test.pyr", source).expect("parse failed")
}

#[test]
fn decorated_function_with_annotations() {
    let module = parse(
        "@compile\ndef add(a: i32, b: i32) -> i32:\n    return a + b\n",
    );
    assert_eq!(module.body.len(), 1);
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function definition");
    };
    assert_eq!(func.name, "add");
    assert_eq!(func.decorators.len(), 1);
    assert_eq!(func.decorators[0].name, "compile");
    assert_eq!(func.params.len(), 2);
    assert!(func.returns.is_some());
}

#[test]
fn compile_decorator_with_suffix() {
    let module = parse(
        "@compile(suffix=i64)\ndef ident(x: i64) -> i64:\n    return x\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function definition");
    };
    assert_eq!(func.decorators[0].keywords.len(), 1);
    assert_eq!(func.decorators[0].keywords[0].name, "suffix");
}

#[test]
fn struct_class_body() {
    let module = parse("@struct\nclass Point:\n    x: i32\n    y: i32\n");
    let StmtKind::ClassDef(class) = &module.body[0].kind else {
        panic!("expected class definition");
    };
    assert_eq!(class.name, "Point");
    assert_eq!(class.fields.len(), 2);
    assert_eq!(class.fields[0].name, "x");
}

#[test]
fn enum_class_with_payload_and_tag() {
    let module = parse(
        "@enum(i8)\nclass Status:\n    Ok: i32\n    Err: (f64, 7)\n    Empty: void\n",
    );
    let StmtKind::ClassDef(class) = &module.body[0].kind else {
        panic!("expected class definition");
    };
    assert_eq!(class.decorators[0].name, "enum");
    assert_eq!(class.fields.len(), 3);
    assert!(matches!(
        class.fields[1].annotation.kind,
        ExprKind::Tuple(_)
    ));
}

#[test]
fn annotated_declaration_and_assignment() {
    let module = parse("x: i32 = 3\ny: f64\ny = 1.5\n");
    assert!(matches!(
        module.body[0].kind,
        StmtKind::AnnAssign { value: Some(_), .. }
    ));
    assert!(matches!(
        module.body[1].kind,
        StmtKind::AnnAssign { value: None, .. }
    ));
    assert!(matches!(module.body[2].kind, StmtKind::Assign { .. }));
}

#[test]
fn subscript_annotations() {
    let module = parse("buf: array[i32, 3, 4]\np: ptr[i32]\ns: struct[x: i32, y: f64]\n");
    let StmtKind::AnnAssign { annotation, .. } = &module.body[2].kind else {
        panic!("expected annotated declaration");
    };
    let ExprKind::Subscript { index, .. } = &annotation.kind else {
        panic!("expected subscript annotation");
    };
    let ExprKind::Tuple(items) = &index.kind else {
        panic!("expected field tuple");
    };
    assert!(matches!(items[0].kind, ExprKind::Slice { .. }));
}

#[test]
fn for_else_and_break() {
    let module = parse(
        "def f():\n    s: i32 = 0\n    for i in [1, 2, 3]:\n        if i == 2:\n            break\n    else:\n        s = 100\n    return s\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function");
    };
    let StmtKind::For { orelse, .. } = &func.body[1].kind else {
        panic!("expected for statement");
    };
    assert_eq!(orelse.len(), 1);
}

#[test]
fn match_statement_forms() {
    let module = parse(
        "def classify(p: Point) -> i32:\n    match p:\n        case (0, 0):\n            return 0\n        case (x, y) if x > y:\n            return 1\n        case Status.Ok(v):\n            return v\n        case 1 | 2 | 3:\n            return 9\n        case _:\n            return -1\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function");
    };
    let StmtKind::Match { cases, .. } = &func.body[0].kind else {
        panic!("expected match");
    };
    assert_eq!(cases.len(), 5);
    assert!(matches!(cases[0].pattern, Pattern::Tuple(_)));
    assert!(cases[1].guard.is_some());
    assert!(matches!(cases[2].pattern, Pattern::Constructor { .. }));
    assert!(matches!(cases[3].pattern, Pattern::Or(_)));
    assert!(matches!(cases[4].pattern, Pattern::Wildcard));
}

#[test]
fn with_effect_block() {
    let module = parse(
        "with effect(rng=mock, suffix=\"crypto\"):\n    from rng_lib import random\n",
    );
    let StmtKind::With { items, body } = &module.body[0].kind else {
        panic!("expected with statement");
    };
    assert_eq!(items.len(), 1);
    let ExprKind::Call { keywords, .. } = &items[0].context.kind else {
        panic!("expected effect(...) call");
    };
    assert_eq!(keywords.len(), 2);
    assert!(matches!(body[0].kind, StmtKind::ImportFrom { .. }));
}

#[test]
fn generator_function() {
    let module = parse(
        "@compile\ndef simple_range(n: i32):\n    i: i32 = 0\n    while i < n:\n        yield i\n        i = i + 1\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function");
    };
    assert!(func.is_generator());
}

#[test]
fn chained_comparison_and_star_args() {
    let module = parse("ok = 0 <= n <= hi\nf(*s, 1)\n");
    let StmtKind::Assign { value, .. } = &module.body[0].kind else {
        panic!("expected assignment");
    };
    let ExprKind::Compare { ops, .. } = &value.kind else {
        panic!("expected comparison");
    };
    assert_eq!(ops.len(), 2);

    let StmtKind::Expr(call) = &module.body[1].kind else {
        panic!("expected expression statement");
    };
    let ExprKind::Call { args, .. } = &call.kind else {
        panic!("expected call");
    };
    assert!(matches!(args[0].kind, ExprKind::Starred(_)));
}

#[test]
fn extern_decorator() {
    let module = parse(
        "@extern(lib=\"m\")\ndef sqrt(x: f64) -> f64:\n    pass\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function");
    };
    assert_eq!(func.decorators[0].name, "extern");
    assert_eq!(func.decorators[0].keywords[0].name, "lib");
}

#[test]
fn elif_chain_nests() {
    let module = parse(
        "def f(x: i32) -> i32:\n    if x == 0:\n        return 0\n    elif x == 1:\n        return 1\n    else:\n        return 2\n",
    );
    let StmtKind::FuncDef(func) = &module.body[0].kind else {
        panic!("expected function");
    };
    let StmtKind::If { orelse, .. } = &func.body[0].kind else {
        panic!("expected if");
    };
    assert_eq!(orelse.len(), 1);
    assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
}
