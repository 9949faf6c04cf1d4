// Generator inlining, for/else, and match decision trees.

use pyrite_compiler::abi::TargetAbi;
use pyrite_compiler::{compile_source, Unit};
use pyrite_diagnostics::Diagnostic;

fn compile(source: &str) -> Result<Unit, Diagnostic> {
    compile_source("test.pyr", source, TargetAbi::X86_64SysV, &mut |_| None)
}

fn ir(source: &str) -> String {
    match compile(source) {
        Ok(unit) => unit.builder.module.render(),
        Err(diag) => panic!("compile failed: {}", diag),
    }
}

const SIMPLE_RANGE: &str = "@compile\ndef simple_range(n: i64) -> i64:\n    i: i64 = 0\n    while i < n:\n        yield i\n        i = i + 1\n";

#[test]
fn generator_emits_no_function_of_its_own() {
    let text = ir(&format!(
        "{}\n@compile\ndef total() -> i64:\n    s: i64 = 0\n    for i in simple_range(5):\n        s = s + i\n    return s\n",
        SIMPLE_RANGE
    ));
    assert!(!text.contains("@simple_range"), "{}", text);
    assert!(text.contains("define i64 @total"), "{}", text);
}

#[test]
fn generator_loop_dispatches_on_state_tag() {
    let text = ir(&format!(
        "{}\n@compile\ndef total() -> i64:\n    s: i64 = 0\n    for i in simple_range(5):\n        s = s + i\n    return s\n",
        SIMPLE_RANGE
    ));
    // state dispatch switch with the entry state and one resume state
    assert!(text.contains("switch i32"), "{}", text);
    assert!(text.contains("gen.resume"), "{}", text);
    assert!(text.contains("gen.done"), "{}", text);
}

#[test]
fn generator_break_skips_else() {
    // break leaves via the loop end; normal exhaustion runs the else
    let text = ir(&format!(
        "{}\n@compile\ndef sum_until(stop: i64) -> i64:\n    s: i64 = 0\n    for i in simple_range(10):\n        if i == stop:\n            break\n        s = s + i\n    else:\n        s = s + 100\n    return s\n",
        SIMPLE_RANGE
    ));
    assert!(text.contains("gen.done"), "{}", text);
    assert!(text.contains("gen.end"), "{}", text);
}

#[test]
fn multiple_yields_produce_multiple_resume_states() {
    let text = ir(
        "@compile\ndef three() -> i64:\n    yield 1\n    yield 2\n    yield 3\n\n@compile\ndef total() -> i64:\n    s: i64 = 0\n    for v in three():\n        s = s + v\n    return s\n",
    );
    // one case per yield plus the entry state
    assert!(text.contains("i32 1, label"), "{}", text);
    assert!(text.contains("i32 2, label"), "{}", text);
    assert!(text.contains("i32 3, label"), "{}", text);
}

#[test]
fn calling_a_generator_outside_for_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef bad() -> i64:\n    x: i64 = simple_range(3)\n    return x\n",
        SIMPLE_RANGE
    ))
    .unwrap_err();
    assert!(err.message.contains("iterated"), "{}", err.message);
}

#[test]
fn empty_constant_iterable_runs_else_branch() {
    let text = ir(
        "@compile\ndef empty_else() -> i32:\n    s: i32 = 0\n    for i in []:\n        s = s + 1\n    else:\n        s = 100\n    return s\n",
    );
    assert!(text.contains("loop.else"), "{}", text);
}

#[test]
fn constant_iterable_unrolls() {
    let text = ir(
        "@compile\ndef unrolled() -> i32:\n    s: i32 = 0\n    for i in [1, 2, 3]:\n        s = s + i\n    return s\n",
    );
    // three iteration blocks, each adding a folded constant
    assert!(text.contains("add i32"), "{}", text);
    assert!(text.contains("for.iter"), "{}", text);
}

#[test]
fn for_else_with_break_keeps_flag_machinery() {
    let text = ir(
        "@compile\ndef found(target: i64) -> i32:\n    hit: i32 = 0\n    for i in seq(4):\n        if i == target:\n            hit = 1\n            break\n    else:\n        hit = -1\n    return hit\n",
    );
    // break stores the flag; the join tests it before the else clause
    assert!(text.contains("store i1 true"), "{}", text);
    assert!(text.contains("loop.else"), "{}", text);
}

#[test]
fn seq_loop_counts_with_constant_step() {
    let text = ir(
        "@compile\ndef total(n: i64) -> i64:\n    s: i64 = 0\n    for i in seq(n):\n        s = s + i\n    return s\n",
    );
    assert!(text.contains("icmp slt"), "{}", text);
    assert!(text.contains("for.step"), "{}", text);
}

#[test]
fn seq_with_negative_step_counts_down() {
    let text = ir(
        "@compile\ndef down() -> i64:\n    s: i64 = 0\n    for i in seq(10, 0, -1):\n        s = s + i\n    return s\n",
    );
    assert!(text.contains("icmp sgt"), "{}", text);
}

#[test]
fn match_struct_tuple_destructuring() {
    let text = ir(
        "@struct\nclass Point:\n    x: i32\n    y: i32\n\n@compile\ndef classify(px: i32, py: i32) -> i32:\n    p: Point\n    p.x = px\n    p.y = py\n    match p:\n        case (0, 0):\n            return 0\n        case (x, y):\n            return x + y\n    return -1\n",
    );
    assert!(text.contains("case.bind"), "{}", text);
    assert!(text.contains("icmp eq i32"), "{}", text);
    // the capture case adds the two bound fields
    assert!(text.contains("add i32"), "{}", text);
}

#[test]
fn match_enum_both_pattern_forms() {
    let text = ir(
        "@enum(i8)\nclass Status:\n    Ok: i32\n    Empty: void\n\n@compile\ndef code(flag: i32) -> i32:\n    s: Status = Status.Empty()\n    if flag > 0:\n        s = Status.Ok(7)\n    match s:\n        case Status.Ok(v):\n            return v\n        case (Status.Empty, _):\n            return -1\n    return -2\n",
    );
    assert!(text.contains("%Status = type { i8, [4 x i8] }"), "{}", text);
    // tag comparisons for both variants
    assert!(text.contains("icmp eq i8"), "{}", text);
}

#[test]
fn match_guard_and_or_patterns() {
    let text = ir(
        "@compile\ndef bucket(n: i32) -> i32:\n    match n:\n        case 1 | 2 | 3:\n            return 1\n        case x if x > 100:\n            return 2\n        case _:\n            return 0\n    return -1\n",
    );
    assert!(text.contains("or i1"), "{}", text);
    assert!(text.contains("icmp sgt"), "{}", text);
}

#[test]
fn match_array_literal_patterns() {
    let text = ir(
        "@compile\ndef probe() -> i32:\n    a: array[i32, 2]\n    a[0] = 1\n    a[1] = 2\n    match a:\n        case [1, 2]:\n            return 1\n        case _:\n            return 0\n    return -1\n",
    );
    assert!(text.contains("case.bind"), "{}", text);
}

#[test]
fn unmatched_subject_falls_through() {
    let text = ir(
        "@compile\ndef fallthrough(n: i32) -> i32:\n    r: i32 = 5\n    match n:\n        case 1:\n            r = 10\n    return r\n",
    );
    assert!(text.contains("match.end"), "{}", text);
    assert!(text.contains("ret i32"), "{}", text);
}

#[test]
fn refine_binds_on_true_and_takes_else_on_false() {
    let text = ir(
        "@compile\ndef is_positive(n: i64) -> bool:\n    return n > 0\n\n@compile\ndef use_refined(n: i64) -> i64:\n    r: i64 = 0\n    for v in refine(n, is_positive):\n        r = v\n    else:\n        r = -1\n    return r\n",
    );
    assert!(text.contains("call i1 @is_positive"), "{}", text);
    assert!(text.contains("refine.ok"), "{}", text);
    assert!(text.contains("refine.else"), "{}", text);
}

#[test]
fn assume_is_an_unchecked_constructor() {
    let text = ir(
        "@compile\ndef is_positive(n: i64) -> bool:\n    return n > 0\n\n@compile\ndef trusted(n: i64) -> i64:\n    v: refined[i64, is_positive] = assume(n, is_positive)\n    return v\n",
    );
    // no predicate call is emitted on the assume path
    assert!(!text.contains("call i1 @is_positive"), "{}", text);
}
