// End-to-end lowering tests: source text in, LLVM IR text (or a
// diagnostic) out. No toolchain is invoked.

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

#[test]
fn simple_function_lowers_to_direct_abi() {
    let text = ir("@compile\ndef add(a: i32, b: i32) -> i32:\n    return a + b\n");
    assert!(text.contains("define i32 @add(i32 %a0, i32 %a1) {"), "{}", text);
    assert!(text.contains("add i32"), "{}", text);
    assert!(text.contains("ret i32"), "{}", text);
}

#[test]
fn small_struct_return_coerces_to_i64() {
    // x86-64 SysV: { i32, i32 } comes back in one integer register
    let text = ir(
        "@struct\nclass Point2D:\n    a: i32\n    b: i32\n\n@compile\ndef make(a: i32, b: i32) -> Point2D:\n    p: Point2D\n    p.a = a\n    p.b = b\n    return p\n",
    );
    assert!(text.contains("%Point2D = type { i32, i32 }"), "{}", text);
    assert!(text.contains("define i64 @make(i32 %a0, i32 %a1)"), "{}", text);
    assert!(text.contains("ret i64"), "{}", text);
}

#[test]
fn large_struct_return_goes_through_sret() {
    let text = ir(
        "@struct\nclass Big:\n    a: i64\n    b: i64\n    c: i64\n\n@compile\ndef make_big() -> Big:\n    r: Big\n    r.a = 1\n    r.b = 2\n    r.c = 3\n    return r\n\n@compile\ndef first() -> i64:\n    r: Big = make_big()\n    return r.a\n",
    );
    assert!(
        text.contains("define void @make_big(%Big* sret(%Big) %a0)"),
        "{}",
        text
    );
    // caller allocates the buffer and passes it as the hidden first arg
    assert!(text.contains("call void @make_big(%Big* sret(%Big)"), "{}", text);
}

#[test]
fn hfa_returns_in_simd_registers_on_aarch64() {
    let source = "@struct\nclass Quad:\n    a: f32\n    b: f32\n    c: f32\n    d: f32\n\n@compile\ndef make_quad() -> Quad:\n    q: Quad\n    q.a = 1.0\n    q.b = 2.0\n    q.c = 3.0\n    q.d = 4.0\n    return q\n";
    let unit = compile_source("test.pyr", source, TargetAbi::Aarch64Aapcs, &mut |_| None)
        .expect("compile failed");
    let text = unit.builder.module.render();
    assert!(text.contains("define [4 x float] @make_quad()"), "{}", text);
    assert!(!text.contains("sret"), "{}", text);
}

#[test]
fn explicit_narrowing_cast_wraps() {
    let text = ir("@compile\ndef narrow() -> i8:\n    return i8(300)\n");
    // 300 wraps to 44 in two's complement
    assert!(text.contains("ret i8 44"), "{}", text);
}

#[test]
fn implicit_narrowing_is_rejected() {
    let err = compile(
        "@compile\ndef bad(x: i64) -> i8:\n    y: i8 = x\n    return y\n",
    )
    .unwrap_err();
    assert!(err.message.contains("narrowing"), "{}", err.message);
}

#[test]
fn mutual_recursion_defined_out_of_order() {
    let text = ir(
        "@compile\ndef is_even(n: i32) -> i32:\n    if n == 0:\n        return 1\n    return is_odd(n - 1)\n\n@compile\ndef is_odd(n: i32) -> i32:\n    if n == 0:\n        return 0\n    return is_even(n - 1)\n",
    );
    assert!(text.contains("define i32 @is_even"), "{}", text);
    assert!(text.contains("define i32 @is_odd"), "{}", text);
    assert!(text.contains("call i32 @is_odd"), "{}", text);
    assert!(text.contains("call i32 @is_even"), "{}", text);
}

#[test]
fn suffix_parameterises_the_instance() {
    let text = ir("@compile(suffix=i64)\ndef ident(x: i64) -> i64:\n    return x\n");
    assert!(text.contains("define i64 @ident.i64"), "{}", text);
}

#[test]
fn chained_comparison_evaluates_middle_once() {
    let text = ir(
        "@compile\ndef in_range(n: i32, hi: i32) -> bool:\n    return 0 <= n <= hi\n",
    );
    // two comparisons AND-ed together
    assert!(text.contains("icmp sle"), "{}", text);
    assert!(text.contains("and i1"), "{}", text);
}

#[test]
fn signedness_selects_division_and_comparison() {
    let text = ir(
        "@compile\ndef udiv_it(a: u32, b: u32) -> u32:\n    return a / b\n\n@compile\ndef sdiv_it(a: i32, b: i32) -> i32:\n    return a / b\n\n@compile\ndef ult_it(a: u32, b: u32) -> bool:\n    return a < b\n",
    );
    assert!(text.contains("udiv i32"), "{}", text);
    assert!(text.contains("sdiv i32"), "{}", text);
    assert!(text.contains("icmp ult"), "{}", text);
}

#[test]
fn constant_folding_happens_at_lowering_time() {
    let text = ir("@compile\ndef folded() -> i32:\n    return 2 * 3 + 4\n");
    assert!(text.contains("ret i32 10"), "{}", text);
    assert!(!text.contains("mul"), "{}", text);
}

#[test]
fn folded_division_truncates_like_sdiv() {
    // The fold must agree with the runtime sdiv/srem lowering: truncate
    // toward zero, remainder keeps the dividend's sign.
    let text = ir(
        "@compile\ndef quot() -> i32:\n    return -7 // 2\n\n@compile\ndef rem() -> i32:\n    return -7 % 2\n",
    );
    assert!(text.contains("ret i32 -3"), "{}", text);
    assert!(text.contains("ret i32 -1"), "{}", text);
}

#[test]
fn static_declares_internal_global_with_zero_init() {
    let text = ir(
        "@compile\ndef counter() -> i64:\n    c: static[i64]\n    c = c + 1\n    return c\n",
    );
    assert!(text.contains("@counter.c = internal global i64 0"), "{}", text);
}

#[test]
fn assignment_to_const_is_rejected() {
    let err = compile(
        "@compile\ndef frozen() -> i32:\n    x: const[i32] = 1\n    x = 2\n    return x\n",
    )
    .unwrap_err();
    assert_eq!(err.code, pyrite_diagnostics::codes::ASSIGN_TO_CONST);
}

#[test]
fn union_fields_share_storage() {
    let text = ir(
        "@union\nclass Value:\n    i: i64\n    d: f64\n\n@compile\ndef bits_of(x: f64) -> i64:\n    v: Value\n    v.d = x\n    return v.i\n",
    );
    assert!(text.contains("bitcast"), "{}", text);
}

#[test]
fn multidim_array_subscript_tuple_style() {
    let text = ir(
        "@compile\ndef diag() -> i64:\n    m: array[i64, 2, 2]\n    m[0, 0] = 1\n    m[1, 1] = 2\n    return m[0, 0] + m[1, 1]\n",
    );
    assert!(text.contains("alloca [2 x [2 x i64]]"), "{}", text);
    assert!(text.contains("getelementptr"), "{}", text);
}

#[test]
fn pyconst_fields_are_elided_but_readable() {
    let text = ir(
        "@struct\nclass Tagged:\n    tag: pyconst[7]\n    value: i64\n\n@compile\ndef read(t: Tagged) -> i64:\n    return t.tag + t.value\n",
    );
    // storage is one i64; the tag folds to a constant operand
    assert!(text.contains("%Tagged = type { i64 }"), "{}", text);
    assert!(text.contains("add i64 7"), "{}", text);
}

#[test]
fn sizeof_matches_c_layout() {
    let text = ir(
        "@struct\nclass Mixed:\n    a: i8\n    b: i32\n\n@compile\ndef size() -> i64:\n    return sizeof(Mixed)\n",
    );
    assert!(text.contains("ret i64 8"), "{}", text);
}

#[test]
fn inline_functions_leave_no_artifact() {
    let text = ir(
        "@inline\ndef twice(x: i32) -> i32:\n    return x + x\n\n@compile\ndef use_twice(a: i32) -> i32:\n    return twice(a) + 1\n",
    );
    assert!(!text.contains("@twice"), "{}", text);
    assert!(text.contains("define i32 @use_twice"), "{}", text);
    assert!(text.contains("inline.exit"), "{}", text);
}

#[test]
fn inline_function_with_loop_compiles() {
    let text = ir(
        "@inline\ndef sum_up(n: i64) -> i64:\n    total: i64 = 0\n    for i in seq(n):\n        total = total + i\n    return total\n\n@compile\ndef caller(n: i64) -> i64:\n    return sum_up(n) + 1\n",
    );
    assert!(text.contains("for.cond"), "{}", text);
    assert!(text.contains("inline.exit"), "{}", text);
}

#[test]
fn overload_resolves_by_argument_types() {
    let text = ir(
        "@compile(overload=True, suffix=i32)\ndef pick(x: i32) -> i32:\n    return x\n\n@compile(overload=True, suffix=i64)\ndef pick(x: i64) -> i64:\n    return x\n\n@compile\ndef call_pick(a: i32) -> i32:\n    return pick(a)\n",
    );
    assert!(text.contains("call i32 @pick.i32"), "{}", text);
}

#[test]
fn overloaded_call_with_untyped_argument_is_rejected() {
    let err = compile(
        "@compile(overload=True, suffix=i32)\ndef pick(x: i32) -> i32:\n    return x\n\n@compile\ndef bad() -> i32:\n    return pick(3)\n",
    )
    .unwrap_err();
    assert_eq!(err.code, pyrite_diagnostics::codes::OVERLOAD_NEEDS_HINTS);
}

#[test]
fn break_outside_loop_is_rejected() {
    let err = compile("@compile\ndef bad() -> i32:\n    break\n    return 0\n").unwrap_err();
    assert_eq!(err.code, pyrite_diagnostics::codes::BREAK_OUTSIDE_LOOP);
}

#[test]
fn function_pointer_parameters_are_callable() {
    let text = ir(
        "@compile\ndef apply(f: func[(i32,), i32], x: i32) -> i32:\n    return f(x)\n",
    );
    assert!(text.contains("i32 (i32)*"), "{}", text);
}

#[test]
fn cyclic_struct_through_pointer() {
    let text = ir(
        "@struct\nclass Node:\n    value: i32\n    next: ptr[Node]\n\n@compile\ndef value_of(n: ptr[Node]) -> i32:\n    return n.value\n",
    );
    assert!(text.contains("%Node = type { i32, %Node* }"), "{}", text);
}

#[test]
fn verify_catches_every_block_terminated() {
    // A function whose fall-through path needs the implicit return
    let unit = compile(
        "@compile\ndef maybe(x: i32) -> i32:\n    if x > 0:\n        return 1\n    return 0\n",
    )
    .expect("compile failed");
    pyrite_compiler::driver::verify_module(&unit.builder.module).expect("verify failed");
}

#[test]
fn getptr_yields_an_address() {
    let text = ir(
        "@compile\ndef addr_of() -> i64:\n    x: i64 = 5\n    p: ptr[i64] = getptr(x)\n    return p[0]\n",
    );
    assert!(text.contains("define i64 @addr_of"), "{}", text);
}
