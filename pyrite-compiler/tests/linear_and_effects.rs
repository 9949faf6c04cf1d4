// Linear-token ownership rules and the effect system.

use pyrite_compiler::abi::TargetAbi;
use pyrite_compiler::{compile_source, Unit};
use pyrite_diagnostics::{codes, Diagnostic};

fn compile(source: &str) -> Result<Unit, Diagnostic> {
    compile_source("test.pyr", source, TargetAbi::X86_64SysV, &mut |_| None)
}

fn ir(source: &str) -> String {
    match compile(source) {
        Ok(unit) => unit.builder.module.render(),
        Err(diag) => panic!("compile failed: {}", diag),
    }
}

const TOKEN_DEFS: &str = "@struct(linear=True)\nclass Token:\n    value: i32\n\n@compile\ndef sink(t: Token) -> i32:\n    return t.value\n";

#[test]
fn consuming_a_token_satisfies_the_checker() {
    let text = ir(&format!(
        "{}\n@compile\ndef ok() -> i32:\n    t: Token = Token(1)\n    return sink(t)\n",
        TOKEN_DEFS
    ));
    assert!(text.contains("define i32 @ok"), "{}", text);
}

#[test]
fn unconsumed_token_at_exit_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef leak() -> i32:\n    t: Token = Token(5)\n    return 0\n",
        TOKEN_DEFS
    ))
    .unwrap_err();
    assert_eq!(err.code, codes::LINEAR_NOT_CONSUMED);
    assert!(err.message.contains("`t`"), "{}", err.message);
}

#[test]
fn token_consumed_in_one_branch_only_is_rejected() {
    let source = format!(
        "{}\n@compile\ndef uneven(c: i32) -> i32:\n    t: Token = Token(1)\n    if c > 0:\n        return sink(t)\n    else:\n        return 0\n",
        TOKEN_DEFS
    );
    let err = compile(&source).unwrap_err();
    assert_eq!(err.code, codes::LINEAR_INCONSISTENT_BRANCHES);
    // the diagnostic points at the end of the else arm
    assert!(err.span.line >= 10, "line was {}", err.span.line);
}

#[test]
fn token_consumed_in_both_branches_is_accepted() {
    let text = ir(&format!(
        "{}\n@compile\ndef even(c: i32) -> i32:\n    t: Token = Token(1)\n    if c > 0:\n        return sink(t)\n    else:\n        return sink(t) + 1\n",
        TOKEN_DEFS
    ));
    assert!(text.contains("define i32 @even"), "{}", text);
}

#[test]
fn consuming_inside_if_without_else_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef half(c: i32) -> i32:\n    t: Token = Token(1)\n    r: i32 = 0\n    if c > 0:\n        r = sink(t)\n    return r\n",
        TOKEN_DEFS
    ))
    .unwrap_err();
    assert_eq!(err.code, codes::LINEAR_INCONSISTENT_BRANCHES);
}

#[test]
fn consuming_a_token_twice_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef twice(c: i32) -> i32:\n    t: Token = Token(1)\n    r: i32 = sink(t)\n    return sink(t)\n",
        TOKEN_DEFS
    ))
    .unwrap_err();
    assert_eq!(err.code, codes::LINEAR_ALREADY_CONSUMED);
}

#[test]
fn dangling_linear_expression_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef dangle() -> i32:\n    Token(5)\n    return 0\n",
        TOKEN_DEFS
    ))
    .unwrap_err();
    assert_eq!(err.code, codes::LINEAR_DANGLING_EXPR);
}

#[test]
fn consuming_a_token_inside_a_loop_is_rejected() {
    let err = compile(&format!(
        "{}\n@compile\ndef looped(n: i64) -> i32:\n    t: Token = Token(1)\n    r: i32 = 0\n    for i in seq(n):\n        r = sink(t)\n    return r\n",
        TOKEN_DEFS
    ))
    .unwrap_err();
    assert_eq!(err.code, codes::LINEAR_CONSUMED_IN_LOOP);
}

#[test]
fn returning_the_token_consumes_it() {
    let text = ir(&format!(
        "{}\n@compile\ndef forward() -> Token:\n    t: Token = Token(9)\n    return t\n",
        TOKEN_DEFS
    ));
    assert!(text.contains("define i32 @forward"), "{}", text);
}

// ----- effects -----

const RNG_LIB: &str = "@compile\ndef default_rng_next() -> u64:\n    return 1\n\neffect.default(rng=default_rng)\n\n@compile\ndef random() -> u64:\n    return effect.rng.next()\n";

#[test]
fn effect_default_resolves_when_no_context() {
    let text = ir(&format!(
        "{}\n@compile\ndef use_it() -> u64:\n    return random()\n",
        RNG_LIB
    ));
    assert!(text.contains("define i64 @random()"), "{}", text);
    assert!(text.contains("call i64 @default_rng_next()"), "{}", text);
}

#[test]
fn effect_override_produces_suffixed_instance() {
    let main = "@compile\ndef mock_rng_next() -> u64:\n    return 999\n\nfrom rng_lib import random\n\nwith effect(rng=mock_rng, suffix=\"crypto\"):\n    from rng_lib import random as crypto_random\n\n@compile\ndef both() -> u64:\n    return random() + crypto_random()\n";

    let mut loader = |name: &str| {
        if name == "rng_lib" {
            Some(pyrite_parser::parse_module("rng_lib.pyr", RNG_LIB).expect("lib parses"))
        } else {
            None
        }
    };
    let unit = compile_source("main.pyr", main, TargetAbi::X86_64SysV, &mut loader)
        .expect("compile failed");
    let text = unit.builder.module.render();

    // the same source text yields two distinct artifacts
    assert!(text.contains("define i64 @random()"), "{}", text);
    assert!(text.contains("define i64 @random.crypto()"), "{}", text);
    assert!(text.contains("call i64 @default_rng_next()"), "{}", text);
    assert!(text.contains("call i64 @mock_rng_next()"), "{}", text);
}

#[test]
fn effect_override_requires_suffix() {
    let err = compile(
        "with effect(rng=mock):\n    pass\n\n@compile\ndef f() -> i32:\n    return 0\n",
    )
    .unwrap_err();
    assert_eq!(err.code, codes::EFFECT_SUFFIX_REQUIRED);
}

#[test]
fn sealed_binding_wins_over_default() {
    let source = "@compile\ndef hw_rng_next() -> u64:\n    return 7\n\n@compile\ndef default_rng_next() -> u64:\n    return 1\n\neffect.rng = hw_rng\neffect.default(rng=default_rng)\n\n@compile\ndef random() -> u64:\n    return effect.rng.next()\n";
    let text = ir(source);
    assert!(text.contains("call i64 @hw_rng_next()"), "{}", text);
    assert!(!text.contains("call i64 @default_rng_next()"), "{}", text);
}

#[test]
fn unbound_capability_is_a_diagnostic() {
    let err = compile(
        "@compile\ndef random() -> u64:\n    return effect.rng.next()\n",
    )
    .unwrap_err();
    assert_eq!(err.code, codes::EFFECT_UNRESOLVED);
}

#[test]
fn transitive_callers_share_the_suffixed_instance() {
    let lib = "@compile\ndef default_rng_next() -> u64:\n    return 1\n\neffect.default(rng=default_rng)\n\n@compile\ndef random_a() -> u64:\n    return effect.rng.next()\n\n@compile\ndef get_sum() -> u64:\n    return random_a() + random_a()\n";
    let main = "@compile\ndef mock_rng_next() -> u64:\n    return 999\n\nwith effect(rng=mock_rng, suffix=\"crypto\"):\n    from rng_lib import get_sum as crypto_sum\n\n@compile\ndef run() -> u64:\n    return crypto_sum()\n";

    let mut loader = |name: &str| {
        if name == "rng_lib" {
            Some(pyrite_parser::parse_module("rng_lib.pyr", lib).expect("lib parses"))
        } else {
            None
        }
    };
    let unit = compile_source("main.pyr", main, TargetAbi::X86_64SysV, &mut loader)
        .expect("compile failed");
    let text = unit.builder.module.render();

    // get_sum transitively touches the capability, so the context import
    // compiles it (and random_a) under the crypto suffix
    assert!(text.contains("define i64 @get_sum.crypto()"), "{}", text);
    assert!(text.contains("define i64 @random_a.crypto()"), "{}", text);
    assert!(text.contains("call i64 @random_a.crypto()"), "{}", text);
    assert!(text.contains("call i64 @mock_rng_next()"), "{}", text);
}
