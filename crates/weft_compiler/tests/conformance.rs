use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use weft_compiler::{compile, compile_and_run, load_program, CompileOptions, RunError};
use weft_runtime::{trip_count, Executor, RecordingHost, RuntimeOptions};
use weft_syntax::builder::*;
use weft_syntax::{Program, Scalar, Stmt, Type};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../conformance")
        .join(name)
}

fn load(name: &str) -> Program {
    load_program(&fixture(name)).unwrap()
}

fn run_with(program: Program, options: &CompileOptions) -> Result<RecordingHost, RunError> {
    compile_and_run(
        program,
        options,
        RuntimeOptions::default(),
        RecordingHost::default(),
    )
}

fn traced(program: Program) -> Vec<i64> {
    run_with(program, &CompileOptions::default())
        .unwrap()
        .traced_ints()
}

fn set_unroll(program: &mut Program, factor: i64) {
    for f in &mut program.functions {
        for stmt in &mut f.body.stmts {
            if let Stmt::Foreach(lp) = stmt {
                lp.annotations.unroll = factor;
            }
        }
    }
}

fn main_stmts(program: &Program) -> &[Stmt] {
    &program.function("main").unwrap().body.stmts
}

#[test]
fn unroll_by_ten_over_nine_iterations_copies_every_iteration() {
    let compiled = compile(load("585-foreach-range-6.json"), &CompileOptions::default()).unwrap();
    let stmts = main_stmts(&compiled);
    assert_eq!(stmts.len(), 9);
    assert!(stmts.iter().all(|s| matches!(s, Stmt::Block(_))));
    let listing = compiled.to_string();
    assert!(listing.contains("i#u0 = 4;"));
    assert!(listing.contains("i#u8 = 12;"));
    assert!(!listing.contains("foreach"));

    assert_eq!(traced(load("585-foreach-range-6.json")), (5..=13).collect::<Vec<_>>());
}

#[test]
fn factor_four_over_nine_iterations_leaves_one_for_the_remainder() {
    let mut program = load("585-foreach-range-6.json");
    set_unroll(&mut program, 4);
    let compiled = compile(program.clone(), &CompileOptions::default()).unwrap();
    let stmts = main_stmts(&compiled);
    assert_eq!(stmts.len(), 9);
    assert_eq!(stmts.iter().filter(|s| matches!(s, Stmt::Block(_))).count(), 8);
    let Some(Stmt::Foreach(remainder)) = stmts.last() else {
        panic!("expected a remainder loop")
    };
    assert_eq!((remainder.lower.clone(), remainder.upper.clone()), (int(12), int(12)));

    assert_eq!(traced(program), (5..=13).collect::<Vec<_>>());
}

#[test]
fn disabled_unrolling_keeps_the_loop() {
    let options = CompileOptions {
        unroll: false,
        ..CompileOptions::default()
    };
    let compiled = compile(load("585-foreach-range-6.json"), &options).unwrap();
    assert!(matches!(main_stmts(&compiled), [Stmt::Foreach(_)]));
    let host = run_with(load("585-foreach-range-6.json"), &options).unwrap();
    assert_eq!(host.traced_ints(), (5..=13).collect::<Vec<_>>());
}

#[test]
fn range_bound_computed_by_a_call() {
    assert_eq!(traced(load("581-foreach-range-2.json")), (1..=10).collect::<Vec<_>>());

    let mut program = load("581-foreach-range-2.json");
    set_unroll(&mut program, 3);
    let compiled = compile(program.clone(), &CompileOptions::default()).unwrap();
    let listing = compiled.to_string();
    assert!(listing.contains("n#r0 = range_trip_count(lo#r0, hi#r0, step#r0);"));
    assert!(listing.contains("foreach g#r0 in [0:(groups#r0 - 1)]"));

    let mut values = traced(program);
    values.sort_unstable();
    assert_eq!(values, (1..=10).collect::<Vec<_>>());
}

#[test]
fn recursive_multiplication() {
    assert_eq!(traced(load("235-multiplication.json")), vec![9]);

    let compiled = compile(load("235-multiplication.json"), &CompileOptions::default()).unwrap();
    let mut exec = Executor::new(&compiled, RecordingHost::default()).unwrap();
    for (i, j) in [(0, 5), (5, 0), (6, 7), (12, 12)] {
        let out = exec
            .call_function("my_mult", vec![Scalar::Int(i), Scalar::Int(j)])
            .unwrap();
        assert_eq!(out, Some(Scalar::Int(i * j)));
    }
}

/// `int n; n = bound(); foreach i in [lo:n:step] @unroll=F { trace(i); }`
fn counted_loop(lo: i64, hi: i64, step: i64, factor: i64, dynamic: bool) -> Program {
    let bound = function("bound")
        .output("r", Type::Int)
        .body(vec![assign("r", int(hi))]);
    let upper = if dynamic { var("n") } else { int(hi) };
    let main = function("main").body(vec![
        declare("n", Type::Int),
        assign("n", call("bound", vec![])),
        foreach("i", int(lo), upper)
            .step(int(step))
            .unroll(factor)
            .body(vec![
                declare("j", Type::Int),
                assign("j", var("i")),
                trace(vec![var("j")]),
            ])
            .into_stmt(),
        trace(vec![var("n")]),
    ]);
    Program::with_functions(vec![bound, main])
}

#[test]
fn every_factor_runs_the_same_iterations() {
    for (lo, hi, step) in [
        (4, 12, 1),
        (1, 10, 3),
        (10, -3, -4),
        (5, 4, 1),
        (7, 7, 2),
        (i64::MAX - 1, i64::MAX, 1),
        (i64::MIN + 4, i64::MIN, -2),
        (i64::MAX - 6, i64::MAX, 3),
    ] {
        let count = trip_count(lo, hi, step).unwrap();
        let mut expected: Vec<i64> = (0..count).map(|k| lo + k * step).collect();
        expected.push(hi);
        expected.sort_unstable();
        for factor in 1..=12 {
            for dynamic in [false, true] {
                let mut got = traced(counted_loop(lo, hi, step, factor, dynamic));
                got.sort_unstable();
                assert_eq!(
                    got, expected,
                    "[{}:{}:{}] unrolled by {} (dynamic: {})",
                    lo, hi, step, factor, dynamic
                );
            }
        }
    }
}

#[test]
fn oversized_expansion_runs_as_grouped_loop() {
    let options = CompileOptions {
        max_expanded_copies: 8,
        ..CompileOptions::default()
    };
    let compiled = compile(counted_loop(1, 100, 1, 16, false), &options).unwrap();
    assert!(compiled.to_string().contains("foreach g#r"));
    let mut got = run_with(counted_loop(1, 100, 1, 16, false), &options)
        .unwrap()
        .traced_ints();
    got.sort_unstable();
    let mut expected: Vec<i64> = (1..=100).collect();
    expected.push(100);
    expected.sort_unstable();
    assert_eq!(got, expected);
}

#[test]
fn non_positive_factor_is_rejected() {
    let mut program = load("585-foreach-range-6.json");
    set_unroll(&mut program, 0);
    let diags = compile(program, &CompileOptions::default()).unwrap_err();
    assert_eq!(diags.len(), 1);
    assert_eq!(
        diags[0].to_string(),
        "error in fn main: unroll factor 0 on loop over `i` must be a positive integer"
    );
}

#[test]
fn loop_body_writing_outer_variable_is_rejected() {
    let main = function("main").body(vec![
        declare("last", Type::Int),
        foreach("i", int(1), int(4))
            .unroll(2)
            .body(vec![assign("last", var("i"))])
            .into_stmt(),
    ]);
    let diags = compile(Program::with_functions(vec![main]), &CompileOptions::default())
        .unwrap_err();
    assert!(diags
        .iter()
        .any(|d| d.message == "loop over `i` writes `last`, which is declared outside the loop"));
}

#[test]
fn dynamic_zero_step_fails_when_run() {
    let main = function("main").body(vec![
        declare("s", Type::Int),
        assign("s", int(0)),
        foreach("i", int(1), int(5))
            .step(var("s"))
            .unroll(2)
            .body(vec![trace(vec![var("i")])])
            .into_stmt(),
    ]);
    let err = run_with(Program::with_functions(vec![main]), &CompileOptions::default())
        .unwrap_err();
    let RunError::Runtime(err) = err else {
        panic!("expected a runtime failure")
    };
    assert_eq!(err.kind(), "InvalidRangeError");
}

#[test]
fn double_assignment_survives_unrolling() {
    // Each unrolled copy writes its own fresh local; nothing is written twice.
    let main = function("main").body(vec![foreach("i", int(1), int(6))
        .unroll(4)
        .body(vec![
            declare("sq", Type::Int),
            assign("sq", multiply(var("i"), var("i"))),
            trace(vec![var("sq")]),
        ])
        .into_stmt()]);
    let mut got = traced(Program::with_functions(vec![main]));
    got.sort_unstable();
    assert_eq!(got, vec![1, 4, 9, 16, 25, 36]);
}
