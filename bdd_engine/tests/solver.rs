mod utils;

use bdd_engine_lib::solver::SolverToolbox;
use bdd_ir::{BinaryOp, CmpOp};
use utils::{builder, byte_array, eval_toolbox, read8, z3_available};

#[test]
fn equivalence_is_symmetric_across_path_vocabularies() {
    let toolbox = eval_toolbox();
    let b = builder();

    // The same field read through two separately parsed (value-equal but
    // not shared) array instances.
    let ours = b.binary(
        BinaryOp::Add,
        read8(&byte_array("len"), 0),
        b.constant(8, 1),
    );
    let theirs = b.binary(
        BinaryOp::Add,
        read8(&byte_array("len"), 0),
        b.constant(8, 1),
    );

    assert!(toolbox.exprs_equivalent(Some(&ours), Some(&theirs)));
    assert!(toolbox.exprs_equivalent(Some(&theirs), Some(&ours)));

    let different = b.binary(
        BinaryOp::Add,
        read8(&byte_array("len"), 0),
        b.constant(8, 2),
    );
    assert!(!toolbox.exprs_equivalent(Some(&ours), Some(&different)));
    assert!(!toolbox.exprs_equivalent(Some(&different), Some(&ours)));
}

#[test]
fn null_expressions_compare_by_presence() {
    let toolbox = eval_toolbox();
    let b = builder();
    let e = b.constant(8, 1);

    assert!(toolbox.exprs_equivalent(None, None));
    assert!(!toolbox.exprs_equivalent(Some(&e), None));
    assert!(!toolbox.exprs_equivalent(None, Some(&e)));
}

#[test]
fn contradictory_constraints_make_both_answers_true() {
    let toolbox = eval_toolbox();
    let b = builder();
    let x = byte_array("x");

    let constraints = vec![
        b.cmp(CmpOp::Ult, read8(&x, 0), b.constant(8, 5)),
        b.cmp(CmpOp::Ugt, read8(&x, 0), b.constant(8, 10)),
    ];
    let probe = b.eq(read8(&x, 0), b.constant(8, 0));

    // An unsatisfiable constraint set entails everything.
    assert!(toolbox.always_true(&constraints, &probe));
    assert!(toolbox.always_false(&constraints, &probe));
}

#[test]
fn concrete_value_reads_back_constants() {
    let toolbox = eval_toolbox();
    let b = builder();
    assert_eq!(toolbox.concrete_value(&b.constant(32, 170)), 170);
}

// The remaining tests exercise the real SMT lowering and need a z3 binary.

#[test]
fn smt_tautologies_and_implications() {
    if !z3_available() {
        eprintln!("skipping: no z3 on PATH");
        return;
    }
    let toolbox = SolverToolbox::with_z3().unwrap();
    let b = builder();
    let x = byte_array("x");

    // x < 10 implies x < 20, and not the other way around.
    let below_10 = b.cmp(CmpOp::Ult, read8(&x, 0), b.constant(8, 10));
    let below_20 = b.cmp(CmpOp::Ult, read8(&x, 0), b.constant(8, 20));
    assert!(toolbox.always_true(&[below_10.clone()], &below_20));
    assert!(!toolbox.always_true(&[below_20], &below_10));

    let five = b.constant(8, 5);
    assert!(toolbox.always_true(&[], &b.eq(five.clone(), five)));
}

#[test]
fn smt_wide_reads_decompose_into_bytes() {
    if !z3_available() {
        eprintln!("skipping: no z3 on PATH");
        return;
    }
    let toolbox = SolverToolbox::with_z3().unwrap();
    let b = builder();
    let x = byte_array("x");

    // The low byte of a two-byte read is the byte at the same index.
    let wide = b.read(x.clone(), b.constant(32, 0), 16);
    let low = b.extract(wide.clone(), 0, 8);
    assert!(toolbox.always_true(&[], &b.eq(low, read8(&x, 0))));

    // And the high byte is the next index up.
    let high = b.extract(wide, 8, 8);
    assert!(toolbox.always_true(&[], &b.eq(high, read8(&x, 1))));
}

#[test]
fn smt_signed_operators() {
    if !z3_available() {
        eprintln!("skipping: no z3 on PATH");
        return;
    }
    let toolbox = SolverToolbox::with_z3().unwrap();
    let b = builder();

    // 0x80 is negative as a signed byte.
    let minus_128 = b.constant(8, 0x80);
    let zero = b.constant(8, 0);
    assert!(toolbox.always_true(&[], &b.cmp(CmpOp::Slt, minus_128.clone(), zero.clone())));
    assert!(toolbox.always_false(&[], &b.cmp(CmpOp::Sgt, minus_128.clone(), zero)));

    // Sign extension preserves the signed value.
    let extended = b.sext(minus_128, 16);
    assert!(toolbox.always_true(
        &[],
        &b.eq(extended, b.constant(16, 0xff80))
    ));
}

#[test]
fn smt_rewriter_bridges_fresh_symbols() {
    if !z3_available() {
        eprintln!("skipping: no z3 on PATH");
        return;
    }
    let toolbox = SolverToolbox::with_z3().unwrap();
    let b = builder();

    // Two value-equal reads built independently, as two parsed paths would
    // produce them.
    let ours = read8(&byte_array("len"), 0);
    let theirs = read8(&byte_array("len"), 0);
    assert!(toolbox.exprs_equivalent(Some(&ours), Some(&theirs)));
}

#[test]
fn smt_get_value_computes_constants() {
    if !z3_available() {
        eprintln!("skipping: no z3 on PATH");
        return;
    }
    let toolbox = SolverToolbox::with_z3().unwrap();
    let b = builder();

    let sum = b.binary(BinaryOp::Add, b.constant(32, 2), b.constant(32, 3));
    assert_eq!(toolbox.concrete_value(&sum), 5);
}
