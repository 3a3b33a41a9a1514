//! Determinism and optimization transparency over generated documents

use super::*;
use crate::vm::{Interpreter, VmConfig};
use cadence_ast::build::*;
use cadence_ast::{BinaryOp, Expr, UnaryOp};
use proptest::prelude::*;
use std::sync::Arc;

fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Div),
        Just(BinaryOp::Mod),
    ]
}

fn arb_comparison() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Lt),
        Just(BinaryOp::Ge),
        Just(BinaryOp::Eq),
        Just(BinaryOp::Ne),
    ]
}

/// Numeric expressions over the inputs `a` and `b`
fn arb_expr(with_random: bool) -> impl Strategy<Value = Expr> {
    let operands = prop_oneof![
        2 => (-40i32..40).prop_map(|v| num(f64::from(v) / 4.0)),
        1 => Just(var("a")),
        1 => Just(var("b")),
    ]
    .boxed();
    let leaf = if with_random {
        prop_oneof![8 => operands, 1 => Just(call("random", vec![]))].boxed()
    } else {
        operands
    };
    leaf.prop_recursive(4, 48, 3, |inner| {
        prop_oneof![
            (arb_binary_op(), inner.clone(), inner.clone())
                .prop_map(|(op, l, r)| binary(op, l, r)),
            inner.clone().prop_map(|e| unary(UnaryOp::Neg, e)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| call("max", vec![l, r])),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(x, lo, hi)| call("clamp", vec![x, lo, hi])),
            (arb_comparison(), inner.clone(), inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(op, l, r, t, e)| select(binary(op, l, r), t, e)),
        ]
    })
}

/// Flows exercising locals, a repeat, a called flow, a goto and a vector
/// select around three generated expressions:
///
/// ```text
/// main:   let t = e1; let acc = 0; repeat n { acc = acc + e2 }
///         out = t + acc; if e3 > 0 { other = t } else { call helper }; goto finish
/// helper: other = e2 - e3
/// finish: movement <- (e3 < e1 ? (e1, e2, e3) : (e2, 0, e1)) @ clamp(e2, 0, 1)
/// ```
fn program(e1: Expr, e2: Expr, e3: Expr, n: u32) -> Document {
    document(
        "generated",
        vec![
            flow(
                "main",
                vec![
                    let_("t", e1.clone()),
                    let_("acc", num(0.0)),
                    repeat(
                        n,
                        vec![assign("acc", binary(BinaryOp::Add, var("acc"), e2.clone()))],
                    ),
                    assign("out", binary(BinaryOp::Add, var("t"), var("acc"))),
                    if_(
                        binary(BinaryOp::Gt, e3.clone(), num(0.0)),
                        vec![assign("other", var("t"))],
                        vec![call_flow("helper")],
                    ),
                    goto("finish"),
                ],
            ),
            flow(
                "helper",
                vec![assign("other", binary(BinaryOp::Sub, e2.clone(), e3.clone()))],
            ),
            flow(
                "finish",
                vec![intent(
                    "movement",
                    select(
                        binary(BinaryOp::Lt, e3.clone(), e1.clone()),
                        vector(e1.clone(), e2.clone(), e3),
                        vector(e2.clone(), num(0.0), e1),
                    ),
                    call("clamp", vec![e2, num(0.0), num(1.0)]),
                )],
            ),
        ],
    )
}

fn run(model: &Model, seed: u64, a: f64, b: f64) -> Vec<f64> {
    let mut vm = Interpreter::new(
        Arc::new(model.clone()),
        VmConfig {
            seed,
            ..VmConfig::default()
        },
    )
    .unwrap();
    // Generated documents may leave either input unused
    let mut state = vec![0.0; model.input_len()];
    for (name, value) in [("a", a), ("b", b)] {
        if let Some(entry) = model.input(name) {
            state[entry.slot as usize] = value;
        }
    }
    let mut out = outputs(model);
    vm.evaluate(&state, &mut out).unwrap();
    out
}

/// Bitwise equality, treating every NaN as equal
fn same(left: &[f64], right: &[f64]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(l, r)| l.to_bits() == r.to_bits() || (l.is_nan() && r.is_nan()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_evaluation_is_deterministic(
        e1 in arb_expr(true),
        e2 in arb_expr(true),
        e3 in arb_expr(true),
        n in 0u32..4,
        seed in any::<u64>(),
        a in -100.0f64..100.0,
        b in -100.0f64..100.0,
    ) {
        let model = compile_doc(&program(e1, e2, e3, n));
        let first = run(&model, seed, a, b);
        let second = run(&model, seed, a, b);
        prop_assert!(same(&first, &second), "{:?} != {:?}", first, second);

        // Reloading from bytes changes nothing
        let reloaded = crate::format::load_model(&model.to_bytes().unwrap()).unwrap();
        let third = run(&reloaded, seed, a, b);
        prop_assert!(same(&first, &third), "{:?} != {:?}", first, third);
    }

    #[test]
    fn prop_optimization_is_transparent(
        e1 in arb_expr(true),
        e2 in arb_expr(true),
        e3 in arb_expr(true),
        n in 0u32..4,
        seed in any::<u64>(),
        a in -100.0f64..100.0,
        b in -100.0f64..100.0,
    ) {
        let doc = program(e1, e2, e3, n);
        let baseline = run(&compile_with(&doc, CompileOptions::default().with_level(0)), seed, a, b);
        for level in 1..=3 {
            let model = compile_with(&doc, CompileOptions::default().with_level(level));
            let optimized = run(&model, seed, a, b);
            prop_assert!(
                same(&baseline, &optimized),
                "level {}: {:?} != {:?}",
                level,
                baseline,
                optimized
            );
        }
    }
}
