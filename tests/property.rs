use std::sync::Arc;

use proptest::prelude::*;
use tether::{parse, pretty, run, BindingEngine, ObjectModel, ObjectTree, Value};

fn arb_atom() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("x".to_string()),
        Just("y".to_string()),
        Just("Model.Nested".to_string()),
        (0i64..1000).prop_map(|n| n.to_string()),
        (0i64..1000).prop_map(|n| format!("{n}.5")),
        Just("'txt {x,3} end'".to_string()),
        Just("$self".to_string()),
    ]
}

fn arb_expr(depth: u32) -> BoxedStrategy<String> {
    if depth == 0 {
        return arb_atom().boxed();
    }

    let leaf = arb_atom();
    let binary = (
        arb_expr(depth - 1),
        prop_oneof![
            Just("+"),
            Just("-"),
            Just("*"),
            Just("/"),
            Just("=="),
            Just("<="),
            Just("&&"),
            Just("??"),
        ],
        arb_expr(depth - 1),
    )
        .prop_map(|(lhs, op, rhs)| format!("({lhs} {op} {rhs})"));
    let guarded = arb_expr(depth - 1).prop_map(|e| format!("({e})?.Member"));
    let ternary = (
        arb_expr(depth - 1),
        arb_expr(depth - 1),
        arb_expr(depth - 1),
    )
        .prop_map(|(t, a, b)| format!("(({t}) ? ({a}) : ({b}))"));
    prop_oneof![leaf, binary, guarded, ternary].boxed()
}

fn pure_ctx() -> tether::EvalContext {
    let engine = BindingEngine::new(Arc::new(ObjectModel::new()), Arc::new(ObjectTree));
    engine.context(Value::Null, Value::Null)
}

proptest! {
    #[test]
    fn parse_pretty_roundtrip(expr in arb_expr(3)) {
        let parsed = parse(&expr).expect("generated expression should parse");
        let rendered = pretty(&parsed);
        let reparsed = parse(&rendered).expect("pretty output should reparse");
        prop_assert_eq!(parsed, reparsed);
    }

    #[test]
    fn integer_arithmetic_matches_native(a in -500i32..500, b in -500i32..500, c in 1i32..100) {
        let ctx = pure_ctx();
        let value = run(&format!("({a} + {b}) * 2 - {a} / {c}"), &ctx)
            .expect("generated arithmetic should evaluate");
        prop_assert_eq!(value, Value::Int32((a + b) * 2 - a / c));
    }

    #[test]
    fn comparison_chain_is_boolean(a in -100i32..100, b in -100i32..100) {
        let ctx = pure_ctx();
        let value = run(&format!("{a} < {b} || {a} == {b}"), &ctx)
            .expect("generated comparison should evaluate");
        prop_assert_eq!(value, Value::Bool(a <= b));
    }
}
