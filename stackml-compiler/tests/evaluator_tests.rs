mod common;

use common::{evaluate, f32_bytes, i32_bytes, init_logging, schedule, to_f32};
use stackml::kernels::{self, UnaryOp, ValueRange};
use stackml::DataType;
use stackml_compiler::ir::{Graph, Node, Op, OpKind, TensorType};
use stackml_compiler::{Error, EvaluatorRegistry, ModuleEvaluateContext, Result};

#[test]
fn dense_layer_with_constants() {
    init_logging();
    let mut g = Graph::new();
    let x = g.add_input("x", TensorType::f32([1, 3]));
    let w = g
        .add_constant(
            "w",
            TensorType::f32([3, 2]),
            f32_bytes(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        )
        .unwrap();
    let b = g
        .add_constant("b", TensorType::f32([2]), f32_bytes(&[0.5, -10.0]))
        .unwrap();
    let y = g
        .add_op(
            "dense",
            Op::Matmul {
                fused_activation: ValueRange::relu(),
            },
            &[x, w, b],
            TensorType::f32([1, 2]),
        )
        .unwrap();
    g.add_output("y", y).unwrap();

    let outputs = evaluate(&g, &[f32_bytes(&[1.0, 2.0, 3.0])]);
    // [4, 5] + [0.5, -10], clamped at zero
    assert_eq!(to_f32(&outputs[0]), vec![4.5, 0.0]);
}

/// x -> neg -> y, then gather(x, idx) -> z. The gather runs last.
fn graph_with_failing_gather() -> Graph {
    let mut g = Graph::new();
    let x = g.add_input("x", TensorType::f32([3]));
    let neg = g
        .add_op("neg", Op::Unary { op: UnaryOp::Neg }, &[x], TensorType::f32([3]))
        .unwrap();
    g.add_output("y", neg).unwrap();
    let idx = g.add_input("idx", TensorType::new(DataType::Int32, [1]));
    let gathered = g
        .add_op("gather", Op::Gather { axis: 0 }, &[x, idx], TensorType::f32([1]))
        .unwrap();
    g.add_output("z", gathered).unwrap();
    g
}

#[test]
fn kernel_failure_names_the_node_and_restores_outputs() {
    init_logging();
    let g = graph_with_failing_gather();
    let schedule = schedule(&g);
    let registry = EvaluatorRegistry::neutral();
    let mut ctx = ModuleEvaluateContext::new(&g, &schedule, &registry).unwrap();
    ctx.input_mut(0).unwrap().copy_from_slice(&f32_bytes(&[1.0, 2.0, 3.0]));
    ctx.input_mut(1).unwrap().copy_from_slice(&i32_bytes(&[7]));

    let err = ctx.evaluate().unwrap_err();
    match &err {
        Error::NodeFailed { kind, name, source } => {
            assert_eq!(*kind, OpKind::Gather);
            assert_eq!(name, "gather");
            assert!(
                matches!(source, stackml::Error::IndexOutOfRange { index: 7, dim: 3 }),
                "got: {source}"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("gather"), "got: {err}");
    // neg ran before the failure; its result must not survive
    assert!(ctx.output(0).unwrap().iter().all(|&b| b == 0));
    assert!(ctx.output(1).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn in_range_negative_index_succeeds() {
    let g = graph_with_failing_gather();
    let outputs = evaluate(&g, &[f32_bytes(&[1.0, 2.0, 3.0]), i32_bytes(&[-1])]);
    assert_eq!(to_f32(&outputs[0]), vec![-1.0, -2.0, -3.0]);
    assert_eq!(to_f32(&outputs[1]), vec![3.0]);
}

#[test]
fn missing_routine_fails_before_any_node_runs() {
    let g = graph_with_failing_gather();
    let schedule = schedule(&g);
    let mut registry = EvaluatorRegistry::neutral();
    registry.unregister(OpKind::Gather);
    let mut ctx = ModuleEvaluateContext::new(&g, &schedule, &registry).unwrap();
    ctx.input_mut(0).unwrap().copy_from_slice(&f32_bytes(&[1.0, 2.0, 3.0]));

    let err = ctx.evaluate().unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedOperator(OpKind::Gather)),
        "got: {err}"
    );
    assert!(err.to_string().contains("gather"), "got: {err}");
    assert!(ctx.output(0).unwrap().iter().all(|&b| b == 0));
}

fn always_abs(node: &Node, ctx: &mut ModuleEvaluateContext<'_>) -> Result<()> {
    ctx.run_kernel(node, |inputs, output| {
        kernels::unary(UnaryOp::Abs, inputs[0], output)
    })
}

#[test]
fn registered_routine_replaces_the_neutral_one() {
    let mut g = Graph::new();
    let x = g.add_input("x", TensorType::f32([3]));
    let y = g
        .add_op("neg", Op::Unary { op: UnaryOp::Neg }, &[x], TensorType::f32([3]))
        .unwrap();
    g.add_output("y", y).unwrap();

    let schedule = schedule(&g);
    let mut registry = EvaluatorRegistry::neutral();
    registry.register(OpKind::Unary, always_abs);
    let mut ctx = ModuleEvaluateContext::new(&g, &schedule, &registry).unwrap();
    ctx.input_mut(0).unwrap().copy_from_slice(&f32_bytes(&[-1.0, 2.0, -3.0]));
    ctx.evaluate().unwrap();
    assert_eq!(to_f32(ctx.output(0).unwrap()), vec![1.0, 2.0, 3.0]);
}

#[test]
fn empty_registry_reports_the_first_kind() {
    let mut g = Graph::new();
    let x = g.add_input("x", TensorType::f32([1]));
    g.add_output("y", x).unwrap();
    let schedule = schedule(&g);
    let registry = EvaluatorRegistry::empty();
    let mut ctx = ModuleEvaluateContext::new(&g, &schedule, &registry).unwrap();
    let err = ctx.evaluate().unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedOperator(OpKind::Input)),
        "got: {err}"
    );
}
