#[cfg(test)]
mod tests {
    use crate::error::GradixError;
    use crate::graph::{GraphBuilder, NodeId, NodeKind};
    use crate::ops::Op;

    fn chain() -> (GraphBuilder, NodeId) {
        let mut g = GraphBuilder::new();
        let x = g.input(vec![2, 3]).unwrap();
        let w = g.variable(vec![3, 2], vec![0.1; 6]).unwrap();
        let h = g.apply(Op::MatMul, &[x, w]).unwrap();
        let s = g.apply(Op::Sigmoid, &[h]).unwrap();
        (g, s)
    }

    #[test]
    fn build_orders_children_before_parents() {
        let (g, root) = chain();
        let (graph, roots) = g.build(&[root]).unwrap();
        assert_eq!(graph.len(), 4);
        for (idx, node) in graph.nodes().iter().enumerate() {
            for &child in &node.children {
                assert!(child.0 < idx, "child {} not before parent {}", child, idx);
            }
        }
        // the requested root compacts to the last slot
        assert_eq!(roots[0].0, graph.len() - 1);
    }

    #[test]
    fn build_drops_unreachable_nodes() {
        let (mut g, root) = chain();
        // a stray leaf nothing depends on
        g.constant(vec![2], vec![1.0, 2.0]).unwrap();
        let (graph, _) = g.build(&[root]).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(
            !graph
                .nodes()
                .iter()
                .any(|n| matches!(n.kind, NodeKind::Constant))
        );
    }

    #[test]
    fn shared_node_is_visited_once() {
        let mut g = GraphBuilder::new();
        let x = g.variable(vec![2], vec![1.0, 2.0]).unwrap();
        let a = g.apply(Op::Square, &[x]).unwrap();
        let b = g.apply(Op::Exp, &[x]).unwrap();
        let sum = g.apply(Op::Add, &[a, b]).unwrap();
        let (graph, _) = g.build(&[sum]).unwrap();
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn gradient_marks_flow_from_variables() {
        let mut g = GraphBuilder::new();
        let x = g.input(vec![2]).unwrap();
        let c = g.constant(vec![2], vec![1.0, 1.0]).unwrap();
        let w = g.variable(vec![2], vec![0.5, 0.5]).unwrap();
        let frozen = g.apply(Op::Add, &[x, c]).unwrap();
        let live = g.apply(Op::Mul, &[frozen, w]).unwrap();
        let (graph, roots) = g.build(&[frozen, live]).unwrap();
        let frozen = graph.node(roots[0]);
        let live = graph.node(roots[1]);
        // input + constant never needs a gradient
        assert!(!frozen.requires_grad);
        assert!(frozen.grad.is_none());
        // anything downstream of a variable does
        assert!(live.requires_grad);
        assert!(live.grad.is_some());
    }

    #[test]
    fn apply_rejects_wrong_arity() {
        let mut g = GraphBuilder::new();
        let x = g.input(vec![2]).unwrap();
        let before = g.len();
        let err = g.apply(Op::Add, &[x]).unwrap_err();
        assert!(matches!(err, GradixError::InvalidOperand { op: "add", .. }));
        // a failed apply must not leave a half-built node behind
        assert_eq!(g.len(), before);
    }

    #[test]
    fn apply_rejects_bad_slice_without_allocating() {
        let mut g = GraphBuilder::new();
        let x = g.input(vec![4, 6]).unwrap();
        let before = g.len();
        let err = g
            .apply(
                Op::Slice {
                    axis: 1,
                    start: 4,
                    size: 3,
                },
                &[x],
            )
            .unwrap_err();
        assert!(matches!(err, GradixError::InvalidSlice { .. }));
        assert_eq!(g.len(), before);
    }

    #[test]
    fn apply_rejects_unknown_child() {
        let mut g = GraphBuilder::new();
        g.input(vec![2]).unwrap();
        let bogus = NodeId(99);
        let err = g.apply(Op::Square, &[bogus]).unwrap_err();
        assert!(matches!(err, GradixError::UnknownNode(99)));
    }

    #[test]
    fn sole_node_lookup_is_strict() {
        let mut g = GraphBuilder::new();
        let a = g.input(vec![2]).unwrap();
        let b = g.input(vec![2]).unwrap();
        let sum = g.apply(Op::Add, &[a, b]).unwrap();
        let (graph, _) = g.build(&[sum]).unwrap();
        let err = graph
            .sole_node_of_kind(&NodeKind::Input, "input")
            .unwrap_err();
        assert!(matches!(
            err,
            GradixError::AmbiguousPlaceholder { count: 2, .. }
        ));
        let err = graph
            .sole_node_of_kind(&NodeKind::GroundTruth, "ground truth")
            .unwrap_err();
        assert!(matches!(
            err,
            GradixError::AmbiguousPlaceholder { count: 0, .. }
        ));
    }

    #[test]
    fn output_lookup_requires_a_mark() {
        let (g, root) = chain();
        let (graph, _) = g.build(&[root]).unwrap();
        assert!(matches!(
            graph.output_index().unwrap_err(),
            GradixError::NoOutputNode
        ));

        let (mut g, root) = chain();
        g.mark_output(root).unwrap();
        let (graph, roots) = g.build(&[root]).unwrap();
        assert_eq!(graph.output_index().unwrap(), roots[0].0);
    }
}
