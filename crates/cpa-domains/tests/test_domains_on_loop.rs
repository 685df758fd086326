//! Runs the reachability algorithm with the composite domain on a counting
//! loop followed by a check that cannot fail

#[cfg(test)]
mod test_domains_on_loop {
    use std::sync::Arc;

    use cpa_cfa::{
        Cfa, CfaFunction, CfaNode, CfaNodeId, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, IntegerExpression, Variable},
    };
    use cpa_core::{
        ConfigurableProgramAnalysis,
        algorithm::CpaAlgorithm,
        precision::{PrecisionScope, VariableTrackingPrecision},
        reached_set::WaitlistOrder,
        shutdown::ShutdownNotifier,
    };
    use cpa_domains::{
        composite::{ComponentKind, CompositeCpa},
        interval::Interval,
    };

    fn x() -> Variable {
        Variable::new_local("main", "x")
    }

    /// `x = 0; while (x < 10) x++; if (x < 0) error();`
    fn counting_loop() -> Arc<Cfa> {
        let x_lt = |c: i64| BooleanExpression::compare(x(), ComparisonOp::Lt, c);
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(5)))
            .unwrap()
            .with_nodes((0..6).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .initialize()
            .with_edges([
                (
                    CfaNodeId(0),
                    CfaNodeId(1),
                    EdgeKind::Declaration {
                        variable: x(),
                        initializer: Some(IntegerExpression::Const(0)),
                    },
                ),
                (
                    CfaNodeId(1),
                    CfaNodeId(2),
                    EdgeKind::Assume {
                        condition: x_lt(10),
                        truth: true,
                    },
                ),
                (
                    CfaNodeId(2),
                    CfaNodeId(1),
                    EdgeKind::Assignment {
                        variable: x(),
                        expression: IntegerExpression::Atom(x()) + IntegerExpression::Const(1),
                    },
                ),
                (
                    CfaNodeId(1),
                    CfaNodeId(3),
                    EdgeKind::Assume {
                        condition: x_lt(10),
                        truth: false,
                    },
                ),
                (
                    CfaNodeId(3),
                    CfaNodeId(4),
                    EdgeKind::Assume {
                        condition: x_lt(0),
                        truth: true,
                    },
                ),
                (
                    CfaNodeId(3),
                    CfaNodeId(5),
                    EdgeKind::Assume {
                        condition: x_lt(0),
                        truth: false,
                    },
                ),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(4), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    #[test]
    fn test_interval_widening_proves_check() {
        let cfa = counting_loop();
        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            [ComponentKind::Interval],
            VariableTrackingPrecision::full(),
        );
        let algorithm = CpaAlgorithm::new(&cpa, &cfa, ShutdownNotifier::new());
        let mut reached = algorithm.initial_reached_set(WaitlistOrder::DepthFirst);

        let status = algorithm.run(&mut reached).unwrap();
        assert!(status.is_sound());
        assert_eq!(reached.arg().target_states().count(), 0);
        assert!(reached.arg().is_acyclic());

        let after_loop = reached.uncovered_states_at(CfaNodeId(3));
        assert_eq!(after_loop.len(), 1);
        let state = reached.state(after_loop[0]).unwrap().wrapped();
        assert_eq!(state.interval().unwrap().get(&x()), Interval::at_least(10));
    }

    #[test]
    fn test_value_analysis_unrolls_with_full_precision() {
        let cfa = counting_loop();
        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            [ComponentKind::Value],
            VariableTrackingPrecision::full(),
        );
        let algorithm = CpaAlgorithm::new(&cpa, &cfa, ShutdownNotifier::new());
        let mut reached = algorithm.initial_reached_set(WaitlistOrder::BreadthFirst);

        algorithm.run(&mut reached).unwrap();
        assert_eq!(reached.arg().target_states().count(), 0);
        assert_eq!(reached.uncovered_states_at(CfaNodeId(1)).len(), 11);
        let exit = reached.uncovered_states_at(CfaNodeId(5));
        assert_eq!(exit.len(), 1);
        let state = reached.state(exit[0]).unwrap().wrapped();
        assert_eq!(state.value().unwrap().get(&x()), Some(10));
    }

    #[test]
    fn test_empty_precision_reaches_target() {
        let cfa = counting_loop();
        let cpa = CompositeCpa::with_kinds(
            cfa.clone(),
            [ComponentKind::Value],
            VariableTrackingPrecision::empty(PrecisionScope::Location),
        );
        let entry = cfa.entry_node();
        assert!(
            cpa.initial_precision(entry)
                .variables_of(ComponentKind::Value)
                .is_some_and(|p| p.size() == 0)
        );

        let algorithm =
            CpaAlgorithm::new(&cpa, &cfa, ShutdownNotifier::new()).with_stop_at_target(true);
        let mut reached = algorithm.initial_reached_set(WaitlistOrder::DepthFirst);

        let status = algorithm.run(&mut reached).unwrap();
        let target = status.target().unwrap();
        assert_eq!(reached.state(target).unwrap().location(), CfaNodeId(4));
    }
}
