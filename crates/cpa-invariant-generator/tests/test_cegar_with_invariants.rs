//! Invariant generation running next to the CEGAR analysis

#[cfg(test)]
mod test_cegar_with_invariants {
    use std::sync::Arc;

    use cpa_cfa::{
        Cfa, CfaFunction, CfaNode, CfaNodeId, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, Variable},
    };
    use cpa_core::{result::AnalysisResult, shutdown::ShutdownNotifier};
    use cpa_invariant_generator::generator::InvariantGenerator;
    use cpa_refinement::{cegar::CegarAlgorithm, config::CegarConfig};

    fn assume(op: ComparisonOp, truth: bool) -> EdgeKind {
        EdgeKind::Assume {
            condition: BooleanExpression::compare(Variable::new("x"), op, 0),
            truth,
        }
    }

    /// `if (x > 0) { if (x < 0) error(); }`
    fn safe_program() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(3)))
            .unwrap()
            .with_nodes((0..4).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(Variable::new("x"))
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume(ComparisonOp::Gt, true)),
                (CfaNodeId(1), CfaNodeId(2), assume(ComparisonOp::Lt, true)),
                (CfaNodeId(0), CfaNodeId(3), assume(ComparisonOp::Gt, false)),
                (CfaNodeId(1), CfaNodeId(3), assume(ComparisonOp::Lt, false)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(2), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    /// `if (x > 0) error();`
    fn unsafe_program() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
            .unwrap()
            .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(Variable::new("x"))
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume(ComparisonOp::Gt, true)),
                (CfaNodeId(0), CfaNodeId(2), assume(ComparisonOp::Gt, false)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(1), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    #[test]
    fn test_invariants_make_refinement_unnecessary() {
        let cfa = safe_program();
        let generator_shutdown = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(cfa.clone(), &generator_shutdown)
            .with_asynchronous(false)
            .with_shutdown_on_safe(false);
        generator.get().unwrap();

        let mut cegar =
            CegarAlgorithm::new(cfa, CegarConfig::default(), ShutdownNotifier::new())
                .unwrap()
                .with_invariants(Arc::new(generator.published()));

        assert_eq!(cegar.run(), AnalysisResult::Safe);
        assert_eq!(cegar.refinements(), 0);
    }

    #[test]
    fn test_safe_signal_ends_the_analysis() {
        let cfa = safe_program();
        let shutdown = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(cfa.clone(), &shutdown);
        generator.start().unwrap();
        generator.get().unwrap();
        assert!(shutdown.should_shutdown());

        let mut cegar = CegarAlgorithm::new(cfa, CegarConfig::default(), shutdown)
            .unwrap()
            .with_safe_signal(generator.safe_signal().clone());

        assert_eq!(cegar.run(), AnalysisResult::Safe);
        assert_eq!(cegar.refinements(), 0);
    }

    #[test]
    fn test_invariants_keep_reachable_targets() {
        let cfa = unsafe_program();
        let shutdown = ShutdownNotifier::new();
        let mut generator = InvariantGenerator::new(cfa.clone(), &shutdown);
        generator.start().unwrap();

        let mut cegar = CegarAlgorithm::new(cfa, CegarConfig::default(), shutdown.clone())
            .unwrap()
            .with_safe_signal(generator.safe_signal().clone())
            .with_invariants(Arc::new(generator.published()));
        generator.get().unwrap();

        let AnalysisResult::Unsafe(cex) = cegar.run() else {
            panic!("expected a counterexample");
        };
        assert_eq!(cex.path().locations().last(), Some(&CfaNodeId(1)));
        assert!(!shutdown.should_shutdown());
    }
}
