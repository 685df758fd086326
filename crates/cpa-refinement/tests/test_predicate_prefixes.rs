//! Prefix extraction with the SMT solver (requires `z3`)

#[cfg(test)]
mod test_predicate_prefixes {
    use std::sync::Arc;

    use cpa_cfa::{
        Cfa, CfaEdgeId, CfaFunction, CfaNode, CfaNodeId, EdgeKind,
        builder::CfaBuilder,
        expressions::{BooleanExpression, ComparisonOp, Variable},
    };
    use cpa_core::{
        arg::ArgStateId,
        path::{ArgPath, ArgPathBuilder},
        result::AnalysisResult,
        shutdown::ShutdownNotifier,
    };
    use cpa_refinement::{
        cegar::CegarAlgorithm,
        config::{CegarConfig, DomainKind, InterpolationStrategy, PrefixProviderKind},
        interpolant::Interpolant,
        predicate_prefix::PredicatePrefixProvider,
        prefix::PrefixProvider,
    };
    use cpa_smt_encoder::{SMTSolverBuilder, SMTSolverBuilderCfg};

    fn assume(var: &str, op: ComparisonOp) -> EdgeKind {
        EdgeKind::Assume {
            condition: BooleanExpression::compare(Variable::new(var), op, 0),
            truth: true,
        }
    }

    /// `assume(x > 0); assume(x < 0); assume(y > 0); assume(y < 0); error();`
    fn two_contradictions() -> Arc<Cfa> {
        let cfa = CfaBuilder::new("main")
            .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(4)))
            .unwrap()
            .with_nodes((0..5).map(|i| CfaNode::new(CfaNodeId(i), "main")))
            .unwrap()
            .with_global_variable(Variable::new("x"))
            .unwrap()
            .with_global_variable(Variable::new("y"))
            .unwrap()
            .initialize()
            .with_edges([
                (CfaNodeId(0), CfaNodeId(1), assume("x", ComparisonOp::Gt)),
                (CfaNodeId(1), CfaNodeId(2), assume("x", ComparisonOp::Lt)),
                (CfaNodeId(2), CfaNodeId(3), assume("y", ComparisonOp::Gt)),
                (CfaNodeId(3), CfaNodeId(4), assume("y", ComparisonOp::Lt)),
            ])
            .unwrap()
            .with_target_location(CfaNodeId(4), "unreach-call")
            .unwrap()
            .build()
            .unwrap();
        Arc::new(cfa)
    }

    fn full_path(cfa: &Cfa) -> ArgPath {
        let mut builder = ArgPathBuilder::new(ArgStateId(0), CfaNodeId(0));
        for k in 0..4 {
            let edge = cfa.edge(CfaEdgeId(k)).unwrap().clone();
            builder = builder.add(edge, ArgStateId(k as usize + 1));
        }
        builder.build()
    }

    fn provider() -> PredicatePrefixProvider {
        let builder = SMTSolverBuilder::new(&SMTSolverBuilderCfg::new_z3()).unwrap();
        PredicatePrefixProvider::new(builder, ShutdownNotifier::new())
    }

    #[test]
    fn test_both_contradictions_are_found() {
        let cfa = two_contradictions();
        let extraction = provider()
            .extract_infeasible_prefixes(&full_path(&cfa))
            .unwrap();

        let prefixes = extraction.prefixes();
        assert_eq!(prefixes.len(), 2);

        assert_eq!(prefixes[0].failing_edge().id(), CfaEdgeId(1));
        let first = prefixes[0].interpolants();
        assert_eq!(first.len(), 2);
        assert!(first[0].is_true());
        assert_eq!(first[1].to_string(), "x >= 0");

        // the first contradiction no longer matters for the second one
        assert_eq!(prefixes[1].failing_edge().id(), CfaEdgeId(3));
        let second = prefixes[1].interpolants();
        assert_eq!(second.len(), 4);
        assert!(second[1].is_true());
        assert!(second[2].is_true());
        assert_eq!(second[3].to_string(), "y >= 0");
    }

    #[test]
    fn test_prefix_count_is_limited() {
        let cfa = two_contradictions();
        let extraction = provider()
            .with_max_prefix_count(1)
            .extract_infeasible_prefixes(&full_path(&cfa))
            .unwrap();

        assert_eq!(extraction.prefixes().len(), 1);
        assert_eq!(extraction.prefixes()[0].failing_edge().id(), CfaEdgeId(1));
    }

    #[test]
    fn test_cegar_with_predicate_prefixes() {
        let config = CegarConfig::default()
            .with_domains([DomainKind::Interval])
            .with_prefix_provider(PrefixProviderKind::Predicate)
            .with_interpolation_strategy(InterpolationStrategy::Edge);
        let mut cegar =
            CegarAlgorithm::new(two_contradictions(), config, ShutdownNotifier::new()).unwrap();

        assert_eq!(cegar.run(), AnalysisResult::Safe);
    }
}
