//! JSON description of a program
//!
//! A program is described by its functions, nodes, global variables, edges
//! and target locations:
//!
//! ```json
//! {
//!   "main": "main",
//!   "functions": [{ "name": "main", "entry": 0, "exit": 1, "parameters": [] }],
//!   "nodes": [{ "id": 0, "function": "main" }, { "id": 1, "function": "main" }],
//!   "globals": ["x"],
//!   "edges": [{ "from": 0, "to": 1, "kind": { "Blank": { "description": "skip" } } }],
//!   "targets": [{ "location": 1, "property": "unreach-call" }]
//! }
//! ```
//!
//! Edges receive their identifiers in the order they are listed.

use cpa_cfa::{
    Cfa, CfaFunction, CfaNode, CfaNodeId, EdgeKind,
    builder::{BuilderError, CfaBuilder},
    expressions::Variable,
};
use serde::Deserialize;

fn default_main() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EdgeDescription {
    from: CfaNodeId,
    to: CfaNodeId,
    kind: EdgeKind,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetDescription {
    location: CfaNodeId,
    property: String,
}

/// Program as read from a JSON file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProgramDescription {
    #[serde(default = "default_main")]
    main: String,
    functions: Vec<CfaFunction>,
    nodes: Vec<CfaNode>,
    #[serde(default)]
    globals: Vec<Variable>,
    edges: Vec<EdgeDescription>,
    #[serde(default)]
    targets: Vec<TargetDescription>,
}

impl ProgramDescription {
    /// Build and validate the CFA of the program
    pub(crate) fn into_cfa(self) -> Result<Cfa, BuilderError> {
        let mut builder = CfaBuilder::new(self.main)
            .with_functions(self.functions)?
            .with_nodes(self.nodes)?
            .with_global_variables(self.globals)?
            .initialize()
            .with_edges(self.edges.into_iter().map(|e| (e.from, e.to, e.kind)))?;
        for target in self.targets {
            builder = builder.with_target_location(target.location, target.property)?;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use cpa_cfa::{CfaEdgeId, EdgeType};

    use super::*;

    const CONTRADICTION: &str = r#"{
        "functions": [{ "name": "main", "entry": 0, "exit": 3, "parameters": [] }],
        "nodes": [
            { "id": 0, "function": "main" },
            { "id": 1, "function": "main" },
            { "id": 2, "function": "main" },
            { "id": 3, "function": "main" }
        ],
        "globals": ["x"],
        "edges": [
            { "from": 0, "to": 1, "kind": { "Assume": {
                "condition": { "ComparisonExpression": [{ "Atom": "x" }, "Gt", { "Const": 0 }] },
                "truth": true } } },
            { "from": 1, "to": 2, "kind": { "Assume": {
                "condition": { "ComparisonExpression": [{ "Atom": "x" }, "Lt", { "Const": 0 }] },
                "truth": true } } },
            { "from": 0, "to": 3, "kind": { "Blank": { "description": "skip" } } },
            { "from": 1, "to": 3, "kind": { "Blank": { "description": "skip" } } }
        ],
        "targets": [{ "location": 2, "property": "unreach-call" }]
    }"#;

    #[test]
    fn test_parse_program() {
        let program: ProgramDescription = serde_json::from_str(CONTRADICTION).unwrap();
        let cfa = program.into_cfa().unwrap();

        assert_eq!(cfa.main_function().name(), "main");
        assert_eq!(cfa.entry_node().id(), CfaNodeId(0));
        assert_eq!(cfa.nodes().count(), 4);
        assert!(cfa.is_target_location(CfaNodeId(2)));
        assert!(!cfa.is_target_location(CfaNodeId(3)));

        let edge = cfa.edge(CfaEdgeId(1)).unwrap();
        assert_eq!(edge.predecessor(), CfaNodeId(1));
        assert_eq!(edge.successor(), CfaNodeId(2));
        assert_eq!(edge.edge_type(), EdgeType::Assume);
        assert!(cfa.edge(CfaEdgeId(2)).unwrap().is_blank());
    }

    #[test]
    fn test_unknown_node_is_rejected() {
        let json = CONTRADICTION.replace("\"location\": 2", "\"location\": 7");
        let program: ProgramDescription = serde_json::from_str(&json).unwrap();

        assert!(program.into_cfa().is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let json = CONTRADICTION.replace("\"globals\"", "\"variables\"");

        assert!(serde_json::from_str::<ProgramDescription>(&json).is_err());
    }
}
