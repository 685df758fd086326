//! Builder for validated [`Cfa`]s
//!
//! Building a CFA happens in two phases. First, functions, nodes and global
//! variables are declared with a [`CfaBuilder`]. After calling
//! [`CfaBuilder::initialize`], edges and target locations can be added to the
//! resulting [`InitializedCfaBuilder`], which validates every edge against
//! the declared structure.
//!
//! # Example
//!
//! ```
//! use cpa_cfa::{builder::CfaBuilder, CfaFunction, CfaNode, CfaNodeId, EdgeKind};
//! use cpa_cfa::expressions::*;
//!
//! let x = Variable::new_local("main", "x");
//! let cfa = CfaBuilder::new("main")
//!     .with_function(CfaFunction::new("main", CfaNodeId(0), CfaNodeId(2)))
//!     .unwrap()
//!     .with_nodes((0..3).map(|i| CfaNode::new(CfaNodeId(i), "main")))
//!     .unwrap()
//!     .initialize()
//!     .with_edge(
//!         CfaNodeId(0),
//!         CfaNodeId(1),
//!         EdgeKind::Assignment { variable: x.clone(), expression: IntegerExpression::Nondet },
//!     )
//!     .unwrap()
//!     .with_edge(
//!         CfaNodeId(1),
//!         CfaNodeId(2),
//!         EdgeKind::Assume {
//!             condition: BooleanExpression::compare(x, ComparisonOp::Lt, 0),
//!             truth: true,
//!         },
//!     )
//!     .unwrap()
//!     .with_target_location(CfaNodeId(2), "unreach-call")
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(cfa.leaving_edges(CfaNodeId(0)).count(), 1);
//! assert!(cfa.is_target_location(CfaNodeId(2)));
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    error,
    fmt::{self, Display},
};

use log::debug;

use crate::{
    Cfa, CfaEdge, CfaEdgeId, CfaFunction, CfaNode, CfaNodeId, EdgeKind, EdgeType,
    expressions::Variable,
};

/// Builder declaring the functions, nodes and global variables of a CFA
#[derive(Debug, Clone, PartialEq)]
pub struct CfaBuilder {
    main: String,
    functions: BTreeMap<String, CfaFunction>,
    nodes: BTreeMap<CfaNodeId, CfaNode>,
    globals: BTreeSet<Variable>,
}

impl CfaBuilder {
    /// Create a builder for a program starting in function `main`
    pub fn new(main: impl ToString) -> Self {
        Self {
            main: main.to_string(),
            functions: BTreeMap::new(),
            nodes: BTreeMap::new(),
            globals: BTreeSet::new(),
        }
    }

    /// Declare a function
    ///
    /// Returns an error if a function with the same name has been declared
    /// before.
    pub fn with_function(mut self, function: CfaFunction) -> Result<Self, BuilderError> {
        if self.functions.contains_key(function.name()) {
            return Err(BuilderError::DuplicateFunction(function.name().to_string()));
        }
        self.functions.insert(function.name().to_string(), function);
        Ok(self)
    }

    /// Declare multiple functions
    pub fn with_functions(
        self,
        functions: impl IntoIterator<Item = CfaFunction>,
    ) -> Result<Self, BuilderError> {
        functions.into_iter().try_fold(self, |b, f| b.with_function(f))
    }

    /// Declare a node
    ///
    /// Returns an error if the node is already declared or belongs to an
    /// undeclared function.
    pub fn with_node(mut self, node: CfaNode) -> Result<Self, BuilderError> {
        if !self.functions.contains_key(node.function()) {
            return Err(BuilderError::UnknownFunction(node.function().to_string()));
        }
        if self.nodes.contains_key(&node.id()) {
            return Err(BuilderError::DuplicateNode(node.id()));
        }
        self.nodes.insert(node.id(), node);
        Ok(self)
    }

    /// Declare multiple nodes
    pub fn with_nodes(self, nodes: impl IntoIterator<Item = CfaNode>) -> Result<Self, BuilderError> {
        nodes.into_iter().try_fold(self, |b, n| b.with_node(n))
    }

    /// Declare a global variable
    ///
    /// Returns an error if the variable carries a function scope.
    pub fn with_global_variable(mut self, var: Variable) -> Result<Self, BuilderError> {
        if !var.is_global() {
            return Err(BuilderError::MalformedVariable(
                var,
                "global variables must not be qualified with a function".to_string(),
            ));
        }
        self.globals.insert(var);
        Ok(self)
    }

    /// Declare multiple global variables
    pub fn with_global_variables(
        self,
        vars: impl IntoIterator<Item = Variable>,
    ) -> Result<Self, BuilderError> {
        vars.into_iter().try_fold(self, |b, v| b.with_global_variable(v))
    }

    /// Finish the declarations and start adding edges
    pub fn initialize(self) -> InitializedCfaBuilder {
        InitializedCfaBuilder {
            declarations: self,
            edges: BTreeMap::new(),
            targets: BTreeMap::new(),
            next_edge_id: 0,
        }
    }
}

/// Builder adding edges and target locations to declared nodes
#[derive(Debug, Clone, PartialEq)]
pub struct InitializedCfaBuilder {
    declarations: CfaBuilder,
    edges: BTreeMap<CfaEdgeId, CfaEdge>,
    targets: BTreeMap<CfaNodeId, BTreeSet<String>>,
    next_edge_id: u32,
}

impl InitializedCfaBuilder {
    /// Add an edge from `predecessor` to `successor`
    ///
    /// Edge identifiers are assigned in the order edges are added, sub-edges of
    /// a multi edge receive their own identifiers. Returns an error if the edge
    /// does not fit the declared functions and nodes.
    pub fn with_edge(
        mut self,
        predecessor: CfaNodeId,
        successor: CfaNodeId,
        kind: EdgeKind,
    ) -> Result<Self, BuilderError> {
        let kind = match kind {
            EdgeKind::Multi(sub_edges) => {
                let renumbered = sub_edges
                    .into_iter()
                    .map(|e| {
                        let id = self.fresh_edge_id();
                        CfaEdge::new(id, e.predecessor(), e.successor(), e.kind().clone())
                    })
                    .collect();
                EdgeKind::Multi(renumbered)
            }
            kind => kind,
        };
        let edge = CfaEdge::new(self.fresh_edge_id(), predecessor, successor, kind);
        self.validate_edge(&edge)?;
        self.edges.insert(edge.id(), edge);
        Ok(self)
    }

    /// Add multiple edges given as `(predecessor, successor, kind)`
    pub fn with_edges(
        self,
        edges: impl IntoIterator<Item = (CfaNodeId, CfaNodeId, EdgeKind)>,
    ) -> Result<Self, BuilderError> {
        edges
            .into_iter()
            .try_fold(self, |b, (pred, succ, kind)| b.with_edge(pred, succ, kind))
    }

    /// Mark `node` as violating `property` when reached
    pub fn with_target_location(
        mut self,
        node: CfaNodeId,
        property: impl ToString,
    ) -> Result<Self, BuilderError> {
        self.check_node(node)?;
        self.targets
            .entry(node)
            .or_default()
            .insert(property.to_string());
        Ok(self)
    }

    /// Validate the function declarations and build the CFA
    pub fn build(self) -> Result<Cfa, BuilderError> {
        let decl = &self.declarations;
        if !decl.functions.contains_key(&decl.main) {
            return Err(BuilderError::MissingMainFunction(decl.main.clone()));
        }
        for f in decl.functions.values() {
            for node in [f.entry(), f.exit()] {
                match decl.nodes.get(&node) {
                    None => return Err(BuilderError::UnknownNode(node)),
                    Some(n) if n.function() != f.name() => {
                        return Err(BuilderError::MalformedFunction(
                            f.name().to_string(),
                            format!("entry or exit node {node} belongs to function {}", n.function()),
                        ));
                    }
                    Some(_) => (),
                }
            }
        }

        let mut leaving: BTreeMap<CfaNodeId, Vec<CfaEdgeId>> = BTreeMap::new();
        let mut entering: BTreeMap<CfaNodeId, Vec<CfaEdgeId>> = BTreeMap::new();
        for edge in self.edges.values() {
            leaving.entry(edge.predecessor()).or_default().push(edge.id());
            entering.entry(edge.successor()).or_default().push(edge.id());
        }

        let mut cfa = Cfa {
            main: self.declarations.main,
            functions: self.declarations.functions,
            nodes: self.declarations.nodes,
            edges: self.edges,
            leaving,
            entering,
            targets: self.targets,
            globals: self.declarations.globals,
            loop_heads: BTreeSet::new(),
        };
        cfa.loop_heads = compute_loop_heads(&cfa);

        debug!(
            "Built CFA with {} functions, {} nodes, {} edges and {} target locations",
            cfa.functions.len(),
            cfa.nodes.len(),
            cfa.edges.len(),
            cfa.targets.len()
        );
        Ok(cfa)
    }

    fn fresh_edge_id(&mut self) -> CfaEdgeId {
        let id = CfaEdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        id
    }

    fn check_node(&self, node: CfaNodeId) -> Result<&CfaNode, BuilderError> {
        self.declarations
            .nodes
            .get(&node)
            .ok_or(BuilderError::UnknownNode(node))
    }

    fn check_function(&self, name: &str) -> Result<&CfaFunction, BuilderError> {
        self.declarations
            .functions
            .get(name)
            .ok_or_else(|| BuilderError::UnknownFunction(name.to_string()))
    }

    fn validate_edge(&self, edge: &CfaEdge) -> Result<(), BuilderError> {
        let malformed = |reason: &str| BuilderError::MalformedEdge(Box::new(edge.clone()), reason.to_string());

        let pred = self.check_node(edge.predecessor())?;
        let succ = self.check_node(edge.successor())?;

        match edge.kind() {
            EdgeKind::FunctionCall {
                function,
                arguments,
                return_site,
            } => {
                let callee = self.check_function(function)?;
                if callee.entry() != edge.successor() {
                    return Err(malformed("call edge must lead to the entry of the callee"));
                }
                if self.check_node(*return_site)?.function() != pred.function() {
                    return Err(malformed("return site must belong to the calling function"));
                }
                let params = arguments.iter().map(|(p, _)| p).collect::<Vec<_>>();
                if params != callee.parameters().iter().collect::<Vec<_>>() {
                    return Err(malformed("arguments do not match the parameters of the callee"));
                }
            }
            EdgeKind::FunctionReturn {
                function,
                assign_to,
                return_variable,
            } => {
                let callee = self.check_function(function)?;
                if callee.exit() != edge.predecessor() {
                    return Err(malformed("return edge must leave the exit of the callee"));
                }
                if assign_to.is_some() && return_variable.as_ref() != callee.return_variable() {
                    return Err(malformed("return value does not match the return variable of the callee"));
                }
            }
            EdgeKind::Multi(sub_edges) => {
                if pred.function() != succ.function() {
                    return Err(malformed("edge must not leave its function"));
                }
                let mut current = edge.predecessor();
                for sub in sub_edges {
                    if sub.predecessor() != current {
                        return Err(malformed("sub-edges of a multi edge must form a chain"));
                    }
                    if !matches!(
                        sub.edge_type(),
                        EdgeType::Blank | EdgeType::Declaration | EdgeType::Statement
                    ) {
                        return Err(malformed(
                            "multi edges may only contain blank edges, declarations and statements",
                        ));
                    }
                    if self.check_node(sub.successor())?.function() != pred.function() {
                        return Err(malformed("sub-edge must not leave its function"));
                    }
                    current = sub.successor();
                }
                if current != edge.successor() || sub_edges.is_empty() {
                    return Err(malformed("sub-edges of a multi edge must end in its successor"));
                }
            }
            _ => {
                if pred.function() != succ.function() {
                    return Err(malformed("edge must not leave its function"));
                }
            }
        }
        Ok(())
    }
}

/// Intra-procedural depth-first traversal of every function, calls are
/// stepped over to their return site
fn compute_loop_heads(cfa: &Cfa) -> BTreeSet<CfaNodeId> {
    let successors = |node: CfaNodeId| {
        cfa.leaving_edges(node)
            .filter_map(|e| match e.kind() {
                EdgeKind::FunctionCall { return_site, .. } => Some(*return_site),
                EdgeKind::FunctionReturn { .. } => None,
                _ => Some(e.successor()),
            })
            .collect::<Vec<_>>()
    };

    let mut loop_heads = BTreeSet::new();
    for function in cfa.functions() {
        let mut finished = BTreeSet::new();
        let mut on_stack = BTreeSet::from([function.entry()]);
        let mut stack = vec![(function.entry(), successors(function.entry()), 0)];

        while let Some((node, succs, idx)) = stack.last_mut() {
            if *idx == succs.len() {
                on_stack.remove(node);
                finished.insert(*node);
                stack.pop();
                continue;
            }
            let next = succs[*idx];
            *idx += 1;
            if on_stack.contains(&next) {
                loop_heads.insert(next);
            } else if !finished.contains(&next) {
                on_stack.insert(next);
                stack.push((next, successors(next), 0));
            }
        }
    }
    loop_heads
}

/// Error that can occur while building a [`Cfa`]
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderError {
    /// A function with the same name was declared multiple times
    DuplicateFunction(String),
    /// A node with the same identifier was declared multiple times
    DuplicateNode(CfaNodeId),
    /// An undeclared function was referenced
    UnknownFunction(String),
    /// An undeclared node was referenced
    UnknownNode(CfaNodeId),
    /// The main function has not been declared
    MissingMainFunction(String),
    /// A function declaration is inconsistent with its nodes
    MalformedFunction(String, String),
    /// A variable declaration is malformed
    MalformedVariable(Variable, String),
    /// An edge does not fit the declared structure
    MalformedEdge(Box<CfaEdge>, String),
}

impl error::Error for BuilderError {}

impl Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::DuplicateFunction(name) => {
                write!(f, "Function '{name}' was declared multiple times")
            }
            BuilderError::DuplicateNode(id) => write!(f, "Node {id} was declared multiple times"),
            BuilderError::UnknownFunction(name) => write!(f, "Unknown function '{name}'"),
            BuilderError::UnknownNode(id) => write!(f, "Unknown node {id}"),
            BuilderError::MissingMainFunction(name) => {
                write!(f, "Main function '{name}' has not been declared")
            }
            BuilderError::MalformedFunction(name, reason) => {
                write!(f, "Function '{name}' is malformed: {reason}")
            }
            BuilderError::MalformedVariable(var, reason) => {
                write!(f, "Variable '{var}' is malformed: {reason}")
            }
            BuilderError::MalformedEdge(edge, reason) => {
                write!(f, "Edge '{edge}' is malformed: {reason}")
            }
        }
    }
}
