//! Control-flow automata (CFA)
//!
//! A [`Cfa`] is the program representation the analysis consumes: a directed
//! graph of program locations ([`CfaNode`]) connected by edges ([`CfaEdge`])
//! that carry the semantic action of a program step, e.g. an assignment or an
//! assumption. Every node belongs to exactly one function, function calls and
//! returns are explicit edges between the caller and the callee.
//!
//! A CFA is immutable once built. Use the [`builder::CfaBuilder`] to construct
//! a validated CFA.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
};

use cpa_display_utils::{display_iterator_stable_order, indent_all, join_iterator};
use expressions::{BooleanExpression, IntegerExpression, Variable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod builder;
pub mod expressions;

/// Identifier of a program location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfaNodeId(pub u32);

impl Display for CfaNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Identifier of a CFA edge, assigned by the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfaEdgeId(pub u32);

/// Program location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfaNode {
    id: CfaNodeId,
    function: String,
}

impl CfaNode {
    /// Create a node belonging to `function`
    pub fn new(id: CfaNodeId, function: impl ToString) -> Self {
        Self {
            id,
            function: function.to_string(),
        }
    }

    /// Identifier of the node
    pub fn id(&self) -> CfaNodeId {
        self.id
    }

    /// Name of the function the node belongs to
    pub fn function(&self) -> &str {
        &self.function
    }
}

/// Function of the program
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfaFunction {
    name: String,
    entry: CfaNodeId,
    exit: CfaNodeId,
    parameters: Vec<Variable>,
    return_variable: Option<Variable>,
}

impl CfaFunction {
    /// Declare a function with the given entry and exit node
    pub fn new(name: impl ToString, entry: CfaNodeId, exit: CfaNodeId) -> Self {
        Self {
            name: name.to_string(),
            entry,
            exit,
            parameters: Vec::new(),
            return_variable: None,
        }
    }

    /// Declare the formal parameters of the function
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Variable>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    /// Declare the variable holding the return value of the function
    pub fn with_return_variable(mut self, var: Variable) -> Self {
        self.return_variable = Some(var);
        self
    }

    /// Name of the function
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry node of the function
    pub fn entry(&self) -> CfaNodeId {
        self.entry
    }

    /// Exit node of the function
    pub fn exit(&self) -> CfaNodeId {
        self.exit
    }

    /// Formal parameters
    pub fn parameters(&self) -> &[Variable] {
        &self.parameters
    }

    /// Variable holding the return value
    pub fn return_variable(&self) -> Option<&Variable> {
        self.return_variable.as_ref()
    }
}

/// Action attached to a CFA edge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EdgeKind {
    /// Edge without effect
    Blank {
        /// Description displayed for the edge
        description: String,
    },
    /// Declaration of a variable, without initializer the value is arbitrary
    Declaration {
        /// Declared variable
        variable: Variable,
        /// Initial value
        initializer: Option<IntegerExpression>,
    },
    /// Assignment `variable = expression`
    Assignment {
        /// Assigned variable
        variable: Variable,
        /// Assigned value
        expression: IntegerExpression,
    },
    /// Branch of a condition; `truth == false` assumes the negated condition
    Assume {
        /// Branching condition
        condition: BooleanExpression,
        /// Branch taken by the edge
        truth: bool,
    },
    /// Call of `function`, binding every parameter to an argument
    FunctionCall {
        /// Called function
        function: String,
        /// Parameters and the arguments assigned to them
        arguments: Vec<(Variable, IntegerExpression)>,
        /// Location in the caller where execution continues after the call
        return_site: CfaNodeId,
    },
    /// Return from `function` to the caller
    FunctionReturn {
        /// Function that returns
        function: String,
        /// Caller variable receiving the return value
        assign_to: Option<Variable>,
        /// Callee variable holding the return value
        return_variable: Option<Variable>,
    },
    /// Straight-line sequence of edges without intermediate branching
    Multi(Vec<CfaEdge>),
}

/// Coarse classification of edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    /// [`EdgeKind::Blank`]
    Blank,
    /// [`EdgeKind::Declaration`]
    Declaration,
    /// [`EdgeKind::Assignment`]
    Statement,
    /// [`EdgeKind::Assume`]
    Assume,
    /// [`EdgeKind::FunctionCall`]
    FunctionCall,
    /// [`EdgeKind::FunctionReturn`]
    FunctionReturn,
    /// [`EdgeKind::Multi`]
    Multi,
}

impl EdgeKind {
    /// Classify the action
    pub fn edge_type(&self) -> EdgeType {
        match self {
            EdgeKind::Blank { .. } => EdgeType::Blank,
            EdgeKind::Declaration { .. } => EdgeType::Declaration,
            EdgeKind::Assignment { .. } => EdgeType::Statement,
            EdgeKind::Assume { .. } => EdgeType::Assume,
            EdgeKind::FunctionCall { .. } => EdgeType::FunctionCall,
            EdgeKind::FunctionReturn { .. } => EdgeType::FunctionReturn,
            EdgeKind::Multi(_) => EdgeType::Multi,
        }
    }

    /// Condition that holds after taking an assume edge
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::{EdgeKind, expressions::*};
    ///
    /// let kind = EdgeKind::Assume {
    ///     condition: BooleanExpression::compare(Variable::new("x"), ComparisonOp::Gt, 0),
    ///     truth: false,
    /// };
    /// assert_eq!(kind.assumed_condition().unwrap().to_string(), "x <= 0");
    /// ```
    pub fn assumed_condition(&self) -> Option<BooleanExpression> {
        match self {
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    Some(condition.clone())
                } else {
                    Some(condition.negate())
                }
            }
            _ => None,
        }
    }
}

/// Edge of the CFA
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfaEdge {
    id: CfaEdgeId,
    predecessor: CfaNodeId,
    successor: CfaNodeId,
    kind: EdgeKind,
}

impl CfaEdge {
    /// Create a new edge
    pub fn new(id: CfaEdgeId, predecessor: CfaNodeId, successor: CfaNodeId, kind: EdgeKind) -> Self {
        Self {
            id,
            predecessor,
            successor,
            kind,
        }
    }

    /// Identifier of the edge
    pub fn id(&self) -> CfaEdgeId {
        self.id
    }

    /// Source location
    pub fn predecessor(&self) -> CfaNodeId {
        self.predecessor
    }

    /// Target location
    pub fn successor(&self) -> CfaNodeId {
        self.successor
    }

    /// Action of the edge
    pub fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    /// Classification of the action
    pub fn edge_type(&self) -> EdgeType {
        self.kind.edge_type()
    }

    /// Blank edge with the same endpoints and identifier as this edge
    ///
    /// Used to neutralize the effect of an edge while keeping a path
    /// connected.
    pub fn noop(&self) -> CfaEdge {
        CfaEdge {
            id: self.id,
            predecessor: self.predecessor,
            successor: self.successor,
            kind: EdgeKind::Blank {
                description: format!("noop instead of {}", self.kind),
            },
        }
    }

    /// Check whether the edge is a replacement created by [`CfaEdge::noop`]
    /// or any other blank edge
    pub fn is_blank(&self) -> bool {
        self.edge_type() == EdgeType::Blank
    }

    /// Sub-edges of a multi edge, or the edge itself
    ///
    /// # Example
    ///
    /// ```
    /// use cpa_cfa::{CfaEdge, CfaEdgeId, CfaNodeId, EdgeKind};
    ///
    /// let blank = |id, from, to| CfaEdge::new(
    ///     CfaEdgeId(id),
    ///     CfaNodeId(from),
    ///     CfaNodeId(to),
    ///     EdgeKind::Blank { description: String::new() },
    /// );
    /// let multi = CfaEdge::new(
    ///     CfaEdgeId(2),
    ///     CfaNodeId(0),
    ///     CfaNodeId(2),
    ///     EdgeKind::Multi(vec![blank(0, 0, 1), blank(1, 1, 2)]),
    /// );
    ///
    /// assert_eq!(multi.sub_edges().count(), 2);
    /// assert_eq!(blank(3, 4, 5).sub_edges().count(), 1);
    /// ```
    pub fn sub_edges(&self) -> Box<dyn Iterator<Item = &CfaEdge> + '_> {
        match &self.kind {
            EdgeKind::Multi(edges) => Box::new(edges.iter()),
            _ => Box::new(std::iter::once(self)),
        }
    }
}

impl Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Blank { description } => write!(f, "{description}"),
            EdgeKind::Declaration {
                variable,
                initializer,
            } => match initializer {
                Some(init) => write!(f, "int {variable} = {init};"),
                None => write!(f, "int {variable};"),
            },
            EdgeKind::Assignment {
                variable,
                expression,
            } => write!(f, "{variable} = {expression};"),
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    write!(f, "[{condition}]")
                } else {
                    write!(f, "[!({condition})]")
                }
            }
            EdgeKind::FunctionCall {
                function,
                arguments,
                ..
            } => write!(
                f,
                "{function}({});",
                join_iterator(arguments.iter().map(|(_, arg)| arg), ", ")
            ),
            EdgeKind::FunctionReturn {
                function,
                assign_to,
                return_variable,
            } => match (assign_to, return_variable) {
                (Some(var), Some(ret)) => write!(f, "{var} = {ret}; return from {function}"),
                _ => write!(f, "return from {function}"),
            },
            EdgeKind::Multi(edges) => {
                write!(f, "{}", join_iterator(edges.iter().map(|e| &e.kind), " "))
            }
        }
    }
}

impl Display for CfaEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.predecessor, self.successor, self.kind)
    }
}

/// Validated control-flow automaton of a program
///
/// Use [`builder::CfaBuilder`] to construct it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cfa {
    main: String,
    functions: BTreeMap<String, CfaFunction>,
    nodes: BTreeMap<CfaNodeId, CfaNode>,
    edges: BTreeMap<CfaEdgeId, CfaEdge>,
    leaving: BTreeMap<CfaNodeId, Vec<CfaEdgeId>>,
    entering: BTreeMap<CfaNodeId, Vec<CfaEdgeId>>,
    targets: BTreeMap<CfaNodeId, BTreeSet<String>>,
    globals: BTreeSet<Variable>,
    loop_heads: BTreeSet<CfaNodeId>,
}

impl Cfa {
    /// Name of the function where the execution starts
    pub fn main_function(&self) -> &CfaFunction {
        &self.functions[&self.main]
    }

    /// Location where the execution starts
    pub fn entry_node(&self) -> &CfaNode {
        &self.nodes[&self.main_function().entry()]
    }

    /// Function with the given name
    pub fn function(&self, name: &str) -> Option<&CfaFunction> {
        self.functions.get(name)
    }

    /// All functions of the program
    pub fn functions(&self) -> impl Iterator<Item = &CfaFunction> {
        self.functions.values()
    }

    /// Node with the given identifier
    pub fn node(&self, id: CfaNodeId) -> Option<&CfaNode> {
        self.nodes.get(&id)
    }

    /// All nodes ordered by their identifier
    pub fn nodes(&self) -> impl Iterator<Item = &CfaNode> {
        self.nodes.values()
    }

    /// Edge with the given identifier
    pub fn edge(&self, id: CfaEdgeId) -> Option<&CfaEdge> {
        self.edges.get(&id)
    }

    /// All top-level edges ordered by their identifier
    pub fn edges(&self) -> impl Iterator<Item = &CfaEdge> {
        self.edges.values()
    }

    /// Edges leaving `node`, in the order they were added
    pub fn leaving_edges(&self, node: CfaNodeId) -> impl Iterator<Item = &CfaEdge> {
        self.leaving
            .get(&node)
            .into_iter()
            .flatten()
            .map(|id| &self.edges[id])
    }

    /// Edges entering `node`, in the order they were added
    pub fn entering_edges(&self, node: CfaNodeId) -> impl Iterator<Item = &CfaEdge> {
        self.entering
            .get(&node)
            .into_iter()
            .flatten()
            .map(|id| &self.edges[id])
    }

    /// Check whether `edge` is an edge of this CFA leaving its predecessor
    pub fn has_edge(&self, edge: &CfaEdge) -> bool {
        self.leaving_edges(edge.predecessor()).any(|e| e == edge)
    }

    /// Check whether reaching `node` violates a property
    pub fn is_target_location(&self, node: CfaNodeId) -> bool {
        self.targets.contains_key(&node)
    }

    /// Properties violated when reaching `node`
    pub fn violated_properties(&self, node: CfaNodeId) -> BTreeSet<String> {
        self.targets.get(&node).cloned().unwrap_or_default()
    }

    /// All locations violating a property
    pub fn target_locations(&self) -> impl Iterator<Item = CfaNodeId> + '_ {
        self.targets.keys().copied()
    }

    /// Global variables of the program
    pub fn global_variables(&self) -> &BTreeSet<Variable> {
        &self.globals
    }

    /// Targets of backward edges of a depth-first traversal of every function
    pub fn loop_heads(&self) -> &BTreeSet<CfaNodeId> {
        &self.loop_heads
    }

    /// All variables declared or referenced in the program
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = self.globals.clone();
        for f in self.functions.values() {
            vars.extend(f.parameters.iter().cloned());
            vars.extend(f.return_variable.iter().cloned());
        }
        for edge in self.edges.values().flat_map(|e| e.sub_edges()) {
            match edge.kind() {
                EdgeKind::Blank { .. } | EdgeKind::Multi(_) => (),
                EdgeKind::Declaration {
                    variable,
                    initializer,
                } => {
                    vars.insert(variable.clone());
                    if let Some(init) = initializer {
                        init.collect_variables(&mut vars);
                    }
                }
                EdgeKind::Assignment {
                    variable,
                    expression,
                } => {
                    vars.insert(variable.clone());
                    expression.collect_variables(&mut vars);
                }
                EdgeKind::Assume { condition, .. } => condition.collect_variables(&mut vars),
                EdgeKind::FunctionCall { arguments, .. } => {
                    for (param, arg) in arguments {
                        vars.insert(param.clone());
                        arg.collect_variables(&mut vars);
                    }
                }
                EdgeKind::FunctionReturn {
                    assign_to,
                    return_variable,
                    ..
                } => {
                    vars.extend(assign_to.iter().cloned());
                    vars.extend(return_variable.iter().cloned());
                }
            }
        }
        vars
    }
}

impl Display for Cfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.globals.is_empty() {
            writeln!(f, "globals {}", display_iterator_stable_order(&self.globals))?;
        }
        for function in self.functions.values() {
            writeln!(
                f,
                "function {}({}) entry {} exit {}",
                function.name,
                join_iterator(function.parameters.iter(), ", "),
                function.entry,
                function.exit
            )?;
            let edges = self
                .edges
                .values()
                .filter(|e| self.nodes[&e.predecessor].function == function.name)
                .map(|e| format!("{e}\n"));
            write!(f, "{}", indent_all(join_iterator(edges, "")))?;
        }
        for (node, properties) in &self.targets {
            writeln!(
                f,
                "target {node}: {}",
                display_iterator_stable_order(properties)
            )?;
        }
        Ok(())
    }
}
