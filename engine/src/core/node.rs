//! Node hierarchy: scoped variables and owned specs.
//!
//! Nodes form an owned tree. Variable references inside descendant specs
//! resolve by walking the ancestor scope chain, nearest scope first, so a
//! descendant's variable intentionally shadows an ancestor's.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::core::context::EvalContext;
use crate::core::ident::fresh_id;
use crate::core::spec::Spec;
use crate::core::value::{TypeGroup, Value};
use crate::core::verdict::Verification;
use crate::source::Source;

/// A named value owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub group: TypeGroup,
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, group: TypeGroup, value: Value) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            bail!("variable name must not be empty");
        }
        Ok(Self {
            id: fresh_id("var"),
            name,
            group,
            value,
        })
    }
}

/// Tag classifying what a node represents in the hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Structural grouping: folders, areas, controllers.
    #[default]
    Group,
    /// A node whose purpose is the specs it owns.
    Spec,
}

/// A hierarchical container of specs and scoped variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Immutable once assigned.
    pub id: String,
    /// Kept consistent by attach/detach; `None` for a detached root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub specs: Vec<Spec>,
    /// Keyed by variable name; names are unique within this scope.
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub children: Vec<Node>,
}

/// A spec cloned out of the tree with its references bound against the
/// scope chain of its owning node.
#[derive(Debug, Clone)]
pub struct BoundSpec {
    pub node_id: String,
    pub node_name: String,
    pub spec: Spec,
}

/// Result of running one spec within a node subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecReport {
    pub node_id: String,
    pub spec_id: String,
    pub verifications: Vec<Verification>,
}

/// Aggregated result of running a whole node subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    /// All verifications merged by max severity.
    pub verification: Verification,
    pub specs: Vec<SpecReport>,
}

/// Ancestor scope chain used during reference resolution.
struct Scope<'a> {
    variables: &'a BTreeMap<String, Variable>,
    parent: Option<&'a Scope<'a>>,
}

impl Scope<'_> {
    /// Nearest scope first; first name match wins.
    fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(variable) = self.variables.get(name) {
            return Some(&variable.value);
        }
        self.parent.and_then(|parent| parent.lookup(name))
    }
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: fresh_id("node"),
            parent_id: None,
            kind,
            name: name.into(),
            specs: Vec::new(),
            variables: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Attach a child, taking ownership and pointing it at this node.
    pub fn add_child(&mut self, mut child: Node) -> &mut Node {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self.children.last_mut().expect("just pushed")
    }

    /// Detach a child by id; the removed subtree has no parent.
    pub fn remove_child(&mut self, id: &str) -> Option<Node> {
        let index = self.children.iter().position(|child| child.id == id)?;
        let mut removed = self.children.remove(index);
        removed.parent_id = None;
        Some(removed)
    }

    pub fn add_spec(&mut self, spec: Spec) {
        self.specs.push(spec);
    }

    pub fn remove_spec(&mut self, id: &str) -> Option<Spec> {
        let index = self.specs.iter().position(|spec| spec.id == id)?;
        Some(self.specs.remove(index))
    }

    /// Add a variable; names must be unique within this node's scope.
    pub fn add_variable(&mut self, variable: Variable) -> Result<()> {
        if self.variables.contains_key(&variable.name) {
            bail!("variable '{}' already defined on node '{}'", variable.name, self.id);
        }
        self.variables.insert(variable.name.clone(), variable);
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        self.variables.remove(name)
    }

    /// Deep copy of the subtree with fresh node and spec ids, detached
    /// from any parent.
    pub fn duplicate(&self) -> Node {
        let mut copy = self.duplicate_inner();
        copy.parent_id = None;
        copy
    }

    fn duplicate_inner(&self) -> Node {
        let id = fresh_id("node");
        let children = self
            .children
            .iter()
            .map(|child| {
                let mut copy = child.duplicate_inner();
                copy.parent_id = Some(id.clone());
                copy
            })
            .collect();
        Node {
            id,
            parent_id: self.parent_id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            specs: self.specs.iter().map(Spec::duplicate).collect(),
            variables: self.variables.clone(),
            children,
        }
    }

    /// Clone every descendant spec with its references bound against the
    /// owning node's scope chain, in depth-first declaration order.
    pub fn resolved_specs(&self) -> Vec<BoundSpec> {
        let mut bound = Vec::new();
        self.collect_bound(None, &mut bound);
        bound
    }

    fn collect_bound(&self, parent: Option<&Scope<'_>>, out: &mut Vec<BoundSpec>) {
        let scope = Scope {
            variables: &self.variables,
            parent,
        };
        for spec in &self.specs {
            let mut spec = spec.clone();
            spec.bind_references(&|name| scope.lookup(name).cloned());
            out.push(BoundSpec {
                node_id: self.id.clone(),
                node_name: self.name.clone(),
                spec,
            });
        }
        for child in &self.children {
            child.collect_bound(Some(&scope), out);
        }
    }

    /// Run every descendant spec against a source and merge all
    /// verifications by max severity into one aggregate.
    #[instrument(skip_all, fields(node_id = %self.id, source_id = %source.id()))]
    pub fn run_all(&self, source: &dyn Source, ctx: &EvalContext) -> NodeReport {
        let mut specs = Vec::new();
        for bound in self.resolved_specs() {
            let verifications = bound.spec.run(source, ctx);
            specs.push(SpecReport {
                node_id: bound.node_id,
                spec_id: bound.spec.id.clone(),
                verifications,
            });
        }
        let all: Vec<Verification> = specs
            .iter()
            .flat_map(|report| report.verifications.iter().cloned())
            .collect();
        NodeReport {
            node_id: self.id.clone(),
            verification: Verification::merge(all),
            specs,
        }
    }
}
