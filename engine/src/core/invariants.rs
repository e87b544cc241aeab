//! Semantic invariants checked over a node tree before running it.
//!
//! Serde deserialization bypasses constructors, so persisted trees are
//! re-checked here: id uniqueness, parent consistency, operation
//! applicability, and rule-tree self-containment.

use std::collections::HashSet;

use crate::core::criterion::{Argument, ArgumentValue, Criterion};
use crate::core::node::Node;
use crate::core::spec::Spec;
use crate::core::step::Step;

/// Check semantic invariants not enforced by the data contracts:
/// - no duplicate node ids
/// - children's `parent_id` points at the owning node
/// - variable names are non-empty
/// - every criterion's operation supports its target group
/// - no criterion contains itself through its argument tree
pub fn validate_tree(root: &Node) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate_node(root, &mut seen, &mut errors, root.id.as_str());
    errors
}

fn validate_node(node: &Node, seen: &mut HashSet<String>, errors: &mut Vec<String>, path: &str) {
    if !seen.insert(node.id.clone()) {
        errors.push(format!("duplicate node id '{}' at {}", node.id, path));
    }

    for name in node.variables.keys() {
        if name.trim().is_empty() {
            errors.push(format!("{}: variable with empty name", path));
        }
    }

    for spec in &node.specs {
        validate_spec(spec, errors, path);
    }

    for child in &node.children {
        if child.parent_id.as_deref() != Some(node.id.as_str()) {
            errors.push(format!(
                "{}/{}: parent_id does not point at '{}'",
                path, child.id, node.id
            ));
        }
        let child_path = format!("{}/{}", path, child.id);
        validate_node(child, seen, errors, &child_path);
    }
}

fn validate_spec(spec: &Spec, errors: &mut Vec<String>, path: &str) {
    if spec.element.trim().is_empty() {
        errors.push(format!("{}/{}: empty root element selector", path, spec.id));
    }
    for step in &spec.steps {
        match step {
            Step::Filter { criteria, .. } | Step::Verify { criteria, .. } => {
                for criterion in criteria {
                    validate_criterion(criterion, errors, path);
                }
            }
            Step::Query { element, .. } => {
                if element.trim().is_empty() {
                    errors.push(format!("{}/{}: query step with empty element", path, spec.id));
                }
            }
            Step::Select { selections } => {
                for selection in selections {
                    if selection.alias.trim().is_empty() {
                        errors.push(format!("{}/{}: selection with empty alias", path, spec.id));
                    }
                }
            }
        }
    }
}

fn validate_criterion(criterion: &Criterion, errors: &mut Vec<String>, path: &str) {
    if !criterion.operation.supports(criterion.target) {
        errors.push(format!(
            "{}/{}: operation '{}' does not support {} targets",
            path,
            criterion.id,
            criterion.operation.name(),
            criterion.target.name()
        ));
    }
    if criterion.contains(&criterion.id) {
        errors.push(format!(
            "{}/{}: criterion contains itself",
            path, criterion.id
        ));
    }
    for argument in &criterion.arguments {
        validate_argument(argument, errors, path);
    }
}

fn validate_argument(argument: &Argument, errors: &mut Vec<String>, path: &str) {
    match &argument.value {
        ArgumentValue::Rule { rule } => validate_criterion(rule, errors, path),
        ArgumentValue::List { items } => {
            for item in items {
                validate_argument(item, errors, path);
            }
        }
        ArgumentValue::Literal { .. } | ArgumentValue::Reference { .. } => {}
    }
}
