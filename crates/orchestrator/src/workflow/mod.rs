//! Workflow templates: the five fixed shapes a requirement can be routed
//! through, plus the one conditional edge the feature-development shape
//! needs.

pub mod router;
pub mod templates;

use std::collections::HashMap;

pub use templates::{ConditionalEdge, TemplateFn, WorkflowTemplate, TEMPLATES};

use crate::error::{OrchestratorError, Result};
use crate::graph::TaskGraph;
use crate::task::Role;

/// Free-form key/value context handed to a template and threaded into every
/// worker's prompt.
pub type Context = HashMap<String, String>;

/// Instantiate `workflow_type`'s template, returning the node count cap
/// error variant (`VALIDATION`) if the name is unknown.
pub fn instantiate(
    workflow_type: &str,
    requirement: &str,
    context: &Context,
    enabled_roles: &HashMap<Role, bool>,
) -> Result<TaskGraph> {
    let template = TEMPLATES
        .get(workflow_type)
        .ok_or_else(|| OrchestratorError::Validation(format!("unknown workflow type: {workflow_type}")))?;
    (template.build)(requirement, context, enabled_roles)
}

pub fn conditional_edge_for(workflow_type: &str) -> Option<&'static ConditionalEdge> {
    TEMPLATES.get(workflow_type).and_then(|t| t.conditional_edge.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_workflow_type_is_a_validation_error() {
        let err = instantiate("not_a_real_template", "do something", &Context::new(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn feature_development_has_a_conditional_edge() {
        assert!(conditional_edge_for("feature_development").is_some());
        assert!(conditional_edge_for("bug_fix").is_none());
    }
}
