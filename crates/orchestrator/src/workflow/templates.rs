//! The five workflow templates: pure functions from a requirement plus
//! context into a fully-wired [`TaskGraph`]. Templates hold no behavior of
//! their own — they only shape the graph — matching the Task Graph being
//! plain data and the templates being the thing that constructs it.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::Result;
use crate::graph::TaskGraph;
use crate::task::{Operation, Role, Task};
use crate::workflow::router::implement_fan_out_should_skip;
use crate::workflow::Context;

pub type TemplateFn = fn(&str, &Context, &HashMap<Role, bool>) -> Result<TaskGraph>;

pub struct ConditionalEdge {
    pub after: &'static str,
    pub skip_if: fn(&Task) -> bool,
    pub targets: &'static [&'static str],
}

pub struct WorkflowTemplate {
    pub build: TemplateFn,
    pub conditional_edge: Option<ConditionalEdge>,
}

pub static TEMPLATES: Lazy<HashMap<&'static str, WorkflowTemplate>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, WorkflowTemplate> = HashMap::new();
    m.insert(
        "feature_development",
        WorkflowTemplate {
            build: feature_development,
            conditional_edge: Some(ConditionalEdge {
                after: "implement",
                skip_if: implement_fan_out_should_skip,
                targets: &["test", "operate"],
            }),
        },
    );
    m.insert("bug_fix", WorkflowTemplate { build: bug_fix, conditional_edge: None });
    m.insert("infrastructure", WorkflowTemplate { build: infrastructure, conditional_edge: None });
    m.insert("documentation", WorkflowTemplate { build: documentation, conditional_edge: None });
    m.insert("analysis", WorkflowTemplate { build: analysis, conditional_edge: None });
    m
});

fn role_enabled(role: Role, enabled_roles: &HashMap<Role, bool>) -> bool {
    enabled_roles.get(&role).copied().unwrap_or(true)
}

/// Add `task` to `graph`; if its role is disabled, transition it straight to
/// `Skipped` so downstream fan-in sees it as a satisfied optional predecessor
/// rather than a task the Scheduler ever dispatches.
fn add(graph: &mut TaskGraph, task: Task, enabled_roles: &HashMap<Role, bool>) -> Result<()> {
    let id = task.id.clone();
    let role = task.role;
    graph.add_task(task)?;
    if !role_enabled(role, enabled_roles) {
        graph.mark_ready(&id)?;
        graph.mark_skipped(&id)?;
    }
    Ok(())
}

fn dep(graph: &TaskGraph, task: Task, dep_id: &str, enabled_roles: &HashMap<Role, bool>) -> Task {
    let dep_enabled = graph.get(dep_id).map(|d| role_enabled(d.role, enabled_roles)).unwrap_or(true);
    if dep_enabled {
        task.depends_on(dep_id)
    } else {
        task.optional_skip(dep_id)
    }
}

fn feature_development(requirement: &str, _context: &Context, enabled_roles: &HashMap<Role, bool>) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    add(&mut g, Task::new("analyze", Role::Analyst, Operation::Analyze, format!("Analyze the requirement: {requirement}")), enabled_roles)?;

    let design = dep(&g, Task::new("design", Role::Developer, Operation::Design, "Design the change"), "analyze", enabled_roles);
    add(&mut g, design, enabled_roles)?;

    let implement = dep(&g, Task::new("implement", Role::Developer, Operation::Implement, "Implement the design"), "design", enabled_roles);
    add(&mut g, implement, enabled_roles)?;

    let test = dep(&g, Task::new("test", Role::Tester, Operation::Test, "Write and run tests for the implementation"), "implement", enabled_roles);
    add(&mut g, test, enabled_roles)?;

    let operate = dep(&g, Task::new("operate", Role::Operator, Operation::Operate, "Validate the implementation operates correctly"), "implement", enabled_roles);
    add(&mut g, operate, enabled_roles)?;

    let document = Task::new("document", Role::Writer, Operation::Document, "Document the completed feature")
        .optional_skip("implement")
        .optional_skip("test")
        .optional_skip("operate");
    add(&mut g, document, enabled_roles)?;

    g.validate_no_orphaned_fan_in()?;
    Ok(g)
}

fn bug_fix(requirement: &str, _context: &Context, enabled_roles: &HashMap<Role, bool>) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    add(&mut g, Task::new("analyze", Role::Analyst, Operation::Analyze, format!("Analyze the bug: {requirement}")), enabled_roles)?;

    let fix = dep(&g, Task::new("fix", Role::Developer, Operation::Fix, "Fix the root cause"), "analyze", enabled_roles);
    add(&mut g, fix, enabled_roles)?;

    let regress = dep(&g, Task::new("regress_test", Role::Tester, Operation::RegressTest, "Add a regression test for the fix"), "fix", enabled_roles);
    add(&mut g, regress, enabled_roles)?;

    let notes = dep(&g, Task::new("release_notes", Role::Writer, Operation::ReleaseNotes, "Write release notes for the fix"), "regress_test", enabled_roles);
    add(&mut g, notes, enabled_roles)?;

    g.validate_no_orphaned_fan_in()?;
    Ok(g)
}

fn infrastructure(requirement: &str, _context: &Context, enabled_roles: &HashMap<Role, bool>) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    add(&mut g, Task::new("design", Role::Operator, Operation::Design, format!("Design the infrastructure change: {requirement}")), enabled_roles)?;

    let implement = dep(&g, Task::new("implement", Role::Operator, Operation::Infra, "Implement the infrastructure change"), "design", enabled_roles);
    add(&mut g, implement, enabled_roles)?;

    let test = dep(&g, Task::new("test", Role::Tester, Operation::Test, "Validate the infrastructure change"), "implement", enabled_roles);
    add(&mut g, test, enabled_roles)?;

    let document = dep(&g, Task::new("document", Role::Writer, Operation::Document, "Document the infrastructure change"), "test", enabled_roles);
    add(&mut g, document, enabled_roles)?;

    g.validate_no_orphaned_fan_in()?;
    Ok(g)
}

fn documentation(requirement: &str, _context: &Context, enabled_roles: &HashMap<Role, bool>) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    add(&mut g, Task::new("gather", Role::Analyst, Operation::Gather, format!("Gather material for: {requirement}")), enabled_roles)?;

    let draft = dep(&g, Task::new("draft", Role::Writer, Operation::Draft, "Draft the documentation"), "gather", enabled_roles);
    add(&mut g, draft, enabled_roles)?;

    let review = dep(&g, Task::new("review", Role::Writer, Operation::Review, "Review and polish the draft"), "draft", enabled_roles);
    add(&mut g, review, enabled_roles)?;

    g.validate_no_orphaned_fan_in()?;
    Ok(g)
}

fn analysis(requirement: &str, _context: &Context, enabled_roles: &HashMap<Role, bool>) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    add(&mut g, Task::new("gather", Role::Analyst, Operation::Gather, format!("Gather data relevant to: {requirement}")), enabled_roles)?;

    let technical = dep(&g, Task::new("technical", Role::Analyst, Operation::Technical, "Perform technical analysis"), "gather", enabled_roles);
    add(&mut g, technical, enabled_roles)?;

    let operational = dep(&g, Task::new("operational", Role::Operator, Operation::Operational, "Perform operational analysis"), "gather", enabled_roles);
    add(&mut g, operational, enabled_roles)?;

    let summarize = Task::new("summarize", Role::Writer, Operation::Summarize, "Summarize the findings")
        .optional_skip("technical")
        .optional_skip("operational");
    add(&mut g, summarize, enabled_roles)?;

    g.validate_no_orphaned_fan_in()?;
    Ok(g)
}
