//! The Task Graph: plain data holding tasks plus their dependency edges.
//!
//! Acyclicity is checked on every `declare_dependency` call via a DFS from
//! the new edge's target back to its source, so the graph can never
//! transiently hold a cycle rather than deferring validation to a separate
//! pass.

use std::collections::HashMap;

use crate::error::{OrchestratorError, Result};
use crate::task::{Task, TaskStatus};

#[derive(Debug)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    /// Insertion order, used as the ready-tie-break rule.
    order: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self { tasks: HashMap::new(), order: Vec::new() }
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::Validation(format!("duplicate task id: {}", task.id)));
        }
        for dep in &task.depends_on {
            if !self.tasks.contains_key(dep) {
                return Err(OrchestratorError::Validation(format!(
                    "task {} depends on unknown task {dep}",
                    task.id
                )));
            }
        }
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        self.check_acyclic()?;
        Ok(())
    }

    pub fn declare_dependency(&mut self, task_id: &str, depends_on: &str) -> Result<()> {
        if !self.tasks.contains_key(depends_on) {
            return Err(OrchestratorError::Validation(format!("unknown task: {depends_on}")));
        }
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown task: {task_id}")))?;
        task.depends_on.insert(depends_on.to_string());
        if let Err(e) = self.check_acyclic() {
            self.tasks.get_mut(task_id).unwrap().depends_on.remove(depends_on);
            return Err(e);
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            tasks: &'a HashMap<String, Task>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(OrchestratorError::Validation(format!(
                        "cyclic dependency detected at task {id}"
                    )))
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(task) = tasks.get(id) {
                for dep in &task.depends_on {
                    visit(dep, tasks, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.tasks.keys() {
            visit(id, &self.tasks, &mut marks)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    fn predecessor_satisfied(&self, task: &Task, dep: &str) -> bool {
        match self.tasks.get(dep) {
            Some(d) if task.optional_depends_on.contains(dep) => {
                matches!(d.status, TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Failed)
            }
            Some(d) => d.status == TaskStatus::Completed,
            None => false,
        }
    }

    /// Tasks in `Pending` whose every predecessor is satisfied, in
    /// insertion order.
    pub fn ready_tasks(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                let task = &self.tasks[*id];
                task.status == TaskStatus::Pending
                    && task.depends_on.iter().all(|dep| self.predecessor_satisfied(task, dep))
            })
            .cloned()
            .collect()
    }

    pub fn has_running_or_ready(&self) -> bool {
        self.tasks.values().any(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Ready))
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.is_terminal())
    }

    pub fn mark_ready(&mut self, id: &str) -> Result<()> {
        self.tasks.get_mut(id).ok_or_else(|| unknown(id))?.transition_to(TaskStatus::Ready)
    }

    pub fn mark_started(&mut self, id: &str) -> Result<()> {
        self.tasks.get_mut(id).ok_or_else(|| unknown(id))?.transition_to(TaskStatus::Running)
    }

    pub fn mark_completed(&mut self, id: &str, outcome: crate::task::TaskOutcome) -> Result<()> {
        let task = self.tasks.get_mut(id).ok_or_else(|| unknown(id))?;
        task.transition_to(TaskStatus::Completed)?;
        task.result = Some(outcome);
        Ok(())
    }

    pub fn mark_failed(&mut self, id: &str, outcome: crate::task::TaskOutcome) -> Result<()> {
        let task = self.tasks.get_mut(id).ok_or_else(|| unknown(id))?;
        task.transition_to(TaskStatus::Failed)?;
        task.result = Some(outcome);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, id: &str) -> Result<()> {
        self.tasks.get_mut(id).ok_or_else(|| unknown(id))?.transition_to(TaskStatus::Cancelled)
    }

    pub fn mark_skipped(&mut self, id: &str) -> Result<()> {
        self.tasks.get_mut(id).ok_or_else(|| unknown(id))?.transition_to(TaskStatus::Skipped)
    }

    /// Predecessors that are direct dependencies of `id`, in dependency
    /// declaration order (sorted for determinism, since `depends_on` is a
    /// `BTreeSet`).
    pub fn predecessors(&self, id: &str) -> Vec<&Task> {
        match self.tasks.get(id) {
            Some(task) => task.depends_on.iter().filter_map(|dep| self.tasks.get(dep)).collect(),
            None => Vec::new(),
        }
    }

    /// Every task with no remaining unsatisfied predecessors, used at
    /// instantiation time to detect a node whose entire predecessor set was
    /// disabled (`roles.<role>.enabled = false`), leaving no producer.
    pub fn validate_no_orphaned_fan_in(&self) -> Result<()> {
        for id in &self.order {
            let task = &self.tasks[id];
            if task.depends_on.is_empty() || task.status == TaskStatus::Skipped {
                continue;
            }
            let all_disabled = task.depends_on.iter().all(|dep| {
                self.tasks.get(dep).map(|d| d.status == TaskStatus::Skipped).unwrap_or(false)
            });
            if all_disabled {
                return Err(OrchestratorError::Validation(format!(
                    "task {id} has no enabled predecessor left (all of {:?} are disabled)",
                    task.depends_on
                )));
            }
        }
        Ok(())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(id: &str) -> OrchestratorError {
    OrchestratorError::Validation(format!("unknown task: {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Operation, Role};

    fn t(id: &str) -> Task {
        Task::new(id, Role::Developer, Operation::Implement, "do it")
    }

    #[test]
    fn ready_tasks_respects_dependency_order() {
        let mut g = TaskGraph::new();
        g.add_task(t("a")).unwrap();
        g.add_task(t("b").depends_on("a")).unwrap();
        assert_eq!(g.ready_tasks(), vec!["a".to_string()]);

        g.mark_ready("a").unwrap();
        g.mark_started("a").unwrap();
        g.mark_completed("a", dummy_success()).unwrap();
        assert_eq!(g.ready_tasks(), vec!["b".to_string()]);
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let mut g = TaskGraph::new();
        g.add_task(t("a")).unwrap();
        g.add_task(t("b").depends_on("a")).unwrap();
        let err = g.declare_dependency("a", "b").unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn optional_skip_allows_fan_in_on_skipped_predecessor() {
        let mut g = TaskGraph::new();
        g.add_task(t("a")).unwrap();
        g.add_task(t("b").optional_skip("a")).unwrap();

        g.mark_ready("a").unwrap();
        g.mark_skipped("a").unwrap();
        assert_eq!(g.ready_tasks(), vec!["b".to_string()]);
    }

    #[test]
    fn fan_in_waits_for_all_predecessors() {
        let mut g = TaskGraph::new();
        g.add_task(t("a")).unwrap();
        g.add_task(t("b")).unwrap();
        g.add_task(t("c").depends_on("a").depends_on("b")).unwrap();

        g.mark_ready("a").unwrap();
        g.mark_started("a").unwrap();
        g.mark_completed("a", dummy_success()).unwrap();
        assert!(!g.ready_tasks().contains(&"c".to_string()));

        g.mark_ready("b").unwrap();
        g.mark_started("b").unwrap();
        g.mark_completed("b", dummy_success()).unwrap();
        assert!(g.ready_tasks().contains(&"c".to_string()));
    }

    fn dummy_success() -> crate::task::TaskOutcome {
        crate::task::TaskOutcome::Success(crate::task::TaskSuccess {
            summary: String::new(),
            artifacts: Vec::new(),
            files_written: Vec::new(),
            raw_text: String::new(),
            metrics: crate::task::TaskMetrics::default(),
        })
    }
}
