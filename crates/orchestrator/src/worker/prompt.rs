//! Prompt composition: turns a task plus its satisfied predecessors into the
//! two-message request sent to the model.

use std::collections::HashMap;

use llm::{ChatRequest, Message};

use crate::task::{Task, TaskOutcome};

const DEFAULT_CONTEXT_LINES: usize = 40;

pub fn default_context_lines() -> usize {
    DEFAULT_CONTEXT_LINES
}

/// Build the request for `task`, curating each predecessor down to its
/// `summary` plus the last `context_lines` lines of its `raw_text` so the
/// prompt does not grow unboundedly with workflow depth.
pub fn compose(
    model: &str,
    system_prompt: &str,
    requirement: &str,
    context: &HashMap<String, String>,
    task: &Task,
    predecessors: &[&Task],
    context_lines: usize,
    temperature: f32,
    max_tokens: Option<usize>,
) -> ChatRequest {
    let mut body = String::new();
    body.push_str("Requirement:\n");
    body.push_str(requirement);
    body.push_str("\n\n");

    if !context.is_empty() {
        body.push_str("Context:\n");
        let mut keys: Vec<&String> = context.keys().collect();
        keys.sort();
        for key in keys {
            body.push_str(&format!("- {key}: {}\n", context[key]));
        }
        body.push('\n');
    }

    if !predecessors.is_empty() {
        body.push_str("Predecessor outputs:\n");
        for pred in predecessors {
            body.push_str(&render_predecessor(pred, context_lines));
        }
        body.push('\n');
    }

    body.push_str("Task:\n");
    body.push_str(&task.prompt);
    body.push('\n');

    let request = ChatRequest::new(model, vec![Message::system(system_prompt), Message::user(body)]).with_temperature(temperature);
    match max_tokens {
        Some(max_tokens) => request.with_max_tokens(max_tokens),
        None => request,
    }
}

fn render_predecessor(task: &Task, context_lines: usize) -> String {
    match &task.result {
        Some(TaskOutcome::Success(success)) => {
            let tail: Vec<&str> = success.raw_text.lines().rev().take(context_lines).collect();
            let tail: String = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            format!(
                "- {} ({}): {}\n  recent output:\n{}\n",
                task.id,
                task.role.as_str(),
                success.summary,
                indent(&tail)
            )
        }
        Some(TaskOutcome::Failure(failure)) => {
            format!("- {} ({}): failed — {}\n", task.id, task.role.as_str(), failure.message)
        }
        None => format!("- {} ({}): no recorded output\n", task.id, task.role.as_str()),
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {l}")).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Operation, Role, TaskMetrics, TaskSuccess};

    fn completed(id: &str, summary: &str, raw_text: &str) -> Task {
        let mut task = Task::new(id, Role::Developer, Operation::Implement, "do it");
        task.result = Some(TaskOutcome::Success(TaskSuccess {
            summary: summary.to_string(),
            artifacts: Vec::new(),
            files_written: Vec::new(),
            raw_text: raw_text.to_string(),
            metrics: TaskMetrics::default(),
        }));
        task
    }

    #[test]
    fn composed_request_includes_requirement_and_task_prompt() {
        let task = Task::new("t1", Role::Analyst, Operation::Analyze, "look at the bug");
        let request = compose("gpt", "you are an analyst", "fix the crash", &HashMap::new(), &task, &[], 10, 0.7, None);

        let user = &request.messages[1].content;
        assert!(user.contains("fix the crash"));
        assert!(user.contains("look at the bug"));
    }

    #[test]
    fn predecessor_output_is_curated_to_summary_and_tail() {
        let long_output: String = (0..100).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let pred = completed("analyze", "found root cause", &long_output);
        let task = Task::new("fix", Role::Developer, Operation::Fix, "apply the fix");

        let request = compose("gpt", "you are a developer", "fix the crash", &HashMap::new(), &task, &[&pred], 5, 0.7, None);
        let user = &request.messages[1].content;

        assert!(user.contains("found root cause"));
        assert!(user.contains("line 99"));
        assert!(!user.contains("line 0\n"));
    }
}
