//! Prompt construction (spec §4.11's `build_prompt`), grounded on the
//! teacher's `generate_prompt` in `orchestrator/runner.rs`: task context
//! plus scratchpad history plus a critical-rules section naming the exact
//! end-of-turn tag expected.

use kagan_common::Task;

/// A named role configuration resolved from the `hats` setting
/// (`[SUPPLEMENT] Hats` in the expanded spec). Opaque beyond its system
/// prompt text.
#[derive(Debug, Clone, Default)]
pub struct Hat {
    pub system_prompt: String,
    pub allowed_agent_identities: Vec<String>,
}

pub fn build_prompt(task: &Task, iteration: u32, max_iterations: u32, scratchpad: &str, hat: Option<&Hat>) -> String {
    let hat_preamble = hat
        .map(|h| format!("{}\n\n", h.system_prompt))
        .unwrap_or_default();

    let acceptance = if task.acceptance_criteria.is_empty() {
        String::new()
    } else {
        let items: Vec<String> = task.acceptance_criteria.iter().map(|c| format!("- {c}")).collect();
        format!("\n\n## ACCEPTANCE CRITERIA\n{}", items.join("\n"))
    };

    let history = if scratchpad.is_empty() {
        String::new()
    } else {
        format!("\n\n## PRIOR ITERATIONS\n{scratchpad}")
    };

    format!(
        "{hat_preamble}## TASK\n{title}\n\n{description}{acceptance}{history}\n\n\
## ITERATION {iteration} of {max_iterations}\n\n\
## CRITICAL RULES\n\
1. Follow the acceptance criteria exactly.\n\
2. Check existing code before making changes.\n\
3. Run tests/checks to verify your work before declaring completion.\n\
4. When fully complete and verified, end your output with <complete/>.\n\
5. If you cannot proceed, end your output with <blocked reason=\"...\"/>.\n\
6. If you need another iteration to keep working, end your output with <continue/>.\n",
        title = task.title,
        description = task.description,
    )
}

pub fn build_review_prompt(task: &Task, diff: &str) -> String {
    format!(
        "## REVIEW\nYou are reviewing a change for task: {title}\n\n\
## ACCEPTANCE CRITERIA\n{criteria}\n\n\
## DIFF AGAINST BASE BRANCH\n```diff\n{diff}\n```\n\n\
## CRITICAL RULES\n\
1. This is a read-only review; you cannot modify files.\n\
2. If the change satisfies the acceptance criteria, end your output with \
<approve summary=\"...\" approach=\"...\" key_files=\"...\"/>.\n\
3. Otherwise, end your output with <reject reason=\"...\"/>.\n",
        title = task.title,
        criteria = task.acceptance_criteria.join("\n- "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_task() -> Task {
        Task {
            id: "task-1".into(),
            project_id: "proj-1".into(),
            title: "Rename foo to bar".into(),
            description: "Rename all occurrences".into(),
            status: kagan_common::TaskStatus::InProgress,
            priority: kagan_common::Priority::Medium,
            task_type: kagan_common::TaskType::Auto,
            assigned_hat: None,
            agent_backend: None,
            base_branch: None,
            acceptance_criteria: vec!["foo no longer appears".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_includes_iteration_count_and_signal_instructions() {
        let task = sample_task();
        let prompt = build_prompt(&task, 2, 5, "", None);
        assert!(prompt.contains("ITERATION 2 of 5"));
        assert!(prompt.contains("<complete/>"));
        assert!(prompt.contains("Rename foo to bar"));
    }

    #[test]
    fn prompt_includes_scratchpad_history_when_present() {
        let task = sample_task();
        let prompt = build_prompt(&task, 2, 5, "## Iteration 1\ndid some work", None);
        assert!(prompt.contains("PRIOR ITERATIONS"));
        assert!(prompt.contains("did some work"));
    }

    #[test]
    fn review_prompt_includes_diff_and_approve_reject_instructions() {
        let task = sample_task();
        let prompt = build_review_prompt(&task, "+added a line");
        assert!(prompt.contains("+added a line"));
        assert!(prompt.contains("<approve"));
        assert!(prompt.contains("<reject"));
    }
}
