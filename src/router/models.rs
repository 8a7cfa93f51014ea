//! Task-type to model tables for smart routing
//!
//! Each elevated plan has a table mapping a [`TaskType`] to a model id.
//! Configured entries override the built-in table one task type at a time.

use super::{Plan, TaskType};
use serde::{Deserialize, Serialize};

/// Per-plan task-type → model table as written in `[routing.pro]` /
/// `[routing.enterprise]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelTable {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub design: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub research: Option<String>,
    #[serde(default)]
    pub chat: Option<String>,
}

impl ModelTable {
    /// Configured model for a task type, if any
    pub fn get(&self, task: TaskType) -> Option<&str> {
        match task {
            TaskType::Reasoning => self.reasoning.as_deref(),
            TaskType::Design => self.design.as_deref(),
            TaskType::Code => self.code.as_deref(),
            TaskType::Research => self.research.as_deref(),
            TaskType::Chat => self.chat.as_deref(),
        }
    }

    /// Set the model for a task type
    pub fn set(&mut self, task: TaskType, model: impl Into<String>) {
        let slot = match task {
            TaskType::Reasoning => &mut self.reasoning,
            TaskType::Design => &mut self.design,
            TaskType::Code => &mut self.code,
            TaskType::Research => &mut self.research,
            TaskType::Chat => &mut self.chat,
        };
        *slot = Some(model.into());
    }

    /// Model for a task type, falling back to the built-in table
    pub fn resolve(&self, plan: Plan, task: TaskType) -> Option<String> {
        self.get(task)
            .map(str::to_string)
            .or_else(|| builtin_model(plan, task).map(str::to_string))
    }
}

/// Built-in smart-routing table
///
/// The free plan has no entries. Every enterprise entry is at least as capable
/// as the pro entry for the same task type.
pub fn builtin_model(plan: Plan, task: TaskType) -> Option<&'static str> {
    match (plan, task) {
        (Plan::Free, _) => None,
        (Plan::Pro, TaskType::Reasoning) => Some("deepseek-r1-distill-llama-70b"),
        (Plan::Pro, TaskType::Design) => Some("llama-3.3-70b-versatile"),
        (Plan::Pro, TaskType::Code) => Some("qwen-2.5-coder-32b"),
        (Plan::Pro, TaskType::Research) => Some("llama-3.3-70b-versatile"),
        (Plan::Pro, TaskType::Chat) => Some("llama-3.1-8b-instant"),
        (Plan::Enterprise, TaskType::Reasoning) => Some("deepseek-r1"),
        (Plan::Enterprise, TaskType::Design) => Some("claude-3-5-sonnet"),
        (Plan::Enterprise, TaskType::Code) => Some("claude-3-5-sonnet"),
        (Plan::Enterprise, TaskType::Research) => Some("gpt-4o"),
        (Plan::Enterprise, TaskType::Chat) => Some("gpt-4o-mini"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_plan_has_no_builtin_models() {
        for task in TaskType::ALL {
            assert_eq!(builtin_model(Plan::Free, task), None);
        }
    }

    #[test]
    fn test_elevated_plans_cover_every_task_type() {
        for task in TaskType::ALL {
            assert!(builtin_model(Plan::Pro, task).is_some());
            assert!(builtin_model(Plan::Enterprise, task).is_some());
        }
    }

    #[test]
    fn test_configured_entry_overrides_builtin() {
        let mut table = ModelTable::default();
        table.set(TaskType::Code, "my-coder");
        assert_eq!(
            table.resolve(Plan::Pro, TaskType::Code).as_deref(),
            Some("my-coder")
        );
        assert_eq!(
            table.resolve(Plan::Pro, TaskType::Chat).as_deref(),
            Some("llama-3.1-8b-instant")
        );
    }

    #[test]
    fn test_table_parses_from_toml() {
        let table: ModelTable = toml::from_str(
            r#"
reasoning = "r-model"
chat = "c-model"
"#,
        )
        .unwrap();
        assert_eq!(table.get(TaskType::Reasoning), Some("r-model"));
        assert_eq!(table.get(TaskType::Chat), Some("c-model"));
        assert_eq!(table.get(TaskType::Design), None);
    }
}
