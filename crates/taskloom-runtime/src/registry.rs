//! Task type registry
//!
//! Maps the task types an orchestrator may plan onto factories producing
//! configured `Task` values. The registry is the closed world of sub-task
//! types: a plan naming anything else fails the materialization.

use std::collections::HashMap;
use std::sync::Arc;

use taskloom_core::task::Task;
use taskloom_agent::orchestrate::SubTaskSpec;

use crate::scheduler::SchedulerError;

pub type TaskFactory = Arc<dyn Fn() -> Task + Send + Sync>;

#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, factory: TaskFactory) {
        self.factories.insert(task_type.into(), factory);
    }

    pub fn with_type(mut self, task_type: impl Into<String>, factory: TaskFactory) -> Self {
        self.register(task_type, factory);
        self
    }

    /// Whether the type is executable directly (a leaf type).
    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn build(&self, task_type: &str) -> Result<Task, SchedulerError> {
        match self.factories.get(task_type) {
            Some(factory) => Ok(factory()),
            None => Err(SchedulerError::UnknownTaskType(task_type.to_string())),
        }
    }

    /// Materialize one planned sub-task.
    pub fn build_from_spec(&self, spec: &SubTaskSpec) -> Result<Task, SchedulerError> {
        let mut task = self.build(&spec.task_type)?;
        task.set_title(&spec.title);
        task.set_input(&spec.input);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qa_registry() -> TaskRegistry {
        TaskRegistry::new().with_type("qa", Arc::new(|| Task::new("qa", "plain text answer")))
    }

    #[test]
    fn test_build_from_spec_configures_the_task() {
        let registry = qa_registry();
        let spec = SubTaskSpec {
            task_type: "qa".to_string(),
            title: "first".to_string(),
            input: "What is 2+2?".to_string(),
        };
        let task = registry.build_from_spec(&spec).expect("build");
        assert_eq!(task.task_type(), "qa");
        assert_eq!(task.title(), "first");
        assert_eq!(task.input(), "What is 2+2?");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let registry = qa_registry();
        assert!(matches!(
            registry.build("report"),
            Err(SchedulerError::UnknownTaskType(name)) if name == "report"
        ));
    }
}
