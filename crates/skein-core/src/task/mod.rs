//! Task composition model
//!
//! A [`Pipeline`] is an ordered list of [`Node`]s. Each node wraps an
//! [`Execution`], the pluggable unit of work:
//!
//! - [`Task`] runs its execution once and hands back the value.
//! - [`TaskBranch`] runs its execution as a selector: the returned string
//!   names one of its branch pipelines, which the runner then descends into.
//!
//! ```text
//! extract ──► route ─┬─ "full"  ──► [load, reindex]
//!                    └─ "delta" ──► [load_delta]
//! ```

mod pipeline;

pub use pipeline::{NodeSnapshot, Pipeline};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::runner::RunContext;

/// A unit of work supplied by the caller.
///
/// Implementations are stateless from the engine's point of view. Anything
/// they need from the current run (arguments, trigger config, earlier task
/// values, the shared parameter store) comes through the [`RunContext`].
#[async_trait]
pub trait Execution: Send + Sync {
    /// Execution name, reported in task records.
    fn name(&self) -> &str;

    /// Run the work. An `Err` fails the task and stops the run.
    async fn execute(&self, ctx: &RunContext) -> anyhow::Result<Value>;
}

/// Kind of pipeline node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Runs its execution once
    BaseTask,
    /// Selects a branch pipeline
    BranchTask,
}

impl TaskType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseTask => "BASE_TASK",
            Self::BranchTask => "BRANCH_TASK",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised while resolving a branch selection
#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    /// Selector returned something other than a string
    #[error("branch selector must return a string (task {task} returned {found})")]
    SelectorNotString {
        /// Branch task name
        task: String,
        /// JSON type actually returned
        found: &'static str,
    },
    /// Selector named a branch that is not declared
    #[error("task {selected} not found in branch {task}")]
    NotFound {
        /// Branch task name
        task: String,
        /// Branch name returned by the selector
        selected: String,
    },
}

/// A plain task: calls its execution and returns the value unchanged.
#[derive(Clone)]
pub struct Task {
    name: String,
    execution: Arc<dyn Execution>,
}

impl Task {
    /// Create a task from an execution
    pub fn new(name: impl Into<String>, execution: impl Execution + 'static) -> Self {
        Self::from_arc(name, Arc::new(execution))
    }

    /// Create a task from a shared execution
    pub fn from_arc(name: impl Into<String>, execution: Arc<dyn Execution>) -> Self {
        Self {
            name: name.into(),
            execution,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the wrapped execution
    pub async fn call(&self, ctx: &RunContext) -> anyhow::Result<Value> {
        self.execution.execute(ctx).await
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("execution", &self.execution.name())
            .finish()
    }
}

/// A branch task: its execution picks one named sub-pipeline.
#[derive(Clone)]
pub struct TaskBranch {
    name: String,
    execution: Arc<dyn Execution>,
    branches: HashMap<String, Pipeline>,
}

impl TaskBranch {
    /// Create a branch task with no branches declared yet
    pub fn new(name: impl Into<String>, execution: impl Execution + 'static) -> Self {
        Self {
            name: name.into(),
            execution: Arc::new(execution),
            branches: HashMap::new(),
        }
    }

    /// Declare a branch. A later declaration with the same name replaces the
    /// earlier one.
    pub fn branch(mut self, name: impl Into<String>, pipeline: Pipeline) -> Self {
        self.branches.insert(name.into(), pipeline);
        self
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared branches
    pub fn branches(&self) -> &HashMap<String, Pipeline> {
        &self.branches
    }

    /// Run the selector and resolve the chosen branch.
    ///
    /// Returns the branch name together with its pipeline; executing that
    /// pipeline is the caller's job.
    pub async fn call(&self, ctx: &RunContext) -> anyhow::Result<(String, Pipeline)> {
        let selected = self.execution.execute(ctx).await?;
        let Value::String(selected) = selected else {
            return Err(BranchError::SelectorNotString {
                task: self.name.clone(),
                found: json_type_name(&selected),
            }
            .into());
        };

        match self.branches.get(&selected) {
            Some(pipeline) => Ok((selected, pipeline.clone())),
            None => Err(BranchError::NotFound {
                task: self.name.clone(),
                selected,
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for TaskBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.branches.keys().collect();
        names.sort();
        f.debug_struct("TaskBranch")
            .field("name", &self.name)
            .field("execution", &self.execution.name())
            .field("branches", &names)
            .finish()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a node produced when called
#[derive(Debug)]
pub enum NodeOutcome {
    /// A task's value
    Value(Value),
    /// A branch selection to descend into
    Descend {
        /// Selected branch name
        branch: String,
        /// Pipeline of the selected branch
        pipeline: Pipeline,
    },
}

/// A pipeline node
#[derive(Debug, Clone)]
pub enum Node {
    /// Plain task
    Task(Task),
    /// Branch task
    Branch(TaskBranch),
}

impl Node {
    /// Node name
    pub fn name(&self) -> &str {
        match self {
            Self::Task(task) => task.name(),
            Self::Branch(branch) => branch.name(),
        }
    }

    /// Node kind
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Task(_) => TaskType::BaseTask,
            Self::Branch(_) => TaskType::BranchTask,
        }
    }

    /// Name of the wrapped execution
    pub fn execution_name(&self) -> &str {
        match self {
            Self::Task(task) => task.execution.name(),
            Self::Branch(branch) => branch.execution.name(),
        }
    }

    /// Call the node
    pub async fn call(&self, ctx: &RunContext) -> anyhow::Result<NodeOutcome> {
        match self {
            Self::Task(task) => task.call(ctx).await.map(NodeOutcome::Value),
            Self::Branch(branch) => {
                let (branch, pipeline) = branch.call(ctx).await?;
                Ok(NodeOutcome::Descend { branch, pipeline })
            }
        }
    }
}

impl From<Task> for Node {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<TaskBranch> for Node {
    fn from(branch: TaskBranch) -> Self {
        Self::Branch(branch)
    }
}
