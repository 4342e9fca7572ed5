//! Runnable task metadata and the registry that holds it.
//!
//! Tasks are registered explicitly at definition time: `register` stores a
//! descriptor keyed by the task's qualified name, `lookup` retrieves it when
//! a button is pressed. Descriptors are immutable once registered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::params::ParameterSpec;

/// What a task is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Executed when the operator presses the task's button.
    Button,
    /// Executed periodically in the background.
    Recurring,
}

/// Where the return value of a task lands inside the kernel's namespace, so
/// later submissions can read it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCapture {
    /// Bind the result to a single name.
    Single(String),
    /// Unpack a tuple result positionally into several names.
    Unpack(Vec<String>),
}

impl Default for ResponseCapture {
    fn default() -> Self {
        ResponseCapture::Single("response".to_string())
    }
}

/// Metadata for one runnable task. Created once at registration time and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    /// Unqualified function name inside `module`.
    pub name: String,
    /// Module that defines the function; imported by the generated snippet.
    pub module: String,
    /// Button label; falls back to `name`.
    pub display_name: Option<String>,
    /// Short description, used as a tooltip.
    pub description: Option<String>,
    /// Run the moment the button is pressed, skipping the argument form.
    pub immediate_run: bool,
    /// Permit interrupting the kernel before running this task.
    pub allow_kernel_interrupt: bool,
    /// Substrings expected in input prompts this task raises; prompts that
    /// match none of them are reported loudly (but still answered).
    pub input_patterns: Option<Vec<String>>,
    pub capture: ResponseCapture,
    pub parameters: Vec<ParameterSpec>,
    /// Line in the defining module, for stable ordering in menus.
    pub source_line: u32,
}

impl TaskDescriptor {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        TaskDescriptor {
            kind: TaskKind::Button,
            name: name.into(),
            module: module.into(),
            display_name: None,
            description: None,
            immediate_run: false,
            allow_kernel_interrupt: false,
            input_patterns: None,
            capture: ResponseCapture::default(),
            parameters: Vec::new(),
            source_line: 0,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Registry of runnable tasks, keyed by qualified name.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDescriptor>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Register a task. Re-registering the same qualified name replaces the
    /// previous descriptor and returns it.
    pub fn register(&mut self, task: TaskDescriptor) -> Option<TaskDescriptor> {
        self.tasks.insert(task.qualified_name(), task)
    }

    pub fn lookup(&self, qualified_name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(qualified_name)
    }

    /// Button tasks in menu order: by module, then by source line.
    pub fn buttons(&self) -> Vec<&TaskDescriptor> {
        self.in_order(TaskKind::Button)
    }

    /// Recurring tasks in the same stable order.
    pub fn recurring(&self) -> Vec<&TaskDescriptor> {
        self.in_order(TaskKind::Recurring)
    }

    fn in_order(&self, kind: TaskKind) -> Vec<&TaskDescriptor> {
        let mut tasks: Vec<&TaskDescriptor> =
            self.tasks.values().filter(|t| t.kind == kind).collect();
        tasks.sort_by(|a, b| {
            (&a.module, a.source_line, &a.name).cmp(&(&b.module, b.source_line, &b.name))
        });
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
