//! Named shell functions assembled into a runnable script.

use std::fmt;

use crate::env::Env;
use crate::render::{escape_quote, indent};
use crate::script::Script;

/// A shell function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub script: String,
}

impl Task {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Task { name: name.into(), script: script.into() }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}() {{\n{}\n}}", self.name, indent(&self.script, 2))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tasks(pub Vec<Task>);

impl Tasks {
    pub fn new() -> Self { Self::default() }

    pub fn add(mut self, task: Task) -> Self {
        self.0.push(task);
        self
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for Tasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 { f.write_str("\n")?; }
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

/// Tasks plus the lines that call them.
///
/// `Display` is a dry run: the environment as `K="v"` lines, the functions,
/// then the entrypoint. The same text run by a shell behaves like
/// [`ExecutableTasks::into_script`].
#[derive(Debug, Clone, Default)]
pub struct ExecutableTasks {
    pub tasks: Tasks,
    pub env: Env,
    /// Shell lines run after the functions are defined, usually task calls.
    pub entrypoint: Vec<String>,
}

impl ExecutableTasks {
    pub fn new<I, S>(tasks: Tasks, env: Env, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutableTasks { tasks, env, entrypoint: entrypoint.into_iter().map(Into::into).collect() }
    }

    pub fn into_script<I, S>(self, shell: impl Into<String>, args: I) -> Script
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut script = Script::new(self.body(false), shell, args);
        script.env = self.env;
        script
    }

    fn body(&self, dry: bool) -> String {
        let mut b = String::new();
        if dry {
            for (k, v) in self.env.iter() {
                b.push_str(&format!("{}=\"{}\"\n", k, escape_quote(v)));
            }
        }
        b.push_str(&format!("{}\n", self.tasks));
        b.push_str(&self.entrypoint.join("\n"));
        b.push('\n');
        b
    }
}

impl fmt::Display for ExecutableTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.body(true)) }
}
