//! Command modeling: argv templates, working directory, stdin and environment.

use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::env::Env;
use crate::error::{ProcError, Result};
use crate::sink::BoxReader;

/// Where a process reads its stdin from.
#[derive(Default)]
pub enum Input {
    #[default]
    Null,
    Inherit,
    Bytes(Vec<u8>),
    Reader(BoxReader),
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Null => f.write_str("Null"),
            Input::Inherit => f.write_str("Inherit"),
            Input::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Input::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self { Input::Bytes(s.as_bytes().to_vec()) }
}

impl From<String> for Input {
    fn from(s: String) -> Self { Input::Bytes(s.into_bytes()) }
}

impl From<Vec<u8>> for Input {
    fn from(b: Vec<u8>) -> Self { Input::Bytes(b) }
}

impl Input {
    pub fn reader(r: impl tokio::io::AsyncRead + Send + Unpin + 'static) -> Self { Input::Reader(Box::new(r)) }

    /// A copy to hand to another process: bytes are cloned, a reader moves.
    pub fn share(&mut self) -> Input {
        match self {
            Input::Null => Input::Null,
            Input::Inherit => Input::Inherit,
            Input::Bytes(b) => Input::Bytes(b.clone()),
            Input::Reader(_) => std::mem::take(self),
        }
    }

    /// Stdio for the child plus the source a pump task must copy in, if any.
    /// Bytes are copied so the input can be replayed; a reader is taken.
    pub(crate) fn take_source(&mut self) -> (Stdio, Option<BoxReader>) {
        match self {
            Input::Null => (Stdio::null(), None),
            Input::Inherit => (Stdio::inherit(), None),
            Input::Bytes(b) => (Stdio::piped(), Some(Box::new(Cursor::new(b.clone())))),
            Input::Reader(_) => match std::mem::take(self) {
                Input::Reader(r) => (Stdio::piped(), Some(r)),
                _ => (Stdio::null(), None),
            },
        }
    }
}

/// An external command. Every argument and env value is a template
/// expanded through [`Cmd::env`] right before the process starts.
#[derive(Debug)]
pub struct Cmd {
    pub args: Vec<String>,
    pub stdin: Input,
    pub dir: PathBuf,
    pub env: Env,
}

/// A spawnable command plus the literal argv it will run.
#[derive(Debug)]
pub struct Prepared {
    pub command: Command,
    pub args: Vec<String>,
}

impl Cmd {
    /// Runs in `.` with an empty environment and no stdin.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![program.into()];
        all.extend(args.into_iter().map(Into::into));
        Cmd { args: all, stdin: Input::Null, dir: PathBuf::from("."), env: Env::new() }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self { self.args.push(a.into()); self }
    pub fn dir(mut self, d: impl Into<PathBuf>) -> Self { self.dir = d.into(); self }
    pub fn stdin(mut self, i: impl Into<Input>) -> Self { self.stdin = i.into(); self }
    pub fn var(mut self, k: impl Into<String>, v: impl Into<String>) -> Self { self.env.set(k, v); self }

    pub fn program(&self) -> &str { self.args.first().map(String::as_str).unwrap_or("") }

    /// The argv that would run right now, after expansion.
    pub fn expanded_args(&self) -> Result<Vec<String>> {
        if self.args.is_empty() { return Err(ProcError::EmptyCommand); }
        Ok(self.env.expand_strings(&self.args))
    }

    /// Environment handed to the child, values expanded.
    pub fn expanded_env(&self) -> Env {
        self.env.iter().map(|(k, v)| (k.to_string(), self.env.expand(v))).collect()
    }

    /// Expand argv and env and build the process. Stdio is left unset.
    pub fn prepare(&self) -> Result<Prepared> {
        let args = self.expanded_args()?;
        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .current_dir(&self.dir)
            .env_clear()
            .envs(self.expanded_env().iter())
            .kill_on_drop(true);
        Ok(Prepared { command, args })
    }

    /// Prepared, unstarted process for use as a pipeline stage. The pipeline
    /// wires all three stdio streams, so [`Cmd::stdin`] is not used here.
    pub fn into_command(&self) -> Result<Command> { Ok(self.prepare()?.command) }

    /// POSIX rendering of what would run, for logs and dry runs.
    pub fn render_plan(&self) -> Result<String> {
        crate::render::PosixRenderer::default().render_cmd(&self.expanded_args()?, &self.expanded_env(), &self.dir)
    }

    /// Replace the current process image (execve). Resolves the program
    /// against the command's `PATH`, falling back to the host `PATH`, and
    /// changes to [`Cmd::dir`] first. Returns only on failure; stdin is not
    /// honored since no parent remains to feed it.
    #[cfg(all(feature = "exec", unix))]
    pub fn exec(&self) -> ProcError {
        use std::os::unix::process::CommandExt;

        let args = match self.expanded_args() {
            Ok(a) => a,
            Err(e) => return e,
        };
        let env = self.expanded_env();
        let search = env.get("PATH").map(str::to_string).or_else(|| std::env::var("PATH").ok());
        let cwd = match std::env::current_dir() {
            Ok(d) => d,
            Err(e) => return ProcError::Io(e),
        };
        let bin = match which::which_in(&args[0], search, cwd) {
            Ok(b) => b,
            Err(source) => return ProcError::Resolve { program: args[0].clone(), source },
        };
        if let Err(e) = std::env::set_current_dir(&self.dir) {
            return ProcError::Io(e);
        }
        tracing::debug!(program = %bin.display(), "exec");
        let err = std::process::Command::new(&bin)
            .arg0(&args[0])
            .args(&args[1..])
            .env_clear()
            .envs(env.iter())
            .exec();
        ProcError::Start { stage: None, program: args[0].clone(), source: err }
    }
}
