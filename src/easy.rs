//! Easy mode helpers: one-shot runs against a snapshot of the host environment.

use tokio_util::sync::CancellationToken;

use crate::cmd::Cmd;
use crate::env::Env;
use crate::error::Result;
use crate::exec::{RunOptions, RunResult};
use crate::pipe::Pipeline;
use crate::script::Script;
use crate::sink::SharedBuffer;

/// A [`Cmd`] carrying the current process environment.
pub fn host_cmd<I, S>(program: impl Into<String>, args: I) -> Cmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut c = Cmd::new(program, args);
    c.env = Env::from_environ();
    c
}

/// Run to completion with the host environment, capturing output.
pub async fn run<I, S>(program: impl Into<String>, args: I) -> Result<RunResult>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    host_cmd(program, args).run(&CancellationToken::new(), RunOptions::default()).await
}

/// Run `content` with `sh`; `$NAME` references resolve against the host
/// environment before the shell sees them.
pub async fn sh(content: &str) -> Result<RunResult> {
    let mut s = Script::new(content, "sh", Vec::<String>::new());
    s.env = Env::from_environ();
    s.run(&CancellationToken::new(), RunOptions::default()).await
}

/// Run `cmds` as a pipeline with no stdin and return the last stage's stdout.
pub async fn pipe(cmds: &[Cmd]) -> Result<String> {
    let out = SharedBuffer::new();
    let mut p = Pipeline::from_cmds(cmds)?;
    p.stdout = Some(out.boxed());
    p.run(&CancellationToken::new()).await?;
    Ok(out.to_string_lossy())
}
