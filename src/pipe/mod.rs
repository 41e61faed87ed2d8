//! Pipelines: stdout of stage N feeds stdin of stage N+1 over an OS pipe.
//!
//! ```text
//!   stdin ─▶ stage 0 ─pipe─▶ stage 1 ─pipe─▶ ... ─▶ stage N-1 ─▶ stdout
//!               │               │                       │
//!               └───────────────┴──── stderr (shared, serialized) ──┘
//! ```

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cmd::{Cmd, Input};
use crate::error::{ProcError, Result, StageCause, StageFailure};
use crate::exec::feed_stdin;
use crate::sink::{BoxWriter, ConcurrentWriter};

struct Stage {
    program: String,
    command: Option<Command>,
    child: Option<Child>,
}

/// Copy task tied to the stage whose stream it moves.
struct CopyTask {
    stage: usize,
    handle: JoinHandle<io::Result<()>>,
}

pub struct Pipeline {
    stages: Vec<Stage>,
    /// Stdin of the first stage.
    pub stdin: Input,
    /// Stdout of the last stage; discarded when unset.
    pub stdout: Option<BoxWriter>,
    /// Stderr of every stage; discarded when unset.
    pub stderr: Option<BoxWriter>,
    tasks: Vec<CopyTask>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Stages are killed if the pipeline is dropped while they run.
    pub fn new(commands: Vec<Command>) -> Result<Self> {
        if commands.is_empty() { return Err(ProcError::NoStages); }
        let stages = commands
            .into_iter()
            .map(|mut c| {
                c.kill_on_drop(true);
                Stage {
                    program: c.as_std().get_program().to_string_lossy().into_owned(),
                    command: Some(c),
                    child: None,
                }
            })
            .collect();
        Ok(Pipeline {
            stages,
            stdin: Input::Null,
            stdout: None,
            stderr: None,
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Expand and prepare every [`Cmd`], then build the pipeline.
    pub fn from_cmds(cmds: &[Cmd]) -> Result<Self> {
        Self::new(cmds.iter().map(Cmd::into_command).collect::<Result<Vec<_>>>()?)
    }

    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Start every stage in order. If one fails to start, the stages already
    /// running are killed and reaped before the error is returned.
    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() { return Err(ProcError::Cancelled); }
        self.cancel = cancel.clone();

        let last = self.stages.len() - 1;
        let (first_stdin, mut source) = self.stdin.take_source();
        let stderr = ConcurrentWriter::new(self.stderr.take().unwrap_or_else(|| Box::new(tokio::io::sink())));
        let mut stdout = self.stdout.take();
        let mut next_stdin = Some(first_stdin);

        for i in 0..=last {
            let Some(mut command) = self.stages[i].command.take() else {
                self.rollback().await;
                return Err(ProcError::Start {
                    stage: Some(i),
                    program: self.stages[i].program.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "stage already started"),
                });
            };
            command
                .stdin(next_stdin.take().unwrap_or_else(Stdio::null))
                .stdout(if i < last || stdout.is_some() { Stdio::piped() } else { Stdio::null() })
                .stderr(Stdio::piped());

            let spawned = command.spawn();
            // drop the parent's copy of the stage's stdin pipe
            drop(command);
            let mut child = match spawned {
                Ok(c) => c,
                Err(e) => {
                    warn!(stage = i, error = %e, "start failed, rolling back");
                    self.rollback().await;
                    return Err(ProcError::Start { stage: Some(i), program: self.stages[i].program.clone(), source: e });
                }
            };
            debug!(stage = i, pid = child.id(), program = %self.stages[i].program, "started");

            if i == 0 {
                let pump = source.take().zip(child.stdin.take());
                if pump.is_some() {
                    self.tasks.push(CopyTask { stage: 0, handle: tokio::spawn(feed_stdin(pump)) });
                }
            }
            if let Some(err) = child.stderr.take() {
                let sink = stderr.clone();
                self.tasks.push(CopyTask {
                    stage: i,
                    handle: tokio::spawn(async move { sink.copy_from(err).await.map(|_| ()) }),
                });
            }
            let out = child.stdout.take();
            self.stages[i].child = Some(child);

            if i < last {
                let piped = out
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))
                    .and_then(|o| o.try_into());
                match piped {
                    Ok(stdio) => next_stdin = Some(stdio),
                    Err(e) => {
                        self.rollback().await;
                        return Err(ProcError::Start { stage: Some(i), program: self.stages[i].program.clone(), source: e });
                    }
                }
            } else if let (Some(mut out), Some(mut w)) = (out, stdout.take()) {
                self.tasks.push(CopyTask {
                    stage: i,
                    handle: tokio::spawn(async move {
                        use tokio::io::AsyncWriteExt;
                        tokio::io::copy(&mut out, &mut w).await?;
                        w.flush().await
                    }),
                });
            }
        }
        Ok(())
    }

    /// Wait on every stage, even after one failed, and report every failure
    /// together. Cancelling the token given to [`Pipeline::start`] kills and
    /// reaps all stages and returns [`ProcError::Cancelled`].
    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub async fn wait(&mut self) -> Result<()> {
        if self.stages.iter().all(|s| s.child.is_none()) {
            return Err(ProcError::Io(io::Error::new(io::ErrorKind::Other, "pipeline not started")));
        }
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            r = wait_stages(&mut self.stages, &mut self.tasks) => Some(r),
        };
        match outcome {
            Some(failures) if failures.is_empty() => Ok(()),
            Some(failures) => Err(ProcError::Pipeline(failures)),
            None => {
                warn!("cancelled, killing every stage");
                self.rollback().await;
                Err(ProcError::Cancelled)
            }
        }
    }

    /// Start then wait.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.start(cancel).await?;
        self.wait().await
    }

    /// Kill and reap every started stage, abort copy tasks.
    async fn rollback(&mut self) {
        for (i, s) in self.stages.iter_mut().enumerate() {
            if let Some(mut child) = s.child.take() {
                if let Err(e) = child.kill().await {
                    warn!(stage = i, error = %e, "kill failed");
                }
            }
        }
        for t in self.tasks.drain(..) { t.handle.abort(); }
    }
}

async fn wait_stages(stages: &mut [Stage], tasks: &mut Vec<CopyTask>) -> Vec<StageFailure> {
    let mut failures = Vec::new();
    for (i, s) in stages.iter_mut().enumerate() {
        let Some(child) = s.child.as_mut() else { continue };
        let cause = match child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => Some(StageCause::Exit(status)),
            Err(e) => Some(StageCause::Wait(e)),
        };
        debug!(stage = i, failed = cause.is_some(), "stage finished");
        s.child = None;
        if let Some(cause) = cause {
            failures.push(StageFailure { stage: i, program: s.program.clone(), cause });
        }
    }
    for t in tasks.drain(..) {
        let res = match t.handle.await {
            Ok(r) => r,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        };
        if let Err(e) = res {
            failures.push(StageFailure { stage: t.stage, program: stages[t.stage].program.clone(), cause: StageCause::Copy(e) });
        }
    }
    failures
}
