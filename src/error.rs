use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::exec::RunResult;

pub type Result<T> = std::result::Result<T, ProcError>;

#[derive(Debug, Error)]
pub enum ProcError {
    // preparation
    #[error("Empty command: no program given")]
    EmptyCommand,
    #[error("Empty pipeline: no stages given")]
    NoStages,
    #[error("Resolve error: {program}: {source}")]
    Resolve { program: String, #[source] source: which::Error },

    // launch
    #[error("Start error: {}{program}: {source}", stage_prefix(.stage))]
    Start { stage: Option<usize>, program: String, #[source] source: io::Error },

    // run
    /// Non-zero exit. `result` holds the argv that ran and whatever output
    /// was captured before the process ended.
    #[error("Exit error: {program}: {}", .result.status)]
    Exit { program: String, result: Box<RunResult> },
    #[error("Stream error: {stream}: {}: {source}", .args.first().map(String::as_str).unwrap_or(""))]
    Stream { stream: &'static str, args: Vec<String>, #[source] source: io::Error },
    #[error("Wait error: {program}: {source}")]
    Wait { program: String, #[source] source: io::Error },
    #[error("Pipeline error: {}", join_failures(.0))]
    Pipeline(Vec<StageFailure>),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProcError {
    pub fn is_cancelled(&self) -> bool { matches!(self, ProcError::Cancelled) }

    /// Partial result of a run that exited non-zero.
    pub fn run_result(&self) -> Option<&RunResult> {
        match self {
            ProcError::Exit { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Exit status, for exit errors.
    pub fn status(&self) -> Option<ExitStatus> { self.run_result().map(|r| r.status) }

    /// Index of every pipeline stage this error names.
    pub fn stages(&self) -> Vec<usize> {
        match self {
            ProcError::Start { stage: Some(i), .. } => vec![*i],
            ProcError::Pipeline(fs) => fs.iter().map(|f| f.stage).collect(),
            _ => Vec::new(),
        }
    }
}

/// One stage that did not finish cleanly.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: usize,
    pub program: String,
    pub cause: StageCause,
}

#[derive(Debug)]
pub enum StageCause {
    Exit(ExitStatus),
    Wait(io::Error),
    Copy(io::Error),
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            StageCause::Exit(s) => write!(f, "stage[{}] {}: {}", self.stage, self.program, s),
            StageCause::Wait(e) => write!(f, "stage[{}] {}: wait: {}", self.stage, self.program, e),
            StageCause::Copy(e) => write!(f, "stage[{}] {}: copy: {}", self.stage, self.program, e),
        }
    }
}

fn stage_prefix(stage: &Option<usize>) -> String {
    stage.map(|i| format!("stage[{}] ", i)).unwrap_or_default()
}

fn join_failures(fs: &[StageFailure]) -> String {
    fs.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}
