//! Running a single [`Cmd`]: captured or streamed output, with cancellation.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cmd::{Cmd, Prepared};
use crate::error::{ProcError, Result};
use crate::scan::{BoxSplitter, Lines, Scanner, SinkMode, Splitter, Token, TokenConsumer};
use crate::sink::{BoxReader, BoxWriter, Capture};

type BoxConsumer<'a> = Box<dyn FnMut(&Token<'_>) + Send + 'a>;

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The argv that actually ran, after expansion.
    pub expanded_args: Vec<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
}

impl RunResult {
    pub fn stdout_str(&self) -> String { String::from_utf8_lossy(&self.stdout).into_owned() }
    pub fn stderr_str(&self) -> String { String::from_utf8_lossy(&self.stderr).into_owned() }
}

/// Run-time flags. Setting either consumer switches the run to streaming.
#[derive(Default)]
pub struct RunOptions<'a> {
    stdout_consumer: Option<BoxConsumer<'a>>,
    stderr_consumer: Option<BoxConsumer<'a>>,
    splitters: Option<(BoxSplitter, BoxSplitter)>,
    separator: Option<Vec<u8>>,
    stdout_writer: Option<BoxWriter>,
    stderr_writer: Option<BoxWriter>,
    skip_stdout: bool,
    skip_stderr: bool,
}

impl<'a> RunOptions<'a> {
    pub fn new() -> Self { Self::default() }

    /// Keep stdout in [`RunResult::stdout`]. On by default; turn it off for
    /// long streamed runs so output is not held in memory. Writers and
    /// consumers still see everything.
    pub fn capture_stdout(mut self, on: bool) -> Self { self.skip_stdout = !on; self }

    /// Same as [`RunOptions::capture_stdout`], for stderr.
    pub fn capture_stderr(mut self, on: bool) -> Self { self.skip_stderr = !on; self }

    pub fn stdout_consumer(mut self, mut c: impl TokenConsumer + Send + 'a) -> Self {
        self.stdout_consumer = Some(Box::new(move |t: &Token<'_>| c.accept(t)));
        self
    }

    pub fn stderr_consumer(mut self, mut c: impl TokenConsumer + Send + 'a) -> Self {
        self.stderr_consumer = Some(Box::new(move |t: &Token<'_>| c.accept(t)));
        self
    }

    /// Token rule for both streams; [`Lines`] by default.
    pub fn splitter<S: Splitter + Clone + Send + 'static>(mut self, s: S) -> Self {
        self.splitters = Some((BoxSplitter(Box::new(s.clone())), BoxSplitter(Box::new(s))));
        self
    }

    /// In streaming mode, captured and written output becomes the tokens
    /// joined by `sep` instead of the raw bytes. Ignored unless a consumer is
    /// set.
    pub fn separator(mut self, sep: impl Into<Vec<u8>>) -> Self { self.separator = Some(sep.into()); self }

    /// Extra sink receiving stdout as it is produced.
    pub fn stdout_writer(mut self, w: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout_writer = Some(Box::new(w));
        self
    }

    pub fn stderr_writer(mut self, w: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr_writer = Some(Box::new(w));
        self
    }

    pub fn is_streaming(&self) -> bool { self.stdout_consumer.is_some() || self.stderr_consumer.is_some() }
}

impl Cmd {
    /// Run to completion.
    ///
    /// Output is captured into the result unless turned off in `opts`;
    /// writers set there also receive it live. With a consumer set, stdout and stderr are scanned
    /// concurrently and tokens delivered as they arrive. A non-zero exit is
    /// [`ProcError::Exit`] carrying the partial result, a read fault [`ProcError::Stream`], and a
    /// cancelled token kills the process and yields [`ProcError::Cancelled`].
    #[instrument(skip_all, fields(program = %self.program()))]
    pub async fn run(&mut self, cancel: &CancellationToken, opts: RunOptions<'_>) -> Result<RunResult> {
        if cancel.is_cancelled() { return Err(ProcError::Cancelled); }

        let Prepared { mut command, args } = self.prepare()?;
        let (stdin, source) = self.stdin.take_source();
        command.stdin(stdin).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ProcError::Start {
            stage: None,
            program: args[0].clone(),
            source,
        })?;
        debug!(pid = child.id(), args = ?args, "spawned");

        let pump = source.zip(child.stdin.take());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            r = drive(&mut child, &args, pump, stdout, stderr, opts) => Some(r),
        };
        let (out, err, status) = match outcome {
            None => {
                warn!("cancelled, killing process");
                let _ = child.kill().await;
                return Err(ProcError::Cancelled);
            }
            Some(Err(e)) => {
                warn!(error = %e, "output stream failed, killing process");
                let _ = child.kill().await;
                return Err(e);
            }
            Some(Ok(r)) => r,
        };

        debug!(%status, "exited");
        if !status.success() {
            let program = args[0].clone();
            let result = RunResult { expanded_args: args, stdout: out, stderr: err, status };
            return Err(ProcError::Exit { program, result: Box::new(result) });
        }
        Ok(RunResult { expanded_args: args, stdout: out, stderr: err, status })
    }
}

/// Feed stdin, drain both pipes, then reap. Streams finish before the wait.
async fn drive(
    child: &mut Child,
    args: &[String],
    pump: Option<(BoxReader, ChildStdin)>,
    stdout: Option<impl AsyncRead + Unpin>,
    stderr: Option<impl AsyncRead + Unpin>,
    opts: RunOptions<'_>,
) -> Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let streaming = opts.is_streaming();
    let RunOptions {
        stdout_consumer,
        stderr_consumer,
        splitters,
        separator,
        stdout_writer,
        stderr_writer,
        skip_stdout,
        skip_stderr,
    } = opts;
    let out_sink = Capture::new(stdout_writer).keep(!skip_stdout);
    let err_sink = Capture::new(stderr_writer).keep(!skip_stderr);

    let (out, err, fed) = if streaming {
        let mode = separator.map(SinkMode::Join).unwrap_or_default();
        let (out_split, err_split) = splitters
            .unwrap_or_else(|| (BoxSplitter(Box::new(Lines)), BoxSplitter(Box::new(Lines))));
        let out_consumer = stdout_consumer.unwrap_or_else(|| Box::new(|_: &Token<'_>| {}) as BoxConsumer<'_>);
        let err_consumer = stderr_consumer.unwrap_or_else(|| Box::new(|_: &Token<'_>| {}) as BoxConsumer<'_>);
        tokio::join!(
            scan_stream(out_sink, stdout, out_split, out_consumer, mode.clone()),
            scan_stream(err_sink, stderr, err_split, err_consumer, mode),
            feed_stdin(pump),
        )
    } else {
        tokio::join!(copy_stream(out_sink, stdout), copy_stream(err_sink, stderr), feed_stdin(pump))
    };
    let stream_err = |stream: &'static str, source: io::Error| ProcError::Stream { stream, args: args.to_vec(), source };
    let out = out.map_err(|e| stream_err("stdout", e))?;
    let err = err.map_err(|e| stream_err("stderr", e))?;
    fed.map_err(|e| stream_err("stdin", e))?;

    let status = child.wait().await.map_err(|source| ProcError::Wait { program: args[0].clone(), source })?;
    Ok((out, err, status))
}

async fn scan_stream<S: Splitter, C: TokenConsumer>(
    sink: Capture,
    source: Option<impl AsyncRead + Unpin>,
    splitter: S,
    consumer: C,
    mode: SinkMode,
) -> io::Result<Vec<u8>> {
    let Some(source) = source else { return Ok(Vec::new()) };
    let sink = Scanner::new(sink, source, splitter, consumer).with_mode(mode).scan().await?;
    Ok(sink.into_bytes())
}

async fn copy_stream(mut sink: Capture, source: Option<impl AsyncRead + Unpin>) -> io::Result<Vec<u8>> {
    let Some(mut source) = source else { return Ok(Vec::new()) };
    tokio::io::copy(&mut source, &mut sink).await?;
    sink.flush().await?;
    Ok(sink.into_bytes())
}

/// Copy the input into the child and close its stdin. A child that exits
/// without reading everything is not an error.
pub(crate) async fn feed_stdin(pump: Option<(BoxReader, ChildStdin)>) -> io::Result<()> {
    let Some((mut src, mut dst)) = pump else { return Ok(()) };
    match tokio::io::copy(&mut src, &mut dst).await {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
        Ok(_) => match dst.shutdown().await {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            r => r,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::scan::{Split, Words};
    use crate::sink::SharedBuffer;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Cmd { Cmd::new("sh", ["-c", script]) }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let got = Cmd::new("echo", ["me"]).run(&CancellationToken::new(), RunOptions::new()).await.unwrap();
        assert_eq!(got.expanded_args, vec!["echo", "me"]);
        assert_eq!(got.stdout_str(), "me\n");
        assert_eq!(got.stderr_str(), "");
        assert!(got.status.success());
    }

    #[tokio::test]
    async fn cat_reads_stdin() {
        let got = Cmd::new("cat", ["-"]).stdin("from stdin").run(&CancellationToken::new(), RunOptions::new()).await.unwrap();
        assert_eq!(got.stdout_str(), "from stdin");
    }

    #[tokio::test]
    async fn args_are_expanded_and_reported() {
        let got = Cmd::new("echo", ["i${nternationalizatio}n"])
            .var("nternationalizatio", "18")
            .run(&CancellationToken::new(), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(got.expanded_args, vec!["echo", "i18n"]);
        assert_eq!(got.stdout_str(), "i18n\n");
    }

    #[tokio::test]
    async fn set_over_snapshot_appends() {
        let mut c = Cmd::new("echo", ["${PROCLINE_APPEND}"]);
        c.env.merge(&Env::from_slice(["PROCLINE_APPEND=append1"]));
        c.env.set("PROCLINE_APPEND", "added:${PROCLINE_APPEND}");
        let got = c.run(&CancellationToken::new(), RunOptions::new()).await.unwrap();
        assert_eq!(got.stdout_str(), "added:append1\n");
    }

    #[tokio::test]
    async fn child_sees_only_its_env() {
        let got = Cmd::new("/usr/bin/env", Vec::<String>::new())
            .var("MY_TEST_VAR", "test_value")
            .run(&CancellationToken::new(), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(got.stdout_str(), "MY_TEST_VAR=test_value\n");
    }

    #[tokio::test]
    async fn missing_program_is_a_start_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Cmd::new(dir.path().join("unknown_cmd").to_string_lossy(), Vec::<String>::new());
        let err = c.run(&CancellationToken::new(), RunOptions::new()).await.unwrap_err();
        assert!(matches!(err, ProcError::Start { stage: None, .. }), "{}", err);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_exit_error() {
        let err = sh("echo partial; echo oops >&2; exit 3").run(&CancellationToken::new(), RunOptions::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Exit error: sh: exit status: 3");
        match &err {
            ProcError::Exit { program, result } => {
                assert_eq!(program, "sh");
                assert_eq!(result.status.code(), Some(3));
                assert_eq!(result.expanded_args, vec!["sh", "-c", "echo partial; echo oops >&2; exit 3"]);
                assert_eq!(result.stdout_str(), "partial\n");
                assert_eq!(result.stderr_str(), "oops\n");
            }
            e => panic!("unexpected {}", e),
        }
        assert_eq!(err.status().and_then(|s| s.code()), Some(3));
        assert!(err.run_result().is_some());
    }

    #[tokio::test]
    async fn writer_fault_is_a_stream_error() {
        use crate::sink::Broken;
        let err = Cmd::new("echo", ["$WHO"])
            .var("WHO", "me")
            .run(&CancellationToken::new(), RunOptions::new().stdout_writer(Broken))
            .await
            .unwrap_err();
        match err {
            ProcError::Stream { stream, args, .. } => {
                assert_eq!(stream, "stdout");
                assert_eq!(args, vec!["echo", "me"]);
            }
            e => panic!("unexpected {}", e),
        }
    }

    #[tokio::test]
    async fn streaming_without_capture() {
        let mut lines = Vec::new();
        let live = SharedBuffer::new();
        let got = sh("echo a; echo b; echo c >&2")
            .run(
                &CancellationToken::new(),
                RunOptions::new()
                    .capture_stdout(false)
                    .capture_stderr(false)
                    .stdout_writer(live.clone())
                    .stdout_consumer(|t: &Token<'_>| lines.push(t.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(live.to_string_lossy(), "a\nb\n");
        assert!(got.stdout.is_empty());
        assert!(got.stderr.is_empty());
    }

    #[tokio::test]
    async fn capture_off_for_one_stream() {
        let got = sh("echo out; echo err >&2")
            .run(&CancellationToken::new(), RunOptions::new().capture_stderr(false))
            .await
            .unwrap();
        assert_eq!(got.stdout_str(), "out\n");
        assert!(got.stderr.is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Cmd::new("sleep", ["1"]).run(&cancel, RunOptions::new()).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_kills_running_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = Cmd::new("sleep", ["10"]).run(&cancel, RunOptions::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn consumer_gets_lines() {
        let mut lines = Vec::new();
        let got = Cmd::new("cat", ["-"])
            .stdin("line1\nline2\n")
            .run(&CancellationToken::new(), RunOptions::new().stdout_consumer(|t: &Token<'_>| lines.push(t.to_string())))
            .await
            .unwrap();
        assert_eq!(lines, vec!["line1", "line2"]);
        assert_eq!(got.stdout_str(), "line1\nline2\n");
    }

    #[tokio::test]
    async fn consumer_with_separator_joins_capture() {
        let mut lines = Vec::new();
        let got = Cmd::new("cat", ["-"])
            .stdin("line1\nline2")
            .run(
                &CancellationToken::new(),
                RunOptions::new().separator(",").stdout_consumer(|t: &Token<'_>| lines.push(t.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(lines, vec!["line1", "line2"]);
        assert_eq!(got.stdout_str(), "line1,line2");
    }

    #[tokio::test]
    async fn words_on_both_streams() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let got = sh("cat -; echo err1 1 >&2; echo err2 2 >&2")
            .stdin("line1 1\nline2 2\n")
            .run(
                &CancellationToken::new(),
                RunOptions::new()
                    .splitter(Words)
                    .separator(" ")
                    .stdout_consumer(|t: &Token<'_>| out.push(t.to_string()))
                    .stderr_consumer(|t: &Token<'_>| err.push(t.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(out, vec!["line1", "1", "line2", "2"]);
        assert_eq!(err, vec!["err1", "1", "err2", "2"]);
        assert_eq!(got.stdout_str(), "line1 1 line2 2");
        assert_eq!(got.stderr_str(), "err1 1 err2 2");
    }

    #[tokio::test]
    async fn early_stop_splitter() {
        let split = |data: &[u8], at_eof: bool| match data.iter().position(|&b| b == b',') {
            None if at_eof && !data.is_empty() => Split::Final { advance: data.len(), token: Some(0..data.len()) },
            None => Split::NeedMore,
            Some(i) if &data[..i] == b"die" => Split::Final { advance: i + 1, token: None },
            Some(i) => Split::Token { advance: i + 1, token: 0..i },
        };
        let mut lines = Vec::new();
        let got = Cmd::new("cat", ["-"])
            .stdin("1,2,die,4")
            .run(
                &CancellationToken::new(),
                RunOptions::new()
                    .splitter(split)
                    .separator(",")
                    .stdout_consumer(|t: &Token<'_>| lines.push(t.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(lines, vec!["1", "2"]);
        assert_eq!(got.stdout_str(), "1,2");
    }

    #[tokio::test]
    async fn writers_receive_live_copy() {
        let (out, err) = (SharedBuffer::new(), SharedBuffer::new());
        let mut seen = 0;
        let got = sh("cat -; echo err1 >&2")
            .stdin("a\nb\n")
            .run(
                &CancellationToken::new(),
                RunOptions::new()
                    .stdout_writer(out.clone())
                    .stderr_writer(err.clone())
                    .stderr_consumer(|_: &Token<'_>| seen += 1),
            )
            .await
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(out.to_string_lossy(), "a\nb\n");
        assert_eq!(err.to_string_lossy(), "err1\n");
        assert_eq!(got.stdout, out.contents());
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let got = sh("i=0; while [ $i -lt 20000 ]; do echo line$i; echo err$i >&2; i=$((i+1)); done")
            .run(&CancellationToken::new(), RunOptions::new())
            .await
            .unwrap();
        assert_eq!(got.stdout_str().lines().count(), 20000);
        assert_eq!(got.stderr_str().lines().count(), 20000);
    }
}
