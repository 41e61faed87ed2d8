//! Shell scripts: content is expanded, written to an executable file and run
//! as the last argument of the shell.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cmd::{Cmd, Input};
use crate::env::Env;
use crate::error::{ProcError, Result};
use crate::exec::{RunOptions, RunResult};

/// Turns script text into a file a shell can run.
pub trait ScriptMaterializer: Send + Sync {
    fn materialize(&self, content: &str) -> Result<PathBuf>;
    fn cleanup(&self, path: &Path);
}

/// Files in the system temp dir, mode `0o755`.
#[derive(Debug, Clone, Default)]
pub struct TempScript;

impl ScriptMaterializer for TempScript {
    fn materialize(&self, content: &str) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new().prefix("procline").suffix(".sh").tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file().set_permissions(std::fs::Permissions::from_mode(0o755))?;
        }
        file.into_temp_path().keep().map_err(|e| ProcError::Io(e.error))
    }

    fn cleanup(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "script cleanup failed");
            }
        }
    }
}

/// Owns a materialized script; removes it on drop unless the owning
/// [`Script`] keeps it for reuse.
pub struct ScriptFile {
    path: PathBuf,
    materializer: Arc<dyn ScriptMaterializer>,
    kept: bool,
}

impl ScriptFile {
    pub fn path(&self) -> &Path { &self.path }
}

impl fmt::Debug for ScriptFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFile").field("path", &self.path).field("kept", &self.kept).finish()
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if !self.kept { self.materializer.cleanup(&self.path); }
    }
}

pub struct Script {
    /// Interpreter argv; the script path is appended.
    pub shell: Vec<String>,
    pub content: String,
    pub stdin: Input,
    pub dir: PathBuf,
    pub env: Env,
    /// Materialize once and reuse the file; edits to `content` are ignored
    /// until [`Script::reset`].
    pub keep_script_file: bool,
    materializer: Arc<dyn ScriptMaterializer>,
    kept: Option<PathBuf>,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("shell", &self.shell)
            .field("content", &self.content)
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("keep_script_file", &self.keep_script_file)
            .finish_non_exhaustive()
    }
}

impl Script {
    pub fn new<I, S>(content: impl Into<String>, shell: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![shell.into()];
        argv.extend(args.into_iter().map(Into::into));
        Script {
            shell: argv,
            content: content.into(),
            stdin: Input::Null,
            dir: PathBuf::from("."),
            env: Env::new(),
            keep_script_file: false,
            materializer: Arc::new(TempScript),
            kept: None,
        }
    }

    pub fn with_materializer(mut self, m: impl ScriptMaterializer + 'static) -> Self {
        self.reset();
        self.materializer = Arc::new(m);
        self
    }

    /// Materialize the script and build the command that runs it. The file
    /// lives as long as the returned [`ScriptFile`].
    pub fn prepare_cmd(&mut self) -> Result<(Cmd, ScriptFile)> {
        let Some((shell, shell_args)) = self.shell.split_first() else { return Err(ProcError::EmptyCommand) };

        let keep = self.keep_script_file;
        let reuse = if keep { self.kept.clone() } else { None };
        let (path, kept) = match reuse {
            Some(p) => (p, true),
            None => {
                let path = self.materializer.materialize(&self.env.expand(&self.content))?;
                debug!(path = %path.display(), keep, "materialized script");
                if keep { self.kept = Some(path.clone()); }
                (path, keep)
            }
        };
        let file = ScriptFile { path, materializer: self.materializer.clone(), kept };

        let mut cmd = Cmd::new(shell.clone(), shell_args.iter().cloned())
            .arg(file.path.to_string_lossy())
            .dir(self.dir.clone())
            .stdin(self.stdin.share());
        cmd.env.merge(&self.env);
        Ok((cmd, file))
    }

    /// Run the script like [`Cmd::run`]. A non-kept file is removed on
    /// every way out, cancellation included.
    #[instrument(skip_all, fields(shell = ?self.shell))]
    pub async fn run(&mut self, cancel: &CancellationToken, opts: RunOptions<'_>) -> Result<RunResult> {
        let (mut cmd, _file) = self.prepare_cmd()?;
        cmd.run(cancel, opts).await
    }

    /// Drop the kept file so the next run materializes current content.
    pub fn reset(&mut self) {
        if let Some(path) = self.kept.take() {
            self.materializer.cleanup(&path);
        }
    }
}

impl Drop for Script {
    fn drop(&mut self) { self.reset(); }
}
