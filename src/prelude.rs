//! procline::prelude - everything a caller usually needs

pub use crate::cmd::{Cmd, Input};
pub use crate::env::Env;
pub use crate::error::{ProcError, Result, StageFailure};
pub use crate::exec::{RunOptions, RunResult};
pub use crate::pipe::Pipeline;
pub use crate::scan::{Delimiter, Lines, SinkMode, Token, TokenConsumer, Words};
pub use crate::script::{Script, ScriptMaterializer, TempScript};
pub use crate::sink::{BoxWriter, SharedBuffer};
pub use crate::task::{ExecutableTasks, Task, Tasks};
pub use tokio_util::sync::CancellationToken;
