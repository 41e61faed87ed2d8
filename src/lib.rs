//! procline: run external commands, pipelines and shell scripts with
//! `$NAME` expansion and streaming output.

pub mod error;
pub mod tmpl;
pub mod env;
pub mod scan;
pub mod sink;
pub mod cmd;
pub mod render;
pub mod exec;
pub mod pipe;
pub mod script;
pub mod task;
pub mod prelude;
pub mod easy;
pub mod macros;

pub use error::{ProcError, Result};
