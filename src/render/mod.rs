//! POSIX rendering: dry-run command lines and script text helpers.

use std::path::Path;

use crate::env::Env;
use crate::error::{ProcError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub enum QuotePolicy {
    /// Quote every argument.
    #[default]
    Strict,
    /// Leave simple words bare.
    Loose,
}

#[derive(Debug, Clone, Default)]
pub struct PosixRenderer { pub quote: QuotePolicy }

impl PosixRenderer {
    /// `cd 'dir' && K='v' prog 'arg'...`; the `cd` is omitted for `.`.
    pub fn render_cmd(&self, args: &[String], env: &Env, dir: &Path) -> Result<String> {
        let Some((program, rest)) = args.split_first() else { return Err(ProcError::EmptyCommand) };
        if program.is_empty() { return Err(ProcError::EmptyCommand); }

        let mut parts: Vec<String> = Vec::new();
        for (k, v) in env.iter() {
            parts.push(format!("{}={}", k, quote_sh(v)));
        }
        parts.push(quote_prog(program));
        for a in rest {
            parts.push(self.quote_arg(a));
        }
        let mut cmd_str = parts.join(" ");

        if dir != Path::new(".") {
            cmd_str = format!("cd {} && {}", quote_sh(&dir.to_string_lossy()), cmd_str);
        }
        Ok(cmd_str)
    }

    pub fn render_pipe(&self, stages: &[(Vec<String>, Env, &Path)]) -> Result<String> {
        let mut parts = Vec::new();
        for (args, env, dir) in stages { parts.push(self.render_cmd(args, env, dir)?); }
        Ok(parts.join(" | "))
    }

    fn quote_arg(&self, a: &str) -> String {
        match self.quote {
            QuotePolicy::Strict => quote_sh(a),
            QuotePolicy::Loose => quote_prog(a),
        }
    }
}

fn quote_prog(p: &str) -> String {
    if is_simple_word(p) { p.to_string() } else { quote_sh(p) }
}

fn is_simple_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| matches!(c,
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' | '/' | ':' | '+' | '%' | '@' | '=' | ','))
}

pub fn quote_sh(s: &str) -> String {
    if s.is_empty() { return "''".to_string(); }
    let escaped = s.replace('\'', "'\"'\"'");
    format!("'{}'", escaped)
}

/// Backslash every double quote, for `K="v"` lines.
pub fn escape_quote(s: &str) -> String { s.replace('"', "\\\"") }

/// Prefix every non-blank line with `n` spaces; line endings are kept.
pub fn indent(s: &str, n: usize) -> String {
    let prefix = " ".repeat(n);
    let mut out = String::with_capacity(s.len());
    for line in s.split_inclusive('\n') {
        if !matches!(line, "\n" | "\r\n" | "\r") { out.push_str(&prefix); }
        out.push_str(line);
    }
    out
}
