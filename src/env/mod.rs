//! Environment store with fixed-point `$NAME` expansion.

use std::collections::BTreeMap;

use crate::tmpl::{Template, VariableResolver};

/// Pass ceiling for [`Env::expand`]; bounds reference cycles.
pub const EXPAND_MAX_PASSES: usize = 10;

/// Set of environment variables handed to a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env(BTreeMap<String, String>);

impl Env {
    pub fn new() -> Self { Env(BTreeMap::new()) }

    /// Snapshot of the hosting process environment, taken once.
    pub fn from_environ() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Build from `KEY=VALUE` strings. Entries without `=` or with an empty
    /// key are skipped; the value may itself contain `=`.
    pub fn from_slice<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Env::new();
        for e in entries {
            if let Some((k, v)) = e.as_ref().split_once('=') {
                if !k.is_empty() { env.set(k, v); }
            }
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<&str> { self.0.get(key).map(String::as_str) }

    /// Store `value` under `key`. When `key` already exists the incoming value
    /// is expanded first, so `set("PATH", "/opt/bin:$PATH")` captures the old
    /// `PATH` instead of referring to itself.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let mut value = value.into();
        if self.0.contains_key(&key) {
            value = self.expand(&value);
        }
        self.0.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> { self.0.remove(key) }

    /// Apply every entry of `other` through [`Env::set`].
    pub fn merge(&mut self, other: &Env) {
        for (k, v) in &other.0 { self.set(k.clone(), v.clone()); }
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=VALUE` strings, the format a child process environment uses.
    pub fn into_vec(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Substitute `$NAME` and `${NAME}` until the text stops changing or
    /// [`EXPAND_MAX_PASSES`] passes ran. Unknown names come back as `${NAME}`.
    pub fn expand(&self, target: &str) -> String {
        let mut cur = Template::parse(target).render(self);
        for _ in 1..EXPAND_MAX_PASSES {
            let tpl = Template::parse(&cur);
            if !tpl.vars().any(|k| self.0.contains_key(k)) { break; }
            let next = tpl.render(self);
            if next == cur { break; }
            cur = next;
        }
        cur
    }

    pub fn expand_strings<S: AsRef<str>>(&self, targets: &[S]) -> Vec<String> {
        targets.iter().map(|t| self.expand(t.as_ref())).collect()
    }
}

impl VariableResolver for Env {
    fn get(&self, key: &str) -> Option<String> { self.0.get(key).cloned() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut env = Env::new();
        env.extend(iter);
        env
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Env {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter { self.set(k, v); }
    }
}
