//! Template AST for `$NAME` / `${NAME}` references.
//!
//! Names follow the usual identifier shape (`[A-Za-z_][A-Za-z0-9_]*`).
//! Anything else after a `$` is literal text: there are no default-value
//! operators, no nested braces and no escapes.

mod parser;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template(pub Vec<Segment>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Lit(String),
    Var(String),
}

pub trait VariableResolver {
    fn get(&self, key: &str) -> Option<String>;
}

impl Template {
    /// Parse a string into literal and variable segments. Never fails: an
    /// unclosed `${` or a malformed name is kept as literal text.
    pub fn parse(input: &str) -> Self { parser::parse(input) }

    pub fn has_vars(&self) -> bool { self.0.iter().any(|s| matches!(s, Segment::Var(_))) }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|s| match s { Segment::Var(k) => Some(k.as_str()), _ => None })
    }

    /// Substitute every variable. Names the resolver does not know are
    /// written back as `${NAME}`, whatever spelling the input used.
    pub fn render<V: VariableResolver>(&self, vars: &V) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                Segment::Lit(s) => out.push_str(s),
                Segment::Var(k) => match vars.get(k) {
                    Some(v) => out.push_str(&v),
                    None => { out.push_str("${"); out.push_str(k); out.push('}'); }
                },
            }
        }
        out
    }
}
