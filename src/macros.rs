//! Terse macros for everyday usage

/// Build an [`Env`](crate::env::Env) from `key => value` pairs. Later values
/// may reference earlier keys.
#[macro_export]
macro_rules! px_env {
    ( $( $k:expr => $v:expr ),* $(,)? ) => {{
        let mut __e = $crate::env::Env::new();
        $( __e.set($k, $v); )*
        __e
    }};
}

/// Build a [`Cmd`](crate::cmd::Cmd): `px_cmd!("grep", "-n", pat)`, optionally
/// followed by `; env: px_env!{..}`.
#[macro_export]
macro_rules! px_cmd {
    ($prog:expr $(, $arg:expr )* ; env: $env:expr ) => {{
        let mut __c = $crate::px_cmd!($prog $(, $arg )*);
        __c.env = $env;
        __c
    }};
    ($prog:expr $(, $arg:expr )* ) => {{
        $crate::cmd::Cmd::new($prog, ::std::vec::Vec::<::std::string::String>::from([ $( ::std::string::String::from($arg) ),* ]))
    }};
}

/// Build [`Tasks`](crate::task::Tasks) from `name => body` pairs, in order.
#[macro_export]
macro_rules! px_tasks {
    ( $( $name:expr => $body:expr ),* $(,)? ) => {{
        $crate::task::Tasks::new() $( .add($crate::task::Task::new($name, $body)) )*
    }};
}
