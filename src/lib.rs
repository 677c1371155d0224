//! A small interactive shell: pipelines, redirections and `&&` / `||` chains.
//!
//! A line goes through variable expansion ([`env`]), then the layered parser
//! ([`parser`], built on [`lexer`]), and is executed by the [`Interpreter`]:
//! the stages of a pipeline run concurrently, joined by OS pipes, while the
//! pipelines of a logical chain run one after another. Builtins run
//! in-process; everything else is spawned in its own process group so that
//! Ctrl-C can be relayed to it ([`signals`]) without stopping the shell.

mod builtin;
pub mod command;
pub mod env;
mod external;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod signals;

pub use builtin::BuiltinKind;
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
