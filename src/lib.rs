//! A small interactive shell.
//!
//! A line is split into at most two pipeline stages, each stage's program is
//! looked up on `PATH`, and the stages are started as child processes with
//! their pipes and `<` / `>` redirections wired up. A trailing `&` leaves the
//! final stage running in the background. `cd`, `pwd` and `exit` run inside
//! the interpreter itself.
//!
//! The main entry point is [`Interpreter`]. The [`parser`] and
//! [`orchestrator`] modules expose the line-in/stages-out and
//! stages-in/outcome-out halves separately.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod interpreter;
pub mod orchestrator;
pub mod parser;
pub mod redirect;
pub mod resolve;

pub use builtin::{RESERVED as BUILTINS, is_builtin};
pub use command::{ExitCode, Flow};
pub use config::{MAX_STAGES, ShellArgs, ShellConfig};
pub use error::{ShellError, StageError, SyntaxError};
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::{Interpreter, LineOutcome, report};
