use crate::command::Flow;
use crate::env::Environment;
use crate::error::BuiltinError;
use crate::parser::StageDescriptor;
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;

/// Command names handled inside the interpreter instead of a child process.
pub const RESERVED: [&str; 3] = ["cd", "pwd", "exit"];

pub fn is_builtin(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "pwd" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<Flow>;

    /// Flow used instead of reporting argh's output when argument parsing
    /// stops early (`--help`, unknown flags).
    fn on_early_exit() -> Option<Flow> {
        None
    }
}

/// Run `stage` in the interpreter's own process if it names a built-in.
///
/// Returns `None` without side effects for any other command. Errors are
/// written to `stderr` and become `Flow::Continue(1)`.
pub fn dispatch(
    stage: &StageDescriptor,
    env: &mut Environment,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Option<Flow> {
    let args: Vec<&str> = stage.arguments().iter().map(String::as_str).collect();
    let flow = match stage.command.as_str() {
        "cd" => run::<Cd>(&args, stdin, stdout, stderr, env),
        "pwd" => run::<Pwd>(&args, stdin, stdout, stderr, env),
        "exit" => run::<Exit>(&args, stdin, stdout, stderr, env),
        _ => return None,
    };
    tracing::debug!(command = %stage.command, ?flow, "ran builtin");
    Some(flow)
}

fn run<T: BuiltinCommand>(
    args: &[&str],
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    env: &mut Environment,
) -> Flow {
    let cmd = match T::from_args(&[T::name()], args) {
        Ok(cmd) => cmd,
        Err(EarlyExit { output, status }) => {
            if let Some(flow) = T::on_early_exit() {
                return flow;
            }
            // --help goes to stdout, usage errors to stderr
            let code = match status {
                Ok(()) => {
                    let _ = writeln!(stdout, "{}", output.trim_end());
                    0
                }
                Err(()) => {
                    let _ = writeln!(stderr, "{}", output.trim_end());
                    1
                }
            };
            return Flow::Continue(code);
        }
    };
    match cmd.execute(stdin, stdout, env) {
        Ok(flow) => flow,
        Err(e) => {
            let _ = writeln!(stderr, "{}", e);
            Flow::Continue(1)
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<Flow> {
        writeln!(stdout, "{}", env.current_dir.to_string_lossy())?;
        stdout.flush()?;
        Ok(Flow::Continue(0))
    }
}

#[derive(FromArgs)]
/// Change the current working directory of the shell.
/// Without a target, or with `~`, changes to $HOME.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<Flow> {
        let (shown, target) = match self.target.as_deref() {
            None | Some("~") => {
                let home = env.home_dir().ok_or(BuiltinError::NoHome)?;
                (home.to_string_lossy().into_owned(), home)
            }
            Some("/") => ("/".to_string(), PathBuf::from("/")),
            Some(t) => (t.to_string(), env.resolve_path(t)),
        };

        let metadata = fs::metadata(&target).map_err(|e| cd_error(&shown, e))?;
        if !metadata.is_dir() {
            return Err(BuiltinError::NotADirectory(shown).into());
        }
        let canonical = fs::canonicalize(&target).map_err(|e| cd_error(&shown, e))?;
        env::set_current_dir(&canonical).map_err(|e| cd_error(&shown, e))?;
        env.current_dir = canonical;
        Ok(Flow::Continue(0))
    }
}

fn cd_error(target: &str, source: io::Error) -> BuiltinError {
    match source.kind() {
        ErrorKind::NotFound => BuiltinError::NoSuchDirectory(target.to_string()),
        ErrorKind::PermissionDenied => BuiltinError::PermissionDenied(target.to_string()),
        ErrorKind::NotADirectory => BuiltinError::NotADirectory(target.to_string()),
        _ => BuiltinError::Other {
            target: target.to_string(),
            source,
        },
    }
}

#[derive(FromArgs)]
/// Exit the shell with status 0.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<Flow> {
        Ok(Flow::Exit(0))
    }

    // `exit -1` or `exit --help` still leave the shell
    fn on_early_exit() -> Option<Flow> {
        Some(Flow::Exit(0))
    }
}
