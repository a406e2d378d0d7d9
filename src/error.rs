use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A line that cannot be turned into pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// `&` ended a segment that is followed by another pipeline stage.
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(char),
}

/// A failure confined to one pipeline stage.
///
/// The stage gets exit code 1 and the rest of the pipeline carries on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{command}: command not found")]
    NotFound { command: String },

    #[error("failed to execute {}: {source}", path.display())]
    Exec {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by `cd`. Reported and otherwise ignored.
#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("cd {0}: No such file or directory")]
    NoSuchDirectory(String),

    #[error("cd {0}: Permission denied")]
    PermissionDenied(String),

    #[error("cd {0}: Not a directory")]
    NotADirectory(String),

    #[error("cd: HOME not set")]
    NoHome,

    #[error("cd {target}: {source}")]
    Other {
        target: String,
        #[source]
        source: io::Error,
    },
}

/// Errors visible to the interpreter's own control flow.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("pipeline too long: {stages} stages given, at most {max} supported")]
    PipelineTooLong { stages: usize, max: usize },

    #[error("fork failed for {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("pipe creation failed: {0}")]
    Pipe(#[source] nix::Error),

    #[error("waiting for process {pid} failed: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("reading input failed: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),

    #[error("writing output failed: {0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// Infrastructure failures terminate the interpreter with status 1.
    /// Everything else discards the current line and the loop continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            ShellError::Syntax(_) | ShellError::PipelineTooLong { .. } => false,
            ShellError::Spawn { .. }
            | ShellError::Pipe(_)
            | ShellError::Wait { .. }
            | ShellError::Readline(_)
            | ShellError::Io(_) => true,
        }
    }
}
