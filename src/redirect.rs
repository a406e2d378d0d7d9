//! Stage-level `<` / `>` handling.
//!
//! Instead of closing and reopening descriptors inside the child, the files are
//! opened up front and handed to the spawn call as its stdin/stdout.

use crate::env::Environment;
use crate::error::StageError;
use crate::parser::StageDescriptor;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::process::Stdio;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectOptions {
    /// Truncate `>` targets on open. Off by default: rewriting an existing file
    /// overwrites from the start and leaves any longer tail in place.
    pub truncate_output: bool,
}

/// Files opened for one stage's redirections.
#[derive(Debug, Default)]
pub struct Redirections {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
}

impl Redirections {
    /// Open the stage's input (read-only) and output (write, create) files.
    ///
    /// Relative paths are taken from the interpreter's working directory. Newly
    /// created output files get the platform default mode.
    pub fn open(
        stage: &StageDescriptor,
        env: &Environment,
        options: RedirectOptions,
    ) -> Result<Self, StageError> {
        let stdin = match &stage.input_path {
            Some(target) => {
                let path = env.resolve_path(target);
                let file = File::open(&path).map_err(|source| StageError::Redirect {
                    path: path.clone(),
                    source,
                })?;
                Some(file)
            }
            None => None,
        };

        let stdout = match &stage.output_path {
            Some(target) => {
                let path = env.resolve_path(target);
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(options.truncate_output)
                    .open(&path)
                    .map_err(|source| StageError::Redirect {
                        path: path.clone(),
                        source,
                    })?;
                Some(file)
            }
            None => None,
        };

        Ok(Self { stdin, stdout })
    }
}

/// Pick the stdio for one end of a stage.
///
/// Pipe wiring happens first and the file redirection is applied over it, so an
/// explicit file always wins over the pipe. A pipe end that loses is dropped
/// here, which closes it.
pub fn wire(file: Option<File>, pipe: Option<OwnedFd>) -> Stdio {
    match (file, pipe) {
        (Some(file), _) => Stdio::from(file),
        (None, Some(fd)) => Stdio::from(fd),
        (None, None) => Stdio::inherit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::io::{Read, Write};

    fn env_in(dir: &std::path::Path) -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: dir.to_path_buf(),
        }
    }

    fn stage(input: Option<&str>, output: Option<&str>) -> StageDescriptor {
        let mut stage = StageDescriptor::new(["cat"]).unwrap();
        stage.input_path = input.map(String::from);
        stage.output_path = output.map(String::from);
        stage
    }

    #[test]
    fn no_redirections_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let redirections =
            Redirections::open(&stage(None, None), &env_in(dir.path()), Default::default())
                .unwrap();
        assert!(redirections.stdin.is_none());
        assert!(redirections.stdout.is_none());
    }

    #[test]
    fn input_is_opened_relative_to_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "payload").unwrap();

        let redirections = Redirections::open(
            &stage(Some("in.txt"), None),
            &env_in(dir.path()),
            Default::default(),
        )
        .unwrap();
        let mut content = String::new();
        redirections
            .stdin
            .expect("stdin file")
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "payload");
    }

    #[test]
    fn missing_input_is_a_stage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Redirections::open(
            &stage(Some("missing.txt"), None),
            &env_in(dir.path()),
            Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::Redirect { ref path, .. } if path.ends_with("missing.txt")));
    }

    #[test]
    fn output_is_created_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let redirections = Redirections::open(
            &stage(None, Some("out.txt")),
            &env_in(dir.path()),
            Default::default(),
        )
        .unwrap();
        assert!(redirections.stdout.is_some());
        assert!(dir.path().join("out.txt").exists());
    }

    #[test]
    fn output_overwrites_from_start_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, "0123456789").unwrap();

        let redirections = Redirections::open(
            &stage(None, Some("out.txt")),
            &env_in(dir.path()),
            Default::default(),
        )
        .unwrap();
        redirections.stdout.unwrap().write_all(b"abc").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "abc3456789");
    }

    #[test]
    fn truncate_option_clears_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, "0123456789").unwrap();

        let options = RedirectOptions {
            truncate_output: true,
        };
        let redirections =
            Redirections::open(&stage(None, Some("out.txt")), &env_in(dir.path()), options)
                .unwrap();
        redirections.stdout.unwrap().write_all(b"abc").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "abc");
    }
}
