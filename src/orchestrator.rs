//! Turns parsed stages into running processes.
//!
//! Every stage but the last writes into a fresh pipe that the next stage reads
//! from. With [`WaitPolicy::Sequential`] stage `i` is waited for before stage
//! `i + 1` is created, so nothing reads a pipe until its writer has exited and
//! a writer producing more than the OS pipe buffer blocks forever.
//! [`WaitPolicy::Concurrent`] spawns every stage before the first wait.
//!
//! Backgrounding only ever skips the wait for the final stage. Backgrounded
//! processes are never reaped.

use crate::command::{ExitCode, exit_code};
use crate::env::Environment;
use crate::error::{ShellError, StageError};
use crate::parser::{ParsedLine, StageDescriptor};
use crate::redirect::{self, RedirectOptions, Redirections};
use crate::resolve;
use nix::fcntl::OFlag;
use nix::libc;
use nix::unistd;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait for each stage to exit before creating the next one.
    #[default]
    Sequential,
    /// Create every stage first, then wait for them in order.
    Concurrent,
}

/// How one stage ended.
#[derive(Debug)]
pub struct StageExit {
    pub command: String,
    /// `None` when the stage never got a process.
    pub pid: Option<u32>,
    pub code: ExitCode,
    pub error: Option<StageError>,
}

impl StageExit {
    fn failed(stage: &StageDescriptor, error: StageError) -> Self {
        Self {
            command: stage.command.clone(),
            pid: None,
            code: 1,
            error: Some(error),
        }
    }
}

#[derive(Debug)]
pub enum FinalStage {
    Exited(StageExit),
    /// Left running; nobody will wait for it.
    Background { command: String, pid: u32 },
}

/// Everything that happened while running one line.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Every stage before the last, in pipeline order.
    pub upstream: Vec<StageExit>,
    /// `None` only for a line without stages.
    pub last: Option<FinalStage>,
}

impl PipelineOutcome {
    /// Exit code of the line: the final stage's code, 0 when backgrounded.
    pub fn exit_code(&self) -> ExitCode {
        match &self.last {
            Some(FinalStage::Exited(exit)) => exit.code,
            Some(FinalStage::Background { .. }) | None => 0,
        }
    }
}

/// A spawned process, waited for at most once.
#[derive(Debug)]
struct ProcessHandle {
    command: String,
    child: Child,
}

impl ProcessHandle {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn wait(mut self) -> Result<StageExit, ShellError> {
        let pid = self.pid();
        let status = self
            .child
            .wait()
            .map_err(|source| ShellError::Wait { pid, source })?;
        let code = exit_code(status);
        debug!(pid, command = %self.command, code, "stage exited");
        Ok(StageExit {
            command: self.command,
            pid: Some(pid),
            code,
            error: None,
        })
    }
}

#[derive(Debug)]
enum Launched {
    Running(ProcessHandle),
    Failed(StageExit),
}

impl Launched {
    fn wait(self) -> Result<StageExit, ShellError> {
        match self {
            Launched::Running(handle) => handle.wait(),
            Launched::Failed(exit) => Ok(exit),
        }
    }

    fn finish(self, background: bool) -> Result<FinalStage, ShellError> {
        match self {
            Launched::Running(handle) if background => {
                let pid = handle.pid();
                debug!(pid, command = %handle.command, "left in background");
                Ok(FinalStage::Background {
                    command: handle.command,
                    pid,
                })
            }
            launched => launched.wait().map(FinalStage::Exited),
        }
    }
}

/// Spawns and waits for the stages of one line.
///
/// Children get a snapshot of `env` (variables and working directory) taken at
/// spawn time.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    env: &'a Environment,
    redirect: RedirectOptions,
    policy: WaitPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self {
            env,
            redirect: RedirectOptions::default(),
            policy: WaitPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_redirect_options(mut self, options: RedirectOptions) -> Self {
        self.redirect = options;
        self
    }

    /// Run every stage of `line`, wiring stage `i`'s stdout to stage `i + 1`'s
    /// stdin.
    ///
    /// Only infrastructure failures (pipe, fork, wait) are returned as errors.
    /// A stage that cannot be resolved, redirected or executed ends up in the
    /// outcome with code 1 and the remaining stages still run.
    pub fn run(&self, line: &ParsedLine) -> Result<PipelineOutcome, ShellError> {
        let Some((last, rest)) = line.stages.split_last() else {
            return Ok(PipelineOutcome::default());
        };

        let mut upstream = Vec::with_capacity(rest.len());
        let mut pending = Vec::new();
        let mut stdin_pipe: Option<OwnedFd> = None;

        for stage in rest {
            let (read, write) = pipe()?;
            let launched = self.launch(stage, stdin_pipe.take(), Some(write))?;
            stdin_pipe = Some(read);
            match self.policy {
                WaitPolicy::Sequential => upstream.push(launched.wait()?),
                WaitPolicy::Concurrent => pending.push(launched),
            }
        }

        let launched = self.launch(last, stdin_pipe.take(), None)?;
        for launched in pending {
            upstream.push(launched.wait()?);
        }
        let last = launched.finish(line.is_background())?;

        Ok(PipelineOutcome {
            upstream,
            last: Some(last),
        })
    }

    fn launch(
        &self,
        stage: &StageDescriptor,
        stdin_pipe: Option<OwnedFd>,
        stdout_pipe: Option<OwnedFd>,
    ) -> Result<Launched, ShellError> {
        let executable = resolve::find_executable(self.env, &stage.command);
        trace!(command = %stage.command, ?executable, "resolved");

        // redirections are opened even when the command turns out to be missing
        let redirections = match Redirections::open(stage, self.env, self.redirect) {
            Ok(redirections) => redirections,
            Err(error) => return Ok(Launched::Failed(StageExit::failed(stage, error))),
        };
        let Some(executable) = executable else {
            let error = StageError::NotFound {
                command: stage.command.clone(),
            };
            return Ok(Launched::Failed(StageExit::failed(stage, error)));
        };

        let mut cmd = Command::new(&executable);
        cmd.arg0(&stage.command)
            .args(stage.arguments())
            .stdin(redirect::wire(redirections.stdin, stdin_pipe))
            .stdout(redirect::wire(redirections.stdout, stdout_pipe))
            .env_clear()
            .envs(&self.env.vars)
            .current_dir(&self.env.current_dir);

        match cmd.spawn() {
            Ok(child) => {
                debug!(pid = child.id(), argv = ?stage.args, "spawned stage");
                Ok(Launched::Running(ProcessHandle {
                    command: stage.command.clone(),
                    child,
                }))
            }
            Err(source) if is_fork_failure(&source) => Err(ShellError::Spawn {
                command: stage.command.clone(),
                source,
            }),
            Err(source) => {
                let error = StageError::Exec {
                    path: executable,
                    source,
                };
                Ok(Launched::Failed(StageExit::failed(stage, error)))
            }
        }
    }
}

/// Process creation itself failed, as opposed to the program failing to load.
fn is_fork_failure(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::ENOMEM))
}

/// An anonymous pipe whose ends are not leaked into unrelated children.
///
/// The spawn call duplicates an end onto stdin/stdout, which clears the flag on
/// the copy the child actually uses.
fn pipe() -> Result<(OwnedFd, OwnedFd), ShellError> {
    unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use std::ffi::OsStr;
    use std::fs;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn env_in(dir: &Path) -> Environment {
        let mut env = Environment::new();
        env.current_dir = dir.to_path_buf();
        env
    }

    fn run(env: &Environment, line: &str) -> PipelineOutcome {
        run_with(env, line, WaitPolicy::Sequential)
    }

    fn run_with(env: &Environment, line: &str, policy: WaitPolicy) -> PipelineOutcome {
        let parsed = parse_line(line).expect("line parses");
        Orchestrator::new(env)
            .with_policy(policy)
            .run(&parsed)
            .expect("pipeline runs")
    }

    fn final_exit(outcome: &PipelineOutcome) -> &StageExit {
        match &outcome.last {
            Some(FinalStage::Exited(exit)) => exit,
            other => panic!("expected an exited final stage, got {:?}", other),
        }
    }

    #[test]
    fn empty_line_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "");
        assert!(outcome.upstream.is_empty());
        assert!(outcome.last.is_none());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn single_stage_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());

        let ok = run(&env, "true");
        assert_eq!(ok.exit_code(), 0);
        assert!(final_exit(&ok).pid.is_some());

        let failed = run(&env, "false");
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn missing_command_fails_only_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "definitely-not-a-command-xyz --flag");
        let exit = final_exit(&outcome);
        assert_eq!(exit.code, 1);
        assert_eq!(exit.pid, None);
        assert_eq!(
            exit.error.as_ref().map(ToString::to_string).as_deref(),
            Some("definitely-not-a-command-xyz: command not found")
        );
    }

    #[test]
    fn missing_command_still_creates_output_file() {
        let dir = tempfile::tempdir().unwrap();
        run(&env_in(dir.path()), "definitely-not-a-command-xyz > created.txt");
        assert!(dir.path().join("created.txt").exists());
    }

    #[test]
    fn output_redirection_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "echo hello world > out.txt");
        assert_eq!(outcome.exit_code(), 0);
        let content = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content, "hello world\n");
    }

    #[test]
    fn input_redirection_feeds_stdin() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "b\na\nc\n").unwrap();
        run(&env_in(dir.path()), "sort < in.txt > out.txt");
        let content = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content, "a\nb\nc\n");
    }

    #[test]
    fn missing_input_file_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "cat < missing.txt");
        let exit = final_exit(&outcome);
        assert_eq!(exit.code, 1);
        assert!(matches!(exit.error, Some(StageError::Redirect { .. })));
    }

    #[test]
    fn two_stages_are_connected_by_a_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "echo one two three | wc -w > count.txt");
        assert_eq!(outcome.upstream.len(), 1);
        assert_eq!(outcome.upstream[0].code, 0);
        assert_eq!(outcome.exit_code(), 0);
        let count = fs::read_to_string(dir.path().join("count.txt")).unwrap();
        assert_eq!(count.trim(), "3");
    }

    #[test]
    fn output_file_on_first_stage_wins_over_pipe() {
        let dir = tempfile::tempdir().unwrap();
        run(&env_in(dir.path()), "echo hi > first.txt | cat > second.txt");
        assert_eq!(
            fs::read_to_string(dir.path().join("first.txt")).unwrap(),
            "hi\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("second.txt")).unwrap(),
            ""
        );
    }

    #[test]
    fn input_file_on_second_stage_wins_over_pipe() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "from file\n").unwrap();
        run(&env_in(dir.path()), "echo from pipe | cat < in.txt > out.txt");
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "from file\n"
        );
    }

    #[test]
    fn failing_first_stage_is_reported_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "false | cat > out.txt");
        assert_eq!(outcome.upstream[0].code, 1);
        assert!(outcome.upstream[0].pid.is_some());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn unresolved_first_stage_leaves_second_with_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(
            &env_in(dir.path()),
            "definitely-not-a-command-xyz | wc -c > out.txt",
        );
        assert!(matches!(
            outcome.upstream[0].error,
            Some(StageError::NotFound { .. })
        ));
        assert_eq!(outcome.exit_code(), 0);
        let count = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(count.trim(), "0");
    }

    #[test]
    fn background_final_stage_is_not_waited_for() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "sleep 1 &");
        match outcome.last {
            Some(FinalStage::Background { ref command, pid }) => {
                assert_eq!(command, "sleep");
                assert!(pid > 0);
            }
            ref other => panic!("expected background stage, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn background_pipeline_still_waits_for_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&env_in(dir.path()), "echo x > marker.txt | sleep 1 &");
        assert_eq!(outcome.upstream.len(), 1);
        assert_eq!(outcome.upstream[0].code, 0);
        assert!(matches!(outcome.last, Some(FinalStage::Background { .. })));
        // the first stage has fully exited before run() returned
        assert_eq!(
            fs::read_to_string(dir.path().join("marker.txt")).unwrap(),
            "x\n"
        );
    }

    #[test]
    fn children_start_in_interpreter_directory() {
        let dir = tempfile::tempdir().unwrap();
        run(&env_in(dir.path()), "sh -c pwd > where.txt");
        let reported = fs::read_to_string(dir.path().join("where.txt")).unwrap();
        assert_eq!(
            fs::canonicalize(reported.trim()).unwrap(),
            fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[test]
    fn concurrent_policy_streams_past_pipe_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with(
            &env_in(dir.path()),
            "head -c 200000 /dev/zero | wc -c > out.txt",
            WaitPolicy::Concurrent,
        );
        assert_eq!(outcome.upstream[0].code, 0);
        let count = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(count.trim(), "200000");
    }

    #[test]
    fn pipeline_of_three_stages_is_wired_generically() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(
            &env_in(dir.path()),
            "printf a\\nb\\nc\\n | sort -r | head -n 1 > out.txt",
        );
        assert_eq!(outcome.upstream.len(), 2);
        let content = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content.trim(), "c");
    }

    #[test]
    fn unloadable_executable_is_an_exec_failure() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage");
        fs::write(&garbage, b"\x7fnot an executable image\x00\x01\x02").unwrap();
        fs::set_permissions(&garbage, fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = run(&env_in(dir.path()), &garbage.to_string_lossy());
        let exit = final_exit(&outcome);
        assert_eq!(exit.code, 1);
        assert_eq!(exit.pid, None);
        match &exit.error {
            Some(StageError::Exec { path, .. }) => assert_eq!(path, &garbage),
            other => panic!("expected an exec failure, got {:?}", other),
        }
    }

    #[test]
    fn non_utf8_variables_reach_children_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        env.vars.insert(
            "MINISH_RAW".into(),
            OsStr::from_bytes(b"\xff\xfe").to_os_string(),
        );

        let outcome = run(&env, "printenv MINISH_RAW > raw.txt");
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(fs::read(dir.path().join("raw.txt")).unwrap(), b"\xff\xfe\n");
    }

    #[test]
    fn pipe_ends_are_close_on_exec() {
        let (read, write) = pipe().unwrap();
        for fd in [&read, &write] {
            let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
            assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
        }
    }
}
