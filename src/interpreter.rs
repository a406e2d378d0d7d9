use crate::builtin;
use crate::command::{ExitCode, Flow};
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::error::ShellError;
use crate::orchestrator::{FinalStage, Orchestrator, PipelineOutcome, StageExit};
use crate::parser::{ParsedLine, parse_line};
use crate::redirect::Redirections;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};
use tracing::debug;

/// Exit code given to a line rejected before anything ran.
const REJECTED_LINE: ExitCode = 2;

/// What evaluating one line produced, before anything is printed.
#[derive(Debug)]
pub enum LineOutcome {
    /// Nothing to run: blank line or only redirections.
    Empty,
    Builtin(Flow),
    Pipeline(PipelineOutcome),
}

impl LineOutcome {
    pub fn flow(&self) -> Flow {
        match self {
            LineOutcome::Empty => Flow::Continue(0),
            LineOutcome::Builtin(flow) => *flow,
            LineOutcome::Pipeline(outcome) => Flow::Continue(outcome.exit_code()),
        }
    }
}

/// The interactive command interpreter.
///
/// Owns the process-wide [`Environment`]; only the `cd` built-in changes it and
/// every spawned stage gets a copy.
///
/// Example
/// ```no_run
/// use minish::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::default());
/// let flow = sh.run_line("ls -la | wc -l").unwrap();
/// assert_eq!(flow.code(), 0);
/// ```
pub struct Interpreter {
    env: Environment,
    config: ShellConfig,
}

impl Interpreter {
    pub fn new(config: ShellConfig) -> Self {
        Self::with_env(Environment::new(), config)
    }

    pub fn with_env(env: Environment, config: ShellConfig) -> Self {
        Self { env, config }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Parse and run one line. Built-in output goes to `stdout`/`stderr`
    /// unless redirected; nothing about spawned stages is printed here.
    pub fn execute_line(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<LineOutcome, ShellError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Empty);
        }

        let parsed = parse_line(line)?;
        if parsed.is_empty() {
            return Ok(LineOutcome::Empty);
        }
        if parsed.len() > self.config.max_stages {
            return Err(ShellError::PipelineTooLong {
                stages: parsed.len(),
                max: self.config.max_stages,
            });
        }

        // built-ins must never reach the resolver: `cd` has to run here to stick
        if parsed.len() == 1 && builtin::is_builtin(&parsed.stages[0].command) {
            return self.run_builtin(&parsed, stdout, stderr);
        }

        let outcome = Orchestrator::new(&self.env)
            .with_policy(self.config.wait_policy)
            .with_redirect_options(self.config.redirect)
            .run(&parsed)?;
        Ok(LineOutcome::Pipeline(outcome))
    }

    fn run_builtin(
        &mut self,
        parsed: &ParsedLine,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<LineOutcome, ShellError> {
        let stage = &parsed.stages[0];
        let redirections = match Redirections::open(stage, &self.env, self.config.redirect) {
            Ok(redirections) => redirections,
            Err(e) => {
                writeln!(stderr, "{}", e)?;
                return Ok(LineOutcome::Builtin(Flow::Continue(1)));
            }
        };

        let mut stdin: Box<dyn io::Read> = match redirections.stdin {
            Some(file) => Box::new(file),
            None => Box::new(io::empty()),
        };
        let flow = match redirections.stdout {
            Some(mut file) => builtin::dispatch(stage, &mut self.env, &mut stdin, &mut file, stderr),
            None => builtin::dispatch(stage, &mut self.env, &mut stdin, stdout, stderr),
        };
        Ok(LineOutcome::Builtin(flow.unwrap_or(Flow::Continue(0))))
    }

    /// Evaluate one line against the process's standard streams.
    pub fn run_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        let stdout = io::stdout();
        let stderr = io::stderr();
        self.run_line_with(line, &mut stdout.lock(), &mut stderr.lock())
    }

    /// Evaluate one line and print what happened.
    ///
    /// Per-line errors are reported on `stderr` and the loop may continue. Only
    /// fatal errors are returned.
    pub fn run_line_with(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<Flow, ShellError> {
        match self.execute_line(line, stdout, stderr) {
            Ok(outcome) => {
                if let LineOutcome::Pipeline(pipeline) = &outcome {
                    report(pipeline, stdout, stderr)?;
                }
                Ok(outcome.flow())
            }
            Err(e) if !e.is_fatal() => {
                debug!(error = %e, "line rejected");
                writeln!(stderr, "{}", e)?;
                Ok(Flow::Continue(REJECTED_LINE))
            }
            Err(e) => Err(e),
        }
    }

    /// Read-eval-print until end of input or `exit`.
    ///
    /// Returns the code the interpreter should exit with.
    pub fn repl(&mut self) -> Result<ExitCode, ShellError> {
        let mut rl = DefaultEditor::new()?;

        loop {
            let prompt = self.env.prompt().to_string();
            match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    if let Flow::Exit(code) = self.run_line(&line)? {
                        return Ok(code);
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

/// Print stage failures and non-zero statuses.
///
/// Stage errors always go to `stderr`. The status line that follows a non-zero
/// exit goes to `stderr` for non-final stages and to `stdout` for the final one.
pub fn report(
    outcome: &PipelineOutcome,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<()> {
    for exit in &outcome.upstream {
        report_error(exit, stderr)?;
        report_status(exit, stderr)?;
    }
    match &outcome.last {
        Some(FinalStage::Exited(exit)) => {
            report_error(exit, stderr)?;
            report_status(exit, stdout)?;
        }
        Some(FinalStage::Background { command, pid }) => {
            writeln!(stderr, "[{}] {} running in background", pid, command)?;
        }
        None => {}
    }
    Ok(())
}

fn report_error(exit: &StageExit, stderr: &mut dyn Write) -> io::Result<()> {
    match &exit.error {
        Some(error) => writeln!(stderr, "{}", error),
        None => Ok(()),
    }
}

fn report_status(exit: &StageExit, out: &mut dyn Write) -> io::Result<()> {
    if exit.code == 0 {
        return Ok(());
    }
    writeln!(out, "{}", status_line(exit))
}

/// A stage that never got a process is named by its command instead of a pid.
fn status_line(exit: &StageExit) -> String {
    match exit.pid {
        Some(pid) => format!("process {} exited with status {}", pid, exit.code),
        None => format!("{} exited with status {}", exit.command, exit.code),
    }
}
