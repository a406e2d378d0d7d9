use crate::orchestrator::WaitPolicy;
use crate::redirect::RedirectOptions;
use argh::FromArgs;

/// Longest pipeline a line may describe: one `|` at most.
pub const MAX_STAGES: usize = 2;

#[derive(FromArgs, Debug, Default, PartialEq, Eq)]
/// A small interactive shell: one optional pipe, `<`/`>` redirection and a
/// trailing `&`.
pub struct ShellArgs {
    #[argh(option, short = 'c')]
    /// evaluate a single line and exit with its status.
    pub command: Option<String>,

    #[argh(switch)]
    /// start every pipeline stage before waiting for any of them.
    pub concurrent: bool,

    #[argh(switch)]
    /// truncate files opened for `>` redirection.
    pub truncate: bool,

    #[argh(switch, short = 'v')]
    /// log debug events to standard error.
    pub verbose: bool,
}

/// Knobs the interpreter consults for every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellConfig {
    pub wait_policy: WaitPolicy,
    pub redirect: RedirectOptions,
    pub max_stages: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            wait_policy: WaitPolicy::Sequential,
            redirect: RedirectOptions::default(),
            max_stages: MAX_STAGES,
        }
    }
}

impl From<&ShellArgs> for ShellConfig {
    fn from(args: &ShellArgs) -> Self {
        let wait_policy = if args.concurrent {
            WaitPolicy::Concurrent
        } else {
            WaitPolicy::Sequential
        };
        Self {
            wait_policy,
            redirect: RedirectOptions {
                truncate_output: args.truncate,
            },
            ..Self::default()
        }
    }
}
