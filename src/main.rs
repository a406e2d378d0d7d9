use minish::{Flow, Interpreter, ShellArgs, ShellConfig};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args: ShellArgs = argh::from_env();
    init_logging(args.verbose);

    let mut shell = Interpreter::new(ShellConfig::from(&args));
    let result = match &args.command {
        Some(line) => shell.run_line(line).map(Flow::code),
        None => shell.repl(),
    };

    match result {
        // only the low byte of a status survives, as with any process
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error = ?e, "fatal");
            eprintln!("minish: {}", e);
            ExitCode::FAILURE
        }
    }
}
