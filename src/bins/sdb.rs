use std::path::{Path, PathBuf};
use std::process::ExitCode;

use srcdbg::debugger::Debugger;
use srcdbg::errors::DebuggerError;
use srcdbg::ui::cli::CliUi;

use clap::Parser;
use tracing::{debug, Level};

/// Line oriented source debugger
///
/// Launches the program, runs it to the first line of its main function and waits for
/// commands. Type `help` at the prompt for the list of commands.
#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Args {
    /// The program to debug, looked up in PATH if it is not a path
    program: PathBuf,

    /// Run to this function at startup instead of `main.main` or `main`
    #[arg(long)]
    entry: Option<String>,

    /// Log more, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    human_panic::setup_panic!();
    let args = Args::parse();
    setup_logger(args.verbose);
    debug!("set up the logger");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), DebuggerError> {
    let program = resolve_program(&args.program)?;
    let ui = CliUi::build();
    let mut debugger = Debugger::build(&program, ui).with_entry(args.entry);
    debugger.run_debugger()?;
    debugger.cleanup()?;

    Ok(())
}

fn resolve_program(program: &Path) -> Result<PathBuf, DebuggerError> {
    if program.exists() || program.components().count() > 1 {
        return Ok(program.to_owned());
    }
    Ok(which::which(program)?)
}

fn setup_logger(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // the debuggee and the prompt own stdout
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not set up the logger: {e}");
    }
}
