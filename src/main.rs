use std::{error::Error, num::NonZeroUsize, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};

use jukebox::{
    config::Config,
    console::{explain, Command, Console},
    registry::{Registry, SessionId},
    sim::{SimConnector, SimResolver},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// The console drives a single session.
const CONSOLE_SESSION: SessionId = 1;

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// TOML file with `[resolver]`, `[queue]`, `[playback]` and `[usage]`
    /// sections. Every setting has a default.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<String>,

    /// Number of concurrent resolver calls
    ///
    /// Overrides `resolver.workers` of the configuration file.
    #[arg(short, long)]
    workers: Option<NonZeroUsize>,

    /// Name to record requests under
    #[arg(short, long, default_value_t = String::from("console"))]
    user: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive, so this is quiet mode.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("jukebox", level);
    }

    logger.init();
}

/// Loads the configuration file, or the defaults without one.
fn load_config(args: &Args) -> jukebox::error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(workers) = args.workers {
        config.resolver.workers = workers;
    }

    Ok(config)
}

/// Main application loop: reads commands from standard input until `quit`,
/// end of input or an interrupt, then leaves every session.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    debug!("{config:#?}");

    let registry = Arc::new(Registry::new(
        config,
        Arc::new(SimResolver::new()),
        Arc::new(SimConnector),
    )?);
    let (console, mut messages) = Console::new(Arc::clone(&registry), CONSOLE_SESSION, args.user);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type help for a list of commands.");
    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break Ok(());
            }

            Some(message) = messages.recv() => println!("{message}"),

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break Ok(());
                };

                match line.parse::<Command>() {
                    Ok(Command::Quit) => break Ok(()),
                    Ok(command) => println!("{}", console.execute(command).await),
                    Err(e) => println!("{}", explain(&e)),
                }
            }
        }
    };

    registry.leave_all().await;
    result
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_override_the_configuration() {
        let args = Args {
            workers: NonZeroUsize::new(9),
            ..Args::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.resolver.workers.get(), 9);
    }

    #[test]
    fn missing_configuration_file_is_an_error() {
        let args = Args {
            config: Some("/nonexistent/jukebox.toml".to_owned()),
            ..Args::default()
        };
        let err = load_config(&args).unwrap_err();
        assert_eq!(err.kind, jukebox::error::ErrorKind::NotFound);
    }
}
