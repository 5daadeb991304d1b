//! The command-line interface.
//!
//! Uses `clap` to parse arguments and subcommands; `run` executes the chosen
//! command. The helper personality shares the logging setup but bypasses the
//! parser entirely.

use std::path::PathBuf;

use clap::Parser;

pub use self::commands::run;
pub use self::logging::init_global_subscriber;

mod commands;
pub mod logging;
pub(crate) mod store;

/// The top-level command-line arguments.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Change the current working directory before doing anything else.
    #[arg(short = 'C', value_name = "DIR", global = true, value_parser = validate_path)]
    working_directory: Option<PathBuf>,

    /// Arguments controlling logging behavior.
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    command: commands::Commands,
}

/// Arguments controlling logging behavior.
#[derive(Parser, Clone, Copy, Debug, Default)]
#[command(next_help_heading = "Log Options")]
pub struct LogArgs {
    /// Increase logging verbosity (`-v` for DEBUG, `-vv` for TRACE).
    ///
    /// `RUST_LOG` and `DG_LOG_LEVEL` take precedence over this flag.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// Suppress output (`-q` for WARN, `-qq` for ERROR); overrides
    /// verbosity settings.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,
}

/// Changes the current working directory based on the `-C` flag.
///
/// Manually scans the raw arguments so the directory change happens before
/// clap parses anything else.
pub fn change_directory() -> Vec<String> {
    let mut seen: Option<bool> = None;
    std::env::args()
        .map(|arg| {
            if seen.is_none() && arg == "-C" {
                seen = Some(true);
                return arg;
            }
            if let Some(cd) = seen {
                if cd {
                    std::env::set_current_dir(&arg).ok();
                    seen = Some(false);
                }
            }
            arg
        })
        .collect()
}

fn validate_path(path: &str) -> Result<PathBuf, std::io::Error> {
    std::fs::canonicalize(path)
}
