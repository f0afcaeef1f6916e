//! CW-013: CLI subcommands — serve, console, check.

use crate::core::settings::{LogLevel, WorkerSettings};
use crate::core::worker::Application;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve framed compile jobs over stdin/stdout
    Serve {
        /// Settings file path
        #[arg(short, long, default_value = "crucible.yaml")]
        settings: PathBuf,

        /// Parent process id to watch; the worker exits when it dies
        #[arg(long)]
        parent: Option<u32>,

        /// Add well-known core library references to every job
        #[arg(long)]
        std_libraries: bool,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Interactive console for a worker started without a parent stream
    Console {
        /// Settings file path
        #[arg(short, long, default_value = "crucible.yaml")]
        settings: PathBuf,
    },

    /// Validate a settings file and print the effective configuration
    Check {
        /// Settings file path
        #[arg(short, long, default_value = "crucible.yaml")]
        settings: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Serve {
            settings,
            parent,
            std_libraries,
            debug,
        } => cmd_serve(&settings, parent, std_libraries, debug),
        Commands::Console { settings } => cmd_console(&settings),
        Commands::Check { settings } => cmd_check(&settings),
    }
}

fn cmd_serve(
    settings_path: &Path,
    parent: Option<u32>,
    std_libraries: bool,
    debug: bool,
) -> Result<(), String> {
    let mut settings = WorkerSettings::load(settings_path)?;
    settings.compiler.enable_message_stream = true;
    if std_libraries {
        settings.compiler.use_standard_libraries = true;
    }
    if debug {
        settings.logging.level = LogLevel::Debug;
    }

    let app = Application::new(settings);
    app.serve_stdio(parent)
}

fn cmd_console(settings_path: &Path) -> Result<(), String> {
    let mut settings = WorkerSettings::load(settings_path)?;
    settings.compiler.enable_message_stream = false;
    let app = Application::new(settings);
    app.run_console()
}

fn cmd_check(settings_path: &Path) -> Result<(), String> {
    let settings = WorkerSettings::load(settings_path)?;
    let yaml = serde_yaml_ng::to_string(&settings)
        .map_err(|e| format!("cannot render settings: {}", e))?;
    println!("{}", yaml);
    println!("event log: {}", settings.event_log_path().display());
    Ok(())
}
