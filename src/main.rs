//! Crucible CLI — out-of-process compile worker.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "crucible",
    version,
    about = "Out-of-process compile worker — framed stdio jobs, tiered reference resolution, retry-compile engine"
)]
struct Cli {
    #[command(subcommand)]
    command: crucible::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = crucible::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
