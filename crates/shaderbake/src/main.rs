mod cli;
mod host;
mod report;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Resolve(args)) => run::resolve(args),
        None => run::run(cli.run),
    }
}
