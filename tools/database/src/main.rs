//! `ustore-db`: operator tooling over a node's segment file — `inspect`
//! for introspection (§4.1's `StoreInfo`) and `compact` for offline
//! sealed-segment reclamation (§1). In the manner of the teacher's
//! `tools/database`, each subcommand lives in its own module and `main`
//! is a thin dispatcher.

mod compact;
mod inspect;

use anyhow::Result;
use clap::Parser;

use compact::CompactCommand;
use inspect::InspectCommand;

#[derive(clap::Subcommand)]
enum SubCommand {
    Inspect(InspectCommand),
    Compact(CompactCommand),
}

#[derive(Parser)]
#[command(name = "ustore-db", about = "Operator tooling over a UStore segment file")]
struct Cli {
    #[clap(subcommand)]
    sub_command: SubCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.sub_command {
        SubCommand::Inspect(cmd) => cmd.run(),
        SubCommand::Compact(cmd) => cmd.run(),
    }
}
