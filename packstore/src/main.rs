use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use packstore::list::{list, ListConfig};
use packstore::put::{put, PutConfig};
use packstore::repack::{repack, RepackConfig};
use packstore::show::{show, ShowConfig};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[arg(
        long,
        env = "PACKSTORE_ROOT",
        default_value = ".",
        help = "Directory holding the repository blobs"
    )]
    storage_root: PathBuf,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Commands to manipulate blocks
    Block {
        #[command(subcommand)]
        command: BlockCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BlockCommand {
    /// List blocks
    #[command(alias = "ls")]
    List(ListConfig),

    /// Repackage small blocks into bigger ones
    Repack(RepackConfig),

    /// Store a file as a block
    Put(PutConfig),

    /// Print the content of a block
    Show(ShowConfig),
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    let root = cli.storage_root;
    match cli.command {
        Command::Block { command } => match command {
            BlockCommand::List(config) => list(&root, config)?,
            BlockCommand::Repack(config) => repack(&root, config)?,
            BlockCommand::Put(config) => put(&root, config)?,
            BlockCommand::Show(config) => show(&root, config)?,
        },
    }
    Ok(())
}
