//! AnyVar worker main executable

use anyvar_worker::{common, config, storage, vcf};

use anyvar_worker::storage::Storage as _;
use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "AnyVar variation registry heavy lifting",
    long_about = "This tool performs the heavy lifting for the AnyVar variation registry"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// VCF pipeline commands.
    Vcf(Vcf),
    /// Storage maintenance commands.
    Store(Store),
}

/// Parsing of "vcf *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Vcf {
    /// The sub command to run
    #[command(subcommand)]
    command: VcfCommands,
}

/// Enum supporting the parsing of "vcf *" sub commands.
#[derive(Debug, Subcommand)]
enum VcfCommands {
    Annotate(vcf::AnnotateArgs),
    IngestAnnotated(vcf::IngestArgs),
}

/// Parsing of "store *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Store {
    /// The sub command to run
    #[command(subcommand)]
    command: StoreCommands,
}

/// Enum supporting the parsing of "store *" sub commands.
#[derive(Debug, Subcommand)]
enum StoreCommands {
    Wipe(StoreWipeArgs),
}

/// Command line arguments for `store wipe` subcommand.
#[derive(Debug, Parser)]
#[command(author, version, about = "remove all rows from the object store", long_about = None)]
struct StoreWipeArgs {}

/// Main entry point for `store wipe` sub command.
fn run_store_wipe(
    args_common: &common::Args,
    _args: &StoreWipeArgs,
) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);

    let storage_config = config::StorageConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid storage configuration: {}", e))?;
    let storage = storage::create_storage(&storage_config.uri, storage_config.options)
        .map_err(|e| anyhow::anyhow!("could not create storage: {}", e))?;
    storage
        .wipe_db()
        .map_err(|e| anyhow::anyhow!("could not wipe storage: {}", e))?;
    storage.close();
    tracing::info!("all rows removed");
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Vcf(vcf) => match &vcf.command {
                VcfCommands::Annotate(args) => {
                    vcf::run_annotate(&cli.common, args)?;
                }
                VcfCommands::IngestAnnotated(args) => {
                    vcf::run_ingest(&cli.common, args)?;
                }
            },
            Commands::Store(store) => match &store.command {
                StoreCommands::Wipe(args) => {
                    run_store_wipe(&cli.common, args)?;
                }
            },
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
