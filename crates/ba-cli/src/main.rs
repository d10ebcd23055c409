mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ba",
    about = "Business-analyst chat assistant: streaming server and terminal client",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (missing file means defaults)
    #[arg(long, global = true, env = "BA_CONFIG", default_value = ba_core::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/SSE server
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,

        /// Project that seeded documents belong to
        #[arg(long, default_value = "local")]
        project: String,

        /// Seed the in-memory document store with these files
        #[arg(long = "doc", value_name = "FILE")]
        docs: Vec<PathBuf>,
    },

    /// Run one chat turn in the terminal
    Chat {
        /// The user message
        message: String,

        /// Project the turn belongs to
        #[arg(long, default_value = "local")]
        project: String,

        /// Project display name shown to the model
        #[arg(long)]
        project_name: Option<String>,

        /// Thread id
        #[arg(long, default_value = "cli")]
        thread: String,

        /// Seed the in-memory document store with these files
        #[arg(long = "doc", value_name = "FILE")]
        docs: Vec<PathBuf>,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Serve {
            port,
            project,
            docs,
        } => cmd::serve::run(&cli.config, port, &project, &docs),
        Commands::Chat {
            message,
            project,
            project_name,
            thread,
            docs,
        } => cmd::chat::run(
            &cli.config,
            cmd::chat::ChatArgs {
                message,
                project,
                project_name,
                thread,
                docs,
            },
            cli.json,
        ),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
