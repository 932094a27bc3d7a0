use std::path::PathBuf;

use clap::{Parser, Subcommand};
use repoquery::commands::{run_index, run_query};
use repoquery::config::Config;

#[derive(Parser)]
#[command(name = "repoquery")]
#[command(about = "Semantic code search and conversational Q&A over a source repository")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a searchable index from a repository
    Index {
        /// Path to the repository root to index
        root: PathBuf,
        /// Directory where the index artifacts are written
        output: PathBuf,
        /// Path to the configuration file
        #[arg(long, default_value = "repoquery.toml")]
        config: PathBuf,
    },
    /// Ask questions about an indexed repository
    Query {
        /// Directory containing the index artifacts
        index_dir: PathBuf,
        /// Path to the configuration file
        #[arg(long, default_value = "repoquery.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Credentials may come from a .env file; a missing file is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            root,
            output,
            config,
        } => {
            let config = Config::load(&config)?;
            run_index(&root, &output, &config)?;
        }
        Commands::Query { index_dir, config } => {
            let config = Config::load(&config)?;
            run_query(&index_dir, &config).await?;
        }
    }

    Ok(())
}
