mod extract;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgdump-extract")]
#[command(version)]
#[command(about = "Extract PostgreSQL dump COPY blocks into per-table NDJSON files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract COPY data blocks from a dump file into per-table NDJSON files
    Extract {
        /// Input dump file. Supports .gz, .bz2, .xz, .zst compression
        file: PathBuf,

        /// Output directory for per-table NDJSON files
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Only extract specific tables (comma-separated)
        #[arg(short, long)]
        tables: Option<String>,

        /// Parse and validate without writing files (dry run)
        #[arg(long)]
        dry_run: bool,

        /// Show progress during processing
        #[arg(short, long)]
        progress: bool,

        /// Verbose output (per-block notices on stderr)
        #[arg(short, long)]
        verbose: bool,

        /// Output summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Extract {
            file,
            output,
            tables,
            dry_run,
            progress,
            verbose,
            json,
        } => extract::run(file, output, tables, dry_run, progress, verbose, json),

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
