// CLI application
use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "gcfifo")]
#[command(about = "GameCube command processor FIFO driver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a synthetic guest that streams PE token commands through the FIFO
    Run {
        /// Machine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Consume the FIFO on a separate GPU thread
        #[arg(long)]
        dual_core: bool,

        /// Number of 32-byte chunks to submit
        #[arg(long, default_value_t = 256)]
        chunks: u32,

        /// Write a save state here once the run finishes
        #[arg(long)]
        save_state: Option<PathBuf>,
    },
    /// Print a save state as JSON
    Inspect {
        /// Path to the save state
        snapshot: PathBuf,
    },
    /// Write the default machine configuration
    InitConfig {
        /// Output path
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            dual_core,
            chunks,
            save_state,
        } => {
            let pb = create_progress_bar(chunks)?;
            let report = commands::run(
                config.as_deref(),
                dual_core,
                chunks,
                save_state.as_deref(),
                |_| pb.inc(1),
            )?;
            pb.finish_with_message("FIFO drained");
            commands::print_report(&report);
        }
        Commands::Inspect { snapshot } => commands::inspect(&snapshot)?,
        Commands::InitConfig { path } => commands::write_default_config(&path)?,
    }

    Ok(())
}

fn create_progress_bar(chunks: u32) -> Result<ProgressBar> {
    let pb = ProgressBar::new(chunks as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}
