use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use super::output::Output;

pub mod config;
pub mod run;
pub mod version;

#[derive(Parser)]
#[command(
    name = "hierexec",
    version = env!("CARGO_PKG_VERSION"),
    about = "Hierarchical parallel test executor",
    long_about = "hierexec runs trees of test tasks on a work-stealing thread pool, \
                  honoring the shared and exclusive resource locks each task declares."
)]
pub struct Cli {
    /// Run as if started in <DIR> instead of current working directory
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<String>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the task tree described by a plan file
    Run(run::RunArgs),
    /// Configuration management
    Config(config::ConfigArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        // Change directory if specified
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        // Set up logging based on verbosity
        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);

        match self.command {
            Some(Commands::Run(args)) => run::execute(args, self.config.as_deref(), &output),
            Some(Commands::Config(args)) => {
                config::execute(args, self.config.as_deref(), &output)
            }
            Some(Commands::Version(args)) => version::execute(args),
            None => {
                let mut command = Cli::command();
                command.print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // Logs go to stderr so that JSON summaries on stdout stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(verbose > 1)
        .with_writer(std::io::stderr)
        .init();
}
