use anyhow::{Result, anyhow, bail};
use clap::{Args, Subcommand};

use crate::cli::output::Output;
use crate::config::ExecutorConfig;
use crate::executor::ExecutionStrategy;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display current merged configuration
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Get a configuration value by dotted key
    Get { key: String },
    /// Validate the merged configuration
    Validate,
}

pub fn execute(args: ConfigArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let config = ExecutorConfig::load(custom_config, None::<()>)?;

    match args.command {
        ConfigCommand::Show { format } => {
            let value = config.get_full_config()?;
            let rendered = match format.to_lowercase().as_str() {
                "json" => serde_json::to_string_pretty(&value)?,
                "toml" => toml::to_string_pretty(&value)?,
                other => bail!("Unsupported format: {other}. Use toml or json"),
            };
            println!("{rendered}");
        }
        ConfigCommand::Get { key } => {
            let value = config
                .get_section(&key)
                .map_err(|_| anyhow!("Configuration key '{key}' not found"))?;
            match value {
                serde_json::Value::String(s) => println!("{s}"),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    println!("{}", serde_json::to_string_pretty(&value)?)
                }
                other => println!("{other}"),
            }
        }
        ConfigCommand::Validate => {
            // Resolving the strategy checks every parallel setting
            let strategy = ExecutionStrategy::from_config(&config)?;
            output.success(&format!(
                "Configuration is valid (parallelism {})",
                strategy.parallelism()
            ));
        }
    }

    Ok(())
}
