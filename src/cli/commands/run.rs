use anyhow::{Result, bail};
use clap::Args;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::output::Output;
use crate::cli::plan::Plan;
use crate::config::{ExecutorConfig, StrategyKind};
use crate::executor::ExecutionStrategy;
use crate::lock::LockManager;
use crate::task::{ExecutionRecorder, ExecutionSummary, TaskHandle};

#[derive(Args)]
pub struct RunArgs {
    /// Plan file describing the task tree (TOML)
    pub plan: PathBuf,

    /// Use a fixed parallelism instead of the configured strategy
    #[arg(short = 'p', long)]
    pub parallelism: Option<usize>,

    /// Run every task on the calling thread
    #[arg(long, conflicts_with_all = ["parallelism", "strategy"])]
    pub sequential: bool,

    /// Parallelism strategy: dynamic or fixed
    #[arg(long)]
    pub strategy: Option<StrategyKind>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl RunArgs {
    /// Command line flags as configuration overrides
    fn overrides(&self) -> Value {
        let mut config = Map::new();
        if let Some(strategy) = self.strategy {
            config.insert("strategy".into(), json!(strategy));
        }
        if let Some(parallelism) = self.parallelism {
            config.insert("strategy".into(), json!(StrategyKind::Fixed));
            config.insert("fixed".into(), json!({ "parallelism": parallelism }));
        }

        let mut parallel = Map::new();
        if self.sequential {
            parallel.insert("enabled".into(), json!(false));
        }
        if !config.is_empty() {
            parallel.insert("config".into(), Value::Object(config));
        }
        json!({ "parallel": parallel })
    }
}

pub fn execute(args: RunArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let json = match args.format.to_lowercase().as_str() {
        "json" => true,
        "text" => false,
        other => bail!("Unsupported format: {other}. Use text or json"),
    };

    let plan = Plan::load(&args.plan)?;
    let config = ExecutorConfig::load(custom_config, Some(args.overrides()))?;
    let strategy = ExecutionStrategy::from_config(&config)?;

    if !json {
        output.info(&format!(
            "Running {} tasks from {} ({})",
            plan.node_count(),
            args.plan.display(),
            describe(&strategy)
        ));
    }

    let executor = strategy.create_service()?;
    let recorder = Arc::new(ExecutionRecorder::new());
    let manager = LockManager::new();
    let root = plan.build(&manager, recorder.clone());

    let outcome = executor.submit(root).and_then(TaskHandle::join);
    executor.close();
    let summary = recorder.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, output);
    }

    if let Err(error) = outcome {
        let failed = error.leaf_failures().len();
        bail!("{failed} task(s) failed");
    }
    Ok(())
}

fn describe(strategy: &ExecutionStrategy) -> String {
    match strategy {
        ExecutionStrategy::Sequential => "sequential".to_string(),
        ExecutionStrategy::Parallel { configuration, .. } => {
            format!("parallelism {}", configuration.parallelism())
        }
    }
}

fn print_summary(summary: &ExecutionSummary, output: &Output) {
    output.header("Execution summary");
    output.key_value("Tasks", &summary.total.to_string(), false);
    output.key_value("Succeeded", &summary.succeeded.to_string(), summary.is_success());
    output.key_value("Failed", &summary.failed.len().to_string(), false);
    output.key_value("Peak concurrency", &summary.peak_concurrency.to_string(), false);
    output.key_value("Threads", &summary.threads.to_string(), false);
    output.key_value("Elapsed", &format!("{:?}", summary.elapsed()), false);

    if summary.is_success() {
        output.success("All tasks passed");
        return;
    }
    output.error("Failed tasks:");
    for failed in &summary.failed {
        output.failure_item(&failed.name, &failed.error);
        output.verbose(&format!("{} ran on {}", failed.name, failed.thread));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parallelism: Option<usize>, sequential: bool, strategy: Option<StrategyKind>) -> RunArgs {
        RunArgs {
            plan: PathBuf::from("plan.toml"),
            parallelism,
            sequential,
            strategy,
            format: "text".to_string(),
        }
    }

    #[test]
    fn test_parallelism_flag_selects_fixed_strategy() {
        let overrides = args(Some(3), false, None).overrides();
        assert_eq!(overrides["parallel"]["config"]["strategy"], "fixed");
        assert_eq!(overrides["parallel"]["config"]["fixed"]["parallelism"], 3);
    }

    #[test]
    fn test_sequential_flag_disables_parallelism() {
        let overrides = args(None, true, None).overrides();
        assert_eq!(overrides["parallel"]["enabled"], false);
        assert!(overrides["parallel"].get("config").is_none());
    }

    #[test]
    fn test_no_flags_no_overrides() {
        let overrides = args(None, false, None).overrides();
        assert_eq!(overrides, json!({ "parallel": {} }));
    }
}
