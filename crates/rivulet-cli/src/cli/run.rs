//! `rivulet run`: stream a workflow run and optionally checkpoint it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use futures_util::StreamExt;
use rivulet_core::workflow::{Checkpoint, Engine, MaxSteps};
use rivulet_types::config::EngineConfig;
use rivulet_types::value::Variable;
use serde_json::Value;

use super::output;
use crate::demos::Demo;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Built-in workflow to run.
    #[arg(long, value_enum, default_value = "chain")]
    pub demo: Demo,

    /// Only run the steps needed for this one (default: every step).
    #[arg(long)]
    pub target: Option<String>,

    /// Number of steps allowed to execute at once.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Stop after this many step executions have finished.
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Initial value as NAME=VALUE (repeatable). VALUE is parsed as JSON,
    /// falling back to a plain string.
    #[arg(long = "input", value_name = "NAME=VALUE", value_parser = parse_input)]
    pub inputs: Vec<(String, Value)>,

    /// Save the run's records to this file.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Continue from the values already recorded in --checkpoint.
    #[arg(long, requires = "checkpoint")]
    pub resume: bool,
}

/// Parse a `NAME=VALUE` pair.
pub fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub async fn handle_run(args: RunArgs, config: &EngineConfig, json: bool, quiet: bool) -> Result<()> {
    let workflow = Arc::new(args.demo.build().context("failed to build workflow")?);
    let engine = Engine::new(config.clone());

    let mut options = engine.options();
    if let Some(n) = args.max_concurrency {
        options = options.with_max_concurrency(n);
    }
    if let Some(n) = args.max_steps {
        options = options.with_stop(MaxSteps(n));
    }

    let mut checkpoint = match (&args.checkpoint, args.resume) {
        (Some(path), true) => {
            let loaded = Checkpoint::load(path)
                .await
                .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
            if loaded.workflow != workflow.name() {
                bail!(
                    "checkpoint belongs to workflow '{}', not '{}'",
                    loaded.workflow,
                    workflow.name()
                );
            }
            loaded
        }
        _ => Checkpoint::new(workflow.name(), options.run_id),
    };
    checkpoint.run_id = options.run_id;

    // Command-line inputs come first so they win over recorded values of the
    // same generation.
    let mut initial: Vec<Variable> = args
        .inputs
        .into_iter()
        .map(|(name, value)| Variable::initial(name, value))
        .collect();
    initial.extend(checkpoint.initial_values());

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if !json && !quiet {
        output::print_run_header(workflow.name(), &checkpoint.run_id.to_string());
    }

    let first_record = checkpoint.records.len();
    let mut stream = engine.run(
        Arc::clone(&workflow),
        args.target.as_deref(),
        initial,
        options,
    )?;

    let mut failure = None;
    while let Some(record) = stream.next().await {
        match record {
            Ok(record) => {
                if !quiet {
                    output::print_record(&record, json)?;
                }
                checkpoint.record(record);
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if let Some(path) = &args.checkpoint {
        checkpoint
            .save(path)
            .await
            .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
        if !json && !quiet {
            output::print_checkpoint_saved(path);
        }
    }

    if let Some(err) = failure {
        return Err(err).context("run aborted");
    }

    if !json && !quiet {
        output::print_summary(&checkpoint.records[first_record..]);
    }

    Ok(())
}
