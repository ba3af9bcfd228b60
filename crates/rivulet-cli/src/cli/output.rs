//! Terminal rendering of run records.

use std::path::Path;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use rivulet_core::workflow::StepRun;
use serde_json::Value;

/// Per-step totals over a slice of records.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub step: String,
    pub runs: usize,
    pub failures: usize,
    /// Status of the step's most recent record.
    pub last_status: &'static str,
    /// Value of the highest-generation completion.
    pub last_value: Option<Value>,
}

/// Summaries in order of first appearance. `Variable` records are skipped.
pub fn summarize(records: &[StepRun]) -> Vec<StepSummary> {
    let mut summaries: Vec<StepSummary> = Vec::new();
    let mut best_generation: Vec<u64> = Vec::new();

    for record in records {
        if matches!(record, StepRun::Variable(_)) {
            continue;
        }
        let idx = match summaries.iter().position(|s| s.step == record.step_name()) {
            Some(idx) => idx,
            None => {
                summaries.push(StepSummary {
                    step: record.step_name().to_string(),
                    runs: 0,
                    failures: 0,
                    last_status: record.status(),
                    last_value: None,
                });
                best_generation.push(0);
                summaries.len() - 1
            }
        };

        let summary = &mut summaries[idx];
        summary.last_status = record.status();
        match record {
            StepRun::Completed { value, .. } => {
                summary.runs += 1;
                if let Some(v) = value {
                    if summary.last_value.is_none() || v.generation > best_generation[idx] {
                        best_generation[idx] = v.generation;
                        summary.last_value = Some(v.value.clone());
                    }
                }
            }
            StepRun::Failed { .. } => {
                summary.runs += 1;
                summary.failures += 1;
            }
            _ => {}
        }
    }
    summaries
}

pub fn print_run_header(workflow: &str, run_id: &str) {
    println!();
    println!(
        "  {} Running workflow '{}' (run {})",
        style("*").green().bold(),
        style(workflow).cyan(),
        style(&run_id[..8.min(run_id.len())]).dim()
    );
    println!();
}

/// Print one record: a JSON line in `json` mode, a styled line otherwise.
pub fn print_record(record: &StepRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
        return Ok(());
    }

    let label = format!("{:<10}", record.status());
    let label = match record {
        StepRun::Queued(_) => style(label).dim(),
        StepRun::Running(_) => style(label).cyan(),
        StepRun::Completed { .. } => style(label).green(),
        StepRun::Failed { .. } => style(label).red(),
        StepRun::NotReady { .. } => style(label).yellow(),
        StepRun::Variable(_) => style(label).blue(),
    };

    let detail = match record {
        StepRun::Queued(info) if !info.inputs.is_empty() => {
            style(serde_json::to_string(&info.inputs)?).dim().to_string()
        }
        StepRun::Completed {
            value: Some(value), ..
        } => serde_json::to_string(&value.value)?,
        StepRun::Completed { value: None, .. } => style("(no value)").dim().to_string(),
        StepRun::Failed { error, .. } => style(&error.message).red().to_string(),
        StepRun::Variable(value) => serde_json::to_string(&value.value)?,
        _ => String::new(),
    };

    println!(
        "  {label} {:<12} gen {:<4} {detail}",
        record.step_name(),
        record.generation()
    );
    Ok(())
}

pub fn print_checkpoint_saved(path: &Path) {
    println!();
    println!(
        "  {} Checkpoint saved to {}",
        style("*").green().bold(),
        style(path.display()).cyan()
    );
}

pub fn print_summary(records: &[StepRun]) {
    let summaries = summarize(records);
    if summaries.is_empty() {
        println!();
        println!("  Nothing to run.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Runs"),
            Cell::new("Failed"),
            Cell::new("Last status"),
            Cell::new("Value"),
        ]);

    for s in &summaries {
        let value = s
            .last_value
            .as_ref()
            .map(|v| v.to_string().chars().take(40).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        let failed = if s.failures > 0 {
            Cell::new(s.failures).fg(Color::Red)
        } else {
            Cell::new(s.failures)
        };
        table.add_row(vec![
            Cell::new(&s.step),
            Cell::new(s.runs),
            failed,
            Cell::new(s.last_status),
            Cell::new(value),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::workflow::{RunInfo, StepError};
    use rivulet_types::value::Variable;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn info(step: &str, generation: u64) -> RunInfo {
        RunInfo::new(step, generation, BTreeMap::new())
    }

    #[test]
    fn summarize_counts_runs_and_keeps_newest_value() {
        let records = vec![
            StepRun::Variable(Variable::initial("limit", json!(3))),
            info("count", 1).queued(),
            info("count", 1).completed(Some(json!(1))),
            info("count", 3).completed(Some(json!(2))),
            // Stale completion reported late.
            info("count", 2).completed(Some(json!(99))),
            StepRun::not_ready("parity", 1),
            info("parity", 4).failed(StepError::MissingInput("n".into())),
        ];

        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 2);

        let count = &summaries[0];
        assert_eq!(count.step, "count");
        assert_eq!(count.runs, 3);
        assert_eq!(count.failures, 0);
        assert_eq!(count.last_value, Some(json!(2)));

        let parity = &summaries[1];
        assert_eq!(parity.runs, 1);
        assert_eq!(parity.failures, 1);
        assert_eq!(parity.last_status, "failed");
        assert!(parity.last_value.is_none());
    }

    #[test]
    fn summarize_skips_variable_only_steps() {
        let records = vec![StepRun::Variable(Variable::initial("a", json!(1)))];
        assert!(summarize(&records).is_empty());
    }
}
