//! `rivulet describe`: list the steps of a workflow.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use rivulet_core::workflow::{Parameter, Workflow};
use rivulet_types::value::ParamSource;

use crate::demos::Demo;

/// One-line rendering of a parameter, e.g. `text: string <- shout`.
pub fn format_parameter(param: &Parameter) -> String {
    let source = match &param.source {
        ParamSource::Input => "input".to_string(),
        ParamSource::Step { step } => step.clone(),
        ParamSource::Feedback => "self".to_string(),
    };
    let mut out = format!("{}: {} <- {}", param.name, param.value_type, source);
    if let Some(default) = &param.default {
        out.push_str(&format!(" = {default}"));
    }
    out
}

pub fn handle_describe(demo: Demo, json: bool) -> Result<()> {
    let workflow = demo.build().context("failed to build workflow")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&describe_json(&workflow))?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Parameters"),
            Cell::new("Depends on"),
            Cell::new("Output"),
        ]);

    for step in workflow.steps() {
        let params: Vec<String> = step.parameters().iter().map(format_parameter).collect();
        let deps = if step.dependencies().is_empty() {
            "-".to_string()
        } else {
            step.dependencies().join(", ")
        };
        table.add_row(vec![
            Cell::new(step.name()),
            Cell::new(if params.is_empty() { "-".to_string() } else { params.join("\n") }),
            Cell::new(deps),
            Cell::new(step.output_type()),
        ]);
    }

    println!();
    println!(
        "  Workflow '{}' ({} steps, target '{}')",
        style(workflow.name()).cyan(),
        workflow.len(),
        demo.default_target()
    );
    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn describe_json(workflow: &Workflow) -> serde_json::Value {
    let steps: Vec<_> = workflow
        .steps()
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name(),
                "parameters": s.parameters(),
                "dependencies": s.dependencies(),
                "output": s.output_type(),
            })
        })
        .collect();
    serde_json::json!({ "workflow": workflow.name(), "steps": steps })
}
