//! `rivulet call`: invoke one step the way a tool caller would.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use rivulet_core::workflow::Engine;
use rivulet_types::config::EngineConfig;
use serde_json::Value;

use crate::demos::Demo;

pub async fn handle_call(
    demo: Demo,
    step: &str,
    args: &str,
    config: &EngineConfig,
    json: bool,
) -> Result<()> {
    let args: Value = serde_json::from_str(args).context("arguments must be valid JSON")?;
    let workflow = Arc::new(demo.build().context("failed to build workflow")?);

    let value = Engine::new(config.clone())
        .call_step(workflow, step, args)
        .await
        .with_context(|| format!("failed to call step '{step}'"))?;

    if json {
        let out = serde_json::json!({
            "step": step,
            "value": value.as_ref().map(|v| &v.value),
            "generation": value.as_ref().map(|v| v.generation),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match value {
        Some(v) => println!(
            "  {} {} = {}",
            style("*").green().bold(),
            style(step).cyan(),
            v.value
        ),
        None => println!(
            "  {} {} produced no value",
            style("!").yellow().bold(),
            style(step).cyan()
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_accepts_arguments_for_a_step() {
        let config = EngineConfig::default();
        handle_call(Demo::Chain, "shout", r#"{"text": "hi"}"#, &config, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn call_rejects_bad_arguments() {
        let config = EngineConfig::default();
        let err = handle_call(Demo::Chain, "shout", "not json", &config, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("valid JSON"), "got: {err}");

        let err = handle_call(Demo::Chain, "missing", "{}", &config, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"), "got: {err}");
    }
}
