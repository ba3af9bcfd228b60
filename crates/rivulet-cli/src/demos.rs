//! Built-in workflows for trying the engine from the command line.
//!
//! - `chain`: greeting -> shout -> exclaim
//! - `fanout`: seed -> {square, cube, double} -> total
//! - `counter`: a self-looping counter plus a step reading each count

use std::time::Duration;

use clap::ValueEnum;
use rivulet_core::workflow::step::StepResult;
use rivulet_core::workflow::{Parameter, StepError, StepInputs, StepSpec, Workflow, WorkflowError};
use rivulet_types::value::ValueType;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    Chain,
    Fanout,
    Counter,
}

impl Demo {
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        match self {
            Demo::Chain => chain(),
            Demo::Fanout => fanout(),
            Demo::Counter => counter(),
        }
    }

    /// Step whose value is the demo's result.
    pub fn default_target(self) -> &'static str {
        match self {
            Demo::Chain => "exclaim",
            Demo::Fanout => "total",
            Demo::Counter => "count",
        }
    }
}

// ---------------------------------------------------------------------------
// chain
// ---------------------------------------------------------------------------

fn chain() -> Result<Workflow, WorkflowError> {
    Workflow::builder("chain")
        .step(
            StepSpec::new("greeting")
                .param(Parameter::input("name", ValueType::String).with_default(json!("world")))
                .output(ValueType::String)
                .handler(greeting),
        )
        .step(
            StepSpec::new("shout")
                .param(Parameter::from_step("text", ValueType::String, "greeting"))
                .output(ValueType::String)
                .handler(shout),
        )
        .step(
            StepSpec::new("exclaim")
                .param(Parameter::from_step("text", ValueType::String, "shout"))
                .output(ValueType::String)
                .handler(exclaim),
        )
        .build()
}

async fn greeting(inputs: StepInputs) -> StepResult {
    let name: String = inputs.parse("name")?;
    Ok(Some(json!(format!("hello {name}"))))
}

async fn shout(inputs: StepInputs) -> StepResult {
    let text: String = inputs.parse("text")?;
    Ok(Some(json!(text.to_uppercase())))
}

async fn exclaim(inputs: StepInputs) -> StepResult {
    let text: String = inputs.parse("text")?;
    Ok(Some(json!(format!("{text}!"))))
}

// ---------------------------------------------------------------------------
// fanout
// ---------------------------------------------------------------------------

fn fanout() -> Result<Workflow, WorkflowError> {
    let branch = |name: &str, power: u32| {
        StepSpec::new(name)
            .param(Parameter::from_step("n", ValueType::Integer, "seed"))
            .output(ValueType::Integer)
            .handler(move |inputs: StepInputs| async move {
                let n: i64 = inputs.parse("n")?;
                // Long enough for the branches to visibly overlap.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, StepError>(Some(json!(n.pow(power))))
            })
    };

    Workflow::builder("fanout")
        .step(
            StepSpec::new("seed")
                .param(Parameter::input("n", ValueType::Integer).with_default(json!(3)))
                .output(ValueType::Integer)
                .handler(seed),
        )
        .step(branch("double", 1))
        .step(branch("square", 2))
        .step(branch("cube", 3))
        .step(
            StepSpec::new("total")
                .param(Parameter::from_step("double", ValueType::Integer, "double"))
                .param(Parameter::from_step("square", ValueType::Integer, "square"))
                .param(Parameter::from_step("cube", ValueType::Integer, "cube"))
                .output(ValueType::Integer)
                .handler(total),
        )
        .build()
}

async fn seed(inputs: StepInputs) -> StepResult {
    let n: i64 = inputs.parse("n")?;
    Ok(Some(json!(n)))
}

async fn total(inputs: StepInputs) -> StepResult {
    let double: i64 = inputs.parse("double")?;
    let square: i64 = inputs.parse("square")?;
    let cube: i64 = inputs.parse("cube")?;
    Ok(Some(json!(2 * double + square + cube)))
}

// ---------------------------------------------------------------------------
// counter
// ---------------------------------------------------------------------------

fn counter() -> Result<Workflow, WorkflowError> {
    Workflow::builder("counter")
        .step(
            StepSpec::new("count")
                .param(Parameter::feedback("prev", ValueType::Integer, json!(0)))
                .param(Parameter::input("limit", ValueType::Integer).with_default(json!(5)))
                .output(ValueType::Integer)
                .handler(count),
        )
        .step(
            StepSpec::new("parity")
                .param(Parameter::from_step("n", ValueType::Integer, "count"))
                .output(ValueType::String)
                .handler(parity),
        )
        .build()
}

async fn count(inputs: StepInputs) -> StepResult {
    let prev: i64 = inputs.parse("prev")?;
    let limit: i64 = inputs.parse("limit")?;
    Ok((prev < limit).then(|| json!(prev + 1)))
}

async fn parity(inputs: StepInputs) -> StepResult {
    let n: i64 = inputs.parse("n")?;
    let label = if n % 2 == 0 { "even" } else { "odd" };
    Ok(Some(json!(label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::workflow::{Engine, RunOptions, StepRun};
    use rivulet_types::value::Variable;
    use std::sync::Arc;

    #[tokio::test]
    async fn chain_demo_produces_greeting() {
        let wf = Arc::new(Demo::Chain.build().unwrap());
        let value = Engine::default()
            .run_to_target(wf, "exclaim", vec![], RunOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.value, json!("HELLO WORLD!"));
    }

    #[tokio::test]
    async fn chain_demo_uses_supplied_name() {
        let wf = Arc::new(Demo::Chain.build().unwrap());
        let value = Engine::default()
            .run_to_target(
                wf,
                "exclaim",
                vec![Variable::initial("name", json!("rust"))],
                RunOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.value, json!("HELLO RUST!"));
    }

    #[tokio::test]
    async fn fanout_demo_joins_branches() {
        let wf = Arc::new(Demo::Fanout.build().unwrap());
        let value = Engine::default()
            .run_to_target(wf, "total", vec![], RunOptions::default())
            .await
            .unwrap()
            .unwrap();
        // 2*3 + 9 + 27
        assert_eq!(value.value, json!(42));
    }

    #[tokio::test]
    async fn counter_demo_counts_to_limit() {
        let wf = Arc::new(Demo::Counter.build().unwrap());
        let records = Engine::default()
            .collect(
                wf,
                None,
                vec![Variable::initial("limit", json!(3))],
                RunOptions::default(),
            )
            .await
            .unwrap();

        let counts: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                StepRun::Completed {
                    run,
                    value: Some(v),
                } if run.step == "count" => Some(v.value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![json!(1), json!(2), json!(3)]);

        let parities = records
            .iter()
            .filter(|r| r.step_name() == "parity" && r.value().is_some())
            .count();
        assert_eq!(parities, 3);
    }

    #[test]
    fn every_demo_builds_and_has_its_target() {
        for demo in Demo::value_variants() {
            let wf = demo.build().unwrap();
            assert!(wf.contains(demo.default_target()), "{demo:?}");
        }
    }
}
