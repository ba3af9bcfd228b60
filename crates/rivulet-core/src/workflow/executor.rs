//! Workflow engine: bounded worker pool plus one coordinating loop.
//!
//! `Engine::run` resolves the relevant steps, then returns a stream whose
//! generator is the coordinator. It owns every piece of mutable run state
//! (the generation counter, the outstanding-work count, the record history)
//! and is the only writer of the run context.
//!
//! # Execution flow
//!
//! 1. Emit every initial value as a `Variable` record.
//! 2. Seed: each resolved step without a value is `Queued` at generation G
//!    (one past the highest initial generation) if ready, else `NotReady`.
//! 3. Workers pull tasks FIFO, check the generation invariant, report
//!    `Running`, execute, and report `Completed` or `Failed`.
//! 4. On a completion with a value, write it to the context (if not stale)
//!    and queue every ready successor at a fresh generation.
//! 5. End when nothing is outstanding, the stop strategy fires, the run is
//!    cancelled, or the stream is dropped.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{FutureExt, Stream, StreamExt, TryStreamExt};
use rivulet_types::config::EngineConfig;
use rivulet_types::value::{ParamSource, Variable};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::effective_concurrency;

use super::context::{ContextView, RunContext};
use super::dag::{resolve, resolve_all};
use super::definition::{Workflow, WorkflowError};
use super::run::{RunInfo, StepRun};
use super::step::{Step, StepError, StepInputs};
use super::stop::{MaxSteps, NeverStop, Pipeline, StopStrategy, TargetReached};

/// Stream of records produced by one run.
pub type RunStream = Pin<Box<dyn Stream<Item = Result<StepRun, EngineError>> + Send + 'static>>;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors that prevent a run from starting or abort it.
///
/// Step failures are not engine errors; they are `Failed` records.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow could not be resolved (cycle, unknown target).
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// A worker dequeued a run whose generation is already superseded in the
    /// context. The run is aborted.
    #[error(
        "step '{step}' dequeued at generation {generation} but the context already holds generation {current}"
    )]
    GenerationSuperseded {
        step: String,
        generation: u64,
        current: u64,
    },

    /// Arguments passed to `call_step` do not fit the step.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-run knobs.
#[derive(Clone)]
pub struct RunOptions {
    /// Worker count. 0 is treated as 1.
    pub max_concurrency: usize,
    /// Evaluated after every emitted record. `None` never stops.
    pub stop: Option<Arc<dyn StopStrategy>>,
    /// Cancels the run, and is handed to every step handler.
    pub cancel: CancellationToken,
    /// Identifier used in logs and checkpoints.
    pub run_id: Uuid,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RunOptions {
    /// Options derived from configuration: worker count, plus a `MaxSteps`
    /// cap when `max_steps` is set.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrency: effective_concurrency(config.max_concurrency),
            stop: config
                .max_steps
                .map(|n| Arc::new(MaxSteps(n)) as Arc<dyn StopStrategy>),
            cancel: CancellationToken::new(),
            run_id: Uuid::now_v7(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Replace the stop strategy.
    pub fn with_stop(self, strategy: impl StopStrategy + 'static) -> Self {
        self.with_stop_arc(Arc::new(strategy))
    }

    pub fn with_stop_arc(mut self, strategy: Arc<dyn StopStrategy>) -> Self {
        self.stop = Some(strategy);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("stop", &self.stop.is_some())
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs workflows. Holds only defaults; every run owns its own state, so one
/// engine can drive any number of concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    defaults: EngineConfig,
}

impl Engine {
    pub fn new(defaults: EngineConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &EngineConfig {
        &self.defaults
    }

    /// Fresh run options built from this engine's defaults.
    pub fn options(&self) -> RunOptions {
        RunOptions::from_config(&self.defaults)
    }

    /// Start a run.
    ///
    /// `target` restricts the run to the steps needed for that step; `None`
    /// runs every step. Resolution errors are returned immediately. Workers
    /// are spawned when the stream is first polled.
    pub fn run(
        &self,
        workflow: Arc<Workflow>,
        target: Option<&str>,
        initial: Vec<Variable>,
        options: RunOptions,
    ) -> Result<RunStream, EngineError> {
        let resolved = match target {
            Some(target) => resolve(&workflow, target)?,
            None => resolve_all(&workflow)?,
        };

        let RunOptions {
            max_concurrency,
            stop,
            cancel,
            run_id,
        } = options;
        let concurrency = effective_concurrency(max_concurrency);
        let stop: Arc<dyn StopStrategy> = stop.unwrap_or_else(|| Arc::new(NeverStop));
        let context = RunContext::from_initial(initial);

        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name(),
            target = target.unwrap_or("*"),
            steps = resolved.len(),
            initial = context.len(),
            concurrency,
            "starting run"
        );

        let mut scheduler = Scheduler::new(workflow, resolved, context.clone(), run_id);

        let stream = try_stream! {
            let halt = cancel.child_token();
            let _halt_on_drop = halt.clone().drop_guard();

            let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();
            let task_rx = Arc::new(Mutex::new(task_rx));
            let workers: Vec<JoinHandle<()>> = (0..concurrency)
                .map(|id| {
                    tokio::spawn(worker(
                        id,
                        Arc::clone(&task_rx),
                        event_tx.clone(),
                        context.clone(),
                        halt.clone(),
                        cancel.clone(),
                        run_id,
                    ))
                })
                .collect();
            drop(event_tx);

            let mut history: Vec<StepRun> = Vec::new();
            let mut outstanding = 0usize;
            let mut batch = scheduler.seed();
            let mut drained = false;

            'run: loop {
                while let Some(Pending { record, task }) = batch.pop_front() {
                    if cancel.is_cancelled() {
                        tracing::info!(run_id = %run_id, outstanding, "run cancelled");
                        break 'run;
                    }
                    history.push(record.clone());
                    yield record;

                    if stop.should_stop(&history) {
                        tracing::info!(
                            run_id = %run_id,
                            records = history.len(),
                            "stop strategy fired"
                        );
                        break 'run;
                    }
                    // Cancelled while the consumer held the record.
                    if cancel.is_cancelled() {
                        tracing::info!(run_id = %run_id, outstanding, "run cancelled");
                        break 'run;
                    }
                    if let Some(task) = task {
                        if task_tx.send(task).is_err() {
                            break 'run;
                        }
                        outstanding += 1;
                    }
                }

                if outstanding == 0 {
                    drained = true;
                    break;
                }

                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(run_id = %run_id, outstanding, "run cancelled");
                        break 'run;
                    }
                    event = event_rx.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };

                match event {
                    WorkerEvent::Started(info) => batch.push_back(Pending::emit(info.running())),
                    WorkerEvent::Finished(record) => {
                        outstanding -= 1;
                        let produced = match &record {
                            StepRun::Completed { value: Some(v), .. } => Some(v.clone()),
                            _ => None,
                        };
                        batch.push_back(Pending::emit(record));
                        if let Some(variable) = produced {
                            batch.extend(scheduler.on_completed(variable));
                        }
                    }
                    WorkerEvent::Violation(err) => {
                        tracing::error!(run_id = %run_id, error = %err, "invariant violation");
                        Err::<(), EngineError>(err)?;
                    }
                }
            }

            if drained {
                drop(task_tx);
                for handle in workers {
                    if let Err(err) = handle.await {
                        tracing::warn!(run_id = %run_id, "worker task failed: {err}");
                    }
                }
                tracing::info!(run_id = %run_id, records = history.len(), "run finished");
            } else {
                halt.cancel();
            }
        };

        Ok(Box::pin(stream))
    }

    /// Run to completion and return every record.
    pub async fn collect(
        &self,
        workflow: Arc<Workflow>,
        target: Option<&str>,
        initial: Vec<Variable>,
        options: RunOptions,
    ) -> Result<Vec<StepRun>, EngineError> {
        self.run(workflow, target, initial, options)?
            .try_collect()
            .await
    }

    /// Run until `target` produces a value and return it.
    ///
    /// `TargetReached(target)` is OR-ed with the caller's strategy. If the
    /// target already has a value in `initial`, that value is returned.
    /// Returns `None` when the run ends without the target producing.
    pub async fn run_to_target(
        &self,
        workflow: Arc<Workflow>,
        target: &str,
        initial: Vec<Variable>,
        mut options: RunOptions,
    ) -> Result<Option<Variable>, EngineError> {
        let mut pipeline = Pipeline::new();
        if let Some(stop) = options.stop.take() {
            pipeline = pipeline.with_arc(stop);
        }
        let options = options.with_stop(pipeline.with(TargetReached::new(target)));

        let mut stream = self.run(workflow, Some(target), initial, options)?;
        while let Some(record) = stream.next().await {
            match record? {
                StepRun::Completed {
                    run,
                    value: Some(value),
                } if run.step == target => return Ok(Some(value)),
                StepRun::Variable(value) if value.name == target => return Ok(Some(value)),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Invoke one step from a JSON object of arguments.
    ///
    /// Each key must name a parameter of `step`. Values for `Input`
    /// parameters are supplied under the parameter name; values for
    /// step-sourced parameters stand in for the source step's output, so
    /// that step is not run. Feedback parameters cannot be supplied.
    pub async fn call_step(
        &self,
        workflow: Arc<Workflow>,
        step: &str,
        args: Value,
    ) -> Result<Option<Variable>, EngineError> {
        let Value::Object(args) = args else {
            return Err(EngineError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            ));
        };
        let target = workflow
            .get(step)
            .ok_or_else(|| WorkflowError::UnknownStep(step.to_string()))?;

        let mut initial = Vec::with_capacity(args.len());
        for (key, value) in args {
            let param = target
                .parameters()
                .iter()
                .find(|p| p.name == key)
                .ok_or_else(|| {
                    EngineError::InvalidArguments(format!("step '{step}' has no parameter '{key}'"))
                })?;
            let name = match &param.source {
                ParamSource::Input => key,
                ParamSource::Step { step: source } => source.clone(),
                ParamSource::Feedback => {
                    return Err(EngineError::InvalidArguments(format!(
                        "parameter '{key}' of step '{step}' is fed back and cannot be supplied"
                    )));
                }
            };
            initial.push(Variable::initial(name, value));
        }

        tracing::debug!(step, arguments = initial.len(), "calling step");
        self.run_to_target(workflow, step, initial, self.options())
            .await
    }
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// A dequeued unit of work.
#[derive(Debug)]
struct Task {
    step: Arc<Step>,
    info: RunInfo,
}

/// A record waiting to be emitted, with the task to dispatch once it is.
struct Pending {
    record: StepRun,
    task: Option<Task>,
}

impl Pending {
    fn emit(record: StepRun) -> Self {
        Self { record, task: None }
    }
}

#[derive(Debug)]
enum WorkerEvent {
    Started(RunInfo),
    Finished(StepRun),
    Violation(EngineError),
}

/// Coordinator-owned run state.
struct Scheduler {
    workflow: Arc<Workflow>,
    resolved: Vec<Arc<Step>>,
    members: HashSet<String>,
    context: RunContext,
    next_generation: u64,
    run_id: Uuid,
}

impl Scheduler {
    fn new(
        workflow: Arc<Workflow>,
        resolved: Vec<Arc<Step>>,
        context: RunContext,
        run_id: Uuid,
    ) -> Self {
        let members = resolved.iter().map(|s| s.name().to_string()).collect();
        Self {
            workflow,
            resolved,
            members,
            context,
            next_generation: 0,
            run_id,
        }
    }

    /// Initial batch: every initial value, then every resolved step that has
    /// no value yet, queued or not-ready at one shared generation.
    fn seed(&mut self) -> VecDeque<Pending> {
        let mut batch: VecDeque<Pending> = self
            .context
            .snapshot()
            .into_iter()
            .map(|v| Pending::emit(StepRun::Variable(v)))
            .collect();

        let generation = self.context.max_generation() + 1;
        self.next_generation = generation + 1;

        for step in &self.resolved {
            if self.context.contains(step.name()) {
                continue;
            }
            batch.push_back(self.schedule(step, generation, &self.context));
        }
        batch
    }

    /// Apply a produced value and return the successors it makes eligible.
    fn on_completed(&mut self, variable: Variable) -> Vec<Pending> {
        let name = variable.name.clone();
        let generation = variable.generation;
        if !self.context.try_update(variable) {
            tracing::warn!(
                run_id = %self.run_id,
                step = name.as_str(),
                generation,
                current = ?self.context.generation_of(&name),
                "stale completion not written to context"
            );
            return Vec::new();
        }

        let mut successors: Vec<Arc<Step>> = self
            .workflow
            .successors_of(&name)
            .into_iter()
            .filter(|s| self.members.contains(s.name()))
            .collect();
        if let Some(pos) = successors.iter().position(|s| s.name() == name) {
            let own = successors.remove(pos);
            successors.push(own);
        }

        let first = self.next_generation;
        self.next_generation += successors.len() as u64;

        let excluded = self.workflow.dependents_of(&name);
        let view = self.context.without(&excluded);
        successors
            .iter()
            .zip(first..)
            .map(|(step, generation)| self.schedule(step, generation, &view))
            .collect()
    }

    fn schedule<C: ContextView + ?Sized>(
        &self,
        step: &Arc<Step>,
        generation: u64,
        view: &C,
    ) -> Pending {
        if !step.is_ready(view) {
            tracing::debug!(
                run_id = %self.run_id,
                step = step.name(),
                generation,
                "step not ready"
            );
            return Pending::emit(StepRun::not_ready(step.name(), generation));
        }

        tracing::debug!(
            run_id = %self.run_id,
            step = step.name(),
            generation,
            "queueing step"
        );
        let info = RunInfo::new(step.name(), generation, step.resolve_inputs(view));
        Pending {
            record: info.clone().queued(),
            task: Some(Task {
                step: Arc::clone(step),
                info,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker(
    id: usize,
    tasks: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    context: RunContext,
    halt: CancellationToken,
    cancel: CancellationToken,
    run_id: Uuid,
) {
    loop {
        let task = {
            let mut queue = tokio::select! {
                _ = halt.cancelled() => break,
                queue = tasks.lock() => queue,
            };
            let task = tokio::select! {
                _ = halt.cancelled() => break,
                task = queue.recv() => task,
            };
            let Some(task) = task else {
                break;
            };
            if halt.is_cancelled() {
                break;
            }

            // Checked before releasing the queue so dequeue order and the
            // check agree.
            match context.generation_of(&task.info.step) {
                Some(current) if current >= task.info.generation => {
                    let _ = events.send(WorkerEvent::Violation(EngineError::GenerationSuperseded {
                        step: task.info.step.clone(),
                        generation: task.info.generation,
                        current,
                    }));
                    break;
                }
                _ => task,
            }
        };

        let Task { step, info } = task;
        if events.send(WorkerEvent::Started(info.clone())).is_err() {
            break;
        }

        let span = tracing::info_span!(
            "step",
            run_id = %run_id,
            step = info.step.as_str(),
            generation = info.generation,
            worker = id,
        );
        let inputs = StepInputs::new(info.inputs.clone()).with_cancellation(cancel.child_token());
        let outcome = AssertUnwindSafe(step.execute(inputs))
            .catch_unwind()
            .instrument(span)
            .await;

        let record = match outcome {
            Ok(Ok(value)) => info.completed(value),
            Ok(Err(err)) => {
                tracing::debug!(run_id = %run_id, step = step.name(), error = %err, "step failed");
                info.failed(err)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(run_id = %run_id, step = step.name(), "step panicked: {message}");
                info.failed(StepError::Panicked(message))
            }
        };

        if events.send(WorkerEvent::Finished(record)).is_err() {
            break;
        }
    }
    tracing::trace!(run_id = %run_id, worker = id, "worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
