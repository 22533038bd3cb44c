//! Step executor
//!
//! Drives one collection run over one MCP session: connect and handshake,
//! run the steps strictly in order, then always disconnect. Failures of a
//! single step are recorded on its outcome and the run continues; only a
//! lost connection (or fail-fast) skips what is left.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;

use crate::common::config::{ClientIdentity, Settings};
use crate::common::{Error, Result};
use crate::mcp::transport::{create_transport, Transport};
use crate::mcp::Session;

use super::assertions::{evaluate, AssertOp};
use super::config::{AssertStep, Collection, Step, StepKind, ToolCallStep};
use super::interpolate::EnvSnapshot;
use super::report::{AssertionDetail, RunReport, RunStatus, ServerSummary, StepOutcome, StepStatus};
use super::validate::{validate, Purpose};

/// Step id recorded when the session could not be established
pub const HANDSHAKE_STEP_ID: &str = "_handshake";

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Connecting,
    Running,
    Disconnecting,
    Finished(RunStatus),
}

/// Values saved by tool call steps, keyed by step id
///
/// Each id can be written once.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn insert(&mut self, id: &str, value: Value) -> Result<()> {
        if self.values.contains_key(id) {
            return Err(Error::Internal(format!(
                "Value for step '{}' was already saved",
                id
            )));
        }
        self.values.insert(id.to_string(), value);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }
}

/// Request to stop a run early
///
/// Triggering it lets the step in flight end as interrupted, skips the rest
/// and still disconnects from the server.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Knobs that come from the command line and settings rather than the collection
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Skip remaining steps after the first failed or errored step
    pub fail_fast: bool,
    /// Per-call timeout when neither step nor collection sets one
    pub default_timeout: Duration,
    /// Identity announced in the handshake
    pub client: ClientIdentity,
    /// Fingerprint of the collection file, copied into the report
    pub collection_hash: Option<String>,
    pub interrupt: Interrupt,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fail_fast: false,
            default_timeout: Duration::from_millis(settings.timeouts.default_timeout_ms),
            client: settings.client.clone(),
            collection_hash: None,
            interrupt: Interrupt::new(),
        }
    }
}

/// Validate a collection, connect to its server and run every step
///
/// Returns an error only when the run could not start at all (invalid
/// collection or unusable server settings). Connection and handshake
/// failures are part of the report.
pub async fn run_collection(
    collection: &Collection,
    env: &EnvSnapshot,
    settings: &Settings,
    options: &RunOptions,
) -> Result<RunReport> {
    validate(collection, env, Purpose::Run)?;

    let server = env
        .resolve_server(&collection.server)
        .map_err(|e| Error::Config(e.to_string()))?;
    let transport = create_transport(&server, settings)?;

    Ok(execute(collection, env, transport, options).await)
}

/// Run a collection over an already constructed transport
pub async fn execute(
    collection: &Collection,
    env: &EnvSnapshot,
    transport: Box<dyn Transport>,
    options: &RunOptions,
) -> RunReport {
    let started_at = Utc::now();
    let mut executor = StepExecutor::new(collection, env, options);
    let mut server = ServerSummary {
        transport: transport.kind(),
        target: transport.target(),
        identity: None,
        protocol_version: None,
    };

    executor.transition(RunPhase::Connecting);
    let connect_started = Instant::now();
    let handshake_timeout = executor.timeout_for(None);

    let connected = tokio::select! {
        connected = Session::connect(transport, &options.client, handshake_timeout) => connected,
        _ = options.interrupt.triggered() => Err(Error::Interrupted),
    };
    let mut session = match connected {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, target = %server.target, "Could not establish MCP session");
            let mut handshake =
                StepOutcome::new(HANDSHAKE_STEP_ID, StepKind::Handshake, StepStatus::Error).with_error(&e);
            handshake.duration_ms = elapsed_ms(connect_started);

            let mut steps = vec![handshake];
            steps.extend(
                collection
                    .steps
                    .iter()
                    .map(|step| StepOutcome::skipped(step.id(), step.kind(), "not connected")),
            );

            let report = RunReport::new(
                &collection.name,
                options.collection_hash.clone(),
                server,
                started_at,
                steps,
            );
            executor.transition(RunPhase::Finished(report.status));
            return report;
        }
    };
    server.identity = Some(session.server().clone());
    server.protocol_version = session.protocol_version().map(str::to_string);

    executor.transition(RunPhase::Running);
    let steps = executor.run_steps(&mut session).await;

    executor.transition(RunPhase::Disconnecting);
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Error while disconnecting from server");
    }

    let report = RunReport::new(
        &collection.name,
        options.collection_hash.clone(),
        server,
        started_at,
        steps,
    );
    executor.transition(RunPhase::Finished(report.status));
    report
}

struct StepExecutor<'a> {
    collection: &'a Collection,
    env: &'a EnvSnapshot,
    options: &'a RunOptions,
    store: VariableStore,
    phase: RunPhase,
}

impl<'a> StepExecutor<'a> {
    fn new(collection: &'a Collection, env: &'a EnvSnapshot, options: &'a RunOptions) -> Self {
        Self {
            collection,
            env,
            options,
            store: VariableStore::default(),
            phase: RunPhase::Idle,
        }
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Run phase");
        self.phase = next;
    }

    fn timeout_for(&self, step_timeout_ms: Option<u64>) -> Duration {
        step_timeout_ms
            .or(self.collection.defaults.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.options.default_timeout)
    }

    fn fail_fast(&self) -> bool {
        self.options.fail_fast || self.collection.defaults.fail_fast
    }

    async fn run_steps(&mut self, session: &mut Session) -> Vec<StepOutcome> {
        let collection = self.collection;
        let mut outcomes = Vec::with_capacity(collection.steps.len());
        let mut abort: Option<String> = None;

        for step in &collection.steps {
            if abort.is_none() && self.options.interrupt.is_triggered() {
                abort = Some("interrupted".to_string());
            }
            if let Some(reason) = &abort {
                outcomes.push(StepOutcome::skipped(step.id(), step.kind(), reason));
                continue;
            }

            tracing::info!(step = step.id(), kind = %step.kind(), "Running step");
            let outcome = match step {
                Step::ToolCall(call) => self.run_tool_call(session, call).await,
                Step::Assert(check) => self.run_assert(check),
            };
            tracing::info!(
                step = step.id(),
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                "Step finished"
            );

            if outcome.error_kind.as_deref() == Some("ConnectionError") {
                let reason = session
                    .lost_reason()
                    .unwrap_or_else(|| "server unavailable".to_string());
                tracing::error!(step = step.id(), reason = %reason, "Connection lost, skipping remaining steps");
                abort = Some(format!("connection lost: {}", reason));
            } else if outcome.error_kind.as_deref() == Some("Interrupted") {
                tracing::warn!(step = step.id(), "Run interrupted, skipping remaining steps");
                abort = Some("interrupted".to_string());
            } else if self.fail_fast() && matches!(outcome.status, StepStatus::Failed | StepStatus::Error) {
                abort = Some(format!("fail fast after step '{}'", step.id()));
            }
            outcomes.push(outcome);

            if abort.is_none() {
                if let Some(delay) = step.delay_ms().filter(|ms| *ms > 0) {
                    tracing::debug!(step = step.id(), delay_ms = delay, "Delaying before next step");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = self.options.interrupt.triggered() => {}
                    }
                }
            }
        }

        outcomes
    }

    async fn run_tool_call(&mut self, session: &mut Session, step: &ToolCallStep) -> StepOutcome {
        let started = Instant::now();
        let mut outcome = StepOutcome::new(&step.id, StepKind::ToolCall, StepStatus::Success);
        outcome.description = step.description.clone();
        outcome.tool = Some(step.tool.clone());

        let input = match self.env.interpolate_value(&step.input) {
            Ok(input) => input,
            Err(missing) => return outcome.with_error(&Error::Config(missing.to_string())),
        };
        outcome.input = Some(input.clone());

        let timeout = self.timeout_for(step.timeout_ms);
        let retries = step
            .retries
            .or(self.collection.defaults.retries)
            .unwrap_or(0);
        let max_attempts = retries.saturating_add(1);

        let result = loop {
            outcome.attempts += 1;
            let call = tokio::select! {
                result = session.call_tool(&step.tool, input.clone(), timeout) => result,
                _ = self.options.interrupt.triggered() => Err(Error::Interrupted),
            };
            match call {
                Ok(result) => break Ok(result),
                Err(e) if e.is_retryable() && outcome.attempts < max_attempts => {
                    tracing::warn!(
                        step = %step.id,
                        attempt = outcome.attempts,
                        max_attempts,
                        error = %e,
                        "Tool call failed, retrying"
                    );
                }
                Err(e) => break Err(e),
            }
        };
        outcome.duration_ms = elapsed_ms(started);

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(step = %step.id, attempts = outcome.attempts, error = %e, "Tool call failed");
                return outcome.with_error(&e);
            }
        };

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            tracing::info!(step = %step.id, tool = %step.tool, "Tool reported an application error");
        }

        let saved = extract(&step.id, step.save.as_deref(), &result);
        outcome.output = Some(result);
        if let Err(e) = self.store.insert(&step.id, saved) {
            return outcome.with_error(&e);
        }
        outcome
    }

    fn run_assert(&self, step: &AssertStep) -> StepOutcome {
        let started = Instant::now();
        let mut outcome = StepOutcome::new(&step.id, StepKind::Assert, StepStatus::Success);
        outcome.description = step.description.clone();
        let check = &step.check;

        let Some(op) = AssertOp::parse(&check.op) else {
            return outcome.with_error(&Error::Config(format!(
                "Unknown assertion operator '{}'",
                check.op
            )));
        };

        let Some(saved) = self.store.get(&step.from) else {
            return outcome.with_error(&Error::Internal(format!(
                "No saved value from step '{}'; it did not complete",
                step.from
            )));
        };

        let expected = match check.value.as_ref().map(|v| self.env.interpolate_value(v)).transpose() {
            Ok(expected) => expected,
            Err(missing) => return outcome.with_error(&Error::Config(missing.to_string())),
        };

        let evaluated = evaluate(op, check.path.as_deref(), expected.as_ref(), saved);
        if !evaluated.passed {
            tracing::info!(step = %step.id, op = %op, message = %evaluated.message, "Assertion failed");
            outcome.status = StepStatus::Failed;
        }
        outcome.assertion = Some(AssertionDetail::new(
            &check.op,
            check.path.as_deref(),
            expected,
            evaluated,
        ));
        outcome.duration_ms = elapsed_ms(started);
        outcome
    }
}

/// Select what a tool call step saves from its result
///
/// One match saves that value, several save them as an array, none saves
/// null.
fn extract(step_id: &str, save: Option<&str>, result: &Value) -> Value {
    let path = match save {
        None | Some("$") => return result.clone(),
        Some(path) => path,
    };

    match jsonpath_lib::select(result, path) {
        Ok(matches) => match matches.as_slice() {
            [] => {
                tracing::warn!(step = step_id, path, "Save path matched nothing; saving null");
                Value::Null
            }
            [single] => (*single).clone(),
            many => Value::Array(many.iter().map(|v| (*v).clone()).collect()),
        },
        Err(e) => {
            tracing::warn!(step = step_id, path, error = ?e, "Invalid save path; saving null");
            Value::Null
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
