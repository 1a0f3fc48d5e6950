//! Scheduler: the event loop that advances a run — maintains a ready set,
//! dispatches steps and groups to their executors, fans in/out across
//! ports, handles cancellation/timeouts, and writes state transitions
//! through the Run Store Adapter.
//!
//! Concurrency model: wave-based `tokio::JoinSet` dispatch with `Semaphore`
//! admission and `CancellationToken` propagation, generalized from static
//! topological waves to dynamic, port/condition-driven readiness — it
//! repeatedly selects ready nodes and enqueues newly-ready successors as
//! they unlock. Nodes are `EdgeEndpoint`s rather than bare step ids because
//! an `Edge` may target a `BlockGroup` directly — a group is a first-class
//! DAG node whose body is itself driven by a nested `Scheduler::drive`
//! call, with groups spawning sub-schedulers that report upward through a
//! single result channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flow_domain::{EdgeEndpoint, RetryConfig, Run, RunId, Step, StepId, StepRun, TenantId};
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::contracts::{AuditEvent, AuditSink, BuiltinRegistry, CredentialVault, LlmProvider, NoopAuditSink, RunStore, Sandbox};
use crate::errors::{BlockError, CoreEngineError};
use crate::executor::StepExecutor;
use crate::expression;
use crate::graph::GraphModel;
use crate::groups;

/// Default per-step timeout absent a more specific `timeout_ms` in a
/// block's executor config.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 120_000;

/// Bundles the external collaborators the scheduler and group
/// executors dispatch to. `Arc`-wrapped so spawned `JoinSet` tasks can hold
/// their own clone without borrowing across an `.await` boundary.
#[derive(Clone)]
pub struct Collaborators {
    pub sandbox: Arc<dyn Sandbox>,
    pub vault: Arc<dyn CredentialVault>,
    pub builtins: Arc<dyn BuiltinRegistry>,
    pub llm: Arc<dyn LlmProvider>,
    pub store: Arc<dyn RunStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Convenience constructor for callers that don't need audit emission
    /// (tests, the CLI demo); wires a `NoopAuditSink`.
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        vault: Arc<dyn CredentialVault>,
        builtins: Arc<dyn BuiltinRegistry>,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self { sandbox, vault, builtins, llm, store, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

/// The outcome of driving a run (or a group's sub-DAG) to completion.
#[derive(Debug, Clone)]
pub enum DriveOutcome {
    Completed(Value),
    /// Failed on an unhandled step/group failure; carries the error message.
    Failed(String),
    Cancelled,
}

/// Mutable, run-scoped state shared across concurrently dispatched tasks.
/// Guarded by a single `Mutex` rather than sharded per-field because every
/// field updates together at a completion boundary.
pub struct RunState {
    pub(crate) ctx: RunContext,
    sequence: Arc<AtomicU64>,
    step_names: HashMap<StepId, String>,
}

impl RunState {
    pub fn new(input: Value, step_names: HashMap<StepId, String>) -> Self {
        Self { ctx: RunContext::new(input), sequence: Arc::new(AtomicU64::new(0)), step_names }
    }

    pub fn from_context(ctx: RunContext, step_names: HashMap<StepId, String>) -> Self {
        Self { ctx, sequence: Arc::new(AtomicU64::new(0)), step_names }
    }

    pub fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// A cloned handle onto the run's sequence counter, independent of the
    /// `Mutex<RunState>` lock — lets a spawned step task (which owns the
    /// handle, not a borrow of `state`) draw a fresh `sequence_number` for
    /// each retry attempt without re-acquiring the run-state lock.
    fn sequence_handle(&self) -> Arc<AtomicU64> {
        self.sequence.clone()
    }
}

struct NodeResult {
    node: EdgeEndpoint,
    outcome: Result<StepOutcomeLike, BlockError>,
}

/// Common shape both the Step Executor and Group Executors produce: the
/// port a node emitted on plus its payload.
pub struct StepOutcomeLike {
    pub port: String,
    pub output: Value,
}

#[derive(Clone)]
pub struct Scheduler {
    pub graph: Arc<GraphModel>,
    pub collaborators: Collaborators,
}

impl Scheduler {
    pub fn new(graph: Arc<GraphModel>, collaborators: Collaborators) -> Self {
        Self { graph, collaborators }
    }

    /// Drives a top-level `Run` to completion: seeds the ready set from the
    /// graph's entry node, loops until nothing remains ready or in flight,
    /// then reports how the run terminated.
    pub async fn run(&self, run: &mut Run) -> Result<DriveOutcome, CoreEngineError> {
        run.mark_running();
        self.collaborators.store.upsert_run(run).await?;
        self.collaborators.audit.record(AuditEvent::RunStarted { run_id: run.id, tenant_id: run.tenant_id }).await;

        let start_id = run
            .start_step_id
            .or_else(|| self.graph.start_steps().into_iter().next())
            .ok_or(CoreEngineError::UnknownStepId)?;

        let step_names = self.graph.version.steps.iter().map(|s| (s.id, s.name.clone())).collect();
        let state = Mutex::new(RunState::new(run.input.clone(), step_names));
        let cancel = CancellationToken::new();
        let members: Vec<EdgeEndpoint> =
            self.graph.version.steps.iter().map(|s| EdgeEndpoint::Step(s.id)).collect();

        let outcome = self
            .drive(&state, run.tenant_id, run.id, &members, &[EdgeEndpoint::Step(start_id)], cancel, true)
            .await?;

        match &outcome {
            DriveOutcome::Completed(output) => {
                run.mark_completed(output.clone());
                self.collaborators.audit.record(AuditEvent::RunCompleted { run_id: run.id }).await;
            }
            DriveOutcome::Failed(msg) => {
                run.mark_failed(msg.clone());
                self.collaborators.audit.record(AuditEvent::RunFailed { run_id: run.id, message: msg.clone() }).await;
            }
            DriveOutcome::Cancelled => {
                run.mark_cancelled();
                self.collaborators.audit.record(AuditEvent::RunCancelled { run_id: run.id }).await;
            }
        }
        self.collaborators.store.upsert_run(run).await?;
        Ok(outcome)
    }

    /// Drives a sub-DAG (a group body, or the whole workflow) from `entry`
    /// nodes until every reachable member is terminal, pending, or skipped.
    /// Shared by the top-level `run` and every Group Executor.
    ///
    /// `fail_fast` controls what an unhandled node failure does to its
    /// siblings still in flight or queued (`parallel`'s `fail_fast` option,
    /// generalized to every caller): when true, the
    /// first unhandled failure cancels the rest of the batch and any not-yet
    /// dispatched nodes are skipped; when false, every already-ready node
    /// still runs to completion and the drive only fails at the end, after
    /// collecting every failure that occurred.
    pub async fn drive(
        &self,
        state: &Mutex<RunState>,
        tenant_id: TenantId,
        run_id: RunId,
        members: &[EdgeEndpoint],
        entry: &[EdgeEndpoint],
        cancel: CancellationToken,
        fail_fast: bool,
    ) -> Result<DriveOutcome, CoreEngineError> {
        let member_set: HashSet<EdgeEndpoint> = members.iter().copied().collect();
        let mut satisfied: HashMap<EdgeEndpoint, HashSet<String>> = HashMap::new();
        let mut ready: VecDeque<EdgeEndpoint> = entry.iter().copied().collect();
        let mut unhandled_failures: Vec<String> = Vec::new();

        while !ready.is_empty() {
            if cancel.is_cancelled() {
                self.skip_pending(state, run_id, &ready).await?;
                return Ok(DriveOutcome::Cancelled);
            }

            let batch: Vec<EdgeEndpoint> = ready.drain(..).collect();
            let mut joinset: JoinSet<NodeResult> = JoinSet::new();

            for node in batch {
                let ctx_root = {
                    let guard = state.lock().await;
                    guard.ctx.as_value()
                };
                let graph = Arc::clone(&self.graph);
                let collaborators = self.collaborators.clone();
                let token = cancel.clone();

                match node {
                    EdgeEndpoint::Step(step_id) => {
                        let Some(step) = self.graph.step(step_id).cloned() else { continue };
                        let input = ctx_root.clone();
                        let (seq, sequence_handle) = {
                            let guard = state.lock().await;
                            (guard.next_sequence(), guard.sequence_handle())
                        };
                        let mut step_run = StepRun::new(run_id, step.id, seq, 1, input.clone());
                        step_run.mark_running();
                        self.collaborators.store.append_step_run(&step_run).await?;
                        let retry_config = step.retry_config.clone().unwrap_or_default();
                        let timeout_ms = step
                            .config
                            .get("timeout_ms")
                            .and_then(Value::as_u64)
                            .unwrap_or(DEFAULT_STEP_TIMEOUT_MS);

                        joinset.spawn(async move {
                            let outcome = run_step_with_retries(
                                &graph,
                                &collaborators,
                                &step,
                                tenant_id,
                                input,
                                &ctx_root,
                                &retry_config,
                                timeout_ms,
                                &token,
                                &mut step_run,
                                &sequence_handle,
                            )
                            .await;
                            let _ = collaborators.store.update_step_run(&step_run).await;
                            NodeResult {
                                node: EdgeEndpoint::Step(step.id),
                                outcome: outcome.map(|o| StepOutcomeLike { port: o.port, output: o.output }),
                            }
                        });
                    }
                    EdgeEndpoint::Group(group_id) => {
                        let Some(group) = self.graph.group(group_id).cloned() else { continue };
                        let input = ctx_root.clone();
                        let scheduler = self.clone();
                        joinset.spawn(async move {
                            let outcome =
                                groups::run_group(&scheduler, tenant_id, run_id, &group, input, &ctx_root, token).await;
                            NodeResult { node: EdgeEndpoint::Group(group_id), outcome }
                        });
                    }
                }
            }

            while let Some(joined) = joinset.join_next().await {
                let result = joined.map_err(|e| CoreEngineError::Internal(format!("node task join error: {e}")))?;
                let node_name = node_label(&self.graph, result.node);

                match result.outcome {
                    Ok(outcome) => {
                        {
                            let mut guard = state.lock().await;
                            guard.ctx.record_output(&node_name, outcome.output.clone());
                        }
                        self.fan_out(state, result.node, &outcome.port, &member_set, &mut satisfied, &mut ready)
                            .await;
                    }
                    Err(block_error) => {
                        debug!("node {node_name} failed: {}", block_error.message);
                        {
                            let mut guard = state.lock().await;
                            guard.ctx.record_error(&node_name, serde_json::to_value(&block_error).unwrap_or(Value::Null));
                        }
                        let error_edges: Vec<_> = self
                            .graph
                            .outgoing_edges(result.node)
                            .iter()
                            .filter(|e| e.source_port == "error")
                            .cloned()
                            .collect();
                        if !error_edges.is_empty() {
                            self.fan_out(state, result.node, "error", &member_set, &mut satisfied, &mut ready).await;
                        } else if block_error.code == "ERR_EXEC_CANCELLED" {
                            // Cancellation short-circuits propagation without
                            // marking the run failed.
                        } else {
                            unhandled_failures.push(format!("{node_name}: {}", block_error.message));
                        }
                    }
                }
            }

            if !unhandled_failures.is_empty() && fail_fast {
                cancel.cancel();
                self.skip_pending(state, run_id, &ready).await?;
                break;
            }
        }

        if cancel.is_cancelled() && unhandled_failures.is_empty() {
            return Ok(DriveOutcome::Cancelled);
        }
        if !unhandled_failures.is_empty() {
            return Ok(DriveOutcome::Failed(unhandled_failures.join("; ")));
        }

        let output = self.collect_terminal_output(state, members).await;
        Ok(DriveOutcome::Completed(output))
    }

    async fn fan_out(
        &self,
        state: &Mutex<RunState>,
        node: EdgeEndpoint,
        port: &str,
        member_set: &HashSet<EdgeEndpoint>,
        satisfied: &mut HashMap<EdgeEndpoint, HashSet<String>>,
        ready: &mut VecDeque<EdgeEndpoint>,
    ) {
        let ctx_root = {
            let guard = state.lock().await;
            guard.ctx.as_value()
        };
        for edge in self.graph.outgoing_edges(node) {
            if edge.source_port != port {
                continue;
            }
            if !member_set.contains(&edge.target) {
                continue;
            }
            let truthy = edge
                .condition
                .as_deref()
                .map(|c| expression::evaluate_condition(c, &ctx_root))
                .unwrap_or(true);
            if !truthy {
                continue;
            }
            satisfied.entry(edge.target).or_default().insert(edge.target_port.clone());
            let required = self.graph.required_input_ports(edge.target);
            let have = satisfied.get(&edge.target).cloned().unwrap_or_default();
            if required.is_subset(&have) && !ready.contains(&edge.target) {
                ready.push_back(edge.target);
            }
        }
    }

    async fn skip_pending(
        &self,
        state: &Mutex<RunState>,
        run_id: RunId,
        pending: &VecDeque<EdgeEndpoint>,
    ) -> Result<(), CoreEngineError> {
        for node in pending {
            if let EdgeEndpoint::Step(step_id) = node {
                let seq = {
                    let guard = state.lock().await;
                    guard.next_sequence()
                };
                let mut sr = StepRun::new(run_id, *step_id, seq, 1, Value::Null);
                sr.mark_skipped();
                self.collaborators.store.append_step_run(&sr).await?;
            }
        }
        Ok(())
    }

    async fn collect_terminal_output(&self, state: &Mutex<RunState>, members: &[EdgeEndpoint]) -> Value {
        let terminals = self.graph.terminal_nodes(members);
        let guard = state.lock().await;
        if terminals.len() == 1 {
            let name = node_label(&self.graph, terminals[0]);
            return guard.ctx.steps.get(&name).map(|e| e.output.clone()).unwrap_or(Value::Null);
        }
        let mut map = serde_json::Map::new();
        for node in &terminals {
            let name = node_label(&self.graph, *node);
            if let Some(entry) = guard.ctx.steps.get(&name) {
                map.insert(name, entry.output.clone());
            }
        }
        Value::Object(map)
    }
}

fn node_label(graph: &GraphModel, node: EdgeEndpoint) -> String {
    match node {
        EdgeEndpoint::Step(id) => graph.step(id).map(|s| s.name.clone()).unwrap_or_else(|| id.to_string()),
        EdgeEndpoint::Group(id) => format!("group:{id}"),
    }
}

/// Runs a step's retry loop serially, sleeping between attempts per
/// `RetryConfig`, and producing a fresh `StepRun` attempt record for each
/// retry.
#[allow(clippy::too_many_arguments)]
async fn run_step_with_retries(
    graph: &Arc<GraphModel>,
    collaborators: &Collaborators,
    step: &Step,
    tenant_id: TenantId,
    input: Value,
    ctx_root: &Value,
    retry_config: &RetryConfig,
    timeout_ms: u64,
    cancel: &CancellationToken,
    step_run: &mut StepRun,
    sequence: &Arc<AtomicU64>,
) -> Result<crate::executor::StepOutcome, BlockError> {
    let mut attempt: u32 = 1;
    loop {
        collaborators
            .audit
            .record(AuditEvent::StepStarted { run_id: step_run.run_id, step_name: step.name.clone(), attempt })
            .await;

        if cancel.is_cancelled() {
            let err = BlockError {
                code: "ERR_EXEC_CANCELLED".into(),
                message: "execution cancelled".into(),
                details: None,
                retryable: false,
                retry_after_ms: None,
            };
            step_run.mark_failed(err.message.clone());
            return Err(err);
        }

        let executor = StepExecutor::new(graph.as_ref());
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            executor.execute(
                step,
                tenant_id,
                input.clone(),
                ctx_root,
                collaborators.vault.as_ref(),
                collaborators.sandbox.as_ref(),
                collaborators.builtins.as_ref(),
                timeout_ms,
            ),
        )
        .await;

        let outcome = match result {
            Ok(inner) => inner,
            Err(_) => Err(BlockError {
                code: "ERR_SYSTEM_TIMEOUT".into(),
                message: format!("step {} exceeded {timeout_ms}ms", step.name),
                details: None,
                retryable: false,
                retry_after_ms: None,
            }),
        };

        match outcome {
            Ok(step_outcome) => {
                step_run.mark_completed(step_outcome.output.clone());
                for chunk in &step_outcome.chunks {
                    step_run.push_chunk(chunk.clone());
                }
                collaborators
                    .audit
                    .record(AuditEvent::StepCompleted { run_id: step_run.run_id, step_name: step.name.clone(), attempt })
                    .await;
                return Ok(step_outcome);
            }
            Err(block_error) => {
                collaborators
                    .audit
                    .record(AuditEvent::StepFailed {
                        run_id: step_run.run_id,
                        step_name: step.name.clone(),
                        attempt,
                        error_code: block_error.code.clone(),
                    })
                    .await;
                let can_retry = block_error.retryable && retry_config.allows(attempt, &block_error.code);
                let delay = if can_retry { retry_config.delay_for_attempt(attempt - 1) } else { 0 };
                collaborators
                    .audit
                    .record(AuditEvent::RetryDecided {
                        run_id: step_run.run_id,
                        step_name: step.name.clone(),
                        attempt,
                        should_retry: can_retry,
                        delay_ms: delay,
                    })
                    .await;
                if can_retry {
                    warn!(
                        "step {} attempt {attempt} failed with {}; retrying after {delay}ms",
                        step.name, block_error.code
                    );
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    attempt += 1;
                    step_run.mark_failed(block_error.message.clone());
                    let seq = sequence.fetch_add(1, Ordering::SeqCst);
                    let mut next = StepRun::new(step_run.run_id, step_run.step_id, seq, attempt, input.clone());
                    next.mark_running();
                    *step_run = next;
                    continue;
                }
                step_run.mark_failed(block_error.message.clone());
                return Err(block_error);
            }
        }
    }
}
