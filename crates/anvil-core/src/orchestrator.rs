//! Orchestrator loop
//!
//! Drives the bounded iteration sequence: recall, pre-run checkpoint, then
//! plan / gate / dispatch / record until a validated done claim or a
//! rollback.
//! The loop is single-threaded-cooperative over run state: one action
//! sequence in flight, iteration N+1 never starts before N's results are
//! folded into context. Within an iteration, consecutive read-only actions
//! dispatch concurrently; everything that mutates the workspace serializes
//! on the run-scoped lock, which checkpoint/rollback also take.
//!
//! `prompt-and-wait` never blocks a thread: the loop yields an
//! [`Turn::AwaitingApproval`] value and resumes from [`Orchestrator::resume`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anvil_guard::redact::redact;
use anvil_vcs::{CheckpointManager, SnapshotBackend};

use crate::approval::{ApprovalGate, DEFAULT_CONFIDENCE_FLOOR};
use crate::collab::{KnowledgeStore, LogMetrics, MetricsSink, RecallContext};
use crate::confidence;
use crate::engine::{
    is_independent, parse_proposal, system_prompt, EngineError, ReasoningEngine, Role,
    TaskContext,
};
use crate::error::CoreError;
use crate::registry::{ActionKind, ToolRegistry, ToolResult};
use crate::tools::workspace_tree;
use crate::types::{
    ActionRequest, ApprovalDecision, ApprovalMode, Proposal, RiskClass, Run, RunOutcome,
    RunReport, RunStatus,
};
use crate::validator::{validate_done, DoneVerdict};

/// Loop tuning knobs.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Iteration budget before the run rolls back
    pub max_iterations: u32,
    /// Intermediate checkpoint every K successful file-modifying actions
    pub checkpoint_interval: u32,
    /// Confidence score below which the approval mode tightens
    pub confidence_floor: u8,
    /// Transient engine error retries
    pub engine_retries: u32,
    /// Base backoff between engine retries (doubles per attempt)
    pub engine_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            checkpoint_interval: 3,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            engine_retries: 3,
            engine_backoff: Duration::from_millis(500),
        }
    }
}

/// Loop states. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, nothing touched yet.
    Init,
    /// Pre-run checkpoint exists.
    Checkpointed,
    /// Waiting on the engine for the next proposal.
    Planning,
    /// Working through the current proposal's actions.
    Executing,
    /// A done claim is being checked.
    Validating,
    /// Done claim accepted; post checkpoint exists.
    Succeeded,
    /// Run sealed as failed; workspace restored (or flagged).
    RolledBack,
}

/// Legal transitions out of a state.
#[must_use]
pub fn allowed_transitions(from: LoopState) -> &'static [LoopState] {
    use LoopState::*;
    match from {
        Init => &[Checkpointed, RolledBack],
        Checkpointed => &[Planning, RolledBack],
        Planning => &[Executing, RolledBack],
        Executing => &[Validating, Planning, RolledBack],
        Validating => &[Succeeded, Planning, RolledBack],
        Succeeded | RolledBack => &[],
    }
}

/// What the loop hands back to its caller per drive.
#[derive(Debug, Clone)]
pub enum Turn {
    /// Suspended on `prompt-and-wait`; resume with a decision.
    AwaitingApproval(ApprovalPrompt),
    /// Run is terminal.
    Finished(RunReport),
}

/// The suspended action awaiting an external approve/deny.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    /// Action name
    pub action: String,
    /// Proposed arguments
    pub args: serde_json::Value,
    /// Risk class that triggered the prompt
    pub risk: RiskClass,
    /// Why confirmation is required
    pub reason: String,
}

/// External decision for a suspended approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Execute the suspended action.
    Approve,
    /// Refuse it; the run continues and the engine is told why.
    Deny,
}

struct PendingAction {
    request: ActionRequest,
    kind: ActionKind,
    /// True when this prompt is the ask-mode once-per-run plan gate.
    plan_gate: bool,
}

enum ExecStep {
    Drained,
    Suspended(ApprovalPrompt),
    Finished(RunReport),
}

/// The task orchestration loop for one run.
pub struct Orchestrator<E, B> {
    engine: E,
    registry: ToolRegistry,
    gate: ApprovalGate,
    checkpoints: CheckpointManager<B>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    metrics: Arc<dyn MetricsSink>,
    cfg: LoopConfig,
    run: Run,
    state: LoopState,
    ctx: TaskContext,
    queue: VecDeque<ActionRequest>,
    results: Vec<serde_json::Value>,
    done_claim: Option<String>,
    pending: Option<PendingAction>,
    writes_since_checkpoint: u32,
    workspace_lock: tokio::sync::Mutex<()>,
    started: Instant,
    final_report: Option<RunReport>,
}

impl<E, B> Orchestrator<E, B>
where
    E: ReasoningEngine,
    B: SnapshotBackend,
{
    /// Build a loop for one task over one workspace.
    #[must_use]
    pub fn new(
        task: impl Into<String>,
        workspace: PathBuf,
        mode: ApprovalMode,
        engine: E,
        backend: B,
        registry: ToolRegistry,
    ) -> Self {
        let cfg = LoopConfig::default();
        let run = Run::new(task, workspace, mode);
        let checkpoints = CheckpointManager::new(backend, run.id.short());
        Self {
            engine,
            registry,
            gate: ApprovalGate::with_floor(mode, cfg.confidence_floor),
            checkpoints,
            knowledge: None,
            metrics: Arc::new(LogMetrics),
            cfg,
            run,
            state: LoopState::Init,
            ctx: TaskContext::default(),
            queue: VecDeque::new(),
            results: Vec::new(),
            done_claim: None,
            pending: None,
            writes_since_checkpoint: 0,
            workspace_lock: tokio::sync::Mutex::new(()),
            started: Instant::now(),
            final_report: None,
        }
    }

    /// Override the loop configuration.
    #[must_use]
    pub fn with_config(mut self, cfg: LoopConfig) -> Self {
        self.gate = ApprovalGate::with_floor(self.run.mode, cfg.confidence_floor);
        self.cfg = cfg;
        self
    }

    /// Attach a knowledge store collaborator. Recall then feeds confidence
    /// scoring before the first planning turn; without a store no scoring
    /// happens and the configured approval mode stands.
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Attach a metrics collaborator.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Read access to the run record.
    #[must_use]
    pub fn run_info(&self) -> &Run {
        &self.run
    }

    /// Drive the loop until it finishes or suspends on an approval.
    pub async fn run(&mut self) -> Result<Turn, CoreError> {
        if let Some(report) = &self.final_report {
            return Ok(Turn::Finished(report.clone()));
        }
        if self.pending.is_some() {
            return Err(CoreError::AlreadyTerminal(
                "run is suspended; call resume".to_string(),
            ));
        }
        if self.state == LoopState::Init {
            if let Some(report) = self.initialize().await? {
                return Ok(Turn::Finished(report));
            }
        }
        self.drive().await
    }

    /// Resume a suspended run with an external decision.
    pub async fn resume(&mut self, decision: Decision) -> Result<Turn, CoreError> {
        let pending = self.pending.take().ok_or(CoreError::NothingPending)?;
        match decision {
            Decision::Approve => {
                if pending.plan_gate {
                    self.gate.record_plan_approval();
                }
                tracing::info!(action = %pending.request.name, "action approved");
                if let Some(report) = self
                    .dispatch_serialized(pending.request, pending.kind)
                    .await?
                {
                    return Ok(Turn::Finished(report));
                }
            }
            Decision::Deny => {
                tracing::info!(action = %pending.request.name, "action denied by operator");
                self.run.counters.actions += 1;
                let denial =
                    CoreError::ApprovalDenied(format!("operator refused {}", pending.request.name));
                self.push_result(&pending.request.name, ToolResult::failure(denial.to_string()));
            }
        }
        self.drive().await
    }

    /// Operator-level cancellation: roll back and seal the run as aborted.
    /// Honored at state boundaries, including while suspended.
    pub async fn abort(&mut self, reason: &str) -> Result<RunReport, CoreError> {
        if let Some(report) = &self.final_report {
            return Ok(report.clone());
        }
        self.pending = None;
        self.finish_failure(RunOutcome::Aborted, format!("aborted: {reason}"))
            .await
    }


    /// Recall, confidence scoring, pre-run checkpoint, context assembly.
    /// Returns a sealed report when the environment is unusable.
    async fn initialize(&mut self) -> Result<Option<RunReport>, CoreError> {
        let recall = match &self.knowledge {
            Some(store) => match store.recall(&self.run.task).await {
                Ok(recall) => {
                    self.gate
                        .apply_confidence(confidence::score_recall(&recall).total);
                    recall
                }
                Err(e) => {
                    tracing::warn!(error = %e, "recall failed; degrading confidence");
                    self.gate.apply_confidence(confidence::degraded().total);
                    RecallContext::default()
                }
            },
            None => RecallContext::default(),
        };

        let begin_result = {
            let _ws = self.workspace_lock.lock().await;
            self.checkpoints.begin().await
        };
        if let Err(e) = begin_result {
            // Environment not usable; nothing to roll back yet.
            tracing::error!(error = %e, "pre-run checkpoint failed");
            self.set_state(LoopState::RolledBack);
            let report = self.seal(RunOutcome::Aborted, Some(CoreError::from(e).to_string()));
            self.store_and_record(&report).await;
            return Ok(Some(report));
        }
        self.set_state(LoopState::Checkpointed);

        self.ctx.push(Role::System, system_prompt(&self.registry));
        let tree = workspace_tree(&self.run.workspace, 3);
        let mut opening = format!(
            "Workspace files:\n{}\n",
            tree.iter()
                .take(100)
                .map(|f| format!("  {f}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        if tree.len() > 100 {
            opening.push_str(&format!("  … and {} more files\n", tree.len() - 100));
        }
        for snippet in &recall.snippets {
            opening.push_str(&format!("\nRelevant note: {snippet}\n"));
        }
        opening.push_str(&format!("\nTask: {}", self.run.task));
        self.ctx.push(Role::User, opening);

        self.set_state(LoopState::Planning);
        Ok(None)
    }

    async fn drive(&mut self) -> Result<Turn, CoreError> {
        loop {
            match self.state {
                LoopState::Planning => {
                    if self.run.iterations >= self.cfg.max_iterations {
                        let reason =
                            CoreError::BudgetExhausted(self.cfg.max_iterations).to_string();
                        let report = self
                            .finish_failure(RunOutcome::FailedRolledBack, reason)
                            .await?;
                        return Ok(Turn::Finished(report));
                    }
                    self.run.iterations += 1;
                    tracing::info!(
                        iteration = self.run.iterations,
                        budget = self.cfg.max_iterations,
                        "planning"
                    );
                    let proposal = match self.next_proposal().await {
                        Ok(p) => p,
                        Err(e) => {
                            let report = self
                                .finish_failure(
                                    RunOutcome::FailedRolledBack,
                                    CoreError::EngineFailure(e.to_string()).to_string(),
                                )
                                .await?;
                            return Ok(Turn::Finished(report));
                        }
                    };
                    self.queue = proposal.actions.into();
                    self.results.clear();
                    self.done_claim = None;
                    self.set_state(LoopState::Executing);
                }
                LoopState::Executing => match self.execute_queue().await? {
                    ExecStep::Suspended(prompt) => return Ok(Turn::AwaitingApproval(prompt)),
                    ExecStep::Finished(report) => return Ok(Turn::Finished(report)),
                    ExecStep::Drained => {
                        if self.done_claim.is_some() {
                            self.set_state(LoopState::Validating);
                        } else {
                            let feedback = serde_json::to_string_pretty(&self.results)
                                .unwrap_or_else(|_| "[]".to_string());
                            self.ctx
                                .push(Role::User, format!("Tool results:\n{}", redact(&feedback)));
                            self.set_state(LoopState::Planning);
                        }
                    }
                },
                LoopState::Validating => match validate_done(&self.run) {
                    DoneVerdict::Accepted => {
                        let committed = {
                            let _ws = self.workspace_lock.lock().await;
                            self.checkpoints.commit().await
                        };
                        if let Err(e) = committed {
                            let report = self
                                .finish_failure(
                                    RunOutcome::Aborted,
                                    CoreError::CheckpointFailure(format!("post-run commit: {e}"))
                                        .to_string(),
                                )
                                .await?;
                            return Ok(Turn::Finished(report));
                        }
                        self.set_state(LoopState::Succeeded);
                        let report = self.seal(RunOutcome::Succeeded, None);
                        self.store_and_record(&report).await;
                        return Ok(Turn::Finished(report));
                    }
                    DoneVerdict::Rejected { reason } => {
                        let rejection = CoreError::ValidationRejected(reason);
                        tracing::info!(%rejection, "done claim rejected");
                        self.ctx.push(Role::User, rejection.to_string());
                        self.set_state(LoopState::Planning);
                    }
                },
                terminal => {
                    return Err(CoreError::AlreadyTerminal(format!("{terminal:?}")));
                }
            }
        }
    }

    async fn execute_queue(&mut self) -> Result<ExecStep, CoreError> {
        while let Some(request) = self.queue.front().cloned() {
            let Some(spec) = self.registry.spec(&request.name).cloned() else {
                // Fail closed: the engine is told, never silently skipped.
                self.queue.pop_front();
                self.run.counters.actions += 1;
                self.push_result(
                    &request.name,
                    ToolResult::failure(CoreError::UnknownAction(request.name.clone()).to_string()),
                );
                continue;
            };

            if spec.kind == ActionKind::Done {
                self.queue.clear();
                self.done_claim =
                    Some(request.args["summary"].as_str().unwrap_or("").to_string());
                return Ok(ExecStep::Drained);
            }

            match self.gate.decide(spec.risk) {
                ApprovalDecision::Execute => {
                    if is_independent(spec.kind) {
                        self.dispatch_read_batch().await;
                    } else {
                        self.queue.pop_front();
                        if let Some(report) =
                            self.dispatch_serialized(request, spec.kind).await?
                        {
                            return Ok(ExecStep::Finished(report));
                        }
                    }
                }
                ApprovalDecision::Prompt => {
                    self.queue.pop_front();
                    let plan_gate = self.gate.effective_mode() == ApprovalMode::Ask;
                    let reason = if plan_gate {
                        "plan-stage confirmation for high-risk work".to_string()
                    } else {
                        "paranoid mode confirms every action".to_string()
                    };
                    let prompt = ApprovalPrompt {
                        action: request.name.clone(),
                        args: request.args.clone(),
                        risk: spec.risk,
                        reason,
                    };
                    self.pending = Some(PendingAction {
                        request,
                        kind: spec.kind,
                        plan_gate,
                    });
                    return Ok(ExecStep::Suspended(prompt));
                }
                ApprovalDecision::Deny => {
                    self.queue.pop_front();
                    self.run.counters.actions += 1;
                    self.push_result(
                        &request.name,
                        ToolResult::failure(
                            CoreError::ApprovalDenied("refused by policy".to_string()).to_string(),
                        ),
                    );
                }
            }
        }
        Ok(ExecStep::Drained)
    }

    /// Drain the maximal prefix of read-class actions cleared for execution
    /// and dispatch them concurrently. Reads don't mutate the workspace, so
    /// they skip the workspace lock.
    async fn dispatch_read_batch(&mut self) {
        let mut batch = Vec::new();
        while let Some(front) = self.queue.front() {
            let Some(spec) = self.registry.spec(&front.name) else {
                break;
            };
            if !is_independent(spec.kind)
                || self.gate.decide(spec.risk) != ApprovalDecision::Execute
            {
                break;
            }
            match self.queue.pop_front() {
                Some(request) => batch.push(request),
                None => break,
            }
        }

        let registry = &self.registry;
        let outcomes =
            futures::future::join_all(batch.iter().map(|req| registry.dispatch(req))).await;

        for (request, outcome) in batch.iter().zip(outcomes) {
            self.run.counters.actions += 1;
            let result = outcome.unwrap_or_else(|e| ToolResult::failure(e.to_string()));
            self.push_result(&request.name, result);
        }
    }

    /// Execute one workspace-mutating action under the run-scoped lock, then
    /// update run bookkeeping and take an intermediate checkpoint when due.
    /// Returns a sealed report when checkpoint machinery fails mid-run.
    async fn dispatch_serialized(
        &mut self,
        request: ActionRequest,
        kind: ActionKind,
    ) -> Result<Option<RunReport>, CoreError> {
        let result = {
            let _ws = self.workspace_lock.lock().await;
            match self.registry.dispatch(&request).await {
                Ok(r) => r,
                // Local recovery: per-action errors become failed results
                // the engine sees; environment-level failures propagate.
                Err(e) if !e.is_fatal() => ToolResult::failure(e.to_string()),
                Err(e) => return Err(e),
            }
        };

        self.run.counters.actions += 1;
        match kind {
            ActionKind::Write if result.ok => {
                self.run.note_file_modified();
                self.writes_since_checkpoint += 1;
            }
            ActionKind::Test => {
                let passed = result.data["passed"].as_bool().unwrap_or(result.ok);
                let summary = result.data["summary"]
                    .as_str()
                    .unwrap_or(if passed { "tests passed" } else { "tests failed" })
                    .to_string();
                self.run.record_test_outcome(passed, summary);
            }
            _ => {}
        }
        self.push_result(&request.name, result);

        if self.writes_since_checkpoint >= self.cfg.checkpoint_interval {
            let taken = {
                let _ws = self.workspace_lock.lock().await;
                self.checkpoints.intermediate().await
            };
            match taken {
                Ok(_) => self.writes_since_checkpoint = 0,
                Err(e) => {
                    let report = self
                        .finish_failure(RunOutcome::Aborted, CoreError::from(e).to_string())
                        .await?;
                    return Ok(Some(report));
                }
            }
        }
        Ok(None)
    }

    fn push_result(&mut self, action: &str, result: ToolResult) {
        self.results.push(serde_json::json!({
            "tool": action,
            "result": result.to_value(),
        }));
    }

    async fn next_proposal(&mut self) -> Result<Proposal, EngineError> {
        let mut attempt = 0u32;
        let reply = loop {
            match self.engine.propose(&self.ctx).await {
                Ok(reply) => break reply,
                Err(EngineError::Transient(msg)) if attempt < self.cfg.engine_retries => {
                    attempt += 1;
                    let delay = self.cfg.engine_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        error = %msg,
                        delay_ms = delay.as_millis() as u64,
                        "transient engine error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };
        self.run.counters.prompt_tokens += reply.usage.prompt;
        self.run.counters.completion_tokens += reply.usage.completion;
        self.ctx.push(Role::Assistant, reply.content.clone());
        Ok(parse_proposal(&reply.content))
    }


    /// Roll back and seal the run as failed. A rollback failure is never
    /// swallowed: the report is recorded, then the error surfaces.
    async fn finish_failure(
        &mut self,
        outcome: RunOutcome,
        reason: String,
    ) -> Result<RunReport, CoreError> {
        let rolled = {
            let _ws = self.workspace_lock.lock().await;
            self.checkpoints.rollback().await
        };
        match rolled {
            Ok(_) => {
                self.set_state(LoopState::RolledBack);
                let report = self.seal(outcome, Some(reason));
                self.store_and_record(&report).await;
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "ROLLBACK FAILED: workspace trust state unknown, manual inspection required"
                );
                self.set_state(LoopState::RolledBack);
                let report = self.seal(
                    RunOutcome::Aborted,
                    Some(format!("{reason}; rollback failed: {e}")),
                );
                self.store_and_record(&report).await;
                Err(CoreError::RollbackFailure(e.to_string()))
            }
        }
    }

    fn seal(&mut self, outcome: RunOutcome, reason: Option<String>) -> RunReport {
        let status = match outcome {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            _ => RunStatus::Failed,
        };
        self.run.seal(status, reason.clone());
        let report = RunReport {
            run_id: self.run.id,
            task: self.run.task.clone(),
            outcome,
            reason,
            iterations: self.run.iterations,
            counters: self.run.counters,
            rollback_used: self.checkpoints.rolled_back(),
            spiked: self.gate.is_spiked(),
            duration: self.started.elapsed(),
        };
        self.final_report = Some(report.clone());
        report
    }

    async fn store_and_record(&self, report: &RunReport) {
        if let Some(store) = &self.knowledge {
            if let Err(e) = store.store_outcome(report).await {
                tracing::warn!(error = %e, "storing run outcome failed");
            }
        }
        self.metrics.record(report).await;
    }

    fn set_state(&mut self, to: LoopState) {
        debug_assert!(
            allowed_transitions(self.state).contains(&to),
            "illegal transition {:?} -> {to:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?to, "loop state");
        self.state = to;
    }
}
