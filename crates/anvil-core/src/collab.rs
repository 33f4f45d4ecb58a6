//! External collaborator contracts
//!
//! The core consumes these; implementations live outside (knowledge store,
//! metrics pipeline). Recall failure must degrade gracefully; the
//! orchestrator drops the confidence score rather than aborting.

use async_trait::async_trait;

use crate::types::RunReport;

/// One similar past task outcome, as recalled.
#[derive(Debug, Clone)]
pub struct PastOutcome {
    /// Whether that task completed successfully
    pub completed: bool,
}

/// Context recalled for a task before planning starts.
#[derive(Debug, Clone, Default)]
pub struct RecallContext {
    /// Free-form snippets folded into the first engine message
    pub snippets: Vec<String>,
    /// Similar past task outcomes
    pub similar: Vec<PastOutcome>,
    /// Success rate of recent runs, if history exists
    pub recent_success_rate: Option<f64>,
}

/// Long-term knowledge store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Recall context relevant to `task`.
    async fn recall(&self, task: &str) -> anyhow::Result<RecallContext>;

    /// Persist a finalized run outcome.
    async fn store_outcome(&self, report: &RunReport) -> anyhow::Result<()>;
}

/// Receives exactly one finalized run record per run.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Deliver the sealed run report.
    async fn record(&self, report: &RunReport);
}

/// Knowledge store with no memory; recall always succeeds with nothing.
#[derive(Debug, Default)]
pub struct NoopKnowledge;

#[async_trait]
impl KnowledgeStore for NoopKnowledge {
    async fn recall(&self, _task: &str) -> anyhow::Result<RecallContext> {
        Ok(RecallContext::default())
    }

    async fn store_outcome(&self, _report: &RunReport) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Metrics sink that emits the report through tracing.
#[derive(Debug, Default)]
pub struct LogMetrics;

#[async_trait]
impl MetricsSink for LogMetrics {
    async fn record(&self, report: &RunReport) {
        tracing::info!(
            run = %report.run_id,
            outcome = ?report.outcome,
            iterations = report.iterations,
            actions = report.counters.actions,
            files_changed = report.counters.files_changed,
            rollback_used = report.rollback_used,
            spiked = report.spiked,
            duration_s = report.duration.as_secs_f64(),
            reason = report.reason.as_deref().unwrap_or(""),
            "run finalized"
        );
    }
}
