//! End-to-end loop scenarios over a real git-backed workspace.
//!
//! Each test drives [`Orchestrator`] with a scripted engine: a fixed queue
//! of replies standing in for the reasoning backend. Everything else (jail,
//! guard, registry, checkpoints) is the production wiring over a tempdir.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use anvil_core::engine::{EngineError, EngineReply, ReasoningEngine, TaskContext, TokenUsage};
use anvil_core::orchestrator::{Decision, LoopConfig, Orchestrator, Turn};
use anvil_core::tools::standard_registry;
use anvil_core::types::{ApprovalMode, RiskClass, RunOutcome};
use anvil_core::{CoreError, KnowledgeStore, RecallContext, RunReport};
use anvil_guard::ShellGuard;
use anvil_vcs::{CheckpointId, GitBackend, SnapshotBackend, VcsError};

struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<String, EngineError>>>,
}

impl ScriptedEngine {
    fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, EngineError>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())))
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn propose(&self, _ctx: &TaskContext) -> Result<EngineReply, EngineError> {
        match self.replies.lock().pop_front() {
            Some(Ok(content)) => Ok(EngineReply {
                content,
                usage: TokenUsage {
                    prompt: 10,
                    completion: 5,
                },
            }),
            Some(Err(e)) => Err(e),
            None => Err(EngineError::Fatal("script exhausted".to_string())),
        }
    }
}

/// Workspace seeded so the test runner detects cargo (commands are
/// overridden per call, nothing actually compiles).
fn seed_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::write(dir.path().join("README.md"), "demo project\n").unwrap();
    dir
}

fn orchestrator(
    dir: &tempfile::TempDir,
    mode: ApprovalMode,
    engine: ScriptedEngine,
) -> Orchestrator<ScriptedEngine, GitBackend> {
    let registry = standard_registry(dir.path(), ShellGuard::new(dir.path())).unwrap();
    Orchestrator::new(
        "demo task",
        dir.path().to_path_buf(),
        mode,
        engine,
        GitBackend::new(dir.path()),
        registry,
    )
    .with_config(LoopConfig {
        engine_backoff: std::time::Duration::from_millis(1),
        ..LoopConfig::default()
    })
}

fn git_tags(dir: &Path) -> Vec<String> {
    let out = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .arg("tag")
        .output()
        .unwrap();
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

fn finish(turn: Turn) -> RunReport {
    match turn {
        Turn::Finished(report) => report,
        Turn::AwaitingApproval(prompt) => panic!("unexpected suspension: {prompt:?}"),
    }
}

const PASSING_TESTS: &str = r#"[{"tool":"run_tests","args":{"command":"true"}}]"#;
const DONE: &str = r#"[{"tool":"done","args":{"summary":"task complete"}}]"#;

#[tokio::test]
async fn auto_mode_runs_to_success_with_post_checkpoint() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"hello.txt","content":"hi"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success(), "{report:?}");
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.counters.files_changed, 1);
    assert!(!report.rollback_used);
    assert!(!report.spiked);
    assert_eq!(fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");

    let tags = git_tags(dir.path());
    assert_eq!(tags.iter().filter(|t| t.ends_with("-pre")).count(), 1);
    assert_eq!(tags.iter().filter(|t| t.ends_with("-post")).count(), 1);
}

#[tokio::test]
async fn finished_run_replays_its_report() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([PASSING_TESTS, DONE]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let first = finish(orch.run().await.unwrap());
    let second = finish(orch.run().await.unwrap());
    assert_eq!(first.run_id, second.run_id);
    assert_eq!(second.outcome, RunOutcome::Succeeded);
}

#[tokio::test]
async fn done_claim_without_tests_is_rejected_until_tests_pass() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([DONE, PASSING_TESTS, DONE]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    // First claim bounced back to planning, so three iterations ran.
    assert_eq!(report.iterations, 3);
}

#[tokio::test]
async fn edits_after_passing_tests_stale_the_done_claim() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        PASSING_TESTS,
        r#"[{"tool":"write_file","args":{"path":"late.txt","content":"x"}}]"#,
        DONE,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    assert_eq!(report.iterations, 5);
}

#[tokio::test]
async fn failing_tests_block_completion() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"run_tests","args":{"command":"false"}}]"#,
        DONE,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    // Failing record rejected the first claim.
    assert_eq!(report.iterations, 4);
}

#[tokio::test]
async fn plain_text_reply_is_treated_as_done_claim() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        PASSING_TESTS,
        "I believe the task is finished.",
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
}


#[tokio::test]
async fn budget_exhaustion_rolls_back_to_pre_run_state() {
    let dir = seed_workspace();
    fs::write(dir.path().join("keep.txt"), "original").unwrap();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"keep.txt","content":"clobbered"}},
            {"tool":"write_file","args":{"path":"a.txt","content":"1"}},
            {"tool":"write_file","args":{"path":"b.txt","content":"2"}},
            {"tool":"write_file","args":{"path":"c.txt","content":"3"}}]"#,
        r#"[{"tool":"write_file","args":{"path":"d.txt","content":"4"}}]"#,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine).with_config(LoopConfig {
        max_iterations: 2,
        ..LoopConfig::default()
    });

    let report = finish(orch.run().await.unwrap());
    assert_eq!(report.outcome, RunOutcome::FailedRolledBack);
    assert!(report.rollback_used);
    assert!(report.reason.as_deref().unwrap().contains("budget"));

    // Byte-exact pre-run state, intermediate checkpoints notwithstanding.
    assert_eq!(
        fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
        "original"
    );
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        assert!(!dir.path().join(name).exists(), "{name} survived rollback");
    }
    // The failed run's intermediate tags were discarded with it.
    assert!(git_tags(dir.path())
        .iter()
        .all(|t| !t.contains("-intermediate-")));
}

#[tokio::test]
async fn fatal_engine_error_rolls_back() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::new([
        Ok(r#"[{"tool":"write_file","args":{"path":"x.txt","content":"x"}}]"#.to_string()),
        Err(EngineError::Fatal("backend rejected the request".to_string())),
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert_eq!(report.outcome, RunOutcome::FailedRolledBack);
    assert!(!dir.path().join("x.txt").exists());
}

#[tokio::test]
async fn transient_engine_errors_are_retried() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::new([
        Err(EngineError::Transient("rate limited".to_string())),
        Err(EngineError::Transient("connection reset".to_string())),
        Ok(PASSING_TESTS.to_string()),
        Ok(DONE.to_string()),
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    // Retries happen within one planning turn.
    assert_eq!(report.iterations, 2);
}

struct BrokenRestore(GitBackend);

#[async_trait]
impl SnapshotBackend for BrokenRestore {
    async fn ensure_ready(&self) -> Result<(), VcsError> {
        self.0.ensure_ready().await
    }
    async fn snapshot(&self, label: &str) -> Result<CheckpointId, VcsError> {
        self.0.snapshot(label).await
    }
    async fn restore(&self, _id: &CheckpointId) -> Result<(), VcsError> {
        Err(VcsError::RollbackFailed("disk detached".to_string()))
    }
    async fn is_dirty(&self) -> Result<bool, VcsError> {
        self.0.is_dirty().await
    }
    async fn discard(&self, id: &CheckpointId) -> Result<(), VcsError> {
        self.0.discard(id).await
    }
}

#[tokio::test]
async fn rollback_failure_surfaces_as_error() {
    let dir = seed_workspace();
    let registry = standard_registry(dir.path(), ShellGuard::new(dir.path())).unwrap();
    let mut orch = Orchestrator::new(
        "demo task",
        dir.path().to_path_buf(),
        ApprovalMode::Auto,
        ScriptedEngine::from_texts(Vec::<String>::new()),
        BrokenRestore(GitBackend::new(dir.path())),
        registry,
    );

    // Script exhaustion is a fatal engine error; the rollback then fails.
    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, CoreError::RollbackFailure(_)), "{err:?}");
}


#[tokio::test]
async fn denied_command_fails_the_action_but_not_the_run() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"run_command","args":{"cmd":"rm -rf /"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    assert_eq!(report.iterations, 3);
}

#[tokio::test]
async fn unknown_action_fails_closed_and_run_continues() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"teleport","args":{}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    assert_eq!(report.iterations, 3);
}

#[tokio::test]
async fn ask_mode_suspends_on_high_risk_and_resumes_after_approval() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"new.txt","content":"x"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Ask, engine);

    let prompt = match orch.run().await.unwrap() {
        Turn::AwaitingApproval(prompt) => prompt,
        Turn::Finished(report) => panic!("finished without prompting: {report:?}"),
    };
    assert_eq!(prompt.action, "write_file");
    assert_eq!(prompt.risk, RiskClass::High);

    // One plan-stage approval covers the rest of the run: run_tests is also
    // high risk but must not prompt again.
    let report = finish(orch.resume(Decision::Approve).await.unwrap());
    assert!(report.success());
    assert!(dir.path().join("new.txt").exists());
}

#[tokio::test]
async fn denied_action_is_skipped_and_fed_back() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"evil.txt","content":"x"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Ask, engine);

    assert!(matches!(
        orch.run().await.unwrap(),
        Turn::AwaitingApproval(_)
    ));
    // Deny: the action never executes, the run keeps going. The next
    // high-risk action prompts again since no plan approval was granted.
    let turn = orch.resume(Decision::Deny).await.unwrap();
    let report = match turn {
        Turn::AwaitingApproval(prompt) => {
            assert_eq!(prompt.action, "run_tests");
            finish(orch.resume(Decision::Approve).await.unwrap())
        }
        Turn::Finished(report) => report,
    };
    assert!(report.success());
    assert!(!dir.path().join("evil.txt").exists());
    assert_eq!(report.counters.files_changed, 0);
}

#[tokio::test]
async fn paranoid_mode_prompts_even_low_risk_reads() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([r#"[{"tool":"list_files","args":{}}]"#]);
    let mut orch = orchestrator(&dir, ApprovalMode::Paranoid, engine);

    match orch.run().await.unwrap() {
        Turn::AwaitingApproval(prompt) => {
            assert_eq!(prompt.action, "list_files");
            assert_eq!(prompt.risk, RiskClass::Low);
        }
        Turn::Finished(report) => panic!("paranoid mode did not prompt: {report:?}"),
    }
}

#[tokio::test]
async fn abort_while_suspended_rolls_back() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"w.txt","content":"x"}}]"#,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Paranoid, engine);

    assert!(matches!(
        orch.run().await.unwrap(),
        Turn::AwaitingApproval(_)
    ));
    let report = orch.abort("operator interrupt").await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert!(report.rollback_used);
    assert!(!dir.path().join("w.txt").exists());
}

#[tokio::test]
async fn resume_without_pending_approval_is_an_error() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts(Vec::<String>::new());
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let err = orch.resume(Decision::Approve).await.unwrap_err();
    assert!(matches!(err, CoreError::NothingPending));
}

struct AmnesiacStore;

#[async_trait]
impl KnowledgeStore for AmnesiacStore {
    async fn recall(&self, _task: &str) -> anyhow::Result<RecallContext> {
        anyhow::bail!("store unreachable")
    }
    async fn store_outcome(&self, _report: &RunReport) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_recall_tightens_auto_mode_to_ask() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"s.txt","content":"x"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine)
        .with_knowledge(std::sync::Arc::new(AmnesiacStore));

    // Configured auto, but degraded confidence must force a prompt.
    match orch.run().await.unwrap() {
        Turn::AwaitingApproval(prompt) => assert_eq!(prompt.action, "write_file"),
        Turn::Finished(report) => panic!("spike did not engage: {report:?}"),
    }
    let report = finish(orch.resume(Decision::Approve).await.unwrap());
    assert!(report.success());
    assert!(report.spiked);
}


#[tokio::test]
async fn intermediate_checkpoint_every_third_write() {
    let dir = seed_workspace();
    let engine = ScriptedEngine::from_texts([
        r#"[{"tool":"write_file","args":{"path":"1.txt","content":"1"}},
            {"tool":"write_file","args":{"path":"2.txt","content":"2"}},
            {"tool":"write_file","args":{"path":"3.txt","content":"3"}},
            {"tool":"write_file","args":{"path":"4.txt","content":"4"}}]"#,
        PASSING_TESTS,
        DONE,
    ]);
    let mut orch = orchestrator(&dir, ApprovalMode::Auto, engine);

    let report = finish(orch.run().await.unwrap());
    assert!(report.success());
    assert_eq!(report.counters.files_changed, 4);

    // Four writes at interval three: exactly one intermediate snapshot.
    let tags = git_tags(dir.path());
    assert_eq!(
        tags.iter().filter(|t| t.contains("-intermediate-")).count(),
        1,
        "{tags:?}"
    );
}
