//! anvil command line
//!
//! `anvil run "<task>"` drives one orchestrated run over a workspace.
//! Approval prompts surface on the terminal; the loop itself never blocks a
//! thread waiting for them.

mod config;
mod http_engine;

use std::io::Write;
use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;

use anvil_core::orchestrator::{Decision, LoopConfig, Orchestrator, Turn};
use anvil_core::tools::standard_registry;
use anvil_guard::ShellGuard;
use anvil_vcs::GitBackend;

use config::Config;
use http_engine::HttpEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("anvil")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Checkpointed, policy-gated orchestration loop for coding tasks")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Execute one task against a workspace")
                .arg(
                    Arg::new("task")
                        .required(true)
                        .help("Task description handed to the reasoning engine"),
                )
                .arg(
                    Arg::new("workspace")
                        .long("workspace")
                        .short('w')
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf))
                        .help("Workspace directory the run is confined to"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["auto", "ask", "paranoid"])
                        .help("Approval mode (overrides config)"),
                )
                .arg(
                    Arg::new("max-iterations")
                        .long("max-iterations")
                        .value_parser(value_parser!(u32))
                        .help("Iteration budget (overrides config)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the final run report as JSON"),
                ),
        )
        .subcommand(
            Command::new("tools")
                .about("List the registered actions with kind and risk class")
                .arg(
                    Arg::new("workspace")
                        .long("workspace")
                        .short('w')
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf)),
                ),
        );

    match cli.get_matches().subcommand() {
        Some(("run", args)) => {
            let task = args
                .get_one::<String>("task")
                .cloned()
                .unwrap_or_default();
            let workspace = args
                .get_one::<PathBuf>("workspace")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."))
                .canonicalize()?;
            let json = args.get_flag("json");

            let mut cfg = Config::load(&workspace)?;
            if let Some(mode) = args.get_one::<String>("mode") {
                cfg.approval_mode = mode.parse().map_err(anyhow::Error::msg)?;
            }
            if let Some(n) = args.get_one::<u32>("max-iterations") {
                cfg.max_iterations = *n;
            }

            run_task(&task, workspace, cfg, json).await
        }
        Some(("tools", args)) => {
            let workspace = args
                .get_one::<PathBuf>("workspace")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."))
                .canonicalize()?;
            let registry = standard_registry(&workspace, ShellGuard::new(&workspace))?;
            for spec in registry.catalog() {
                println!(
                    "{:<18} {:<6} {:<5} {}",
                    spec.name,
                    format!("{:?}", spec.kind).to_lowercase(),
                    format!("{:?}", spec.risk).to_lowercase(),
                    spec.description
                );
            }
            Ok(())
        }
        _ => unreachable!("arg_required_else_help"),
    }
}

async fn run_task(
    task: &str,
    workspace: PathBuf,
    cfg: Config,
    json: bool,
) -> anyhow::Result<()> {
    tracing::info!(
        workspace = %workspace.display(),
        mode = %cfg.approval_mode,
        model = %cfg.engine_model,
        "starting run"
    );

    let mut guard = ShellGuard::new(&workspace).with_timeout(cfg.command_timeout);
    if !cfg.extra_deny.is_empty() {
        // Extra patterns extend the built-in denylist, never replace it.
        let mut deny: Vec<String> = anvil_guard::DEFAULT_DENYLIST
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        deny.extend(cfg.extra_deny.iter().cloned());
        guard = guard.with_denylist(deny);
    }
    if !cfg.allow.is_empty() {
        guard = guard.with_allowlist(cfg.allow.clone());
    }
    let registry = standard_registry(&workspace, guard)?;
    let engine = HttpEngine::new(
        cfg.engine_url.clone(),
        cfg.engine_model.clone(),
        cfg.api_key.clone(),
    );

    let mut orch = Orchestrator::new(
        task,
        workspace.clone(),
        cfg.approval_mode,
        engine,
        GitBackend::new(&workspace),
        registry,
    )
    .with_config(LoopConfig {
        max_iterations: cfg.max_iterations,
        checkpoint_interval: cfg.checkpoint_interval,
        ..LoopConfig::default()
    });

    let mut turn = orch.run().await?;
    let report = loop {
        match turn {
            Turn::Finished(report) => break report,
            Turn::AwaitingApproval(prompt) => {
                eprintln!();
                eprintln!("approval required: {} ({:?} risk)", prompt.action, prompt.risk);
                eprintln!("  reason: {}", prompt.reason);
                eprintln!("  args:   {}", prompt.args);
                let decision = ask_terminal()?;
                turn = orch.resume(decision).await?;
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "run {} {:?} after {} iteration(s), {} action(s), {} file(s) changed",
            report.run_id,
            report.outcome,
            report.iterations,
            report.counters.actions,
            report.counters.files_changed,
        );
        if let Some(reason) = &report.reason {
            println!("reason: {reason}");
        }
        if report.rollback_used {
            println!("workspace was rolled back to its pre-run state");
        }
    }

    std::process::exit(if report.success() { 0 } else { 1 });
}

/// Blocking terminal prompt. Anything other than an explicit yes denies.
fn ask_terminal() -> anyhow::Result<Decision> {
    eprint!("approve? [y/N] ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Ok(Decision::Approve),
        _ => Ok(Decision::Deny),
    }
}
