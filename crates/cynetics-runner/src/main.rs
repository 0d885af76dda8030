use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cynetics_core::{Phase, Run};
use cynetics_runner::backend::create_backend;
use cynetics_runner::config::{Cli, Command, Settings};
use cynetics_runner::controller::{PhaseController, RunSummary};
use cynetics_runner::preflight;
use cynetics_runner::report::ImplementationReport;
use cynetics_runner::scheduler::CancelHandle;
use cynetics_store::{create_store, ArtifactStore, StoreConfig};
use cynetics_verify::LocalCapabilities;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Command::Init { path } = &cli.command {
        let root = match path {
            Some(p) => p.clone(),
            None => std::env::current_dir().context("current directory")?,
        };
        let target = if path.is_some() { root.join("cynetics.json") } else { cli.config.clone() };
        Settings::default_for(&root).save(&target)?;
        println!("wrote {}", target.display());
        return Ok(());
    }

    let mut settings = Settings::load_or_default(&cli.config)?;
    if let Some(n) = cli.max_concurrency {
        settings.engine.max_concurrency = n;
    }

    let store_config = StoreConfig {
        data_dir: cli.data_dir.clone().or_else(|| settings.artifacts_path()),
        in_memory: false,
    };
    let store = ArtifactStore::new(create_store(&store_config));

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Report { run_id } => {
            let report: ImplementationReport = store
                .get_report(&run_id)
                .await
                .with_context(|| format!("no implementation report for run {run_id}"))?;
            print!("{}", report.render());
            Ok(())
        }
        Command::Runs => {
            for run in store.list_runs().await? {
                println!(
                    "{}  {:<9}  {}  {}",
                    run.id,
                    run.phase.as_str(),
                    run.created_at.format("%Y-%m-%d %H:%M"),
                    run.description
                );
            }
            Ok(())
        }
        Command::Run {
            description,
            stack,
            from_phase,
        } => {
            let tech_stack = stack
                .map(|s| serde_json::from_str::<serde_json::Value>(&s))
                .transpose()
                .context("--stack must be a JSON value")?;
            let run = Run::new(description, tech_stack);
            info!(run_id = %run.id, "starting run");
            execute(&settings, store, Target::New(run), from_phase).await
        }
        Command::Resume { run_id, from_phase } => {
            execute(&settings, store, Target::Existing(run_id), from_phase).await
        }
    }
}

enum Target {
    New(Run),
    Existing(String),
}

async fn execute(
    settings: &Settings,
    store: ArtifactStore,
    target: Target,
    from_phase: Option<Phase>,
) -> Result<()> {
    let backend = create_backend(settings)?;
    let workspace: PathBuf = settings.workspace_path();
    preflight::run_all(backend.as_ref(), &workspace).await?;

    let controller = PhaseController::new(
        store,
        backend,
        Arc::new(LocalCapabilities::new(workspace.clone())),
        settings.engine.clone(),
        settings.project_name(),
    );

    let cancel = CancelHandle::new();
    let token = cancel.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting in-flight tasks finish");
            cancel.cancel();
        }
    });

    let summary = match target {
        Target::New(run) => controller.start(run, from_phase, token).await?,
        Target::Existing(id) => controller.resume(&id, from_phase, token).await?,
    };
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    match &summary.report {
        Some(report) => print!("{}", report.render()),
        None => println!("Run {}: stopped in {}", summary.run.id, summary.run.phase),
    }
    if !summary.run.is_done() {
        println!(
            "resume with: cynetics resume --run-id {}",
            summary.run.id
        );
    }
}
