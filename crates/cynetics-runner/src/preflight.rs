use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::backend::GenerationBackend;

/// Run all preflight checks before a run starts.
pub async fn run_all(backend: &dyn GenerationBackend, workspace: &Path) -> Result<()> {
    check_workspace(workspace)?;
    check_shell()?;
    check_git();
    backend.preflight_check().await?;
    info!(backend = backend.name(), "all preflight checks passed");
    Ok(())
}

/// The workspace must exist (it is created if missing) and be writable.
fn check_workspace(workspace: &Path) -> Result<()> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;
    let probe = workspace.join(".cynetics-preflight");
    std::fs::write(&probe, b"ok")
        .with_context(|| format!("workspace {} is not writable", workspace.display()))?;
    let _ = std::fs::remove_file(&probe);
    info!("workspace: {}", workspace.display());
    Ok(())
}

/// `run:` criteria are executed through `sh -c`.
fn check_shell() -> Result<()> {
    let status = Command::new("sh")
        .args(["-c", "true"])
        .status()
        .context("sh is not available; command criteria cannot be checked")?;
    if !status.success() {
        bail!("sh -c true failed");
    }
    Ok(())
}

/// Generated tasks often assume git; missing git is only worth a warning.
fn check_git() {
    match Command::new("git").arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            info!("git: {}", version.trim());
        }
        _ => warn!("git not found; tasks that rely on it will fail validation"),
    }
}
