//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use runrelay_core::backend::HttpBackend;
use runrelay_core::backend::offline::list_offline_runs;
use runrelay_core::config::{RelayConfig, SyncMode, load_config};
use runrelay_core::locks::remove_stale_locks;
use runrelay_core::probe::{ConnectivityProbe, HttpProbe, StaticProbe, resolve_mode};
use runrelay_core::sync::sync_offline_run;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Probe => handle_probe(workspace),
        Commands::Sync {
            run_dirs,
            root,
            force,
        } => handle_sync(workspace, run_dirs, root, force),
        Commands::CleanLocks { dir } => handle_clean_locks(&dir),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<RelayConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn handle_probe(workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let (reachable, mode) = probe_once(config.run.mode, &HttpProbe::from_config(&config.probe));
    println!("probe url:   {}", config.probe.url);
    println!("reachable:   {}", if reachable { "yes" } else { "no" });
    println!("configured:  {}", config.run.mode);
    println!("effective:   {}", mode);
    Ok(())
}

/// Reachability plus the mode it implies, from a single request.
fn probe_once(configured: SyncMode, probe: &dyn ConnectivityProbe) -> (bool, SyncMode) {
    let reachable = probe.is_reachable();
    (reachable, resolve_mode(configured, &StaticProbe(reachable)))
}

fn handle_sync(
    workspace: &Path,
    run_dirs: Vec<PathBuf>,
    root: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let run_dirs = if run_dirs.is_empty() {
        let root = root.unwrap_or_else(|| config.run.offline_root(workspace));
        let found = list_offline_runs(&root)?;
        if found.is_empty() {
            println!("No offline runs under {}", root.display());
            return Ok(());
        }
        found
    } else {
        run_dirs
    };

    let backend = HttpBackend::from_config(&config.server)?;
    let mut failures = Vec::new();
    for dir in &run_dirs {
        match sync_offline_run(dir, &backend, force) {
            Ok(report) if report.skipped() => {
                println!("skipped  {} (already synced)", dir.display());
            }
            Ok(report) => {
                println!(
                    "synced   {} -> {} ({} events)",
                    dir.display(),
                    report.remote_id.as_deref().unwrap_or("?"),
                    report.events_replayed
                );
            }
            Err(e) => {
                tracing::error!(run_dir = %dir.display(), error = %e, "Sync failed");
                println!("failed   {}: {}", dir.display(), e);
                failures.push(dir.clone());
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} of {} runs failed to sync", failures.len(), run_dirs.len())
    }
}

fn handle_clean_locks(dir: &Path) -> anyhow::Result<()> {
    let removed = remove_stale_locks(dir)?;
    for path in &removed {
        println!("removed  {}", path.display());
    }
    println!("{} lock file(s) removed", removed.len());
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load(workspace)?;
            if config.server.api_key.is_some() {
                config.server.api_key = Some("***".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Init => {
            let path = init_config(workspace)?;
            println!("Configuration at: {}", path.display());
            Ok(())
        }
    }
}

/// Write a default workspace config unless one exists. Returns its path.
fn init_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let config_dir = workspace.join(".runrelay");
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Configuration file already exists");
        return Ok(config_path);
    }
    let toml_str = toml::to_string_pretty(&RelayConfig::default())?;
    std::fs::write(&config_path, toml_str)?;
    Ok(config_path)
}
