//! Replay offline runs into another backend.

use crate::artifact::Artifact;
use crate::backend::offline::{JOURNAL_FILE, read_journal};
use crate::backend::{RunEvent, TrackingBackend};
use crate::config::SyncMode;
use crate::error::{ArtifactError, Result, SyncError};
use std::path::{Path, PathBuf};

/// Marker written into a run directory once it has been synced.
pub const SYNCED_MARKER: &str = ".synced";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub run_dir: PathBuf,
    /// Id the run had while offline.
    pub offline_id: String,
    /// Id assigned by the target backend; `None` when skipped.
    pub remote_id: Option<String>,
    pub events_replayed: usize,
}

impl SyncReport {
    pub fn skipped(&self) -> bool {
        self.remote_id.is_none()
    }
}

/// Replay one offline run directory into `backend`.
///
/// Already-synced directories are skipped unless `force` is set. A journal
/// that never reached `finish` (the process died) is finished after replay.
pub fn sync_offline_run(
    run_dir: &Path,
    backend: &dyn TrackingBackend,
    force: bool,
) -> Result<SyncReport> {
    let journal_path = run_dir.join(JOURNAL_FILE);
    if !journal_path.is_file() {
        return Err(SyncError::NotARunDir {
            path: run_dir.to_path_buf(),
        }
        .into());
    }

    let entries = read_journal(&journal_path)?;
    let mut events = entries.into_iter().map(|e| e.event);
    let (offline_id, mut settings, config) = match events.next() {
        Some(RunEvent::Init {
            run_id,
            settings,
            config,
        }) => (run_id, settings, config),
        _ => {
            return Err(SyncError::MissingInit { path: journal_path }.into());
        }
    };

    let marker = run_dir.join(SYNCED_MARKER);
    if marker.exists() && !force {
        tracing::info!(run_dir = %run_dir.display(), "Already synced; skipping");
        return Ok(SyncReport {
            run_dir: run_dir.to_path_buf(),
            offline_id,
            remote_id: None,
            events_replayed: 0,
        });
    }

    settings.mode = SyncMode::Online;
    let mut run = backend.open_run(&settings, &config)?;
    let mut replayed = 1;
    let mut finished = false;

    for event in events {
        match event {
            RunEvent::Init { .. } => {
                tracing::warn!(run_dir = %run_dir.display(), "Ignoring repeated init event");
                continue;
            }
            RunEvent::Watch { model, log } => run.watch(&model, log)?,
            RunEvent::Log { step, metrics } => run.log(&metrics, step)?,
            RunEvent::Summary { values } => run.update_summary(&values)?,
            RunEvent::Artifact { artifact, archive } => match archive {
                Some(relative) => replay_archived(run_dir, &relative, &artifact, run.as_mut())?,
                None => run.log_artifact(&artifact)?,
            },
            RunEvent::Finish => {
                run.finish()?;
                finished = true;
            }
        }
        replayed += 1;
        if finished {
            break;
        }
    }

    if !finished {
        tracing::warn!(run_dir = %run_dir.display(), "Journal has no finish event; closing run");
        run.finish()?;
    }

    let remote_id = run.id().to_string();
    let tmp = marker.with_extension("tmp");
    std::fs::write(&tmp, &remote_id)?;
    std::fs::rename(&tmp, &marker)?;

    tracing::info!(
        offline_id = %offline_id,
        remote_id = %remote_id,
        events = replayed,
        "Synced offline run"
    );
    Ok(SyncReport {
        run_dir: run_dir.to_path_buf(),
        offline_id,
        remote_id: Some(remote_id),
        events_replayed: replayed,
    })
}

/// Unpack a stored archive and upload it with the recorded manifest.
fn replay_archived(
    run_dir: &Path,
    relative: &str,
    recorded: &Artifact,
    run: &mut dyn crate::backend::TrackingRun,
) -> Result<()> {
    let archive_path = run_dir.join(relative);
    if !archive_path.is_file() {
        return Err(SyncError::MissingArchive { path: archive_path }.into());
    }

    let staging = std::env::temp_dir().join(format!(
        "runrelay-sync-{}",
        uuid::Uuid::new_v4().simple()
    ));
    let file = std::fs::File::open(&archive_path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ArtifactError::Archive {
        path: archive_path.clone(),
        message: e.to_string(),
    })?;
    zip.extract(&staging).map_err(|e| ArtifactError::Archive {
        path: archive_path.clone(),
        message: e.to_string(),
    })?;

    let result = Artifact::from_dir(&recorded.name, &recorded.kind, &staging)
        .map_err(Into::into)
        .and_then(|rebuilt| {
            if rebuilt.digest != recorded.digest {
                tracing::warn!(
                    artifact = %recorded.name,
                    "Archive contents differ from the journaled manifest"
                );
            }
            run.log_artifact(&rebuilt)
        });

    if let Err(e) = std::fs::remove_dir_all(&staging) {
        tracing::debug!(path = %staging.display(), error = %e, "Could not remove staging dir");
    }
    result
}
