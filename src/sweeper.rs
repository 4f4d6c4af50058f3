use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use tokio::fs;
use tokio::time::{interval_at, sleep, Instant};

use crate::config::Config;
use crate::converter::fallback::clear;
use crate::job::Job;
use crate::state::JobStore;

lazy_static! {
    // page images left behind by page-splitting tools, e.g. "report.1.png"
    static ref PAGE_IMAGE: Regex = Regex::new(r"(?i)\.\d+\.(jpg|jpeg|png)$").unwrap();
}

const SCRATCH_PREFIX: &str = ".scratch-";

/// Counts from one sweep, mostly for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs_removed: usize,
    /// Expired jobs left alone because they were still running.
    pub jobs_skipped: usize,
    pub orphans_removed: usize,
    pub temp_removed: usize,
    pub errors: usize,
}

/// Removes expired jobs with their files, orphaned session directories and
/// stray intermediates.
pub struct Sweeper {
    store: Arc<dyn JobStore>,
    config: Arc<Config>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn JobStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// One early sweep after the initial delay, then one per interval.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            sleep(self.config.sweep_initial_delay).await;
            let period = self.config.sweep_interval.max(Duration::from_secs(1));
            let mut ticker = interval_at(Instant::now(), period);

            loop {
                ticker.tick().await;
                let report = self.sweep_at(Utc::now()).await;
                info!(
                    "sweep done: {} jobs removed, {} still running, {} orphans, {} temp files, {} errors",
                    report.jobs_removed,
                    report.jobs_skipped,
                    report.orphans_removed,
                    report.temp_removed,
                    report.errors
                );
            }
        })
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_expired(now, &mut report).await;

        let clock = SystemTime::from(now);
        let sessions = match session_dirs(&self.config.storage_root).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(
                    "cannot list {}: {}",
                    self.config.storage_root.display(),
                    e
                );
                report.errors += 1;
                return report;
            }
        };

        for (name, path) in sessions {
            let jobs = self.store.list_by_session(&name).await;
            if jobs.is_empty() && older_than(&path, clock, self.config.orphan_grace).await {
                if remove(&path, &mut report).await {
                    info!("removed orphaned session directory {}", path.display());
                    report.orphans_removed += 1;
                }
                continue;
            }
            // a running batch may still be writing or reading anything here
            if jobs.iter().any(|job| !job.status.is_terminal()) {
                continue;
            }
            let owned = owned_names(&jobs);
            self.sweep_intermediates(&path, &owned, clock, &mut report)
                .await;
        }

        report
    }

    async fn sweep_expired(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        for job in self.store.list_expired(now).await {
            if !job.status.is_terminal() {
                warn!(
                    "job {} expired while still {:?}, leaving it for a later sweep",
                    job.id, job.status
                );
                report.jobs_skipped += 1;
                continue;
            }

            let session_dir = self.config.session_dir(&job.session_id);
            let shared = self
                .store
                .list_by_session(&job.session_id)
                .await
                .iter()
                .any(|other| other.id != job.id && !(other.is_expired(now) && other.status.is_terminal()));

            let removed = if shared {
                let mut ok = true;
                for path in own_files(&job, &session_dir) {
                    ok &= remove(&path, report).await;
                }
                ok
            } else {
                remove(&session_dir, report).await
            };

            if removed {
                self.store.remove(job.id).await;
                info!("removed expired job {}", job.id);
                report.jobs_removed += 1;
            }
        }
    }

    async fn sweep_intermediates(
        &self,
        dir: &Path,
        owned: &HashSet<OsString>,
        clock: SystemTime,
        report: &mut SweepReport,
    ) {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != IoErrorKind::NotFound {
                    warn!("cannot list {}: {}", dir.display(), e);
                    report.errors += 1;
                }
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("cannot list {}: {}", dir.display(), e);
                    report.errors += 1;
                    break;
                }
            };
            let file_name = entry.file_name();
            if owned.contains(&file_name) {
                continue;
            }
            let name = file_name.to_string_lossy();
            if !name.starts_with(SCRATCH_PREFIX) && !PAGE_IMAGE.is_match(&name) {
                continue;
            }
            let path = entry.path();
            if older_than(&path, clock, self.config.temp_grace).await && remove(&path, report).await {
                debug!("removed intermediate {}", path.display());
                report.temp_removed += 1;
            }
        }
    }
}

/// Artifacts and archive of one job, for sessions that other jobs still use.
fn own_files(job: &Job, session_dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = job.outputs.iter().map(|o| o.path.clone()).collect();
    paths.push(session_dir.join(job.archive_name()));
    paths
}

/// File names of every upload and output a job record still points at.
fn owned_names(jobs: &[Job]) -> HashSet<OsString> {
    jobs.iter()
        .flat_map(|job| {
            let files = job.files.iter().map(|f| f.path.as_path());
            let outputs = job.outputs.iter().map(|o| o.path.as_path());
            files.chain(outputs)
        })
        .filter_map(|path| path.file_name().map(OsString::from))
        .collect()
}

async fn session_dirs(root: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    Ok(dirs)
}

async fn older_than(path: &Path, clock: SystemTime, grace: Duration) -> bool {
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => clock
            .duration_since(modified)
            .map(|age| age > grace)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Best-effort removal. True when the path is gone afterwards.
async fn remove(path: &Path, report: &mut SweepReport) -> bool {
    match clear(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to remove {}: {}", path.display(), e);
            report.errors += 1;
            false
        }
    }
}
