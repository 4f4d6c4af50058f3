use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;
use crate::converter::error::ErrorKind;
use crate::converter::format;
use crate::converter::input::FileDescriptor;
use crate::converter::output::ConvertedArtifact;
use crate::converter::Dispatcher;
use crate::job::{validate_session_id, Job, PairFailure};
use crate::package;
use crate::state::JobStore;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("invalid session id '{0}'")]
    InvalidSession(String),
    #[error("no files were submitted")]
    NoFiles,
    #[error("no target formats were requested")]
    NoTargets,
}

/// Runs batches in the background and keeps their job records current.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    config: Arc<Config>,
    permits: Arc<Semaphore>,
}

impl Engine {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher, config: Arc<Config>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            store,
            dispatcher,
            config,
            permits,
        }
    }

    /// Stores a pending job and starts it in the background. Must be called
    /// from within a tokio runtime.
    pub async fn submit(
        &self,
        session_id: &str,
        files: Vec<FileDescriptor>,
        targets: &[String],
    ) -> Result<Uuid, SubmitError> {
        if !validate_session_id(session_id) {
            return Err(SubmitError::InvalidSession(session_id.to_string()));
        }
        if files.is_empty() {
            return Err(SubmitError::NoFiles);
        }
        let targets = normalize_targets(targets);
        if targets.is_empty() {
            return Err(SubmitError::NoTargets);
        }

        let job = Job::new(session_id, files, &targets, self.config.ttl, Utc::now());
        let id = job.id;
        info!(
            "job {} submitted: {} files to {}",
            id,
            job.files.len(),
            job.target_format
        );
        self.store.insert(job).await;

        let engine = self.clone();
        tokio::spawn(async move { engine.run(id).await });
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.store.get(id).await
    }

    async fn run(&self, id: Uuid) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("job {} could not start: {}", id, e);
                return;
            }
        };
        self.process(id).await;
    }

    /// Writes the local copy back. False once the job has been cleaned up.
    async fn publish(&self, job: &Job) -> bool {
        if self.store.replace(job.clone()).await {
            return true;
        }
        info!("job {} was removed while processing, stopping", job.id);
        false
    }

    async fn process(&self, id: Uuid) {
        let Some(mut job) = self.store.get(id).await else {
            return;
        };
        if let Err(e) = job.start() {
            warn!("job {} not started: {}", id, e);
            return;
        }
        if !self.publish(&job).await {
            return;
        }

        let targets: Vec<String> = job.target_format.split(',').map(str::to_string).collect();
        let mut pairs = Vec::new();
        for file in &job.files {
            for target in &targets {
                if format::is_supported(&file.extension, target) {
                    pairs.push((file.clone(), target.clone()));
                }
            }
        }

        if pairs.is_empty() {
            let unsupported: Vec<PairFailure> = job
                .files
                .iter()
                .flat_map(|file| {
                    targets.iter().map(move |target| PairFailure {
                        original_name: file.name.clone(),
                        target_format: target.clone(),
                        kind: ErrorKind::UnsupportedConversion,
                        reason: format!("cannot convert .{} to {}", file.extension, target),
                    })
                })
                .collect();
            for failure in unsupported {
                self.record(&mut job, failure);
            }
            warn!("job {} has no supported conversions", id);
            self.finish_failed(job, "none of the requested conversions are supported")
                .await;
            return;
        }

        let total = pairs.len();
        let mut outputs = Vec::new();
        for (done, (file, target)) in pairs.iter().enumerate() {
            match self.dispatcher.convert(file, target).await {
                Ok(artifact) => keep_output(id, &mut outputs, artifact),
                Err(e) => {
                    warn!(
                        "job {}: {} -> {} failed ({}): {}",
                        id,
                        file.name,
                        target,
                        e.kind(),
                        e
                    );
                    self.record(
                        &mut job,
                        PairFailure {
                            original_name: file.name.clone(),
                            target_format: target.clone(),
                            kind: e.kind(),
                            reason: e.to_string(),
                        },
                    );
                }
            }

            let progress = ((done + 1) * 100 / total).min(u8::MAX as usize) as u8;
            if let Err(e) = job.advance(progress) {
                warn!("job {}: progress not recorded: {}", id, e);
            }
            if !self.publish(&job).await {
                return;
            }
        }

        self.finish(job, outputs).await;
    }

    fn record(&self, job: &mut Job, failure: PairFailure) {
        if let Err(e) = job.record_failure(failure) {
            warn!("job {}: failure not recorded: {}", job.id, e);
        }
    }

    async fn finish(&self, mut job: Job, mut outputs: Vec<ConvertedArtifact>) {
        let base = self.config.download_base.trim_end_matches('/');
        let url = match outputs.len() {
            0 => {
                let reason = format!("all {} conversions failed", job.failures.len());
                self.finish_failed(job, reason).await;
                return;
            }
            1 => format!("{}/{}/{}", base, job.id, outputs[0].converted_name),
            _ => {
                let archive = self
                    .config
                    .session_dir(&job.session_id)
                    .join(job.archive_name());
                match package::pack(&outputs, &archive).await {
                    Ok(report) => {
                        outputs.retain(|o| !report.skipped.contains(&o.path));
                        format!("{}/{}/{}", base, job.id, job.archive_name())
                    }
                    Err(e) => {
                        error!("job {}: packaging failed: {}", job.id, e);
                        let reason = format!("packaging failed: {}", e);
                        let failure = PairFailure {
                            original_name: job.archive_name(),
                            target_format: "zip".to_string(),
                            kind: e.kind(),
                            reason: reason.clone(),
                        };
                        self.record(&mut job, failure);
                        self.finish_failed(job, reason).await;
                        return;
                    }
                }
            }
        };

        let count = outputs.len();
        if let Err(e) = job.complete(outputs, url) {
            error!("job {} could not complete: {}", job.id, e);
            return;
        }
        if self.publish(&job).await {
            info!(
                "job {} completed: {} outputs, {} failures",
                job.id,
                count,
                job.failures.len()
            );
        }
    }

    async fn finish_failed(&self, mut job: Job, reason: impl Into<String>) {
        let reason = reason.into();
        if let Err(e) = job.fail(reason.clone()) {
            error!("job {} could not be failed: {}", job.id, e);
            return;
        }
        if self.publish(&job).await {
            warn!("job {} failed: {}", job.id, reason);
        }
    }
}

/// Two pairs can land on the same file, e.g. `a.png` and `a.gif` to pdf. The
/// later conversion overwrote the file, so only its artifact is kept.
fn keep_output(id: Uuid, outputs: &mut Vec<ConvertedArtifact>, artifact: ConvertedArtifact) {
    if let Some(pos) = outputs.iter().position(|o| o.path == artifact.path) {
        warn!(
            "job {}: {} overwrote the output of {}",
            id, artifact.original_name, outputs[pos].original_name
        );
        outputs.remove(pos);
    }
    outputs.push(artifact);
}

/// Trimmed, lowercased, without leading dots, blanks or repeats.
fn normalize_targets(targets: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for target in targets.iter().flat_map(|t| t.split(',')) {
        let target = target.trim().trim_start_matches('.').to_lowercase();
        if !target.is_empty() && !normalized.contains(&target) {
            normalized.push(target);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(original: &str, path: &str) -> ConvertedArtifact {
        ConvertedArtifact {
            original_name: original.to_string(),
            converted_name: "a.pdf".to_string(),
            size: 1,
            path: path.into(),
        }
    }

    #[test]
    fn colliding_outputs_keep_the_latest() {
        let mut outputs = Vec::new();
        keep_output(Uuid::nil(), &mut outputs, artifact("a.png", "/s/a.pdf"));
        keep_output(Uuid::nil(), &mut outputs, artifact("b.png", "/s/b.pdf"));
        keep_output(Uuid::nil(), &mut outputs, artifact("a.gif", "/s/a.pdf"));

        let names: Vec<_> = outputs.iter().map(|o| o.original_name.as_str()).collect();
        assert_eq!(names, vec!["b.png", "a.gif"]);
    }

    #[test]
    fn targets_are_normalized() {
        let targets = vec![" PDF ".to_string(), ".jpg,png".to_string(), "pdf".to_string(), "".to_string()];
        assert_eq!(normalize_targets(&targets), vec!["pdf", "jpg", "png"]);
        assert!(normalize_targets(&[" ".to_string()]).is_empty());
    }
}
