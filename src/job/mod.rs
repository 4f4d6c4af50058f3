use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::converter::error::ErrorKind;
use crate::converter::input::FileDescriptor;
use crate::converter::output::ConvertedArtifact;

pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Why one (file, target) pair produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairFailure {
    pub original_name: String,
    pub target_format: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("job is {actual:?}, expected {expected:?}")]
    WrongStatus {
        expected: JobStatus,
        actual: JobStatus,
    },
    #[error("a job cannot complete without outputs")]
    NoOutputs,
}

/// One batch submission and everything known about its progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub session_id: String,
    pub files: Vec<FileDescriptor>,
    /// Requested targets as submitted, comma-joined.
    pub target_format: String,
    pub status: JobStatus,
    pub progress: u8,
    pub outputs: Vec<ConvertedArtifact>,
    pub download_url: Option<String>,
    pub failures: Vec<PairFailure>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        session_id: impl Into<String>,
        files: Vec<FileDescriptor>,
        targets: &[String],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            files,
            target_format: targets.join(","),
            status: JobStatus::Pending,
            progress: 0,
            outputs: Vec::new(),
            download_url: None,
            failures: Vec::new(),
            failure_reason: None,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// File name of the archive built when a job has several outputs.
    pub fn archive_name(&self) -> String {
        format!("converted-{}.zip", self.id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn expect(&self, expected: JobStatus) -> Result<(), JobStateError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(JobStateError::WrongStatus {
                expected,
                actual: self.status,
            })
        }
    }

    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.expect(JobStatus::Pending)?;
        self.status = JobStatus::Processing;
        Ok(())
    }

    /// Moves progress forward. Stays below 100 until the job is terminal.
    pub fn advance(&mut self, progress: u8) -> Result<(), JobStateError> {
        self.expect(JobStatus::Processing)?;
        self.progress = self.progress.max(progress.min(99));
        Ok(())
    }

    pub fn record_failure(&mut self, failure: PairFailure) -> Result<(), JobStateError> {
        self.expect(JobStatus::Processing)?;
        self.failures.push(failure);
        Ok(())
    }

    pub fn complete(
        &mut self,
        outputs: Vec<ConvertedArtifact>,
        download_url: String,
    ) -> Result<(), JobStateError> {
        self.expect(JobStatus::Processing)?;
        if outputs.is_empty() {
            return Err(JobStateError::NoOutputs);
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.outputs = outputs;
        self.download_url = Some(download_url);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), JobStateError> {
        self.expect(JobStatus::Processing)?;
        self.status = JobStatus::Failed;
        self.progress = 100;
        self.outputs.clear();
        self.download_url = None;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            status: self.status,
            progress: self.progress,
            download_url: self.download_url.clone(),
            converted_files: self
                .outputs
                .iter()
                .map(|o| ConvertedFile {
                    original_name: o.original_name.clone(),
                    converted_name: o.converted_name.clone(),
                    size: o.size,
                })
                .collect(),
            failures: self.failures.clone(),
            failure_reason: self.failure_reason.clone(),
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedFile {
    pub original_name: String,
    pub converted_name: String,
    pub size: u64,
}

/// What a poller sees of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub converted_files: Vec<ConvertedFile>,
    pub failures: Vec<PairFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Session ids become directory names, so only a safe alphabet is allowed.
pub fn validate_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn job() -> Job {
        Job::new(
            "s1",
            vec![FileDescriptor::new("a.png", 1, "image/png", "/s1/a.png")],
            &["jpg".to_string(), "pdf".to_string()],
            Duration::from_secs(60),
            Utc::now(),
        )
    }

    fn artifact() -> ConvertedArtifact {
        ConvertedArtifact {
            original_name: "a.png".to_string(),
            converted_name: "a.jpg".to_string(),
            size: 10,
            path: PathBuf::from("/s1/a.jpg"),
        }
    }

    #[test]
    fn new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.target_format, "jpg,pdf");
        assert_eq!(job.expires_at - job.created_at, TimeDelta::seconds(60));
        assert!(!job.is_expired(job.created_at));
        assert!(job.is_expired(job.expires_at));
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut job = job();
        assert!(job.advance(10).is_err());
        job.start().unwrap();
        job.advance(50).unwrap();
        job.advance(20).unwrap();
        assert_eq!(job.progress, 50);
        job.advance(100).unwrap();
        assert_eq!(job.progress, 99);
    }

    #[test]
    fn completion_requires_outputs() {
        let mut job = job();
        job.start().unwrap();
        assert_eq!(
            job.complete(Vec::new(), "/x".to_string()),
            Err(JobStateError::NoOutputs)
        );
        job.complete(vec![artifact()], "/api/download/x/a.jpg".to_string())
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.fail("late").is_err());
    }

    #[test]
    fn failure_clears_outputs() {
        let mut job = job();
        job.start().unwrap();
        job.record_failure(PairFailure {
            original_name: "a.png".to_string(),
            target_format: "jpg".to_string(),
            kind: ErrorKind::ConversionFailed,
            reason: "boom".to_string(),
        })
        .unwrap();
        job.fail("all conversions failed").unwrap();

        let view = job.view();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.progress, 100);
        assert!(view.converted_files.is_empty());
        assert!(view.download_url.is_none());
        assert_eq!(view.failures.len(), 1);
    }

    #[test]
    fn view_serializes_camel_case() {
        let mut job = job();
        job.start().unwrap();
        job.complete(vec![artifact()], "/api/download/x/a.jpg".to_string())
            .unwrap();
        let json = serde_json::to_value(job.view()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["downloadUrl"], "/api/download/x/a.jpg");
        assert_eq!(json["convertedFiles"][0]["convertedName"], "a.jpg");
        assert!(json.get("failureReason").is_none());
    }

    #[test]
    fn session_ids_are_path_safe() {
        assert!(validate_session_id("abc-DEF_123"));
        assert!(!validate_session_id(""));
        assert!(!validate_session_id("../etc"));
        assert!(!validate_session_id("a b"));
        assert!(!validate_session_id(&"x".repeat(129)));
    }
}
