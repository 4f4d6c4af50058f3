use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::fs::File;
use uuid::Uuid;

use crate::config::Config;
use crate::converter::fallback::clear;
use crate::converter::format;
use crate::converter::input::FileDescriptor;
use crate::converter::Dispatcher;
use crate::engine::{Engine, SubmitError};
use crate::job::{validate_session_id, JobStatus, JobView};
use crate::state::{JobStore, MemoryJobStore};
use crate::sweeper::Sweeper;

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("artifact not found")]
    NotFound,
    #[error("failed to open artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// An opened download, ready to stream.
#[derive(Debug)]
pub struct Artifact {
    pub file: File,
    pub name: String,
    pub size: u64,
    pub mime: String,
}

/// Entry point for whatever fronts the core: submit, poll, download, clean up.
#[derive(Clone)]
pub struct ConversionService {
    engine: Engine,
    store: Arc<dyn JobStore>,
    config: Arc<Config>,
}

impl ConversionService {
    /// In-memory store and the standard strategy registry.
    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::standard(&config);
        Self::with_parts(config, Arc::new(MemoryJobStore::new()), dispatcher)
    }

    pub fn with_parts(config: Config, store: Arc<dyn JobStore>, dispatcher: Dispatcher) -> Self {
        let config = Arc::new(config);
        Self {
            engine: Engine::new(store.clone(), dispatcher, config.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn submit_batch(
        &self,
        session_id: &str,
        files: Vec<FileDescriptor>,
        targets: &[String],
    ) -> Result<Uuid, SubmitError> {
        self.engine.submit(session_id, files, targets).await
    }

    /// `None` for ids that are malformed, unknown or already swept.
    pub async fn get_job(&self, id: &str) -> Option<JobView> {
        let id = Uuid::parse_str(id).ok()?;
        self.engine.get(id).await.map(|job| job.view())
    }

    /// Opens a converted file or the batch archive of a completed job.
    pub async fn retrieve_artifact(
        &self,
        id: &str,
        filename: &str,
    ) -> Result<Artifact, RetrieveError> {
        let id = Uuid::parse_str(id).map_err(|_| RetrieveError::NotFound)?;
        let job = self.engine.get(id).await.ok_or(RetrieveError::NotFound)?;
        if job.status != JobStatus::Completed {
            return Err(RetrieveError::NotFound);
        }

        let path = if job.outputs.len() > 1 && filename == job.archive_name() {
            self.config
                .session_dir(&job.session_id)
                .join(job.archive_name())
        } else {
            job.outputs
                .iter()
                .find(|o| o.converted_name == filename)
                .map(|o| o.path.clone())
                .ok_or(RetrieveError::NotFound)?
        };

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(RetrieveError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(Artifact {
            file,
            name: filename.to_string(),
            size,
            mime: mime_guess::from_path(filename)
                .first_or_octet_stream()
                .to_string(),
        })
    }

    /// Forgets every job of the session and deletes its directory. Repeating it
    /// is harmless.
    pub async fn cleanup_session(&self, session_id: &str) -> Result<(), SubmitError> {
        let dir = self.session_dir(session_id)?;
        let jobs = self.store.list_by_session(session_id).await;
        for job in &jobs {
            self.store.remove(job.id).await;
        }
        if let Err(e) = clear(&dir).await {
            warn!("failed to remove session directory {}: {}", dir.display(), e);
        }
        info!("cleaned up session {} ({} jobs)", session_id, jobs.len());
        Ok(())
    }

    pub fn supported_targets(&self, extension: &str) -> Vec<&'static str> {
        format::supported_targets(extension)
    }

    /// Where uploads of a session are stored.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, SubmitError> {
        if !validate_session_id(session_id) {
            return Err(SubmitError::InvalidSession(session_id.to_string()));
        }
        Ok(self.config.session_dir(session_id))
    }

    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        Arc::new(Sweeper::new(self.store.clone(), self.config.clone())).start()
    }
}
