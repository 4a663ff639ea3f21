//! The job registry: the engine's job file plus the reload that follows
//! every mutation.
//!
//! The registry does no locking of its own. Every mutating call must be
//! made while holding the config lock.

mod engine;
mod ini;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pollmesh_id::{JobName, WorkerId};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use engine::{gateway_for, CommandReload, EngineError, EngineGateway, HttpReload, NoopReload};
use ini::RegistryFile;

/// One scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub name: JobName,
    pub interval_secs: u64,
    pub command: String,
    pub assigned_worker: Option<WorkerId>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registry section [{section}]: {message}")]
    Malformed { section: String, message: String },

    #[error("invalid job {name}: {message}")]
    InvalidEntry { name: JobName, message: String },

    #[error("execution engine reload failed: {0}")]
    Reload(#[from] EngineError),
}

#[derive(Clone)]
pub struct JobRegistry {
    path: PathBuf,
    engine: Arc<dyn EngineGateway>,
}

impl JobRegistry {
    pub fn new(path: impl Into<PathBuf>, engine: Arc<dyn EngineGateway>) -> Self {
        Self {
            path: path.into(),
            engine,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All jobs in file order. A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<JobEntry>, RegistryError> {
        Ok(self.read_file().await?.jobs())
    }

    /// Inserts or replaces a job, then reloads the engine.
    #[instrument(skip(self, entry), fields(job = %entry.name))]
    pub async fn add_job(&self, entry: &JobEntry) -> Result<(), RegistryError> {
        validate(entry)?;
        let mut file = self.read_file().await?;
        file.upsert(entry.clone());
        self.write_file(&file).await?;
        info!(
            worker = ?entry.assigned_worker.map(|w| w.to_string()),
            interval_secs = entry.interval_secs,
            "Job written to registry"
        );
        self.engine.reload().await?;
        Ok(())
    }

    /// Removes a job, returning whether it was present.
    #[instrument(skip(self), fields(job = %name))]
    pub async fn delete_job(&self, name: JobName) -> Result<bool, RegistryError> {
        let mut file = self.read_file().await?;
        let found = file.remove(name);
        if found {
            self.write_file(&file).await?;
            info!("Job removed from registry");
        } else {
            debug!("Job not present in registry");
        }
        self.engine.reload().await?;
        Ok(found)
    }

    /// Rewrites the full job set in one write and one reload.
    pub async fn replace_jobs(&self, entries: &[JobEntry]) -> Result<(), RegistryError> {
        for entry in entries {
            validate(entry)?;
        }
        let mut file = self.read_file().await?;
        file.set_jobs(entries);
        self.write_file(&file).await?;
        info!(jobs = entries.len(), "Registry rewritten");
        self.engine.reload().await?;
        Ok(())
    }

    async fn read_file(&self) -> Result<RegistryFile, RegistryError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => RegistryFile::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(source) => Err(RegistryError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Writes via a sibling temp file and rename so the engine never sees a
    /// partial file.
    async fn write_file(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let write_err = |source| RegistryError::Write {
            path: self.path.clone(),
            source,
        };
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, file.render()).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

fn validate(entry: &JobEntry) -> Result<(), RegistryError> {
    let invalid = |message: &str| RegistryError::InvalidEntry {
        name: entry.name,
        message: message.to_string(),
    };
    if entry.interval_secs == 0 {
        return Err(invalid("interval must be positive"));
    }
    if entry.command.trim().is_empty() {
        return Err(invalid("command must not be empty"));
    }
    if entry.command.contains(['\n', '\r']) {
        return Err(invalid("command must be a single line"));
    }
    Ok(())
}
