pub mod arc;

use crate::{
    config::{ConfigErrors, SchedulerConfig},
    exec::ExecError,
};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Scheduler accepted {artifact:?} but returned no job handle: {output}")]
    MissingHandle { artifact: PathBuf, output: String },
    #[error("{failed} of {total} scheduler requests failed")]
    Partial { failed: usize, total: usize },
}

/// scheduler-assigned identifier of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::ffi::OsStr> for JobHandle {
    fn as_ref(&self) -> &std::ffi::OsStr {
        self.0.as_ref()
    }
}

/// raw scheduler answer for a status query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusListing {
    pub raw: String,
    /// status string per handle, handles without an answer are absent
    pub states: BTreeMap<JobHandle, String>,
}

/// The grid middleware as seen by a campaign: submit, poll, cancel, clean up
pub trait Scheduler: Sync {
    fn submit(&self, artifact: &Path) -> Result<JobHandle, SchedulerError>;

    /// query every handle, unknown handles must not fail the whole query
    fn status(&self, handles: &[JobHandle]) -> Result<StatusListing, SchedulerError>;

    /// blanket cancel request
    fn kill(&self, handles: &[JobHandle]) -> Result<(), SchedulerError>;

    /// blanket cleanup request
    fn clean(&self, handles: &[JobHandle]) -> Result<(), SchedulerError>;
}

#[derive(Debug, Clone)]
pub enum Schedulers {
    Arc(arc::ArcScheduler),
}

impl Schedulers {
    pub fn load(config: &SchedulerConfig) -> Result<Self, ConfigErrors> {
        match config.name.as_str() {
            "arc" => Ok(Self::Arc(arc::ArcScheduler::new(
                config.endpoint.clone(),
                config.timeout,
            ))),
            _ => Err(ConfigErrors::UnsupportedScheduler(config.name.clone())),
        }
    }
}

impl Scheduler for Schedulers {
    fn submit(&self, artifact: &Path) -> Result<JobHandle, SchedulerError> {
        match self {
            Self::Arc(scheduler) => scheduler.submit(artifact),
        }
    }

    fn status(&self, handles: &[JobHandle]) -> Result<StatusListing, SchedulerError> {
        match self {
            Self::Arc(scheduler) => scheduler.status(handles),
        }
    }

    fn kill(&self, handles: &[JobHandle]) -> Result<(), SchedulerError> {
        match self {
            Self::Arc(scheduler) => scheduler.kill(handles),
        }
    }

    fn clean(&self, handles: &[JobHandle]) -> Result<(), SchedulerError> {
        match self {
            Self::Arc(scheduler) => scheduler.clean(handles),
        }
    }
}
