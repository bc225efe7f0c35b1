//! NorduGrid ARC client tools (`arcsub`, `arcstat`, `arckill`, `arcclean`)

use super::{JobHandle, Scheduler, SchedulerError, StatusListing};
use crate::exec::ExternalCommand;
use std::{collections::BTreeMap, ffi::OsStr, path::Path};
use tracing::{debug, error, warn};

// keeps command lines well below ARG_MAX for large campaigns
const HANDLES_PER_CALL: usize = 200;

#[derive(Debug, Clone)]
pub struct ArcScheduler {
    endpoint: String,
    arcsub: ExternalCommand,
    arcstat: ExternalCommand,
    arckill: ExternalCommand,
    arcclean: ExternalCommand,
}

impl ArcScheduler {
    pub fn new(endpoint: String, timeout: Option<u64>) -> Self {
        Self {
            endpoint,
            arcsub: ExternalCommand::new("arcsub").with_timeout(timeout),
            arcstat: ExternalCommand::new("arcstat").with_timeout(timeout),
            arckill: ExternalCommand::new("arckill").with_timeout(timeout),
            arcclean: ExternalCommand::new("arcclean").with_timeout(timeout),
        }
    }

    /// issue `command` for every chunk of handles, continuing past failing chunks
    fn blanket(&self, command: &ExternalCommand, handles: &[JobHandle]) -> Result<(), SchedulerError> {
        let chunks = handles.chunks(HANDLES_PER_CALL);
        let total = chunks.len();
        let mut failed = 0;

        for chunk in chunks {
            if let Err(error) = command.run(chunk, None) {
                error!(error = %error, "{} request failed", command.program());
                failed += 1;
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(SchedulerError::Partial { failed, total })
        }
    }
}

/// extract the job id from `arcsub` output (`Job submitted with jobid: <id>`)
pub fn parse_submission(output: &str) -> Option<JobHandle> {
    output.lines().find_map(|line| {
        line.find("jobid:")
            .map(|start| line[start + "jobid:".len()..].trim())
            .filter(|id| !id.is_empty())
            .map(JobHandle::new)
    })
}

/// map `Job:` blocks of `arcstat` output to the value of their `State:` line
pub fn parse_status(output: &str) -> BTreeMap<JobHandle, String> {
    let mut states = BTreeMap::new();
    let mut current = None;

    for line in output.lines().map(str::trim) {
        if let Some(id) = line.strip_prefix("Job:") {
            current = Some(JobHandle::new(id.trim()));
        } else if let Some(state) = line.strip_prefix("State:") {
            if let Some(handle) = current.take() {
                states.insert(handle, state.trim().to_string());
            }
        }
    }

    states
}

impl Scheduler for ArcScheduler {
    fn submit(&self, artifact: &Path) -> Result<JobHandle, SchedulerError> {
        let output = self.arcsub.run(
            [
                OsStr::new("--direct"),
                OsStr::new("-c"),
                OsStr::new(&self.endpoint),
                artifact.as_os_str(),
            ],
            None,
        )?;

        parse_submission(&output.stdout).ok_or_else(|| SchedulerError::MissingHandle {
            artifact: artifact.to_path_buf(),
            output: output.stdout.trim().to_string(),
        })
    }

    fn status(&self, handles: &[JobHandle]) -> Result<StatusListing, SchedulerError> {
        let mut listing = StatusListing::default();
        let chunks = handles.chunks(HANDLES_PER_CALL);
        let total = chunks.len();
        let mut failed = 0;

        // without arguments arcstat would report every job of the user
        for chunk in chunks {
            let output = match self.arcstat.capture(chunk, None) {
                Ok(output) => output,
                Err(error) => {
                    // handles of this chunk stay unanswered and count as missing
                    warn!(error = %error, handles = chunk.len(), "arcstat failed, continuing with the remaining jobs");
                    failed += 1;
                    continue;
                }
            };

            if !output.success() {
                // arcstat exits nonzero as soon as a single job is unknown
                warn!(code = ?output.code, stderr = %output.stderr.trim(), "arcstat reported problems");
            }
            debug!("arcstat output: {}", output.stdout);

            listing.states.extend(parse_status(&output.stdout));
            listing.raw.push_str(&output.stdout);
        }

        if total > 0 && failed == total {
            Err(SchedulerError::Partial { failed, total })
        } else {
            Ok(listing)
        }
    }

    fn kill(&self, handles: &[JobHandle]) -> Result<(), SchedulerError> {
        self.blanket(&self.arckill, handles)
    }

    fn clean(&self, handles: &[JobHandle]) -> Result<(), SchedulerError> {
        self.blanket(&self.arcclean, handles)
    }
}
