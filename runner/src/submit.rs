use crate::{
    config::CampaignConfig,
    description::JobDescription,
    fs::ScopedPath,
    lifecycle::{JobEvent, LifecycleError, SubmissionUnit},
    registry::{HandleRegistry, RegistryError},
    scheduler::{Scheduler, SchedulerError},
    seed::SubmissionIndex,
};
use std::{
    collections::VecDeque,
    io,
    ops::RangeInclusive,
    path::PathBuf,
    thread::{self, ScopedJoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, info, instrument};

/// dispatches waiting on the scheduler at the same time
pub const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to write job description {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{failed} of {total} submissions failed")]
    Dispatch { failed: usize, total: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// outcome per submission unit, in index order
#[derive(Debug, Default)]
pub struct SubmitReport {
    pub units: Vec<SubmissionUnit>,
    pub failed: Vec<(SubmissionIndex, String)>,
}

#[derive(Debug, Clone)]
pub struct JobSubmitter {
    config: CampaignConfig,
    throttle: Duration,
    settle: Duration,
}

impl JobSubmitter {
    pub fn new(config: &CampaignConfig) -> Self {
        Self {
            config: config.clone(),
            throttle: Duration::from_millis(config.scheduler.throttle_ms),
            settle: Duration::from_millis(config.scheduler.settle_ms),
        }
    }

    pub fn range(&self) -> RangeInclusive<SubmissionIndex> {
        self.config.campaign.n_min..=self.config.campaign.n_max
    }

    fn render(&self, index: SubmissionIndex) -> Result<SubmissionUnit, SubmitError> {
        let description = JobDescription::for_submission(&self.config.campaign, index);
        let artifact = description
            .write(&self.config.scheduler.artifact_dir)
            .map_err(|source| SubmitError::Write {
                path: description.artifact_path(&self.config.scheduler.artifact_dir),
                source,
            })?;

        let mut unit = SubmissionUnit::written(index, artifact);
        unit.apply(JobEvent::Write)?;

        Ok(unit)
    }

    /// render every job description without dispatching, the artifacts stay on disk
    #[instrument(skip(self), fields(campaign = %self.config.campaign.name))]
    pub fn write(&self) -> Result<Vec<SubmissionUnit>, SubmitError> {
        let units = self
            .range()
            .map(|index| self.render(index))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Wrote {} job descriptions", units.len());
        Ok(units)
    }

    /// render and dispatch the whole range, every handle is recorded in `registry`
    #[instrument(skip_all, fields(campaign = %self.config.campaign.name))]
    pub fn run<S: Scheduler>(
        &self,
        scheduler: &S,
        registry: &HandleRegistry,
    ) -> Result<SubmitReport, SubmitError> {
        let units = self.write()?;
        let total = units.len();

        let outcomes = thread::scope(|scope| {
            let mut in_flight = VecDeque::with_capacity(MAX_IN_FLIGHT);
            let mut outcomes = Vec::with_capacity(total);

            for unit in units {
                if in_flight.len() == MAX_IN_FLIGHT {
                    if let Some(oldest) = in_flight.pop_front() {
                        outcomes.push(ScopedJoinHandle::join(oldest));
                    }
                }

                let odd = unit.index % 2 == 1;
                in_flight.push_back(scope.spawn(move || dispatch(scheduler, registry, unit)));

                // rate limit towards the shared endpoint
                if odd {
                    thread::sleep(self.throttle);
                }
            }

            outcomes.extend(in_flight.into_iter().map(ScopedJoinHandle::join));
            outcomes
        });

        let mut report = SubmitReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(Ok(unit)) => report.units.push(unit),
                Ok(Err((index, reason))) => {
                    error!(index, "submission failed: {reason}");
                    report.failed.push((index, reason));
                }
                Err(_) => error!("submission worker panicked"),
            }
        }

        thread::sleep(self.settle);

        let failed = total - report.units.len();
        if failed > 0 {
            return Err(SubmitError::Dispatch { failed, total });
        }

        info!("Submitted {total} jobs");
        Ok(report)
    }
}

fn dispatch<S: Scheduler>(
    scheduler: &S,
    registry: &HandleRegistry,
    mut unit: SubmissionUnit,
) -> Result<SubmissionUnit, (SubmissionIndex, String)> {
    let index = unit.index;
    // the artifact is only needed until the scheduler has accepted it
    let artifact = ScopedPath::new(unit.artifact.clone());

    let handle = scheduler
        .submit(&artifact)
        .map_err(|e: SchedulerError| (index, e.to_string()))?;
    registry
        .append(&handle)
        .map_err(|e| (index, e.to_string()))?;
    unit.submitted(handle).map_err(|e| (index, e.to_string()))?;

    info!(index, handle = %unit.handle.as_ref().map(|h| h.as_str()).unwrap_or_default(), "submitted");
    Ok(unit)
}
