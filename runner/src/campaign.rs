//! Campaign driver: one entry point per command line action

use crate::{
    collector::{merge::MergeTool, CollectorError, CopyReport, ResultCollector},
    config::{CampaignConfig, ConfigErrors},
    exec::ExternalCommand,
    registry::{HandleRegistry, RegistryError},
    scheduler::{Scheduler, SchedulerError, Schedulers},
    status::StatusReport,
    submit::{JobSubmitter, SubmitError},
    transfer::{Transfer, Transfers},
};
use std::io;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error("Failed to write status report: {0}")]
    Report(#[source] io::Error),
}

/// mutually exclusive top level actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Run,
    Status,
    Finalise,
    Merge,
    Clean,
    Kill,
    Clear,
}

pub struct Campaign<S: Scheduler, T: Transfer, M: MergeTool> {
    config: CampaignConfig,
    scheduler: S,
    transfer: T,
    merger: M,
    registry: HandleRegistry,
}

impl Campaign<Schedulers, Transfers, ExternalCommand> {
    /// campaign with the backends selected in the configuration
    pub fn from_config(config: CampaignConfig) -> Result<Self, CampaignError> {
        let scheduler = Schedulers::load(&config.scheduler)?;
        let transfer = Transfers::load(&config.transfer)?;
        let merger = config.collector.merge.clone();

        Ok(Self::new(config, scheduler, transfer, merger))
    }
}

impl<S: Scheduler, T: Transfer, M: MergeTool> Campaign<S, T, M> {
    pub fn new(config: CampaignConfig, scheduler: S, transfer: T, merger: M) -> Self {
        let registry = HandleRegistry::new(&config.scheduler.registry);

        Self {
            config,
            scheduler,
            transfer,
            merger,
            registry,
        }
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    #[instrument(skip(self), fields(campaign = %self.config.campaign.name))]
    pub fn execute(&self, action: Action) -> Result<(), CampaignError> {
        match action {
            Action::Write => self.write().map(|_| ()),
            Action::Run => self.run(),
            Action::Status => self.status().map(|_| ()),
            Action::Finalise => self.finalise().map(|_| ()),
            Action::Merge => self.merge(),
            Action::Clean => self.clean(),
            Action::Kill => self.kill(),
            Action::Clear => self.clear(),
        }
    }

    pub fn write(&self) -> Result<usize, CampaignError> {
        let units = JobSubmitter::new(&self.config).write()?;

        Ok(units.len())
    }

    pub fn run(&self) -> Result<(), CampaignError> {
        JobSubmitter::new(&self.config).run(&self.scheduler, &self.registry)?;

        Ok(())
    }

    /// query every registered job, print the report and append it to the report file
    pub fn status(&self) -> Result<StatusReport, CampaignError> {
        let handles = self.registry.load()?;
        let report = StatusReport::query(&self.scheduler, &handles)?;

        print!("{}", report.render());
        report
            .append_to(&self.config.scheduler.report)
            .map_err(CampaignError::Report)?;

        Ok(report)
    }

    /// fetch and classify all results, then clean the jobs up
    pub fn finalise(&self) -> Result<CopyReport, CampaignError> {
        let collector = ResultCollector::new(&self.config)?;
        let report = collector.copy(&self.transfer, &self.config.campaign.output_dir)?;

        if !report.classify.failed.is_empty() {
            warn!(
                "{} archives could not be classified and stay in {:?}",
                report.classify.failed.len(),
                collector.staging()
            );
        }

        self.clean()?;

        Ok(report)
    }

    pub fn merge(&self) -> Result<(), CampaignError> {
        let collector = ResultCollector::new(&self.config)?;
        let dataset = collector.merge(&self.merger)?;

        info!("Merged {} artifacts", dataset.artifacts.len());
        Ok(())
    }

    /// blanket cleanup of every registered job, the registry is reset afterwards
    pub fn clean(&self) -> Result<(), CampaignError> {
        let handles = self.registry.load()?;
        if handles.is_empty() {
            info!("No jobs registered, nothing to clean");
            return Ok(());
        }

        // best effort, the cleanup request is issued regardless
        match StatusReport::query(&self.scheduler, &handles) {
            Ok(report) => {
                for job in report.jobs.iter().filter(|job| !job.lifecycle.is_terminal()) {
                    warn!(handle = %job.handle, state = ?job.lifecycle, "Cleaning a job that has not finished");
                }
            }
            Err(error) => warn!(error = %error, "Could not determine job states before cleaning"),
        }

        self.scheduler.clean(&handles)?;
        self.registry.clear()?;

        info!("Cleaned {} jobs", handles.len());
        Ok(())
    }

    /// blanket cancel of every registered job, the registry is reset afterwards
    pub fn kill(&self) -> Result<(), CampaignError> {
        let handles = self.registry.load()?;
        if handles.is_empty() {
            info!("No jobs registered, nothing to kill");
            return Ok(());
        }

        self.scheduler.kill(&handles)?;
        self.registry.clear()?;

        info!("Killed {} jobs", handles.len());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CampaignError> {
        ResultCollector::new(&self.config)?.clear()?;

        Ok(())
    }
}
