use crate::{
    lifecycle::{JobEvent, JobState, TrackedJob},
    scheduler::{JobHandle, Scheduler, SchedulerError},
};
use std::{
    fmt::{self, Write as _},
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};
use tracing::{debug, info};

/// reduced job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Running,
    Finished,
    Finishing,
    Failed,
    Queueing,
    /// waiting, unknown to the scheduler or not parseable
    Missing,
}

impl StatusCategory {
    /// classify a raw scheduler state by its leading word, e.g. `Failed (FINISHED)`
    pub fn classify(state: Option<&str>) -> Self {
        let word = state
            .and_then(|state| state.split_whitespace().next())
            .map(str::to_lowercase);

        match word.as_deref() {
            Some("running") => Self::Running,
            Some("finished") => Self::Finished,
            Some("finishing") => Self::Finishing,
            Some("failed") => Self::Failed,
            Some("queuing") | Some("queueing") => Self::Queueing,
            _ => Self::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub running: usize,
    pub finished: usize,
    pub finishing: usize,
    pub failed: usize,
    pub queueing: usize,
    pub missing: usize,
}

impl StatusCounts {
    pub fn add(&mut self, category: StatusCategory) {
        self.total += 1;

        match category {
            StatusCategory::Running => self.running += 1,
            StatusCategory::Finished => self.finished += 1,
            StatusCategory::Finishing => self.finishing += 1,
            StatusCategory::Failed => self.failed += 1,
            StatusCategory::Queueing => self.queueing += 1,
            StatusCategory::Missing => self.missing += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub handle: JobHandle,
    pub state: Option<String>,
    pub category: StatusCategory,
    /// lifecycle state of a submitted job after this observation
    pub lifecycle: JobState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub jobs: Vec<JobStatus>,
    pub counts: StatusCounts,
}

const RULE: &str = "================================================================================";

impl StatusReport {
    /// query the scheduler for every handle and reduce the answers into counts
    pub fn query<S: Scheduler>(scheduler: &S, handles: &[JobHandle]) -> Result<Self, SchedulerError> {
        let listing = scheduler.status(handles)?;
        let mut report = Self::default();

        for handle in handles {
            let state = listing.states.get(handle).cloned();
            let category = StatusCategory::classify(state.as_deref());

            debug!(handle = %handle, state = ?state, category = ?category, "Classified job status");
            let mut tracked = TrackedJob::new(handle.clone());
            // a registered job is always active, every observation is accepted
            let lifecycle = tracked
                .apply(JobEvent::Observe(category))
                .unwrap_or(tracked.state);

            report.counts.add(category);
            report.jobs.push(JobStatus {
                handle: handle.clone(),
                state,
                category,
                lifecycle,
            });
        }

        info!(
            total = report.counts.total,
            running = report.counts.running,
            finished = report.counts.finished,
            finishing = report.counts.finishing,
            failed = report.counts.failed,
            queueing = report.counts.queueing,
            missing = report.counts.missing,
            "Job status"
        );

        Ok(report)
    }

    /// fixed layout: per-handle section followed by the summary section
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> fmt::Result {
        let counts = &self.counts;

        writeln!(out, "{RULE}")?;
        writeln!(out, "{} JOB INFORMATION {}", "-".repeat(32), "-".repeat(31))?;
        writeln!(out, "{RULE}")?;
        for job in self.jobs.iter() {
            writeln!(
                out,
                "{}: {} [{:?}]",
                job.handle,
                job.state.as_deref().unwrap_or("missing"),
                job.lifecycle
            )?;
        }
        writeln!(out)?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "{} SUMMARY INFORMATION {}", "-".repeat(30), "-".repeat(29))?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Total jobs: {}", counts.total)?;
        writeln!(out, "Number of running jobs: {}", counts.running)?;
        writeln!(out, "Number of finished jobs: {}", counts.finished)?;
        writeln!(out, "Number of finishing jobs: {}", counts.finishing)?;
        writeln!(out, "Number of failed jobs: {}", counts.failed)?;
        writeln!(out, "Number of queuing jobs: {}", counts.queueing)?;
        writeln!(out, "Number of missing jobs: {}", counts.missing)
    }

    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        file.write_all(self.render().as_bytes())
    }
}
