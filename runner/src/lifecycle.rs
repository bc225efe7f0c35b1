//! Job lifecycle state machine
//!
//! ```text
//! Written -> Submitted -> {Queueing, Running, Finishing} -> {Finished, Failed} -> Cleaned
//!            Submitted | Queueing | Running -> Killed -> Cleaned
//! ```

use crate::{
    scheduler::JobHandle,
    seed::SubmissionIndex,
    status::StatusCategory,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Written,
    Submitted,
    Queueing,
    Running,
    Finishing,
    Finished,
    Failed,
    Killed,
    Cleaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// (re-)render the job description
    Write,
    Submit,
    /// status reported by the scheduler
    Observe(StatusCategory),
    Kill,
    Clean,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{event:?} is not allowed in state {state:?}")]
pub struct LifecycleError {
    pub state: JobState,
    pub event: JobEvent,
}

impl JobState {
    /// known to the scheduler and not yet done
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Queueing | Self::Running | Self::Finishing
        )
    }

    /// done, may be cleaned
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed)
    }

    pub fn advance(self, event: JobEvent) -> Result<Self, LifecycleError> {
        use JobEvent::*;
        use JobState::*;

        let next = match (self, event) {
            (Written, Write) => Written,
            (Written, Submit) => Submitted,

            // an undeterminable status never moves a job
            (state, Observe(StatusCategory::Missing)) if state != Written && state != Cleaned => state,
            (state, Observe(category)) if state.is_active() => match category {
                StatusCategory::Queueing => Queueing,
                StatusCategory::Running => Running,
                StatusCategory::Finishing => Finishing,
                StatusCategory::Finished => Finished,
                StatusCategory::Failed => Failed,
                StatusCategory::Missing => state,
            },
            (Finished, Observe(StatusCategory::Finished)) => Finished,
            (Failed, Observe(StatusCategory::Failed)) => Failed,
            (Killed, Observe(_)) => Killed,

            (Submitted | Queueing | Running, Kill) => Killed,

            (Finished | Failed | Killed | Cleaned, Clean) => Cleaned,

            (state, event) => return Err(LifecycleError { state, event }),
        };

        Ok(next)
    }
}

/// one job dispatch within a campaign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionUnit {
    pub index: SubmissionIndex,
    pub artifact: PathBuf,
    pub handle: Option<JobHandle>,
    pub state: JobState,
}

impl SubmissionUnit {
    pub fn written(index: SubmissionIndex, artifact: PathBuf) -> Self {
        Self {
            index,
            artifact,
            handle: None,
            state: JobState::Written,
        }
    }

    pub fn apply(&mut self, event: JobEvent) -> Result<JobState, LifecycleError> {
        self.state = self.state.advance(event)?;

        Ok(self.state)
    }

    pub fn submitted(&mut self, handle: JobHandle) -> Result<JobState, LifecycleError> {
        let state = self.apply(JobEvent::Submit)?;
        self.handle = Some(handle);

        Ok(state)
    }
}

/// a job known only by its handle, as read back from the handle registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedJob {
    pub handle: JobHandle,
    pub state: JobState,
}

impl TrackedJob {
    pub fn new(handle: JobHandle) -> Self {
        Self {
            handle,
            state: JobState::Submitted,
        }
    }

    pub fn apply(&mut self, event: JobEvent) -> Result<JobState, LifecycleError> {
        self.state = self.state.advance(event)?;

        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::{JobEvent::*, JobState::*, *};
    use crate::status::StatusCategory as Status;

    #[test]
    fn happy_path() {
        let mut unit = SubmissionUnit::written(7, PathBuf::from("job7.jdl"));

        assert_eq!(unit.apply(Write), Ok(Written));
        assert_eq!(unit.submitted(JobHandle::new("h7")), Ok(Submitted));
        assert_eq!(unit.apply(Observe(Status::Queueing)), Ok(Queueing));
        assert_eq!(unit.apply(Observe(Status::Running)), Ok(Running));
        assert_eq!(unit.apply(Observe(Status::Missing)), Ok(Running));
        assert_eq!(unit.apply(Observe(Status::Finishing)), Ok(Finishing));
        assert_eq!(unit.apply(Observe(Status::Finished)), Ok(Finished));
        assert_eq!(unit.apply(Observe(Status::Finished)), Ok(Finished));
        assert_eq!(unit.apply(Clean), Ok(Cleaned));
        assert_eq!(unit.apply(Clean), Ok(Cleaned));
        assert_eq!(unit.handle, Some(JobHandle::new("h7")));
    }

    #[test]
    fn kill_only_from_early_states() {
        for state in [Submitted, Queueing, Running] {
            assert_eq!(state.advance(Kill), Ok(Killed));
        }

        for state in [Written, Finishing, Finished, Failed, Killed, Cleaned] {
            assert_eq!(
                state.advance(Kill),
                Err(LifecycleError { state, event: Kill })
            );
        }

        assert_eq!(Killed.advance(Observe(Status::Failed)), Ok(Killed));
        assert_eq!(Killed.advance(Clean), Ok(Cleaned));
    }

    #[test]
    fn invalid_transitions() {
        assert!(Written.advance(Clean).is_err());
        assert!(Written.advance(Observe(Status::Running)).is_err());
        assert!(Running.advance(Submit).is_err());
        assert!(Running.advance(Clean).is_err());
        assert!(Finished.advance(Observe(Status::Running)).is_err());
        assert!(Cleaned.advance(Observe(Status::Missing)).is_err());
        assert!(Submitted.advance(Write).is_err());
    }

    #[test]
    fn failure_is_terminal() {
        let mut job = TrackedJob::new(JobHandle::new("h"));

        assert_eq!(job.apply(Observe(Status::Failed)), Ok(Failed));
        assert!(job.state.is_terminal());
        assert!(!job.state.is_active());
        assert_eq!(job.apply(Clean), Ok(Cleaned));
    }
}
