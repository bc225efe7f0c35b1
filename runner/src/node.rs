//! The program running on the grid node: one submission, several runs

use crate::{
    archive::{self, ArchiveError},
    config::ConfigErrors,
    exec::{ExecError, ExternalCommand},
    fs::{copy_into, ScopedPath},
    seed::{seed, RunIndex, Seed, SubmissionIndex, MAX_RUNS_PER_SUBMISSION},
    transfer::{Transfer, TransferError},
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use nix::unistd::gethostname;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Instant,
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
});

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("At most {MAX_RUNS_PER_SUBMISSION} runs fit on one node, got {0}")]
    TooManyRuns(RunIndex),
    #[error("At least one run is required")]
    NoRuns,
    #[error(transparent)]
    Recipe(#[from] ConfigErrors),
    #[error("Step {0} of the recipe is empty")]
    EmptyStep(usize),
    #[error("Failed to access {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Run with seed {0} produced no output")]
    NoOutput(Seed),
    #[error("{failed} of {total} runs failed")]
    Runs { failed: usize, total: usize },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> NodeError + '_ {
    move |source| NodeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// what a single run stages, executes and keeps
///
/// Every string may contain `{seed}`, `{events}`, `{job}`, `{run}`, `{user}`,
/// `{base_dir}`, `{output_dir}` and the keys of the campaign extras.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct NodeRecipe {
    // relative to the base directory, copied into the run directory
    #[serde(default)]
    pub inputs: Vec<String>,
    // program followed by its arguments, executed in order inside the run directory
    pub steps: Vec<Vec<String>>,
    // globs matched against the entries of the run directory
    pub outputs: Vec<String>,
    #[serde(default = "default_archive")]
    pub archive: String,
    // seconds, per step
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_archive() -> String {
    "output{seed}.tar.gz".to_string()
}

impl NodeRecipe {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let input = fs::read_to_string(path).map_err(|error| match error.kind() {
            io::ErrorKind::NotFound => ConfigErrors::FileNotFound(path.to_path_buf()),
            _ => ConfigErrors::MetadataNotFound(error),
        })?;

        Self::from_yaml(&input)
    }
}

/// arguments handed to the node by the job description
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub user: String,
    pub job: SubmissionIndex,
    pub runs: RunIndex,
    pub events: u64,
    pub base_dir: PathBuf,
    pub output_dir: String,
    pub extra: BTreeMap<String, String>,
    // run directories are created below this directory
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub run: RunIndex,
    pub seed: Seed,
    pub archive: String,
    pub files: usize,
}

pub struct RunExecutor<T: Transfer> {
    settings: NodeSettings,
    recipe: NodeRecipe,
    transfer: T,
}

impl<T: Transfer> RunExecutor<T> {
    pub fn new(settings: NodeSettings, recipe: NodeRecipe, transfer: T) -> Result<Self, NodeError> {
        if settings.runs == 0 {
            return Err(NodeError::NoRuns);
        }
        if settings.runs > MAX_RUNS_PER_SUBMISSION {
            return Err(NodeError::TooManyRuns(settings.runs));
        }
        if let Some(step) = recipe.steps.iter().position(Vec::is_empty) {
            return Err(NodeError::EmptyStep(step));
        }

        Ok(Self {
            settings,
            recipe,
            transfer,
        })
    }

    fn placeholders(&self, run: RunIndex) -> BTreeMap<String, String> {
        let settings = &self.settings;
        let mut values = settings.extra.clone();

        values.insert("seed".to_string(), seed(settings.job, run).to_string());
        values.insert("events".to_string(), settings.events.to_string());
        values.insert("job".to_string(), settings.job.to_string());
        values.insert("run".to_string(), run.to_string());
        values.insert("user".to_string(), settings.user.clone());
        values.insert("base_dir".to_string(), settings.base_dir.display().to_string());
        values.insert("output_dir".to_string(), settings.output_dir.clone());

        values
    }

    /// run every run of this submission concurrently and wait for all of them
    #[instrument(skip(self), fields(job = self.settings.job, host = %HOSTNAME.as_str()))]
    pub fn execute(&self) -> Result<Vec<RunOutput>, NodeError> {
        let start = Instant::now();

        info!("Setting up {} runs on {}", self.settings.runs, *HOSTNAME);
        fs::create_dir_all(&self.settings.workdir).map_err(io_error(&self.settings.workdir))?;
        let setup = start.elapsed();

        let outcomes = thread::scope(|scope| {
            let workers = (0..self.settings.runs)
                .map(|run| (run, scope.spawn(move || self.run_single(run))))
                .collect::<Vec<_>>();

            workers
                .into_iter()
                .map(|(run, worker)| (run, worker.join()))
                .collect::<Vec<_>>()
        });
        let total = start.elapsed();

        info!("Environment setting time {:.3}(s)", setup.as_secs_f64());
        info!("Execution time {:.3}(s)", (total - setup).as_secs_f64());
        info!("Total time {:.3}(s)", total.as_secs_f64());

        let mut outputs = Vec::new();
        for (run, outcome) in outcomes {
            match outcome {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(e)) => error!(run, "Run failed: {e}"),
                Err(_) => error!(run, "Run panicked"),
            }
        }

        let runs = usize::from(self.settings.runs);
        if outputs.len() < runs {
            return Err(NodeError::Runs {
                failed: runs - outputs.len(),
                total: runs,
            });
        }

        Ok(outputs)
    }

    /// stage, execute, pack and upload a single run
    ///
    /// The run directory is removed on every exit path.
    pub fn run_single(&self, run: RunIndex) -> Result<RunOutput, NodeError> {
        let values = self.placeholders(run);
        let seed = seed(self.settings.job, run);
        let dir_path = self.settings.workdir.join(format!("run{seed}"));
        let dir = ScopedPath::create_dir(dir_path.clone()).map_err(io_error(&dir_path))?;

        for input in self.recipe.inputs.iter() {
            let source = self.settings.base_dir.join(substitute(input, &values));
            copy_into(&source, &dir).map_err(io_error(&source))?;
        }

        info!(run, seed, "Starting run");
        let started = Instant::now();
        for step in self.recipe.steps.iter() {
            let mut words = step.iter().map(|word| substitute(word, &values));
            let program = words.next().ok_or(NodeError::EmptyStep(0))?;

            ExternalCommand::new(program)
                .with_timeout(self.recipe.timeout)
                .run_inherited(words, Some(&*dir))?;
        }
        info!(run, seed, "Run finished after {:.3}(s)", started.elapsed().as_secs_f64());
        info!(run, seed, "Disk used: {} bytes", disk_usage(&dir));

        let outputs = self.outputs(&values)?;
        let archive_name = substitute(&self.recipe.archive, &values);
        let files = fs::read_dir(&*dir)
            .map_err(io_error(&dir))?
            .filter_map(Result::ok)
            .map(|entry| PathBuf::from(entry.file_name()))
            .filter(|name| outputs.is_match(name))
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(NodeError::NoOutput(seed));
        }

        let archive = dir.join(&archive_name);
        archive::pack(&dir, &files, &archive)?;
        self.transfer.upload(&archive, &self.settings.output_dir)?;

        info!(run, seed, archive = %archive_name, "Uploaded results");
        Ok(RunOutput {
            run,
            seed,
            archive: archive_name,
            files: files.len(),
        })
    }

    fn outputs(&self, values: &BTreeMap<String, String>) -> Result<GlobSet, NodeError> {
        let mut builder = GlobSetBuilder::new();

        for pattern in self.recipe.outputs.iter() {
            let glob = Glob::new(&substitute(pattern, values)).map_err(ConfigErrors::from)?;
            builder.add(glob);
        }

        let outputs = builder.build().map_err(ConfigErrors::from)?;

        Ok(outputs)
    }
}

/// replace every `{key}` with its value, unknown keys are left alone
pub fn substitute(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in values {
        result = result.replace(&format!("{{{key}}}"), value);
    }

    result
}

fn disk_usage(dir: &Path) -> u64 {
    WalkBuilder::new(dir)
        .standard_filters(false)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to walk run directory: {e}");
                None
            }
        })
        .filter_map(|entry| entry.metadata().ok())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
