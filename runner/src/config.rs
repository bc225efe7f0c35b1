use crate::{
    collector::route::RoutingTable,
    exec::ExternalCommand,
    seed::{RunIndex, SubmissionIndex, MAX_RUNS_PER_SUBMISSION},
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("Scheduler not supported: {0}")]
    UnsupportedScheduler(String),
    #[error("Transfer client not supported: {0}")]
    UnsupportedTransfer(String),
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to parse configuration")]
    Parse(#[from] serde_yaml::Error),
    #[error("Configuration contains errors, see log for details")]
    Preflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    pub campaign: CampaignSettings,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    pub collector: CollectorConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    // job name, every submission is named `<name>.<index>`
    pub name: String,
    // program started on the grid node, receives the arguments of `JobDescription`
    #[serde(default = "default_executable")]
    pub executable: String,
    pub n_min: SubmissionIndex,
    pub n_max: SubmissionIndex,
    // runs per submission, each run is a separate process on the node
    #[serde(alias = "processes")]
    pub runs: RunIndex,
    pub events: u64,
    #[serde(alias = "user_name")]
    pub user: String,
    #[serde(default)]
    pub base_dir: PathBuf,
    // remote location with protocol, e.g. gsiftp://...
    pub output_dir: String,
    // forwarded to the node program as `-x key=value`
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    // Name of the selected scheduler client, see Schedulers::load for the selection proccess
    #[serde(default = "default_scheduler")]
    pub name: String,
    // computing element submissions are sent to
    pub endpoint: String,
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_throttle")]
    pub throttle_ms: u64,
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    // seconds, applied to every call of the scheduler client
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_report")]
    pub report: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    #[serde(default = "default_transfer")]
    pub name: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            name: default_transfer(),
            timeout: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    // staging areas are created below this directory, one per campaign
    pub scratch_root: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    // relative to results_dir
    #[serde(default = "default_merged_dir")]
    pub merged_dir: String,
    #[serde(default = "default_archive_glob")]
    pub archive_glob: String,
    // classification workers, defaults to the available parallelism
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_classify_log")]
    pub log: PathBuf,
    #[serde(default = "default_merge")]
    pub merge: ExternalCommand,
    #[serde(default)]
    pub prune: Option<ExternalCommand>,
    // companion files that are dropped during classification
    #[serde(default)]
    pub discard: Vec<String>,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    pub name: String,
    // file name prefix identifying the category, e.g. `LO` or `HEJ_`
    pub prefix: String,
    // directory below results_dir collecting the category
    pub bucket: String,
    // base name of the merged artifacts, defaults to the prefix
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    // glob for the category, `{prefix}` is substituted; defaults to `{prefix}*`
    #[serde(default)]
    pub pattern: Option<String>,
    // merged in declared order
    #[serde(default)]
    pub variations: Vec<VariationConfig>,
    // files matching this but no declared variation are dropped, `{prefix}` is substituted
    #[serde(default)]
    pub variation_glob: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct VariationConfig {
    pub tag: String,
    // used in the merged file name, defaults to the tag with `_` replaced by `-`
    #[serde(default)]
    pub label: Option<String>,
    // `{prefix}` and `{tag}` are substituted; defaults to `{prefix}*.{tag}*`
    #[serde(default)]
    pub pattern: Option<String>,
}

impl CategoryConfig {
    pub fn output_name(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| self.prefix.trim_matches(|c| c == '_' || c == '-').to_string())
    }
}

impl VariationConfig {
    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| {
            self.tag
                .trim_matches(|c| c == '_' || c == '.' || c == '-')
                .replace('_', "-")
        })
    }
}

impl CampaignConfig {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// read, parse and validate a campaign configuration
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let input = std::fs::read_to_string(path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => ConfigErrors::FileNotFound(path.to_path_buf()),
            _ => ConfigErrors::MetadataNotFound(error),
        })?;
        let mut config = Self::from_yaml(&input)?;

        if config.preflight_checks() {
            Err(ConfigErrors::Preflight)
        } else {
            Ok(config)
        }
    }

    /// staging area for this campaign, keyed by the last component of the output location
    pub fn staging_dir(&self) -> PathBuf {
        let addendum = self
            .campaign
            .output_dir
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();

        self.collector
            .scratch_root
            .join(format!("tmp_output_{addendum}"))
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.collector.results_dir.join(&self.collector.merged_dir)
    }

    /// returns true if the configuration contains errors
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;
        let campaign = &self.campaign;

        if campaign.n_min > campaign.n_max {
            error!(
                "campaign.n_min ({}) must not exceed campaign.n_max ({})",
                campaign.n_min, campaign.n_max
            );
            contains_error = true;
        }

        if campaign.runs == 0 || campaign.runs > MAX_RUNS_PER_SUBMISSION {
            error!(
                "campaign.runs ({}) must be between 1 and {MAX_RUNS_PER_SUBMISSION}, this is the maximum number of processes per node",
                campaign.runs
            );
            contains_error = true;
        }

        if campaign.events == 0 {
            error!("campaign.events cannot be 0, runs would not produce any output");
            contains_error = true;
        }

        for (field, value) in [
            ("name", &campaign.name),
            ("executable", &campaign.executable),
            ("user", &campaign.user),
            ("output_dir", &campaign.output_dir),
        ] {
            if value.trim().is_empty() {
                error!("campaign.{field} cannot be empty");
                contains_error = true;
            }
        }

        for key in campaign.extra.keys() {
            if key.is_empty() || key.contains('=') {
                error!("campaign.extra key '{key}' must be non-empty and must not contain '='");
                contains_error = true;
            }
        }

        self.scheduler.name = self.scheduler.name.to_lowercase();
        if self.scheduler.name != "arc" {
            error!(
                "scheduler.name ({}) is not supported, please use `arc` for now",
                self.scheduler.name
            );
            contains_error = true;
        }
        if self.scheduler.endpoint.trim().is_empty() {
            error!("scheduler.endpoint cannot be empty");
            contains_error = true;
        }

        self.transfer.name = self.transfer.name.to_lowercase();
        if !matches!(self.transfer.name.as_str(), "gfal" | "local") {
            error!(
                "transfer.name ({}) is not supported, please use `gfal` or `local`",
                self.transfer.name
            );
            contains_error = true;
        }

        contains_error |= self.check_collector();

        contains_error
    }

    fn check_collector(&self) -> bool {
        let collector = &self.collector;
        let mut contains_error = false;

        if collector.threads == Some(0) {
            error!("collector.threads cannot be 0");
            contains_error = true;
        }

        if collector.categories.is_empty() {
            warn!("collector.categories is empty, every result file will be discarded");
        }

        let duplicated_names = collector
            .categories
            .iter()
            .map(|category| &category.name)
            .duplicates()
            .collect_vec();
        for name in duplicated_names {
            error!("collector.categories contains '{name}' more than once");
            contains_error = true;
        }

        let mut buckets = BTreeSet::new();
        for category in collector.categories.iter() {
            let name = &category.name;

            if category.prefix.is_empty() {
                error!("collector.categories.{name}.prefix cannot be empty");
                contains_error = true;
            }

            if category.bucket.is_empty() || category.bucket == collector.merged_dir {
                error!(
                    "collector.categories.{name}.bucket must be non-empty and differ from collector.merged_dir"
                );
                contains_error = true;
            } else if !buckets.insert(category.bucket.as_str()) {
                error!(
                    "collector.categories.{name}.bucket ({}) is shared with another category",
                    category.bucket
                );
                contains_error = true;
            }

            for tag in category
                .variations
                .iter()
                .map(|variation| &variation.tag)
                .duplicates()
            {
                error!("collector.categories.{name} declares variation {tag} more than once");
                contains_error = true;
            }

            for label in category
                .variations
                .iter()
                .map(VariationConfig::label)
                .duplicates()
            {
                error!("collector.categories.{name} produces the merged label {label} more than once");
                contains_error = true;
            }

            if category.variations.iter().any(|variation| variation.tag.is_empty()) {
                error!("collector.categories.{name} contains a variation with an empty tag");
                contains_error = true;
            }
        }

        if let Err(errors) = RoutingTable::compile(collector) {
            for (pattern, err) in errors {
                error!("Failed to compile glob {pattern}: {err}");
            }
            contains_error = true;
        }

        if let Err(err) = globset::Glob::new(&collector.archive_glob) {
            error!("collector.archive_glob is invalid: {err}");
            contains_error = true;
        }

        let tools = std::iter::once(("merge", &collector.merge))
            .chain(collector.prune.as_ref().map(|prune| ("prune", prune)));
        for (name, tool) in tools {
            // bare program names are resolved through PATH at runtime
            if tool.exec.components().count() > 1 {
                match check_executable(&tool.exec) {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(
                            "collector.{name}.exec ({}) is not executable",
                            tool.exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                    Err(e) => {
                        error!(
                            "Failed to determine if collector.{name}.exec ({}) is an executable: {e}",
                            tool.exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                }
            }
        }

        contains_error
    }
}

fn default_executable() -> String {
    String::from("gridrun-node")
}

fn default_scheduler() -> String {
    String::from("arc")
}

fn default_transfer() -> String {
    String::from("gfal")
}

fn default_registry() -> PathBuf {
    PathBuf::from("multijobs.dat")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_throttle() -> u64 {
    200
}

fn default_settle() -> u64 {
    500
}

fn default_report() -> PathBuf {
    PathBuf::from("logfile.txt")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_merged_dir() -> String {
    String::from("merged")
}

fn default_archive_glob() -> String {
    String::from("*.tar.gz")
}

fn default_classify_log() -> PathBuf {
    PathBuf::from("classify.log")
}

fn default_merge() -> ExternalCommand {
    ExternalCommand::new("yodamerge")
}

fn default_extension() -> String {
    String::from("yoda")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
