//! Result collection: fetch archives into staging, classify them into
//! category buckets in parallel, merge buckets into the final dataset.

pub mod log;
pub mod merge;
pub mod route;

use crate::{
    archive::{self, ArchiveError},
    config::CampaignConfig,
    exec::{ExecError, ExternalCommand},
    fs::{list_files, move_file, ScopedPath},
    transfer::{Transfer, TransferError},
};
use globset::{Glob, GlobMatcher};
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use self::{
    log::ClassifyLog,
    merge::{MergeTool, MergedArtifact, MergedDataset},
    route::{Bucket, Route, RoutingTable},
};
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

const EXTRACT_PREFIX: &str = ".extract-";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector patterns failed to compile")]
    InvalidPatterns,
    #[error("Failed to access {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to list remote output")]
    Transfer(#[from] TransferError),
    #[error("Pruning failed: {0}")]
    Prune(ExecError),
    #[error("Merging {bucket} failed: {source}")]
    MergeTool { bucket: String, source: ExecError },
    #[error("Merging failed for categories: {}", .0.join(", "))]
    Merge(Vec<String>),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CollectorError + '_ {
    move |source| CollectorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyReport {
    pub archives: usize,
    pub classified: usize,
    pub failed: Vec<PathBuf>,
    pub buckets: BTreeSet<Bucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub fetch: FetchReport,
    pub classify: ClassifyReport,
}

#[derive(Debug)]
pub struct ResultCollector {
    table: RoutingTable,
    staging: PathBuf,
    results: PathBuf,
    merged: PathBuf,
    archives: GlobMatcher,
    log: PathBuf,
    prune: Option<ExternalCommand>,
    pool: ThreadPool,
}

impl ResultCollector {
    pub fn new(config: &CampaignConfig) -> Result<Self, CollectorError> {
        let collector = &config.collector;
        let table = RoutingTable::compile(collector).map_err(|errors| {
            for (pattern, err) in errors {
                error!("Failed to compile glob {pattern}: {err}");
            }

            CollectorError::InvalidPatterns
        })?;
        let archives = Glob::new(&collector.archive_glob)
            .map_err(|err| {
                error!("Failed to compile glob {}: {err}", collector.archive_glob);

                CollectorError::InvalidPatterns
            })?
            .compile_matcher();

        let threads = collector.threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, |threads| threads.get())
        });
        debug!("Starting classification pool with {threads} threads");

        Ok(Self {
            table,
            staging: config.staging_dir(),
            results: collector.results_dir.clone(),
            merged: config.merged_dir(),
            archives,
            log: collector.log.clone(),
            prune: collector.prune.clone(),
            pool: ThreadPoolBuilder::new().num_threads(threads).build()?,
        })
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn results(&self) -> &Path {
        &self.results
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// fetch all result archives of `remote` and classify them
    #[instrument(skip(self, transfer), level = "info")]
    pub fn copy<T: Transfer>(&self, transfer: &T, remote: &str) -> Result<CopyReport, CollectorError> {
        let fetch = self.fetch(transfer, remote)?;
        let classify = self.classify_all()?;

        Ok(CopyReport { fetch, classify })
    }

    /// stage every remote archive, one transfer per file
    ///
    /// failing files are logged and skipped, already staged files are not fetched again
    pub fn fetch<T: Transfer>(&self, transfer: &T, remote: &str) -> Result<FetchReport, CollectorError> {
        fs::create_dir_all(&self.staging).map_err(io_error(&self.staging))?;

        let mut report = FetchReport::default();
        let remote = remote.trim_end_matches('/');
        let entries = transfer.list(remote)?;

        info!("Copying {} files from {remote} to {:?}", entries.len(), self.staging);

        for name in entries {
            if !self.archives.is_match(&name) {
                debug!(name = %name, "Skipping remote entry not matching the archive glob");
                continue;
            }

            let target = self.staging.join(&name);
            if fs::metadata(&target).map_or(false, |metadata| metadata.len() > 0) {
                debug!(target = ?target, "Already staged");
                report.skipped += 1;
                continue;
            }

            match transfer.fetch(&format!("{remote}/{name}"), &target) {
                Ok(()) => report.fetched += 1,
                Err(error) => {
                    error!(name = %name, error = %error, "Failed to fetch archive, continuing with the rest");
                    // never leave a partial file behind that would be skipped on the next run
                    let _ = fs::remove_file(&target);
                    report.failed += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            "Finished staging"
        );

        Ok(report)
    }

    /// archives currently waiting in the staging area, sorted by name
    pub fn staged_archives(&self) -> Vec<PathBuf> {
        WalkBuilder::new(&self.staging)
            .standard_filters(false)
            .max_depth(Some(1))
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Failed to list staging area: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
            .map(DirEntry::into_path)
            .filter(|path| {
                path.file_name()
                    .map_or(false, |name| self.archives.is_match(name))
            })
            .sorted()
            .collect_vec()
    }

    /// classify every staged archive, one worker per archive
    ///
    /// A failing archive is logged, kept in staging and reported; it never
    /// stops the other workers.
    #[instrument(skip(self), level = "info")]
    pub fn classify_all(&self) -> Result<ClassifyReport, CollectorError> {
        fs::create_dir_all(&self.results).map_err(io_error(&self.results))?;

        let archives = self.staged_archives();
        let log = ClassifyLog::open(&self.log).map_err(io_error(&self.log))?;

        info!("Organising {} archives into categories", archives.len());

        let outcomes = self.pool.install(|| {
            archives
                .par_iter()
                .map(|archive| (archive, self.classify(archive, &log)))
                .collect::<Vec<_>>()
        });

        let mut report = ClassifyReport {
            archives: archives.len(),
            ..Default::default()
        };

        for (archive, outcome) in outcomes {
            match outcome {
                Ok(buckets) => {
                    report.classified += 1;
                    report.buckets.extend(buckets);
                }
                Err(error) => {
                    error!(archive = ?archive, error = %error, "Failed to classify archive, skipping");
                    report.failed.push(archive.clone());
                }
            }
        }

        if let Err(error) = log.close() {
            warn!(error = ?error, "Failed to flush classify log");
        }

        info!(
            classified = report.classified,
            failed = report.failed.len(),
            "Finished organising output"
        );

        Ok(report)
    }

    /// classify a single archive and consume it
    ///
    /// The archive is extracted next to itself, every contained file is moved
    /// into the bucket its name routes to and everything else is dropped with
    /// the extraction directory. The archive is deleted afterwards, so calling
    /// this again for the same path fails without touching any bucket.
    pub fn classify(&self, archive: &Path, log: &ClassifyLog) -> Result<BTreeSet<Bucket>, CollectorError> {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = archive.parent().unwrap_or(&self.staging);
        let scratch = ScopedPath::create_dir(parent.join(format!("{EXTRACT_PREFIX}{name}")))
            .map_err(io_error(parent))?;

        if let Err(error) = archive::unpack(archive, &scratch) {
            log.record(&name, format_args!("{error}"));

            return Err(error.into());
        }

        let mut buckets = BTreeSet::new();

        for entry in WalkBuilder::new(&*scratch).standard_filters(false).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    log.record(&name, format_args!("failed to walk extracted files: {error}"));
                    continue;
                }
            };

            if !entry.file_type().map_or(false, |kind| kind.is_file()) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            match self.table.route(&file_name) {
                Route::Bucket(bucket) => {
                    let dir = self.table.bucket_dir(&self.results, bucket);
                    fs::create_dir_all(&dir).map_err(io_error(&dir))?;
                    let target = dir.join(entry.file_name());

                    move_file(entry.path(), &target).map_err(io_error(entry.path()))?;
                    log.record(
                        &name,
                        format_args!("{file_name} -> {}", self.table.bucket_name(bucket)),
                    );
                    buckets.insert(bucket);
                }
                Route::Discard => log.record(&name, format_args!("{file_name} discarded")),
                Route::Unmatched => {
                    debug!(archive = %name, file = %file_name, "File matches no category");
                    log.record(&name, format_args!("{file_name} matches no category, dropped"));
                }
            }
        }

        fs::remove_file(archive).map_err(io_error(archive))?;

        Ok(buckets)
    }

    /// files that feed `bucket`: its own directory plus loose files in the
    /// category directory that route to it
    fn bucket_inputs(&self, bucket: Bucket) -> Result<Vec<PathBuf>, CollectorError> {
        let category_dir = self.table.bucket_dir(
            &self.results,
            Bucket {
                variation: None,
                ..bucket
            },
        );
        let dir = self.table.bucket_dir(&self.results, bucket);

        let mut inputs = if dir.is_dir() {
            list_files(&dir).map_err(io_error(&dir))?
        } else {
            Vec::new()
        };

        // undeclared variations left in the category directory never reach the central merge
        if bucket.variation.is_none() {
            let (undeclared, kept): (Vec<_>, Vec<_>) = inputs.into_iter().partition(|path| {
                path.file_name().map_or(false, |name| {
                    self.table.route(&name.to_string_lossy()) == Route::Discard
                })
            });

            for path in undeclared.iter() {
                debug!(file = ?path, "Dropping undeclared variation");
                fs::remove_file(path).map_err(io_error(path))?;
            }
            inputs = kept;
        }

        if bucket.variation.is_some() && category_dir.is_dir() {
            let loose = list_files(&category_dir).map_err(io_error(&category_dir))?;

            inputs.extend(loose.into_iter().filter(|path| {
                path.file_name().map_or(false, |name| {
                    self.table.route(&name.to_string_lossy()) == Route::Bucket(bucket)
                })
            }));
        }

        inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(inputs)
    }

    /// merge all variation buckets of a category in declared order, then the remainder
    fn merge_category<M: MergeTool>(
        &self,
        category: usize,
        merger: &M,
    ) -> Result<Vec<MergedArtifact>, CollectorError> {
        let config = &self.table.categories()[category];
        let output = config.output_name();
        let mut artifacts = Vec::new();

        info!("Merging {} files", config.name);

        let buckets = (0..config.variations.len())
            .map(|variation| Bucket {
                category,
                variation: Some(variation),
            })
            .chain(std::iter::once(Bucket {
                category,
                variation: None,
            }));

        for bucket in buckets {
            let inputs = self.bucket_inputs(bucket)?;
            let bucket_name = self.table.bucket_name(bucket);

            if inputs.is_empty() {
                warn!(bucket = %bucket_name, "Nothing to merge");
                continue;
            }

            let (variation, file_name) = match bucket.variation {
                Some(variation) => {
                    let label = config.variations[variation].label();
                    let file_name = format!("{output}-{label}.{}", config.extension);

                    (Some(config.variations[variation].tag.clone()), file_name)
                }
                None => (None, format!("{output}.{}", config.extension)),
            };
            let path = self.merged.join(file_name);

            merger
                .merge(&inputs, &path)
                .map_err(|source| CollectorError::MergeTool {
                    bucket: bucket_name.clone(),
                    source,
                })?;

            // consumed, later buckets of this category must not see them again
            for input in inputs.iter() {
                fs::remove_file(input).map_err(io_error(input))?;
            }

            debug!(bucket = %bucket_name, inputs = inputs.len(), output = ?path, "Merged bucket");
            artifacts.push(MergedArtifact {
                category: config.name.clone(),
                variation,
                path,
                inputs: inputs.len(),
            });
        }

        let category_dir = self.table.bucket_dir(
            &self.results,
            Bucket {
                category,
                variation: None,
            },
        );
        if category_dir.exists() {
            fs::remove_dir_all(&category_dir).map_err(io_error(&category_dir))?;
        }

        info!("{} files merged", config.name);

        Ok(artifacts)
    }

    /// prune (if configured) and merge every category bucket
    ///
    /// Categories are merged concurrently. A failing category keeps its
    /// bucket in place so the merge can be re-run, the others still complete.
    #[instrument(skip(self, merger), level = "info")]
    pub fn merge<M: MergeTool>(&self, merger: &M) -> Result<MergedDataset, CollectorError> {
        if let Some(prune) = &self.prune {
            info!("Pruning output with {}", prune.program());
            prune
                .run([self.results.as_os_str()], None)
                .map_err(CollectorError::Prune)?;
        }

        fs::create_dir_all(&self.merged).map_err(io_error(&self.merged))?;

        let categories = self.table.categories().len();
        let outcomes = self.pool.install(|| {
            (0..categories)
                .into_par_iter()
                .map(|category| self.merge_category(category, merger))
                .collect::<Vec<_>>()
        });

        let mut dataset = MergedDataset::default();
        let mut failed = Vec::new();

        for (category, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(artifacts) => dataset.artifacts.extend(artifacts),
                Err(error) => {
                    let name = self.table.categories()[category].name.clone();
                    error!(category = %name, error = %error, "Failed to merge category");
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            info!("Output files merged into {:?}", self.merged);

            Ok(dataset)
        } else {
            Err(CollectorError::Merge(failed))
        }
    }

    /// remove the staging area of this campaign
    pub fn clear(&self) -> Result<(), CollectorError> {
        match fs::remove_dir_all(&self.staging) {
            Ok(()) => {
                info!("Removed staging area {:?}", self.staging);
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&self.staging)(error)),
        }
    }
}
