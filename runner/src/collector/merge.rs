use crate::exec::{ExecError, ExternalCommand};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Statistical merge of same-category outputs into a single artifact
pub trait MergeTool: Sync {
    /// merge `inputs` into `output`, overwriting an existing artifact
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ExecError>;
}

/// `<exec> <params..> <inputs..> -o <output>`, the yodamerge calling convention
impl MergeTool for ExternalCommand {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ExecError> {
        debug!(tool = %self.program(), inputs = inputs.len(), output = ?output, "Merging");

        let args = inputs
            .iter()
            .map(|path| path.as_os_str())
            .chain([std::ffi::OsStr::new("-o"), output.as_os_str()]);

        self.run(args, None).map(|_| ())
    }
}

/// one artifact of a merge invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArtifact {
    pub category: String,
    /// `None` for the variation-agnostic category artifact
    pub variation: Option<String>,
    pub path: PathBuf,
    pub inputs: usize,
}

/// final output of a campaign, one artifact per (category, variation) plus one per category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedDataset {
    pub artifacts: Vec<MergedArtifact>,
}

impl MergedDataset {
    pub fn get(&self, category: &str, variation: Option<&str>) -> Option<&MergedArtifact> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.category == category && artifact.variation.as_deref() == variation)
    }
}
