use crate::{
    config::CampaignSettings,
    seed::{RunIndex, SubmissionIndex},
};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// xRSL job description for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    pub index: SubmissionIndex,
    pub executable: String,
    pub arguments: Vec<String>,
    pub jobname: String,
    pub stdout: String,
    pub stderr: String,
    pub gmlog: String,
    pub count: RunIndex,
    pub count_per_node: RunIndex,
}

impl JobDescription {
    pub fn for_submission(settings: &CampaignSettings, index: SubmissionIndex) -> Self {
        let mut arguments = vec![
            "-u".to_string(),
            settings.user.clone(),
            "-j".to_string(),
            index.to_string(),
            "-p".to_string(),
            settings.runs.to_string(),
            "-e".to_string(),
            settings.events.to_string(),
            "-b".to_string(),
            settings.base_dir.display().to_string(),
            "-o".to_string(),
            settings.output_dir.clone(),
        ];

        for (key, value) in &settings.extra {
            arguments.push("-x".to_string());
            arguments.push(format!("{key}={value}"));
        }

        Self {
            index,
            executable: settings.executable.clone(),
            arguments,
            jobname: format!("{}.{index}", settings.name),
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
            gmlog: format!("job{index}.log"),
            count: settings.runs,
            count_per_node: settings.runs,
        }
    }

    pub fn artifact_name(index: SubmissionIndex) -> String {
        format!("job{index}.jdl")
    }

    pub fn artifact_path(&self, dir: &Path) -> PathBuf {
        dir.join(Self::artifact_name(self.index))
    }

    /// render into `dir`, replacing an earlier artifact for the same index
    pub fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = self.artifact_path(dir);
        std::fs::write(&path, self.to_string())?;

        Ok(path)
    }
}

// xRSL literals are single quoted, embedded quotes are doubled
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for JobDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "&(executable = {})", quote(&self.executable))?;

        let arguments = self
            .arguments
            .iter()
            .map(|arg| quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(f, "(arguments = {arguments})")?;
        writeln!(f, "(jobname = {})", quote(&self.jobname))?;
        writeln!(f, "(stdout = {})", quote(&self.stdout))?;
        writeln!(f, "(stderr = {})", quote(&self.stderr))?;
        writeln!(f, "(gmlog = {})", quote(&self.gmlog))?;
        writeln!(f, "(count = {})", quote(&self.count.to_string()))?;
        writeln!(f, "(countpernode = {})", quote(&self.count_per_node.to_string()))
    }
}
