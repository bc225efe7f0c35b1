use crate::{
    config::{ConfigErrors, TransferConfig},
    exec::{ExecError, ExternalCommand},
    fs::copy_into,
};
use std::{
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Failed to access {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Moves result archives between grid storage and local disk
pub trait Transfer: Sync {
    /// names of the entries directly below `remote`
    fn list(&self, remote: &str) -> Result<Vec<String>, TransferError>;
    /// fetch a single remote file to `local`
    fn fetch(&self, remote_file: &str, local: &Path) -> Result<(), TransferError>;
    /// upload `local` into the remote directory
    fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError>;
}

/// gfal2 command line clients
#[derive(Debug, Clone)]
pub struct GfalTransfer {
    ls: ExternalCommand,
    copy: ExternalCommand,
}

impl GfalTransfer {
    pub fn new(timeout: Option<u64>) -> Self {
        Self {
            ls: ExternalCommand::new("gfal-ls").with_timeout(timeout),
            copy: ExternalCommand::new("gfal-copy").with_timeout(timeout),
        }
    }
}

impl Transfer for GfalTransfer {
    fn list(&self, remote: &str) -> Result<Vec<String>, TransferError> {
        let output = self.ls.run([remote], None)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch(&self, remote_file: &str, local: &Path) -> Result<(), TransferError> {
        debug!(remote = %remote_file, local = ?local, "gfal-copy");
        self.copy
            .run([OsStr::new("-f"), OsStr::new(remote_file), local.as_os_str()], None)?;

        Ok(())
    }

    fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError> {
        debug!(local = ?local, remote = %remote_dir, "gfal-copy");
        self.copy
            .run([OsStr::new("-f"), local.as_os_str(), OsStr::new(remote_dir)], None)?;

        Ok(())
    }
}

/// storage reachable as a plain directory, e.g. a mounted file system
#[derive(Debug, Clone, Default)]
pub struct LocalTransfer;

impl Transfer for LocalTransfer {
    fn list(&self, remote: &str) -> Result<Vec<String>, TransferError> {
        let io_error = |source| TransferError::Io {
            path: PathBuf::from(remote),
            source,
        };
        let mut names = Vec::new();

        for entry in fs::read_dir(remote).map_err(io_error)? {
            names.push(entry.map_err(io_error)?.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names)
    }

    fn fetch(&self, remote_file: &str, local: &Path) -> Result<(), TransferError> {
        fs::copy(remote_file, local)
            .map(|_| ())
            .map_err(|source| TransferError::Io {
                path: PathBuf::from(remote_file),
                source,
            })
    }

    fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError> {
        let remote = Path::new(remote_dir);

        fs::create_dir_all(remote)
            .and_then(|_| copy_into(local, remote))
            .map_err(|source| TransferError::Io {
                path: remote.to_path_buf(),
                source,
            })
    }
}

#[derive(Debug, Clone)]
pub enum Transfers {
    Gfal(GfalTransfer),
    Local(LocalTransfer),
}

impl Transfers {
    pub fn load(config: &TransferConfig) -> Result<Self, ConfigErrors> {
        match config.name.as_str() {
            "gfal" => Ok(Self::Gfal(GfalTransfer::new(config.timeout))),
            "local" => Ok(Self::Local(LocalTransfer)),
            _ => Err(ConfigErrors::UnsupportedTransfer(config.name.clone())),
        }
    }
}

impl Transfer for Transfers {
    fn list(&self, remote: &str) -> Result<Vec<String>, TransferError> {
        match self {
            Self::Gfal(transfer) => transfer.list(remote),
            Self::Local(transfer) => transfer.list(remote),
        }
    }

    fn fetch(&self, remote_file: &str, local: &Path) -> Result<(), TransferError> {
        match self {
            Self::Gfal(transfer) => transfer.fetch(remote_file, local),
            Self::Local(transfer) => transfer.fetch(remote_file, local),
        }
    }

    fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError> {
        match self {
            Self::Gfal(transfer) => transfer.upload(local, remote_dir),
            Self::Local(transfer) => transfer.upload(local, remote_dir),
        }
    }
}
