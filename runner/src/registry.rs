use crate::scheduler::JobHandle;
use parking_lot::Mutex;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("Handle registry {path:?} could not be accessed")]
pub struct RegistryError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Flat file of job handles, one per line
///
/// Appends from concurrent submissions are serialized so lines never interleave.
#[derive(Debug)]
pub struct HandleRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HandleRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, source: io::Error) -> RegistryError {
        RegistryError {
            path: self.path.clone(),
            source,
        }
    }

    /// a missing registry is an empty one
    pub fn load(&self) -> Result<Vec<JobHandle>, RegistryError> {
        let _guard = self.lock.lock();

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.error(e)),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(JobHandle::new)
            .collect())
    }

    pub fn append(&self, handle: &JobHandle) -> Result<(), RegistryError> {
        let _guard = self.lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        writeln!(file, "{handle}").map_err(|e| self.error(e))?;

        debug!(%handle, registry = ?self.path, "recorded job handle");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        let _guard = self.lock.lock();

        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(self.error(e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path().join("multijobs.dat"));

        assert!(registry.load().unwrap().is_empty());
        registry.clear().unwrap();
    }

    #[test]
    fn append_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path().join("multijobs.dat"));

        registry.append(&JobHandle::new("gsiftp://ce/jobs/a")).unwrap();
        registry.append(&JobHandle::new("gsiftp://ce/jobs/b")).unwrap();
        fs::write(
            registry.path(),
            fs::read_to_string(registry.path()).unwrap() + "\n  \n",
        )
        .unwrap();

        assert_eq!(
            registry.load().unwrap(),
            vec![
                JobHandle::new("gsiftp://ce/jobs/a"),
                JobHandle::new("gsiftp://ce/jobs/b")
            ]
        );

        registry.clear().unwrap();
        assert!(!registry.path().exists());
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path().join("multijobs.dat"));

        std::thread::scope(|scope| {
            for i in 0..16 {
                let registry = &registry;
                scope.spawn(move || registry.append(&JobHandle::new(format!("job-{i}"))).unwrap());
            }
        });

        let mut handles = registry.load().unwrap();
        handles.sort();
        let mut expected = (0..16)
            .map(|i| JobHandle::new(format!("job-{i}")))
            .collect::<Vec<_>>();
        expected.sort();
        assert_eq!(handles, expected);
    }
}
