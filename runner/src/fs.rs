use ignore::WalkBuilder;
use std::{
    fs, io,
    ops::Deref,
    path::{Path, PathBuf},
};
use tracing::{debug, error};

/// A path that is removed once the guard goes out of scope
///
/// Used for everything that only lives for the duration of one step: job
/// description artifacts between rendering and dispatch, per-run working
/// directories on the node, extraction directories during classification.
/// Release happens on every exit path, including early returns through `?`
/// and unwinding. `keep` hands the path back without removing it.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
    armed: bool,
}

impl ScopedPath {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// create the directory (and parents) and guard it
    pub fn create_dir(path: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&path)?;

        Ok(Self::new(path))
    }

    /// disarm the guard and return the underlying path
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let result = match fs::symlink_metadata(&self.path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&self.path),
            Ok(_) => fs::remove_file(&self.path),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => debug!(path = ?self.path, "Released scoped path"),
            Err(error) => error!(path = ?self.path, error = ?error, "Failed to release scoped path"),
        }
    }
}

impl Deref for ScopedPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl AsRef<Path> for ScopedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// move a file, falling back to copy + remove across file systems
///
/// rename(2) is atomic on the same file system and replaces an existing
/// destination, which is what makes concurrent moves into a shared bucket safe.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(error) if error.raw_os_error() == Some(nix::libc::EXDEV) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(error) => Err(error),
    }
}

/// recursively copy `from` (file or directory) into the directory `into`
pub fn copy_into(from: &Path, into: &Path) -> io::Result<()> {
    let parent = from.parent().unwrap_or(Path::new(""));

    for entry in WalkBuilder::new(from).standard_filters(false).build() {
        let entry = entry.map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
        let relative = entry.path().strip_prefix(parent).unwrap_or(entry.path());
        let target = into.join(relative);

        if entry.file_type().map_or(false, |kind| kind.is_dir()) {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// plain files directly inside `dir`, sorted by name
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    Ok(files)
}
