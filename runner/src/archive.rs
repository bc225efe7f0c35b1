//! tar.gz packing of per-run outputs and unpacking during classification

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create archive {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("Failed to unpack archive {path:?}: {source}")]
    Unpack { path: PathBuf, source: io::Error },
}

/// pack `files` (paths relative to `root`) into a gzip compressed tarball
pub fn pack<P: AsRef<Path>>(root: &Path, files: &[P], archive: &Path) -> Result<(), ArchiveError> {
    let create_error = |source| ArchiveError::Create {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::create(archive).map_err(create_error)?;
    let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));

    for relative in files {
        let relative = relative.as_ref();
        let source = root.join(relative);

        if source.is_dir() {
            builder.append_dir_all(relative, &source).map_err(create_error)?;
        } else {
            builder
                .append_path_with_name(&source, relative)
                .map_err(create_error)?;
        }
    }

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .and_then(|mut writer| io::Write::flush(&mut writer))
        .map_err(create_error)?;

    debug!(archive = ?archive, files = files.len(), "Packed archive");

    Ok(())
}

/// unpack a gzip compressed tarball into `destination`
///
/// entries escaping `destination` (absolute paths, `..`) are skipped by `tar`
pub fn unpack(archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
    let unpack_error = |source| ArchiveError::Unpack {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(unpack_error)?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(destination)
        .map_err(unpack_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pack_then_unpack_keeps_names() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("LO-55.yoda"), b"lo").unwrap();
        fs::create_dir_all(root.path().join("Process")).unwrap();
        fs::write(root.path().join("Process/card"), b"card").unwrap();

        let archive = root.path().join("output55.tar.gz");
        pack(root.path(), &["LO-55.yoda", "Process"], &archive).unwrap();

        let target = root.path().join("unpacked");
        fs::create_dir_all(&target).unwrap();
        unpack(&archive, &target).unwrap();

        assert_eq!(fs::read(target.join("LO-55.yoda")).unwrap(), b"lo");
        assert_eq!(fs::read(target.join("Process/card")).unwrap(), b"card");
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("broken.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(matches!(
            unpack(&archive, root.path()),
            Err(ArchiveError::Unpack { .. })
        ));
    }
}
