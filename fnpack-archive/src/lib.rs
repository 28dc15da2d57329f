use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// A file headed for an archive: `local_path` is the '/'-separated name inside
/// the archive, `root_path` is where the bytes are read from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileEntry {
    pub local_path: String,
    pub root_path: PathBuf,
}

impl FileEntry {
    pub fn new(local_path: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            root_path: root_path.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("the list of files to zip is empty")]
    Empty,

    #[error("Failed to read file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },

    #[error("Failed to write file {path:?}: {source}")]
    WriteFile { path: PathBuf, source: io::Error },

    #[error("Failed to write zip entry {name}: {source}")]
    Zip {
        name: String,
        source: zip::result::ZipError,
    },

    #[error("native zip failed for {path:?}: {reason}")]
    Native { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Writes `entries` into a zip at `dest`, in input order.
///
/// The in-process writer stamps every entry with the DOS epoch and fixed
/// permissions, so the same entries always produce the same bytes. The native
/// writer shells out to `zip -X` and inherits timestamps from a staged copy.
pub fn write_archive(dest: &Path, entries: &[FileEntry], native: bool) -> Result<()> {
    if entries.is_empty() {
        return Err(ArchiveError::Empty);
    }

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ArchiveError::WriteFile {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if native {
        write_native(dest, entries)
    } else {
        write_in_process(dest, entries)
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

fn write_in_process(dest: &Path, entries: &[FileEntry]) -> Result<()> {
    let file = File::create(dest).map_err(|source| ArchiveError::WriteFile {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = entry_options();

    for entry in entries {
        let mut source = File::open(&entry.root_path).map_err(|source| ArchiveError::ReadFile {
            path: entry.root_path.clone(),
            source,
        })?;

        zip.start_file(entry.local_path.as_str(), options)
            .map_err(|source| ArchiveError::Zip {
                name: entry.local_path.clone(),
                source,
            })?;

        io::copy(&mut source, &mut zip).map_err(|source| ArchiveError::WriteFile {
            path: dest.to_path_buf(),
            source,
        })?;
    }

    let mut writer = zip.finish().map_err(|source| ArchiveError::Zip {
        name: dest.display().to_string(),
        source,
    })?;

    io::Write::flush(&mut writer).map_err(|source| ArchiveError::WriteFile {
        path: dest.to_path_buf(),
        source,
    })?;

    Ok(())
}

fn write_native(dest: &Path, entries: &[FileEntry]) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix("fnpack-zip-")
        .tempdir()
        .map_err(|source| ArchiveError::WriteFile {
            path: std::env::temp_dir(),
            source,
        })?;

    for entry in entries {
        let target = staging.path().join(&entry.local_path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ArchiveError::WriteFile {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::copy(&entry.root_path, &target).map_err(|source| ArchiveError::ReadFile {
            path: entry.root_path.clone(),
            source,
        })?;
    }

    let dest = std::path::absolute(dest).map_err(|source| ArchiveError::WriteFile {
        path: dest.to_path_buf(),
        source,
    })?;

    // zip appends to an existing archive instead of replacing it
    if dest.exists() {
        fs::remove_file(&dest).map_err(|source| ArchiveError::WriteFile {
            path: dest.clone(),
            source,
        })?;
    }

    let output = Command::new("zip")
        .arg("-X")
        .arg("-r")
        .arg("-q")
        .arg(&dest)
        .arg(".")
        .current_dir(staging.path())
        .output()
        .map_err(|error| ArchiveError::Native {
            path: dest.clone(),
            reason: error.to_string(),
        })?;

    if !output.status.success() {
        return Err(ArchiveError::Native {
            path: dest,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn sample_entries(root: &Path) -> Vec<FileEntry> {
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::write(root.join("handler.js"), "exports.handler = () => 1;\n").unwrap();
        fs::write(
            root.join("node_modules/left-pad/index.js"),
            "module.exports = (s) => s;\n",
        )
        .unwrap();

        vec![
            FileEntry::new("handler.js", root.join("handler.js")),
            FileEntry::new(
                "node_modules/left-pad/index.js",
                root.join("node_modules/left-pad/index.js"),
            ),
        ]
    }

    #[test]
    fn rejects_empty_file_list() {
        let tmp = tempdir().unwrap();
        let result = write_archive(&tmp.path().join("out.zip"), &[], false);
        assert!(matches!(result, Err(ArchiveError::Empty)));
        assert!(!tmp.path().join("out.zip").exists());
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let tmp = tempdir().unwrap();
        let entries = sample_entries(&tmp.path().join("src"));

        let first = tmp.path().join("a/first.zip");
        let second = tmp.path().join("b/second.zip");
        write_archive(&first, &entries, false).unwrap();
        write_archive(&second, &entries, false).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn entries_keep_local_paths_and_contents() {
        let tmp = tempdir().unwrap();
        let entries = sample_entries(&tmp.path().join("src"));
        let dest = tmp.path().join("out.zip");
        write_archive(&dest, &entries, false).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);

        let mut handler = archive.by_name("handler.js").unwrap();
        let mut body = String::new();
        handler.read_to_string(&mut body).unwrap();
        assert_eq!(body, "exports.handler = () => 1;\n");
        assert_eq!(handler.unix_mode().map(|mode| mode & 0o777), Some(0o644));
        drop(handler);

        assert!(archive.by_name("node_modules/left-pad/index.js").is_ok());
    }

    #[test]
    fn missing_source_is_a_read_error() {
        let tmp = tempdir().unwrap();
        let entries = vec![FileEntry::new("gone.js", tmp.path().join("gone.js"))];
        let result = write_archive(&tmp.path().join("out.zip"), &entries, false);
        assert!(matches!(result, Err(ArchiveError::ReadFile { .. })));
    }
}
