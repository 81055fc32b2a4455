//! Local recursive copy strategy.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::transport::{TransferStats, TransportError};

/// Copy a file or directory tree into `destination`.
///
/// Directory contents are merged into `destination`; a single file is copied
/// into it under its own name. Existing files are overwritten. When the
/// destination lives inside the source tree it is not walked.
pub fn copy_recursive(source: &Path, destination: &Path) -> Result<TransferStats, TransportError> {
    if !source.exists() {
        return Err(TransportError::SourceNotFound(source.display().to_string()));
    }

    fs::create_dir_all(destination)?;
    let mut stats = TransferStats::default();

    if source.is_file() {
        let name = source
            .file_name()
            .ok_or_else(|| TransportError::SourceNotFound(source.display().to_string()))?;
        let bytes = fs::copy(source, destination.join(name))?;
        stats.add_file(bytes);
        return Ok(stats);
    }

    let destination_abs = fs::canonicalize(destination)?;
    let walker = WalkDir::new(source)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            fs::canonicalize(e.path())
                .map(|p| p != destination_abs)
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry.map_err(|e| TransportError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = fs::copy(entry.path(), &target)?;
            tracing::debug!(file = %relative.display(), bytes, "copied");
            stats.add_file(bytes);
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copies_directory_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("in");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.csv"), "1,2").unwrap();
        fs::write(src.join("nested/b.csv"), "3,4,5").unwrap();
        let dest = tmp.path().join("work/data");

        let stats = copy_recursive(&src, &dest).unwrap();

        assert_eq!(stats, TransferStats { files: 2, bytes: 8 });
        assert_eq!(fs::read_to_string(dest.join("a.csv")).unwrap(), "1,2");
        assert_eq!(fs::read_to_string(dest.join("nested/b.csv")).unwrap(), "3,4,5");
    }

    #[test]
    fn test_copies_single_file_into_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("export.csv");
        fs::write(&src, "abc").unwrap();
        let dest = tmp.path().join("data");

        let stats = copy_recursive(&src, &dest).unwrap();

        assert_eq!(stats.files, 1);
        assert!(dest.join("export.csv").is_file());
    }

    #[test]
    fn test_missing_source() {
        let tmp = TempDir::new().unwrap();
        let err = copy_recursive(&tmp.path().join("nope"), &tmp.path().join("data")).unwrap_err();
        assert!(matches!(err, TransportError::SourceNotFound(_)));
        assert!(!tmp.path().join("data").exists());
    }

    #[test]
    fn test_destination_inside_source_is_not_copied_into_itself() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("raw.csv"), "x").unwrap();
        let dest = tmp.path().join("data");

        let stats = copy_recursive(tmp.path(), &dest).unwrap();

        assert_eq!(stats.files, 1);
        assert!(dest.join("raw.csv").is_file());
        assert!(!dest.join("data").exists());
    }
}
