use crate::errors::PipelineError;
use log::info;
use std::fs;
use std::path::Path;

/// Makes sure `path` exists, wiping it first when `clean` is set.
pub fn prepare_output(path: &Path, clean: bool) -> Result<(), PipelineError> {
    let fail = |e: std::io::Error| PipelineError::OutputSpace {
        path: path.to_path_buf(),
        source: e,
    };

    if clean && path.exists() {
        info!("Removing previous output in {}", path.display());
        fs::remove_dir_all(path).map_err(fail)?;
    }
    fs::create_dir_all(path).map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_missing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features").join("nested");
        prepare_output(&out, true).unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_clean_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("u001.csv"), "stale").unwrap();

        prepare_output(&out, true).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_keep_existing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("u001.csv"), "kept").unwrap();

        prepare_output(&out, false).unwrap();
        prepare_output(&out, false).unwrap();
        assert_eq!(fs::read_to_string(out.join("u001.csv")).unwrap(), "kept");
    }

    #[test]
    fn test_file_in_the_way_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        fs::write(&out, "not a directory").unwrap();

        let err = prepare_output(&out, false).unwrap_err();
        assert!(matches!(err, PipelineError::OutputSpace { .. }));
    }
}
