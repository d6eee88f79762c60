//! Upload path validation.
//!
//! Rejects missing files and wrong extensions before any subprocess work.

use std::path::{Path, PathBuf};

/// Mesh container accepted for upload.
pub const MESH_EXTENSION: &str = "glb";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Invalid input file path or file does not exist: {0}")]
    NotFound(String),
    #[error("Invalid file type. Please upload a .{expected} file (got {path})")]
    WrongExtension { path: String, expected: String },
    #[error("Input is not a regular file: {0}")]
    NotAFile(String),
}

/// Validate an uploaded mesh path: must exist, be a file, and end in `.{extension}`
/// (case-insensitive). Returns the canonical absolute path.
pub fn validate_upload(path: &Path, extension: &str) -> Result<PathBuf, UploadError> {
    let display = path.display().to_string();
    let ext_ok = path
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false);
    if !path.exists() {
        return Err(UploadError::NotFound(display));
    }
    if !ext_ok {
        return Err(UploadError::WrongExtension {
            path: display,
            expected: extension.to_string(),
        });
    }
    if !path.is_file() {
        return Err(UploadError::NotAFile(display));
    }
    path.canonicalize()
        .map_err(|_| UploadError::NotFound(path.display().to_string()))
}

/// Validate a `.glb` upload.
pub fn validate_mesh_upload(path: &Path) -> Result<PathBuf, UploadError> {
    validate_upload(path, MESH_EXTENSION)
}

/// Reduce a client-supplied file name to a safe basename (`[A-Za-z0-9._-]`, no leading dots).
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_accepts_uppercase_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("Model.GLB");
        fs::write(&p, b"glTF").unwrap();
        let ok = validate_mesh_upload(&p).unwrap();
        assert!(ok.is_absolute());
    }

    #[test]
    fn test_validate_rejects_wrong_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("model.obj");
        fs::write(&p, b"v 0 0 0").unwrap();
        assert!(matches!(
            validate_mesh_upload(&p),
            Err(UploadError::WrongExtension { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("absent.glb");
        assert!(matches!(validate_mesh_upload(&p), Err(UploadError::NotFound(_))));
    }

    #[test]
    fn test_validate_rejects_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("dir.glb");
        fs::create_dir(&p).unwrap();
        assert!(matches!(validate_mesh_upload(&p), Err(UploadError::NotAFile(_))));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my model (1).glb"), "my_model__1_.glb");
        assert_eq!(sanitize_file_name("..."), "upload");
        assert_eq!(sanitize_file_name("C:\\x\\cat.glb"), "cat.glb");
    }
}
