use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;

const VALID_TYPES: [&str; 6] = [
    "text/csv",
    "application/vnd.apache.parquet",
    "application/octet-stream",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
];

static VALID_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(csv|parquet|pq|xls|xlsx|txt)$").expect("extension pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub declared_type: Option<String>,
    pub size: u64,
}

impl SelectedFile {
    /// Reads size from the filesystem and guesses the MIME type from the
    /// extension, the way a browser fills in `File.type`.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(AppError::InvalidInput(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let declared_type = mime_guess::from_path(&path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(Self {
            path,
            name,
            declared_type,
            size: metadata.len(),
        })
    }

    /// MIME type sent with the multipart part.
    pub fn content_type(&self) -> &str {
        self.declared_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

pub fn check_file_type(file: &SelectedFile) -> bool {
    let type_ok = file
        .declared_type
        .as_deref()
        .map(|t| VALID_TYPES.contains(&t))
        .unwrap_or(false);
    type_ok || VALID_EXTENSION.is_match(&file.name)
}

pub fn check_file(file: &SelectedFile, max_size: u64) -> Result<(), AppError> {
    if !check_file_type(file) {
        tracing::warn!(
            "Rejected file {} with type {:?}",
            file.name,
            file.declared_type
        );
        return Err(AppError::FileRejected(
            "Please select a valid file type".to_string(),
        ));
    }

    if file.size > max_size {
        tracing::warn!("Rejected file {}: {} bytes", file.name, file.size);
        return Err(AppError::FileRejected(format!(
            "File size must be less than {}",
            format_size(max_size)
        )));
    }

    Ok(())
}

/// Whole-unit rendering of a byte limit: `10GB`, `500MB`, `64KB`, else bytes.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        0 => "0 bytes".to_string(),
        b if b % GB == 0 => format!("{}GB", b / GB),
        b if b % MB == 0 => format!("{}MB", b / MB),
        b if b % KB == 0 => format!("{}KB", b / KB),
        b => format!("{} bytes", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, declared_type: Option<&str>, size: u64) -> SelectedFile {
        SelectedFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            declared_type: declared_type.map(str::to_string),
            size,
        }
    }

    #[test]
    fn accepts_by_extension_regardless_of_case() {
        for name in ["sales.csv", "DATA.PARQUET", "t.pq", "book.xls", "book.XLSX", "notes.txt"] {
            assert!(check_file_type(&file(name, None, 1)), "{} should pass", name);
        }
    }

    #[test]
    fn accepts_by_declared_type() {
        assert!(check_file_type(&file("export", Some("text/csv"), 1)));
        assert!(check_file_type(&file("blob.bin", Some("application/octet-stream"), 1)));
    }

    #[test]
    fn rejects_when_both_checks_fail() {
        assert!(!check_file_type(&file("photo.png", Some("image/png"), 1)));
        assert!(!check_file_type(&file("archive.csv.zip", None, 1)));

        let err = check_file(&file("photo.png", Some("image/png"), 1), 10).unwrap_err();
        assert_eq!(err.detail(), "Please select a valid file type");
    }

    #[test]
    fn rejects_oversized_files() {
        let limit = 10 * 1024 * 1024 * 1024;
        let err = check_file(&file("big.csv", None, limit + 1), limit).unwrap_err();
        assert_eq!(err.detail(), "File size must be less than 10GB");
        assert!(check_file(&file("ok.csv", None, limit), limit).is_ok());
    }

    #[test]
    fn size_message_follows_configured_limit() {
        let err = check_file(&file("big.csv", None, 6 * 1024 * 1024), 5 * 1024 * 1024).unwrap_err();
        assert_eq!(err.detail(), "File size must be less than 5MB");

        let err = check_file(&file("big.csv", None, 11), 10).unwrap_err();
        assert_eq!(err.detail(), "File size must be less than 10 bytes");
    }

    #[tokio::test]
    async fn from_path_guesses_type_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        tokio::fs::write(&path, b"price,region\n10,north\n").await.unwrap();

        let selected = SelectedFile::from_path(&path).await.unwrap();
        assert_eq!(selected.name, "sales.csv");
        assert_eq!(selected.declared_type.as_deref(), Some("text/csv"));
        assert_eq!(selected.size, 22);
    }
}
