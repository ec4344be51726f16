use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::ALLOWED_EXTENSIONS;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File too large")]
    FileTooLarge,
}

/// Writes uploaded images into a single directory under generated names.
#[derive(Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_bytes,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn validate_size(&self, data: &[u8]) -> Result<(), UploadError> {
        if data.len() > self.max_bytes {
            return Err(UploadError::FileTooLarge);
        }
        Ok(())
    }

    pub fn ensure_dir(&self) -> Result<(), UploadError> {
        std::fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }

    /// Lower-cased extension of `filename` if it is on the allow-list.
    pub fn allowed_extension(filename: &str) -> Option<String> {
        let (_, ext) = filename.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
    }

    /// Reduces a client-supplied filename to a flat, ASCII-only name.
    pub fn secure_filename(filename: &str) -> String {
        let ascii: String = filename
            .chars()
            .filter(|c| c.is_ascii())
            .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
            .collect();

        let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
        let kept: String = joined
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            .collect();

        kept.trim_matches(|c| c == '.' || c == '_').to_string()
    }

    pub fn generate_name(extension: &str) -> String {
        format!("{}.{}", Uuid::new_v4().simple(), extension)
    }

    /// Extension for the stored copy. `validated_ext` is the allow-listed
    /// extension of the original name, used if sanitizing dropped it.
    pub fn stored_extension(original: &str, validated_ext: &str) -> String {
        Self::secure_filename(original)
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| validated_ext.to_string())
    }

    /// Persists `data` under a fresh unique name and returns that name.
    pub fn save(&self, original_filename: &str, validated_ext: &str, data: &[u8]) -> Result<String, UploadError> {
        self.validate_size(data)?;

        let extension = Self::stored_extension(original_filename, validated_ext);
        let name = Self::generate_name(&extension);
        let path = self.path_for(&name);

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(data)?;
        file.sync_all()?;

        log::debug!("Stored upload {:?} as {}", original_filename, path.display());
        Ok(name)
    }

    pub fn path_for(&self, stored_name: &str) -> PathBuf {
        self.upload_dir.join(stored_name)
    }
}
