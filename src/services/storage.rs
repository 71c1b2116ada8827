// File Storage Service
// Per-user directories for uploaded photos and generated headshots on local disk

use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::app_config::StorageConfig;

const ARCHIVE_DIR: &str = "archived";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidFile(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Zip error: {0}")]
    Zip(String),
}

/// A file written to disk
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: String,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    generated_dir: PathBuf,
    max_upload_bytes: usize,
}

impl FileStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: PathBuf::from(&config.upload_dir),
            generated_dir: PathBuf::from(&config.generated_dir),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Create the root directories
    pub async fn ensure_dirs(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.generated_dir).await?;
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Write an uploaded photo as `{upload_dir}/{user_id}/{ts}-{rand}-{name}`
    pub async fn save_upload(
        &self,
        user_id: i32,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::InvalidFile(format!(
                "File {} is empty",
                original_name
            )));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(StorageError::InvalidFile(format!(
                "File {} exceeds the {} byte limit",
                original_name, self.max_upload_bytes
            )));
        }

        let user_dir = self.upload_dir.join(user_id.to_string());
        tokio::fs::create_dir_all(&user_dir).await?;

        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        let filename = format!(
            "{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            suffix,
            sanitize_filename(original_name)
        );
        let path = user_dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored upload {}", path.display());

        Ok(StoredFile {
            path: path.to_string_lossy().into_owned(),
            size: bytes.len(),
        })
    }

    /// Write a generated image as `{generated_dir}/{user_id}/headshot_{id}.png`
    pub async fn save_generated(
        &self,
        user_id: i32,
        headshot_id: i32,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let user_dir = self.generated_dir.join(user_id.to_string());
        tokio::fs::create_dir_all(&user_dir).await?;

        let path = user_dir.join(format!("headshot_{}.png", headshot_id));
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Move a generated image to `{generated_dir}/archived/{user_id}/` and return the new path
    pub async fn archive_generated(&self, user_id: i32, path: &str) -> Result<String, StorageError> {
        let name = Path::new(path)
            .file_name()
            .ok_or_else(|| StorageError::InvalidFile(format!("No file name in {}", path)))?;

        let archive_dir = self.generated_dir.join(ARCHIVE_DIR).join(user_id.to_string());
        tokio::fs::create_dir_all(&archive_dir).await?;

        let target = archive_dir.join(name);
        match tokio::fs::rename(path, &target).await {
            Ok(()) => Ok(target.to_string_lossy().into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stored file; a file that is already gone is not an error
    pub async fn remove(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File already removed: {}", path);
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Bundle files into an in-memory zip archive, one flat entry per file
    pub async fn zip_files(&self, paths: Vec<String>) -> Result<Vec<u8>, StorageError> {
        tokio::task::spawn_blocking(move || build_zip(&paths))
            .await
            .map_err(|e| StorageError::Zip(format!("Zip task panicked: {}", e)))?
    }
}

fn build_zip(paths: &[String]) -> Result<Vec<u8>, StorageError> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (index, path) in paths.iter().enumerate() {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.clone()));
            },
            Err(e) => return Err(e.into()),
        };
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("photo_{}", index));

        writer
            .start_file(name, options)
            .map_err(|e| StorageError::Zip(e.to_string()))?;
        writer.write_all(&bytes)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| StorageError::Zip(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Keep the final path component and replace anything outside `[A-Za-z0-9._-]`
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
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

/// Content type for serving a stored file, by extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
