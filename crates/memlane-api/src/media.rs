use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use memlane_types::models::upload_url;

/// Maximum number of images accepted in one upload.
pub const MAX_FILES: usize = 10;
/// 5 MiB per image.
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
pub const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

const NAME_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No images were provided")]
    Empty,
    #[error("Too many files. At most {max} images can be uploaded at once.")]
    TooMany { max: usize },
    #[error("File {name} is too large. Maximum size is 5MB.")]
    TooLarge { name: String },
    #[error("Invalid file type for {name} ({content_type}). Only JPEG, PNG and GIF are allowed.")]
    UnsupportedType { name: String, content_type: String },
    #[error("Invalid stored file name: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An uploaded image held in memory before it is written.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub stored_name: String,
    pub original_name: String,
    pub url: String,
}

/// Flat directory of uploaded images, one file per stored name.
///
/// Files are referenced (not owned) by memory image rows; callers decide
/// when a file is no longer needed and remove it here.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self, MediaError> {
        fs::create_dir_all(&dir).await?;
        info!("Uploads directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a stored file. Rejects anything that is not a single safe
    /// path segment.
    pub fn file_path(&self, stored_name: &str) -> Result<PathBuf, MediaError> {
        if !is_valid_stored_name(stored_name) {
            return Err(MediaError::InvalidName(stored_name.to_string()));
        }
        Ok(self.dir.join(stored_name))
    }

    /// Blocking existence check, called from inside database transactions.
    pub fn exists(&self, stored_name: &str) -> bool {
        self.file_path(stored_name)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Validate and write a batch of images. The whole batch is rejected if
    /// any file fails validation, and nothing is written in that case. If a
    /// write fails part way, files already written by this call are removed.
    pub async fn store(&self, files: Vec<IncomingFile>) -> Result<Vec<StoredFile>, MediaError> {
        validate_batch(&files)?;

        let mut stored: Vec<StoredFile> = Vec::with_capacity(files.len());
        for file in &files {
            match self.write_new(file).await {
                Ok(stored_name) => stored.push(StoredFile {
                    url: upload_url(&stored_name),
                    stored_name,
                    original_name: file.original_name.clone(),
                }),
                Err(e) => {
                    error!("Failed to store {}: {}", file.original_name, e);
                    let written: Vec<String> =
                        stored.iter().map(|s| s.stored_name.clone()).collect();
                    self.remove_best_effort(&written).await;
                    return Err(e.into());
                }
            }
        }

        info!("Stored {} uploaded image(s)", stored.len());
        Ok(stored)
    }

    /// Create a fresh uniquely named file holding `file.data`.
    async fn write_new(&self, file: &IncomingFile) -> io::Result<String> {
        let ext = extension_for(&file.original_name, &file.content_type);

        for _ in 0..NAME_ATTEMPTS {
            let stored_name = generate_name(&ext);
            let path = self.dir.join(&stored_name);

            let mut out = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };

            let written = match out.write_all(&file.data).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                drop(out);
                fs::remove_file(&path).await.ok();
                return Err(e);
            }
            return Ok(stored_name);
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique file name",
        ))
    }

    /// Delete a stored file. A file that is already gone is not an error.
    pub async fn remove(&self, stored_name: &str) -> Result<(), MediaError> {
        let path = self.file_path(stored_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted upload {}", stored_name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Upload {} already gone", stored_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking delete that logs instead of failing. Used by
    /// `Database::release_files` while the connection lock is held.
    pub fn remove_now(&self, stored_name: &str) {
        let removed = self
            .file_path(stored_name)
            .and_then(|path| std::fs::remove_file(path).map_err(MediaError::from));
        match removed {
            Ok(()) => info!("Deleted upload {}", stored_name),
            Err(MediaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Upload {} already gone", stored_name)
            }
            Err(e) => warn!("Failed to remove upload {}: {}", stored_name, e),
        }
    }

    /// Remove each file, logging failures instead of returning them.
    pub async fn remove_best_effort(&self, stored_names: &[String]) {
        for name in stored_names {
            if let Err(e) = self.remove(name).await {
                warn!("Failed to remove upload {}: {}", name, e);
            }
        }
    }
}

/// Check count, size and type of every file in a batch.
pub fn validate_batch(files: &[IncomingFile]) -> Result<(), MediaError> {
    if files.is_empty() {
        return Err(MediaError::Empty);
    }
    if files.len() > MAX_FILES {
        return Err(MediaError::TooMany { max: MAX_FILES });
    }
    for file in files {
        check_type(&file.original_name, &file.content_type)?;
        if file.data.len() > MAX_FILE_SIZE {
            return Err(MediaError::TooLarge {
                name: file.original_name.clone(),
            });
        }
    }
    Ok(())
}

pub fn check_type(name: &str, content_type: &str) -> Result<(), MediaError> {
    if ALLOWED_TYPES.contains(&content_type) {
        Ok(())
    } else {
        Err(MediaError::UnsupportedType {
            name: name.to_string(),
            content_type: content_type.to_string(),
        })
    }
}

/// A stored name is a single path segment of `[A-Za-z0-9._-]`, not
/// starting with a dot.
pub fn is_valid_stored_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Extract the stored name from an image URL such as `/uploads/<name>` or
/// `http://host/uploads/<name>`.
pub fn stored_name_from_url(url: &str) -> Option<&str> {
    let (prefix, name) = url.rsplit_once('/')?;
    (prefix.ends_with("/uploads") && is_valid_stored_name(name)).then_some(name)
}

/// Keep only the final path component of a client supplied filename.
pub fn display_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .to_string()
}

fn generate_name(ext: &str) -> String {
    let micros = chrono::Utc::now().timestamp_micros();
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    format!("{}-{}{}", micros, suffix, ext)
}

/// Original extension (lowercased) when it looks sane, else one derived
/// from the MIME type.
fn extension_for(original_name: &str, content_type: &str) -> String {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    match from_name {
        Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
        None => match content_type {
            "image/jpeg" => ".jpg".into(),
            "image/png" => ".png".into(),
            "image/gif" => ".gif".into(),
            _ => String::new(),
        },
    }
}
