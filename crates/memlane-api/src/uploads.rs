use axum::{
    Json,
    extract::State,
    extract::multipart::{Multipart, MultipartRejection},
};
use bytes::BytesMut;
use tracing::debug;

use memlane_types::api::{UploadResponse, UploadedFile};

use crate::error::ApiError;
use crate::media::{self, IncomingFile, MAX_FILE_SIZE, MAX_FILES, MediaError};
use crate::state::AppState;

/// Multipart field carrying image files.
pub const IMAGES_FIELD: &str = "images";

/// POST /upload: multipart `images` parts, at most 10, each ≤ 5 MiB and of
/// an allowed image type. The whole batch is validated before any file is
/// written.
pub async fn upload_images(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let files = read_images(multipart?).await?;
    let stored = state.media.store(files).await?;

    Ok(Json(UploadResponse {
        files: stored
            .into_iter()
            .map(|f| UploadedFile {
                filename: f.stored_name,
                original_name: f.original_name,
                url: f.url,
            })
            .collect(),
    }))
}

/// Buffer the `images` parts, failing fast on count, type or size.
async fn read_images(mut multipart: Multipart) -> Result<Vec<IncomingFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(IMAGES_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        if files.len() == MAX_FILES {
            return Err(MediaError::TooMany { max: MAX_FILES }.into());
        }

        let original_name = media::display_name(field.file_name().unwrap_or_default());
        let content_type = field.content_type().unwrap_or_default().to_string();
        media::check_type(&original_name, &content_type)?;

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await? {
            if data.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(MediaError::TooLarge { name: original_name }.into());
            }
            data.extend_from_slice(&chunk);
        }

        files.push(IncomingFile {
            original_name,
            content_type,
            data: data.freeze(),
        });
    }

    Ok(files)
}
