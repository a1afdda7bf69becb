use axum::{
    Extension, Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use memlane_db::memories::{MemoryFields, NewImage, SortOrder};
use memlane_types::api::{
    CreatedResponse, MemoryEnvelope, MemoryListResponse, MemoryRequest, MessageResponse,
    SessionClaims,
};

use crate::error::ApiError;
use crate::media::{display_name, stored_name_from_url};
use crate::state::{AppState, db_call};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `desc`/`newest` (default) or `asc`/`oldest`.
    pub order: Option<String>,
}

impl ListQuery {
    pub fn sort_order(&self) -> Result<SortOrder, ApiError> {
        match self.order.as_deref() {
            None | Some("desc") | Some("newest") => Ok(SortOrder::NewestFirst),
            Some("asc") | Some("oldest") => Ok(SortOrder::OldestFirst),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "Unknown order '{}', expected asc or desc",
                other
            ))),
        }
    }
}

/// A memory request that passed boundary validation.
#[derive(Debug)]
pub struct ValidMemory {
    pub fields: MemoryFields,
    pub images: Vec<NewImage>,
}

impl TryFrom<MemoryRequest> for ValidMemory {
    type Error = ApiError;

    fn try_from(req: MemoryRequest) -> Result<Self, ApiError> {
        if req.title.trim().is_empty()
            || req.description.trim().is_empty()
            || req.timestamp.trim().is_empty()
        {
            return Err(ApiError::InvalidInput(
                "Please provide all fields: title, description, timestamp".into(),
            ));
        }
        let sort_key = sort_key(&req.timestamp).ok_or_else(|| {
            ApiError::InvalidInput(
                "timestamp must be a date (YYYY-MM-DD) or an RFC 3339 date-time".into(),
            )
        })?;

        let images = req
            .images
            .into_iter()
            .map(|img| {
                let filename = stored_name_from_url(&img.url)
                    .ok_or_else(|| ApiError::InvalidInput(format!("Invalid image url: {}", img.url)))?
                    .to_string();
                Ok(NewImage {
                    filename,
                    original_name: img.original_name.as_deref().map(display_name),
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        Ok(ValidMemory {
            fields: MemoryFields {
                title: req.title,
                description: req.description,
                timestamp: req.timestamp,
                sort_key,
            },
            images,
        })
    }
}

/// Fixed-width UTC form of an accepted timestamp, or `None` if it is
/// neither a calendar date nor an RFC 3339 date-time. A bare date stands
/// for midnight UTC.
pub fn sort_key(value: &str) -> Option<String> {
    let instant = match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => date.and_hms_opt(0, 0, 0)?.and_utc(),
        Err(_) => DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc),
    };
    (0..=9999)
        .contains(&instant.year())
        .then(|| instant.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string())
}

pub async fn list_memories(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<MemoryListResponse>, ApiError> {
    let Query(query) = query?;
    let order = query.sort_order()?;

    let owner = claims.sub;
    let records = db_call(&state, move |s| s.db.list_memories(owner, order)).await?;

    Ok(Json(MemoryListResponse {
        memories: records.into_iter().map(Into::into).collect(),
    }))
}

pub async fn get_memory(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MemoryEnvelope>, ApiError> {
    let Path(memory_id) = path?;

    let owner = claims.sub;
    let record = db_call(&state, move |s| s.db.get_memory(owner, memory_id)).await?;

    Ok(Json(MemoryEnvelope {
        memory: record.into(),
    }))
}

pub async fn create_memory(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    payload: Result<Json<MemoryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let Json(req) = payload?;
    let ValidMemory { fields, images } = req.try_into()?;

    let owner = claims.sub;
    let attached: Vec<String> = images.iter().map(|img| img.filename.clone()).collect();
    let result = db_call(&state, move |s| {
        s.db.create_memory(owner, &fields, &images, |name| s.media.exists(name))
    })
    .await;

    match result {
        Ok(memory_id) => Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                id: memory_id,
                message: "Memory created successfully".into(),
            }),
        )),
        Err(e) => {
            if matches!(e, ApiError::Internal) {
                info!("Discarding uploads of a failed create");
                release_uploads(&state, attached).await;
            }
            Err(e)
        }
    }
}

pub async fn update_memory(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<MemoryRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(memory_id) = path?;
    let Json(req) = payload?;
    let ValidMemory { fields, images } = req.try_into()?;

    let owner = claims.sub;
    let desired: Vec<String> = images.iter().map(|img| img.filename.clone()).collect();
    let result = db_call(&state, move |s| {
        s.db.update_memory(owner, memory_id, &fields, &images, |name| s.media.exists(name))
    })
    .await;

    let changes = match result {
        Ok(changes) => changes,
        Err(e) => {
            if matches!(e, ApiError::Internal) {
                info!("Discarding uploads of a failed update");
                release_uploads(&state, desired).await;
            }
            return Err(e);
        }
    };

    // Database is the source of truth; file removal is best-effort
    release_uploads(&state, changes.orphaned).await;

    Ok(Json(MessageResponse {
        message: "Memory updated successfully".into(),
    }))
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Path(memory_id) = path?;

    let owner = claims.sub;
    let orphaned = db_call(&state, move |s| s.db.delete_memory(owner, memory_id)).await?;
    release_uploads(&state, orphaned).await;

    Ok(Json(MessageResponse {
        message: "Memory deleted successfully".into(),
    }))
}

/// Delete the files among `candidates` that no image row references.
/// Failures are logged; the response never depends on them.
async fn release_uploads(state: &AppState, candidates: Vec<String>) {
    if candidates.is_empty() {
        return;
    }

    let released = db_call(state, move |s| {
        s.db.release_files(&candidates, |name| s.media.remove_now(name))
    })
    .await;
    match released {
        Ok(names) => debug!("Released {} upload(s)", names.len()),
        Err(_) => warn!("Could not release uploads after a write"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memlane_types::api::ImageRef;

    fn request(timestamp: &str, urls: &[&str]) -> MemoryRequest {
        MemoryRequest {
            title: "Lake".into(),
            description: "Swimming".into(),
            timestamp: timestamp.into(),
            images: urls
                .iter()
                .map(|u| ImageRef {
                    url: u.to_string(),
                    original_name: Some("dir/me.png".into()),
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_dates_and_datetimes() {
        assert!(ValidMemory::try_from(request("2024-06-01", &[])).is_ok());
        assert!(ValidMemory::try_from(request("2024-06-01T10:00:00.000Z", &[])).is_ok());
        assert!(ValidMemory::try_from(request("June 1st", &[])).is_err());
    }

    #[test]
    fn sort_keys_are_utc_and_fixed_width() {
        assert_eq!(sort_key("2024-6-1").unwrap(), "2024-06-01T00:00:00.000000000Z");
        assert_eq!(
            sort_key("2024-06-01T23:00:00-05:00").unwrap(),
            "2024-06-02T04:00:00.000000000Z"
        );
        assert!(sort_key("2024-06-01T23:00:00-05:00") > sort_key("2024-06-02T01:00:00Z"));
        assert!(sort_key("2024-06-01T10:00:00.5Z") > sort_key("2024-06-01T10:00:00Z"));
        assert!(sort_key("2024-10-01") > sort_key("2024-6-1"));
        assert_eq!(sort_key("not a date"), None);
    }

    #[test]
    fn verbatim_timestamp_is_kept() {
        let valid = ValidMemory::try_from(request("2024-6-1", &[])).unwrap();
        assert_eq!(valid.fields.timestamp, "2024-6-1");
        assert_eq!(valid.fields.sort_key, "2024-06-01T00:00:00.000000000Z");
    }

    #[test]
    fn missing_fields_are_invalid_input() {
        let mut req = request("2024-06-01", &[]);
        req.description = "   ".into();
        let err = ValidMemory::try_from(req).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(ref m) if m.contains("title, description, timestamp")));
    }

    #[test]
    fn image_urls_become_stored_names() {
        let valid = ValidMemory::try_from(request("2024-06-01", &["/uploads/1-2.png"])).unwrap();
        assert_eq!(valid.images[0].filename, "1-2.png");
        assert_eq!(valid.images[0].original_name.as_deref(), Some("me.png"));

        assert!(ValidMemory::try_from(request("2024-06-01", &["/uploads/../db"])).is_err());
    }

    #[test]
    fn sort_order_parsing() {
        let q = |o: Option<&str>| ListQuery { order: o.map(String::from) }.sort_order();
        assert_eq!(q(None).unwrap(), SortOrder::NewestFirst);
        assert_eq!(q(Some("asc")).unwrap(), SortOrder::OldestFirst);
        assert!(q(Some("sideways")).is_err());
    }
}
