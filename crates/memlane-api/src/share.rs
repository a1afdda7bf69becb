use axum::{
    Extension, Json,
    extract::rejection::{PathRejection, QueryRejection},
    extract::{Path, Query, State},
};
use tracing::info;

use memlane_types::api::{MemoryListResponse, SessionClaims, ShareTokenResponse};

use crate::error::ApiError;
use crate::memories::ListQuery;
use crate::state::{AppState, db_call};

/// POST /share-token: issue a read-only link token for the caller's memories.
pub async fn create_share_token(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<ShareTokenResponse>, ApiError> {
    let (token, expires_at) = state.tokens.issue_share(claims.sub)?;
    info!("Issued share token for user {} (expires {})", claims.sub, expires_at);

    Ok(Json(ShareTokenResponse { token, expires_at }))
}

/// GET /shared/{token}/memories: the token subject's memories, read-only.
pub async fn shared_memories(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<MemoryListResponse>, ApiError> {
    let Path(token) = path?;
    let Query(query) = query?;

    let owner = state.tokens.verify_share(&token)?;
    let order = query.sort_order()?;
    let records = db_call(&state, move |s| s.db.list_memories(owner, order)).await?;

    Ok(Json(MemoryListResponse {
        memories: records.into_iter().map(Into::into).collect(),
    }))
}
