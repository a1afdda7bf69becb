use std::sync::Arc;

use tracing::error;

use memlane_db::{Database, StoreResult};

use crate::auth::PasswordPolicy;
use crate::error::ApiError;
use crate::media::MediaStore;
use crate::tokens::TokenKeys;

pub type AppState = Arc<AppStateInner>;

/// Everything a request handler needs, built once at startup.
pub struct AppStateInner {
    pub db: Database,
    pub media: MediaStore,
    pub tokens: TokenKeys,
    pub passwords: PasswordPolicy,
}

/// Run blocking database work off the async runtime.
pub async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}
