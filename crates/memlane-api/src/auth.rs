use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use tracing::{info, warn};

use memlane_types::api::{LoginRequest, RegisterRequest, TokenResponse};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub const MIN_USERNAME_LEN: usize = 3;
/// Long enough for any email address.
pub const MAX_USERNAME_LEN: usize = 254;

/// Argon2id hashing with a configurable time cost.
///
/// Keeps a dummy hash around so that a login for an unknown user spends the
/// same verification work as a wrong password.
#[derive(Clone)]
pub struct PasswordPolicy {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl PasswordPolicy {
    pub fn new(time_cost: u32) -> anyhow::Result<Self> {
        let params = Params::new(Params::DEFAULT_M_COST, time_cost, Params::DEFAULT_P_COST, None)
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"memlane-dummy-password", &salt)
            .map_err(|e| anyhow::anyhow!("Failed to prepare dummy hash: {}", e))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }

    pub fn hash(&self, password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| {
                warn!("Password hashing failed: {}", e);
                ApiError::Internal
            })
    }

    /// Verify `password` against `stored`, or against the dummy hash when
    /// there is no stored hash. Always false in the latter case.
    pub fn verify(&self, password: &str, stored: Option<&str>) -> bool {
        let target = stored.unwrap_or(self.dummy_hash.as_str());
        let Ok(parsed) = PasswordHash::new(target) else {
            warn!("Stored password hash is malformed");
            return false;
        };
        let matched = self.argon2.verify_password(password.as_bytes(), &parsed).is_ok();
        matched && stored.is_some()
    }
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let Json(req) = payload?;

    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "Please provide all fields: username, email, password".into(),
        ));
    }
    // Clients may register with their email address as the username
    let username_len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username_len) {
        return Err(ApiError::InvalidInput(format!(
            "Username must be {} to {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !email.contains('@') {
        return Err(ApiError::InvalidInput("Email address is invalid".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::InvalidInput("Password must be at least 8 characters".into()));
    }

    // Check if username or email is taken
    let (u, e) = (username.clone(), email.clone());
    let (name_taken, email_taken) = db_call(&state, move |s| {
        Ok((
            s.db.get_user_by_username(&u)?.is_some(),
            s.db.get_user_by_email(&e)?.is_some(),
        ))
    })
    .await?;
    if name_taken {
        return Err(ApiError::Conflict("username is already taken".into()));
    }
    if email_taken {
        return Err(ApiError::Conflict("email is already registered".into()));
    }

    // Hash off the async runtime
    let hasher = state.clone();
    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.passwords.hash(&password))
        .await
        .map_err(|e| {
            warn!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })??;

    let (u, e) = (username.clone(), email);
    let user_id = db_call(&state, move |s| s.db.create_user(&u, &e, &password_hash)).await?;

    let token = state.tokens.issue_session(user_id, &username)?;
    info!("Registered user {} ({})", user_id, username);

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;

    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidInput("Please provide username and password".into()));
    }

    let u = username.clone();
    let user = db_call(&state, move |s| s.db.get_user_by_username(&u)).await?;

    // Verify even when the user is unknown so both failures look alike
    let verifier = state.clone();
    let stored = user.as_ref().map(|u| u.password.clone());
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || {
        verifier.passwords.verify(&password, stored.as_deref())
    })
    .await
    .map_err(|e| {
        warn!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?;

    let user = match user {
        Some(user) if verified => user,
        _ => {
            info!("Failed login for {}", username);
            return Err(ApiError::Unauthorized("Invalid username or password".into()));
        }
    };

    let token = state.tokens.issue_session(user.id, &user.username)?;
    Ok(Json(TokenResponse { token }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy_roundtrip() {
        let policy = PasswordPolicy::new(1).unwrap();
        let hash = policy.hash("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(policy.verify("correct horse", Some(&hash)));
        assert!(!policy.verify("wrong horse", Some(&hash)));
        assert!(!policy.verify("memlane-dummy-password", None));
        assert!(!policy.verify("anything", Some("not-a-phc-string")));
    }
}
