use serde::{Deserialize, Serialize};

use crate::models::Memory;

// -- Token claims --

/// Audience of session tokens handed out by register/login.
pub const SESSION_AUDIENCE: &str = "memlane:session";
/// Audience of read-only share tokens.
pub const SHARE_AUDIENCE: &str = "memlane:share";

/// Claims of a bearer session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: i64,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

/// Claims of a share token: the bearer may read `sub`'s memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareClaims {
    pub sub: i64,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareTokenResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

// -- Uploads --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub filename: String,
    pub original_name: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
}

// -- Memories --

/// Body of POST /memories and PUT /memories/{id}. Missing text fields
/// deserialize as empty and are rejected by validation.
#[derive(Debug, Default, Deserialize)]
pub struct MemoryRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to an already uploaded image.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub original_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryListResponse {
    pub memories: Vec<Memory>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryEnvelope {
    pub memory: Memory,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
