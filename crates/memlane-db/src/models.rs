/// Database row types: these map directly to SQLite rows.
/// Distinct from memlane-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub timestamp: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ImageRow {
    pub id: i64,
    pub memory_id: i64,
    pub filename: String,
    pub original_name: Option<String>,
    pub created_at: String,
}
