pub mod auth;
pub mod error;
pub mod media;
pub mod memories;
pub mod middleware;
pub mod router;
pub mod share;
pub mod state;
pub mod tokens;
pub mod uploads;
