//! Wire types shared by the Memory Lane crates: request/response bodies and
//! token claims. Kept free of HTTP and database dependencies.

pub mod api;
pub mod models;
