pub mod auth;
pub mod cache;
pub mod chat;
pub mod error;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
