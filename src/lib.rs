// src/lib.rs
pub mod app;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod pricing;

// Re-export commonly used items
pub use app::{app_router, build_state, session_layer, session_store, AppState};
pub use config::Config;
pub use db::DatabasePool;
pub use error::{ApiError, ApiResult};
