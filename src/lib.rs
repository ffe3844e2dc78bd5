pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use db::create_pool;
pub use error::{AppError, DbError};
