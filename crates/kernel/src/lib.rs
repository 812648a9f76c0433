//! Pictor kernel library.
//!
//! Media intake, lifecycle, linking and expiry reaping, plus the HTTP
//! surface over them. The `pictor` binary is the server entry point.

pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod metrics;
pub mod middleware;
pub mod post;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
