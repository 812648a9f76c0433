//! HTTP middleware components.
//!
//! Provides bearer authentication and request metrics.

pub mod bearer_auth;
pub mod metrics;

pub use bearer_auth::{Identity, authenticate_bearer_token};
pub use metrics::track_requests;
