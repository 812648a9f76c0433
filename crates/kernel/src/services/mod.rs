//! Supporting services.

pub mod token;
