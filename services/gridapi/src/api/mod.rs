//! HTTP API handlers for administration and caller self-service.
pub mod admin;
pub mod error;
pub mod me;
pub mod openapi;
pub mod system;
pub mod types;
