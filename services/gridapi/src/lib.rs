//! Grid API service library crate.
//!
//! # Purpose
//! Exposes the identity and access-control core of the Grid Terraform-state
//! backend: credential storage, authenticators, principal resolution, the
//! group→role cache, the authorization interceptor and the embedded OIDC
//! authorization server.
//!
//! # Notes
//! The Terraform-state service itself lives elsewhere; [`app::build_router`]
//! takes it as a downstream router and places it behind authentication and
//! authorization.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod oidc;
pub mod store;
