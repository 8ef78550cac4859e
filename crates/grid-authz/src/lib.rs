//! Grid authorization primitives shared by the API service and its tooling.
//!
//! # Purpose
//! Centralizes the Casbin model, the policy tuple vocabulary, the label
//! expression matcher and the namespaced principal identifiers that every
//! authorization decision in Grid is expressed in.
//!
//! # How it fits
//! `gridapi` loads persisted policy rows into a [`PolicyEngine`], resolves each
//! caller into a set of namespaced principal IDs and asks the engine whether
//! that set may perform an action on an object whose labels it supplies.
//!
//! # Key invariants
//! - Principal IDs are always namespaced (`user:`, `service_account:`,
//!   `group:`, `role:`) before they reach the engine.
//! - Object type `*` and action `*` are literal wildcards, never patterns.
//! - A scope expression that fails to compile or evaluate never matches and
//!   never surfaces as an engine error.
//! - Deny rules win over allow rules across the whole role set.
//!
//! # Examples
//! ```rust
//! use grid_authz::{Labels, LabelMatcher};
//!
//! let matcher = LabelMatcher::new();
//! let mut labels = Labels::new();
//! labels.insert("env".to_string(), "dev".into());
//! assert!(matcher.matches(r#"env == "dev""#, &labels));
//! assert!(!matcher.matches(r#"env == "prod""#, &labels));
//! assert!(matcher.matches("", &labels));
//! ```
//!
//! # Common pitfalls
//! - Building an engine per request defeats the shared enforcer snapshot;
//!   reload through [`PolicyEngine::reload`] instead.
//! - Passing bare role names (`admin`) instead of `role:admin` silently
//!   matches nothing.

mod action;
mod casbin_model;
mod engine;
mod errors;
mod labels;
mod principal_id;
mod tuple;

pub use action::{Action, ObjectType, WILDCARD};
pub use casbin_model::{LABEL_MATCH_FN, casbin_model, casbin_model_string};
pub use engine::PolicyEngine;
pub use errors::{AuthzError, AuthzResult};
pub use labels::{LabelMatcher, Labels};
pub use principal_id::{AUTHENTICATED_ROLE, PrincipalKind, namespaced, parse_principal_id};
pub use tuple::{
    Effect, GroupingRule, PermissionRule, PolicyFilter, PolicyRow, PolicyTuple, normalize_rows,
    normalize_rows_skipping_invalid,
};
