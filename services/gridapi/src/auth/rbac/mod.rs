//! Policy persistence and permission queries on top of `grid-authz`.
pub mod permissions;
pub mod policy_store;

pub use permissions::{EffectivePermission, effective_permissions};
pub use policy_store::PolicyTupleStore;
