//! Persistent identity records.
//!
//! These types mirror what the credential store persists. `Principal` is not
//! here: it is built per request by the resolver and never stored.
pub mod identity;
pub mod session;
pub mod state;

pub use identity::{GroupRoleAssignment, RoleAssignment, ServiceAccount, User};
pub use session::{RevokedJti, Session, SessionOwner};
pub use state::StateRecord;
