//! Authentication, principal resolution and authorization.
//!
//! Request flow: [`middleware`] extracts credentials, the
//! [`authenticator::MultiAuthenticator`] validates them, the
//! [`resolver::PrincipalResolver`] turns claims into a [`principal::Principal`]
//! with a frozen role set, and the [`interceptor::AuthorizationInterceptor`]
//! asks the policy engine about the operation.
pub mod authenticator;
pub mod bearer;
pub mod error;
pub mod group_cache;
pub mod interceptor;
pub mod middleware;
pub mod principal;
pub mod rbac;
pub mod resolver;
pub mod session;
pub mod token_validator;
