//! Embedded OpenID Connect authorization server.
//!
//! # Purpose
//! Issues the tokens Grid's own clients use when no external identity
//! provider is configured: authorization code (with PKCE), refresh-token
//! rotation, device authorization and client credentials.
//!
//! # How it fits
//! Every access token is a signed JWT with a fresh `jti` and a persisted
//! session keyed by the `jti` hash, so revoking the session or denylisting
//! the `jti` stops the token on the next request even though the signature
//! still verifies. Transient records (pending authorization requests, codes,
//! refresh tokens, device grants) live in [`storage::AuthServerStorage`]
//! behind one mutex.
pub mod clients;
pub mod error;
pub mod keys;
pub mod pkce;
pub mod routes;
pub mod server;
pub mod storage;
pub mod tokens;

pub use error::OidcError;
pub use keys::SigningKey;
pub use server::AuthorizationServer;
