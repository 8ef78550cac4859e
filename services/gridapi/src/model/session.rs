use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exactly one owner per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum SessionOwner {
    User(Uuid),
    ServiceAccount(Uuid),
}

impl SessionOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            SessionOwner::User(id) => Some(*id),
            SessionOwner::ServiceAccount(_) => None,
        }
    }

    pub fn service_account_id(&self) -> Option<Uuid> {
        match self {
            SessionOwner::ServiceAccount(id) => Some(*id),
            SessionOwner::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner: SessionOwner,
    /// SHA-256 hex of the cookie value or of the access token `jti`.
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// SHA-256 hex of the refresh token issued alongside, if any.
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(owner: SessionOwner, token_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            token_hash,
            refresh_token_hash: None,
            expires_at,
            revoked: false,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

/// Denylisted token ID. Kept until `expires_at`, after which the token would
/// be rejected on expiry anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedJti {
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn session_activity_tracks_revocation_and_expiry() {
        let now = Utc::now();
        let mut session = Session::new(
            SessionOwner::User(Uuid::new_v4()),
            "hash".to_string(),
            now + Duration::hours(1),
        );
        assert!(session.is_active_at(now));
        assert!(!session.is_active_at(now + Duration::hours(2)));
        session.revoked = true;
        assert!(!session.is_active_at(now));
    }

    #[test]
    fn owner_accessors_are_exclusive() {
        let id = Uuid::new_v4();
        assert_eq!(SessionOwner::User(id).user_id(), Some(id));
        assert_eq!(SessionOwner::User(id).service_account_id(), None);
        assert_eq!(SessionOwner::ServiceAccount(id).service_account_id(), Some(id));
    }
}
