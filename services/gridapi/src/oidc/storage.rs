//! Transient authorization-server records.
//!
//! Pending authorization requests, issued codes, refresh tokens and device
//! grants live in process memory behind a single mutex owned by this
//! component. Refresh tokens are keyed by their SHA-256 hash. Codes and
//! refresh tokens are removed when used, so each can be redeemed once.
use crate::model::SessionOwner;
use crate::oidc::error::OidcError;
use crate::oidc::pkce::PkceChallenge;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequestRecord {
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub pkce: Option<PkceChallenge>,
    pub expires_at: DateTime<Utc>,
    /// Set once a user completed login.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub client_id: String,
    pub owner: SessionOwner,
    pub subject: String,
    pub scope: String,
    /// `jti` of the access token issued alongside.
    pub access_jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Pending,
    Approved(Uuid),
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub interval_seconds: i64,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
}

#[derive(Default)]
struct Inner {
    auth_requests: HashMap<String, AuthRequestRecord>,
    /// code → authorization request ID
    codes: HashMap<String, String>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    devices: HashMap<(String, String), DeviceAuthorization>,
    /// user code → (client ID, device code)
    user_codes: HashMap<String, (String, String)>,
}

/// Grant state behind one mutex. Every method is a single critical section,
/// so take-style calls are atomic with respect to each other.
#[derive(Default)]
pub struct AuthServerStorage {
    inner: Mutex<Inner>,
}

impl AuthServerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_auth_request(&self, record: AuthRequestRecord) {
        self.inner
            .lock()
            .auth_requests
            .insert(record.id.clone(), record);
    }

    pub fn auth_request(&self, id: &str) -> Option<AuthRequestRecord> {
        self.inner.lock().auth_requests.get(id).cloned()
    }

    /// Bind a completed login to its request and index the issued code.
    pub fn issue_code(&self, request_id: &str, user_id: Uuid, code: &str) -> Result<(), OidcError> {
        let mut inner = self.inner.lock();
        let request = inner
            .auth_requests
            .get_mut(request_id)
            .ok_or_else(|| OidcError::InvalidRequest("unknown authorization request".into()))?;
        if request.user_id.is_some() {
            return Err(OidcError::InvalidRequest(
                "authorization request already completed".into(),
            ));
        }
        request.user_id = Some(user_id);
        inner.codes.insert(code.to_string(), request_id.to_string());
        Ok(())
    }

    /// Redeem a code. The code and its request are gone afterwards.
    pub fn take_code(&self, code: &str) -> Option<AuthRequestRecord> {
        let mut inner = self.inner.lock();
        let request_id = inner.codes.remove(code)?;
        inner.auth_requests.remove(&request_id)
    }

    pub fn store_refresh_token(&self, record: RefreshTokenRecord) {
        self.inner
            .lock()
            .refresh_tokens
            .insert(record.token_hash.clone(), record);
    }

    pub fn refresh_token(&self, token_hash: &str) -> Option<RefreshTokenRecord> {
        self.inner.lock().refresh_tokens.get(token_hash).cloned()
    }

    /// Remove the token only when `client_id` owns it. Anyone else gets
    /// `None` and the token stays redeemable by its owner.
    pub fn take_refresh_token_for(
        &self,
        token_hash: &str,
        client_id: &str,
    ) -> Option<RefreshTokenRecord> {
        let mut inner = self.inner.lock();
        match inner.refresh_tokens.get(token_hash) {
            Some(record) if record.client_id == client_id => {
                inner.refresh_tokens.remove(token_hash)
            }
            _ => None,
        }
    }

    /// Store a new device grant. User codes must be unique among live grants.
    pub fn store_device_authorization(&self, record: DeviceAuthorization) -> Result<(), OidcError> {
        let mut inner = self.inner.lock();
        if inner.user_codes.contains_key(&record.user_code) {
            return Err(OidcError::DuplicateUserCode);
        }
        let key = (record.client_id.clone(), record.device_code.clone());
        inner
            .user_codes
            .insert(record.user_code.clone(), key.clone());
        inner.devices.insert(key, record);
        Ok(())
    }

    pub fn device_by_user_code(&self, user_code: &str) -> Option<DeviceAuthorization> {
        let inner = self.inner.lock();
        let key = inner.user_codes.get(user_code)?;
        inner.devices.get(key).cloned()
    }

    pub fn device_by_code(&self, client_id: &str, device_code: &str) -> Option<DeviceAuthorization> {
        let key = (client_id.to_string(), device_code.to_string());
        self.inner.lock().devices.get(&key).cloned()
    }

    /// Approve or deny a pending grant. Returns `false` when the code is
    /// unknown or already decided.
    pub fn decide_device(&self, user_code: &str, status: DeviceStatus) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.user_codes.get(user_code).cloned() else {
            return false;
        };
        match inner.devices.get_mut(&key) {
            Some(device) if device.status == DeviceStatus::Pending => {
                device.status = status;
                true
            }
            _ => false,
        }
    }

    /// One device-code poll. Returns the approving user once; every other
    /// outcome is the matching RFC 8628 error.
    pub fn poll_device(
        &self,
        client_id: &str,
        device_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Uuid, OidcError> {
        let mut inner = self.inner.lock();
        let key = (client_id.to_string(), device_code.to_string());
        let Some(device) = inner.devices.get_mut(&key) else {
            return Err(OidcError::InvalidGrant("unknown device code".into()));
        };
        if device.expires_at <= now {
            let user_code = device.user_code.clone();
            inner.devices.remove(&key);
            inner.user_codes.remove(&user_code);
            return Err(OidcError::ExpiredToken);
        }
        let too_fast = device
            .last_polled_at
            .is_some_and(|last| now - last < Duration::seconds(device.interval_seconds));
        device.last_polled_at = Some(now);
        let status = device.status;
        match status {
            DeviceStatus::Pending if too_fast => {
                device.interval_seconds += 5;
                Err(OidcError::SlowDown)
            }
            DeviceStatus::Pending => Err(OidcError::AuthorizationPending),
            decided => {
                let user_code = device.user_code.clone();
                inner.devices.remove(&key);
                inner.user_codes.remove(&user_code);
                match decided {
                    DeviceStatus::Approved(user_id) => Ok(user_id),
                    _ => Err(OidcError::AccessDenied("device authorization denied".into())),
                }
            }
        }
    }

    /// Drop expired requests, refresh tokens and device grants.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.auth_requests.len() + inner.refresh_tokens.len() + inner.devices.len();
        inner.auth_requests.retain(|_, request| request.expires_at > now);
        let live: std::collections::HashSet<String> =
            inner.auth_requests.keys().cloned().collect();
        inner.codes.retain(|_, request_id| live.contains(request_id));
        inner.refresh_tokens.retain(|_, token| token.expires_at > now);
        inner.devices.retain(|_, device| device.expires_at > now);
        let Inner {
            devices,
            user_codes,
            ..
        } = &mut *inner;
        user_codes.retain(|_, key| devices.contains_key(key));
        before - (inner.auth_requests.len() + inner.refresh_tokens.len() + inner.devices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(user_code: &str, device_code: &str, now: DateTime<Utc>) -> DeviceAuthorization {
        DeviceAuthorization {
            device_code: device_code.to_string(),
            user_code: user_code.to_string(),
            client_id: "cli".to_string(),
            scope: "openid".to_string(),
            expires_at: now + Duration::minutes(10),
            interval_seconds: 5,
            last_polled_at: None,
            status: DeviceStatus::Pending,
        }
    }

    #[test]
    fn duplicate_user_code_is_rejected() {
        let storage = AuthServerStorage::new();
        let now = Utc::now();
        storage
            .store_device_authorization(device("BCDF-GHJK", "dc-1", now))
            .expect("first");
        let err = storage
            .store_device_authorization(device("BCDF-GHJK", "dc-2", now))
            .expect_err("duplicate");
        assert!(matches!(err, OidcError::DuplicateUserCode));
    }

    #[test]
    fn device_poll_walks_the_state_machine() {
        let storage = AuthServerStorage::new();
        let now = Utc::now();
        storage
            .store_device_authorization(device("BCDF-GHJK", "dc-1", now))
            .expect("store");

        assert!(matches!(
            storage.poll_device("cli", "dc-1", now),
            Err(OidcError::AuthorizationPending)
        ));
        assert!(matches!(
            storage.poll_device("cli", "dc-1", now + Duration::seconds(1)),
            Err(OidcError::SlowDown)
        ));
        // Lookup is keyed by client as well as device code.
        assert!(matches!(
            storage.poll_device("other", "dc-1", now),
            Err(OidcError::InvalidGrant(_))
        ));

        let user = Uuid::new_v4();
        assert!(storage.decide_device("BCDF-GHJK", DeviceStatus::Approved(user)));
        assert!(!storage.decide_device("BCDF-GHJK", DeviceStatus::Denied));
        let approved = storage
            .poll_device("cli", "dc-1", now + Duration::seconds(30))
            .expect("approved");
        assert_eq!(approved, user);
        assert!(storage.device_by_user_code("BCDF-GHJK").is_none());
    }

    #[test]
    fn denied_and_expired_devices() {
        let storage = AuthServerStorage::new();
        let now = Utc::now();
        storage
            .store_device_authorization(device("AAAA-AAAA", "dc-1", now))
            .expect("store");
        storage
            .store_device_authorization(device("BBBB-BBBB", "dc-2", now))
            .expect("store");
        storage.decide_device("AAAA-AAAA", DeviceStatus::Denied);
        assert!(matches!(
            storage.poll_device("cli", "dc-1", now),
            Err(OidcError::AccessDenied(_))
        ));
        assert!(matches!(
            storage.poll_device("cli", "dc-2", now + Duration::minutes(11)),
            Err(OidcError::ExpiredToken)
        ));
    }

    #[test]
    fn codes_and_refresh_tokens_are_single_use() {
        let storage = AuthServerStorage::new();
        let now = Utc::now();
        storage.save_auth_request(AuthRequestRecord {
            id: "req-1".to_string(),
            client_id: "cli".to_string(),
            redirect_uri: "http://localhost/cb".to_string(),
            scope: "openid".to_string(),
            state: None,
            nonce: None,
            pkce: None,
            expires_at: now + Duration::minutes(10),
            user_id: None,
        });
        storage
            .issue_code("req-1", Uuid::new_v4(), "code-1")
            .expect("issue");
        assert!(storage.issue_code("req-1", Uuid::new_v4(), "code-2").is_err());
        assert!(storage.take_code("code-1").is_some());
        assert!(storage.take_code("code-1").is_none());

        storage.store_refresh_token(RefreshTokenRecord {
            token_hash: "h".to_string(),
            client_id: "cli".to_string(),
            owner: SessionOwner::User(Uuid::new_v4()),
            subject: "s".to_string(),
            scope: String::new(),
            access_jti: "j".to_string(),
            expires_at: now + Duration::hours(1),
        });
        assert!(storage.take_refresh_token_for("h", "web").is_none());
        assert!(storage.refresh_token("h").is_some());
        assert!(storage.take_refresh_token_for("h", "cli").is_some());
        assert!(storage.take_refresh_token_for("h", "cli").is_none());
        assert_eq!(storage.purge_expired(now), 0);
    }
}
