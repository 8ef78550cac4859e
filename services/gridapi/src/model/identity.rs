use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Suffix used for emails synthesized for external identities without one.
pub const EXTERNAL_EMAIL_DOMAIN: &str = "external-idp.local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Subject asserted by the identity provider. Unset for users created
    /// locally until their first external login binds one.
    pub subject: Option<String>,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: None,
            email: email.to_string(),
            name: name.to_string(),
            password_hash: None,
            disabled: false,
            created_at: Utc::now(),
        }
    }

    pub fn external(subject: &str, email: Option<&str>, name: Option<&str>) -> Self {
        let email = email
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{subject}@{EXTERNAL_EMAIL_DOMAIN}"));
        let name = name
            .filter(|value| !value.is_empty())
            .unwrap_or(subject)
            .to_string();
        Self {
            subject: Some(subject.to_string()),
            ..Self::new(&email, &name)
        }
    }

    pub fn with_password_hash(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: Uuid,
    pub client_id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ServiceAccount {
    pub fn new(client_id: &str, name: &str, secret_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            name: name.to_string(),
            secret_hash,
            disabled: false,
            created_at: Utc::now(),
        }
    }
}

/// Direct role held by a user or service account (`principal_id` is
/// namespaced, `role` is the bare role name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct RoleAssignment {
    pub principal_id: String,
    pub role: String,
}

/// Mapping from an identity-provider group to a role, both bare names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct GroupRoleAssignment {
    pub group: String,
    pub role: String,
}

impl GroupRoleAssignment {
    pub fn new(group: &str, role: &str) -> Self {
        Self {
            group: group.to_string(),
            role: role.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_user_falls_back_to_synthetic_email() {
        let user = User::external("abc-123", None, None);
        assert_eq!(user.email, "abc-123@external-idp.local");
        assert_eq!(user.name, "abc-123");
        assert_eq!(user.subject.as_deref(), Some("abc-123"));

        let named = User::external("abc-123", Some("a@example.com"), Some("Ada"));
        assert_eq!(named.email, "a@example.com");
        assert_eq!(named.name, "Ada");
    }

    #[test]
    fn secrets_are_not_serialized() {
        let sa = ServiceAccount::new("ci", "CI", "$2b$hash".to_string());
        let json = serde_json::to_value(&sa).expect("json");
        assert!(json.get("secret_hash").is_none());
        let user = User::new("a@example.com", "A").with_password_hash("$2b$x".to_string());
        let json = serde_json::to_value(&user).expect("json");
        assert!(json.get("password_hash").is_none());
    }
}
