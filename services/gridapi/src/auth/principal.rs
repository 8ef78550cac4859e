//! Canonical caller identity.
//!
//! A [`Principal`] is built once per request and never persisted. Its role
//! set is frozen at resolution time: refreshing the group→role cache affects
//! later requests only.
use grid_authz::{AUTHENTICATED_ROLE, PrincipalKind, namespaced};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    ServiceAccount,
}

impl PrincipalType {
    pub fn kind(self) -> PrincipalKind {
        match self {
            PrincipalType::User => PrincipalKind::User,
            PrincipalType::ServiceAccount => PrincipalKind::ServiceAccount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Token subject as presented (`sa:<client_id>` for service accounts).
    pub subject: String,
    /// Namespaced ID used as the policy subject.
    pub principal_id: String,
    pub internal_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub session_id: Option<Uuid>,
    /// Namespaced roles (`role:*`), deduplicated, in resolution order.
    pub roles: Vec<String>,
    /// Groups asserted by the credential, bare names.
    pub groups: Vec<String>,
    pub principal_type: PrincipalType,
}

impl Principal {
    pub fn new(principal_type: PrincipalType, subject: &str, id: &str, internal_id: Uuid) -> Self {
        Self {
            subject: subject.to_string(),
            principal_id: namespaced(principal_type.kind(), id),
            internal_id,
            email: None,
            name: None,
            session_id: None,
            roles: Vec::new(),
            groups: Vec::new(),
            principal_type,
        }
    }

    /// Every subject the policy engine should consider for this caller: the
    /// principal itself, its frozen roles and the implicit authenticated role.
    pub fn policy_subjects(&self) -> Vec<String> {
        let mut subjects = Vec::with_capacity(self.roles.len() + 2);
        subjects.push(self.principal_id.clone());
        for role in self.roles.iter().map(String::as_str).chain([AUTHENTICATED_ROLE]) {
            if !subjects.iter().any(|held| held == role) {
                subjects.push(role.to_string());
            }
        }
        subjects
    }

    pub fn has_role(&self, role: &str) -> bool {
        let role = namespaced(PrincipalKind::Role, role);
        self.roles.iter().any(|held| held == &role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_subjects_start_with_principal_id() {
        let mut principal =
            Principal::new(PrincipalType::User, "sub-1", "1b4e28ba", Uuid::new_v4());
        principal.roles = vec!["role:a".to_string(), "role:b".to_string()];
        assert_eq!(
            principal.policy_subjects(),
            vec!["user:1b4e28ba", "role:a", "role:b", AUTHENTICATED_ROLE]
        );
        assert!(principal.has_role("a"));
        assert!(principal.has_role("role:b"));
        assert!(!principal.has_role("c"));
    }

    #[test]
    fn service_accounts_are_namespaced() {
        let principal =
            Principal::new(PrincipalType::ServiceAccount, "sa:ci", "ci", Uuid::new_v4());
        assert_eq!(principal.principal_id, "service_account:ci");
    }
}
