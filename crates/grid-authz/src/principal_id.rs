//! Namespaced principal identifiers.
//!
//! Every subject handed to the policy engine carries a kind prefix so that a
//! user named `admin` can never collide with the role `role:admin`.

use serde::{Deserialize, Serialize};

/// Role every resolved caller holds implicitly. Self-service rules hang off
/// it; it is never stored as an assignment.
pub const AUTHENTICATED_ROLE: &str = "role:authenticated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    ServiceAccount,
    Group,
    Role,
}

impl PrincipalKind {
    pub const ALL: [PrincipalKind; 4] = [
        PrincipalKind::User,
        PrincipalKind::ServiceAccount,
        PrincipalKind::Group,
        PrincipalKind::Role,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            PrincipalKind::User => "user:",
            PrincipalKind::ServiceAccount => "service_account:",
            PrincipalKind::Group => "group:",
            PrincipalKind::Role => "role:",
        }
    }
}

/// Prefix `id` with the namespace for `kind`. Already-namespaced IDs of the
/// same kind are returned unchanged.
pub fn namespaced(kind: PrincipalKind, id: &str) -> String {
    if id.starts_with(kind.prefix()) {
        id.to_string()
    } else {
        format!("{}{}", kind.prefix(), id)
    }
}

/// Split a namespaced ID into its kind and bare identifier.
pub fn parse_principal_id(value: &str) -> Option<(PrincipalKind, &str)> {
    PrincipalKind::ALL.into_iter().find_map(|kind| {
        value
            .strip_prefix(kind.prefix())
            .filter(|rest| !rest.is_empty())
            .map(|rest| (kind, rest))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_is_idempotent() {
        let once = namespaced(PrincipalKind::Role, "platform-engineer");
        assert_eq!(once, "role:platform-engineer");
        assert_eq!(namespaced(PrincipalKind::Role, &once), once);
    }

    #[test]
    fn parse_recognizes_each_kind() {
        assert_eq!(
            parse_principal_id("service_account:ci"),
            Some((PrincipalKind::ServiceAccount, "ci"))
        );
        assert_eq!(
            parse_principal_id("group:platform-team"),
            Some((PrincipalKind::Group, "platform-team"))
        );
        assert_eq!(parse_principal_id("role:"), None);
        assert_eq!(parse_principal_id("alice"), None);
    }
}
