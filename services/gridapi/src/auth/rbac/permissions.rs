//! Effective permission listing.
//!
//! Answers "what may this caller do": the permission rules reachable from
//! the principal's ID and its frozen role set, annotated with the subject
//! each rule was granted to.
use crate::auth::principal::Principal;
use grid_authz::{Effect, PolicyEngine};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
    /// Subject the rule is attached to (a role, or the principal itself).
    pub granted_to: String,
    pub object_type: String,
    pub action: String,
    pub scope: String,
    pub effect: Effect,
}

/// Rules reachable from `principal`, including those granted to the implicit
/// `role:authenticated`. Denies come first.
pub fn effective_permissions(engine: &PolicyEngine, principal: &Principal) -> Vec<EffectivePermission> {
    // Step 1: expand through `g` rows from every subject the caller holds.
    let rules = engine.implicit_permissions(&principal.policy_subjects());

    // Step 2: flatten, with denies listed first so they read as overrides.
    let mut permissions: Vec<EffectivePermission> = rules
        .into_iter()
        .map(|rule| EffectivePermission {
            granted_to: rule.subject,
            object_type: rule.object_type,
            action: rule.action,
            scope: rule.scope,
            effect: rule.effect,
        })
        .collect();
    permissions.sort_by_key(|permission| permission.effect != Effect::Deny);
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::PrincipalType;
    use grid_authz::{GroupingRule, PermissionRule, PolicyTuple};
    use uuid::Uuid;

    #[tokio::test]
    async fn lists_rules_from_roles_and_hierarchy() {
        let engine = PolicyEngine::from_tuples(&[
            PolicyTuple::Permission(PermissionRule::allow(
                "role:product-engineer",
                "state",
                "state:read",
                "env == \"dev\"",
            )),
            PolicyTuple::Permission(PermissionRule::allow("role:viewer", "state", "state:list", "")),
            PolicyTuple::Permission(PermissionRule::deny("role:viewer", "state", "state:delete", "")),
            PolicyTuple::Grouping(GroupingRule::new("role:product-engineer", "role:viewer")),
        ])
        .await
        .expect("engine");

        let mut principal = Principal::new(PrincipalType::User, "s", "7", Uuid::nil());
        principal.roles = vec!["role:product-engineer".to_string()];
        let permissions = effective_permissions(&engine, &principal);

        assert_eq!(permissions.len(), 3);
        assert_eq!(permissions[0].effect, Effect::Deny);
        assert!(permissions.iter().any(|p| p.action == "state:read" && p.scope == "env == \"dev\""));
        assert!(permissions.iter().any(|p| p.granted_to == "role:viewer" && p.action == "state:list"));
    }

    #[tokio::test]
    async fn no_roles_means_no_permissions() {
        let engine = PolicyEngine::from_tuples(&[]).await.expect("engine");
        let principal = Principal::new(PrincipalType::User, "s", "7", Uuid::nil());
        assert!(effective_permissions(&engine, &principal).is_empty());
    }
}
