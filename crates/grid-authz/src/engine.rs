//! Policy engine backed by a swappable Casbin enforcer.
//!
//! # Purpose
//! Answers `(subject, object_type, action, labels) -> allow|deny` against the
//! current policy set, expanding the role graph held in the `g` rows and
//! delegating scope expressions to the [`LabelMatcher`].
//!
//! # Key invariants
//! - Evaluation is read-only; grouping state is never mutated per request.
//! - A reload builds a complete enforcer off to the side and publishes it with
//!   a single atomic store, so readers never observe a half-loaded policy.
//! - Deny rules reachable from any subject in a caller's role set win over
//!   allow rules reachable from any other subject.

use crate::casbin_model::{LABEL_MATCH_FN, casbin_model};
use crate::errors::AuthzResult;
use crate::labels::{LabelMatcher, Labels};
use crate::tuple::{Effect, PermissionRule, PolicyTuple};
use arc_swap::ArcSwap;
use casbin::function_map::OperatorFunction;
use casbin::prelude::{CoreApi, Enforcer, MemoryAdapter, MgmtApi, RbacApi};
use rhai::Dynamic;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct PolicyEngine {
    enforcer: ArcSwap<Enforcer>,
    generation: AtomicU64,
}

impl PolicyEngine {
    pub async fn from_tuples(tuples: &[PolicyTuple]) -> AuthzResult<Self> {
        let enforcer = build_enforcer(tuples).await?;
        Ok(Self {
            enforcer: ArcSwap::from_pointee(enforcer),
            generation: AtomicU64::new(1),
        })
    }

    /// Replace the whole policy set. Returns the new generation.
    pub async fn reload(&self, tuples: &[PolicyTuple]) -> AuthzResult<u64> {
        let enforcer = build_enforcer(tuples).await?;
        self.enforcer.store(Arc::new(enforcer));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(generation, tuples = tuples.len(), "policy engine reloaded");
        Ok(generation)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Single-subject decision straight from the enforcer.
    pub fn evaluate(
        &self,
        subject: &str,
        object_type: &str,
        action: &str,
        labels: &Labels,
    ) -> AuthzResult<bool> {
        let labels = serde_json::to_string(labels)?;
        let enforcer = self.enforcer.load();
        Ok(enforcer.enforce((subject, object_type, action, labels.as_str()))?)
    }

    /// Decision for a caller holding several subjects (its own principal ID
    /// plus every role it resolved to).
    pub fn authorize(
        &self,
        subjects: &[String],
        object_type: &str,
        action: &str,
        labels: &Labels,
    ) -> AuthzResult<bool> {
        let enforcer = self.enforcer.load();
        // Step 1: an applicable deny on any subject short-circuits.
        let denied = subjects.iter().any(|subject| {
            implicit_rules(&enforcer, subject).iter().any(|rule| {
                rule.effect == Effect::Deny
                    && rule.covers(object_type, action)
                    && LabelMatcher::global().matches(&rule.scope, labels)
            })
        });
        if denied {
            return Ok(false);
        }
        // Step 2: any subject allowed by the enforcer allows the caller.
        let encoded = serde_json::to_string(labels)?;
        for subject in subjects {
            if enforcer.enforce((subject.as_str(), object_type, action, encoded.as_str()))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Permission rules reachable from any of `subjects`, deduplicated.
    pub fn implicit_permissions(&self, subjects: &[String]) -> Vec<PermissionRule> {
        let enforcer = self.enforcer.load();
        let mut seen = HashSet::new();
        subjects
            .iter()
            .flat_map(|subject| implicit_rules(&enforcer, subject))
            .filter(|rule| seen.insert(rule.clone()))
            .collect()
    }

    /// Roles reachable from `subject` through the `g` rows.
    pub fn implicit_roles(&self, subject: &str) -> Vec<String> {
        let enforcer = self.enforcer.load();
        enforcer.get_implicit_roles_for_user(subject, None)
    }

    pub fn policy_count(&self) -> usize {
        self.enforcer.load().get_policy().len()
    }
}

fn implicit_rules(enforcer: &Enforcer, subject: &str) -> Vec<PermissionRule> {
    enforcer
        .get_implicit_permissions_for_user(subject, None)
        .into_iter()
        .filter_map(|row| {
            let field = |index: usize| row.get(index).cloned().unwrap_or_default();
            let effect = match field(4).as_str() {
                "deny" => Effect::Deny,
                _ => Effect::Allow,
            };
            (row.len() >= 3).then(|| PermissionRule {
                subject: field(0),
                object_type: field(1),
                action: field(2),
                scope: field(3),
                effect,
            })
        })
        .collect()
}

fn label_match(labels: Dynamic, scope: Dynamic) -> Dynamic {
    let scope = scope.into_string().unwrap_or_default();
    if scope.trim().is_empty() {
        return Dynamic::from(true);
    }
    let labels: Labels = labels
        .into_string()
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    Dynamic::from(LabelMatcher::global().matches(&scope, &labels))
}

async fn build_enforcer(tuples: &[PolicyTuple]) -> AuthzResult<Enforcer> {
    let model = casbin_model().await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
    enforcer.add_function(LABEL_MATCH_FN, OperatorFunction::Arg2(label_match));

    let mut policies = Vec::new();
    let mut groupings = Vec::new();
    for tuple in tuples {
        match tuple {
            PolicyTuple::Permission(rule) => policies.push(rule.to_casbin()),
            PolicyTuple::Grouping(rule) => {
                groupings.push(vec![rule.member.clone(), rule.parent.clone()])
            }
        }
    }
    if !policies.is_empty() {
        enforcer.add_policies(policies).await?;
    }
    if !groupings.is_empty() {
        enforcer.add_grouping_policies(groupings).await?;
    }
    enforcer.build_role_links()?;
    Ok(enforcer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::GroupingRule;

    fn env(value: &str) -> Labels {
        let mut labels = Labels::new();
        labels.insert("env".to_string(), value.into());
        labels
    }

    fn subjects(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn scoped_read_follows_labels() {
        let engine = PolicyEngine::from_tuples(&[PolicyTuple::Permission(PermissionRule::allow(
            "role:product-engineer",
            "state",
            "state:read",
            r#"env == "dev""#,
        ))])
        .await
        .expect("engine");

        assert!(engine
            .evaluate("role:product-engineer", "state", "state:read", &env("dev"))
            .expect("eval"));
        assert!(!engine
            .evaluate("role:product-engineer", "state", "state:read", &env("prod"))
            .expect("eval"));
        assert!(!engine
            .evaluate("role:product-engineer", "state", "state:list", &env("dev"))
            .expect("eval"));
    }

    #[tokio::test]
    async fn empty_scope_matches_any_labels() {
        let engine = PolicyEngine::from_tuples(&[PolicyTuple::Permission(PermissionRule::allow(
            "role:reader",
            "state",
            "state:read",
            "",
        ))])
        .await
        .expect("engine");
        assert!(engine
            .evaluate("role:reader", "state", "state:read", &Labels::new())
            .expect("eval"));
        assert!(engine
            .evaluate("role:reader", "state", "state:read", &env("anything"))
            .expect("eval"));
    }

    #[tokio::test]
    async fn malformed_scope_denies_without_error() {
        let engine = PolicyEngine::from_tuples(&[PolicyTuple::Permission(PermissionRule::allow(
            "role:reader",
            "state",
            "state:read",
            "env == ((",
        ))])
        .await
        .expect("engine");
        let decision = engine.evaluate("role:reader", "state", "state:read", &env("dev"));
        assert!(!decision.expect("malformed scope is a deny, not an error"));
    }

    #[tokio::test]
    async fn wildcards_are_literal() {
        let engine = PolicyEngine::from_tuples(&[
            PolicyTuple::Permission(PermissionRule::allow("role:platform-engineer", "*", "*", "")),
            PolicyTuple::Permission(PermissionRule::allow("role:odd", "sta*", "state:*", "")),
        ])
        .await
        .expect("engine");
        assert!(engine
            .evaluate("role:platform-engineer", "policy", "policy:write", &Labels::new())
            .expect("eval"));
        assert!(!engine
            .evaluate("role:odd", "state", "state:read", &Labels::new())
            .expect("eval"));
    }

    #[tokio::test]
    async fn grouping_rows_expand_roles() {
        let engine = PolicyEngine::from_tuples(&[
            PolicyTuple::Permission(PermissionRule::allow("role:reader", "state", "state:read", "")),
            PolicyTuple::Grouping(GroupingRule::new("role:editor", "role:reader")),
            PolicyTuple::Grouping(GroupingRule::new("user:alice", "role:editor")),
        ])
        .await
        .expect("engine");
        assert!(engine
            .evaluate("user:alice", "state", "state:read", &Labels::new())
            .expect("eval"));
        let roles = engine.implicit_roles("user:alice");
        assert!(roles.contains(&"role:editor".to_string()));
        assert!(roles.contains(&"role:reader".to_string()));
    }

    #[tokio::test]
    async fn deny_on_one_role_wins_over_allow_on_another() {
        let engine = PolicyEngine::from_tuples(&[
            PolicyTuple::Permission(PermissionRule::allow("role:writer", "state", "*", "")),
            PolicyTuple::Permission(PermissionRule::deny(
                "role:frozen",
                "state",
                "tfstate:write",
                r#"env == "prod""#,
            )),
        ])
        .await
        .expect("engine");
        let caller = subjects(&["user:bob", "role:writer", "role:frozen"]);
        assert!(!engine
            .authorize(&caller, "state", "tfstate:write", &env("prod"))
            .expect("authorize"));
        assert!(engine
            .authorize(&caller, "state", "tfstate:write", &env("dev"))
            .expect("authorize"));
        assert!(engine
            .authorize(&caller, "state", "tfstate:read", &env("prod"))
            .expect("authorize"));
    }

    #[tokio::test]
    async fn reload_swaps_policy_and_bumps_generation() {
        let engine = PolicyEngine::from_tuples(&[]).await.expect("engine");
        let caller = subjects(&["role:platform-engineer"]);
        assert!(!engine
            .authorize(&caller, "state", "state:delete", &Labels::new())
            .expect("authorize"));
        assert_eq!(engine.generation(), 1);

        let generation = engine
            .reload(&[PolicyTuple::Permission(PermissionRule::allow(
                "role:platform-engineer",
                "*",
                "*",
                "",
            ))])
            .await
            .expect("reload");
        assert_eq!(generation, 2);
        assert_eq!(engine.policy_count(), 1);
        assert!(engine
            .authorize(&caller, "state", "state:delete", &Labels::new())
            .expect("authorize"));
    }

    #[tokio::test]
    async fn implicit_permissions_collects_all_subjects() {
        let engine = PolicyEngine::from_tuples(&[
            PolicyTuple::Permission(PermissionRule::allow("role:a", "state", "state:read", "")),
            PolicyTuple::Permission(PermissionRule::allow("role:b", "state", "state:list", "")),
            PolicyTuple::Grouping(GroupingRule::new("role:b", "role:a")),
        ])
        .await
        .expect("engine");
        let rules = engine.implicit_permissions(&subjects(&["role:a", "role:b"]));
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|rule| rule.effect == Effect::Allow));
    }
}
