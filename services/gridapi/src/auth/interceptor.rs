//! Authorization interceptor.
//!
//! # Purpose
//! Map each operation to `(object_type, action)` plus the labels it must be
//! checked against, then ask the policy engine.
//!
//! # Key invariants
//! - The route table is static. Operations absent from it are denied.
//! - Object-scoped operations load labels from the state catalog
//!   (logic ID → GUID → labels); an unknown state is `NotFound`.
//! - Adding a dependency needs read access to the source's outputs and create
//!   access on the destination. Each failure reports its own reason.
//! - Own-data operations target the caller unless an explicit target is
//!   supplied; bare targets take the caller's kind. Every own-data call goes
//!   through the engine with `{principal_id: <target>, caller_id: <caller>}`
//!   as labels, so self-access needs a rule like any other access.
//! - Evaluation errors propagate as errors, never as denies.
use crate::auth::error::AuthError;
use crate::auth::principal::Principal;
use crate::observability::AUTHZ_DECISIONS;
use crate::store::CredentialStore;
use grid_authz::{Action, Labels, ObjectType, PolicyEngine, namespaced, parse_principal_id};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// RPC path prefix of the state service.
pub const STATE_SERVICE: &str = "/state.v1.StateService/";

/// Which labels an operation is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    /// No resource labels.
    Global,
    /// An existing state named in the request (`logic_id`, `guid` or path).
    State,
    /// A state being created; labels come from the request body.
    NewState,
    /// Source and destination states of a dependency edge.
    Dependency,
    /// Data owned by a principal, the caller unless the request names one.
    OwnData,
}

/// Static mapping of one operation to what it is checked as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRule {
    pub object_type: ObjectType,
    pub action: Action,
    pub scope: RouteScope,
}

impl RouteRule {
    const fn new(action: Action, object_type: ObjectType, scope: RouteScope) -> Self {
        Self {
            object_type,
            action,
            scope,
        }
    }
}

/// Static route table.
pub fn route_rule(operation: &str) -> Option<RouteRule> {
    use RouteScope::*;
    let state = ObjectType::State;
    let rule = match operation.strip_prefix(STATE_SERVICE) {
        Some(method) => match method {
            "CreateState" => RouteRule::new(Action::StateCreate, state, NewState),
            "ListStates" => RouteRule::new(Action::StateList, state, Global),
            "GetState" => RouteRule::new(Action::StateRead, state, State),
            "UpdateStateLabels" => RouteRule::new(Action::StateUpdateLabels, state, State),
            "DeleteState" => RouteRule::new(Action::StateDelete, state, State),
            "GetStateOutputs" => RouteRule::new(Action::StateOutputRead, state, State),
            "ListStateOutputs" => RouteRule::new(Action::StateOutputList, state, State),
            "AddDependency" => RouteRule::new(Action::DependencyCreate, state, Dependency),
            "GetDependency" => RouteRule::new(Action::DependencyRead, state, State),
            "ListDependencies" => RouteRule::new(Action::DependencyList, state, State),
            "RemoveDependency" => RouteRule::new(Action::DependencyDelete, state, State),
            _ => return None,
        },
        None => match operation {
            "tfstate.read" => RouteRule::new(Action::TfstateRead, state, State),
            "tfstate.write" => RouteRule::new(Action::TfstateWrite, state, State),
            "tfstate.lock" => RouteRule::new(Action::TfstateLock, state, State),
            "tfstate.unlock" => RouteRule::new(Action::TfstateUnlock, state, State),
            "admin.cache.refresh" => {
                RouteRule::new(Action::AdminCacheRefresh, ObjectType::Admin, Global)
            }
            "admin.policies.read" => RouteRule::new(Action::PolicyRead, ObjectType::Policy, Global),
            "admin.policies.write" => {
                RouteRule::new(Action::PolicyWrite, ObjectType::Policy, Global)
            }
            "admin.group_roles.list" => RouteRule::new(Action::RoleRead, ObjectType::Role, Global),
            "admin.group_roles.assign" | "admin.group_roles.remove" | "admin.roles.assign" => {
                RouteRule::new(Action::RoleAssign, ObjectType::Role, Global)
            }
            "me.sessions.list" => RouteRule::new(
                Action::SessionList,
                ObjectType::Session,
                OwnData,
            ),
            "me.sessions.revoke" => RouteRule::new(
                Action::SessionRevoke,
                ObjectType::Session,
                OwnData,
            ),
            "me.permissions" => RouteRule::new(
                Action::PermissionRead,
                ObjectType::Permission,
                OwnData,
            ),
            _ => return None,
        },
    };
    Some(rule)
}

/// What the interceptor needs to know about one inbound call.
#[derive(Debug, Clone, Default)]
pub struct OperationRequest {
    pub operation: String,
    /// State GUID taken from the URL path, if any.
    pub path_guid: Option<Uuid>,
    /// Explicit own-data target (`principal_id` query or body field).
    pub target: Option<String>,
    /// Parsed JSON body, `Null` when absent.
    pub body: Value,
}

impl OperationRequest {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_path_guid(mut self, guid: Uuid) -> Self {
        self.path_guid = Some(guid);
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    fn body_str(&self, field: &str) -> Option<&str> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Result of a successful check, handed to downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedOperation {
    pub operation: String,
    pub action: Action,
    /// Resolved own-data target, namespaced.
    pub target: Option<String>,
}

/// Reference to a state as it appears in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StateRef {
    LogicId(String),
    Guid(Uuid),
}

/// Per-operation authorization against the live policy engine.
pub struct AuthorizationInterceptor {
    engine: Arc<PolicyEngine>,
    store: Arc<dyn CredentialStore>,
}

impl AuthorizationInterceptor {
    pub fn new(engine: Arc<PolicyEngine>, store: Arc<dyn CredentialStore>) -> Self {
        Self { engine, store }
    }

    /// Decide whether `principal` may perform `request`.
    ///
    /// # Arguments
    /// - `principal`: the authenticated caller with its frozen role set.
    /// - `request`: operation name plus whatever the route needs to find its
    ///   labels (path GUID, JSON body or explicit target).
    ///
    /// # Returns
    /// - The operation, the action checked and, for own-data routes, the
    ///   namespaced target the handler must act on.
    ///
    /// # Errors
    /// - [`AuthError::PermissionDenied`] for unmapped operations and policy
    ///   denials. Dependency routes name the side that failed.
    /// - [`AuthError::NotFound`] when the referenced state does not exist.
    /// - [`AuthError::Policy`] when evaluation itself fails.
    ///
    /// # Security
    /// - Fail-closed: only operations in the route table can ever be
    ///   allowed, and an evaluation error is never read as a deny.
    pub async fn authorize(
        &self,
        principal: &Principal,
        request: &OperationRequest,
    ) -> Result<AuthorizedOperation, AuthError> {
        let Some(rule) = route_rule(&request.operation) else {
            self.record(principal, &request.operation, "unmapped", false);
            return Err(AuthError::PermissionDenied(
                "operation is not permitted".to_string(),
            ));
        };
        let mut target = None;
        match rule.scope {
            RouteScope::Global => {
                self.check(principal, &rule, rule.action, &Labels::new(), "operation")?;
            }
            RouteScope::State => {
                let state = state_ref(request, "")?;
                let labels = self.labels_for(&state).await?;
                self.check(principal, &rule, rule.action, &labels, "state")?;
            }
            RouteScope::NewState => {
                let labels: Labels = match request.body.get("labels") {
                    Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                        .map_err(|_| {
                            AuthError::PermissionDenied("labels must be an object".to_string())
                        })?,
                    _ => Labels::new(),
                };
                self.check(principal, &rule, rule.action, &labels, "state")?;
            }
            RouteScope::Dependency => {
                // Step 1: the caller must be able to read the source's outputs.
                let source = state_ref(request, "from_")?;
                let source_labels = self.labels_for(&source).await?;
                self.check(
                    principal,
                    &rule,
                    Action::StateOutputRead,
                    &source_labels,
                    "source state outputs",
                )?;
                // Step 2: and to create dependencies on the destination.
                let destination = state_ref(request, "to_")?;
                let destination_labels = self.labels_for(&destination).await?;
                self.check(
                    principal,
                    &rule,
                    Action::DependencyCreate,
                    &destination_labels,
                    "destination state",
                )?;
            }
            RouteScope::OwnData => {
                let resolved = own_data_target(principal, request.target.as_deref());
                let labels = Labels::from([
                    ("principal_id".to_string(), Value::from(resolved.clone())),
                    (
                        "caller_id".to_string(),
                        Value::from(principal.principal_id.clone()),
                    ),
                ]);
                self.check(principal, &rule, rule.action, &labels, "principal")?;
                target = Some(resolved);
            }
        }
        Ok(AuthorizedOperation {
            operation: request.operation.clone(),
            action: rule.action,
            target,
        })
    }

    /// Labels of an existing state, resolving logic IDs to GUIDs first.
    async fn labels_for(&self, state: &StateRef) -> Result<Labels, AuthError> {
        let guid = match state {
            StateRef::Guid(guid) => *guid,
            StateRef::LogicId(logic_id) => self
                .store
                .state_by_logic_id(logic_id)
                .await?
                .map(|record| record.guid)
                .ok_or_else(|| AuthError::NotFound(format!("state {logic_id}")))?,
        };
        let record = self
            .store
            .state_by_guid(guid)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("state {guid}")))?;
        Ok(record.labels)
    }

    fn check(
        &self,
        principal: &Principal,
        rule: &RouteRule,
        action: Action,
        labels: &Labels,
        what: &str,
    ) -> Result<(), AuthError> {
        let allowed = self.engine.authorize(
            &principal.policy_subjects(),
            rule.object_type.as_str(),
            action.as_str(),
            labels,
        )?;
        self.record(principal, action.as_str(), "policy", allowed);
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied(format!(
                "{action} denied on {what}"
            )))
        }
    }

    fn record(&self, principal: &Principal, action: &str, source: &'static str, allowed: bool) {
        let outcome = if allowed { "allow" } else { "deny" };
        metrics::counter!(AUTHZ_DECISIONS, "outcome" => outcome, "source" => source).increment(1);
        if !allowed {
            tracing::info!(
                target: "audit",
                principal_id = %principal.principal_id,
                action,
                source,
                "authorization denied"
            );
        }
    }
}

/// Namespaced owner for an own-data call. Bare IDs take the caller's kind.
fn own_data_target(principal: &Principal, explicit: Option<&str>) -> String {
    match explicit {
        Some(target) if parse_principal_id(target).is_some() => target.to_string(),
        Some(target) => namespaced(principal.principal_type.kind(), target),
        None => principal.principal_id.clone(),
    }
}

fn state_ref(request: &OperationRequest, prefix: &str) -> Result<StateRef, AuthError> {
    if prefix.is_empty()
        && let Some(guid) = request.path_guid
    {
        return Ok(StateRef::Guid(guid));
    }
    if let Some(logic_id) = request.body_str(&format!("{prefix}logic_id")) {
        return Ok(StateRef::LogicId(logic_id.to_string()));
    }
    if let Some(raw) = request.body_str(&format!("{prefix}guid")) {
        let guid = Uuid::parse_str(raw)
            .map_err(|_| AuthError::NotFound(format!("state {raw}")))?;
        return Ok(StateRef::Guid(guid));
    }
    Err(AuthError::PermissionDenied(
        "request does not name a state".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::PrincipalType;
    use crate::auth::rbac::policy_store::self_service_policy;
    use crate::model::StateRecord;
    use crate::store::StateCatalog;
    use crate::store::memory::InMemoryStore;
    use grid_authz::{PermissionRule, PolicyTuple};
    use serde_json::json;

    async fn setup(tuples: &[PolicyTuple]) -> (Arc<InMemoryStore>, AuthorizationInterceptor) {
        let store = Arc::new(InMemoryStore::default());
        let engine = Arc::new(PolicyEngine::from_tuples(tuples).await.expect("engine"));
        (store.clone(), AuthorizationInterceptor::new(engine, store))
    }

    async fn seed_state(store: &InMemoryStore, logic_id: &str, env: &str) -> Uuid {
        let guid = Uuid::new_v4();
        store
            .upsert_state(StateRecord {
                guid,
                logic_id: logic_id.to_string(),
                labels: Labels::from([("env".to_string(), json!(env))]),
            })
            .await
            .expect("seed");
        guid
    }

    fn engineer() -> Principal {
        let mut principal = Principal::new(PrincipalType::User, "s", "u1", Uuid::nil());
        principal.roles = vec!["role:product-engineer".to_string()];
        principal
    }

    fn allow(action: &str, scope: &str) -> PolicyTuple {
        PolicyTuple::Permission(PermissionRule::allow(
            "role:product-engineer",
            "state",
            action,
            scope,
        ))
    }

    #[test]
    fn every_route_maps_to_its_actions_object_type() {
        for operation in [
            "/state.v1.StateService/GetState",
            "tfstate.lock",
            "admin.cache.refresh",
            "me.permissions",
        ] {
            let rule = route_rule(operation).expect("mapped");
            assert_eq!(rule.object_type, rule.action.object_type());
        }
        assert!(route_rule("/state.v1.StateService/DropDatabase").is_none());
        assert!(route_rule("admin.everything").is_none());
    }

    #[tokio::test]
    async fn state_labels_drive_the_decision() {
        let (store, interceptor) = setup(&[allow("state:read", "env == \"dev\"")]).await;
        seed_state(&store, "dev-network", "dev").await;
        let prod = seed_state(&store, "prod-network", "prod").await;

        let get = |logic_id: &str| {
            OperationRequest::new("/state.v1.StateService/GetState")
                .with_body(json!({ "logic_id": logic_id }))
        };
        assert!(interceptor.authorize(&engineer(), &get("dev-network")).await.is_ok());
        assert!(matches!(
            interceptor.authorize(&engineer(), &get("prod-network")).await,
            Err(AuthError::PermissionDenied(_))
        ));
        let by_guid = OperationRequest::new("/state.v1.StateService/GetState")
            .with_body(json!({ "guid": prod.to_string() }));
        assert!(interceptor.authorize(&engineer(), &by_guid).await.is_err());
        assert!(matches!(
            interceptor.authorize(&engineer(), &get("missing")).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unmapped_operations_fail_closed() {
        let (_, interceptor) = setup(&[PolicyTuple::Permission(PermissionRule::allow(
            "role:product-engineer",
            "*",
            "*",
            "",
        ))])
        .await;
        let result = interceptor
            .authorize(&engineer(), &OperationRequest::new("GET /internal/debug"))
            .await;
        assert!(matches!(result, Err(AuthError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn new_state_uses_request_labels() {
        let (_, interceptor) = setup(&[allow("state:create", "env == \"dev\"")]).await;
        let create = |env: &str| {
            OperationRequest::new("/state.v1.StateService/CreateState")
                .with_body(json!({ "logic_id": "x", "labels": { "env": env } }))
        };
        assert!(interceptor.authorize(&engineer(), &create("dev")).await.is_ok());
        assert!(interceptor.authorize(&engineer(), &create("prod")).await.is_err());
    }

    #[tokio::test]
    async fn dependency_needs_both_checks() {
        let (store, interceptor) = setup(&[
            allow("state-output:read", "env == \"dev\""),
            allow("dependency:create", "env == \"dev\""),
        ])
        .await;
        seed_state(&store, "dev-a", "dev").await;
        seed_state(&store, "dev-b", "dev").await;
        seed_state(&store, "prod-a", "prod").await;

        let edge = |from: &str, to: &str| {
            OperationRequest::new("/state.v1.StateService/AddDependency")
                .with_body(json!({ "from_logic_id": from, "to_logic_id": to }))
        };
        assert!(interceptor.authorize(&engineer(), &edge("dev-a", "dev-b")).await.is_ok());

        let Err(AuthError::PermissionDenied(reason)) =
            interceptor.authorize(&engineer(), &edge("prod-a", "dev-b")).await
        else {
            panic!("expected source denial");
        };
        assert!(reason.contains("source"));

        let Err(AuthError::PermissionDenied(reason)) =
            interceptor.authorize(&engineer(), &edge("dev-a", "prod-a")).await
        else {
            panic!("expected destination denial");
        };
        assert!(reason.contains("destination"));
    }

    #[tokio::test]
    async fn own_data_without_a_rule_is_denied() {
        let (_, interceptor) = setup(&[]).await;
        for operation in ["me.sessions.list", "me.sessions.revoke", "me.permissions"] {
            let result = interceptor
                .authorize(&engineer(), &OperationRequest::new(operation))
                .await;
            assert!(
                matches!(result, Err(AuthError::PermissionDenied(_))),
                "{operation} allowed without policy"
            );
        }
    }

    #[tokio::test]
    async fn self_service_policy_covers_only_the_caller() {
        let (_, interceptor) = setup(&self_service_policy()).await;
        let caller = engineer();
        let own = interceptor
            .authorize(&caller, &OperationRequest::new("me.sessions.list"))
            .await
            .expect("own data");
        assert_eq!(own.target.as_deref(), Some("user:u1"));

        let explicit_self = OperationRequest::new("me.permissions").with_target("u1");
        assert!(interceptor.authorize(&caller, &explicit_self).await.is_ok());

        let other = OperationRequest::new("me.sessions.list").with_target("u2");
        assert!(interceptor.authorize(&caller, &other).await.is_err());
    }

    #[tokio::test]
    async fn bare_targets_take_the_callers_kind() {
        let (_, interceptor) = setup(&self_service_policy()).await;
        let robot = Principal::new(
            PrincipalType::ServiceAccount,
            "sa:ci-bot",
            "ci-bot",
            Uuid::nil(),
        );
        let own = interceptor
            .authorize(&robot, &OperationRequest::new("me.permissions").with_target("ci-bot"))
            .await
            .expect("own data");
        assert_eq!(own.target.as_deref(), Some("service_account:ci-bot"));

        let user_target = OperationRequest::new("me.permissions").with_target("user:ci-bot");
        assert!(interceptor.authorize(&robot, &user_target).await.is_err());
    }

    #[tokio::test]
    async fn own_data_for_others_needs_policy() {
        let (_, interceptor) = setup(&[PolicyTuple::Permission(PermissionRule::allow(
            "role:support",
            "session",
            "session:list",
            "principal_id == \"user:u2\"",
        ))])
        .await;
        let mut support = Principal::new(PrincipalType::User, "s", "sup", Uuid::nil());
        support.roles = vec!["role:support".to_string()];
        let other = OperationRequest::new("me.sessions.list").with_target("u2");
        let authorized = interceptor.authorize(&support, &other).await.expect("allowed");
        assert_eq!(authorized.target.as_deref(), Some("user:u2"));
    }
}
