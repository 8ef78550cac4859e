//! Authorization middleware and interceptor behaviour through the router.
mod common;

use axum::http::{Method, StatusCode};
use common::*;
use grid_authz::{AUTHENTICATED_ROLE, PermissionRule, PolicyTuple};
use gridapi::auth::rbac::policy_store::self_service_policy;
use gridapi::model::RoleAssignment;
use gridapi::store::IdentityStore;
use gridapi::store::memory::InMemoryStore;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

const DEV: &str = r#"env == "dev""#;

fn policies() -> Vec<PolicyTuple> {
    let product = |action: &str, scope: &str| {
        PolicyTuple::Permission(PermissionRule::allow("role:product-engineer", "state", action, scope))
    };
    vec![
        PolicyTuple::Permission(PermissionRule::allow("role:platform-engineer", "*", "*", "")),
        product("state:list", ""),
        product("state:read", ""),
        product("state:create", DEV),
        product("tfstate:read", DEV),
        product("tfstate:write", DEV),
        product("tfstate:lock", DEV),
        product("tfstate:unlock", DEV),
        product("state-output:read", DEV),
        product("dependency:create", DEV),
    ]
}

struct Fixture {
    app: TestApp,
    dev: Uuid,
    prod: Uuid,
    product_token: String,
    platform_token: String,
    product_id: Uuid,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    seed_policies(&store, &policies()).await;
    let dev = seed_state(&store, "app-dev", json!({ "env": "dev", "team": "payments" })).await;
    let prod = seed_state(&store, "app-prod", json!({ "env": "prod", "team": "payments" })).await;
    seed_state(&store, "net-dev", json!({ "env": "dev" })).await;
    seed_state(&store, "net-prod", json!({ "env": "prod" })).await;

    let product = seed_user(&store, "pat@example.com").await;
    let platform = seed_user(&store, "ops@example.com").await;
    for (user, role) in [(&product, "product-engineer"), (&platform, "platform-engineer")] {
        store
            .assign_role(RoleAssignment {
                principal_id: format!("user:{}", user.id),
                role: role.to_string(),
            })
            .await
            .expect("assign role");
    }

    let app = TestApp::internal(store).await;
    let product_token = access_token(&app.login("pat@example.com", "openid").await);
    let platform_token = access_token(&app.login("ops@example.com", "openid").await);
    Fixture {
        app,
        dev,
        prod,
        product_token,
        platform_token,
        product_id: product.id,
    }
}

fn access_token(tokens: &Value) -> String {
    tokens["access_token"].as_str().expect("access token").to_string()
}

async fn status(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> StatusCode {
    app.call(json_request(method, uri, token, body)).await.status()
}

async fn rpc(app: &TestApp, method: &str, token: &str, body: Value) -> StatusCode {
    let uri = format!("/state.v1.StateService/{method}");
    status(app, Method::POST, &uri, Some(token), Some(body)).await
}

#[tokio::test]
async fn product_engineer_writes_dev_but_not_prod() {
    let f = fixture().await;
    let token = Some(f.product_token.as_str());

    let response = f
        .app
        .call(json_request(Method::POST, &format!("/tfstate/{}", f.dev), token, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let echoed = read_json(response).await;
    assert_eq!(echoed["operation"], "tfstate.write");
    assert_eq!(echoed["principal_id"], format!("user:{}", f.product_id));

    let lock = Method::from_bytes(b"LOCK").expect("method");
    assert_eq!(status(&f.app, lock, &format!("/tfstate/{}/lock", f.dev), token, None).await, StatusCode::OK);

    for method in [Method::GET, Method::POST] {
        assert_eq!(
            status(&f.app, method, &format!("/tfstate/{}", f.prod), token, None).await,
            StatusCode::FORBIDDEN
        );
    }
    assert_eq!(
        status(&f.app, Method::POST, &format!("/tfstate/{}", f.prod), Some(&f.platform_token), None).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn state_rpc_reads_use_logic_ids_from_the_body() {
    let f = fixture().await;
    assert_eq!(
        rpc(&f.app, "GetState", &f.product_token, json!({ "logic_id": "app-prod" })).await,
        StatusCode::OK
    );
    assert_eq!(
        rpc(&f.app, "GetStateOutputs", &f.product_token, json!({ "logic_id": "app-prod" })).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        rpc(&f.app, "GetStateOutputs", &f.product_token, json!({ "guid": f.dev.to_string() })).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn missing_and_unnamed_states() {
    let f = fixture().await;
    let token = Some(f.platform_token.as_str());
    assert_eq!(
        status(&f.app, Method::GET, &format!("/tfstate/{}", Uuid::new_v4()), token, None).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        rpc(&f.app, "GetState", &f.platform_token, json!({ "logic_id": "nope" })).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        rpc(&f.app, "GetState", &f.platform_token, json!({})).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn unmapped_operations_fail_closed() {
    let f = fixture().await;
    let token = Some(f.platform_token.as_str());
    assert_eq!(
        rpc(&f.app, "DropEverything", &f.platform_token, json!({})).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status(&f.app, Method::GET, "/somewhere/else", token, None).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status(&f.app, Method::PUT, &format!("/tfstate/{}", f.dev), token, None).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status(&f.app, Method::GET, "/somewhere/else", None, None).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn create_state_checks_proposed_labels() {
    let f = fixture().await;
    assert_eq!(
        rpc(&f.app, "CreateState", &f.product_token, json!({ "logic_id": "new-dev", "labels": { "env": "dev" } })).await,
        StatusCode::OK
    );
    assert_eq!(
        rpc(&f.app, "CreateState", &f.product_token, json!({ "logic_id": "new-prod", "labels": { "env": "prod" } })).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        rpc(&f.app, "CreateState", &f.product_token, json!({ "logic_id": "bare" })).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn dependencies_need_source_outputs_and_destination_access() {
    let f = fixture().await;
    let add = |from: &str, to: &str| json!({ "from_logic_id": from, "to_logic_id": to });
    assert_eq!(
        rpc(&f.app, "AddDependency", &f.product_token, add("net-dev", "app-dev")).await,
        StatusCode::OK
    );
    assert_eq!(
        rpc(&f.app, "AddDependency", &f.product_token, add("net-prod", "app-dev")).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        rpc(&f.app, "AddDependency", &f.product_token, add("net-dev", "app-prod")).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        rpc(&f.app, "AddDependency", &f.product_token, json!({ "to_logic_id": "app-dev" })).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn terraform_basic_credentials_work_on_the_data_plane_only() {
    let f = fixture().await;
    let response = f
        .app
        .call(basic_request(Method::GET, &format!("/tfstate/{}", f.dev), "terraform", &f.product_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = f
        .app
        .call(basic_request(Method::GET, "/admin/policies", "terraform", &f.platform_token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = f
        .app
        .call(basic_request(Method::GET, &format!("/tfstate/{}", f.dev), "terraform", "not-a-token"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn policy_writes_apply_to_the_next_request() {
    let f = fixture().await;
    let token = Some(f.product_token.as_str());
    let prod_read = format!("/tfstate/{}", f.prod);
    assert_eq!(status(&f.app, Method::GET, &prod_read, token, None).await, StatusCode::FORBIDDEN);
    assert_eq!(
        status(&f.app, Method::GET, "/admin/policies", token, None).await,
        StatusCode::FORBIDDEN
    );

    let response = f
        .app
        .call(json_request(
            Method::POST,
            "/admin/policies",
            Some(&f.platform_token),
            Some(json!({
                "add": [{
                    "ptype": "permission",
                    "subject": "role:product-engineer",
                    "object_type": "state",
                    "action": "tfstate:read",
                    "scope": "env == \"prod\""
                }]
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let written = read_json(response).await;
    assert!(written["generation"].as_u64().expect("generation") >= 2);

    assert_eq!(status(&f.app, Method::GET, &prod_read, token, None).await, StatusCode::OK);

    let listed = read_json(
        f.app
            .call(json_request(
                Method::GET,
                "/admin/policies?ptype=p&field_index=0&values=role:product-engineer",
                Some(&f.platform_token),
                None,
            ))
            .await,
    )
    .await;
    // Nine seeded product-engineer rules plus the one just added.
    assert_eq!(listed["items"].as_array().expect("items").len(), 10);
}

#[tokio::test]
async fn malformed_policy_write_is_rejected_and_leaves_the_table_usable() {
    let f = fixture().await;
    let write = |body: Value| {
        json_request(Method::POST, "/admin/policies", Some(&f.platform_token), Some(body))
    };

    let response = f
        .app
        .call(write(json!({
            "add": [{ "ptype": "grouping", "member": "user:1", "parent": "" }]
        })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "validation_error");

    let response = f
        .app
        .call(write(json!({
            "add": [{
                "ptype": "permission",
                "subject": "role:auditor",
                "object_type": "state",
                "action": "state:list",
                "scope": ""
            }]
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    f.app.state.policies.reload().await.expect("reload");
    let stored = f.app.state.policies.load_all().await.expect("policies");
    assert_eq!(stored.len(), policies().len() + self_service_policy().len() + 1);
}

#[tokio::test]
async fn sessions_are_self_service() {
    let f = fixture().await;
    let response = f
        .app
        .call(json_request(Method::GET, "/me/sessions", Some(&f.product_token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = read_json(response).await;
    let items = listed["items"].as_array().expect("items");
    let current = items
        .iter()
        .find(|item| item["current"] == true)
        .expect("current session listed");
    let session_id = current["id"].as_str().expect("session id").to_string();

    // Someone else's sessions need a policy on the target principal.
    let other = format!("/me/sessions?principal_id=user:{}", f.product_id);
    let response = f
        .app
        .call(json_request(Method::GET, &other, Some(&f.platform_token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["principal_id"], format!("user:{}", f.product_id));

    let response = f
        .app
        .call(json_request(
            Method::DELETE,
            &format!("/me/sessions/{session_id}"),
            Some(&f.product_token),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        status(&f.app, Method::GET, "/me/sessions", Some(&f.product_token), None).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn other_users_data_is_forbidden_without_policy() {
    let f = fixture().await;
    let platform = f
        .app
        .store
        .user_by_email("ops@example.com")
        .await
        .expect("lookup")
        .expect("platform user");
    let uri = format!("/me/permissions?principal_id=user:{}", platform.id);
    assert_eq!(
        status(&f.app, Method::GET, &uri, Some(&f.product_token), None).await,
        StatusCode::FORBIDDEN
    );
    let uri = format!("/me/sessions/{}?principal_id=user:{}", Uuid::new_v4(), platform.id);
    assert_eq!(
        status(&f.app, Method::DELETE, &uri, Some(&f.product_token), None).await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn effective_permissions_follow_roles() {
    let f = fixture().await;
    let response = f
        .app
        .call(json_request(Method::GET, "/me/permissions", Some(&f.product_token), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["roles"], json!(["role:product-engineer"]));
    let permissions = body["permissions"].as_array().expect("permissions");
    let granted_to = |role: &str| {
        permissions
            .iter()
            .filter(|p| p["granted_to"] == role)
            .count()
    };
    assert_eq!(granted_to("role:product-engineer"), policies().len() - 1);
    assert_eq!(granted_to(AUTHENTICATED_ROLE), self_service_policy().len());
    assert_eq!(permissions.len(), policies().len() - 1 + self_service_policy().len());
}

#[tokio::test]
async fn direct_role_assignment_applies_to_the_next_request() {
    let f = fixture().await;
    let response = f
        .app
        .call(json_request(
            Method::POST,
            "/admin/roles",
            Some(&f.platform_token),
            Some(json!({ "principal_id": "group:oops", "role": "platform-engineer" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = f
        .app
        .call(json_request(
            Method::POST,
            "/admin/roles",
            Some(&f.platform_token),
            Some(json!({
                "principal_id": format!("user:{}", f.product_id),
                "role": "platform-engineer"
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        status(&f.app, Method::GET, &format!("/tfstate/{}", f.prod), Some(&f.product_token), None).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn fresh_deployment_seeds_self_service_rules() {
    let store = Arc::new(InMemoryStore::new());
    seed_user(&store, "new@example.com").await;
    let app = TestApp::internal(store).await;
    assert_eq!(app.state.policies.load_all().await.expect("policies"), self_service_policy());

    let token = access_token(&app.login("new@example.com", "openid").await);
    assert_eq!(
        status(&app, Method::GET, "/me/permissions", Some(&token), None).await,
        StatusCode::OK
    );
    let someone_else = format!("/me/permissions?principal_id=user:{}", Uuid::new_v4());
    assert_eq!(
        status(&app, Method::GET, &someone_else, Some(&token), None).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        status(&app, Method::GET, "/admin/policies", Some(&token), None).await,
        StatusCode::FORBIDDEN
    );
}
