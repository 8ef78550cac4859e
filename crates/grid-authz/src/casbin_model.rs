use crate::errors::AuthzResult;
use casbin::prelude::DefaultModel;

/// Name under which the label matcher is registered with the enforcer.
pub const LABEL_MATCH_FN: &str = "labelMatch";

// Object and action wildcards are compared literally. The scope column carries
// a label expression that `labelMatch` evaluates against the request labels.
const MODEL: &str = r#"
[request_definition]
r = sub, obj, act, labels

[policy_definition]
p = sub, obj, act, scope, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && (p.obj == "*" || r.obj == p.obj) && (p.act == "*" || r.act == p.act) && labelMatch(r.labels, p.scope)
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> AuthzResult<DefaultModel> {
    Ok(DefaultModel::from_str(MODEL).await?)
}
