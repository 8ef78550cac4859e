use grid_authz::Labels;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label view of a Terraform state, as needed for authorization. The state
/// contents are owned by the external state service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub guid: Uuid,
    pub logic_id: String,
    #[serde(default)]
    pub labels: Labels,
}
