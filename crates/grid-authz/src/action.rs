use serde::{Deserialize, Serialize};

/// Literal wildcard accepted in the object-type and action positions of a
/// permission rule.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    State,
    Policy,
    Role,
    Session,
    Permission,
    Admin,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::State => "state",
            ObjectType::Policy => "policy",
            ObjectType::Role => "role",
            ObjectType::Session => "session",
            ObjectType::Permission => "permission",
            ObjectType::Admin => "admin",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "state" => Ok(ObjectType::State),
            "policy" => Ok(ObjectType::Policy),
            "role" => Ok(ObjectType::Role),
            "session" => Ok(ObjectType::Session),
            "permission" => Ok(ObjectType::Permission),
            "admin" => Ok(ObjectType::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StateCreate,
    StateRead,
    StateList,
    StateUpdateLabels,
    StateDelete,
    TfstateRead,
    TfstateWrite,
    TfstateLock,
    TfstateUnlock,
    StateOutputRead,
    StateOutputList,
    DependencyCreate,
    DependencyRead,
    DependencyList,
    DependencyDelete,
    PolicyRead,
    PolicyWrite,
    RoleRead,
    RoleAssign,
    SessionList,
    SessionRevoke,
    PermissionRead,
    AdminCacheRefresh,
}

impl Action {
    pub const ALL: [Action; 23] = [
        Action::StateCreate,
        Action::StateRead,
        Action::StateList,
        Action::StateUpdateLabels,
        Action::StateDelete,
        Action::TfstateRead,
        Action::TfstateWrite,
        Action::TfstateLock,
        Action::TfstateUnlock,
        Action::StateOutputRead,
        Action::StateOutputList,
        Action::DependencyCreate,
        Action::DependencyRead,
        Action::DependencyList,
        Action::DependencyDelete,
        Action::PolicyRead,
        Action::PolicyWrite,
        Action::RoleRead,
        Action::RoleAssign,
        Action::SessionList,
        Action::SessionRevoke,
        Action::PermissionRead,
        Action::AdminCacheRefresh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::StateCreate => "state:create",
            Action::StateRead => "state:read",
            Action::StateList => "state:list",
            Action::StateUpdateLabels => "state:update-labels",
            Action::StateDelete => "state:delete",
            Action::TfstateRead => "tfstate:read",
            Action::TfstateWrite => "tfstate:write",
            Action::TfstateLock => "tfstate:lock",
            Action::TfstateUnlock => "tfstate:unlock",
            Action::StateOutputRead => "state-output:read",
            Action::StateOutputList => "state-output:list",
            Action::DependencyCreate => "dependency:create",
            Action::DependencyRead => "dependency:read",
            Action::DependencyList => "dependency:list",
            Action::DependencyDelete => "dependency:delete",
            Action::PolicyRead => "policy:read",
            Action::PolicyWrite => "policy:write",
            Action::RoleRead => "role:read",
            Action::RoleAssign => "role:assign",
            Action::SessionList => "session:list",
            Action::SessionRevoke => "session:revoke",
            Action::PermissionRead => "permission:read",
            Action::AdminCacheRefresh => "admin:cache-refresh",
        }
    }

    /// Object type an action is normally checked against.
    pub fn object_type(self) -> ObjectType {
        match self {
            Action::PolicyRead | Action::PolicyWrite => ObjectType::Policy,
            Action::RoleRead | Action::RoleAssign => ObjectType::Role,
            Action::SessionList | Action::SessionRevoke => ObjectType::Session,
            Action::PermissionRead => ObjectType::Permission,
            Action::AdminCacheRefresh => ObjectType::Admin,
            _ => ObjectType::State,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or(())
    }
}
