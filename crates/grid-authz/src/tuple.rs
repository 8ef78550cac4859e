//! Policy tuples and their persisted row form.
//!
//! # Row format
//! Rows are stored as `(ptype, v0..v5)`:
//! - `p` rows: `(subject, object_type, action, scope, effect)`
//! - `g` rows: `(member, parent)`
//!
//! Trailing empty fields are not persisted; empty fields in the middle of a
//! row are kept because the scope column is legitimately empty for rules that
//! apply regardless of labels.

use crate::errors::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const PERMISSION_PTYPE: &str = "p";
pub const GROUPING_PTYPE: &str = "g";
const ROW_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }

    fn parse(value: &str) -> AuthzResult<Self> {
        match value {
            "" | "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(AuthzError::InvalidRow(format!("unknown effect {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionRule {
    pub subject: String,
    pub object_type: String,
    pub action: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub effect: Effect,
}

impl PermissionRule {
    pub fn allow(subject: &str, object_type: &str, action: &str, scope: &str) -> Self {
        Self {
            subject: subject.to_string(),
            object_type: object_type.to_string(),
            action: action.to_string(),
            scope: scope.to_string(),
            effect: Effect::Allow,
        }
    }

    pub fn deny(subject: &str, object_type: &str, action: &str, scope: &str) -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow(subject, object_type, action, scope)
        }
    }

    /// Whether the rule's object and action columns cover the request.
    pub fn covers(&self, object_type: &str, action: &str) -> bool {
        (self.object_type == crate::WILDCARD || self.object_type == object_type)
            && (self.action == crate::WILDCARD || self.action == action)
    }

    pub(crate) fn to_casbin(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.object_type.clone(),
            self.action.clone(),
            self.scope.clone(),
            self.effect.as_str().to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    pub member: String,
    pub parent: String,
}

impl GroupingRule {
    pub fn new(member: &str, parent: &str) -> Self {
        Self {
            member: member.to_string(),
            parent: parent.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "ptype", rename_all = "snake_case")]
pub enum PolicyTuple {
    Permission(PermissionRule),
    Grouping(GroupingRule),
}

impl PolicyTuple {
    pub fn to_row(&self) -> PolicyRow {
        match self {
            PolicyTuple::Permission(rule) => PolicyRow::new(PERMISSION_PTYPE, rule.to_casbin()),
            PolicyTuple::Grouping(rule) => PolicyRow::new(
                GROUPING_PTYPE,
                vec![rule.member.clone(), rule.parent.clone()],
            ),
        }
    }

    /// Check that the tuple survives a write and read back through its row
    /// form. Rejects empty subjects, objects, actions, members and parents.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidRow`] naming the offending field set.
    pub fn validate(&self) -> AuthzResult<()> {
        match Self::from_row(&self.to_row())? {
            Some(_) => Ok(()),
            None => Err(AuthzError::InvalidRow("policy tuple is blank".to_string())),
        }
    }

    /// Parse a persisted row. Rows with nothing but a ptype yield `None`.
    pub fn from_row(row: &PolicyRow) -> AuthzResult<Option<Self>> {
        if row.is_blank() {
            return Ok(None);
        }
        let field = |index: usize| row.values.get(index).cloned().unwrap_or_default();
        match row.ptype.as_str() {
            PERMISSION_PTYPE => {
                let rule = PermissionRule {
                    subject: field(0),
                    object_type: field(1),
                    action: field(2),
                    scope: field(3),
                    effect: Effect::parse(&field(4))?,
                };
                if rule.subject.is_empty() || rule.object_type.is_empty() || rule.action.is_empty()
                {
                    return Err(AuthzError::InvalidRow(format!(
                        "permission row missing subject, object or action: {:?}",
                        row.values
                    )));
                }
                Ok(Some(PolicyTuple::Permission(rule)))
            }
            GROUPING_PTYPE => {
                let rule = GroupingRule {
                    member: field(0),
                    parent: field(1),
                };
                if rule.member.is_empty() || rule.parent.is_empty() {
                    return Err(AuthzError::InvalidRow(format!(
                        "grouping row needs member and parent: {:?}",
                        row.values
                    )));
                }
                Ok(Some(PolicyTuple::Grouping(rule)))
            }
            other => Err(AuthzError::InvalidRow(format!("unknown ptype {other}"))),
        }
    }
}

/// Persisted policy row. `values` never carries trailing empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRow {
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyRow {
    pub fn new(ptype: &str, mut values: Vec<String>) -> Self {
        values.truncate(ROW_WIDTH);
        while values.last().is_some_and(|value| value.is_empty()) {
            values.pop();
        }
        Self {
            ptype: ptype.to_string(),
            values,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|value| value.is_empty())
    }

    /// Field `index` padded out to the fixed `v0..v5` width.
    pub fn field(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    /// Row as it would be written for the parsed rule. Permission rows spell
    /// out their effect, so a legacy row with an empty effect and one with
    /// `allow` share a canonical form. Unparseable rows are returned as-is.
    pub fn canonical(&self) -> PolicyRow {
        match PolicyTuple::from_row(self) {
            Ok(Some(tuple)) => tuple.to_row(),
            _ => self.clone(),
        }
    }

    /// Whether both rows describe the same rule.
    pub fn same_rule(&self, other: &PolicyRow) -> bool {
        self.canonical() == other.canonical()
    }

    /// All six columns, for stores with a fixed `v0..v5` layout.
    pub fn columns(&self) -> [String; ROW_WIDTH] {
        std::array::from_fn(|index| self.field(index).to_string())
    }
}

/// Filter for partial loads: `ptype` plus field values starting at
/// `field_index`. Empty filter values match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFilter {
    pub ptype: Option<String>,
    #[serde(default)]
    pub field_index: usize,
    #[serde(default)]
    pub values: Vec<String>,
}

impl PolicyFilter {
    pub fn matches(&self, row: &PolicyRow) -> bool {
        if let Some(ptype) = &self.ptype {
            if ptype != &row.ptype {
                return false;
            }
        }
        self.values.iter().enumerate().all(|(offset, expected)| {
            expected.is_empty() || row.field(self.field_index + offset) == expected
        })
    }
}

/// Parse rows, dropping blank rows and exact duplicates while keeping order.
pub fn normalize_rows(rows: &[PolicyRow]) -> AuthzResult<Vec<PolicyTuple>> {
    let mut seen = HashSet::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(tuple) = PolicyTuple::from_row(row)? else {
            continue;
        };
        if seen.insert(tuple.clone()) {
            tuples.push(tuple);
        }
    }
    Ok(tuples)
}

/// Like [`normalize_rows`], but drops rows that fail to parse instead of
/// failing the whole load. Each dropped row is logged.
pub fn normalize_rows_skipping_invalid(rows: &[PolicyRow]) -> Vec<PolicyTuple> {
    let mut seen = HashSet::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        match PolicyTuple::from_row(row) {
            Ok(Some(tuple)) => {
                if seen.insert(tuple.clone()) {
                    tuples.push(tuple);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(ptype = %row.ptype, values = ?row.values, error = %err, "skipping invalid policy row");
            }
        }
    }
    tuples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ptype: &str, values: &[&str]) -> PolicyRow {
        PolicyRow::new(ptype, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn trailing_empties_trimmed_internal_kept() {
        let rule = PermissionRule::allow("role:admin", "*", "*", "");
        let persisted = PolicyTuple::Permission(rule).to_row();
        assert_eq!(persisted.values, vec!["role:admin", "*", "*", "", "allow"]);

        let grouping = row("g", &["group:platform-team", "role:platform-engineer", "", ""]);
        assert_eq!(grouping.values.len(), 2);
        assert_eq!(grouping.columns()[5], "");
    }

    #[test]
    fn blank_rows_are_skipped() {
        let rows = vec![row("p", &["", "", ""]), row("g", &[])];
        assert!(normalize_rows(&rows).expect("normalize").is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let rows = vec![
            row("p", &["role:reader", "state", "state:read", "", "allow"]),
            row("p", &["role:reader", "state", "state:read"]),
            row("g", &["user:alice", "role:reader"]),
            row("g", &["user:alice", "role:reader"]),
        ];
        let tuples = normalize_rows(&rows).expect("normalize");
        assert_eq!(tuples.len(), 2);
    }

    #[test]
    fn missing_effect_defaults_to_allow() {
        let parsed = PolicyTuple::from_row(&row("p", &["role:r", "state", "state:read"]))
            .expect("parse")
            .expect("non-blank");
        let PolicyTuple::Permission(rule) = parsed else {
            panic!("expected permission rule");
        };
        assert_eq!(rule.effect, Effect::Allow);
    }

    #[test]
    fn invalid_rows_are_rejected() {
        assert!(PolicyTuple::from_row(&row("x", &["a", "b"])).is_err());
        assert!(PolicyTuple::from_row(&row("g", &["only-member"])).is_err());
        let bad_effect = row("p", &["role:r", "state", "state:read", "", "maybe"]);
        assert!(PolicyTuple::from_row(&bad_effect).is_err());
    }

    #[test]
    fn validate_rejects_half_empty_tuples() {
        let dangling = PolicyTuple::Grouping(GroupingRule::new("user:1", ""));
        assert!(dangling.validate().is_err());
        let no_action = PolicyTuple::Permission(PermissionRule::allow("role:r", "state", "", ""));
        assert!(no_action.validate().is_err());
        let fine = PolicyTuple::Permission(PermissionRule::allow("role:r", "*", "*", ""));
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn lenient_normalize_keeps_good_rows() {
        let rows = vec![
            row("g", &["user:1"]),
            row("p", &["role:r", "state", "state:read"]),
            row("q", &["x", "y"]),
        ];
        assert!(normalize_rows(&rows).is_err());
        let tuples = normalize_rows_skipping_invalid(&rows);
        assert_eq!(tuples.len(), 1);
    }

    #[test]
    fn legacy_allow_rows_are_the_same_rule() {
        let legacy = row("p", &["role:r", "state", "state:read", "", ""]);
        let explicit = row("p", &["role:r", "state", "state:read", "", "allow"]);
        assert_ne!(legacy, explicit);
        assert!(legacy.same_rule(&explicit));
        let deny = row("p", &["role:r", "state", "state:read", "", "deny"]);
        assert!(!deny.same_rule(&explicit));
    }

    #[test]
    fn filter_matches_from_field_index() {
        let target = row("p", &["role:reader", "state", "state:read", "", "allow"]);
        let filter = PolicyFilter {
            ptype: Some("p".to_string()),
            field_index: 1,
            values: vec!["state".to_string(), String::new()],
        };
        assert!(filter.matches(&target));

        let other = PolicyFilter {
            ptype: Some("g".to_string()),
            ..PolicyFilter::default()
        };
        assert!(!other.matches(&target));
    }

    #[test]
    fn wildcard_columns_cover_everything() {
        let rule = PermissionRule::allow("role:platform-engineer", "*", "*", "");
        assert!(rule.covers("state", "tfstate:write"));
        let narrow = PermissionRule::allow("role:r", "state", "state:read", "");
        assert!(!narrow.covers("state", "state:list"));
        assert!(!narrow.covers("policy", "state:read"));
    }
}
