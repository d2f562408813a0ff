use crate::core::join::{TableJoin, join_clauses};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which bucket of users an alternative condition matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhereAlternative {
    /// Resolved actor ids (read-new).
    NewActor,
    /// Legacy numeric user ids (read-old).
    UserId,
    /// Legacy user names (read-old).
    UserName,
}

/// Membership test for a user-reference field.
///
/// `conds` is the OR of all `alternatives`; callers that would rather run one
/// query per alternative (a UNION) can use `alternatives` directly. Both
/// require `tables` to be joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereDescriptor {
    pub tables: Vec<TableJoin>,
    pub conds: String,
    pub alternatives: BTreeMap<WhereAlternative, String>,
}

impl WhereDescriptor {
    pub fn join_clause(&self) -> String {
        join_clauses(&self.tables)
    }

    /// True when the predicate can never match (no users, or none resolvable).
    pub fn matches_nothing(&self) -> bool {
        self.alternatives.is_empty()
    }
}
