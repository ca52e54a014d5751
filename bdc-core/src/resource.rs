//! Managed resource kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::{SchemaDocument, DEFINITIONS_KEY, REPLICATION_FLOWS_KEY};

/// The kinds of object the service manages.
///
/// # Examples
///
/// ```
/// use bdc_core::ResourceKind;
///
/// let kind: ResourceKind = "replication-flow".parse().unwrap();
/// assert_eq!(kind.endpoint(), "replicationflows");
/// assert_eq!(kind.pre_dependency(), Some(ResourceKind::LocalTable));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// SQL view.
    View,
    /// Local table.
    LocalTable,
    /// Replication flow. Depends on its target local tables.
    ReplicationFlow,
}

impl ResourceKind {
    /// All kinds.
    pub const ALL: [ResourceKind; 3] = [Self::View, Self::LocalTable, Self::ReplicationFlow];

    /// Identifier used on the command line and in serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::LocalTable => "local-table",
            Self::ReplicationFlow => "replication-flow",
        }
    }

    /// Human-readable name used in log and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::LocalTable => "local table",
            Self::ReplicationFlow => "replication flow",
        }
    }

    /// Collection endpoint below `/spaces/{space}/`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::View => "views",
            Self::LocalTable => "localTable",
            Self::ReplicationFlow => "replicationflows",
        }
    }

    /// Top-level document key holding objects of this kind.
    pub fn document_key(&self) -> &'static str {
        match self {
            Self::View | Self::LocalTable => DEFINITIONS_KEY,
            Self::ReplicationFlow => REPLICATION_FLOWS_KEY,
        }
    }

    /// Kind of object that must exist before one of this kind is sent.
    pub fn pre_dependency(&self) -> Option<ResourceKind> {
        match self {
            Self::View | Self::LocalTable => None,
            Self::ReplicationFlow => Some(Self::LocalTable),
        }
    }

    /// Names of the objects `name` depends on, in document order.
    ///
    /// Empty for kinds without a pre-dependency. For replication flows these
    /// are the keys of the flow's `targets` map.
    pub fn resolve_dependencies(&self, document: &SchemaDocument, name: &str) -> Vec<String> {
        match self {
            Self::View | Self::LocalTable => Vec::new(),
            Self::ReplicationFlow => document.replication_flow_targets(name),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown resource kind {s:?} (expected one of: view, local-table, replication-flow)"
                )
            })
    }
}
