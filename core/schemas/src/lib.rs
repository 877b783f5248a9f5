use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Closed value sets
// ============================================================================

/// A caller or stored value outside a closed enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
    pub accepted: &'static [&'static str],
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}' (accepted: {})",
            self.field,
            self.value,
            self.accepted.join(", ")
        )
    }
}

impl std::error::Error for UnknownVariant {}

/// Implements `as_str`, `ALL`, `Display` and `FromStr` for a unit-only enum
/// whose storage form is a fixed lowercase label.
macro_rules! closed_enum {
    ($name:ident, $field:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [&'static str] = &[$($label),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        field: $field,
                        value: value.to_string(),
                        accepted: Self::ALL,
                    }),
                }
            }
        }
    };
}

/// Permission levels in ascending order of restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Open,
    Guarded,
    ReadOnly,
    Locked,
}

closed_enum!(PermissionLevel, "permission", {
    Open => "open",
    Guarded => "guarded",
    ReadOnly => "read_only",
    Locked => "locked",
});

impl PermissionLevel {
    /// Locked records are excluded from every listing and read
    pub fn is_visible(&self) -> bool {
        *self != PermissionLevel::Locked
    }
}

/// Fallback when neither caller, container nor settings supply a level
pub const DEFAULT_PERMISSION: PermissionLevel = PermissionLevel::Guarded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Skill,
    Pattern,
    AntiPattern,
    Decision,
    Insight,
    Comparison,
    Note,
    ReferenceDoc,
    ReferenceUrl,
    Identity,
    SessionContext,
    Scratchpad,
}

closed_enum!(KnowledgeType, "type", {
    Skill => "skill",
    Pattern => "pattern",
    AntiPattern => "anti_pattern",
    Decision => "decision",
    Insight => "insight",
    Comparison => "comparison",
    Note => "note",
    ReferenceDoc => "reference_doc",
    ReferenceUrl => "reference_url",
    Identity => "identity",
    SessionContext => "session_context",
    Scratchpad => "scratchpad",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityStatus {
    Draft,
    Experimental,
    Proven,
    BattleTested,
    Deprecated,
}

closed_enum!(MaturityStatus, "status", {
    Draft => "draft",
    Experimental => "experimental",
    Proven => "proven",
    BattleTested => "battle_tested",
    Deprecated => "deprecated",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Active,
    Paused,
    Completed,
    Archived,
    Deleted,
}

closed_enum!(ContainerStatus, "container status", {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
    Archived => "archived",
    Deleted => "deleted",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

closed_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

closed_enum!(WorkStatus, "task status", {
    Todo => "todo",
    InProgress => "in_progress",
    Done => "done",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Uses,
    RelatedTo,
}

closed_enum!(RelationKind, "relation", {
    Uses => "uses",
    RelatedTo => "related_to",
});

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub description: Option<String>,
    pub stack: Option<String>,
    pub status: ContainerStatus,
    pub permission: PermissionLevel,
    pub default_permission: Option<PermissionLevel>,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub container_id: Option<ContainerId>,
    pub kind: KnowledgeType,
    pub title: String,
    pub content: String,
    pub category_path: Vec<String>,
    pub status: MaturityStatus,
    pub permission: PermissionLevel,
    pub tags: Vec<String>,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub container_id: Option<ContainerId>,
    pub parent_id: Option<WorkItemId>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: WorkStatus,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

/// Lightweight reference to a container, carried by scoped operations and
/// search hits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: ContainerId,
    pub name: String,
}

/// Persisted singleton: the active container and active identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPointer {
    pub container_id: Option<ContainerId>,
    pub identity_id: Option<KnowledgeId>,
    pub updated_at: Option<String>,
}

/// Names are compared and stored in this form: trimmed, lowercase, inner
/// whitespace runs collapsed to a single `-`.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_container_id() -> ContainerId {
    ContainerId(format!("proj_{}", ulid::Ulid::new()))
}

pub fn generate_knowledge_id() -> KnowledgeId {
    KnowledgeId(format!("mem_{}", ulid::Ulid::new()))
}

pub fn generate_work_item_id() -> WorkItemId {
    WorkItemId(format!("task_{}", ulid::Ulid::new()))
}

pub fn generate_tag_id() -> TagId {
    TagId(format!("tag_{}", ulid::Ulid::new()))
}
